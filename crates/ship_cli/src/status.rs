//! One-line bridge status for the terminal.

use serde::de::DeserializeOwned;
use ship_core::life_support::{format_minutes, LifeSupportState, MetricKind};
use ship_core::modules::{ClockState, NavigationState};
use ship_core::power::PowerState;
use ship_core::{keys, LogEntry, StateTree};

fn read<T: DeserializeOwned>(state: &StateTree, key: &str) -> Option<T> {
    state
        .get(key)
        .and_then(|value| serde_json::from_value(value.clone()).ok())
}

fn power_summary(state: &StateTree) -> String {
    let Some(power) = read::<PowerState>(state, keys::POWER) else {
        return "power=-".to_string();
    };
    let split = power.distribution.map_or_else(
        || "-".to_string(),
        |d| format!("E{} S{} W{} A{}", d.engines, d.shields, d.weapons, d.aux),
    );
    format!(
        "power={split}  brownouts={}  overloads={}",
        power.brownouts.len(),
        power.overloads.len()
    )
}

fn life_support_summary(state: &StateTree) -> Option<String> {
    let life_support = read::<LifeSupportState>(state, keys::LIFE_SUPPORT)?;
    if life_support.is_empty() {
        return None;
    }
    let mut parts = Vec::new();
    if let Some(metric) = life_support
        .cycles
        .iter()
        .find(|c| !c.is_co2())
        .and_then(|c| c.metric(MetricKind::Efficiency))
    {
        parts.push(format!("O2={:.1}%", metric.value));
    }
    if let Some(minutes) = life_support.filters.reserve_air_minutes {
        parts.push(format!("reserve={}", format_minutes(minutes)));
    }
    if let Some(leak) = life_support
        .active_leak_id
        .as_deref()
        .and_then(|id| life_support.leaks.iter().find(|l| l.id == id))
    {
        parts.push(format!("leak={} {:.0}%", leak.display_name(), leak.progress));
    }
    Some(parts.join("  "))
}

pub fn format_status(state: &StateTree, tick: u64) -> String {
    let ship_time = read::<ClockState>(state, keys::CLOCK)
        .map(|clock| clock.ship_time)
        .filter(|time| !time.is_empty())
        .unwrap_or_else(|| "--:--:--".to_string());
    let alert = state
        .get(keys::ALERT)
        .and_then(serde_json::Value::as_str)
        .unwrap_or("green");

    let mut line = format!("[tick={tick:04}  {ship_time}  alert={alert}]  {}", power_summary(state));
    if let Some(life_support) = life_support_summary(state).filter(|s| !s.is_empty()) {
        line.push_str("  ");
        line.push_str(&life_support);
    }
    if let Some(nav) = read::<NavigationState>(state, keys::NAVIGATION) {
        if let Some(destination) = nav.destination.as_deref() {
            line.push_str(&format!("  nav={destination} {:.0}%", nav.progress));
        }
    }
    line
}

pub fn format_log(entry: &LogEntry) -> String {
    let module = entry
        .module
        .as_ref()
        .map(|id| format!(" {id}"))
        .unwrap_or_default();
    format!(
        "  [{:04}] {:<8}{module}: {}",
        entry.tick,
        entry.kind.to_string(),
        entry.message
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use ship_core::test_fixtures::{bridge_state, state_from};

    #[test]
    fn empty_state_still_formats() {
        let line = format_status(&StateTree::new(), 3);
        assert_eq!(line, "[tick=0003  --:--:--  alert=green]  power=-");
    }

    #[test]
    fn bridge_state_shows_every_panel() {
        let mut state = bridge_state();
        state.insert(
            keys::POWER.to_string(),
            json!({"distribution": {"engines": 40, "shields": 30, "weapons": 10, "aux": 20}, "brownouts": ["weapons"]}),
        );
        state.insert(keys::CLOCK.to_string(), json!({"shipTime": "08:30:00"}));
        let line = format_status(&state, 12);
        assert!(line.starts_with("[tick=0012  08:30:00  alert=green]"), "{line}");
        assert!(line.contains("power=E40 S30 W10 A20  brownouts=1  overloads=0"), "{line}");
        assert!(line.contains("O2=98.5%"), "{line}");
        assert!(line.contains("reserve=10h 00min"), "{line}");
        assert!(line.contains("nav=Sternenbasis 12 0%"), "{line}");
        assert!(!line.contains("leak="), "{line}");
    }

    #[test]
    fn active_leak_is_named() {
        let state = state_from(json!({
            "lifeSupport": {
                "leaks": [{"id": "l1", "location": "Deck 5", "progress": 42.4}],
                "activeLeakId": "l1"
            }
        }));
        assert!(format_status(&state, 1).contains("leak=Deck 5 42%"));
    }
}
