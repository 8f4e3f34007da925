//! Scenario loading shared by ship_cli and the tests.
//!
//! A scenario is one JSON document under `content/scenarios/`: the ship's
//! systems, life-support baseline, optional panels (navigation, tactical,
//! encounter, clock, telemetry), triggers and a tuning block. Loading
//! normalizes loose values, validates cross references and turns the result
//! into the kernel's initial state tree plus the standard module set.

mod normalize;

pub use normalize::normalize_scenario;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use ship_core::events;
use ship_core::life_support::{LifeSupportModule, LifeSupportState, LifeSupportTuning};
use ship_core::modules::{
    ClockState, Encounter, EncounterState, Navigation, NavigationState, RandomEventTuning,
    RandomEvents, Tactical, TacticalState, Telemetry, TelemetryState, Timekeeping, TriggerCondition,
    TriggerDef, Triggers, TriggersState,
};
use ship_core::power::{PowerEngine, PowerState, PowerTuning};
use ship_core::{keys, Kernel, KernelConfig, Module, ModuleId, StateTree, SystemEntity};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Engine constants a scenario may override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScenarioTuning {
    pub kernel: KernelConfig,
    pub power: PowerTuning,
    pub life_support: LifeSupportTuning,
    pub random_events: RandomEventTuning,
}

fn green() -> String {
    "green".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "green")]
    pub alert: String,
    #[serde(default)]
    pub systems: Vec<SystemEntity>,
    #[serde(default)]
    pub power: PowerState,
    #[serde(default)]
    pub life_support: LifeSupportState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigation: Option<NavigationState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tactical: Option<TacticalState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter: Option<EncounterState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock: Option<ClockState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<TelemetryState>,
    #[serde(default)]
    pub triggers: Vec<TriggerDef>,
    #[serde(default)]
    pub tuning: ScenarioTuning,
}

impl Scenario {
    /// Kernel settings from the tuning block; the host may override them.
    pub fn kernel_config(&self) -> KernelConfig {
        self.tuning.kernel.clone()
    }
}

/// Parses, normalizes and validates a scenario document.
pub fn parse_scenario(text: &str) -> Result<Scenario> {
    let mut raw: Value = serde_json::from_str(text).context("scenario is not valid JSON")?;
    normalize_scenario(&mut raw)?;
    let scenario: Scenario =
        serde_json::from_value(raw).context("scenario does not match the expected shape")?;
    validate_scenario(&scenario)?;
    Ok(scenario)
}

pub fn load_scenario(path: impl AsRef<Path>) -> Result<Scenario> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let scenario =
        parse_scenario(&text).with_context(|| format!("loading scenario {}", path.display()))?;
    tracing::info!(
        scenario = %scenario.id,
        systems = scenario.systems.len(),
        "scenario loaded"
    );
    Ok(scenario)
}

/// All `*.json` files in `dir`, sorted by name.
pub fn list_scenarios(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn ensure_unique<'a>(kind: &str, ids: impl IntoIterator<Item = &'a str>) -> Result<HashSet<&'a str>> {
    let mut seen = HashSet::new();
    for id in ids {
        ensure!(!id.trim().is_empty(), "{kind} with empty id");
        ensure!(seen.insert(id), "duplicate {kind} id '{id}'");
    }
    Ok(seen)
}

/// Cross-reference checks the engines rely on.
pub fn validate_scenario(scenario: &Scenario) -> Result<()> {
    ensure!(!scenario.id.trim().is_empty(), "scenario id is empty");
    let systems = ensure_unique("system", scenario.systems.iter().map(|s| s.id.as_str()))?;

    for id in scenario.power.profiles.keys() {
        ensure!(
            systems.contains(id.as_str()),
            "power profile references unknown system '{id}'"
        );
    }

    ensure_unique("trigger", scenario.triggers.iter().map(|t| t.id.as_str()))?;
    for trigger in &scenario.triggers {
        if let TriggerCondition::SystemIntegrityBelow { system, .. } = &trigger.condition {
            ensure!(
                systems.contains(system.as_str()),
                "trigger '{}' references unknown system '{system}'",
                trigger.id
            );
        }
    }

    let life_support = &scenario.life_support;
    ensure_unique("cycle", life_support.cycles.iter().map(|c| c.id.as_str()))?;
    ensure_unique("section", life_support.sections.iter().map(|s| s.id.as_str()))?;
    ensure_unique("filter bank", life_support.filters.banks.iter().map(|b| b.id.as_str()))?;
    let leaks = ensure_unique("leak", life_support.leaks.iter().map(|l| l.id.as_str()))?;
    if let Some(active) = &life_support.active_leak_id {
        ensure!(
            leaks.contains(active.as_str()),
            "active leak '{active}' is not a known leak"
        );
    }

    if let Some(tactical) = &scenario.tactical {
        ensure_unique("weapon", tactical.weapons.iter().map(|w| w.id.as_str()))?;
    }
    if let Some(encounter) = &scenario.encounter {
        ensure_unique("contact", encounter.contacts.iter().map(|c| c.id.as_str()))?;
    }
    Ok(())
}

fn insert<T: Serialize>(state: &mut StateTree, key: &str, value: &T) -> Result<()> {
    let value = serde_json::to_value(value).with_context(|| format!("serializing {key}"))?;
    state.insert(key.to_string(), value);
    Ok(())
}

/// The kernel's initial state tree for `scenario`.
pub fn build_initial_state(scenario: &Scenario) -> Result<StateTree> {
    let mut state = StateTree::new();
    state.insert(
        "scenario".to_string(),
        json!({
            "id": scenario.id,
            "name": scenario.name,
            "description": scenario.description,
        }),
    );
    state.insert(keys::ALERT.to_string(), json!(scenario.alert));
    state.insert(keys::SIMULATION_PAUSED.to_string(), json!(false));
    state.insert(keys::LOGS.to_string(), json!([]));
    insert(&mut state, keys::SYSTEMS, &scenario.systems)?;
    insert(&mut state, keys::POWER, &scenario.power)?;
    insert(&mut state, keys::LIFE_SUPPORT, &scenario.life_support)?;
    if let Some(navigation) = &scenario.navigation {
        insert(&mut state, keys::NAVIGATION, navigation)?;
    }
    if let Some(tactical) = &scenario.tactical {
        insert(&mut state, keys::TACTICAL, tactical)?;
    }
    if let Some(encounter) = &scenario.encounter {
        insert(&mut state, keys::ENCOUNTER, encounter)?;
    }
    if let Some(clock) = &scenario.clock {
        insert(&mut state, keys::CLOCK, clock)?;
    }
    if let Some(telemetry) = &scenario.telemetry {
        insert(&mut state, keys::TELEMETRY, telemetry)?;
    }
    let triggers = TriggersState {
        definitions: scenario.triggers.clone(),
        fired: Vec::new(),
    };
    insert(&mut state, keys::TRIGGERS, &triggers)?;
    Ok(state)
}

/// Module ids in registration order, which is also tick order.
pub const STANDARD_MODULES: [&str; 9] = [
    "timekeeping",
    "power",
    "life-support",
    "navigation",
    "tactical",
    "encounter",
    "random-events",
    "triggers",
    "telemetry",
];

fn standard_module(id: &str, tuning: &ScenarioTuning) -> Option<Box<dyn Module>> {
    let module: Box<dyn Module> = match id {
        "timekeeping" => Box::new(Timekeeping),
        "power" => Box::new(PowerEngine::new(tuning.power.clone())),
        "life-support" => Box::new(LifeSupportModule::new(tuning.life_support.clone())),
        "navigation" => Box::new(Navigation),
        "tactical" => Box::new(Tactical),
        "encounter" => Box::new(Encounter),
        "random-events" => Box::new(RandomEvents::new(tuning.random_events.clone())),
        "triggers" => Box::new(Triggers::default()),
        "telemetry" => Box::new(Telemetry),
        _ => return None,
    };
    Some(module)
}

/// Registers and starts every standard module. A module whose start hook
/// fails stays in `Error` and the rest carry on.
pub fn register_standard_modules(kernel: &mut Kernel, scenario: &Scenario) -> Result<()> {
    for id in STANDARD_MODULES {
        let module = standard_module(id, &scenario.tuning)
            .with_context(|| format!("no standard module named {id}"))?;
        kernel
            .register_boxed(ModuleId::from(id), module)
            .with_context(|| format!("registering module {id}"))?;
        if !kernel.start_module(id)? {
            tracing::warn!(module = id, "module failed to start");
        }
    }
    Ok(())
}

/// Swaps a running kernel over to `scenario`: every scenario key is
/// replaced (logs are kept) and `systems:reinitialized` lets the engines
/// re-baseline.
pub fn apply_scenario(kernel: &mut Kernel, scenario: &Scenario) -> Result<()> {
    let state = build_initial_state(scenario)?;
    for (key, value) in state {
        if key != keys::LOGS {
            kernel.set_state(&key, value);
        }
    }
    kernel.emit(
        events::SYSTEMS_REINITIALIZED,
        json!({ "scenario": scenario.id }),
        None,
    );
    tracing::info!(scenario = %scenario.id, "scenario applied");
    Ok(())
}
