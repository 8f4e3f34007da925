use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::events;
use crate::kernel::{HookResult, Module, ModuleContext};
use crate::{keys, LogKind, SystemEntity, SystemStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RandomEventTuning {
    /// Per-tick probability of a damage event.
    pub chance: f64,
    pub min_damage: f64,
    pub max_damage: f64,
    /// Integrity below which a damaged system is forced to `warning`.
    pub integrity_warning: f64,
}

impl Default for RandomEventTuning {
    fn default() -> Self {
        Self {
            chance: 0.02,
            min_damage: 2.0,
            max_damage: 8.0,
            integrity_warning: 30.0,
        }
    }
}

/// Outcome of one damage roll.
#[derive(Debug, Clone, PartialEq)]
pub struct Damage {
    pub index: usize,
    pub amount: f64,
}

/// Rolls for a damage event against the systems that are not offline.
pub fn roll_damage(systems: &[SystemEntity], tuning: &RandomEventTuning, rng: &mut impl Rng) -> Option<Damage> {
    if !rng.gen_bool(tuning.chance.clamp(0.0, 1.0)) {
        return None;
    }
    let candidates: Vec<usize> = systems
        .iter()
        .enumerate()
        .filter(|(_, s)| s.status != SystemStatus::Offline)
        .map(|(i, _)| i)
        .collect();
    let index = *candidates.choose(rng)?;
    let (lo, hi) = if tuning.min_damage <= tuning.max_damage {
        (tuning.min_damage, tuning.max_damage)
    } else {
        (tuning.max_damage, tuning.min_damage)
    };
    let amount = rng.gen_range(lo..=hi).round();
    Some(Damage { index, amount })
}

/// Applies a damage roll; low integrity degrades the status unless the
/// system is already critical or offline.
pub fn apply_damage(system: &mut SystemEntity, amount: f64, tuning: &RandomEventTuning) {
    system.set_integrity(system.integrity - amount);
    let degraded = matches!(system.status, SystemStatus::Critical | SystemStatus::Offline);
    if system.integrity < tuning.integrity_warning && !degraded {
        system.status = SystemStatus::Warning;
    }
}

#[derive(Debug, Default)]
pub struct RandomEvents {
    tuning: RandomEventTuning,
}

impl RandomEvents {
    pub fn new(tuning: RandomEventTuning) -> Self {
        Self { tuning }
    }
}

impl Module for RandomEvents {
    fn on_tick(&mut self, ctx: &mut ModuleContext<'_>, _tick: u64) -> HookResult {
        if ctx.is_paused() {
            return Ok(());
        }
        let mut systems: Vec<SystemEntity> = ctx.state_as(keys::SYSTEMS)?.unwrap_or_default();
        let Some(damage) = roll_damage(&systems, &self.tuning, ctx.rng()) else {
            return Ok(());
        };
        let system = &mut systems[damage.index];
        apply_damage(system, damage.amount, &self.tuning);
        let message = format!(
            "Schaden an {}: Integrität {:.0}%",
            system.display_name(),
            system.integrity
        );
        let payload = json!({
            "systemId": system.id,
            "damage": damage.amount,
            "integrity": system.integrity,
        });
        ctx.set_state_typed(keys::SYSTEMS, &systems)?;
        ctx.log(LogKind::Warning, message);
        ctx.emit(events::SYSTEMS_DAMAGED, payload);
        Ok(())
    }
}
