//! Secondary kernel modules: small deterministic behaviours that share the
//! clock with the power and life-support engines.

mod encounter;
mod navigation;
mod random_events;
mod tactical;
mod telemetry;
mod timekeeping;
mod triggers;

pub use encounter::{Contact, Encounter, EncounterState, ALERT_RED};
pub use navigation::{Navigation, NavigationState};
pub use random_events::{apply_damage, roll_damage, Damage, RandomEventTuning, RandomEvents};
pub use tactical::{Tactical, TacticalState, Weapon};
pub use telemetry::{take_sample, Telemetry, TelemetrySample, TelemetryState};
pub use timekeeping::{format_ship_time, ClockState, Timekeeping};
pub use triggers::{TriggerAction, TriggerCondition, TriggerDef, Triggers, TriggersState};
