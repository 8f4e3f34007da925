//! Event names and the envelope delivered by the kernel's bus.
//!
//! Payloads are JSON objects with camelCase field names so the presentation
//! layer can consume them without a translation step.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ModuleId;

pub const KERNEL_TICK: &str = "kernel:tick";
pub const KERNEL_BOOTED: &str = "kernel:booted";
pub const KERNEL_SHUTDOWN: &str = "kernel:shutdown";
pub const STATE_CHANGED: &str = "state:changed";

pub const UI_POWER_ADJUSTED: &str = "ui:power-adjusted";
pub const POWER_REQUEST_BALANCE: &str = "power:request-balance";
pub const POWER_DISTRIBUTION_APPLIED: &str = "power:distribution-applied";
pub const SYSTEMS_POWER_UPDATED: &str = "systems:power-updated";
pub const SYSTEMS_REINITIALIZED: &str = "systems:reinitialized";
pub const SYSTEMS_DAMAGED: &str = "systems:damaged";

pub const LIFE_SUPPORT_UPDATED: &str = "life-support:updated";

pub const NAVIGATION_SET_COURSE: &str = "navigation:set-course";
pub const NAVIGATION_ARRIVED: &str = "navigation:arrived";
pub const TACTICAL_FIRE: &str = "tactical:fire";
pub const TACTICAL_READY: &str = "tactical:ready";
pub const TRIGGER_FIRED: &str = "trigger:fired";
pub const ENCOUNTER_IN_RANGE: &str = "encounter:in-range";
pub const TELEMETRY_SAMPLE: &str = "telemetry:sample";

/// A published event as seen by every listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: String,
    pub payload: Value,
    /// Module that emitted the event; `None` for the host and the kernel.
    pub origin: Option<ModuleId>,
    /// Kernel tick counter at emission time.
    pub tick: u64,
}

impl Event {
    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(Value::as_str)
    }
}
