//! Type definitions for `ship_core`.
//!
//! Shared state tree, system entities, log records and module bookkeeping
//! types used by the kernel and every engine.

use std::borrow::Borrow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// State tree
// ---------------------------------------------------------------------------

/// The single shared state object owned by the kernel.
pub type StateTree = Map<String, Value>;

/// Well-known top-level keys of the state tree.
pub mod keys {
    pub const SYSTEMS: &str = "systems";
    pub const POWER: &str = "power";
    pub const LIFE_SUPPORT: &str = "lifeSupport";
    pub const TACTICAL: &str = "tactical";
    pub const NAVIGATION: &str = "navigation";
    pub const ENCOUNTER: &str = "encounter";
    pub const CLOCK: &str = "clock";
    pub const TELEMETRY: &str = "telemetry";
    pub const TRIGGERS: &str = "triggers";
    pub const ALERT: &str = "alert";
    pub const SIMULATION_PAUSED: &str = "simulationPaused";
    pub const LOGS: &str = "logs";
}

// ---------------------------------------------------------------------------
// ID newtypes
// ---------------------------------------------------------------------------

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(ModuleId);
string_id!(SystemId);

// ---------------------------------------------------------------------------
// Systems
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemStatus {
    #[default]
    Online,
    Idle,
    Warning,
    Offline,
    Critical,
}

impl SystemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Idle => "idle",
            Self::Warning => "warning",
            Self::Offline => "offline",
            Self::Critical => "critical",
        }
    }

    /// Case-insensitive; `None` for unknown labels.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "online" => Some(Self::Online),
            "idle" => Some(Self::Idle),
            "warning" => Some(Self::Warning),
            "offline" => Some(Self::Offline),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clamp a percentage reading into `[0, 100]`. NaN collapses to zero.
pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// One ship system card: the unit the power engine and damage events act on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemEntity {
    pub id: SystemId,
    pub name: String,
    #[serde(default)]
    pub status: SystemStatus,
    #[serde(default)]
    pub power: f64,
    #[serde(default = "full_percent")]
    pub integrity: f64,
    #[serde(default)]
    pub load: f64,
    #[serde(default)]
    pub details: SystemDetails,
}

fn full_percent() -> f64 {
    100.0
}

impl SystemEntity {
    pub fn new(id: &str, name: &str, status: SystemStatus, power: f64) -> Self {
        Self {
            id: SystemId::from(id),
            name: name.to_string(),
            status,
            power: clamp_percent(power),
            integrity: 100.0,
            load: 0.0,
            details: SystemDetails::default(),
        }
    }

    pub fn set_power(&mut self, value: f64) {
        self.power = clamp_percent(value);
    }

    pub fn set_integrity(&mut self, value: f64) {
        self.integrity = clamp_percent(value);
    }

    pub fn set_load(&mut self, value: f64) {
        self.load = clamp_percent(value);
    }

    /// Display name, falling back to the id for unnamed systems.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            self.id.as_str()
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemDetails {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sensors: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Info,
    Warning,
    Critical,
    Error,
    System,
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Error => "error",
            Self::System => "system",
        };
        f.write_str(label)
    }
}

/// One entry of the bridge log panel, stored under `state.logs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub tick: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<ModuleId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

// ---------------------------------------------------------------------------
// Module bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    Registered,
    Running,
    Stopped,
    Error,
}

/// Lifecycle hook in which a module failure was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookPhase {
    Init,
    Start,
    Tick,
    Stop,
    Event,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Init => "init",
            Self::Start => "start",
            Self::Tick => "tick",
            Self::Stop => "stop",
            Self::Event => "event",
        };
        f.write_str(label)
    }
}

/// Last error recorded for a module, handed to the host's error sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleErrorState {
    pub module_id: ModuleId,
    pub phase: HookPhase,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Loose numeric parsing
// ---------------------------------------------------------------------------

/// Reads a number that may arrive as a JSON number or a numeric string.
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_entity_setters_clamp() {
        let mut system = SystemEntity::new("engines", "Antrieb", SystemStatus::Online, 140.0);
        assert!((system.power - 100.0).abs() < f64::EPSILON);
        system.set_integrity(-5.0);
        assert!(system.integrity.abs() < f64::EPSILON);
        system.set_load(f64::NAN);
        assert!(system.load.abs() < f64::EPSILON);
    }

    #[test]
    fn status_parse_ignores_case() {
        assert_eq!(SystemStatus::parse(" Critical "), Some(SystemStatus::Critical));
        assert_eq!(SystemStatus::parse("ONLINE"), Some(SystemStatus::Online));
        assert_eq!(SystemStatus::parse("kaputt"), None);
    }

    #[test]
    fn system_entity_deserializes_with_defaults() {
        let json = serde_json::json!({"id": "sensors", "name": "Sensoren"});
        let system: SystemEntity = serde_json::from_value(json).unwrap();
        assert_eq!(system.status, SystemStatus::Online);
        assert!((system.integrity - 100.0).abs() < f64::EPSILON);
        assert!(system.details.sensors.is_empty());
    }

    #[test]
    fn details_keep_unknown_fields() {
        let json = serde_json::json!({
            "id": "sensors",
            "name": "Sensoren",
            "details": {"sensors": ["a"], "range": 12}
        });
        let system: SystemEntity = serde_json::from_value(json).unwrap();
        assert_eq!(system.details.extra["range"], 12);
        let back = serde_json::to_value(&system).unwrap();
        assert_eq!(back["details"]["range"], 12);
        assert_eq!(back["details"]["sensors"][0], "a");
    }

    #[test]
    fn log_entry_serializes_kind_as_type() {
        let entry = LogEntry {
            id: "log_000001".to_string(),
            kind: LogKind::Error,
            message: "boom".to_string(),
            timestamp: Utc::now(),
            tick: 3,
            module: Some(ModuleId::from("power")),
            meta: None,
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["module"], "power");
        assert!(value.get("meta").is_none());
    }

    #[test]
    fn loose_numbers_accept_strings() {
        assert_eq!(value_as_f64(&serde_json::json!("42.5")), Some(42.5));
        assert_eq!(value_as_f64(&serde_json::json!(7)), Some(7.0));
        assert_eq!(value_as_f64(&serde_json::json!("n/a")), None);
        assert_eq!(value_as_f64(&serde_json::json!(null)), None);
    }
}
