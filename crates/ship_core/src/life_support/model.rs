//! Shapes stored under `state.lifeSupport`.
//!
//! The same types describe both the scenario baseline and the runtime copy
//! that drifts around it.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifeSupportState {
    #[serde(default)]
    pub cycles: Vec<Cycle>,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub leaks: Vec<Leak>,
    #[serde(default)]
    pub filters: Filters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_leak_id: Option<String>,
}

impl LifeSupportState {
    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
            && self.sections.is_empty()
            && self.leaks.is_empty()
            && self.filters.banks.is_empty()
            && self.filters.buffers().all(|(_, value)| value.is_none())
    }
}

/// Atmosphere processing loop (O₂ generation, CO₂ scrubbing, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cycle {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub metrics: Vec<Metric>,
}

impl Cycle {
    pub fn metric(&self, kind: MetricKind) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.kind() == Some(kind))
    }

    pub fn is_co2(&self) -> bool {
        let id = self.id.to_lowercase();
        id.contains("co2") || id.contains("co₂") || id.contains("scrubber")
    }

    pub fn display_name(&self) -> &str {
        if self.label.is_empty() {
            &self.id
        } else {
            &self.label
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Efficiency,
    Saturation,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub id: String,
    #[serde(default)]
    pub label: String,
    pub value: f64,
    #[serde(default)]
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl Metric {
    pub fn kind(&self) -> Option<MetricKind> {
        let id = self.id.to_lowercase();
        if id.contains("efficiency") {
            Some(MetricKind::Efficiency)
        } else if id.contains("saturation") {
            Some(MetricKind::Saturation)
        } else {
            None
        }
    }
}

/// Habitat section climate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub pressure: f64,
    pub temperature: f64,
    pub humidity: f64,
    #[serde(default = "stable_label")]
    pub status: String,
}

pub const SECTION_STABLE: &str = "Stabil";
pub const SECTION_ADJUSTING: &str = "Anpassung";
pub const SECTION_WARNING: &str = "Warnung";

fn stable_label() -> String {
    SECTION_STABLE.to_string()
}

impl Section {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Leak {
    pub id: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub sealed: bool,
}

impl Leak {
    pub fn display_name(&self) -> &str {
        if self.location.is_empty() {
            &self.id
        } else {
            &self.location
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filters {
    #[serde(default)]
    pub banks: Vec<FilterBank>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserve_air_minutes: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrubber_margin_minutes: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency_buffer_minutes: Option<f64>,
}

/// Top-level time buffers, each watched against its own threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Buffer {
    ReserveAir,
    ScrubberMargin,
    EmergencyBuffer,
}

impl Buffer {
    pub const ALL: [Buffer; 3] = [Self::ReserveAir, Self::ScrubberMargin, Self::EmergencyBuffer];

    pub fn label(self) -> &'static str {
        match self {
            Self::ReserveAir => "Luftreserve",
            Self::ScrubberMargin => "Wäscherreserve",
            Self::EmergencyBuffer => "Notfallpuffer",
        }
    }
}

impl Filters {
    pub fn buffer(&self, buffer: Buffer) -> Option<f64> {
        match buffer {
            Buffer::ReserveAir => self.reserve_air_minutes,
            Buffer::ScrubberMargin => self.scrubber_margin_minutes,
            Buffer::EmergencyBuffer => self.emergency_buffer_minutes,
        }
    }

    pub fn buffer_mut(&mut self, buffer: Buffer) -> &mut Option<f64> {
        match buffer {
            Buffer::ReserveAir => &mut self.reserve_air_minutes,
            Buffer::ScrubberMargin => &mut self.scrubber_margin_minutes,
            Buffer::EmergencyBuffer => &mut self.emergency_buffer_minutes,
        }
    }

    pub fn buffers(&self) -> impl Iterator<Item = (Buffer, Option<f64>)> + '_ {
        Buffer::ALL.into_iter().map(|b| (b, self.buffer(b)))
    }
}

pub const FILTER_ACTIVE: &str = "Aktiv";
pub const FILTER_MONITORING: &str = "Überwachung";
pub const FILTER_REGENERATING: &str = "Regeneration";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterBank {
    pub id: String,
    #[serde(default)]
    pub label: String,
    pub saturation: f64,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_minutes: Option<f64>,
}

impl FilterBank {
    pub fn display_name(&self) -> &str {
        if self.label.is_empty() {
            &self.id
        } else {
            &self.label
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Nominal,
    Warning,
    Critical,
}

impl Severity {
    /// Display label used for cycle status.
    pub fn label(self) -> &'static str {
        match self {
            Self::Nominal => "Nominal",
            Self::Warning => "Warnung",
            Self::Critical => "Kritisch",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
