//! One life-support tick, independent of the kernel.
//!
//! [`LifeSupportSim::step`] takes the previous runtime values and returns the
//! next ones together with the log notices raised on this tick. Status
//! history is kept on the sim so notices fire on transitions only.

use std::collections::{HashMap, HashSet};

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::drift::{drift_value, round_to, DriftSpec, Unit, DEFAULT_CORRECTION};
use super::model::{
    Buffer, Cycle, FilterBank, Filters, Leak, LifeSupportState, Metric, MetricKind, Section,
    Severity, FILTER_ACTIVE, FILTER_MONITORING, FILTER_REGENERATING, SECTION_ADJUSTING,
    SECTION_STABLE, SECTION_WARNING,
};
use crate::LogKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LifeSupportTuning {
    pub correction: f64,
    /// Multiplier on every jitter scale.
    pub jitter: f64,
    pub co2_saturation_bias: f64,
    pub regeneration_trigger: f64,
    pub regeneration_release: f64,
    pub regeneration_floor_offset: f64,
    pub regeneration_drop: f64,
    pub efficiency_critical: f64,
    pub efficiency_warning: f64,
    pub saturation_critical: f64,
    pub saturation_warning: f64,
    pub pressure_band: f64,
    pub temperature_band: f64,
    pub humidity_min: f64,
    pub humidity_max: f64,
    pub pressure_warning: f64,
    pub temperature_warning: f64,
    pub humidity_warning: f64,
    pub pressure_adjust: f64,
    pub temperature_adjust: f64,
    pub humidity_adjust: f64,
    pub leak_progress_min: f64,
    pub leak_progress_max: f64,
    pub leak_cooldown_min: u32,
    pub leak_cooldown_max: u32,
    pub leak_start_min: f64,
    pub leak_start_max: f64,
    pub filter_drift_offset: f64,
    pub buffer_bias: f64,
    pub reserve_air_threshold: f64,
    pub scrubber_margin_threshold: f64,
    pub emergency_buffer_threshold: f64,
}

impl Default for LifeSupportTuning {
    fn default() -> Self {
        Self {
            correction: DEFAULT_CORRECTION,
            jitter: 1.0,
            co2_saturation_bias: 0.3,
            regeneration_trigger: 90.0,
            regeneration_release: 72.0,
            regeneration_floor_offset: 8.0,
            regeneration_drop: 18.0,
            efficiency_critical: 96.0,
            efficiency_warning: 97.4,
            saturation_critical: 90.0,
            saturation_warning: 75.0,
            pressure_band: 1.0,
            temperature_band: 1.2,
            humidity_min: 25.0,
            humidity_max: 60.0,
            pressure_warning: 0.8,
            temperature_warning: 1.4,
            humidity_warning: 12.0,
            pressure_adjust: 0.45,
            temperature_adjust: 0.9,
            humidity_adjust: 8.0,
            leak_progress_min: 0.8,
            leak_progress_max: 2.4,
            leak_cooldown_min: 200,
            leak_cooldown_max: 360,
            leak_start_min: 8.0,
            leak_start_max: 20.0,
            filter_drift_offset: 4.0,
            buffer_bias: -0.35,
            reserve_air_threshold: 480.0,
            scrubber_margin_threshold: 120.0,
            emergency_buffer_threshold: 180.0,
        }
    }
}

impl LifeSupportTuning {
    pub fn threshold(&self, buffer: Buffer) -> f64 {
        match buffer {
            Buffer::ReserveAir => self.reserve_air_threshold,
            Buffer::ScrubberMargin => self.scrubber_margin_threshold,
            Buffer::EmergencyBuffer => self.emergency_buffer_threshold,
        }
    }

    fn spec(&self, unit: Unit, min: f64, max: f64) -> DriftSpec {
        DriftSpec::new(unit, min, max).with_correction(self.correction, self.jitter)
    }

    fn saturation_severity(&self, saturation: f64) -> Severity {
        if saturation >= self.saturation_critical {
            Severity::Critical
        } else if saturation >= self.saturation_warning {
            Severity::Warning
        } else {
            Severity::Nominal
        }
    }

    /// Worst band reached by the efficiency and saturation metrics present.
    pub fn cycle_severity(&self, cycle: &Cycle) -> Severity {
        let efficiency = cycle.metric(MetricKind::Efficiency).map(|m| m.value);
        let saturation = cycle.metric(MetricKind::Saturation).map(|m| m.value);
        let efficiency_band = match efficiency {
            Some(e) if e < self.efficiency_critical => Severity::Critical,
            Some(e) if e < self.efficiency_warning => Severity::Warning,
            _ => Severity::Nominal,
        };
        let saturation_band = saturation.map_or(Severity::Nominal, |s| self.saturation_severity(s));
        efficiency_band.max(saturation_band)
    }

    /// Scripted status wins; otherwise the largest deviation decides.
    pub fn section_status(&self, section: &Section, baseline: &Section) -> String {
        if baseline.status != SECTION_STABLE {
            return baseline.status.clone();
        }
        let dp = (section.pressure - baseline.pressure).abs();
        let dt = (section.temperature - baseline.temperature).abs();
        let dh = (section.humidity - baseline.humidity).abs();
        let label = if dp > self.pressure_warning || dt > self.temperature_warning || dh > self.humidity_warning {
            SECTION_WARNING
        } else if dp > self.pressure_adjust || dt > self.temperature_adjust || dh > self.humidity_adjust {
            SECTION_ADJUSTING
        } else {
            SECTION_STABLE
        };
        label.to_string()
    }
}

/// A log line produced by a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub kind: LogKind,
    pub message: String,
}

impl Notice {
    fn new(kind: LogKind, message: String) -> Self {
        Self { kind, message }
    }
}

fn metric_bounds(metric: &Metric, unit: Unit) -> (f64, f64) {
    let upper = if unit == Unit::Percent { 100.0 } else { f64::INFINITY };
    let min = metric.min.unwrap_or(0.0);
    let max = metric.max.unwrap_or(upper).max(min);
    (min, max)
}

fn open_active_leak(state: &LifeSupportState) -> Option<String> {
    state
        .active_leak_id
        .clone()
        .filter(|id| state.leaks.iter().any(|l| &l.id == id && !l.sealed))
}

fn regeneration_target(tuning: &LifeSupportTuning, baseline: f64, current: f64) -> f64 {
    (baseline + tuning.regeneration_floor_offset).max(current - tuning.regeneration_drop)
}

#[derive(Debug, Clone)]
pub struct LifeSupportSim {
    baseline: LifeSupportState,
    tuning: LifeSupportTuning,
    cycle_severity: HashMap<String, Severity>,
    regenerating: HashSet<String>,
    section_status: HashMap<String, String>,
    filter_severity: HashMap<String, Severity>,
    buffer_low: HashMap<Buffer, bool>,
    active_leak: Option<String>,
    leak_cooldown: u32,
}

impl LifeSupportSim {
    /// Captures `baseline` as the drift target. History starts at nominal
    /// for cycles and filters and at the baseline status for sections.
    pub fn new(baseline: LifeSupportState, tuning: LifeSupportTuning) -> Self {
        let active_leak = open_active_leak(&baseline);
        let section_status = baseline
            .sections
            .iter()
            .map(|s| (s.id.clone(), s.status.clone()))
            .collect();
        Self {
            cycle_severity: HashMap::new(),
            regenerating: HashSet::new(),
            section_status,
            filter_severity: HashMap::new(),
            buffer_low: HashMap::new(),
            active_leak,
            leak_cooldown: 0,
            baseline,
            tuning,
        }
    }

    pub fn baseline(&self) -> &LifeSupportState {
        &self.baseline
    }

    /// Swaps the drift targets while keeping status history, so a scripted
    /// baseline shift is reported like any other transition. Sections seen
    /// for the first time start at their baseline status; the active leak
    /// follows the new baseline.
    pub fn set_baseline(&mut self, baseline: LifeSupportState) {
        for section in &baseline.sections {
            self.section_status
                .entry(section.id.clone())
                .or_insert_with(|| section.status.clone());
        }
        self.active_leak = open_active_leak(&baseline);
        self.baseline = baseline;
    }

    pub fn tuning(&self) -> &LifeSupportTuning {
        &self.tuning
    }

    pub fn active_leak(&self) -> Option<&str> {
        self.active_leak.as_deref()
    }

    pub fn is_regenerating(&self, cycle_id: &str) -> bool {
        self.regenerating.contains(cycle_id)
    }

    pub fn step(&mut self, runtime: &LifeSupportState, rng: &mut impl Rng) -> (LifeSupportState, Vec<Notice>) {
        let mut next = runtime.clone();
        let mut notices = Vec::new();
        for cycle in &mut next.cycles {
            self.step_cycle(cycle, rng, &mut notices);
        }
        for section in &mut next.sections {
            self.step_section(section, rng, &mut notices);
        }
        self.step_leaks(&mut next.leaks, rng, &mut notices);
        next.active_leak_id.clone_from(&self.active_leak);
        for bank in &mut next.filters.banks {
            self.step_filter_bank(bank, rng, &mut notices);
        }
        self.step_buffers(&mut next.filters, rng, &mut notices);
        (next, notices)
    }

    fn step_cycle(&mut self, cycle: &mut Cycle, rng: &mut impl Rng, notices: &mut Vec<Notice>) {
        let tuning = &self.tuning;
        let base = self.baseline.cycles.iter().find(|c| c.id == cycle.id);
        let co2 = cycle.is_co2();
        let name = cycle.display_name().to_string();

        for metric in &mut cycle.metrics {
            let base_value = base
                .and_then(|b| b.metrics.iter().find(|m| m.id == metric.id))
                .map_or(metric.value, |m| m.value);
            let unit = Unit::parse(&metric.unit);
            let (min, max) = metric_bounds(metric, unit);
            let scrubber = co2 && metric.kind() == Some(MetricKind::Saturation);
            let bias = if scrubber { tuning.co2_saturation_bias } else { 0.0 };
            let spec = tuning.spec(unit, min, max).with_bias(bias);
            metric.value = drift_value(metric.value, base_value, &spec, rng);
            if !scrubber {
                continue;
            }

            let saturation = metric.value;
            if self.regenerating.contains(&cycle.id) {
                if saturation < tuning.regeneration_release {
                    self.regenerating.remove(&cycle.id);
                    notices.push(Notice::new(
                        LogKind::Info,
                        format!("{name}: Regeneration abgeschlossen ({saturation:.1}%)"),
                    ));
                }
            } else if saturation >= tuning.regeneration_trigger {
                let target = regeneration_target(tuning, base_value, saturation).clamp(min, max);
                metric.value = round_to(target, unit.decimals());
                self.regenerating.insert(cycle.id.clone());
                notices.push(Notice::new(
                    LogKind::Warning,
                    format!("{name}: Sättigung {saturation:.1}%, automatische Regeneration eingeleitet"),
                ));
            }
        }

        let severity = tuning.cycle_severity(cycle);
        let previous = self
            .cycle_severity
            .insert(cycle.id.clone(), severity)
            .unwrap_or_default();
        cycle.severity = severity;
        cycle.status = severity.label().to_string();
        if previous == severity {
            return;
        }
        let notice = match severity {
            Severity::Warning => Notice::new(LogKind::Warning, format!("{name}: Werte im Warnbereich")),
            Severity::Critical => Notice::new(LogKind::Critical, format!("{name}: kritischer Zustand")),
            Severity::Nominal => Notice::new(LogKind::Info, format!("{name}: wieder im Normalbereich")),
        };
        notices.push(notice);
    }

    fn step_section(&mut self, section: &mut Section, rng: &mut impl Rng, notices: &mut Vec<Notice>) {
        let tuning = &self.tuning;
        let base = self
            .baseline
            .sections
            .iter()
            .find(|s| s.id == section.id)
            .cloned()
            .unwrap_or_else(|| section.clone());

        let spec = tuning.spec(
            Unit::KiloPascal,
            base.pressure - tuning.pressure_band,
            base.pressure + tuning.pressure_band,
        );
        section.pressure = drift_value(section.pressure, base.pressure, &spec, rng);
        let spec = tuning.spec(
            Unit::Celsius,
            base.temperature - tuning.temperature_band,
            base.temperature + tuning.temperature_band,
        );
        section.temperature = drift_value(section.temperature, base.temperature, &spec, rng);
        let spec = tuning.spec(Unit::Percent, tuning.humidity_min, tuning.humidity_max);
        section.humidity = drift_value(section.humidity, base.humidity, &spec, rng);

        let status = tuning.section_status(section, &base);
        let previous = self
            .section_status
            .insert(section.id.clone(), status.clone())
            .unwrap_or_else(|| SECTION_STABLE.to_string());
        section.status.clone_from(&status);
        if previous == status {
            return;
        }

        let name = section.display_name();
        let notice = if status == SECTION_WARNING {
            Notice::new(LogKind::Warning, format!("Sektion {name}: Klimawerte außerhalb der Toleranz"))
        } else if status == SECTION_STABLE {
            Notice::new(LogKind::Info, format!("Sektion {name}: Klima wieder stabil"))
        } else if previous == SECTION_WARNING {
            Notice::new(LogKind::Info, format!("Sektion {name}: Klimawerte erholen sich"))
        } else if status == SECTION_ADJUSTING {
            return;
        } else {
            Notice::new(LogKind::Info, format!("Sektion {name}: {status}"))
        };
        notices.push(notice);
    }

    fn step_leaks(&mut self, leaks: &mut [Leak], rng: &mut impl Rng, notices: &mut Vec<Notice>) {
        let tuning = &self.tuning;
        let active = self
            .active_leak
            .as_ref()
            .and_then(|id| leaks.iter().position(|l| &l.id == id && !l.sealed));

        if let Some(index) = active {
            let leak = &mut leaks[index];
            let advance = uniform(rng, tuning.leak_progress_min, tuning.leak_progress_max);
            leak.progress = round_to((leak.progress + advance).min(100.0), 1);
            if leak.progress >= 100.0 {
                leak.progress = 100.0;
                leak.sealed = true;
                notices.push(Notice::new(
                    LogKind::Info,
                    format!("Leck abgedichtet: {}", leak.display_name()),
                ));
                self.active_leak = None;
                let (lo, hi) = ordered(tuning.leak_cooldown_min, tuning.leak_cooldown_max);
                self.leak_cooldown = rng.gen_range(lo..=hi);
            }
            return;
        }

        self.active_leak = None;
        if self.leak_cooldown > 0 {
            self.leak_cooldown -= 1;
            return;
        }
        if let Some(leak) = leaks.iter_mut().find(|l| !l.sealed) {
            leak.progress = round_to(uniform(rng, tuning.leak_start_min, tuning.leak_start_max), 1);
            notices.push(Notice::new(
                LogKind::Warning,
                format!("Leck entdeckt: {}", leak.display_name()),
            ));
            self.active_leak = Some(leak.id.clone());
        }
    }

    fn step_filter_bank(&mut self, bank: &mut FilterBank, rng: &mut impl Rng, notices: &mut Vec<Notice>) {
        let tuning = &self.tuning;
        let base = self.baseline.filters.banks.iter().find(|b| b.id == bank.id);
        let base_saturation = base.map_or(bank.saturation, |b| b.saturation);
        let base_status = base
            .map(|b| b.status.clone())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| FILTER_ACTIVE.to_string());

        let target = (base_saturation + tuning.filter_drift_offset).min(100.0);
        let spec = tuning.spec(Unit::Percent, 0.0, 100.0);
        bank.saturation = drift_value(bank.saturation, target, &spec, rng);

        if let Some(minutes) = bank.buffer_minutes {
            let base_minutes = base.and_then(|b| b.buffer_minutes).unwrap_or(minutes);
            let spec = tuning
                .spec(Unit::Minutes, 0.0, wide_upper_bound(base_minutes))
                .with_bias(tuning.buffer_bias);
            bank.buffer_minutes = Some(drift_value(minutes, base_minutes, &spec, rng));
        }

        let saturation = bank.saturation;
        let severity = tuning.saturation_severity(saturation);
        let previous = self
            .filter_severity
            .insert(bank.id.clone(), severity)
            .unwrap_or_default();
        bank.status = match severity {
            Severity::Critical => FILTER_REGENERATING.to_string(),
            Severity::Warning => FILTER_MONITORING.to_string(),
            Severity::Nominal => base_status,
        };
        if previous == severity {
            return;
        }

        let name = bank.display_name().to_string();
        let notice = match severity {
            Severity::Critical => {
                let knocked = regeneration_target(tuning, base_saturation, saturation).clamp(0.0, 100.0);
                bank.saturation = round_to(knocked, 1);
                Notice::new(
                    LogKind::Critical,
                    format!("Filter {name}: Sättigung {saturation:.1}%, Regeneration gestartet"),
                )
            }
            Severity::Warning => Notice::new(
                LogKind::Warning,
                format!("Filter {name}: Sättigung erhöht ({saturation:.1}%)"),
            ),
            Severity::Nominal => Notice::new(LogKind::Info, format!("Filter {name}: wieder im Normalbetrieb")),
        };
        notices.push(notice);
    }

    fn step_buffers(&mut self, filters: &mut Filters, rng: &mut impl Rng, notices: &mut Vec<Notice>) {
        let tuning = &self.tuning;
        for buffer in Buffer::ALL {
            let Some(current) = filters.buffer(buffer) else {
                continue;
            };
            let base = self.baseline.filters.buffer(buffer).unwrap_or(current);
            let spec = tuning
                .spec(Unit::Minutes, 0.0, wide_upper_bound(base))
                .with_bias(tuning.buffer_bias);
            let value = drift_value(current, base, &spec, rng);
            *filters.buffer_mut(buffer) = Some(value);

            let threshold = tuning.threshold(buffer);
            let low = value <= threshold;
            let was_low = self.buffer_low.insert(buffer, low).unwrap_or(false);
            let label = buffer.label();
            if low && !was_low {
                notices.push(Notice::new(
                    LogKind::Warning,
                    format!("{label} unter {threshold:.0} min ({value:.0} min verbleibend)"),
                ));
            } else if !low && was_low {
                notices.push(Notice::new(
                    LogKind::Info,
                    format!("{label} wieder über {threshold:.0} min ({value:.0} min)"),
                ));
            }
        }
    }
}

fn ordered<T: PartialOrd>(a: T, b: T) -> (T, T) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn uniform(rng: &mut impl Rng, a: f64, b: f64) -> f64 {
    let (lo, hi) = ordered(a, b);
    rng.gen_range(lo..=hi)
}

fn wide_upper_bound(baseline: f64) -> f64 {
    (baseline * 3.0).max(baseline + 120.0)
}

/// Human-readable sensor lines for the life-support system card.
pub fn sensor_feed(state: &LifeSupportState) -> Vec<String> {
    let mut feed = Vec::new();
    let efficiency = state
        .cycles
        .iter()
        .find(|c| !c.is_co2() && c.metric(MetricKind::Efficiency).is_some())
        .or_else(|| state.cycles.iter().find(|c| c.metric(MetricKind::Efficiency).is_some()))
        .and_then(|c| c.metric(MetricKind::Efficiency));
    if let Some(metric) = efficiency {
        feed.push(format!("O₂-Effizienz {:.1}%", metric.value));
    }
    let saturation = state
        .cycles
        .iter()
        .filter(|c| c.is_co2())
        .find_map(|c| c.metric(MetricKind::Saturation));
    if let Some(metric) = saturation {
        feed.push(format!("CO₂-Sättigung {:.1}%", metric.value));
    }
    if !state.sections.is_empty() {
        let stable = state
            .sections
            .iter()
            .filter(|s| s.status == SECTION_STABLE)
            .count();
        feed.push(format!("{stable}/{} Sektionen stabil", state.sections.len()));
    }
    let max_filter = state
        .filters
        .banks
        .iter()
        .map(|b| b.saturation)
        .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))));
    if let Some(saturation) = max_filter {
        feed.push(format!("Filter max. {saturation:.1}%"));
    }
    if let Some(minutes) = state.filters.reserve_air_minutes {
        feed.push(format!("Luftreserve {}", format_minutes(minutes)));
    }
    feed
}

/// `605.0` -> `"10h 05min"`.
pub fn format_minutes(minutes: f64) -> String {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let total = minutes.max(0.0).round() as u64;
    format!("{}h {:02}min", total / 60, total % 60)
}
