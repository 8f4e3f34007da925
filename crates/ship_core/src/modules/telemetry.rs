use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events;
use crate::kernel::{HookResult, Module, ModuleContext};
use crate::power::PowerState;
use crate::{keys, StateTree, SystemEntity};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySample {
    pub tick: u64,
    pub avg_power: f64,
    pub avg_integrity: f64,
    pub alert: String,
    pub brownouts: usize,
}

/// Shape of `state.telemetry`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TelemetryState {
    /// Sample every `interval` ticks.
    pub interval: u64,
    pub capacity: usize,
    pub samples: VecDeque<TelemetrySample>,
}

impl Default for TelemetryState {
    fn default() -> Self {
        Self {
            interval: 5,
            capacity: 60,
            samples: VecDeque::new(),
        }
    }
}

impl TelemetryState {
    /// Appends a sample, dropping the oldest beyond `capacity`.
    pub fn push(&mut self, sample: TelemetrySample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity.max(1) {
            self.samples.pop_front();
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn take_sample(state: &StateTree, tick: u64) -> TelemetrySample {
    let systems: Vec<SystemEntity> = state
        .get(keys::SYSTEMS)
        .and_then(|v| Vec::<SystemEntity>::deserialize(v).ok())
        .unwrap_or_default();
    let count = systems.len().max(1) as f64;
    let brownouts = state
        .get(keys::POWER)
        .and_then(|v| PowerState::deserialize(v).ok())
        .map_or(0, |p| p.brownouts.len());
    TelemetrySample {
        tick,
        avg_power: round1(systems.iter().map(|s| s.power).sum::<f64>() / count),
        avg_integrity: round1(systems.iter().map(|s| s.integrity).sum::<f64>() / count),
        alert: state
            .get(keys::ALERT)
            .and_then(Value::as_str)
            .unwrap_or("green")
            .to_string(),
        brownouts,
    }
}

#[derive(Debug, Default)]
pub struct Telemetry;

impl Module for Telemetry {
    fn on_tick(&mut self, ctx: &mut ModuleContext<'_>, tick: u64) -> HookResult {
        let mut telemetry: TelemetryState = ctx.state_as(keys::TELEMETRY)?.unwrap_or_default();
        if telemetry.interval == 0 || tick % telemetry.interval != 0 {
            return Ok(());
        }
        let sample = take_sample(ctx.state(), tick);
        let payload = serde_json::to_value(&sample)?;
        telemetry.push(sample);
        ctx.set_state_typed(keys::TELEMETRY, &telemetry)?;
        ctx.emit(events::TELEMETRY_SAMPLE, payload);
        Ok(())
    }
}
