//! Life support simulation.
//!
//! Cycles, sections, leaks and filter banks drift toward the scenario
//! baseline on every tick. Status changes surface as log entries and as the
//! sensor lines on the `life-support` system card.

mod drift;
mod model;
mod sim;

pub use drift::{drift_value, round_to, DriftSpec, Unit, DEFAULT_CORRECTION};
pub use model::{
    Buffer, Cycle, FilterBank, Filters, Leak, LifeSupportState, Metric, MetricKind, Section,
    Severity, FILTER_ACTIVE, FILTER_MONITORING, FILTER_REGENERATING, SECTION_ADJUSTING,
    SECTION_STABLE, SECTION_WARNING,
};
pub use sim::{format_minutes, sensor_feed, LifeSupportSim, LifeSupportTuning, Notice};

use serde_json::json;

use crate::events::{self, Event};
use crate::kernel::{HookResult, Module, ModuleContext};
use crate::{keys, SystemEntity};

/// System card that receives the derived sensor feed.
pub const LIFE_SUPPORT_SYSTEM: &str = "life-support";

#[derive(Debug, Default)]
pub struct LifeSupportModule {
    tuning: LifeSupportTuning,
    sim: Option<LifeSupportSim>,
}

impl LifeSupportModule {
    pub fn new(tuning: LifeSupportTuning) -> Self {
        Self { tuning, sim: None }
    }

    pub fn sim(&self) -> Option<&LifeSupportSim> {
        self.sim.as_ref()
    }

    fn capture_baseline(&mut self, ctx: &ModuleContext<'_>) -> anyhow::Result<()> {
        let baseline: LifeSupportState = ctx.state_as(keys::LIFE_SUPPORT)?.unwrap_or_default();
        self.sim = Some(LifeSupportSim::new(baseline, self.tuning.clone()));
        Ok(())
    }

    fn publish(ctx: &mut ModuleContext<'_>, state: &LifeSupportState, reason: &str) -> anyhow::Result<()> {
        ctx.set_state_typed(keys::LIFE_SUPPORT, state)?;
        update_sensor_feed(ctx, state)?;
        ctx.emit(
            events::LIFE_SUPPORT_UPDATED,
            json!({ "lifeSupport": state, "reason": reason }),
        );
        Ok(())
    }
}

/// Writes the feed into the system card only when a line actually changed.
fn update_sensor_feed(ctx: &mut ModuleContext<'_>, state: &LifeSupportState) -> anyhow::Result<bool> {
    let feed = sensor_feed(state);
    let mut systems: Vec<SystemEntity> = ctx.state_as(keys::SYSTEMS)?.unwrap_or_default();
    let Some(system) = systems.iter_mut().find(|s| s.id.as_str() == LIFE_SUPPORT_SYSTEM) else {
        return Ok(false);
    };
    if system.details.sensors == feed {
        return Ok(false);
    }
    system.details.sensors = feed;
    ctx.set_state_typed(keys::SYSTEMS, &systems)?;
    Ok(true)
}

impl Module for LifeSupportModule {
    fn on_start(&mut self, ctx: &mut ModuleContext<'_>) -> HookResult {
        ctx.on(events::SYSTEMS_REINITIALIZED);
        if self.sim.is_none() {
            self.capture_baseline(ctx)?;
        }
        Ok(())
    }

    fn on_tick(&mut self, ctx: &mut ModuleContext<'_>, _tick: u64) -> HookResult {
        if ctx.is_paused() {
            return Ok(());
        }
        if self.sim.is_none() {
            self.capture_baseline(ctx)?;
        }
        let Some(sim) = self.sim.as_mut() else {
            return Ok(());
        };
        let runtime: LifeSupportState = ctx.state_as(keys::LIFE_SUPPORT)?.unwrap_or_default();
        if runtime.is_empty() {
            return Ok(());
        }
        let (next, notices) = sim.step(&runtime, ctx.rng());
        for notice in notices {
            ctx.log(notice.kind, notice.message);
        }
        Self::publish(ctx, &next, "tick")
    }

    fn on_event(&mut self, ctx: &mut ModuleContext<'_>, event: &Event) -> HookResult {
        if event.is(events::SYSTEMS_REINITIALIZED) {
            let baseline: LifeSupportState = ctx.state_as(keys::LIFE_SUPPORT)?.unwrap_or_default();
            match self.sim.as_mut() {
                Some(sim) => sim.set_baseline(baseline.clone()),
                None => self.sim = Some(LifeSupportSim::new(baseline.clone(), self.tuning.clone())),
            }
            Self::publish(ctx, &baseline, "reinitialized")?;
        }
        Ok(())
    }
}
