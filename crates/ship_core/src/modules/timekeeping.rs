use serde::{Deserialize, Serialize};

use crate::kernel::{HookResult, Module, ModuleContext};
use crate::keys;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Shape of `state.clock`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClockState {
    pub tick: u64,
    pub elapsed_seconds: f64,
    pub ship_time: String,
    pub stardate: f64,
    /// Stardate at scenario start.
    pub epoch: f64,
    /// Ship time of day at scenario start, in seconds.
    pub start_seconds: f64,
}

impl ClockState {
    pub fn advance(&mut self, tick: u64, seconds: f64) {
        self.tick = tick;
        self.elapsed_seconds += seconds;
        self.ship_time = format_ship_time(self.start_seconds + self.elapsed_seconds);
        let stardate = self.epoch + self.elapsed_seconds / SECONDS_PER_DAY;
        self.stardate = (stardate * 10_000.0).round() / 10_000.0;
    }
}

/// Seconds into `HH:MM:SS`, wrapping at 24h.
pub fn format_ship_time(seconds: f64) -> String {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let total = seconds.max(0.0).floor() as u64 % 86_400;
    format!("{:02}:{:02}:{:02}", total / 3600, total % 3600 / 60, total % 60)
}

/// Advances the ship clock by one tick period.
#[derive(Debug, Default)]
pub struct Timekeeping;

impl Module for Timekeeping {
    fn on_start(&mut self, ctx: &mut ModuleContext<'_>) -> HookResult {
        ctx.update_state_typed(keys::CLOCK, |clock: &mut ClockState| {
            if clock.ship_time.is_empty() {
                clock.ship_time = format_ship_time(clock.start_seconds + clock.elapsed_seconds);
            }
        })?;
        Ok(())
    }

    fn on_tick(&mut self, ctx: &mut ModuleContext<'_>, tick: u64) -> HookResult {
        if ctx.is_paused() {
            return Ok(());
        }
        let rate = ctx.ticks_per_second();
        let seconds = if rate > 0.0 { 1.0 / rate } else { 1.0 };
        ctx.update_state_typed(keys::CLOCK, |clock: &mut ClockState| clock.advance(tick, seconds))?;
        Ok(())
    }
}
