//! Drives a booted kernel: scheduled host input, ticks and status output.

use anyhow::Result;
use serde_json::json;
use ship_core::{events, Kernel};
use ship_world::{apply_scenario, load_scenario};
use std::time::Duration;

use crate::plan::Plan;
use crate::status::format_status;

const SOURCE: &str = "cli";

pub struct Host {
    kernel: Kernel,
    plan: Plan,
    print_every: u64,
}

impl Host {
    pub fn new(kernel: Kernel, plan: Plan, print_every: u64) -> Self {
        Self {
            kernel,
            plan,
            print_every,
        }
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn into_kernel(self) -> Kernel {
        self.kernel
    }

    fn apply_due_input(&mut self) -> Result<()> {
        let tick = self.kernel.tick_count();
        for switch in self.plan.due_switches(tick) {
            let scenario = load_scenario(&switch.path)?;
            apply_scenario(&mut self.kernel, &scenario)?;
        }
        for adjustment in self.plan.due_adjustments(tick) {
            let [engines, shields, weapons, aux] = adjustment.distribution;
            tracing::debug!(tick, ?adjustment.distribution, "power adjustment");
            self.kernel.emit(
                events::UI_POWER_ADJUSTED,
                json!({
                    "source": SOURCE,
                    "distribution": {
                        "engines": engines,
                        "shields": shields,
                        "weapons": weapons,
                        "aux": aux,
                    },
                }),
                None,
            );
        }
        Ok(())
    }

    /// Applies due input, runs one tick and reports. Returns the tick number.
    pub fn step(&mut self) -> Result<u64> {
        self.apply_due_input()?;
        let tick = self.kernel.tick();
        if self.plan.balance_due(tick) {
            self.kernel
                .emit(events::POWER_REQUEST_BALANCE, json!({ "source": SOURCE }), None);
        }
        if self.print_every > 0 && tick.is_multiple_of(self.print_every) {
            println!("{}", format_status(self.kernel.state(), tick));
        }
        Ok(tick)
    }

    /// Runs `ticks` ticks back to back.
    pub fn run_fast(&mut self, ticks: u64) -> Result<()> {
        for _ in 0..ticks {
            self.step()?;
        }
        Ok(())
    }

    /// Runs `ticks` ticks paced by the kernel's tick interval.
    pub async fn run_realtime(&mut self, ticks: u64) -> Result<()> {
        let mut interval = tokio::time::interval(self.kernel.tick_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);
        // The first interval tick completes immediately.
        interval.tick().await;
        for _ in 0..ticks {
            self.step()?;
            interval.tick().await;
        }
        Ok(())
    }
}

/// Builds a current-thread runtime; the kernel is not `Send`.
pub fn block_on_realtime(host: &mut Host, ticks: u64) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    runtime.block_on(host.run_realtime(ticks))
}

/// Wall-clock length of a realtime run, for the start banner.
pub fn realtime_duration(kernel: &Kernel, ticks: u64) -> Duration {
    kernel
        .tick_interval()
        .saturating_mul(u32::try_from(ticks).unwrap_or(u32::MAX))
}
