use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::events::{self, Event};
use crate::kernel::{HookResult, Module, ModuleContext};
use crate::{keys, value_as_f64, LogKind};

/// Shape of `state.navigation`. Distances are in the scenario's unit,
/// speed in that unit per second.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NavigationState {
    pub destination: Option<String>,
    pub distance: f64,
    pub total_distance: f64,
    pub speed: f64,
    pub eta_seconds: Option<f64>,
    pub progress: f64,
    pub arrived: bool,
}

impl NavigationState {
    pub fn set_course(&mut self, destination: String, distance: f64, speed: Option<f64>) {
        self.destination = Some(destination);
        self.distance = distance.max(0.0);
        self.total_distance = self.distance;
        if let Some(speed) = speed {
            self.speed = speed.max(0.0);
        }
        self.progress = 0.0;
        self.arrived = false;
        self.eta_seconds = self.eta();
    }

    fn eta(&self) -> Option<f64> {
        (self.speed > 0.0).then(|| self.distance / self.speed)
    }

    /// Moves along the course; returns `true` on the step that arrives.
    pub fn advance(&mut self, seconds: f64) -> bool {
        if self.destination.is_none() || self.arrived {
            return false;
        }
        self.distance = (self.distance - self.speed * seconds).max(0.0);
        self.progress = if self.total_distance > 0.0 {
            ((1.0 - self.distance / self.total_distance) * 100.0).clamp(0.0, 100.0)
        } else {
            100.0
        };
        self.eta_seconds = self.eta();
        if self.distance <= 0.0 {
            self.arrived = true;
            self.eta_seconds = Some(0.0);
            return true;
        }
        false
    }
}

#[derive(Debug, Default)]
pub struct Navigation;

impl Module for Navigation {
    fn on_start(&mut self, ctx: &mut ModuleContext<'_>) -> HookResult {
        ctx.on(events::NAVIGATION_SET_COURSE);
        Ok(())
    }

    fn on_tick(&mut self, ctx: &mut ModuleContext<'_>, _tick: u64) -> HookResult {
        if ctx.is_paused() {
            return Ok(());
        }
        let Some(mut nav) = ctx.state_as::<NavigationState>(keys::NAVIGATION)? else {
            return Ok(());
        };
        if nav.destination.is_none() || nav.arrived {
            return Ok(());
        }
        let rate = ctx.ticks_per_second();
        let arrived = nav.advance(if rate > 0.0 { 1.0 / rate } else { 1.0 });
        ctx.set_state_typed(keys::NAVIGATION, &nav)?;
        if arrived {
            let destination = nav.destination.unwrap_or_default();
            ctx.log(LogKind::Info, format!("Ziel erreicht: {destination}"));
            ctx.emit(events::NAVIGATION_ARRIVED, json!({ "destination": destination }));
        }
        Ok(())
    }

    fn on_event(&mut self, ctx: &mut ModuleContext<'_>, event: &Event) -> HookResult {
        if !event.is(events::NAVIGATION_SET_COURSE) {
            return Ok(());
        }
        let Some(destination) = event.str_field("destination").map(str::to_string) else {
            ctx.log(LogKind::Warning, "Kursbefehl ohne Ziel ignoriert");
            return Ok(());
        };
        let distance = event.field("distance").and_then(value_as_f64).unwrap_or(0.0);
        let speed = event.field("speed").and_then(value_as_f64);
        ctx.log(LogKind::Info, format!("Kurs gesetzt: {destination}"));
        ctx.update_state_typed(keys::NAVIGATION, |nav: &mut NavigationState| {
            nav.set_course(destination, distance, speed);
        })?;
        Ok(())
    }
}
