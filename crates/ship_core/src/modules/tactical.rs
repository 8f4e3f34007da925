use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::events::{self, Event};
use crate::kernel::{HookResult, Module, ModuleContext};
use crate::{keys, LogKind};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Weapon {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Ticks between shots.
    #[serde(default)]
    pub cooldown_ticks: u32,
    #[serde(default)]
    pub remaining: u32,
    #[serde(default = "ready_default")]
    pub ready: bool,
}

fn ready_default() -> bool {
    true
}

impl Weapon {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Counts the cooldown down; `true` on the tick the weapon becomes ready.
    pub fn cool_down(&mut self) -> bool {
        if self.ready {
            return false;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.ready = true;
            return true;
        }
        false
    }

    /// Starts the cooldown. Returns `false` if the weapon was not ready.
    pub fn fire(&mut self) -> bool {
        if !self.ready {
            return false;
        }
        self.remaining = self.cooldown_ticks;
        self.ready = self.cooldown_ticks == 0;
        true
    }
}

/// Shape of `state.tactical`; panel data other than weapons is kept as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TacticalState {
    #[serde(default)]
    pub weapons: Vec<Weapon>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Default)]
pub struct Tactical;

impl Module for Tactical {
    fn on_start(&mut self, ctx: &mut ModuleContext<'_>) -> HookResult {
        ctx.on(events::TACTICAL_FIRE);
        Ok(())
    }

    fn on_tick(&mut self, ctx: &mut ModuleContext<'_>, _tick: u64) -> HookResult {
        if ctx.is_paused() {
            return Ok(());
        }
        let Some(mut tactical) = ctx.state_as::<TacticalState>(keys::TACTICAL)? else {
            return Ok(());
        };
        if tactical.weapons.iter().all(|w| w.ready) {
            return Ok(());
        }
        let ready: Vec<(String, String)> = tactical
            .weapons
            .iter_mut()
            .filter_map(|w| w.cool_down().then(|| (w.id.clone(), w.display_name().to_string())))
            .collect();
        ctx.set_state_typed(keys::TACTICAL, &tactical)?;
        for (id, name) in ready {
            ctx.log(LogKind::Info, format!("{name} feuerbereit"));
            ctx.emit(events::TACTICAL_READY, json!({ "weaponId": id }));
        }
        Ok(())
    }

    fn on_event(&mut self, ctx: &mut ModuleContext<'_>, event: &Event) -> HookResult {
        if !event.is(events::TACTICAL_FIRE) {
            return Ok(());
        }
        let weapon_id = event.str_field("weaponId").unwrap_or_default();
        let mut tactical: TacticalState = ctx.state_as(keys::TACTICAL)?.unwrap_or_default();
        let Some(weapon) = tactical.weapons.iter_mut().find(|w| w.id == weapon_id) else {
            ctx.log(LogKind::Warning, format!("Unbekannte Waffe: {weapon_id}"));
            return Ok(());
        };
        let name = weapon.display_name().to_string();
        if !weapon.fire() {
            let remaining = weapon.remaining;
            ctx.log(LogKind::Warning, format!("{name} nicht bereit ({remaining} Ticks)"));
            return Ok(());
        }
        ctx.set_state_typed(keys::TACTICAL, &tactical)?;
        ctx.log(LogKind::Info, format!("{name} feuert"));
        Ok(())
    }
}
