use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::events;
use crate::kernel::{HookResult, Module, ModuleContext};
use crate::{keys, LogKind};

pub const ALERT_RED: &str = "red";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub distance: f64,
    /// Distance closed per tick.
    #[serde(default)]
    pub closing_speed: f64,
    #[serde(default)]
    pub hostile: bool,
    #[serde(default)]
    pub in_range: bool,
}

impl Contact {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Shape of `state.encounter`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EncounterState {
    pub contacts: Vec<Contact>,
    pub weapons_range: f64,
}

impl EncounterState {
    /// Closes in hostile contacts; returns the indices that entered weapons
    /// range on this step.
    pub fn advance(&mut self) -> Vec<usize> {
        let range = self.weapons_range;
        let mut entered = Vec::new();
        for (index, contact) in self.contacts.iter_mut().enumerate() {
            if !contact.hostile {
                continue;
            }
            contact.distance = (contact.distance - contact.closing_speed).max(0.0);
            if !contact.in_range && contact.distance <= range {
                contact.in_range = true;
                entered.push(index);
            }
        }
        entered
    }
}

/// Hostile contacts approach and raise the alert when in range.
#[derive(Debug, Default)]
pub struct Encounter;

impl Module for Encounter {
    fn on_tick(&mut self, ctx: &mut ModuleContext<'_>, _tick: u64) -> HookResult {
        if ctx.is_paused() {
            return Ok(());
        }
        let Some(mut encounter) = ctx.state_as::<EncounterState>(keys::ENCOUNTER)? else {
            return Ok(());
        };
        if !encounter.contacts.iter().any(|c| c.hostile) {
            return Ok(());
        }
        let entered = encounter.advance();
        ctx.set_state_typed(keys::ENCOUNTER, &encounter)?;
        if entered.is_empty() {
            return Ok(());
        }

        let alert = ctx.get_state(keys::ALERT).and_then(|v| v.as_str().map(str::to_string));
        if alert.as_deref() != Some(ALERT_RED) {
            ctx.set_state(keys::ALERT, json!(ALERT_RED));
        }
        for index in entered {
            let contact = &encounter.contacts[index];
            ctx.log(
                LogKind::Critical,
                format!("Feindkontakt {} in Waffenreichweite", contact.display_name()),
            );
            ctx.emit(
                events::ENCOUNTER_IN_RANGE,
                json!({ "contactId": contact.id, "distance": contact.distance }),
            );
        }
        Ok(())
    }
}
