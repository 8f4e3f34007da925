//! Scenario triggers: one-shot condition/action pairs evaluated every tick.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::events::{self, Event};
use crate::kernel::{HookResult, Module, ModuleContext};
use crate::{keys, LogKind, StateTree, SystemEntity, SystemId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TriggerCondition {
    AtTick { tick: u64 },
    SystemIntegrityBelow { system: SystemId, value: f64 },
    AlertIs { level: String },
}

fn info_level() -> LogKind {
    LogKind::Info
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TriggerAction {
    Log {
        message: String,
        #[serde(default = "info_level")]
        level: LogKind,
    },
    SetAlert {
        level: String,
    },
    Emit {
        event: String,
        #[serde(default)]
        payload: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDef {
    pub id: String,
    pub condition: TriggerCondition,
    #[serde(default)]
    pub actions: Vec<TriggerAction>,
}

/// Shape of `state.triggers`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TriggersState {
    pub definitions: Vec<TriggerDef>,
    pub fired: Vec<String>,
}

impl TriggerCondition {
    pub fn is_met(&self, state: &StateTree, tick: u64) -> bool {
        match self {
            Self::AtTick { tick: at } => tick >= *at,
            Self::SystemIntegrityBelow { system, value } => state
                .get(keys::SYSTEMS)
                .and_then(|v| Vec::<SystemEntity>::deserialize(v).ok())
                .and_then(|systems| systems.into_iter().find(|s| &s.id == system))
                .is_some_and(|s| s.integrity < *value),
            Self::AlertIs { level } => state
                .get(keys::ALERT)
                .and_then(Value::as_str)
                .is_some_and(|alert| alert.eq_ignore_ascii_case(level)),
        }
    }
}

#[derive(Debug, Default)]
pub struct Triggers {
    fired: BTreeSet<String>,
}

impl Triggers {
    fn run_actions(ctx: &mut ModuleContext<'_>, trigger: &TriggerDef) {
        for action in &trigger.actions {
            match action {
                TriggerAction::Log { message, level } => {
                    ctx.log(*level, message.clone());
                }
                TriggerAction::SetAlert { level } => {
                    ctx.set_state(keys::ALERT, json!(level));
                }
                TriggerAction::Emit { event, payload } => {
                    ctx.emit(event, payload.clone());
                }
            }
        }
    }
}

impl Module for Triggers {
    fn on_start(&mut self, ctx: &mut ModuleContext<'_>) -> HookResult {
        ctx.on(events::SYSTEMS_REINITIALIZED);
        let state: TriggersState = ctx.state_as(keys::TRIGGERS)?.unwrap_or_default();
        self.fired.extend(state.fired);
        Ok(())
    }

    /// A new scenario brings its own definitions; fired ids start over.
    fn on_event(&mut self, ctx: &mut ModuleContext<'_>, event: &Event) -> HookResult {
        if event.is(events::SYSTEMS_REINITIALIZED) {
            let state: TriggersState = ctx.state_as(keys::TRIGGERS)?.unwrap_or_default();
            self.fired = state.fired.into_iter().collect();
        }
        Ok(())
    }

    fn on_tick(&mut self, ctx: &mut ModuleContext<'_>, tick: u64) -> HookResult {
        if ctx.is_paused() {
            return Ok(());
        }
        let Some(mut state) = ctx.state_as::<TriggersState>(keys::TRIGGERS)? else {
            return Ok(());
        };
        let due: Vec<TriggerDef> = state
            .definitions
            .iter()
            .filter(|t| !self.fired.contains(&t.id))
            .filter(|t| t.condition.is_met(ctx.state(), tick))
            .cloned()
            .collect();
        if due.is_empty() {
            return Ok(());
        }
        for trigger in &due {
            self.fired.insert(trigger.id.clone());
            Self::run_actions(ctx, trigger);
            ctx.emit(events::TRIGGER_FIRED, json!({ "triggerId": trigger.id }));
        }
        state.fired = self.fired.iter().cloned().collect();
        ctx.set_state_typed(keys::TRIGGERS, &state)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(systems: Value, alert: &str) -> StateTree {
        let mut state = StateTree::new();
        state.insert(keys::SYSTEMS.to_string(), systems);
        state.insert(keys::ALERT.to_string(), json!(alert));
        state
    }

    #[test]
    fn conditions() {
        let state = state_with(json!([{"id": "shields", "name": "Schilde", "integrity": 25}]), "yellow");
        assert!(TriggerCondition::AtTick { tick: 3 }.is_met(&state, 3));
        assert!(!TriggerCondition::AtTick { tick: 3 }.is_met(&state, 2));
        let below = TriggerCondition::SystemIntegrityBelow {
            system: SystemId::from("shields"),
            value: 30.0,
        };
        assert!(below.is_met(&state, 0));
        let unknown = TriggerCondition::SystemIntegrityBelow {
            system: SystemId::from("ftl"),
            value: 30.0,
        };
        assert!(!unknown.is_met(&state, 0));
        assert!(TriggerCondition::AlertIs { level: "YELLOW".to_string() }.is_met(&state, 0));
    }

    #[test]
    fn definitions_parse_tagged() {
        let value = json!({
            "id": "t1",
            "condition": {"type": "atTick", "tick": 5},
            "actions": [
                {"type": "log", "message": "Hallo"},
                {"type": "setAlert", "level": "red"},
                {"type": "emit", "event": "power:request-balance"}
            ]
        });
        let def: TriggerDef = serde_json::from_value(value).unwrap();
        assert_eq!(def.condition, TriggerCondition::AtTick { tick: 5 });
        assert_eq!(
            def.actions[0],
            TriggerAction::Log {
                message: "Hallo".to_string(),
                level: LogKind::Info
            }
        );
        assert_eq!(def.actions.len(), 3);
    }
}
