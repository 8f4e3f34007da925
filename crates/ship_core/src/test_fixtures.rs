//! Shared test fixtures for ship_core and downstream crates.
//!
//! `bridge_state()` is a small but complete ship: systems in every power
//! group, life support with one of each entity, a course and a weapon.
//! `engines_only_state()` is the single-system ship used for allocation
//! examples.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{json, Value};

use crate::{Kernel, KernelConfig, KernelOptions, LogEntry, ModuleErrorState, StateTree};

pub fn state_from(value: Value) -> StateTree {
    match value {
        Value::Object(map) => map,
        _ => StateTree::new(),
    }
}

pub fn engines_only_state() -> StateTree {
    state_from(json!({
        "systems": [
            {"id": "engines", "name": "Antrieb", "status": "online", "power": 80}
        ]
    }))
}

pub fn bridge_state() -> StateTree {
    state_from(json!({
        "alert": "green",
        "simulationPaused": false,
        "systems": [
            {"id": "engines", "name": "Antrieb", "status": "online", "power": 60},
            {"id": "shields", "name": "Schilde", "status": "online", "power": 50},
            {"id": "weapons", "name": "Waffen", "status": "idle", "power": 30},
            {"id": "life-support", "name": "Lebenserhaltung", "status": "online", "power": 40},
            {"id": "sensors", "name": "Sensoren", "status": "online", "power": 20}
        ],
        "lifeSupport": {
            "cycles": [
                {
                    "id": "o2-generation",
                    "label": "O₂-Erzeugung",
                    "metrics": [{"id": "efficiency", "value": 98.5, "unit": "%"}]
                },
                {
                    "id": "co2-scrubber",
                    "label": "CO₂-Wäscher",
                    "metrics": [{"id": "saturation", "value": 42.0, "unit": "%"}]
                }
            ],
            "sections": [
                {"id": "deck-1", "name": "Deck 1", "pressure": 101.3, "temperature": 21.0, "humidity": 40.0}
            ],
            "leaks": [
                {"id": "leak-a", "location": "Frachtraum"},
                {"id": "leak-b", "location": "Deck 4"}
            ],
            "filters": {
                "banks": [{"id": "bank-1", "label": "Filterbank 1", "saturation": 35.0, "bufferMinutes": 240}],
                "reserveAirMinutes": 600,
                "scrubberMarginMinutes": 300,
                "emergencyBufferMinutes": 400
            }
        },
        "navigation": {"destination": "Sternenbasis 12", "distance": 100.0, "totalDistance": 100.0, "speed": 2.0},
        "tactical": {"weapons": [{"id": "phaser-1", "name": "Phaser 1", "cooldownTicks": 3}]}
    }))
}

pub fn test_config(seed: u64) -> KernelConfig {
    KernelConfig {
        seed,
        ..KernelConfig::default()
    }
}

/// Log entries and module errors captured through the kernel sinks.
#[derive(Clone, Default)]
pub struct Captured {
    pub logs: Rc<RefCell<Vec<LogEntry>>>,
    pub errors: Rc<RefCell<Vec<ModuleErrorState>>>,
}

impl Captured {
    pub fn messages(&self) -> Vec<String> {
        self.logs.borrow().iter().map(|e| e.message.clone()).collect()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.logs
            .borrow()
            .iter()
            .filter(|e| e.message.contains(needle))
            .count()
    }
}

pub fn make_kernel(state: StateTree) -> (Kernel, Captured) {
    make_kernel_with(state, test_config(42))
}

pub fn make_kernel_with(state: StateTree, config: KernelConfig) -> (Kernel, Captured) {
    let captured = Captured::default();
    let logs = Rc::clone(&captured.logs);
    let errors = Rc::clone(&captured.errors);
    let options = KernelOptions::default()
        .with_config(config)
        .with_log_sink(move |entry| logs.borrow_mut().push(entry.clone()))
        .with_error_sink(move |error| errors.borrow_mut().push(error.clone()));
    (Kernel::new(state, options), captured)
}
