use std::cell::RefCell;
use std::rc::Rc;

use super::*;
use crate::test_fixtures::{make_kernel, Captured};

mod life_support;
mod power;

// --- Shared test helpers ------------------------------------------------

type Journal = Rc<RefCell<Vec<String>>>;

/// Configurable module that writes every hook call into a shared journal.
#[derive(Default)]
struct Recorder {
    name: &'static str,
    journal: Journal,
    subscribe: Vec<&'static str>,
    fail_init: bool,
    fail_tick: bool,
    panic_tick: bool,
    stop_self_on_tick: bool,
    emit_on_tick: Option<&'static str>,
}

impl Recorder {
    fn new(name: &'static str, journal: &Journal) -> Self {
        Self {
            name,
            journal: Rc::clone(journal),
            ..Self::default()
        }
    }

    fn record(&self, entry: String) {
        self.journal.borrow_mut().push(format!("{}:{entry}", self.name));
    }
}

impl Module for Recorder {
    fn on_init(&mut self, _ctx: &mut ModuleContext<'_>) -> HookResult {
        self.record("init".to_string());
        if self.fail_init {
            anyhow::bail!("init refused");
        }
        Ok(())
    }

    fn on_start(&mut self, ctx: &mut ModuleContext<'_>) -> HookResult {
        self.record("start".to_string());
        for kind in &self.subscribe {
            ctx.on(kind);
        }
        Ok(())
    }

    fn on_tick(&mut self, ctx: &mut ModuleContext<'_>, tick: u64) -> HookResult {
        self.record(format!("tick:{tick}"));
        if let Some(kind) = self.emit_on_tick {
            ctx.emit(kind, serde_json::json!({ "tick": tick }));
            self.record("emitted".to_string());
        }
        if self.stop_self_on_tick {
            ctx.stop_self("done");
            self.record("stop-requested".to_string());
        }
        assert!(!self.panic_tick, "recorder panic");
        if self.fail_tick {
            anyhow::bail!("tick failed");
        }
        Ok(())
    }

    fn on_stop(&mut self, _ctx: &mut ModuleContext<'_>, reason: &str) -> HookResult {
        self.record(format!("stop:{reason}"));
        Ok(())
    }

    fn on_event(&mut self, _ctx: &mut ModuleContext<'_>, event: &Event) -> HookResult {
        self.record(format!("event:{}", event.kind));
        Ok(())
    }
}

fn journal() -> Journal {
    Rc::new(RefCell::new(Vec::new()))
}

fn entries(journal: &Journal) -> Vec<String> {
    journal.borrow().clone()
}

fn booted_kernel() -> (Kernel, Captured) {
    let (mut kernel, captured) = make_kernel(StateTree::new());
    kernel.boot();
    (kernel, captured)
}
