//! The module capability set and the kernel's per-module record.

use std::collections::VecDeque;

use crate::events::Event;
use crate::kernel::ModuleContext;
use crate::ModuleStatus;

/// Result returned by every lifecycle hook.
pub type HookResult = anyhow::Result<()>;

/// An independently-lifecycled unit of simulation logic.
///
/// Every hook is optional: the defaults do nothing, so a module implements
/// only the capabilities it needs. Returning `Err` (or panicking) from any
/// hook moves the module into the `Error` state; the kernel and the other
/// modules keep running.
pub trait Module {
    /// Called once from `register_module`.
    fn on_init(&mut self, _ctx: &mut ModuleContext<'_>) -> HookResult {
        Ok(())
    }

    /// Called on every transition into `Running`, including restarts after
    /// an error.
    fn on_start(&mut self, _ctx: &mut ModuleContext<'_>) -> HookResult {
        Ok(())
    }

    fn on_tick(&mut self, _ctx: &mut ModuleContext<'_>, _tick: u64) -> HookResult {
        Ok(())
    }

    fn on_stop(&mut self, _ctx: &mut ModuleContext<'_>, _reason: &str) -> HookResult {
        Ok(())
    }

    /// Delivery for subscriptions made through [`ModuleContext::on`].
    fn on_event(&mut self, _ctx: &mut ModuleContext<'_>, _event: &Event) -> HookResult {
        Ok(())
    }
}

pub(crate) struct ModuleRecord {
    /// `None` while one of the module's hooks is executing.
    pub module: Option<Box<dyn Module>>,
    pub status: ModuleStatus,
    /// Events addressed to the module while it was busy.
    pub pending_events: VecDeque<Event>,
    /// Set when the module stopped itself; `on_stop` runs once the current
    /// hook returns.
    pub pending_stop: Option<String>,
}

impl ModuleRecord {
    pub fn new(module: Box<dyn Module>) -> Self {
        Self {
            module: Some(module),
            status: ModuleStatus::Registered,
            pending_events: VecDeque::new(),
            pending_stop: None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.module.is_none()
    }
}
