//! Handle passed to every module hook.

use rand_chacha::ChaCha8Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::{Kernel, KernelError, SubscriptionId};
use crate::{keys, LogEntry, LogKind, ModuleId, StateTree};

/// Scoped view of the kernel for one module.
///
/// Everything a module publishes goes out with its own id as origin, and
/// every subscription made here is owned by the module and revoked when it
/// stops or fails. The module's private data lives in its own struct fields.
pub struct ModuleContext<'k> {
    id: ModuleId,
    kernel: &'k mut Kernel,
}

impl<'k> ModuleContext<'k> {
    pub(crate) fn new(id: ModuleId, kernel: &'k mut Kernel) -> Self {
        Self { id, kernel }
    }

    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    pub fn state(&self) -> &StateTree {
        self.kernel.state()
    }

    pub fn get_state(&self, key: &str) -> Option<&Value> {
        self.kernel.get_state(key)
    }

    pub fn state_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, KernelError> {
        self.kernel.state_as(key)
    }

    pub fn set_state(&mut self, key: &str, value: Value) {
        self.kernel.set_state_from(key, value, Some(&self.id));
    }

    pub fn set_state_typed<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), KernelError> {
        let value = serde_json::to_value(value).map_err(|source| KernelError::shape(key, source))?;
        self.set_state(key, value);
        Ok(())
    }

    pub fn update_state<F>(&mut self, key: &str, updater: F)
    where
        F: FnOnce(&Value) -> Value,
    {
        let next = updater(self.kernel.get_state(key).unwrap_or(&Value::Null));
        self.set_state(key, next);
    }

    /// Reads `key` as `T` (default when absent), applies `updater` and
    /// writes the result back.
    pub fn update_state_typed<T, F>(&mut self, key: &str, updater: F) -> Result<(), KernelError>
    where
        T: DeserializeOwned + Serialize + Default,
        F: FnOnce(&mut T),
    {
        let mut value: T = self.state_as(key)?.unwrap_or_default();
        updater(&mut value);
        self.set_state_typed(key, &value)
    }

    pub fn emit(&mut self, kind: &str, payload: Value) {
        self.kernel.emit(kind, payload, Some(&self.id));
    }

    /// Subscribes this module to `kind`; deliveries arrive in
    /// [`Module::on_event`](super::Module::on_event).
    pub fn on(&mut self, kind: &str) -> SubscriptionId {
        self.kernel.bus.subscribe_module(kind, &self.id)
    }

    pub fn unsubscribe(&mut self, subscription: SubscriptionId) -> bool {
        self.kernel.unsubscribe(subscription)
    }

    pub fn log(&mut self, kind: LogKind, message: impl Into<String>) -> LogEntry {
        self.kernel.append_log(kind, message.into(), None, Some(&self.id))
    }

    pub fn log_with_meta(&mut self, kind: LogKind, message: impl Into<String>, meta: Value) -> LogEntry {
        self.kernel
            .append_log(kind, message.into(), Some(meta), Some(&self.id))
    }

    /// Logs a recoverable problem without failing the hook.
    pub fn error(&mut self, message: &str, error: &anyhow::Error) -> LogEntry {
        self.kernel.append_log(
            LogKind::Error,
            format!("{message}: {error:#}"),
            None,
            Some(&self.id),
        )
    }

    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        self.kernel.rng()
    }

    pub fn tick_count(&self) -> u64 {
        self.kernel.tick_count()
    }

    pub fn ticks_per_second(&self) -> f64 {
        self.kernel.config().ticks_per_second
    }

    /// `true` while the host has paused the simulation.
    pub fn is_paused(&self) -> bool {
        self.kernel
            .get_state(keys::SIMULATION_PAUSED)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Stops this module. Takes effect immediately; `on_stop` runs once the
    /// current hook has returned.
    pub fn stop_self(&mut self, reason: &str) {
        let id = self.id.clone();
        if let Err(err) = self.kernel.stop_module(id.as_str(), reason) {
            tracing::warn!(module = %id, "self-stop failed: {err}");
        }
    }

    /// Starts another module. Starting oneself is a no-op.
    pub fn start_module(&mut self, id: &str) -> Result<bool, KernelError> {
        if id == self.id.as_str() {
            return Ok(true);
        }
        self.kernel.start_module(id)
    }

    /// Stops another module; use [`stop_self`](Self::stop_self) for this one.
    pub fn stop_module(&mut self, id: &str, reason: &str) -> Result<(), KernelError> {
        if id == self.id.as_str() {
            self.stop_self(reason);
            return Ok(());
        }
        self.kernel.stop_module(id, reason)
    }

    pub fn kernel(&self) -> &Kernel {
        &*self.kernel
    }
}
