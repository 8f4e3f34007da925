//! Kernel: module registry, fixed-rate scheduler, event bus and state store.
//!
//! The kernel is the single failure-containment boundary of the simulation.
//! Every module hook and every event listener is invoked from exactly one
//! place ([`Kernel::run_hook`] / [`Kernel::deliver_global`]); an `Err` or a
//! panic coming out of it is converted into a module error and never
//! propagates further, so one faulty module cannot halt the tick loop, the
//! bus or any other module.
//!
//! Ordering guarantees:
//! - listeners of one `emit` run in subscription order;
//! - modules of one `tick` run in the order they became running;
//! - `state:changed` is emitted before `set_state` returns.

mod bus;
mod context;
mod error;
mod module;

pub use bus::{GlobalHandler, SubscriptionId};
pub use context::ModuleContext;
pub use error::KernelError;
pub use module::{HookResult, Module};

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use chrono::Utc;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::events::{self, Event};
use crate::{keys, HookPhase, LogEntry, LogKind, ModuleErrorState, ModuleId, ModuleStatus, StateTree};
use bus::{EventBus, Listener};
use module::ModuleRecord;

/// Host callback receiving every log entry.
pub type LogSink = Box<dyn FnMut(&LogEntry)>;
/// Host callback receiving every module failure.
pub type ErrorSink = Box<dyn FnMut(&ModuleErrorState)>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KernelConfig {
    pub ticks_per_second: f64,
    /// Seed for the kernel-owned RNG every module draws from.
    pub seed: u64,
    /// Oldest entries of `state.logs` are dropped beyond this length.
    pub max_log_entries: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            ticks_per_second: 1.0,
            seed: 0,
            max_log_entries: 250,
        }
    }
}

#[derive(Default)]
pub struct KernelOptions {
    pub config: KernelConfig,
    pub on_log: Option<LogSink>,
    pub on_error: Option<ErrorSink>,
}

impl KernelOptions {
    pub fn with_config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_log_sink(mut self, sink: impl FnMut(&LogEntry) + 'static) -> Self {
        self.on_log = Some(Box::new(sink));
        self
    }

    pub fn with_error_sink(mut self, sink: impl FnMut(&ModuleErrorState) + 'static) -> Self {
        self.on_error = Some(Box::new(sink));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchedulerPhase {
    Idle,
    Booted,
    ShutDown,
}

enum HookOutcome {
    Completed,
    Failed(anyhow::Error),
    Busy,
}

pub struct Kernel {
    state: StateTree,
    config: KernelConfig,
    modules: HashMap<ModuleId, ModuleRecord>,
    /// Running modules in start order.
    running: Vec<ModuleId>,
    bus: EventBus,
    tick_count: u64,
    phase: SchedulerPhase,
    rng: ChaCha8Rng,
    next_log_id: u64,
    module_errors: BTreeMap<ModuleId, ModuleErrorState>,
    log_sink: Option<LogSink>,
    error_sink: Option<ErrorSink>,
}

impl Kernel {
    /// Takes ownership of the initial state; the caller keeps no alias to it.
    pub fn new(initial_state: StateTree, options: KernelOptions) -> Self {
        let KernelOptions {
            config,
            on_log,
            on_error,
        } = options;
        let mut state = initial_state;
        state
            .entry(keys::LOGS.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        Self {
            state,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
            modules: HashMap::new(),
            running: Vec::new(),
            bus: EventBus::default(),
            tick_count: 0,
            phase: SchedulerPhase::Idle,
            next_log_id: 1,
            module_errors: BTreeMap::new(),
            log_sink: on_log,
            error_sink: on_error,
        }
    }

    // -----------------------------------------------------------------------
    // Module registry
    // -----------------------------------------------------------------------

    /// Stores the module and runs its `on_init` hook. An init failure is
    /// contained (the record stays, in `Error`); only a duplicate id is an
    /// error for the caller.
    pub fn register_module<M>(&mut self, id: impl Into<ModuleId>, module: M) -> Result<(), KernelError>
    where
        M: Module + 'static,
    {
        self.register_boxed(id.into(), Box::new(module))
    }

    pub fn register_boxed(&mut self, id: ModuleId, module: Box<dyn Module>) -> Result<(), KernelError> {
        if self.modules.contains_key(&id) {
            return Err(KernelError::DuplicateModule(id));
        }
        self.modules.insert(id.clone(), ModuleRecord::new(module));
        tracing::debug!(module = %id, "module registered");
        self.call_hook(&id, HookPhase::Init, |module, ctx| module.on_init(ctx));
        Ok(())
    }

    /// Moves the module into `Running`. Returns `Ok(false)` when `on_start`
    /// failed (the module is then in `Error`).
    pub fn start_module(&mut self, id: &str) -> Result<bool, KernelError> {
        let record = self
            .modules
            .get_mut(id)
            .ok_or_else(|| KernelError::ModuleNotFound(ModuleId::from(id)))?;
        if record.status == ModuleStatus::Running {
            return Ok(true);
        }
        if record.is_busy() {
            return Err(KernelError::ModuleBusy(ModuleId::from(id)));
        }
        record.status = ModuleStatus::Running;
        let module_id = ModuleId::from(id);
        self.clear_module_error(id);
        self.running.push(module_id.clone());

        let started = self.call_hook(&module_id, HookPhase::Start, |module, ctx| module.on_start(ctx));
        if started && self.module_status(id) == Some(ModuleStatus::Running) {
            self.append_log(
                LogKind::System,
                format!("Modul {module_id} gestartet"),
                None,
                Some(&module_id),
            );
            return Ok(true);
        }
        Ok(false)
    }

    /// Stops a running module; a no-op for any other status. `on_stop` is
    /// best-effort: a failing hook still leaves the module out of the
    /// running set with its subscriptions revoked.
    pub fn stop_module(&mut self, id: &str, reason: &str) -> Result<(), KernelError> {
        let record = self
            .modules
            .get_mut(id)
            .ok_or_else(|| KernelError::ModuleNotFound(ModuleId::from(id)))?;
        if record.status != ModuleStatus::Running {
            return Ok(());
        }
        let module_id = ModuleId::from(id);
        if record.is_busy() {
            // Stopping itself from inside a hook: finish the bookkeeping now,
            // run on_stop once the current hook has returned.
            record.pending_stop = Some(reason.to_string());
            self.finish_stop(&module_id, reason);
            return Ok(());
        }
        if let HookOutcome::Failed(err) =
            self.run_hook(&module_id, |module, ctx| module.on_stop(ctx, reason))
        {
            self.handle_module_error(&module_id, HookPhase::Stop, &err);
        }
        self.finish_stop(&module_id, reason);
        Ok(())
    }

    fn finish_stop(&mut self, id: &ModuleId, reason: &str) {
        if let Some(record) = self.modules.get_mut(id) {
            if record.status == ModuleStatus::Running {
                record.status = ModuleStatus::Stopped;
            }
            record.pending_events.clear();
        }
        self.running.retain(|running| running != id);
        self.bus.revoke_module(id);
        self.append_log(
            LogKind::System,
            format!("Modul {id} gestoppt ({reason})"),
            None,
            Some(id),
        );
    }

    pub fn module_status(&self, id: &str) -> Option<ModuleStatus> {
        self.modules.get(id).map(|record| record.status)
    }

    pub fn running_modules(&self) -> &[ModuleId] {
        &self.running
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.module_status(id) == Some(ModuleStatus::Running)
    }

    // -----------------------------------------------------------------------
    // Scheduler
    // -----------------------------------------------------------------------

    /// Arms the scheduler. Returns `false` if it was already booted.
    pub fn boot(&mut self) -> bool {
        if self.phase == SchedulerPhase::Booted {
            return false;
        }
        self.phase = SchedulerPhase::Booted;
        let ticks_per_second = self.config.ticks_per_second;
        self.append_log(
            LogKind::System,
            format!("Kernel gestartet ({ticks_per_second} Ticks/s)"),
            None,
            None,
        );
        self.emit(
            events::KERNEL_BOOTED,
            json!({ "ticksPerSecond": ticks_per_second }),
            None,
        );
        true
    }

    /// Disarms the scheduler and stops every running module, each one
    /// isolated from the others. Returns `false` if already shut down.
    pub fn shutdown(&mut self, reason: &str) -> bool {
        if self.phase == SchedulerPhase::ShutDown {
            return false;
        }
        self.phase = SchedulerPhase::ShutDown;
        for id in self.running.clone() {
            if let Err(err) = self.stop_module(id.as_str(), reason) {
                tracing::warn!(module = %id, "stop during shutdown failed: {err}");
            }
        }
        self.append_log(
            LogKind::System,
            format!("Kernel heruntergefahren ({reason})"),
            None,
            None,
        );
        self.emit(events::KERNEL_SHUTDOWN, json!({ "reason": reason }), None);
        true
    }

    pub fn is_booted(&self) -> bool {
        self.phase == SchedulerPhase::Booted
    }

    /// Period of the fixed-rate tick: `1000 / ticks_per_second` ms.
    pub fn tick_interval(&self) -> Duration {
        let rate = if self.config.ticks_per_second > 0.0 {
            self.config.ticks_per_second
        } else {
            KernelConfig::default().ticks_per_second
        };
        Duration::from_secs_f64(1.0 / rate)
    }

    /// Advances the clock by one tick and returns the new tick number.
    ///
    /// Modules run from the snapshot of running ids taken here. A module
    /// that leaves `Running` before its turn is skipped; one that starts
    /// during the tick first runs on the next.
    pub fn tick(&mut self) -> u64 {
        self.tick_count += 1;
        let tick = self.tick_count;
        self.emit(events::KERNEL_TICK, json!({ "tick": tick }), None);

        let snapshot = self.running.clone();
        for id in snapshot {
            if !self.is_running(id.as_str()) {
                continue;
            }
            self.call_hook(&id, HookPhase::Tick, |module, ctx| module.on_tick(ctx, tick));
        }
        tick
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    // -----------------------------------------------------------------------
    // Event bus
    // -----------------------------------------------------------------------

    /// Synchronously delivers an event to every current subscriber.
    pub fn emit(&mut self, kind: &str, payload: Value, origin: Option<&ModuleId>) {
        let event = Event {
            kind: kind.to_string(),
            payload,
            origin: origin.cloned(),
            tick: self.tick_count,
        };
        for (subscription, listener) in self.bus.listeners(kind) {
            if !self.bus.is_active(subscription) {
                continue;
            }
            match listener {
                Listener::Module(owner) => self.deliver_to_module(&owner, &event),
                Listener::Global => self.deliver_global(subscription, &event),
            }
        }
    }

    /// Subscribes a listener that belongs to no module. A failing handler is
    /// logged and delivery continues with the next listener.
    pub fn on<F>(&mut self, kind: &str, handler: F) -> SubscriptionId
    where
        F: FnMut(&Event) -> anyhow::Result<()> + 'static,
    {
        self.bus.subscribe_global(kind, Box::new(handler))
    }

    /// Idempotent; returns whether the subscription was still live.
    pub fn unsubscribe(&mut self, subscription: SubscriptionId) -> bool {
        self.bus.unsubscribe(subscription)
    }

    pub fn subscriber_count(&self, kind: &str) -> usize {
        self.bus.subscriber_count(kind)
    }

    fn deliver_to_module(&mut self, owner: &ModuleId, event: &Event) {
        let Some(record) = self.modules.get_mut(owner) else {
            return;
        };
        if record.is_busy() {
            record.pending_events.push_back(event.clone());
            return;
        }
        self.call_hook(owner, HookPhase::Event, |module, ctx| module.on_event(ctx, event));
    }

    fn deliver_global(&mut self, subscription: SubscriptionId, event: &Event) {
        let Some(mut handler) = self.bus.take_global(subscription) else {
            return;
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| handler(event)));
        self.bus.restore_global(subscription, handler);
        let failure = match result {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err,
            Err(payload) => panic_to_error(payload.as_ref()),
        };
        self.append_log(
            LogKind::Error,
            format!("Listener für {} fehlgeschlagen: {failure:#}", event.kind),
            Some(json!({ "event": event.kind })),
            None,
        );
    }

    // -----------------------------------------------------------------------
    // State store
    // -----------------------------------------------------------------------

    pub fn state(&self) -> &StateTree {
        &self.state
    }

    pub fn get_state(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Reads a key as `T`; `Ok(None)` if the key is absent or null.
    pub fn state_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, KernelError> {
        match self.state.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => T::deserialize(value)
                .map(Some)
                .map_err(|source| KernelError::shape(key, source)),
        }
    }

    /// Replaces a top-level key. Always emits `state:changed`, even when the
    /// new value equals the old one.
    pub fn set_state(&mut self, key: &str, value: Value) {
        self.set_state_from(key, value, None);
    }

    pub fn set_state_typed<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), KernelError> {
        let value = serde_json::to_value(value).map_err(|source| KernelError::shape(key, source))?;
        self.set_state(key, value);
        Ok(())
    }

    /// Replaces a key with `updater(previous)`; `previous` is `Null` when the
    /// key is absent.
    pub fn update_state<F>(&mut self, key: &str, updater: F)
    where
        F: FnOnce(&Value) -> Value,
    {
        let next = updater(self.state.get(key).unwrap_or(&Value::Null));
        self.set_state(key, next);
    }

    pub(crate) fn set_state_from(&mut self, key: &str, value: Value, origin: Option<&ModuleId>) {
        let previous = self
            .state
            .insert(key.to_string(), value.clone())
            .unwrap_or(Value::Null);
        self.emit(
            events::STATE_CHANGED,
            json!({ "key": key, "value": value, "previous": previous }),
            origin,
        );
    }

    // -----------------------------------------------------------------------
    // Logging and module errors
    // -----------------------------------------------------------------------

    pub fn log(&mut self, kind: LogKind, message: impl Into<String>, meta: Option<Value>) -> LogEntry {
        self.append_log(kind, message.into(), meta, None)
    }

    /// Parsed copy of `state.logs`, oldest first.
    pub fn logs(&self) -> Vec<LogEntry> {
        self.state_as::<Vec<LogEntry>>(keys::LOGS)
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    pub(crate) fn append_log(
        &mut self,
        kind: LogKind,
        message: String,
        meta: Option<Value>,
        module: Option<&ModuleId>,
    ) -> LogEntry {
        let entry = LogEntry {
            id: format!("log_{:06}", self.next_log_id),
            kind,
            message,
            timestamp: Utc::now(),
            tick: self.tick_count,
            module: module.cloned(),
            meta,
        };
        self.next_log_id += 1;

        let source = module.map_or("kernel", ModuleId::as_str);
        match kind {
            LogKind::Error => tracing::error!(module = source, tick = entry.tick, "{}", entry.message),
            LogKind::Warning | LogKind::Critical => {
                tracing::warn!(module = source, tick = entry.tick, "{}", entry.message);
            }
            LogKind::Info | LogKind::System => {
                tracing::info!(module = source, tick = entry.tick, "{}", entry.message);
            }
        }

        match serde_json::to_value(&entry) {
            Ok(value) => {
                let max = self.config.max_log_entries;
                let logs = self
                    .state
                    .entry(keys::LOGS.to_string())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if !logs.is_array() {
                    *logs = Value::Array(Vec::new());
                }
                if let Value::Array(items) = logs {
                    items.push(value);
                    let excess = items.len().saturating_sub(max);
                    items.drain(..excess);
                }
            }
            Err(err) => tracing::warn!("log entry serialization failed: {err}"),
        }

        if let Some(sink) = self.log_sink.as_mut() {
            sink(&entry);
        }
        entry
    }

    /// Records the last error of a module and hands it to the error sink.
    pub fn flag_error(&mut self, module_id: &ModuleId, error: &anyhow::Error, phase: HookPhase) -> ModuleErrorState {
        let state = ModuleErrorState {
            module_id: module_id.clone(),
            phase,
            message: format!("{error:#}"),
            timestamp: Utc::now(),
        };
        self.module_errors.insert(module_id.clone(), state.clone());
        if let Some(sink) = self.error_sink.as_mut() {
            sink(&state);
        }
        state
    }

    pub fn clear_module_error(&mut self, module_id: &str) -> Option<ModuleErrorState> {
        self.module_errors.remove(module_id)
    }

    pub fn module_error(&self, module_id: &str) -> Option<&ModuleErrorState> {
        self.module_errors.get(module_id)
    }

    pub fn module_errors(&self) -> impl Iterator<Item = &ModuleErrorState> {
        self.module_errors.values()
    }

    // -----------------------------------------------------------------------
    // Containment boundary
    // -----------------------------------------------------------------------

    /// Runs one hook with the module checked out of its record. Panics are
    /// caught here and turned into errors.
    fn run_hook<F>(&mut self, id: &ModuleId, hook: F) -> HookOutcome
    where
        F: FnOnce(&mut dyn Module, &mut ModuleContext<'_>) -> HookResult,
    {
        let Some(mut module) = self.modules.get_mut(id).and_then(|r| r.module.take()) else {
            return HookOutcome::Busy;
        };
        let result = {
            let mut ctx = ModuleContext::new(id.clone(), self);
            panic::catch_unwind(AssertUnwindSafe(|| hook(module.as_mut(), &mut ctx)))
        };
        if let Some(record) = self.modules.get_mut(id) {
            record.module = Some(module);
        }
        match result {
            Ok(Ok(())) => HookOutcome::Completed,
            Ok(Err(err)) => HookOutcome::Failed(err),
            Err(payload) => HookOutcome::Failed(panic_to_error(payload.as_ref())),
        }
    }

    /// Runs a hook, routes a failure to the module-error path and then
    /// flushes work deferred while the module was busy. Returns whether the
    /// hook completed.
    fn call_hook<F>(&mut self, id: &ModuleId, phase: HookPhase, hook: F) -> bool
    where
        F: FnOnce(&mut dyn Module, &mut ModuleContext<'_>) -> HookResult,
    {
        let completed = match self.run_hook(id, hook) {
            HookOutcome::Completed => true,
            HookOutcome::Failed(err) => {
                self.handle_module_error(id, phase, &err);
                false
            }
            HookOutcome::Busy => return false,
        };
        self.settle(id);
        completed
    }

    fn settle(&mut self, id: &ModuleId) {
        loop {
            let Some(record) = self.modules.get_mut(id) else {
                return;
            };
            if record.is_busy() {
                return;
            }
            if let Some(reason) = record.pending_stop.take() {
                if let HookOutcome::Failed(err) =
                    self.run_hook(id, |module, ctx| module.on_stop(ctx, &reason))
                {
                    self.handle_module_error(id, HookPhase::Stop, &err);
                }
                continue;
            }
            let Some(event) = record.pending_events.pop_front() else {
                return;
            };
            self.deliver_to_module(id, &event);
        }
    }

    /// Uniform failure policy for every hook phase.
    fn handle_module_error(&mut self, id: &ModuleId, phase: HookPhase, error: &anyhow::Error) {
        if let Some(record) = self.modules.get_mut(id) {
            record.status = ModuleStatus::Error;
            record.pending_events.clear();
        }
        self.running.retain(|running| running != id);
        self.bus.revoke_module(id);
        self.append_log(
            LogKind::Error,
            format!("Modul {id} fehlgeschlagen ({phase}): {error:#}"),
            Some(json!({ "moduleId": id, "phase": phase })),
            Some(id),
        );
        self.flag_error(id, error, phase);
    }
}

fn panic_to_error(payload: &(dyn Any + Send)) -> anyhow::Error {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    anyhow::anyhow!("panicked: {message}")
}
