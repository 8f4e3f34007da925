//! Subscription registry behind `Kernel::emit`.
//!
//! The bus only stores subscriptions; delivery lives in the kernel because a
//! module listener needs the kernel to build its context. Subscriptions are
//! kept per event kind in insertion order and, for module-owned ones, indexed
//! by owner so a stopped or failed module can be revoked in one call.

use std::collections::HashMap;

use crate::events::Event;
use crate::ModuleId;

/// Handler for a listener that does not belong to any module.
pub type GlobalHandler = Box<dyn FnMut(&Event) -> anyhow::Result<()>>;

/// Handle returned by every subscription; pass it to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Listener {
    Module(ModuleId),
    Global,
}

struct Subscription {
    id: SubscriptionId,
    listener: Listener,
}

#[derive(Default)]
pub(crate) struct EventBus {
    next_id: u64,
    by_kind: HashMap<String, Vec<Subscription>>,
    kind_of: HashMap<SubscriptionId, String>,
    owned: HashMap<ModuleId, Vec<SubscriptionId>>,
    globals: HashMap<SubscriptionId, GlobalHandler>,
}

impl EventBus {
    fn insert(&mut self, kind: &str, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.by_kind
            .entry(kind.to_string())
            .or_default()
            .push(Subscription { id, listener });
        self.kind_of.insert(id, kind.to_string());
        id
    }

    pub fn subscribe_module(&mut self, kind: &str, owner: &ModuleId) -> SubscriptionId {
        let id = self.insert(kind, Listener::Module(owner.clone()));
        self.owned.entry(owner.clone()).or_default().push(id);
        id
    }

    pub fn subscribe_global(&mut self, kind: &str, handler: GlobalHandler) -> SubscriptionId {
        let id = self.insert(kind, Listener::Global);
        self.globals.insert(id, handler);
        id
    }

    /// Removes a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let Some(kind) = self.kind_of.remove(&id) else {
            return false;
        };
        if let Some(subscriptions) = self.by_kind.get_mut(&kind) {
            if let Some(position) = subscriptions.iter().position(|s| s.id == id) {
                let removed = subscriptions.remove(position);
                if let Listener::Module(owner) = removed.listener {
                    if let Some(ids) = self.owned.get_mut(&owner) {
                        ids.retain(|owned| *owned != id);
                    }
                }
            }
            if subscriptions.is_empty() {
                self.by_kind.remove(&kind);
            }
        }
        self.globals.remove(&id);
        true
    }

    /// Drops every subscription owned by `owner`. Returns how many were live.
    pub fn revoke_module(&mut self, owner: &ModuleId) -> usize {
        let ids = self.owned.remove(owner).unwrap_or_default();
        ids.into_iter().filter(|id| self.unsubscribe(*id)).count()
    }

    /// Snapshot of the listeners for `kind`, in subscription order.
    pub fn listeners(&self, kind: &str) -> Vec<(SubscriptionId, Listener)> {
        self.by_kind
            .get(kind)
            .map(|subscriptions| {
                subscriptions
                    .iter()
                    .map(|s| (s.id, s.listener.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_active(&self, id: SubscriptionId) -> bool {
        self.kind_of.contains_key(&id)
    }

    pub fn take_global(&mut self, id: SubscriptionId) -> Option<GlobalHandler> {
        self.globals.remove(&id)
    }

    pub fn restore_global(&mut self, id: SubscriptionId, handler: GlobalHandler) {
        if self.is_active(id) {
            self.globals.insert(id, handler);
        }
    }

    pub fn subscriber_count(&self, kind: &str) -> usize {
        self.by_kind.get(kind).map_or(0, Vec::len)
    }

    pub fn owned_count(&self, owner: &ModuleId) -> usize {
        self.owned.get(owner).map_or(0, Vec::len)
    }
}
