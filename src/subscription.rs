//! Mapping from `(contract address, event topic hash)` to a callback.
//!
//! Read-only after [`EventService::run`](crate::event_service::EventService::run)
//! begins; no locking required, matching §4.6's "not mutated during `run`" guarantee.

use std::collections::HashMap;

use crate::types::{Log, SubscriptionKey};

/// A registered callback. Synchronous and expected to return promptly: it
/// runs inline in the dispatch loop (§4.7).
pub trait Subscription: Send + Sync {
    fn key(&self) -> SubscriptionKey;
    fn callback(&self, log: &Log);
}

#[derive(Default)]
pub struct SubscriptionTable {
    subscriptions: HashMap<SubscriptionKey, Box<dyn Subscription>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `subscription` unless its key is already registered, in which
    /// case this is a silent no-op.
    pub fn add(&mut self, subscription: Box<dyn Subscription>) {
        self.subscriptions.entry(subscription.key()).or_insert(subscription);
    }

    pub fn get(&self, key: &SubscriptionKey) -> Option<&dyn Subscription> {
        self.subscriptions.get(key).map(AsRef::as_ref)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
