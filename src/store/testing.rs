use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};

use super::memory::MemoryStore;
use super::{
    IdentityFilter, IdentityPatch, MessageFilter, Order, Range, Store, StoreError, StoreResult,
};
use crate::models::{Identity, Message, NewIdentity, NewMessage};

/// Wraps a [`MemoryStore`], counting calls and optionally failing every one.
/// Identity updates can be held back to line up races; `inner` bypasses
/// both.
#[derive(Clone, Default)]
pub struct RecordingStore {
    pub inner: MemoryStore,
    calls: Arc<AtomicUsize>,
    message_inserts: Arc<AtomicUsize>,
    offline: Arc<AtomicBool>,
    updates: Arc<Mutex<()>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offline() -> Self {
        let store = Self::default();
        store.set_offline(true);
        store
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn message_inserts(&self) -> usize {
        self.message_inserts.load(Ordering::SeqCst)
    }

    /// Identity updates wait until the returned guard is dropped.
    pub fn hold_updates(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.updates)
            .try_lock_owned()
            .expect("updates already held")
    }

    fn enter(&self) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Store for RecordingStore {
    async fn insert_identity(&self, identity: NewIdentity) -> StoreResult<Identity> {
        self.enter()?;
        self.inner.insert_identity(identity).await
    }

    async fn select_identities(&self, filter: &IdentityFilter) -> StoreResult<Vec<Identity>> {
        self.enter()?;
        self.inner.select_identities(filter).await
    }

    async fn update_identities(
        &self,
        patch: &IdentityPatch,
        filter: &IdentityFilter,
    ) -> StoreResult<usize> {
        self.enter()?;
        let _open = self.updates.lock().await;
        self.inner.update_identities(patch, filter).await
    }

    async fn insert_message(&self, message: NewMessage) -> StoreResult<Message> {
        self.enter()?;
        self.message_inserts.fetch_add(1, Ordering::SeqCst);
        self.inner.insert_message(message).await
    }

    async fn select_messages(
        &self,
        filter: &MessageFilter,
        order: Order,
        range: Range,
    ) -> StoreResult<Vec<Message>> {
        self.enter()?;
        self.inner.select_messages(filter, order, range).await
    }

    fn subscribe_messages(&self) -> StoreResult<broadcast::Receiver<Message>> {
        self.enter()?;
        self.inner.subscribe_messages()
    }
}
