use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use super::{
    IdentityFilter, IdentityPatch, MessageFilter, Order, Range, Store, StoreResult,
};
use crate::models::{Identity, IdentityId, Message, NewIdentity, NewMessage};

const FEED_CAPACITY: usize = 256;

/// In-process store. Records live as long as the process; nothing expires.
#[derive(Clone)]
pub struct MemoryStore {
    identities: Arc<RwLock<HashMap<IdentityId, Identity>>>,
    messages: Arc<RwLock<Vec<Message>>>,
    feed: broadcast::Sender<Message>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        MemoryStore {
            identities: Arc::new(RwLock::new(HashMap::new())),
            messages: Arc::new(RwLock::new(Vec::new())),
            feed,
        }
    }

    pub async fn identity(&self, id: &str) -> Option<Identity> {
        self.identities.read().await.get(id).cloned()
    }

    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_identity(&self, identity: NewIdentity) -> StoreResult<Identity> {
        let record = Identity {
            id: Uuid::new_v4().to_string(),
            active: identity.active,
            status: identity.status,
            partner_id: None,
        };
        let mut identities = self.identities.write().await;
        identities.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn select_identities(&self, filter: &IdentityFilter) -> StoreResult<Vec<Identity>> {
        let identities = self.identities.read().await;
        Ok(identities
            .values()
            .filter(|identity| filter.matches(identity))
            .cloned()
            .collect())
    }

    async fn update_identities(
        &self,
        patch: &IdentityPatch,
        filter: &IdentityFilter,
    ) -> StoreResult<usize> {
        let mut identities = self.identities.write().await;
        let mut affected = 0;
        for identity in identities.values_mut() {
            if filter.matches(identity) {
                patch.apply(identity);
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn insert_message(&self, message: NewMessage) -> StoreResult<Message> {
        let mut messages = self.messages.write().await;
        let id = i64::try_from(messages.len()).unwrap_or(i64::MAX - 1) + 1;

        // Clock steps backwards must not break created_at monotonicity.
        let now = Utc::now();
        let created_at = match messages.last() {
            Some(last) if last.created_at > now => last.created_at,
            _ => now,
        };

        let record = Message {
            id,
            content: message.content,
            created_at,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
        };
        messages.push(record.clone());

        // Published under the write lock so the feed order matches id order.
        if self.feed.send(record.clone()).is_err() {
            debug!("Message {} inserted with no live subscribers", record.id);
        }
        Ok(record)
    }

    async fn select_messages(
        &self,
        filter: &MessageFilter,
        order: Order,
        range: Range,
    ) -> StoreResult<Vec<Message>> {
        let messages = self.messages.read().await;
        let mut matching: Vec<Message> = messages
            .iter()
            .filter(|message| filter.matches(message))
            .cloned()
            .collect();

        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        if order == Order::Descending {
            matching.reverse();
        }

        Ok(matching
            .into_iter()
            .skip(range.offset)
            .take(range.limit)
            .collect())
    }

    fn subscribe_messages(&self) -> StoreResult<broadcast::Receiver<Message>> {
        Ok(self.feed.subscribe())
    }
}
