//! Contract of the backing store: a relational table pair (`temp_user`,
//! `messages`) with insert notifications.

pub mod memory;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::models::{Identity, IdentityId, Message, NewIdentity, NewMessage, Status};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable")]
    Unavailable,
    #[error("write rejected: {0}")]
    Rejected(String),
    #[error("record not found")]
    NotFound,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Conjunction of predicates over `temp_user`. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityFilter {
    pub id: Option<IdentityId>,
    pub id_not: Option<IdentityId>,
    pub active: Option<bool>,
    pub status: Option<Status>,
}

impl IdentityFilter {
    pub fn by_id(id: impl Into<IdentityId>) -> Self {
        IdentityFilter {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn excluding(mut self, id: impl Into<IdentityId>) -> Self {
        self.id_not = Some(id.into());
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, identity: &Identity) -> bool {
        self.id.as_ref().map_or(true, |id| *id == identity.id)
            && self.id_not.as_ref().map_or(true, |id| *id != identity.id)
            && self.active.map_or(true, |active| active == identity.active)
            && self.status.map_or(true, |status| status == identity.status)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityPatch {
    pub active: Option<bool>,
    pub status: Option<Status>,
    pub partner_id: Option<Option<IdentityId>>,
}

impl IdentityPatch {
    pub fn status(status: Status) -> Self {
        IdentityPatch {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn deactivate() -> Self {
        IdentityPatch {
            active: Some(false),
            ..Default::default()
        }
    }

    pub fn partner(mut self, partner_id: Option<IdentityId>) -> Self {
        self.partner_id = Some(partner_id);
        self
    }

    pub fn apply(&self, identity: &mut Identity) {
        if let Some(active) = self.active {
            identity.active = active;
        }
        if let Some(status) = self.status {
            identity.status = status;
        }
        if let Some(partner_id) = &self.partner_id {
            identity.partner_id.clone_from(partner_id);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageFilter {
    /// `sender_id = sender AND receiver_id = receiver`
    Between {
        sender_id: IdentityId,
        receiver_id: IdentityId,
    },
    /// The same pair with the roles swapped is also a match.
    EitherDirection { a: IdentityId, b: IdentityId },
}

impl MessageFilter {
    pub fn matches(&self, message: &Message) -> bool {
        match self {
            MessageFilter::Between {
                sender_id,
                receiver_id,
            } => message.sender_id == *sender_id && message.receiver_id == *receiver_id,
            MessageFilter::EitherDirection { a, b } => {
                (message.sender_id == *a && message.receiver_id == *b)
                    || (message.sender_id == *b && message.receiver_id == *a)
            }
        }
    }
}

/// Ordering by `created_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

/// Offset + limit pagination window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub offset: usize,
    pub limit: usize,
}

impl Range {
    pub fn new(offset: usize, limit: usize) -> Self {
        Range { offset, limit }
    }
}

/// Every call is atomic on its own; nothing spanning several calls is.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_identity(&self, identity: NewIdentity) -> StoreResult<Identity>;

    async fn select_identities(&self, filter: &IdentityFilter) -> StoreResult<Vec<Identity>>;

    /// Applies `patch` to every row matching `filter` and returns the number
    /// of rows affected.
    async fn update_identities(
        &self,
        patch: &IdentityPatch,
        filter: &IdentityFilter,
    ) -> StoreResult<usize>;

    async fn insert_message(&self, message: NewMessage) -> StoreResult<Message>;

    async fn select_messages(
        &self,
        filter: &MessageFilter,
        order: Order,
        range: Range,
    ) -> StoreResult<Vec<Message>>;

    /// Feed of every inserted message. Dropping the receiver unsubscribes.
    fn subscribe_messages(&self) -> StoreResult<broadcast::Receiver<Message>>;
}

pub type SharedStore = Arc<dyn Store>;
