use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type IdentityId = String;

/// Presence status of a `temp_user` row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Standby,
    Queue,
    Onchat,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Standby => "standby",
            Status::Queue => "queue",
            Status::Onchat => "onchat",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ephemeral per-connection user record.
///
/// `partner_id` is written by whoever claims this identity out of the queue,
/// which is how the claimed side learns who it was paired with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub active: bool,
    pub status: Status,
    pub partner_id: Option<IdentityId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIdentity {
    pub active: bool,
    pub status: Status,
}

impl NewIdentity {
    pub fn standby() -> Self {
        NewIdentity {
            active: true,
            status: Status::Standby,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub sender_id: IdentityId,
    pub receiver_id: IdentityId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub content: String,
    pub sender_id: IdentityId,
    pub receiver_id: IdentityId,
}

/// The two identities bound together for one conversation, seen from the
/// local side: `sender_id` is always the local identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pair {
    pub sender_id: IdentityId,
    pub receiver_id: IdentityId,
}

impl Pair {
    pub fn new(sender_id: impl Into<IdentityId>, receiver_id: impl Into<IdentityId>) -> Self {
        Pair {
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
        }
    }

    /// Matches only messages written by the local side to the partner.
    pub fn is_outgoing(&self, message: &Message) -> bool {
        message.sender_id == self.sender_id && message.receiver_id == self.receiver_id
    }

    /// Matches messages of this pair in either direction.
    pub fn contains(&self, message: &Message) -> bool {
        self.is_outgoing(message)
            || (message.sender_id == self.receiver_id && message.receiver_id == self.sender_id)
    }
}
