use serde::{Deserialize, Serialize};

use crate::models::{Message, Status};

pub const FINDING_NOTICE: &str = "Finding someone to chat...";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: i64,
    pub content: String,
    pub time: String,
    /// Sent by the local identity; the page right-aligns these.
    pub mine: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "screen", rename_all = "snake_case")]
pub enum Screen {
    Finding { notice: String },
    Conversation { messages: Vec<MessageView> },
}

/// What the page should show for the given local state.
pub fn render(me: Option<&str>, status: Status, messages: &[Message]) -> Screen {
    if status == Status::Queue {
        return Screen::Finding {
            notice: FINDING_NOTICE.to_string(),
        };
    }

    Screen::Conversation {
        messages: messages
            .iter()
            .map(|message| MessageView {
                id: message.id,
                content: message.content.clone(),
                time: message.created_at.format("%H:%M:%S").to_string(),
                mine: me == Some(message.sender_id.as_str()),
            })
            .collect(),
    }
}
