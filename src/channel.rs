//! Message history, the live insert subscription and sends for one pair.

use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::models::{Message, NewMessage, Pair};
use crate::store::{MessageFilter, Order, Range, Store, StoreResult};

pub const MESSAGES_PER_PAGE: usize = 10;
pub const DISCONNECT_NOTICE: &str = "other party disconnected";

/// Which messages a history fetch returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum HistoryScope {
    /// Only messages the local side sent to the partner.
    Directional,
    /// Messages in both directions, matching what the live feed accepts.
    #[default]
    Bidirectional,
}

impl HistoryScope {
    pub fn filter(self, pair: &Pair) -> MessageFilter {
        match self {
            HistoryScope::Directional => MessageFilter::Between {
                sender_id: pair.sender_id.clone(),
                receiver_id: pair.receiver_id.clone(),
            },
            HistoryScope::Bidirectional => MessageFilter::EitherDirection {
                a: pair.sender_id.clone(),
                b: pair.receiver_id.clone(),
            },
        }
    }
}

/// Display-ordered message list: `created_at` ascending, `id` breaking ties.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    messages: Vec<Message>,
    fetched: usize,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of history records merged so far, i.e. the offset of the next page.
    pub fn history_offset(&self) -> usize {
        self.fetched
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.fetched = 0;
    }

    /// Merges a chronological history page. Returns how many were new.
    pub fn prepend_history(&mut self, page: Vec<Message>) -> usize {
        self.fetched += page.len();
        page.into_iter().map(|m| self.insert(m)).filter(|added| *added).count()
    }

    /// Adds a live message; already-known ids are ignored.
    pub fn append(&mut self, message: Message) -> bool {
        self.insert(message)
    }

    pub fn is_ordered(&self) -> bool {
        self.messages
            .windows(2)
            .all(|w| (w[0].created_at, w[0].id) <= (w[1].created_at, w[1].id))
    }

    fn insert(&mut self, message: Message) -> bool {
        if self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        let key = (message.created_at, message.id);
        match self.messages.last() {
            Some(last) if (last.created_at, last.id) > key => {
                let at = self.messages.partition_point(|m| (m.created_at, m.id) < key);
                self.messages.insert(at, message);
            }
            _ => self.messages.push(message),
        }
        true
    }
}

/// Fetches one page of the pair's history, returned oldest-first. Errors are
/// logged and yield an empty page.
pub async fn fetch_history(
    store: &dyn Store,
    pair: &Pair,
    scope: HistoryScope,
    limit: usize,
    offset: usize,
) -> Vec<Message> {
    let filter = scope.filter(pair);
    match store
        .select_messages(&filter, Order::Descending, Range::new(offset, limit))
        .await
    {
        Ok(mut page) => {
            page.reverse();
            page
        }
        Err(e) => {
            error!("Error fetching messages: {}", e);
            Vec::new()
        }
    }
}

/// Writes a message. Blank content or a missing id is a silent no-op that
/// never reaches the store.
pub async fn send(
    store: &dyn Store,
    sender_id: Option<&str>,
    receiver_id: Option<&str>,
    content: &str,
) -> Option<Message> {
    let (Some(sender_id), Some(receiver_id)) = (sender_id, receiver_id) else {
        return None;
    };
    if content.trim().is_empty() {
        return None;
    }

    let message = NewMessage {
        content: content.to_string(),
        sender_id: sender_id.to_string(),
        receiver_id: receiver_id.to_string(),
    };
    match store.insert_message(message).await {
        Ok(stored) => Some(stored),
        Err(e) => {
            error!("Error sending message: {}", e);
            None
        }
    }
}

/// Live feed of one pair's messages, forwarded into `sink`. Dropping the
/// handle unsubscribes.
pub struct Subscription {
    pair: Pair,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn open(
        store: &dyn Store,
        pair: Pair,
        sink: mpsc::UnboundedSender<Message>,
    ) -> StoreResult<Self> {
        let mut feed = store.subscribe_messages()?;
        let filter = pair.clone();

        let task = tokio::spawn(async move {
            loop {
                match feed.recv().await {
                    Ok(message) => {
                        if !filter.contains(&message) {
                            continue;
                        }
                        debug!("New message received: {}", message.id);
                        if sink.send(message).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Live feed lagged, {} messages skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        debug!(
            "Subscribed to messages between {} and {}",
            pair.sender_id, pair.receiver_id
        );
        Ok(Subscription { pair, task })
    }

    pub fn unsubscribe(self) {
        debug!(
            "Unsubscribed from messages between {} and {}",
            self.pair.sender_id, self.pair.receiver_id
        );
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
