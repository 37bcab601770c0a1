//! Per-connection chat session.
//!
//! All local state sits behind one mutex, so user intents, search results
//! and live messages are applied one at a time. The session owns at most one
//! live [`Subscription`]; it is replaced whenever the pair changes and dropped
//! on teardown.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::channel::{
    self, HistoryScope, MessageLog, Subscription, DISCONNECT_NOTICE, MESSAGES_PER_PAGE,
};
use crate::identity;
use crate::messages::ServerMessage;
use crate::models::{IdentityId, Message, Pair, Status};
use crate::pairing::{PairingEngine, SearchOutcome, SEARCH_BACKOFF};
use crate::store::SharedStore;
use crate::view;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub search_backoff: Duration,
    pub page_size: usize,
    pub history_scope: HistoryScope,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            search_backoff: SEARCH_BACKOFF,
            page_size: MESSAGES_PER_PAGE,
            history_scope: HistoryScope::default(),
        }
    }
}

#[derive(Default)]
struct SessionState {
    identity: Option<IdentityId>,
    status: Status,
    receiver_id: Option<IdentityId>,
    log: MessageLog,
    subscription: Option<Subscription>,
    searching: bool,
    closed: bool,
    /// Partner already sent the disconnect notice.
    notified: Option<IdentityId>,
}

impl SessionState {
    /// The active pair; only exists once both ids are known and the local
    /// status is `onchat`.
    fn pair(&self) -> Option<Pair> {
        match (&self.identity, &self.receiver_id, self.status) {
            (Some(me), Some(partner), Status::Onchat) => {
                Some(Pair::new(me.clone(), partner.clone()))
            }
            _ => None,
        }
    }

    fn release_pair(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.receiver_id = None;
        self.log.clear();
    }

    /// `false` when `partner` was already told about the disconnect.
    fn mark_notified(&mut self, partner: &str) -> bool {
        if self.notified.as_deref() == Some(partner) {
            return false;
        }
        self.notified = Some(partner.to_string());
        true
    }
}

struct Inner {
    store: SharedStore,
    engine: PairingEngine,
    settings: SessionSettings,
    state: Mutex<SessionState>,
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    live: mpsc::UnboundedSender<Message>,
}

#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<Inner>,
}

impl ChatSession {
    /// Provisions the identity and starts listening for live messages.
    /// View updates are pushed into `outbound`.
    pub async fn start(
        store: SharedStore,
        settings: SessionSettings,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        let identity = identity::provision(store.as_ref()).await;
        let (live, live_rx) = mpsc::unbounded_channel();

        let session = ChatSession {
            inner: Arc::new(Inner {
                engine: PairingEngine::new(store.clone(), settings.search_backoff),
                store,
                settings,
                state: Mutex::new(SessionState {
                    identity: identity.clone(),
                    ..Default::default()
                }),
                cancel: CancellationToken::new(),
                outbound,
                live,
            }),
        };

        session.notify(ServerMessage::Welcome {
            identity_id: identity,
        });
        {
            let state = session.inner.state.lock().await;
            session.push_view(&state);
        }

        tokio::spawn(session.clone().run_live(live_rx));
        session
    }

    pub async fn identity(&self) -> Option<IdentityId> {
        self.inner.state.lock().await.identity.clone()
    }

    pub async fn status(&self) -> Status {
        self.inner.state.lock().await.status
    }

    pub async fn partner(&self) -> Option<IdentityId> {
        self.inner.state.lock().await.receiver_id.clone()
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.inner.state.lock().await.log.messages().to_vec()
    }

    pub async fn is_searching(&self) -> bool {
        self.inner.state.lock().await.searching
    }

    /// Starts looking for a partner. Returns `false` when nothing was started:
    /// a search is already running, the session has no identity, or it is closed.
    pub async fn find_partner(&self) -> bool {
        let me = {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                return false;
            }
            if state.searching {
                debug!("Search already in progress, ignoring");
                return false;
            }
            let Some(me) = state.identity.clone() else {
                debug!("No identity, cannot search");
                return false;
            };

            state.release_pair();
            state.status = Status::Queue;
            state.searching = true;
            self.push_view(&state);
            me
        };

        if let Err(e) = self.inner.engine.enter_queue(&me).await {
            error!("Error updating user with id {}: {}", me, e);
        }

        let session = self.clone();
        let cancel = self.inner.cancel.child_token();
        tokio::spawn(async move {
            let outcome = session.inner.engine.search(&me, cancel).await;
            session.finish_search(outcome).await;
        });
        true
    }

    pub async fn send(&self, content: &str) -> Option<Message> {
        let (me, partner) = {
            let state = self.inner.state.lock().await;
            (state.identity.clone(), state.receiver_id.clone())
        };
        channel::send(
            self.inner.store.as_ref(),
            me.as_deref(),
            partner.as_deref(),
            content,
        )
        .await
    }

    /// Fetches the next older page of history. Returns how many messages were added.
    pub async fn load_more(&self) -> usize {
        let mut state = self.inner.state.lock().await;
        let Some(pair) = state.pair() else {
            return 0;
        };

        let page = channel::fetch_history(
            self.inner.store.as_ref(),
            &pair,
            self.inner.settings.history_scope,
            self.inner.settings.page_size,
            state.log.history_offset(),
        )
        .await;
        let added = state.log.prepend_history(page);
        if added > 0 {
            self.push_view(&state);
        }
        added
    }

    /// Disconnect: tells the partner, marks the identity inactive and stops
    /// the search and the live feed. Failures are logged and otherwise ignored.
    pub async fn teardown(&self) {
        self.inner.cancel.cancel();

        let (me, partner) = {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                return;
            }
            state.closed = true;
            state.searching = false;
            if let Some(subscription) = state.subscription.take() {
                subscription.unsubscribe();
            }
            let partner = state.receiver_id.clone();
            if let Some(partner) = &partner {
                state.mark_notified(partner);
            }
            (state.identity.clone(), partner)
        };

        let partner = match (&me, partner) {
            (_, Some(partner)) => Some(partner),
            (Some(me), None) => self.unadopted_claim(me).await,
            (None, None) => None,
        };
        channel::send(
            self.inner.store.as_ref(),
            me.as_deref(),
            partner.as_deref(),
            DISCONNECT_NOTICE,
        )
        .await;

        if let Some(me) = &me {
            if let Err(e) = self.inner.engine.deactivate(me).await {
                warn!("Error updating user with id {}: {}", me, e);
            }
        }
        info!("Session for {} closed", me.as_deref().unwrap_or("<none>"));
    }

    /// A partner whose claim on `me` landed before this session picked it up.
    async fn unadopted_claim(&self, me: &str) -> Option<IdentityId> {
        let partner = match self.inner.engine.claimed_by(me).await {
            Ok(partner) => partner?,
            Err(e) => {
                warn!("Error reading user with id {}: {}", me, e);
                return None;
            }
        };
        let mut state = self.inner.state.lock().await;
        state.mark_notified(&partner).then_some(partner)
    }

    async fn finish_search(&self, outcome: SearchOutcome) {
        let mut state = self.inner.state.lock().await;
        state.searching = false;

        let partner = match outcome {
            SearchOutcome::Paired(partner) => partner,
            SearchOutcome::Cancelled => {
                debug!("Search cancelled");
                return;
            }
        };
        if state.closed {
            // Paired while shutting down: the partner still needs to hear about it.
            let me = state.identity.clone();
            let fresh = state.mark_notified(&partner);
            drop(state);
            if !fresh {
                return;
            }
            channel::send(
                self.inner.store.as_ref(),
                me.as_deref(),
                Some(&partner),
                DISCONNECT_NOTICE,
            )
            .await;
            return;
        }

        state.receiver_id = Some(partner);
        state.status = Status::Onchat;
        self.activate(&mut state).await;
        self.push_view(&state);
    }

    /// Fresh subscription plus the first history page for the current pair.
    async fn activate(&self, state: &mut SessionState) {
        if let Some(previous) = state.subscription.take() {
            previous.unsubscribe();
        }
        let Some(pair) = state.pair() else {
            return;
        };

        // Subscribe before fetching so nothing falls between the two.
        match Subscription::open(
            self.inner.store.as_ref(),
            pair.clone(),
            self.inner.live.clone(),
        ) {
            Ok(subscription) => state.subscription = Some(subscription),
            Err(e) => error!("Error subscribing to messages: {}", e),
        }

        let page = channel::fetch_history(
            self.inner.store.as_ref(),
            &pair,
            self.inner.settings.history_scope,
            self.inner.settings.page_size,
            0,
        )
        .await;
        state.log.prepend_history(page);
    }

    async fn run_live(self, mut live: mpsc::UnboundedReceiver<Message>) {
        loop {
            tokio::select! {
                () = self.inner.cancel.cancelled() => break,
                received = live.recv() => match received {
                    Some(message) => self.on_live_message(message).await,
                    None => break,
                },
            }
        }
    }

    async fn on_live_message(&self, message: Message) {
        let mut state = self.inner.state.lock().await;
        let Some(pair) = state.pair() else {
            return;
        };
        // Events from a subscription that was just replaced can still be queued.
        if !pair.contains(&message) {
            debug!("Dropping message {} outside the current pair", message.id);
            return;
        }
        if state.log.append(message) {
            self.push_view(&state);
        }
    }

    fn push_view(&self, state: &SessionState) {
        self.notify(ServerMessage::View {
            status: state.status,
            partner_id: state.receiver_id.clone(),
            screen: view::render(state.identity.as_deref(), state.status, state.log.messages()),
        });
    }

    fn notify(&self, message: ServerMessage) {
        if self.inner.outbound.send(message).is_err() {
            debug!("Client channel closed, dropping update");
        }
    }
}
