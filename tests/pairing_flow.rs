use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use randomly::channel::{HistoryScope, DISCONNECT_NOTICE};
use randomly::messages::ServerMessage;
use randomly::models::Status;
use randomly::pairing::SEARCH_BACKOFF;
use randomly::session::{ChatSession, SessionSettings};
use randomly::store::memory::MemoryStore;
use randomly::view::Screen;

async fn visitor(
    store: &MemoryStore,
    settings: SessionSettings,
) -> (ChatSession, mpsc::UnboundedReceiver<ServerMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = ChatSession::start(Arc::new(store.clone()), settings, tx).await;
    (session, rx)
}

async fn contents(session: &ChatSession) -> Vec<String> {
    session
        .messages()
        .await
        .into_iter()
        .map(|m| m.content)
        .collect()
}

fn last_view(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Option<ServerMessage> {
    let mut last = None;
    while let Ok(message) = rx.try_recv() {
        if matches!(message, ServerMessage::View { .. }) {
            last = Some(message);
        }
    }
    last
}

#[tokio::test(start_paused = true)]
async fn visitors_pair_chat_and_rematch() {
    let store = MemoryStore::new();
    let (a, mut a_rx) = visitor(&store, SessionSettings::default()).await;
    let (b, _b_rx) = visitor(&store, SessionSettings::default()).await;
    let (c, _c_rx) = visitor(&store, SessionSettings::default()).await;

    assert!(a.find_partner().await);
    match last_view(&mut a_rx) {
        Some(ServerMessage::View { status, screen, .. }) => {
            assert_eq!(status, Status::Queue);
            assert!(matches!(screen, Screen::Finding { .. }));
        }
        other => panic!("expected a view, got {other:?}"),
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(b.find_partner().await);
    tokio::time::sleep(SEARCH_BACKOFF * 2).await;

    let a_id = a.identity().await.unwrap();
    let b_id = b.identity().await.unwrap();
    assert_eq!(a.partner().await, Some(b_id.clone()));
    assert_eq!(b.partner().await, Some(a_id.clone()));
    assert_eq!(c.status().await, Status::Standby);

    a.send("hey").await.unwrap();
    assert!(a.send("   ").await.is_none());
    b.send("hello stranger").await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(contents(&a).await, vec!["hey", "hello stranger"]);
    assert_eq!(contents(&b).await, vec!["hey", "hello stranger"]);

    match last_view(&mut a_rx) {
        Some(ServerMessage::View {
            status,
            screen: Screen::Conversation { messages },
            ..
        }) => {
            assert_eq!(status, Status::Onchat);
            assert!(messages[0].mine);
            assert!(!messages[1].mine);
        }
        other => panic!("expected a conversation, got {other:?}"),
    }

    a.teardown().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        contents(&b).await.last().map(String::as_str),
        Some(DISCONNECT_NOTICE)
    );
    assert!(!store.identity(&a_id).await.unwrap().active);

    // b goes looking again; the inactive a must not be picked.
    assert!(b.find_partner().await);
    assert!(b.messages().await.is_empty());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(c.find_partner().await);
    tokio::time::sleep(SEARCH_BACKOFF * 2).await;

    let c_id = c.identity().await.unwrap();
    assert_eq!(b.partner().await, Some(c_id));
    assert_eq!(c.partner().await, Some(b_id));

    b.teardown().await;
    c.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn directional_scope_hides_what_the_partner_sent_before_pairing() {
    let store = MemoryStore::new();
    let directional = SessionSettings {
        history_scope: HistoryScope::Directional,
        ..SessionSettings::default()
    };
    let (searcher, _s_rx) = visitor(&store, directional.clone()).await;
    let (waiter, _w_rx) = visitor(&store, directional).await;

    // The waiter is claimed first and adopts the pairing one backoff later;
    // whatever the searcher says in between only reaches the waiter through
    // history, which the directional scope filters out.
    assert!(waiter.find_partner().await);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(searcher.find_partner().await);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(searcher.status().await, Status::Onchat);
    assert_eq!(waiter.status().await, Status::Queue);

    searcher.send("anyone there?").await.unwrap();
    tokio::time::sleep(SEARCH_BACKOFF * 2).await;

    assert_eq!(waiter.status().await, Status::Onchat);
    assert!(waiter.messages().await.is_empty());
    assert_eq!(contents(&searcher).await, vec!["anyone there?"]);

    searcher.teardown().await;
    waiter.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn bidirectional_scope_recovers_messages_sent_before_adoption() {
    let store = MemoryStore::new();
    let (searcher, _s_rx) = visitor(&store, SessionSettings::default()).await;
    let (waiter, _w_rx) = visitor(&store, SessionSettings::default()).await;

    assert!(waiter.find_partner().await);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(searcher.find_partner().await);
    tokio::time::sleep(Duration::from_millis(10)).await;

    searcher.send("anyone there?").await.unwrap();
    tokio::time::sleep(SEARCH_BACKOFF * 2).await;

    assert_eq!(contents(&waiter).await, vec!["anyone there?"]);

    searcher.teardown().await;
    waiter.teardown().await;
}
