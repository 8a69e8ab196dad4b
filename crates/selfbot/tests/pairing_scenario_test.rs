//! End-to-end scenario: first run without credentials, pairing by QR, then a
//! command in the self-chat. Uses the file credential store on a temp dir.

mod common;

use std::sync::Arc;

use tempfile::TempDir;

use selfbot::client::{ConnectionUpdate, InboundMessage, MessageBatch, SessionEvent, UpsertKind};
use selfbot::lifecycle::{LifecycleState, StopReason};
use selfbot::store::{CredentialStore, FileCredentialStore};

use common::{OWNER_JID, harness_with_store, wait_until};

#[tokio::test]
async fn fresh_install_pairs_and_answers_ping() {
    let tmp = TempDir::new().unwrap();
    let auth_dir = tmp.path().join("auth");
    let store = Arc::new(FileCredentialStore::new(&auth_dir));
    let h = harness_with_store(store.clone());

    // No credentials: the client is asked to pair
    h.manager.start().await;
    assert_eq!(h.factory.connects(), 1);
    assert!(h.factory.last_options().credentials.fresh);
    assert!(auth_dir.is_dir());

    let session = h.factory.last_session();
    session
        .emit(SessionEvent::Connection(ConnectionUpdate::qr("2@pairing-ref")))
        .await;
    wait_until(|| h.qr.shown().len() == 1).await;
    assert_eq!(h.qr.shown()[0].payload, "2@pairing-ref");

    // Scan completes: the client hands over credentials, then opens
    session
        .emit(SessionEvent::CredsUpdate(serde_json::json!({
            "me": {"id": "923000000000:12@s.whatsapp.net"},
            "registered": true
        })))
        .await;
    session
        .emit(SessionEvent::Connection(ConnectionUpdate::open()))
        .await;
    wait_until(|| h.manager.state() == LifecycleState::Connected).await;
    assert!(!h.manager.reconnect_pending());
    assert!(auth_dir.join("creds.json").is_file());

    // A command delivered while offline arrives as `append` and is answered
    // like a live one, exactly once
    session
        .emit(SessionEvent::Messages(MessageBatch {
            kind: UpsertKind::Append,
            messages: vec![InboundMessage::text(OWNER_JID, true, "/ping")],
        }))
        .await;
    wait_until(|| !session.session.sent().is_empty()).await;
    // Give a duplicate reply the chance to show up
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert_eq!(
        session.session.sent(),
        vec![(OWNER_JID.to_string(), "🤖 pong".to_string())]
    );

    // Our own reply echoes back as a message from us; it must be ignored
    session
        .emit(SessionEvent::Messages(MessageBatch::notify(InboundMessage::text(
            OWNER_JID, true, "🤖 pong",
        ))))
        .await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(session.session.sent().len(), 1);

    h.manager.shutdown().await;
    assert_eq!(h.manager.stopped().await, StopReason::Shutdown);
    assert!(session.session.is_closed());

    // The paired state survives a restart
    let reloaded = store.load().await.unwrap();
    assert!(!reloaded.fresh);
    assert_eq!(reloaded.creds["registered"], true);
}
