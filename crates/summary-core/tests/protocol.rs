//! Two-session protocol tests.
//!
//! Wires two `SummarySync` sessions to a shared in-memory store and a
//! loopback presence hub, the way two browsers share one server.

use std::sync::Arc;
use std::time::Duration;

use summary_core::events::EventLog;
use summary_core::{
    BufferEditor, Checksum, Editor, InMemoryStore, LoopbackHub, MemoryClipboard,
    PresenceEnvelope, PresenceEvent, PresenceMessage, ReconcileOutcome, SummaryEvent,
    SummarySync, SyncSettings, SyncState,
};
use tokio::sync::mpsc::UnboundedReceiver;

const CASE: u64 = 12;

type Session = SummarySync<BufferEditor, Arc<InMemoryStore>>;

struct Client {
    sync: Session,
    inbox: UnboundedReceiver<PresenceEvent>,
    clipboard: MemoryClipboard,
    log: EventLog,
    _sub: summary_core::Subscription,
}

impl Client {
    async fn join(hub: &LoopbackHub, store: &Arc<InMemoryStore>, actor: &str) -> Self {
        let (presence, inbox) = hub.connect();
        let clipboard = MemoryClipboard::new();
        let mut sync = SummarySync::new(
            CASE,
            BufferEditor::default(),
            Arc::clone(store),
            Box::new(clipboard.clone()),
            SyncSettings {
                actor: actor.to_string(),
                debounce: Duration::from_secs(10),
            },
        );
        let log = EventLog::new();
        let sub = log.attach(sync.events());
        sync.initialize(Some(Box::new(presence))).await.unwrap();

        Self {
            sync,
            inbox,
            clipboard,
            log,
            _sub: sub,
        }
    }

    /// Replace the editor text and report each resulting delta.
    async fn type_text(&mut self, text: &str) {
        let deltas = self.sync.editor_mut().type_text(text);
        for delta in deltas {
            self.sync.on_local_change(delta).await;
        }
    }

    /// Handle everything waiting in the inbox.
    async fn drain(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.inbox.try_recv() {
            self.sync.handle_presence(event).await.unwrap();
            handled += 1;
        }
        handled
    }

    fn text(&self) -> String {
        self.sync.editor().content()
    }

    fn conflicts(&self) -> usize {
        self.log
            .count(|e| matches!(e, SummaryEvent::Conflict { .. }))
    }
}

fn setup(text: &str) -> (LoopbackHub, Arc<InMemoryStore>) {
    (
        LoopbackHub::new(),
        Arc::new(InMemoryStore::with_case(CASE, text)),
    )
}

#[tokio::test]
async fn test_both_sessions_join_and_seed() {
    let (hub, store) = setup("# Case 12\nPhishing wave");
    let mut alice = Client::join(&hub, &store, "alice").await;
    let bob = Client::join(&hub, &store, "bob").await;

    assert_eq!(hub.subscriber_count("doc-12"), 2);
    assert_eq!(alice.text(), "# Case 12\nPhishing wave");
    assert_eq!(bob.text(), alice.text());

    // Alice hears bob join
    alice.drain().await;
    assert_eq!(
        alice.log.count(|e| matches!(
            e,
            SummaryEvent::PeerPresence { actor, joined: true, .. } if actor == "bob"
        )),
        1
    );
}

#[tokio::test]
async fn test_typing_is_mirrored_then_save_propagates() {
    let (hub, store) = setup("Timeline:");
    let mut alice = Client::join(&hub, &store, "alice").await;
    let mut bob = Client::join(&hub, &store, "bob").await;
    alice.drain().await;

    alice.type_text("Timeline: 09:14 first beacon").await;
    assert_eq!(alice.sync.state(), SyncState::Pending);

    bob.drain().await;
    assert_eq!(bob.text(), "Timeline: 09:14 first beacon");
    assert!(bob.log.count(|e| matches!(e, SummaryEvent::Typing { actor, .. } if actor == "alice")) >= 1);
    // Mirrored text is not bob's to save
    assert!(!bob.sync.reconcile_pending());

    let outcome = alice.sync.reconcile().await.unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Pushed(Checksum::of("Timeline: 09:14 first beacon"))
    );
    assert_eq!(store.get(CASE).unwrap().content, "Timeline: 09:14 first beacon");

    bob.drain().await;
    assert_eq!(bob.sync.state(), SyncState::Idle);
    assert_eq!(bob.sync.session().last_saved_by.as_deref(), Some("alice"));
    assert_eq!(
        bob.sync.session().last_known,
        alice.sync.session().last_known
    );
}

#[tokio::test]
async fn test_true_conflict_preserves_local_copy() {
    let (hub, store) = setup("base");
    hub.set_available(false);
    let mut alice = Client::join(&hub, &store, "alice").await;
    let mut bob = Client::join(&hub, &store, "bob").await;

    alice.type_text("base + alice").await;
    bob.type_text("base + bob").await;

    assert!(matches!(
        alice.sync.reconcile().await.unwrap(),
        ReconcileOutcome::Pushed(_)
    ));
    let outcome = bob.sync.reconcile().await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Conflict(Checksum::of("base + alice")));
    assert_eq!(bob.text(), "base + alice");
    assert_eq!(bob.clipboard.latest().as_deref(), Some("base + bob"));
    assert_eq!(bob.conflicts(), 1);
    assert_eq!(bob.sync.state(), SyncState::Conflict);
    assert_eq!(store.get(CASE).unwrap().content, "base + alice");

    // Reconciling again is a no-op, no second notice
    assert_eq!(bob.sync.reconcile().await.unwrap(), ReconcileOutcome::Unchanged);
    assert_eq!(bob.conflicts(), 1);
    assert_eq!(bob.sync.state(), SyncState::Idle);
    assert_eq!(alice.clipboard.writes(), 0);
}

#[tokio::test]
async fn test_repeated_noop_reconcile_is_idempotent() {
    let (hub, store) = setup("steady");
    let mut alice = Client::join(&hub, &store, "alice").await;

    for _ in 0..3 {
        let before = alice.sync.session().last_known;
        assert_eq!(
            alice.sync.reconcile().await.unwrap(),
            ReconcileOutcome::Unchanged
        );
        assert_eq!(alice.sync.session().last_known, before);
        assert_eq!(alice.text(), "steady");
        assert_eq!(alice.sync.state(), SyncState::Idle);
    }
    assert_eq!(store.update_count(), 0);
}

#[tokio::test]
async fn test_presence_down_does_not_block_sync() {
    let (hub, store) = setup("text");
    hub.set_available(false);
    let mut alice = Client::join(&hub, &store, "alice").await;

    assert!(!alice.sync.has_presence());
    assert_eq!(alice.text(), "text");

    alice.type_text("text, offline presence").await;
    assert!(matches!(
        alice.sync.reconcile().await.unwrap(),
        ReconcileOutcome::Pushed(_)
    ));
    assert_eq!(store.get(CASE).unwrap().content, "text, offline presence");
}

#[tokio::test]
async fn test_remote_clear_buffer() {
    let (hub, store) = setup("to be wiped");
    let mut alice = Client::join(&hub, &store, "alice").await;
    let mut bob = Client::join(&hub, &store, "bob").await;
    let checksum = bob.sync.session().last_known;

    alice.sync.clear_buffer().await;
    bob.drain().await;

    assert_eq!(alice.text(), "");
    assert_eq!(bob.text(), "");
    assert_eq!(bob.sync.session().last_known, checksum);
    assert_eq!(
        bob.log.count(|e| matches!(e, SummaryEvent::BufferCleared { .. })),
        1
    );
}

#[tokio::test]
async fn test_own_envelopes_ignored() {
    let (hub, store) = setup("abc");
    let mut alice = Client::join(&hub, &store, "alice").await;

    let own = PresenceEnvelope {
        channel: "doc-12".to_string(),
        sender: alice.sync.client_id().to_string(),
        actor: "alice".to_string(),
        message: PresenceMessage::ClearBuffer,
    };
    alice
        .sync
        .handle_presence(PresenceEvent::Message(own))
        .await
        .unwrap();
    assert_eq!(alice.text(), "abc");

    let other_channel = PresenceEnvelope {
        channel: "doc-99".to_string(),
        sender: "someone".to_string(),
        actor: "mallory".to_string(),
        message: PresenceMessage::ClearBuffer,
    };
    alice
        .sync
        .handle_presence(PresenceEvent::Message(other_channel))
        .await
        .unwrap();
    assert_eq!(alice.text(), "abc");
}

#[tokio::test]
async fn test_relayed_own_delta_not_reapplied() {
    let (hub, store) = setup("abc");
    let mut alice = Client::join(&hub, &store, "alice").await;

    alice.type_text("abcd").await;
    let published = alice.sync.editor().content();

    // A relay that rewrites the sender still carries our last delta
    let delta = summary_core::Delta::diff("abc", "abcd").remove(0);
    let relayed = PresenceEnvelope {
        channel: "doc-12".to_string(),
        sender: "relay".to_string(),
        actor: "alice".to_string(),
        message: PresenceMessage::Change { delta },
    };
    alice
        .sync
        .handle_presence(PresenceEvent::Message(relayed))
        .await
        .unwrap();

    assert_eq!(alice.text(), published);
}

#[tokio::test]
async fn test_transport_closed_detaches_presence() {
    let (hub, store) = setup("abc");
    let mut alice = Client::join(&hub, &store, "alice").await;
    assert!(alice.sync.has_presence());

    alice.sync.handle_presence(PresenceEvent::Closed).await.unwrap();
    assert!(!alice.sync.has_presence());

    // Store path unaffected
    store.write_direct(CASE, "abc + remote");
    assert!(matches!(
        alice.sync.reconcile().await.unwrap(),
        ReconcileOutcome::AdoptedRemote(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_keystrokes_coalesce_into_one_reconcile() {
    let (hub, store) = setup("");
    let mut alice = Client::join(&hub, &store, "alice").await;
    let start = tokio::time::Instant::now();

    let mut text = String::new();
    for word in ["ioc:", " 10.0.0.5", " beacon", " every", " 60s"] {
        text.push_str(word);
        alice.type_text(&text).await;
        tokio::time::advance(Duration::from_secs(2)).await;
    }
    // Last keystroke at t=8s
    alice.sync.reconcile_due().await;
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(18) && elapsed < Duration::from_secs(19));

    alice.sync.reconcile().await.unwrap();
    assert_eq!(store.update_count(), 1);
    assert_eq!(store.get(CASE).unwrap().content, "ioc: 10.0.0.5 beacon every 60s");
    assert!(!alice.sync.reconcile_pending());
}

#[tokio::test]
async fn test_error_then_recovery() {
    let (hub, store) = setup("v1");
    let mut alice = Client::join(&hub, &store, "alice").await;

    alice.type_text("v2").await;
    store.set_offline(true);
    assert!(alice.sync.reconcile().await.is_err());
    assert_eq!(alice.sync.state(), SyncState::Error);
    assert_eq!(
        alice.log.count(|e| matches!(
            e,
            SummaryEvent::StatusChanged { state: SyncState::Error, .. }
        )),
        1
    );

    store.set_offline(false);
    alice.type_text("v3").await;
    assert_eq!(
        alice.sync.reconcile().await.unwrap(),
        ReconcileOutcome::Pushed(Checksum::of("v3"))
    );
    assert_eq!(alice.sync.state(), SyncState::Idle);
}
