//! SummarySync: keeps one editor converged with the server's case summary.
//!
//! Two paths with different guarantees:
//! - The store path is authoritative. Every reconcile compares checksums so
//!   a server copy is never overwritten without noticing a concurrent save.
//! - The presence path is advisory. Raw deltas are mirrored to show who is
//!   typing and save notices prompt a refetch; both may be lost.
//!
//! A session is owned by whatever drives the editor and is passed around
//! explicitly. All I/O goes through the injected capabilities.

use crate::checksum::Checksum;
use crate::clipboard::Clipboard;
use crate::debounce::Debouncer;
use crate::decision::{decide, ReconcileAction};
use crate::delta::Delta;
use crate::document::{SyncSession, SyncState};
use crate::editor::{Editor, EditorError};
use crate::events::{now_millis, EventBus, SummaryEvent};
use crate::presence::{
    channel_name, PresenceEnvelope, PresenceEvent, PresenceMessage, PresenceTransport,
};
use crate::store::{CaseId, DocumentStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Editor error: {0}")]
    Editor(#[from] EditorError),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Per-session settings.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Display name announced to peers
    pub actor: String,
    /// Quiet period after the last edit before reconciling
    pub debounce: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            actor: "anonymous".to_string(),
            debounce: crate::debounce::DEFAULT_DEBOUNCE,
        }
    }
}

/// Result of a successful reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing changed on either side
    Unchanged,
    /// Local text pushed; server returned this checksum
    Pushed(Checksum),
    /// Remote text adopted silently
    AdoptedRemote(Checksum),
    /// Both sides had changed; remote text adopted, local text preserved
    Conflict(Checksum),
    /// Both sides already held the same text
    Converged(Checksum),
}

/// One editor's synchronization session for a case summary.
pub struct SummarySync<E: Editor, S: DocumentStore> {
    case_id: CaseId,
    channel: String,
    client_id: String,
    actor: String,
    editor: E,
    store: S,
    clipboard: Box<dyn Clipboard>,
    presence: Option<Box<dyn PresenceTransport>>,
    session: SyncSession,
    debouncer: Debouncer,
    events: Arc<EventBus>,
    /// Last remote delta applied to the editor (echo guard for editors that
    /// report every modification as a change). Consumed by the first match.
    last_applied_delta: Option<Delta>,
    /// Last delta this session published (guard against relays echoing it).
    /// Consumed by the first match.
    last_published_delta: Option<Delta>,
}

impl<E: Editor, S: DocumentStore> SummarySync<E, S> {
    pub fn new(
        case_id: CaseId,
        editor: E,
        store: S,
        clipboard: Box<dyn Clipboard>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            case_id,
            channel: channel_name(case_id),
            client_id: Uuid::new_v4().to_string(),
            actor: settings.actor,
            editor,
            store,
            clipboard,
            presence: None,
            session: SyncSession::default(),
            debouncer: Debouncer::new(settings.debounce),
            events: Arc::new(EventBus::new()),
            last_applied_delta: None,
            last_published_delta: None,
        }
    }

    pub fn case_id(&self) -> CaseId {
        self.case_id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Session id used as `sender` on presence envelopes.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn editor(&self) -> &E {
        &self.editor
    }

    /// Mutable editor access for the owner's local edits.
    ///
    /// Follow up with `on_local_change` or `on_local_edit`.
    pub fn editor_mut(&mut self) -> &mut E {
        &mut self.editor
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn session(&self) -> &SyncSession {
        &self.session
    }

    pub fn state(&self) -> SyncState {
        self.session.state
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn has_presence(&self) -> bool {
        self.presence.is_some()
    }

    pub fn reconcile_pending(&self) -> bool {
        self.debouncer.is_pending()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Join the presence channel (if a transport is given) and seed the
    /// editor from the server.
    ///
    /// A transport that fails to join is dropped; the session keeps syncing
    /// without presence.
    pub async fn initialize(
        &mut self,
        presence: Option<Box<dyn PresenceTransport>>,
    ) -> Result<Checksum> {
        if let Some(transport) = presence {
            self.attach_presence(transport).await;
        }
        self.fetch_and_replace().await
    }

    /// Join the channel on `transport` and use it for presence.
    ///
    /// Returns false (and drops the transport) if joining fails.
    pub async fn attach_presence(&mut self, transport: Box<dyn PresenceTransport>) -> bool {
        if let Err(e) = transport.join(&self.channel).await {
            warn!(
                "Presence unavailable for {}, continuing without it: {}",
                self.channel, e
            );
            return false;
        }
        info!("Joined presence channel {}", self.channel);
        self.presence = Some(transport);
        self.publish(PresenceMessage::Join).await;
        true
    }

    /// Forget the presence transport after it lost its connection.
    pub fn detach_presence(&mut self) {
        if self.presence.take().is_some() {
            warn!("Presence channel {} lost", self.channel);
        }
    }

    /// Announce departure and leave the presence channel.
    pub async fn close(&mut self) {
        self.debouncer.cancel();
        self.publish(PresenceMessage::Leave).await;
        if let Some(transport) = self.presence.take() {
            if let Err(e) = transport.leave(&self.channel).await {
                debug!("Failed to leave {}: {}", self.channel, e);
            }
        }
    }

    // ------------------------------------------------------------------
    // Store path
    // ------------------------------------------------------------------

    /// Overwrite the editor with the server copy, no questions asked.
    ///
    /// Used on startup and after a peer's save notice, when there is no
    /// local state worth keeping.
    pub async fn fetch_and_replace(&mut self) -> Result<Checksum> {
        self.set_state(SyncState::Syncing);

        let remote = match self.store.fetch(self.case_id).await {
            Ok(doc) => doc,
            Err(e) => return Err(self.fail(e.into())),
        };
        if let Err(e) = self.editor.set_content(&remote.content) {
            return Err(self.fail(e.into()));
        }

        self.debouncer.cancel();
        self.clear_echo_guards();
        self.session.last_known = Some(remote.checksum);
        debug!(
            "Replaced summary of case {} with server copy ({})",
            self.case_id, remote.checksum
        );
        self.mark_synced(remote.checksum);
        self.set_state(SyncState::Idle);
        Ok(remote.checksum)
    }

    /// Reconcile local and server copies using the checksum decision table.
    ///
    /// Cancels any scheduled reconcile. On failure the state becomes `Error`
    /// and nothing is retried until the next edit or explicit call.
    pub async fn reconcile(&mut self) -> Result<ReconcileOutcome> {
        self.debouncer.cancel();
        self.clear_echo_guards();
        self.set_state(SyncState::Syncing);

        let remote = match self.store.fetch(self.case_id).await {
            Ok(doc) => doc,
            Err(e) => return Err(self.fail(e.into())),
        };
        let local = self.editor.content();
        let local_checksum = Checksum::of(&local);
        let action = decide(self.session.last_known, remote.checksum, local_checksum);

        debug!(
            "Reconcile case {}: last_known={:?} remote={} local={} -> {:?}",
            self.case_id, self.session.last_known, remote.checksum, local_checksum, action
        );

        let outcome = match action {
            ReconcileAction::Noop => ReconcileOutcome::Unchanged,
            ReconcileAction::AlreadyConverged => {
                self.session.last_known = Some(remote.checksum);
                ReconcileOutcome::Converged(remote.checksum)
            }
            ReconcileAction::PushLocal => {
                let checksum = match self.store.update(self.case_id, &local).await {
                    Ok(checksum) => checksum,
                    Err(e) => return Err(self.fail(e.into())),
                };
                if checksum != local_checksum {
                    warn!(
                        "Server stored checksum {} for case {}, expected {}",
                        checksum, self.case_id, local_checksum
                    );
                }
                self.session.last_known = Some(checksum);
                info!("Saved summary of case {} ({})", self.case_id, checksum);
                self.events.emit(SummaryEvent::Saved {
                    checksum,
                    timestamp: now_millis(),
                });
                self.publish(PresenceMessage::Save).await;
                ReconcileOutcome::Pushed(checksum)
            }
            ReconcileAction::AdoptRemote => {
                if let Err(e) = self.editor.set_content(&remote.content) {
                    return Err(self.fail(e.into()));
                }
                self.session.last_known = Some(remote.checksum);
                info!(
                    "Adopted server summary of case {} ({})",
                    self.case_id, remote.checksum
                );
                ReconcileOutcome::AdoptedRemote(remote.checksum)
            }
            ReconcileAction::Conflict => {
                let saved_to_clipboard = match self.clipboard.write_text(&local) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Could not preserve local summary text: {}", e);
                        false
                    }
                };
                if let Err(e) = self.editor.set_content(&remote.content) {
                    return Err(self.fail(e.into()));
                }
                self.session.last_known = Some(remote.checksum);
                warn!(
                    "Conflict on case {}: server copy changed while editing, local text {}",
                    self.case_id,
                    if saved_to_clipboard {
                        "copied to clipboard"
                    } else {
                        "could not be copied"
                    }
                );
                self.events.emit(SummaryEvent::Conflict {
                    local_copy: local,
                    saved_to_clipboard,
                    timestamp: now_millis(),
                });
                ReconcileOutcome::Conflict(remote.checksum)
            }
        };

        let checksum = self.session.last_known.unwrap_or(remote.checksum);
        self.mark_synced(checksum);
        self.set_state(match outcome {
            ReconcileOutcome::Conflict(_) => SyncState::Conflict,
            _ => SyncState::Idle,
        });
        Ok(outcome)
    }

    /// Wait until the debounce timer fires. Pends forever when no
    /// reconcile is scheduled, so it can sit in a `select!` loop.
    pub async fn reconcile_due(&mut self) {
        self.debouncer.fired().await;
    }

    // ------------------------------------------------------------------
    // Local edits
    // ------------------------------------------------------------------

    /// The editor reported a change described by `delta`.
    ///
    /// Publishes the delta as a typing hint, then schedules a reconcile.
    /// The first delta equal to the last remote delta we applied is the
    /// editor echoing our own patch and is ignored.
    pub async fn on_local_change(&mut self, delta: Delta) {
        if self.last_applied_delta.as_ref() == Some(&delta) {
            self.last_applied_delta = None;
            debug!("Ignoring echo of applied remote delta");
            return;
        }
        self.publish(PresenceMessage::Change {
            delta: delta.clone(),
        })
        .await;
        self.last_published_delta = Some(delta);
        self.on_local_edit();
    }

    /// The editor text changed (no delta available). Schedules a reconcile.
    pub fn on_local_edit(&mut self) {
        if self.session.is_reconciled(&self.editor.content()) {
            // Edit reverted back to the reconciled text
            self.debouncer.cancel();
            self.set_state(SyncState::Idle);
            return;
        }
        self.debouncer.touch();
        self.set_state(SyncState::Pending);
    }

    /// Empty the editor locally and ask every peer to do the same.
    pub async fn clear_buffer(&mut self) {
        self.on_clear_buffer();
        self.publish(PresenceMessage::ClearBuffer).await;
    }

    // ------------------------------------------------------------------
    // Presence path
    // ------------------------------------------------------------------

    /// Dispatch an event from the presence transport.
    pub async fn handle_presence(&mut self, event: PresenceEvent) -> Result<()> {
        let envelope = match event {
            PresenceEvent::Message(envelope) => envelope,
            PresenceEvent::Closed => {
                self.detach_presence();
                return Ok(());
            }
        };

        if envelope.channel != self.channel || envelope.sender == self.client_id {
            return Ok(());
        }

        match envelope.message {
            PresenceMessage::Change { delta } => {
                self.on_remote_change(&envelope.sender, &envelope.actor, delta);
            }
            PresenceMessage::ClearBuffer => self.on_clear_buffer(),
            PresenceMessage::Save => {
                self.on_remote_save(&envelope.actor).await?;
            }
            PresenceMessage::Join | PresenceMessage::Leave => {
                let joined = envelope.message == PresenceMessage::Join;
                debug!(
                    "{} {} {}",
                    envelope.actor,
                    if joined { "joined" } else { "left" },
                    self.channel
                );
                self.events.emit(SummaryEvent::PeerPresence {
                    actor: envelope.actor,
                    joined,
                    timestamp: now_millis(),
                });
            }
        }
        Ok(())
    }

    /// Mirror a peer's delta into the editor. Best effort: a delta that
    /// does not fit the local text is dropped.
    ///
    /// Returns whether the delta was applied.
    pub fn on_remote_change(&mut self, sender: &str, actor: &str, delta: Delta) -> bool {
        if sender == self.client_id {
            return false;
        }
        if self.last_published_delta.as_ref() == Some(&delta) {
            self.last_published_delta = None;
            debug!("Ignoring echo of our own delta");
            return false;
        }

        if let Err(e) = self.editor.apply_delta(&delta) {
            debug!("Dropping delta from {}: {}", actor, e);
            return false;
        }
        self.last_applied_delta = Some(delta);

        if !self.session.is_reconciled(&self.editor.content())
            && self.session.state == SyncState::Idle
        {
            // Peer's unsaved text; their save notice will bring us back
            self.set_state(SyncState::Pending);
        }
        self.events.emit(SummaryEvent::Typing {
            actor: actor.to_string(),
            timestamp: now_millis(),
        });
        true
    }

    /// A peer saved: take the server copy.
    pub async fn on_remote_save(&mut self, actor: &str) -> Result<Checksum> {
        info!("{} saved the summary of case {}", actor, self.case_id);
        self.session.last_saved_by = Some(actor.to_string());
        self.events.emit(SummaryEvent::RemoteSaved {
            actor: actor.to_string(),
            timestamp: now_millis(),
        });
        self.fetch_and_replace().await
    }

    /// Empty the editor. `last_known` is left alone until the next reconcile.
    pub fn on_clear_buffer(&mut self) {
        if let Err(e) = self.editor.set_content("") {
            warn!("Failed to clear summary editor: {}", e);
            return;
        }
        info!("Summary editor of case {} cleared", self.case_id);
        self.events.emit(SummaryEvent::BufferCleared {
            timestamp: now_millis(),
        });
        if !self.session.is_reconciled("") {
            self.set_state(SyncState::Pending);
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn publish(&self, message: PresenceMessage) {
        let Some(transport) = &self.presence else {
            return;
        };
        let kind = message.kind();
        let envelope = PresenceEnvelope {
            channel: self.channel.clone(),
            sender: self.client_id.clone(),
            actor: self.actor.clone(),
            message,
        };
        if let Err(e) = transport.publish(&envelope).await {
            debug!("Failed to publish {} on {}: {}", kind, self.channel, e);
        }
    }

    /// Edits from before a reconcile can no longer echo back.
    fn clear_echo_guards(&mut self) {
        self.last_applied_delta = None;
        self.last_published_delta = None;
    }

    fn mark_synced(&mut self, checksum: Checksum) {
        let timestamp = now_millis();
        self.session.last_synced_at = Some(timestamp);
        self.events.emit(SummaryEvent::Synced {
            checksum,
            timestamp,
        });
    }

    fn fail(&mut self, error: SyncError) -> SyncError {
        warn!("Sync of case {} failed: {}", self.case_id, error);
        self.set_state(SyncState::Error);
        error
    }

    fn set_state(&mut self, state: SyncState) {
        if self.session.state == state {
            return;
        }
        debug!("Case {} sync state: {} -> {}", self.case_id, self.session.state, state);
        self.session.state = state;
        self.events.emit(SummaryEvent::StatusChanged {
            state,
            label: state.label().to_string(),
        });
    }
}
