//! Event infrastructure for summary sync.
//!
//! `SummaryEvent`s are how a session reports UI state: the status indicator,
//! "last synced at", "last saved by", the conflict notice and typing hints.
//! `EventBus` fans them out to subscribers.

use crate::checksum::Checksum;
use crate::document::SyncState;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};
use web_time::{SystemTime, UNIX_EPOCH};

/// Current time in milliseconds since Unix epoch.
pub fn now_millis() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

/// Events emitted by a `SummarySync` session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SummaryEvent {
    /// Status indicator changed.
    StatusChanged {
        state: SyncState,
        /// Text for the indicator (e.g., "Syncing...", "Error saving").
        label: String,
    },
    /// A fetch or reconcile completed.
    Synced {
        checksum: Checksum,
        /// Milliseconds since Unix epoch.
        timestamp: f64,
    },
    /// Local text was pushed to the server.
    Saved {
        checksum: Checksum,
        /// Milliseconds since Unix epoch.
        timestamp: f64,
    },
    /// A peer saved and the server copy was adopted.
    RemoteSaved {
        actor: String,
        /// Milliseconds since Unix epoch.
        timestamp: f64,
    },
    /// Local and remote edits diverged; remote won.
    ///
    /// Blocking notice for the user. `local_copy` is the text that was put on
    /// the clipboard.
    Conflict {
        #[serde(rename = "localCopy")]
        local_copy: String,
        /// Whether the clipboard write succeeded.
        #[serde(rename = "savedToClipboard")]
        saved_to_clipboard: bool,
        /// Milliseconds since Unix epoch.
        timestamp: f64,
    },
    /// A peer is typing.
    Typing {
        actor: String,
        /// Milliseconds since Unix epoch.
        timestamp: f64,
    },
    /// A peer opened or closed the summary.
    PeerPresence {
        actor: String,
        joined: bool,
        /// Milliseconds since Unix epoch.
        timestamp: f64,
    },
    /// The editor was emptied by a clear request.
    BufferCleared {
        /// Milliseconds since Unix epoch.
        timestamp: f64,
    },
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Hold this value to keep receiving events, drop it to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(&SummaryEvent) + Send + Sync>;

/// Event bus for publishing session events to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
#[derive(Default)]
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&SummaryEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        let guard = if std::thread::panicking() {
            // Never block while unwinding
            self.callbacks.try_write().ok()
        } else {
            Some(self.callbacks.write().unwrap_or_else(|e| e.into_inner()))
        };
        if let Some(mut guard) = guard {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: SummaryEvent) {
        // Snapshot so a callback may subscribe without deadlocking
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(&event);
        }
    }
}

/// Collects events into a shared list. Handy for tests and log sinks.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<std::sync::Mutex<Vec<SummaryEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe this log to `bus`.
    pub fn attach(&self, bus: &Arc<EventBus>) -> Subscription {
        let events = Arc::clone(&self.events);
        bus.subscribe(move |event| {
            events
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(event.clone());
        })
    }

    pub fn events(&self) -> Vec<SummaryEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of recorded events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&SummaryEvent) -> bool) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| predicate(e))
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typing() -> SummaryEvent {
        SummaryEvent::Typing {
            actor: "alice".into(),
            timestamp: 1000.0,
        }
    }

    #[test]
    fn test_subscribe_and_emit() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let _sub = bus.subscribe(move |_event| {
            count_clone.fetch_add(1, Ordering::Relaxed);
        });

        bus.emit(typing());
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_subscription_unsubscribes_on_drop() {
        let bus = Arc::new(EventBus::new());
        let log = EventLog::new();

        {
            let _sub = log.attach(&bus);
            bus.emit(typing());
        }

        bus.emit(typing());
        assert_eq!(log.events().len(), 1);
    }

    #[test]
    fn test_drop_waits_for_concurrent_emit() {
        let bus = Arc::new(EventBus::new());
        let log = EventLog::new();
        let sub = log.attach(&bus);

        // Stand in for an emit snapshotting the list on another thread
        let reading = bus.callbacks.read().unwrap();
        let dropper = std::thread::spawn(move || drop(sub));
        std::thread::sleep(std::time::Duration::from_millis(50));
        drop(reading);
        dropper.join().unwrap();

        bus.emit(typing());
        assert!(log.events().is_empty());
    }

    #[test]
    fn test_subscription_dropped_from_callback() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let slot: Arc<std::sync::Mutex<Option<Subscription>>> = Arc::default();

        let count_clone = Arc::clone(&count);
        let slot_clone = Arc::clone(&slot);
        let sub = bus.subscribe(move |_event| {
            count_clone.fetch_add(1, Ordering::Relaxed);
            slot_clone.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(sub);

        bus.emit(typing());
        bus.emit(typing());
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_multiple_subscribers() {
        let bus = Arc::new(EventBus::new());
        let first = EventLog::new();
        let second = EventLog::new();
        let sub1 = first.attach(&bus);
        let _sub2 = second.attach(&bus);

        bus.emit(typing());
        drop(sub1);
        bus.emit(typing());

        assert_eq!(first.events().len(), 1);
        assert_eq!(second.events().len(), 2);
    }

    #[test]
    fn test_event_log_count() {
        let bus = Arc::new(EventBus::new());
        let log = EventLog::new();
        let _sub = log.attach(&bus);

        bus.emit(typing());
        bus.emit(SummaryEvent::BufferCleared { timestamp: 1.0 });

        assert_eq!(
            log.count(|e| matches!(e, SummaryEvent::BufferCleared { .. })),
            1
        );
        log.clear();
        assert!(log.events().is_empty());
    }

    #[test]
    fn test_event_serialization() {
        let event = SummaryEvent::Conflict {
            local_copy: "mine".into(),
            saved_to_clipboard: true,
            timestamp: 1234567890.0,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"conflict\""));
        assert!(json.contains("\"localCopy\":\"mine\""));
        assert!(json.contains("\"savedToClipboard\":true"));
    }

    #[test]
    fn test_status_serialization() {
        let event = SummaryEvent::StatusChanged {
            state: SyncState::Error,
            label: SyncState::Error.label().to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"statusChanged\""));
        assert!(json.contains("\"state\":\"error\""));
        assert!(json.contains("\"label\":\"Error saving\""));
    }

    #[test]
    fn test_now_millis_is_recent() {
        // After 2020-01-01
        assert!(now_millis() > 1_577_836_800_000.0);
    }
}
