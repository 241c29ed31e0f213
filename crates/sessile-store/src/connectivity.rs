//! Connectivity state machine and lifecycle notifications.
//!
//! ```text
//!              connect(repo) / emit(Connect)
//!   Disconnected ─────────────────────────────▶ Connected
//!        ▲                                          │
//!        └──────── operation failure / emit(Disconnect) ┘
//! ```
//!
//! The store starts disconnected. There is no automatic reconnection: the
//! caller re-establishes the backing connection and re-binds it (or a custom
//! error handler re-emits [`StoreEvent::Connect`]).

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::repository::SessionRepository;

/// Capacity of the lifecycle event channel.
const EVENT_CAPACITY: usize = 64;

/// Whether the store currently has a usable repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// A repository is bound and the last operation did not fail.
    Connected,
    /// No repository bound, or the last operation failed.
    Disconnected,
}

/// Lifecycle notification observed by the session middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// The store is usable.
    Connect,
    /// The store failed and should be treated as unavailable.
    Disconnect {
        /// Failure that caused the transition, if any.
        reason: Option<String>,
    },
}

/// Repository binding, current state and the event channel.
pub(crate) struct Connectivity {
    repository: RwLock<Option<Arc<dyn SessionRepository>>>,
    state: RwLock<ConnectionState>,
    events: broadcast::Sender<StoreEvent>,
}

impl Connectivity {
    pub(crate) fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            repository: RwLock::new(None),
            state: RwLock::new(ConnectionState::Disconnected),
            events,
        }
    }

    /// Bind a repository and announce the connection.
    pub(crate) fn bind(&self, repository: Arc<dyn SessionRepository>) {
        *self.repository.write() = Some(repository);
        info!("Session store connected");
        self.emit(StoreEvent::Connect);
    }

    /// Unbind the repository, handing it back to the caller.
    pub(crate) fn unbind(&self) -> Option<Arc<dyn SessionRepository>> {
        let repository = self.repository.write().take();
        if repository.is_some() {
            info!("Session store disconnected by caller");
            self.emit(StoreEvent::Disconnect { reason: None });
        }
        repository
    }

    /// The bound repository.
    pub(crate) fn repository(&self) -> Result<Arc<dyn SessionRepository>> {
        self.repository
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or(StoreError::NotConnected)
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub(crate) fn mark_disconnected(&self) {
        *self.state.write() = ConnectionState::Disconnected;
    }

    /// Update the state to match `event` and broadcast it.
    pub(crate) fn emit(&self, event: StoreEvent) {
        let next = match event {
            StoreEvent::Connect => ConnectionState::Connected,
            StoreEvent::Disconnect { .. } => ConnectionState::Disconnected,
        };
        *self.state.write() = next;

        // No subscribers is fine; the state above is still tracked.
        if self.events.send(event).is_err() {
            debug!(state = ?next, "No subscribers for store event");
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

/// Middleware-side readiness flag driven by [`StoreEvent`]s.
///
/// Ready after `Connect`, not ready after `Disconnect`. Events are drained
/// synchronously by [`observe`](Self::observe), typically once per request.
#[derive(Debug)]
pub struct ReadinessGate {
    events: broadcast::Receiver<StoreEvent>,
    ready: bool,
}

impl ReadinessGate {
    /// Create a gate over an event receiver with an initial readiness.
    pub fn new(events: broadcast::Receiver<StoreEvent>, ready: bool) -> Self {
        Self { events, ready }
    }

    /// Apply every pending event and return the resulting readiness.
    pub fn observe(&mut self) -> bool {
        loop {
            match self.events.try_recv() {
                Ok(StoreEvent::Connect) => self.ready = true,
                Ok(StoreEvent::Disconnect { .. }) => self.ready = false,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    debug!(skipped, "Readiness gate lagged behind store events");
                }
                Err(broadcast::error::TryRecvError::Empty) => break,
                Err(broadcast::error::TryRecvError::Closed) => {
                    self.ready = false;
                    break;
                }
            }
        }
        self.ready
    }

    /// Readiness as of the last [`observe`](Self::observe).
    pub fn is_ready(&self) -> bool {
        self.ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteSessionRepository;

    fn repo() -> Arc<dyn SessionRepository> {
        Arc::new(SqliteSessionRepository::open_in_memory().unwrap())
    }

    #[test]
    fn test_starts_disconnected() {
        let conn = Connectivity::new();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(matches!(conn.repository(), Err(StoreError::NotConnected)));
    }

    #[test]
    fn test_bind_emits_connect() {
        let conn = Connectivity::new();
        let mut rx = conn.subscribe();

        conn.bind(repo());

        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(rx.try_recv().unwrap(), StoreEvent::Connect);
        assert!(conn.repository().is_ok());
    }

    #[test]
    fn test_unbind_returns_repository() {
        let conn = Connectivity::new();
        conn.bind(repo());
        let mut rx = conn.subscribe();

        assert!(conn.unbind().is_some());
        assert!(conn.unbind().is_none());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(
            rx.try_recv().unwrap(),
            StoreEvent::Disconnect { reason: None }
        );
    }

    #[test]
    fn test_emit_tracks_state_without_subscribers() {
        let conn = Connectivity::new();
        conn.emit(StoreEvent::Connect);
        assert_eq!(conn.state(), ConnectionState::Connected);

        conn.mark_disconnected();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_readiness_gate_follows_events() {
        let conn = Connectivity::new();
        let mut gate = ReadinessGate::new(conn.subscribe(), false);
        assert!(!gate.observe());

        conn.bind(repo());
        assert!(gate.observe());

        conn.emit(StoreEvent::Disconnect {
            reason: Some("boom".into()),
        });
        conn.emit(StoreEvent::Connect);
        conn.emit(StoreEvent::Disconnect { reason: None });
        assert!(!gate.observe());
        assert!(!gate.is_ready());
    }

    #[test]
    fn test_readiness_gate_closed_channel() {
        let conn = Connectivity::new();
        let mut gate = ReadinessGate::new(conn.subscribe(), true);
        drop(conn);
        assert!(!gate.observe());
    }
}
