// =============================================================================
// Shared gateway state
// =============================================================================
//
// One AppState is shared across the REST handlers, the per-session WebSocket
// pumps and the feed dispatcher via Arc. Registry and session map are
// independently locked; neither lock is ever held across an await point.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::feed::UpstreamRestClient;
use crate::server::registry::{SessionSubscriptions, SubscriptionRegistry};
use crate::server::session::OutboundQueue;
use crate::settings::Settings;
use crate::symbols::SymbolDirectory;

pub struct AppState {
    pub settings: Settings,
    pub registry: SubscriptionRegistry,
    pub symbols: Arc<SymbolDirectory>,
    pub upstream: UpstreamRestClient,

    sessions: RwLock<HashMap<String, Arc<OutboundQueue>>>,

    /// Feed events routed to at least one session.
    pub events_dispatched: AtomicU64,

    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let upstream = UpstreamRestClient::new(settings.upstream_rest_url.clone());
        Self {
            settings,
            registry: SubscriptionRegistry::new(),
            symbols: Arc::new(SymbolDirectory::new()),
            upstream,
            sessions: RwLock::new(HashMap::new()),
            events_dispatched: AtomicU64::new(0),
            start_time: std::time::Instant::now(),
        }
    }

    /// Create and register the outbound queue for a connecting session.
    ///
    /// A reconnect under the same id replaces the old queue; the stale pump
    /// observes its queue closing and exits.
    pub fn register_session(&self, session_id: &str) -> Arc<OutboundQueue> {
        let queue = Arc::new(OutboundQueue::new(
            session_id,
            self.settings.outbound_queue_size,
        ));

        let replaced = self
            .sessions
            .write()
            .insert(session_id.to_string(), queue.clone());

        if let Some(old) = replaced {
            debug!(session = %session_id, "session id reconnected, closing stale queue");
            old.close();
        }

        queue
    }

    /// Remove a session's queue, unless the id has already been re-registered
    /// by a newer connection.
    pub fn remove_session(&self, session_id: &str, queue: &Arc<OutboundQueue>) {
        let mut sessions = self.sessions.write();
        if let Some(current) = sessions.get(session_id) {
            if Arc::ptr_eq(current, queue) {
                sessions.remove(session_id);
            }
        }
    }

    pub fn session_queue(&self, session_id: &str) -> Option<Arc<OutboundQueue>> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Snapshot of all session queues for the dispatcher's fan-out pass.
    pub fn session_queues(&self) -> HashMap<String, Arc<OutboundQueue>> {
        self.sessions.read().clone()
    }

    /// Build the payload for `GET /api/v1/ws/status`.
    pub fn build_ws_status(&self) -> WsStatus {
        let sessions = self.sessions.read();

        let mut queues: Vec<SessionQueueStatus> = sessions
            .values()
            .map(|q| SessionQueueStatus {
                session_id: q.session_id().to_string(),
                queued: q.len(),
                dropped: q.dropped_count(),
            })
            .collect();
        queues.sort_by(|a, b| a.session_id.cmp(&b.session_id));

        WsStatus {
            total_sessions: sessions.len(),
            total_subscriptions: self.registry.total_subscriptions(),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            subscriptions: self.registry.summary(),
            queues,
        }
    }
}

/// Connection status payload for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct WsStatus {
    pub total_sessions: usize,
    pub total_subscriptions: usize,
    pub events_dispatched: u64,
    pub subscriptions: Vec<SessionSubscriptions>,
    pub queues: Vec<SessionQueueStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionQueueStatus {
    pub session_id: String,
    pub queued: usize,
    pub dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_replaces_and_closes_stale_queue() {
        let state = AppState::new(Settings::default());

        let first = state.register_session("s1");
        let second = state.register_session("s1");

        assert_eq!(state.session_count(), 1);
        // The stale queue is closed: pushes are ignored.
        first.push(crate::protocol::ServerMessage::Pong { timestamp: 1 });
        assert!(first.is_empty());
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn remove_session_keeps_newer_registration() {
        let state = AppState::new(Settings::default());

        let first = state.register_session("s1");
        let second = state.register_session("s1");

        // The stale pump cleaning up must not evict the newer queue.
        state.remove_session("s1", &first);
        assert_eq!(state.session_count(), 1);

        state.remove_session("s1", &second);
        assert_eq!(state.session_count(), 0);
    }
}
