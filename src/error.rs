// =============================================================================
// Error taxonomy for the synchronization layer
// =============================================================================
//
// Propagation policy: transport failures are fully recovered inside the
// connection manager and reach consumers only as a connectivity-state signal.
// Data-merge anomalies (stale or malformed events) are recovered locally and
// never abort the store. `LimitExceeded` is the only synchronous,
// caller-visible failure. Nothing in this crate is fatal to the process.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Connection refused or dropped. Triggers a reconnect, never fatal.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Malformed or unrecognized control message. The single message is
    /// discarded; the connection stays up.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The tracked-symbol cap was reached. Surfaced to the caller of
    /// `add_symbol`; no subscription is performed and there is no retry.
    #[error("tracked-symbol limit of {0} reached")]
    LimitExceeded(usize),

    /// Event timestamp not newer than the stored state. Discarded and
    /// counted by the store, never surfaced to consumers.
    #[error("stale event for {symbol}: {event_ts} <= {stored_ts}")]
    Stale {
        symbol: String,
        event_ts: i64,
        stored_ts: i64,
    },

    /// Routing lookup matched a session that no longer exists, which means
    /// the session already disconnected. Treated as a no-op.
    #[error("unknown session {0}")]
    UnknownSession(String),
}
