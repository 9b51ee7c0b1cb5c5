// =============================================================================
// Tickermux - real-time market-data synchronization gateway
// =============================================================================
//
// Server side: a WebSocket distribution endpoint that multiplexes upstream
// market events to many sessions, each choosing its own symbols and
// timeframes, plus the REST bulk-load API.
//
// Client side: a reconnecting session connection, a reconciling market store
// (ordered, de-duplicated, capped candle series; last-write-wins snapshots)
// and a tracked-symbol limiter.
// =============================================================================

pub mod client;
pub mod error;
pub mod feed;
pub mod protocol;
pub mod server;
pub mod settings;
pub mod symbols;
pub mod types;
