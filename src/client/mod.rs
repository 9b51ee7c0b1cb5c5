// =============================================================================
// Market client - ties connection, store, tracker and bulk loads together
// =============================================================================

pub mod api;
pub mod connection;
pub mod store;
pub mod tracker;

pub use api::ApiClient;
pub use connection::{ConnectionConfig, ConnectionHandle, ConnectionStatus, SessionConnection};
pub use store::{MarketStore, SeriesKey, StoreChange};
pub use tracker::{SymbolHandle, SymbolTracker};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::protocol::ServerMessage;
use crate::types::Timeframe;

/// Client-side configuration. Every knob the synchronization layer names is
/// overridable here; the defaults mirror the server settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Gateway REST base, e.g. `http://127.0.0.1:8000`.
    pub rest_url: String,
    /// Gateway WebSocket base, e.g. `ws://127.0.0.1:8000`.
    pub ws_url: String,
    /// Generated client identifier; becomes part of the connection target.
    pub client_id: String,
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    pub max_tracked_symbols: usize,
    pub candle_series_cap: usize,
}

impl ClientConfig {
    pub fn new(rest_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            rest_url: rest_url.into(),
            ws_url: ws_url.into(),
            client_id: uuid::Uuid::new_v4().to_string(),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
            max_tracked_symbols: 10,
            candle_series_cap: 100,
        }
    }

    /// The session's full WebSocket endpoint.
    pub fn endpoint_url(&self) -> String {
        format!(
            "{}/ws/{}",
            self.ws_url.trim_end_matches('/'),
            self.client_id
        )
    }
}

/// One client session: a reconnecting connection, the reconciling store, and
/// the tracked-symbol limiter.
pub struct MarketClient {
    config: ClientConfig,
    api: ApiClient,
    store: Arc<MarketStore>,
    conn: ConnectionHandle,
    tracker: SymbolTracker,
}

impl MarketClient {
    /// Spawn the session connection and the store-routing task.
    pub fn connect(config: ClientConfig) -> Self {
        let store = Arc::new(MarketStore::new(config.candle_series_cap));

        let conn = SessionConnection::spawn(ConnectionConfig {
            url: config.endpoint_url(),
            heartbeat_interval: config.heartbeat_interval,
            reconnect_delay: config.reconnect_delay,
        });

        let tracker = SymbolTracker::new(config.max_tracked_symbols, conn.clone());
        let api = ApiClient::new(config.rest_url.clone());

        tokio::spawn(route_events(conn.events(), store.clone()));

        Self {
            config,
            api,
            store,
            conn,
            tracker,
        }
    }

    /// Track a symbol: enforce the cap, subscribe, then bulk-load the
    /// snapshot and one candle history per timeframe into the store.
    ///
    /// Bulk loads are best-effort: a failed load leaves the series to be
    /// filled by push updates and is retried on explicit reload.
    pub async fn track_symbol(
        &self,
        symbol: &str,
        timeframes: BTreeSet<Timeframe>,
    ) -> Result<SymbolHandle, SyncError> {
        let handle = self.tracker.add_symbol(symbol, timeframes.clone())?;

        match self.api.market_data(symbol).await {
            Ok(snapshot) => {
                self.store.set_snapshot(snapshot);
            }
            Err(e) => warn!(symbol = %symbol, error = %e, "snapshot bulk load failed"),
        }

        for timeframe in timeframes {
            match self
                .api
                .klines(symbol, timeframe, self.config.candle_series_cap)
                .await
            {
                Ok(candles) => {
                    debug!(symbol = %symbol, timeframe = %timeframe, count = candles.len(), "series loaded");
                    self.store.apply_snapshot(symbol, timeframe, candles);
                }
                Err(e) => {
                    warn!(symbol = %symbol, timeframe = %timeframe, error = %e, "kline bulk load failed");
                }
            }
        }

        Ok(handle)
    }

    /// Stop tracking a symbol and release its slot.
    pub fn untrack_symbol(&self, handle: &SymbolHandle) {
        self.tracker.remove_symbol(handle);
    }

    /// Close the session: terminal, cancels heartbeat and reconnects.
    pub fn close(&self) {
        self.conn.close();
    }

    pub fn store(&self) -> &Arc<MarketStore> {
        &self.store
    }

    pub fn tracker(&self) -> &SymbolTracker {
        &self.tracker
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.conn
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }
}

/// Forward pushed data events into the store until the session ends.
async fn route_events(mut rx: broadcast::Receiver<ServerMessage>, store: Arc<MarketStore>) {
    loop {
        match rx.recv().await {
            Ok(ServerMessage::PriceUpdate {
                symbol,
                price,
                volume,
                timestamp,
            }) => {
                store.apply_price_update(&symbol, price, volume, timestamp);
            }
            Ok(ServerMessage::KlineUpdate {
                symbol,
                interval,
                kline,
                ..
            }) => {
                store.apply_candle_update(&symbol, interval, kline);
            }
            // Confirmations, pong and depth/trade passthrough carry no store
            // state; consumers read them from the connection's event stream.
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "store router lagged behind the event stream");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
