// =============================================================================
// Upstream feed adapter - normalized market events
// =============================================================================

pub mod rest;
pub mod stream;

pub use rest::UpstreamRestClient;

use crate::types::{Candle, Timeframe};

/// A normalized market event produced by the upstream feed adapter and
/// consumed by the dispatcher. Timestamps are ms epoch, taken from the
/// upstream event time.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Price {
        symbol: String,
        price: f64,
        volume: Option<f64>,
        timestamp: i64,
    },
    Kline {
        symbol: String,
        interval: Timeframe,
        kline: Candle,
    },
    OrderBook {
        symbol: String,
        bids: Vec<[f64; 2]>,
        asks: Vec<[f64; 2]>,
    },
    Trade {
        symbol: String,
        price: f64,
        quantity: f64,
        is_buyer_maker: bool,
    },
}

impl FeedEvent {
    /// The symbol this event concerns.
    pub fn symbol(&self) -> &str {
        match self {
            Self::Price { symbol, .. }
            | Self::Kline { symbol, .. }
            | Self::OrderBook { symbol, .. }
            | Self::Trade { symbol, .. } => symbol,
        }
    }
}
