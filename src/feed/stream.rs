// =============================================================================
// Upstream WebSocket feed - combined stream per symbol
// =============================================================================
//
// One connection per symbol carries the ticker, aggTrade, partial-depth and
// kline streams for every configured timeframe. Messages are parsed into
// normalized FeedEvents and pushed into the dispatcher's channel.
//
// Runs until the stream disconnects or an error occurs, then returns so that
// the caller (main.rs) can handle reconnection at the fixed delay.
// =============================================================================

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

use crate::protocol::now_ms;
use crate::types::{Candle, Timeframe};

use super::FeedEvent;

/// Build the combined-stream URL for one symbol and its kline timeframes.
pub fn build_stream_url(base: &str, symbol: &str, timeframes: &[Timeframe]) -> String {
    let lower = symbol.to_lowercase();
    let mut streams = vec![
        format!("{lower}@ticker"),
        format!("{lower}@aggTrade"),
        format!("{lower}@depth20@100ms"),
    ];
    for tf in timeframes {
        streams.push(format!("{lower}@kline_{tf}"));
    }
    format!(
        "{}/stream?streams={}",
        base.trim_end_matches('/'),
        streams.join("/")
    )
}

/// Connect the combined stream for a single symbol and feed events into `tx`.
pub async fn run_symbol_feed(
    base_url: &str,
    symbol: &str,
    timeframes: &[Timeframe],
    tx: &mpsc::Sender<FeedEvent>,
) -> Result<()> {
    let url = build_stream_url(base_url, symbol, timeframes);
    info!(url = %url, symbol = %symbol, "connecting to upstream feed");

    let (ws_stream, _response) = connect_async(&url)
        .await
        .context("failed to connect to upstream feed WebSocket")?;

    info!(symbol = %symbol, "upstream feed connected");
    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    match parse_feed_message(&text) {
                        Ok(Some(event)) => {
                            if tx.send(event).await.is_err() {
                                warn!(symbol = %symbol, "feed channel closed, stopping stream");
                                return Ok(());
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(error = %e, "failed to parse feed message");
                        }
                    }
                }
                // Ping / Pong / Binary / Close frames are handled by
                // tungstenite or carry nothing we consume.
            }
            Some(Err(e)) => {
                warn!(symbol = %symbol, error = %e, "upstream feed read error");
                return Err(e.into());
            }
            None => {
                warn!(symbol = %symbol, "upstream feed stream ended");
                return Ok(());
            }
        }
    }
}

/// Parse one combined-stream message into a FeedEvent.
///
/// Expected shape:
/// ```json
/// { "stream": "btcusdt@kline_1m", "data": { ... } }
/// ```
///
/// Returns `Ok(None)` for recognised-but-unconsumed payloads (e.g. the
/// combined-stream subscription ack).
fn parse_feed_message(text: &str) -> Result<Option<FeedEvent>> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse feed JSON")?;

    let stream = match root.get("stream").and_then(|v| v.as_str()) {
        Some(s) => s,
        // Combined-stream control replies ({"result":null,"id":1}) have no
        // stream field.
        None => return Ok(None),
    };
    let data = &root["data"];

    if stream.contains("@kline") {
        let (symbol, interval, candle) = parse_kline(data)?;
        Ok(Some(FeedEvent::Kline {
            symbol,
            interval,
            kline: candle,
        }))
    } else if stream.contains("@ticker") {
        let symbol = data["s"]
            .as_str()
            .context("missing field s in ticker")?
            .to_uppercase();
        let price = parse_string_f64(&data["c"], "ticker.c")?;
        let volume = parse_string_f64(&data["v"], "ticker.v").ok();
        let timestamp = data["E"].as_i64().unwrap_or_else(now_ms);
        Ok(Some(FeedEvent::Price {
            symbol,
            price,
            volume,
            timestamp,
        }))
    } else if stream.contains("@aggTrade") {
        let symbol = data["s"]
            .as_str()
            .context("missing field s in aggTrade")?
            .to_uppercase();
        let price = parse_string_f64(&data["p"], "trade.p")?;
        let quantity = parse_string_f64(&data["q"], "trade.q")?;
        let is_buyer_maker = data["m"].as_bool().context("missing field m")?;
        Ok(Some(FeedEvent::Trade {
            symbol,
            price,
            quantity,
            is_buyer_maker,
        }))
    } else if stream.contains("@depth") {
        // Partial depth payloads carry no symbol; recover it from the
        // stream name ("btcusdt@depth20@100ms").
        let symbol = stream
            .split('@')
            .next()
            .context("malformed depth stream name")?
            .to_uppercase();
        let bids = parse_levels(&data["bids"], "bids")?;
        let asks = parse_levels(&data["asks"], "asks")?;
        Ok(Some(FeedEvent::OrderBook {
            symbol,
            bids,
            asks,
        }))
    } else {
        debug!(stream = %stream, "ignoring unrecognised stream payload");
        Ok(None)
    }
}

fn parse_kline(data: &serde_json::Value) -> Result<(String, Timeframe, Candle)> {
    let symbol = data["s"]
        .as_str()
        .context("missing field s in kline")?
        .to_uppercase();

    let k = &data["k"];

    let interval: Timeframe = k["i"]
        .as_str()
        .context("missing field k.i")?
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let candle = Candle {
        open_time: k["t"].as_i64().context("missing field k.t")?,
        open: parse_string_f64(&k["o"], "k.o")?,
        high: parse_string_f64(&k["h"], "k.h")?,
        low: parse_string_f64(&k["l"], "k.l")?,
        close: parse_string_f64(&k["c"], "k.c")?,
        volume: parse_string_f64(&k["v"], "k.v")?,
        close_time: k["T"].as_i64().context("missing field k.T")?,
        quote_volume: parse_string_f64(&k["q"], "k.q")?,
        trades: k["n"].as_u64().context("missing field k.n")?,
        taker_buy_base_volume: parse_string_f64(&k["V"], "k.V")?,
        taker_buy_quote_volume: parse_string_f64(&k["Q"], "k.Q")?,
    };

    Ok((symbol, interval, candle))
}

/// Parse a `[["price","qty"], ...]` depth ladder.
fn parse_levels(val: &serde_json::Value, name: &str) -> Result<Vec<[f64; 2]>> {
    let rows = val
        .as_array()
        .with_context(|| format!("field {name} is not an array"))?;

    let mut levels = Vec::with_capacity(rows.len());
    for row in rows {
        let pair = row
            .as_array()
            .with_context(|| format!("{name} row is not an array"))?;
        if pair.len() < 2 {
            anyhow::bail!("{name} row has fewer than 2 entries");
        }
        levels.push([
            parse_string_f64(&pair[0], name)?,
            parse_string_f64(&pair[1], name)?,
        ]);
    }
    Ok(levels)
}

/// Helper: the upstream sends numeric values as JSON strings.
fn parse_string_f64(val: &serde_json::Value, name: &str) -> Result<f64> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("failed to parse {name} as f64: {s}")),
        serde_json::Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("field {name} is not a valid f64")),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_contains_all_streams() {
        let url = build_stream_url(
            "wss://stream.example.com:9443",
            "BTCUSDT",
            &[Timeframe::M1, Timeframe::M5],
        );
        assert!(url.starts_with("wss://stream.example.com:9443/stream?streams="));
        assert!(url.contains("btcusdt@ticker"));
        assert!(url.contains("btcusdt@aggTrade"));
        assert!(url.contains("btcusdt@depth20@100ms"));
        assert!(url.contains("btcusdt@kline_1m"));
        assert!(url.contains("btcusdt@kline_5m"));
    }

    #[test]
    fn parse_kline_message_ok() {
        let json = r#"{
            "stream": "btcusdt@kline_1m",
            "data": {
                "e": "kline",
                "s": "BTCUSDT",
                "k": {
                    "t": 1700000000000,
                    "T": 1700000059999,
                    "i": "1m",
                    "o": "37000.00",
                    "h": "37050.00",
                    "l": "36990.00",
                    "c": "37020.00",
                    "v": "123.456",
                    "q": "4567890.12",
                    "n": 1500,
                    "V": "60.123",
                    "Q": "2224455.66",
                    "x": false
                }
            }
        }"#;
        let event = parse_feed_message(json).unwrap().unwrap();
        match event {
            FeedEvent::Kline {
                symbol,
                interval,
                kline,
            } => {
                assert_eq!(symbol, "BTCUSDT");
                assert_eq!(interval, Timeframe::M1);
                assert_eq!(kline.open_time, 1_700_000_000_000);
                assert!((kline.close - 37020.0).abs() < f64::EPSILON);
                assert_eq!(kline.trades, 1500);
            }
            other => panic!("expected kline event, got {other:?}"),
        }
    }

    #[test]
    fn parse_ticker_message_ok() {
        let json = r#"{
            "stream": "ethusdt@ticker",
            "data": {
                "e": "24hrTicker",
                "E": 1700000000123,
                "s": "ETHUSDT",
                "c": "2000.50",
                "v": "98765.4"
            }
        }"#;
        let event = parse_feed_message(json).unwrap().unwrap();
        match event {
            FeedEvent::Price {
                symbol,
                price,
                volume,
                timestamp,
            } => {
                assert_eq!(symbol, "ETHUSDT");
                assert!((price - 2000.5).abs() < f64::EPSILON);
                assert_eq!(volume, Some(98765.4));
                assert_eq!(timestamp, 1_700_000_000_123);
            }
            other => panic!("expected price event, got {other:?}"),
        }
    }

    #[test]
    fn parse_depth_recovers_symbol_from_stream_name() {
        let json = r#"{
            "stream": "solusdt@depth20@100ms",
            "data": {
                "lastUpdateId": 42,
                "bids": [["100.1", "2.0"], ["100.0", "1.5"]],
                "asks": [["100.2", "0.5"]]
            }
        }"#;
        let event = parse_feed_message(json).unwrap().unwrap();
        match event {
            FeedEvent::OrderBook {
                symbol,
                bids,
                asks,
            } => {
                assert_eq!(symbol, "SOLUSDT");
                assert_eq!(bids.len(), 2);
                assert_eq!(asks, vec![[100.2, 0.5]]);
            }
            other => panic!("expected orderbook event, got {other:?}"),
        }
    }

    #[test]
    fn control_reply_is_skipped() {
        assert!(parse_feed_message(r#"{"result":null,"id":1}"#)
            .unwrap()
            .is_none());
    }
}
