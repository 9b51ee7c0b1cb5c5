// =============================================================================
// Tickermux gateway - main entry point
// =============================================================================

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tickermux::feed;
use tickermux::server::{dispatch, rest, AppState};
use tickermux::settings::Settings;
use tickermux::symbols;

/// Capacity of the feed-event channel between the upstream streams and the
/// dispatcher.
const FEED_CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & settings ────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Tickermux Market Gateway - Starting Up            ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut settings = Settings::load("tickermux.json").unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load settings, using defaults");
        Settings::default()
    });

    // Override bind address and symbols from env if available.
    if let Ok(addr) = std::env::var("TICKERMUX_BIND_ADDR") {
        settings.bind_addr = addr;
    }
    if let Ok(syms) = std::env::var("TICKERMUX_SYMBOLS") {
        settings.symbols = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if settings.symbols.is_empty() {
        settings.symbols = Settings::default().symbols;
    }

    info!(symbols = ?settings.symbols, timeframes = ?settings.timeframes, "Configured upstream feed");

    // ── 2. Build shared state ────────────────────────────────────────────
    let state = Arc::new(AppState::new(settings.clone()));

    // ── 3. Symbol directory refresh loop ─────────────────────────────────
    {
        let directory = state.symbols.clone();
        let upstream = state.upstream.clone();
        let refresh_interval = settings.symbol_refresh_interval();
        tokio::spawn(async move {
            symbols::run_refresh_loop(directory, upstream, refresh_interval).await;
        });
    }

    // ── 4. Upstream feed streams ─────────────────────────────────────────
    let (feed_tx, feed_rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);

    for symbol in &settings.symbols {
        let tx = feed_tx.clone();
        let sym = symbol.clone();
        let ws_url = settings.upstream_ws_url.clone();
        let timeframes = settings.timeframes.clone();
        let retry_delay = settings.reconnect_delay();
        tokio::spawn(async move {
            loop {
                if let Err(e) = feed::stream::run_symbol_feed(&ws_url, &sym, &timeframes, &tx).await
                {
                    error!(symbol = %sym, error = %e, "upstream feed error, reconnecting after delay");
                }
                tokio::time::sleep(retry_delay).await;
            }
        });
    }
    info!(count = settings.symbols.len(), "Upstream feed streams launched");

    // ── 5. Dispatcher ────────────────────────────────────────────────────
    {
        let dispatch_state = state.clone();
        tokio::spawn(async move {
            dispatch::run_dispatcher(dispatch_state, feed_rx).await;
        });
    }

    // ── 6. REST + WebSocket server ───────────────────────────────────────
    let bind_addr = settings.bind_addr.clone();
    {
        let api_state = state.clone();
        let addr = bind_addr.clone();
        tokio::spawn(async move {
            let app = rest::router(api_state);
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .expect("Failed to bind API server");
            info!(addr = %addr, "API server listening");
            axum::serve(listener, app).await.expect("API server failed");
        });
    }

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received, stopping");

    info!("Tickermux gateway shut down complete.");
    Ok(())
}
