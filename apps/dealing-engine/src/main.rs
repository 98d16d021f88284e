//! Dealing engine binary.
//!
//! Wires the pipeline end to end: feed client into the fan-out hub, hub
//! into the trigger engine and market state, executions into the routing
//! engine, and the reconciliation sweep over anything indeterminate.
//!
//! Configuration comes from the environment (a `.env` file is honoured):
//!
//! - `DATABASE_URL` (required): PostgreSQL connection string
//! - `DEALING_ENV`: `demo` | `live` (default `demo`)
//! - `DEALING_FEED_URL`: market data WebSocket base URL
//! - `DEALING_FEED_SYMBOLS`: comma-separated instruments (default `BTCUSDT`)
//! - `DEALING_HEALTH_PORT`: operator HTTP port (default `8083`)
//! - `DEALING_PROVIDER_DEADLINE_SECS`: per-call provider deadline (default `5`)
//! - `DEALING_REST_VENUE_URL` / `DEALING_REST_VENUE_API_KEY`: external venue
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`: span export
//! - `RUST_LOG`: log filter (default `info`)

use std::sync::Arc;
use std::time::Duration;

use dealing_engine::application::ports::{LiquidityProvider, ReconciliationRepository};
use dealing_engine::application::services::{
    MarketStateService, ProviderRegistry, Reconciler, ReconcilerConfig, RoutingEngine,
    TriggerEngine, TriggerEngineConfig,
};
use dealing_engine::domain::Symbol;
use dealing_engine::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
use dealing_engine::infrastructure::feed::{
    FeedClient, FeedClientConfig, FeedEvent, FeedStatus, ReconnectConfig,
};
use dealing_engine::infrastructure::health::{HealthServer, HealthServerState};
use dealing_engine::infrastructure::metrics;
use dealing_engine::infrastructure::persistence::PostgresStore;
use dealing_engine::infrastructure::providers::{
    RestProvider, RestProviderConfig, SimulatedProvider, SimulatedProviderConfig,
};
use dealing_engine::infrastructure::telemetry;
use dealing_engine::{AppConfig, SharedBroadcastHub, init_metrics};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// How often broadcast drop gauges and simulator reference prices resync.
const SYNC_INTERVAL: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Ring must be the process-wide TLS provider before any socket opens.
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("ring TLS provider must install before any connection");

    load_env_file();
    let _telemetry_guard = telemetry::init();
    let _metrics_handle = init_metrics();

    tracing::info!("starting dealing engine");

    let config = AppConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Connect the relational store
    let store = Arc::new(
        PostgresStore::connect(&config.database.url, config.database.max_connections).await?,
    );

    // Fan-out hub every consumer hangs off
    let broadcast_hub = Arc::new(BroadcastHub::new(BroadcastConfig {
        default_capacity: config.broadcast.default_capacity,
        trigger_capacity: config.broadcast.trigger_capacity,
    }));

    // Market state consumer: latest-wins price cache
    let market_state = Arc::new(MarketStateService::new());
    {
        let mut subscription = broadcast_hub.register("market-state");
        let state = Arc::clone(&market_state);
        tokio::spawn(async move {
            while let Some(message) = subscription.recv().await {
                state.apply(&message);
            }
            tracing::info!("market state consumer stopped");
        });
    }

    // Liquidity providers: the simulator is always registered, the REST
    // venue only when configured
    let simulator = SimulatedProvider::shared(SimulatedProviderConfig::default(), rand::random());
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::clone(&simulator) as Arc<dyn LiquidityProvider>);
    if let Some(venue) = &config.rest_venue {
        let rest = RestProvider::new(RestProviderConfig {
            name: venue.name.clone(),
            base_url: venue.base_url.clone(),
            api_key: venue.api_key.expose().to_string(),
        })?;
        registry.register(Arc::new(rest));
    }
    let registry = Arc::new(registry);
    tracing::info!(providers = ?registry.names(), "liquidity providers registered");
    if config.environment.is_live() && config.rest_venue.is_none() {
        tracing::warn!("live environment with only the simulated venue registered");
    }

    // Routing engine with its persisted configuration
    let routing_engine = Arc::new(RoutingEngine::new(
        Arc::clone(&store),
        Arc::clone(&store),
        Arc::clone(&store),
        Arc::clone(&registry),
        config.routing.provider_deadline,
    ));
    if let Err(e) = routing_engine.refresh().await {
        tracing::warn!(error = %e, "routing config load failed, defaults in effect until refresh");
    }
    spawn_config_refresh(
        Arc::clone(&routing_engine),
        config.routing.config_refresh_interval,
        shutdown_token.clone(),
    );

    // Trigger engine riding the deep hub queue
    let trigger_engine = Arc::new(TriggerEngine::new(
        TriggerEngineConfig {
            queue_capacity: config.trigger.queue_capacity,
        },
        Arc::clone(&store),
        Arc::clone(&routing_engine),
        shutdown_token.clone(),
    ));
    let trigger_handle = trigger_engine.start(broadcast_hub.register_trigger("trigger-engine"));

    // Reconciliation sweep for indeterminate provider calls
    let reconciler = Arc::new(Reconciler::new(
        ReconcilerConfig {
            sweep_interval: config.reconciliation.sweep_interval,
            base_delay: config.reconciliation.base_delay,
            max_delay: config.reconciliation.max_delay,
            max_attempts: config.reconciliation.max_attempts,
            batch_limit: config.reconciliation.batch_limit,
            provider_deadline: config.routing.provider_deadline,
        },
        Arc::clone(&store),
        Arc::clone(&store),
        Arc::clone(&registry),
        shutdown_token.clone(),
    ));
    tokio::spawn(Arc::clone(&reconciler).run());

    // Operator endpoints
    let feed_status = Arc::new(FeedStatus::new());
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        config.environment,
        Arc::clone(&feed_status),
        Arc::clone(&broadcast_hub),
        Arc::clone(&store) as Arc<dyn ReconciliationRepository>,
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "health server error");
        }
    });

    // Market data feed client
    let symbols: Vec<Symbol> = config.feed.symbols.iter().map(Symbol::new).collect();
    let mut feed_config =
        FeedClientConfig::combined(&config.feed.base_url, &symbols, config.feed.with_depth);
    feed_config.reconnect = ReconnectConfig {
        initial_delay: config.feed.reconnect_delay_initial,
        max_delay: config.feed.reconnect_delay_max,
        multiplier: config.feed.reconnect_delay_multiplier,
        jitter_factor: ReconnectConfig::default().jitter_factor,
        max_attempts: config.feed.max_reconnect_attempts,
    };
    tracing::debug!(url = %feed_config.url, "market data stream endpoint");

    let (event_tx, event_rx) = mpsc::channel::<FeedEvent>(1024);
    let feed_client = Arc::new(FeedClient::new(
        feed_config,
        event_tx,
        shutdown_token.clone(),
        Arc::clone(&feed_status),
    ));

    // Pump decoded feed events into the hub
    {
        let hub = Arc::clone(&broadcast_hub);
        tokio::spawn(async move {
            pump_feed_events(event_rx, hub).await;
        });
    }

    {
        let client = Arc::clone(&feed_client);
        tokio::spawn(async move {
            if let Err(e) = client.run().await {
                tracing::error!(error = %e, "feed client error");
            }
        });
    }

    spawn_periodic_sync(
        Arc::clone(&broadcast_hub),
        Arc::clone(&market_state),
        simulator,
        shutdown_token.clone(),
    );

    tracing::info!("dealing engine ready");

    shutdown_signal(shutdown_token).await;

    // Let the trigger stages finish the tick they are on before exiting.
    let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, trigger_handle.stopped()).await;

    tracing::info!("dealing engine stopped");
    Ok(())
}

/// Forward feed events into the broadcast hub.
async fn pump_feed_events(mut rx: mpsc::Receiver<FeedEvent>, hub: SharedBroadcastHub) {
    while let Some(event) = rx.recv().await {
        match event {
            FeedEvent::Message(message) => {
                metrics::record_feed_message(&message);
                let delivered = hub.publish(&message);
                metrics::record_broadcast_delivered(delivered as u64);
            }
            FeedEvent::Connected => tracing::info!("market data feed connected"),
            FeedEvent::Disconnected => tracing::warn!("market data feed disconnected"),
            FeedEvent::Reconnecting { attempt } => {
                metrics::record_feed_reconnect();
                tracing::info!(attempt, "market data feed reconnecting");
            }
            FeedEvent::Error(detail) => {
                metrics::record_malformed_frame();
                tracing::warn!(error = %detail, "market data feed error");
            }
        }
    }
    tracing::info!("feed event pump stopped");
}

/// Periodically re-read the persisted routing configuration.
fn spawn_config_refresh(
    engine: Arc<RoutingEngine<PostgresStore, PostgresStore, PostgresStore>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = engine.refresh().await {
                        tracing::warn!(error = %e, "routing config refresh failed");
                    }
                }
            }
        }
    });
}

/// Periodic upkeep: publish broadcast drop gauges and keep the simulator's
/// reference prices tracking the live market.
fn spawn_periodic_sync(
    hub: SharedBroadcastHub,
    market_state: Arc<MarketStateService>,
    simulator: Arc<SimulatedProvider>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SYNC_INTERVAL);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    for consumer in hub.stats().consumers {
                        metrics::set_broadcast_dropped(&consumer.name, consumer.dropped as f64);
                    }
                    for quote in market_state.all_quotes() {
                        simulator.set_reference_price(quote.symbol.clone(), quote.price);
                    }
                }
            }
        }
    });
}

/// Log the parsed configuration.
fn log_config(config: &AppConfig) {
    tracing::info!(
        environment = config.environment.as_str(),
        symbols = ?config.feed.symbols,
        feed_url = %config.feed.base_url,
        health_port = config.server.health_port,
        metrics_port = config.server.metrics_port,
        rest_venue = config.rest_venue.as_ref().map_or("none", |v| v.name.as_str()),
        "configuration loaded"
    );
}

/// Load a `.env` from the working directory or the nearest ancestor that
/// has one. Missing files are fine; real deployments set the environment
/// directly.
fn load_env_file() {
    if dotenvy::dotenv().is_ok() {
        return;
    }
    let Ok(cwd) = std::env::current_dir() else {
        return;
    };
    for dir in cwd.ancestors().skip(1) {
        let candidate = dir.join(".env");
        if candidate.exists() {
            let _ = dotenvy::from_path(&candidate);
            return;
        }
    }
}

/// Block until SIGINT or SIGTERM, then cancel the shared token.
#[allow(clippy::expect_used)]
async fn shutdown_signal(shutdown_token: CancellationToken) {
    #[cfg(unix)]
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("SIGTERM handler must install for orderly shutdown");
    #[cfg(unix)]
    let terminate = sigterm.recv();
    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    let reason = tokio::select! {
        r = signal::ctrl_c() => {
            r.expect("SIGINT handler must install for orderly shutdown");
            "SIGINT"
        }
        _ = terminate => "SIGTERM",
    };

    tracing::info!(
        signal = reason,
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "shutdown requested"
    );
    shutdown_token.cancel();
}
