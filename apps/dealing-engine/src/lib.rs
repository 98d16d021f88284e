//! Dealing Engine - Trade Execution Pipeline
//!
//! A dealing service that turns a live market data stream into order
//! executions: it watches ticks, fires pending orders whose trigger price
//! trades, decides per execution whether the platform keeps the exposure or
//! hedges it with an external liquidity provider, and reconciles provider
//! calls whose outcome was lost in transit.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core trading types with no external dependencies
//!   - `order`: Pending orders and trigger evaluation
//!   - `position`: Open positions and exposure
//!   - `reconciliation`: Entries for indeterminate provider calls
//!   - `market`: Quotes, depth snapshots, the normalized feed message
//!
//! - **Application**: Engine services and their ports
//!   - `ports`: Interfaces for the store and liquidity providers
//!   - `services`: Trigger engine, routing engine, reconciler, market state
//!
//! - **Infrastructure**: Adapters for the outside world
//!   - `feed`: Market data WebSocket client
//!   - `broadcast`: Per-consumer queue fan-out
//!   - `providers`: Simulated and REST liquidity providers
//!   - `persistence`: PostgreSQL and in-memory stores
//!   - `config`: Configuration loading
//!   - `health`: Health check and operator HTTP endpoints
//!
//! # Data Flow
//!
//! ```text
//!                    ┌─────────────┐      ┌─────────────┐
//! Market Data WS ───►│  Broadcast  │─────►│   Trigger   │───► internal book
//!                    │     Hub     │      │   Engine    │───► liquidity provider
//!                    └──────┬──────┘      └─────────────┘          │
//!                           │                              indeterminate
//!                           ▼                                      ▼
//!                     Market State                       Reconciliation Sweep
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
// Test code may unwrap and ignore a handful of pedantic lints.
#![cfg_attr(
    test,
    allow(
        clippy::default_trait_access,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::items_after_statements,
        clippy::match_same_arms,
        clippy::needless_collect,
        clippy::needless_pass_by_value,
        clippy::option_if_let_else,
        clippy::or_fun_call,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::unwrap_used
    )
)]

// =============================================================================
// Layers
// =============================================================================

/// Core trading types, free of framework dependencies.
pub mod domain;

/// Engine services and the port traits they depend on.
pub mod application;

/// Adapters: feed client, fan-out hub, stores, providers, HTTP.
pub mod infrastructure;

// =============================================================================
// Crate Surface
// =============================================================================

// Domain types
pub use domain::{
    DepthSnapshot, DomainError, FeedMessage, Fill, OpenPosition, OrderKind, OrderSide,
    OrderStatus, PendingOrder, PositionSide, PositionStatus, PriceLevel, Quote,
    ReconciliationEntry, ReconciliationStatus, Symbol,
};

// Application ports
pub use application::ports::{
    ExecuteOrderRequest, ExecuteOutcome, ExecutionReport, LiquidityProvider,
    PendingOrderRepository, PositionRepository, ProviderError, ProviderOrderKind,
    ProviderOrderStatus, ReconciliationRepository, RepositoryError, RoutingConfigRepository,
};

// Application services
pub use application::services::{
    MarketStateService, OrderRouter, ProviderRegistry, Reconciler, ReconcilerConfig,
    RouteOutcome, RoutingConfig, RoutingEngine, SweepSummary, TriggerEngine, TriggerEngineConfig,
    TriggerEngineHandle,
};

// Configuration
pub use infrastructure::config::{
    ApiKey, AppConfig, BroadcastSettings, ConfigError, DatabaseSettings, Environment,
    FeedSettings, ReconciliationSettings, RestVenueSettings, RoutingSettings, ServerSettings,
    TriggerSettings,
};

// Operator endpoints
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Fan-out hub (integration tests drive it directly)
pub use infrastructure::broadcast::{
    BroadcastConfig, BroadcastHub, BroadcastStats, SharedBroadcastHub, Subscription,
};

// Feed client (integration tests drive it directly)
pub use infrastructure::feed::{
    FeedClient, FeedClientConfig, FeedClientError, FeedEvent, FeedStatus, ReconnectConfig,
};

// Stores and providers (integration tests drive them directly)
pub use infrastructure::persistence::{InMemoryStore, PostgresStore};
pub use infrastructure::providers::{
    RestProvider, RestProviderConfig, SimulatedFailure, SimulatedProvider,
    SimulatedProviderConfig,
};

// Observability
pub use infrastructure::metrics::init_metrics;
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
