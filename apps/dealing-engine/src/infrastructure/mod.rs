//! Adapters: everything that touches a socket, a database, or the operator.
//!
//! Each submodule implements a port defined by the application layer or
//! hosts an operator-facing endpoint.

/// Fan-out hub distributing feed messages to consumers.
pub mod broadcast;

/// Configuration loading.
pub mod config;

/// Market data WebSocket client.
pub mod feed;

/// Operator HTTP endpoints (health, readiness, failed entries).
pub mod health;

/// Prometheus recorder and the counters the engine emits.
pub mod metrics;

/// Pending-order, position, and reconciliation stores.
pub mod persistence;

/// Liquidity provider adapters.
pub mod providers;

/// Tracing subscriber setup with optional OTLP export.
pub mod telemetry;
