//! Application Ports (Driven)
//!
//! Ports define the interfaces the pipeline drives: the relational store and
//! external liquidity providers. Adapters live under `infrastructure`.

mod liquidity_provider;
mod repositories;

pub use liquidity_provider::{
    ExecuteOrderRequest, ExecutionReport, LiquidityProvider, ProviderError, ProviderOrderKind,
    ProviderOrderStatus, with_deadline,
};
pub use repositories::{
    ExecuteOutcome, PendingOrderRepository, PositionRepository, ReconciliationRepository,
    RepositoryError, RoutingConfigRepository,
};

#[cfg(test)]
pub use liquidity_provider::MockLiquidityProvider;
#[cfg(test)]
pub use repositories::{
    MockPendingOrderRepository, MockPositionRepository, MockReconciliationRepository,
    MockRoutingConfigRepository,
};
