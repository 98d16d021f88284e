//! Application Services
//!
//! Long-running services that orchestrate the domain: the trigger engine
//! consumes ticks and executes matching orders, the routing engine decides
//! where each execution's exposure goes, the reconciler settles provider
//! calls with unknown outcomes, and the market state service keeps the
//! latest quote per symbol for the read side.

pub mod market_state;
pub mod reconciler;
pub mod routing_engine;
pub mod trigger_engine;

pub use market_state::MarketStateService;
pub use reconciler::{Reconciler, ReconcilerConfig, SweepSummary};
pub use routing_engine::{
    OrderRouter, ProviderRegistry, RouteOutcome, RoutingConfig, RoutingEngine,
};
pub use trigger_engine::{TriggerEngine, TriggerEngineConfig, TriggerEngineHandle};
