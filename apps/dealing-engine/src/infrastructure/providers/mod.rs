//! Liquidity provider adapters.
//!
//! Implementations of the [`LiquidityProvider`] port: an in-process
//! simulated venue for demo and test runs, and a generic REST venue
//! adapter.
//!
//! [`LiquidityProvider`]: crate::application::ports::LiquidityProvider

pub mod rest;
pub mod simulated;

pub use rest::{RestProvider, RestProviderConfig};
pub use simulated::{SimulatedFailure, SimulatedProvider, SimulatedProviderConfig};
