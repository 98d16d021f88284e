//! Long-running services that orchestrate the domain, and the ports they
//! depend on:
//!
//! - **Ports**: interfaces to the store and to liquidity providers
//! - **Services**: the trigger engine, the routing engine, the reconciler,
//!   and the latest-wins market state they share

pub mod ports;
pub mod services;

pub use ports::*;
pub use services::*;
