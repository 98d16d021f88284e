//! Domain layer - core business types with no infrastructure dependencies.

/// Domain-level errors.
pub mod errors;

/// Market data types: quotes, depth snapshots, the normalized feed message.
pub mod market;

/// Pending orders and trigger evaluation.
pub mod order;

/// Open positions and exposure.
pub mod position;

/// Reconciliation entries for indeterminate provider calls.
pub mod reconciliation;

/// Instrument symbol value object.
pub mod symbol;

pub use errors::DomainError;
pub use market::{DepthSnapshot, FeedMessage, PriceLevel, Quote};
pub use order::{Fill, OrderKind, OrderSide, OrderStatus, PendingOrder};
pub use position::{OpenPosition, PositionSide, PositionStatus};
pub use reconciliation::{ReconciliationEntry, ReconciliationStatus};
pub use symbol::Symbol;
