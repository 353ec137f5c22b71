//! Unified error type for the dispatch core.
//!
//! Most degraded modes are handled internally (estimated ETA instead of the
//! road API, rule engine instead of the trained model, dropped analytics
//! writes); the variants here cover the failures that do cross a module
//! boundary.

use thiserror::Error;

use crate::types::OrderStatus;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// A referenced row does not exist.
    #[error("not found: {what}")]
    NotFound {
        /// Description of the missing resource, e.g. "order ord-42".
        what: String,
    },

    /// A lifecycle operation arrived for an order in the wrong state.
    #[error("invalid transition: {from:?} -> {to:?}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// The persistent store collaborator failed.
    #[error("store error: {0}")]
    Store(String),

    /// The external road-network provider failed or returned a malformed
    /// response. Callers inside the ETA oracle always degrade to estimation;
    /// this variant only escapes through the provider trait itself.
    #[error("road api error: {0}")]
    Provider(String),

    /// A push-channel send failed; the driver or rider is unreachable.
    #[error("notify error: {0}")]
    Notify(String),

    /// The order's owning task is gone (shutdown race); treated by callers as
    /// an idempotent no-op.
    #[error("order task unavailable: {order_id}")]
    TaskGone { order_id: String },

    /// Model (de)serialization failure.
    #[error("model persistence error: {0}")]
    ModelIo(String),

    /// Invalid input argument.
    #[error("invalid argument: {0}")]
    InvalidArg(String),
}
