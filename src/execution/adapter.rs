//! Execution adapter boundary
//!
//! Capability interface to the broker/venue. Implementations are
//! swappable per venue; only the simulated adapter lives in-tree. All
//! calls are bounded-latency, and stop modification on an order the
//! venue cannot see yet returns a distinguishable retryable error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use super::intent::Direction;
use crate::types::ExecutionInstrument;

/// Opaque venue order handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderRef(pub String);

impl std::fmt::Display for OrderRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Adapter failure taxonomy. `is_retryable` separates transient absence
/// from real rejection so the caller can pace retries instead of
/// standing down.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    /// The target order is not yet visible at the venue
    #[error("order not yet visible at venue")]
    StopNotVisible,

    #[error("venue rejected: {0}")]
    Rejected(String),

    #[error("not connected")]
    NotConnected,

    #[error("venue call timed out")]
    Timeout,
}

impl AdapterError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StopNotVisible | Self::Timeout)
    }
}

/// Explicit capability negotiation, set at construction. Replaces
/// runtime probing for optional diagnostics on older venue builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterCapabilities {
    /// Adapter protocol version
    pub version: u32,
    /// Whether the venue reports stop-order working state, allowing the
    /// core to distinguish "not visible yet" from "rejected"
    pub supports_stop_diagnostics: bool,
}

/// Asynchronous order/fill callbacks, correlated to an intent by the
/// opaque tag supplied at submission.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    OrderAccepted {
        tag: String,
        order_ref: OrderRef,
    },
    OrderRejected {
        tag: String,
        reason: String,
    },
    Fill {
        tag: String,
        order_ref: OrderRef,
        price: f64,
        quantity: i32,
    },
    StopModifyAck {
        order_ref: OrderRef,
        price: f64,
    },
    Disconnected {
        reason: String,
    },
}

/// Venue capability interface.
#[async_trait]
pub trait ExecutionAdapter: Send {
    fn capabilities(&self) -> AdapterCapabilities;

    async fn connect(&mut self) -> Result<(), AdapterError>;

    async fn disconnect(&mut self) -> Result<(), AdapterError>;

    /// Market entry. The tag comes back on the matching callbacks.
    async fn submit_entry(
        &mut self,
        instrument: &ExecutionInstrument,
        side: Direction,
        quantity: i32,
        tag: &str,
    ) -> Result<OrderRef, AdapterError>;

    /// Protective stop for an open position (side is the closing side).
    async fn submit_protective_stop(
        &mut self,
        instrument: &ExecutionInstrument,
        side: Direction,
        quantity: i32,
        stop_price: f64,
        tag: &str,
    ) -> Result<OrderRef, AdapterError>;

    /// Idempotent: re-sending the same price is a no-op at the venue.
    async fn modify_stop(
        &mut self,
        order_ref: &OrderRef,
        new_price: f64,
    ) -> Result<(), AdapterError>;

    async fn cancel(&mut self, order_ref: &OrderRef) -> Result<(), AdapterError>;

    /// Take the callback receiver. Yields `Some` exactly once.
    fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<AdapterEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_split() {
        assert!(AdapterError::StopNotVisible.is_retryable());
        assert!(AdapterError::Timeout.is_retryable());
        assert!(!AdapterError::Rejected("margin".to_string()).is_retryable());
        assert!(!AdapterError::NotConnected.is_retryable());
    }
}
