//! Centralized error types for the retrace workspace.

use alloy_primitives::{Address, Bytes, B256, U256};
use thiserror::Error;

/// Top-level error enum. Variants map to the stage that failed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TracerError {
    /// Transport or JSON-RPC failure talking to the chain data provider.
    #[error("Remote error: {0}")]
    Remote(String),

    /// Malformed hex or JSON in a provider response.
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Transaction {0} not found")]
    TransactionNotFound(B256),

    #[error("Insufficient balance: {address} holds {balance}, transaction needs more than {required}")]
    InsufficientBalance {
        address: Address,
        balance: U256,
        required: U256,
    },

    /// The execution engine failed. `trace` holds whatever call tree was
    /// recorded up to the failure, or `None` if it could not be serialized.
    #[error("Execution error: {reason}")]
    Execution { reason: String, trace: Option<Bytes> },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TracerError {
    /// Partial trace attached to an execution failure, if any.
    pub fn partial_trace(&self) -> Option<&Bytes> {
        match self {
            TracerError::Execution { trace, .. } => trace.as_ref(),
            _ => None,
        }
    }
}

pub type TracerResult<T> = Result<T, TracerError>;
