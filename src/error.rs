//! Error types for rpcwire.
//!
//! Registration and startup failures are reported as [`RpcwireError`].
//! Per-call failures travel to the caller as a [`tonic::Status`]; every
//! `RpcwireError` converts into one so handlers can use `?` freely.

use thiserror::Error;
use tonic::Status;

use crate::contract::CallShape;

/// Main error type for all rpcwire operations.
#[derive(Debug, Error)]
pub enum RpcwireError {
    /// Lookup of a service full name that is not registered in the app.
    #[error("Can not find {service} in app. Available services: {}", .available.join(", "))]
    ServiceNotFound {
        service: String,
        available: Vec<String>,
    },

    /// Lookup of a service full name that a descriptor pool does not define.
    #[error("Can not find {service} in the descriptor pool. Available services: {}", .available.join(", "))]
    ContractServiceNotFound {
        service: String,
        available: Vec<String>,
    },

    /// Registration against a method name absent from the service contract.
    #[error("Can not find {method} in {service}. Available methods: {}", .available.join(", "))]
    MethodNotFound {
        method: String,
        service: String,
        available: Vec<String>,
    },

    /// Handler call shape does not match the shape declared by the contract.
    #[error("{method} is declared as {expected} but the handler is {registered}")]
    ShapeMismatch {
        method: String,
        expected: CallShape,
        registered: CallShape,
    },

    /// Registration lifecycle misuse.
    #[error("Register error: {0}")]
    Register(String),

    /// Invalid server configuration.
    #[error("Server config error: {0}")]
    ServerConfig(String),

    /// Incomplete or conflicting TLS configuration.
    #[error("TLS config error: {0}")]
    ServerSslConfig(String),

    /// The service contract could not be loaded.
    #[error("Contract error: {0}")]
    Contract(#[from] prost_reflect::DescriptorError),

    /// Mapping/record conversion failed.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Wire bytes could not be decoded into a record.
    #[error("Protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// JSON serialization/deserialization error (configuration, typed arguments).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error while reading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using RpcwireError.
pub type Result<T> = std::result::Result<T, RpcwireError>;

impl From<RpcwireError> for Status {
    fn from(err: RpcwireError) -> Self {
        match err {
            RpcwireError::Decode(_) | RpcwireError::Json(_) => {
                Status::invalid_argument(err.to_string())
            }
            other => Status::internal(other.to_string()),
        }
    }
}
