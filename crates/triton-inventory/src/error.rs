//! Error types for inventory assembly

use thiserror::Error;

/// Inventory result type
pub type Result<T> = std::result::Result<T, InventoryError>;

/// Errors that can occur while building the inventory
#[derive(Error, Debug)]
pub enum InventoryError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CloudAPI answered with a non-success status
    #[error("CloudAPI error ({status}): {code}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// CloudAPI error code, e.g. `ResourceNotFound`
        code: String,
        /// Human readable message
        message: String,
    },

    /// Instance not found
    #[error("Instance {0} not found")]
    InstanceNotFound(String),

    /// More than one instance carries the requested name
    #[error("Instance name {0} is ambiguous")]
    AmbiguousInstance(String),

    /// Instance exists but has no address to connect through
    #[error("Instance {0} has no primary IP")]
    NoPrimaryIp(String),

    /// Image not found
    #[error("Image {0} not found")]
    ImageNotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request signing error
    #[error("Authentication error: {0}")]
    Auth(String),
}

impl InventoryError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    /// Whether CloudAPI reported the requested resource as missing
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::InstanceNotFound(_) | Self::ImageNotFound(_) => true,
            Self::Api { status, .. } => *status == 404 || *status == 410,
            _ => false,
        }
    }
}
