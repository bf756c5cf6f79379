//! Error types for the DigitalOcean provider.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised by the DigitalOcean provider.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DigitalOceanError {
    /// Raised when the provider configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when an identifier is not in the numeric form the API expects.
    #[error("invalid {kind} id `{value}`")]
    InvalidId {
        /// Kind of identifier.
        kind: &'static str,
        /// Offending value.
        value: String,
    },
    /// Raised when the API answers `404`.
    #[error("{resource} not found")]
    NotFound {
        /// Resource path that was requested.
        resource: String,
    },
    /// Raised for any other non-success HTTP status.
    #[error("DigitalOcean API returned {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the response body.
        message: String,
    },
    /// Raised when the request never produced a response.
    #[error("request to DigitalOcean failed: {0}")]
    Transport(String),
    /// Raised when a response body does not match the expected shape.
    #[error("failed to decode DigitalOcean response: {0}")]
    Decode(String),
    /// Raised when snapshot resolution does not yield exactly one image.
    #[error("expected exactly one snapshot named '{name}', found {matches}")]
    ImageNotFound {
        /// Snapshot name looked up.
        name: String,
        /// Number of matching images.
        matches: usize,
    },
    /// Raised when an instance has no recorded actions.
    #[error("droplet {instance_id} has no actions")]
    NoActions {
        /// Droplet identifier.
        instance_id: String,
    },
    /// Raised when the API reports an unknown status value.
    #[error("unrecognised {kind} status '{value}'")]
    UnknownStatus {
        /// Whether a droplet or an action status was being parsed.
        kind: &'static str,
        /// Raw status string.
        value: String,
    },
}

impl From<ConfigError> for DigitalOceanError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
