//! Errors that abort a deployment and their coarse classification.

use std::fmt;

use thiserror::Error;

use super::DeployState;
use crate::health::HealthError;
use crate::provider::AwaitError;

/// Coarse failure category reported in the outcome and used for the exit
/// summary.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Listing existing instances failed.
    DiscoveryFailed,
    /// More than one instance carries the stack prefix.
    DiscoveryAmbiguous,
    /// Required inputs were missing or malformed.
    ConfigurationInvalid,
    /// The new instance could not be created or addressed.
    ProvisionFailed,
    /// A provider action ended in `errored`.
    ActionFailed,
    /// A provider action did not finish in time.
    ActionTimeout,
    /// The application never answered `200` within the configured bound.
    HealthCheckExhausted,
    /// The floating IP could not be moved.
    CutoverFailed,
    /// The run was interrupted.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::DiscoveryFailed => "DiscoveryFailed",
            Self::DiscoveryAmbiguous => "DiscoveryAmbiguous",
            Self::ConfigurationInvalid => "ConfigurationInvalid",
            Self::ProvisionFailed => "ProvisionFailed",
            Self::ActionFailed => "ActionFailed",
            Self::ActionTimeout => "ActionTimeout",
            Self::HealthCheckExhausted => "HealthCheckExhausted",
            Self::CutoverFailed => "CutoverFailed",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(label)
    }
}

/// Errors raised by [`super::DeploymentOrchestrator`].
#[derive(Debug, Error)]
pub enum DeployError<E>
where
    E: std::error::Error + 'static,
{
    /// A provider call failed outright.
    #[error("{operation} failed during {state}: {source}")]
    Provider {
        /// State the orchestrator was in.
        state: DeployState,
        /// Operation being attempted.
        operation: &'static str,
        /// Provider error.
        #[source]
        source: E,
    },
    /// More than one instance matched the stack prefix.
    #[error("found {} instances with prefix '{prefix}': {}", names.len(), names.join(", "))]
    DiscoveryAmbiguous {
        /// Prefix searched for.
        prefix: String,
        /// Names of every match.
        names: Vec<String>,
    },
    /// The booted instance reported no public IPv4 address.
    #[error("instance {instance} has no public IPv4 address")]
    MissingPublicAddress {
        /// Instance name.
        instance: String,
    },
    /// Waiting for a provider action failed.
    #[error("{state}: {source}")]
    Action {
        /// State the orchestrator was in.
        state: DeployState,
        /// Wait failure.
        #[source]
        source: AwaitError<E>,
    },
    /// The application never became healthy.
    #[error(transparent)]
    Health(#[from] HealthError),
    /// The run was cancelled between steps.
    #[error("cancelled during {state}")]
    Cancelled {
        /// State the orchestrator was in.
        state: DeployState,
    },
}

impl<E> DeployError<E>
where
    E: std::error::Error + 'static,
{
    /// Classifies the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Provider { state, .. } => match state {
                DeployState::Discover => ErrorKind::DiscoveryFailed,
                DeployState::Cutover => ErrorKind::CutoverFailed,
                DeployState::AwaitBoot | DeployState::AwaitAppHealthy | DeployState::RetireOld => {
                    ErrorKind::ActionFailed
                }
                _ => ErrorKind::ProvisionFailed,
            },
            Self::DiscoveryAmbiguous { .. } => ErrorKind::DiscoveryAmbiguous,
            Self::MissingPublicAddress { .. } => ErrorKind::ProvisionFailed,
            Self::Action {
                state: DeployState::Cutover,
                source,
            } => match source {
                AwaitError::Cancelled { .. } => ErrorKind::Cancelled,
                _ => ErrorKind::CutoverFailed,
            },
            Self::Action { source, .. } => match source {
                AwaitError::TimedOut { .. } => ErrorKind::ActionTimeout,
                AwaitError::Cancelled { .. } => ErrorKind::Cancelled,
                AwaitError::Failed { .. } | AwaitError::Provider { .. } => ErrorKind::ActionFailed,
            },
            Self::Health(HealthError::Cancelled { .. }) | Self::Cancelled { .. } => {
                ErrorKind::Cancelled
            }
            Self::Health(_) => ErrorKind::HealthCheckExhausted,
        }
    }

    /// State in which the error was raised.
    #[must_use]
    pub const fn state(&self) -> DeployState {
        match self {
            Self::Provider { state, .. } | Self::Action { state, .. } | Self::Cancelled { state } => {
                *state
            }
            Self::DiscoveryAmbiguous { .. } => DeployState::Discover,
            Self::MissingPublicAddress { .. } | Self::Health(_) => DeployState::AwaitAppHealthy,
        }
    }
}
