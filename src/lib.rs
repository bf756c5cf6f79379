//! Core library for the `stackswap` blue-green redeploy tool.
//!
//! A stack runs on a single DigitalOcean droplet reached through a floating
//! IP. A deployment boots a replacement droplet from a snapshot, waits until
//! the application inside answers, moves the floating IP, then archives the
//! old droplet's logs and destroys it. [`deploy::DeploymentOrchestrator`]
//! drives that sequence against the [`provider::Provider`] capability trait,
//! implemented for DigitalOcean in [`digitalocean`].

pub mod archive;
pub mod bootstrap;
pub mod command;
pub mod config;
pub mod deploy;
pub mod digitalocean;
pub mod health;
pub mod paths;
pub mod poll;
pub mod provider;
pub mod release;
pub mod report;
pub mod test_support;

pub use archive::{ArchiveConfig, ArchiveError, LogArchive, LogArchiver};
pub use config::{ConfigError, DeployConfig, DigitalOceanConfig};
pub use deploy::{
    DeployError, DeployState, DeploymentOrchestrator, DeploymentOutcome, DeploymentPlan, ErrorKind,
};
pub use digitalocean::{DigitalOceanError, DigitalOceanProvider};
pub use health::{HealthChecker, HealthProbe, HttpsProbe};
pub use poll::{CancelToken, PollPolicy};
pub use provider::{Instance, PendingAction, Provider};
pub use report::RunReport;
