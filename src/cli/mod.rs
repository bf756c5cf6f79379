//! Command-line interface definitions for the `stackswap` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Parser, Subcommand};

/// Top-level CLI for the `stackswap` binary.
#[derive(Debug, Parser)]
#[command(
    name = "stackswap",
    version,
    about = "Replace the droplet behind a floating IP without downtime",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, short, global = true)]
    pub(crate) verbose: bool,
    /// Operation to perform.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Subcommands accepted by `stackswap`.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Provision a new droplet, move the floating IP to it, and retire the
    /// old one.
    #[command(name = "deploy")]
    Deploy(DeployCommand),
    /// Render the bootstrap payload to stdout without touching the provider.
    #[command(name = "render-bootstrap")]
    RenderBootstrap,
}

/// Arguments for `stackswap deploy`.
#[derive(Debug, Parser)]
pub(crate) struct DeployCommand {
    /// Commit id to deploy. When omitted the head of the configured GitHub
    /// branch is used.
    #[arg(long, value_name = "SHA")]
    pub(crate) release: Option<String>,
}
