//! Binary entry point for the `stackswap` CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use stackswap::archive::{ArchiveConfig, ArchiveError, LogArchiver};
use stackswap::bootstrap::{BootstrapError, SecretBlock, render_from_files};
use stackswap::config::{ConfigError, DeployConfig, DigitalOceanConfig};
use stackswap::deploy::{DeploymentOrchestrator, DeploymentPlan, ErrorKind, PlanError};
use stackswap::digitalocean::{DigitalOceanError, DigitalOceanProvider};
use stackswap::health::{HealthError, HttpsProbe};
use stackswap::paths::expand_tilde;
use stackswap::poll::CancelToken;
use stackswap::release::{GitHubRefResolver, ReleaseError, ReleaseId};

mod cli;

use cli::{Cli, Command, DeployCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error("release error: {0}")]
    Release(#[from] ReleaseError),
    #[error("bootstrap error: {0}")]
    Bootstrap(#[from] BootstrapError),
    #[error("provider error: {0}")]
    Provider(#[from] DigitalOceanError),
    #[error("health probe error: {0}")]
    Health(#[from] HealthError),
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

impl CliError {
    const fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Config(_)
            | Self::Plan(_)
            | Self::Release(_)
            | Self::Bootstrap(_)
            | Self::Archive(_) => Some(ErrorKind::ConfigurationInvalid),
            Self::Provider(DigitalOceanError::Config(_)) => Some(ErrorKind::ConfigurationInvalid),
            Self::Provider(_) | Self::Health(_) | Self::Output(_) => None,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let exit_code = match dispatch(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init()
        .ok();
}

async fn dispatch(command: Command) -> Result<i32, CliError> {
    match command {
        Command::Deploy(args) => deploy(args).await,
        Command::RenderBootstrap => render_bootstrap(),
    }
}

async fn deploy(args: DeployCommand) -> Result<i32, CliError> {
    let provider_config = DigitalOceanConfig::load_without_cli_args()?;
    let mut deploy_config = DeployConfig::load_without_cli_args()?;
    if args.release.is_some() {
        deploy_config.release = args.release;
    }
    let archive_config = ArchiveConfig::load_without_cli_args()?;
    provider_config.validate()?;
    deploy_config.validate()?;
    archive_config.validate()?;

    let release = resolve_release(&deploy_config).await?;
    let payload = render_payload(&deploy_config)?;
    let plan = DeploymentPlan::from_config(
        &provider_config,
        &deploy_config,
        &archive_config,
        &release,
        payload,
    )?;

    let provider = DigitalOceanProvider::new(&provider_config)?;
    let probe = HttpsProbe::new(deploy_config.probe_timeout())?;
    let archiver = LogArchiver::with_process_runner(archive_config)?;
    let cancel = CancelToken::new();
    watch_for_interrupt(cancel.clone());

    let orchestrator =
        DeploymentOrchestrator::new(provider, probe, archiver).with_cancel_token(cancel);
    let outcome = orchestrator.execute(&plan).await;
    writeln!(io::stdout(), "{outcome}")?;
    Ok(outcome.exit_code())
}

async fn resolve_release(config: &DeployConfig) -> Result<ReleaseId, CliError> {
    if let Some(raw) = &config.release {
        return Ok(ReleaseId::parse(raw)?);
    }
    let repo = config.github_repo.as_deref().ok_or_else(|| {
        ConfigError::MissingField(String::from(
            "missing release: pass --release or set STACKSWAP_GITHUB_REPO",
        ))
    })?;
    let resolver = GitHubRefResolver::new(
        repo,
        config.github_branch.clone(),
        config.github_token.clone(),
    );
    Ok(resolver.resolve().await?)
}

fn render_payload(config: &DeployConfig) -> Result<String, CliError> {
    let blocks = SecretBlock::parse_list(&config.secret_blocks)?;
    let template = Utf8PathBuf::from(expand_tilde(&config.template_path));
    Ok(render_from_files(&template, &blocks)?)
}

fn render_bootstrap() -> Result<i32, CliError> {
    let config = DeployConfig::load_without_cli_args()?;
    let payload = render_payload(&config)?;
    io::stdout().write_all(payload.as_bytes())?;
    Ok(0)
}

fn watch_for_interrupt(cancel: CancelToken) {
    let _watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling deployment");
            cancel.cancel();
        }
    });
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    if let Some(kind) = err.kind() {
        write!(target, "{kind}: ").ok();
    }
    writeln!(target, "{err}").ok();
}
