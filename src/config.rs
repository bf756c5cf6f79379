//! Configuration loading via `ortho-config`.
//!
//! Two layered structs live here: [`DigitalOceanConfig`] for provider
//! credentials and droplet shape, and [`DeployConfig`] for naming, bootstrap
//! inputs and polling bounds. Log archival settings live in
//! [`crate::archive::ArchiveConfig`].

use std::net::IpAddr;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::poll::PollPolicy;

/// Default DigitalOcean API root.
pub const DEFAULT_API_BASE: &str = "https://api.digitalocean.com/v2";

/// Default prefix shared by every instance of the stack.
pub const DEFAULT_NAME_PREFIX: &str = "stack-a-";

/// DigitalOcean credentials and the shape of the droplets to create.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "DIGITALOCEAN",
    discovery(
        app_name = "stackswap",
        env_var = "STACKSWAP_CONFIG_PATH",
        config_file_name = "stackswap.toml",
        dotfile_name = ".stackswap.toml",
        project_file_name = "stackswap.toml"
    )
)]
pub struct DigitalOceanConfig {
    /// Personal access token with read and write scope. Required.
    pub token: String,
    /// Region slug. Defaults to `sgp1`.
    #[ortho_config(default = "sgp1".to_owned())]
    pub region: String,
    /// Size slug. Defaults to `s-1vcpu-1gb`.
    #[ortho_config(default = "s-1vcpu-1gb".to_owned())]
    pub size: String,
    /// Name of the private snapshot new droplets boot from. Required.
    pub snapshot_name: String,
    /// Floating IP moved to the new droplet at cutover. Required.
    pub floating_ip: String,
    /// Comma separated tags applied to new droplets.
    #[ortho_config(default = "stack".to_owned())]
    pub tags: String,
    /// Enables the DigitalOcean monitoring agent. Unset means enabled.
    pub monitoring: Option<bool>,
    /// Attaches a private network interface. Unset means enabled.
    pub private_networking: Option<bool>,
    /// Enables weekly provider backups. Unset means disabled.
    pub backups: Option<bool>,
    /// Installs every SSH key registered on the account so the archiver can
    /// later copy logs off the droplet. Unset means enabled.
    pub install_account_ssh_keys: Option<bool>,
    /// API root, overridable for testing against a stub server.
    #[ortho_config(default = DEFAULT_API_BASE.to_owned())]
    pub api_base: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to [{}] in stackswap.toml",
            metadata.description, metadata.env_var, metadata.toml_key, metadata.section
        )));
    }
    Ok(())
}

fn require_positive(value: u64, field: &'static str) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            field,
            message: String::from("must be greater than zero"),
        });
    }
    Ok(())
}

/// Splits a comma separated list, dropping blanks.
pub(crate) fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

impl DigitalOceanConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("stackswap")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::InvalidValue`] when the floating IP does not parse.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.token,
            &FieldMetadata::new(
                "DigitalOcean API token",
                "DIGITALOCEAN_TOKEN",
                "token",
                "digitalocean",
            ),
        )?;
        require_field(
            &self.snapshot_name,
            &FieldMetadata::new(
                "snapshot name",
                "DIGITALOCEAN_SNAPSHOT_NAME",
                "snapshot_name",
                "digitalocean",
            ),
        )?;
        require_field(
            &self.floating_ip,
            &FieldMetadata::new(
                "floating IP",
                "DIGITALOCEAN_FLOATING_IP",
                "floating_ip",
                "digitalocean",
            ),
        )?;
        require_field(
            &self.region,
            &FieldMetadata::new("region", "DIGITALOCEAN_REGION", "region", "digitalocean"),
        )?;
        require_field(
            &self.size,
            &FieldMetadata::new("droplet size", "DIGITALOCEAN_SIZE", "size", "digitalocean"),
        )?;
        require_field(
            &self.api_base,
            &FieldMetadata::new(
                "API base URL",
                "DIGITALOCEAN_API_BASE",
                "api_base",
                "digitalocean",
            ),
        )?;
        self.floating_ip_addr().map(|_| ())
    }

    /// Whether the monitoring agent is enabled.
    #[must_use]
    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.unwrap_or(true)
    }

    /// Whether a private network interface is attached.
    #[must_use]
    pub fn private_networking_enabled(&self) -> bool {
        self.private_networking.unwrap_or(true)
    }

    /// Whether provider backups are enabled.
    #[must_use]
    pub fn backups_enabled(&self) -> bool {
        self.backups.unwrap_or(false)
    }

    /// Whether account SSH keys are installed on new droplets.
    #[must_use]
    pub fn installs_account_ssh_keys(&self) -> bool {
        self.install_account_ssh_keys.unwrap_or(true)
    }

    /// Parses the configured floating IP.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when the value is not an IP
    /// address.
    pub fn floating_ip_addr(&self) -> Result<IpAddr, ConfigError> {
        self.floating_ip
            .trim()
            .parse()
            .map_err(|err: std::net::AddrParseError| ConfigError::InvalidValue {
                field: "floating_ip",
                message: err.to_string(),
            })
    }

    /// Tags as a list.
    #[must_use]
    pub fn tag_list(&self) -> Vec<String> {
        split_list(&self.tags)
    }
}

/// Naming, bootstrap and polling settings for a deployment run.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "STACKSWAP",
    discovery(
        app_name = "stackswap",
        env_var = "STACKSWAP_CONFIG_PATH",
        config_file_name = "stackswap.toml",
        dotfile_name = ".stackswap.toml",
        project_file_name = "stackswap.toml"
    )
)]
pub struct DeployConfig {
    /// Prefix shared by every droplet of the stack; the short release hash
    /// is appended to form the new droplet's name.
    #[ortho_config(default = DEFAULT_NAME_PREFIX.to_owned())]
    pub name_prefix: String,
    /// Bootstrap template containing `{PLACEHOLDER}` markers.
    #[ortho_config(default = "cloud-config.yaml".to_owned())]
    pub template_path: String,
    /// Placeholder to secret file mappings, `NAME=path` separated by commas.
    #[ortho_config(default = String::new())]
    pub secret_blocks: String,
    /// Explicit commit id of the release being deployed.
    pub release: Option<String>,
    /// `owner/name` of the GitHub repository whose branch head names the
    /// release when no explicit id is given.
    pub github_repo: Option<String>,
    /// Branch whose head is deployed.
    #[ortho_config(default = "master".to_owned())]
    pub github_branch: String,
    /// Token for the GitHub refs API.
    pub github_token: Option<String>,
    /// Path probed on the new droplet's public address.
    #[ortho_config(default = "/".to_owned())]
    pub health_path: String,
    /// Seconds between health probes.
    #[ortho_config(default = 5)]
    pub health_interval_secs: u64,
    /// Per-probe timeout in seconds.
    #[ortho_config(default = 5)]
    pub health_probe_timeout_secs: u64,
    /// Give up after this many probes. Unbounded when unset.
    pub health_max_attempts: Option<u32>,
    /// Give up after this many seconds. Unbounded when unset.
    pub health_max_wait_secs: Option<u64>,
    /// Seconds between boot action polls.
    #[ortho_config(default = 1)]
    pub boot_poll_interval_secs: u64,
    /// Maximum seconds to wait for the boot action; `0` waits forever.
    #[ortho_config(default = 600)]
    pub boot_max_wait_secs: u64,
    /// Seconds between floating IP and destroy action polls.
    #[ortho_config(default = 1)]
    pub action_poll_interval_secs: u64,
    /// Maximum seconds to wait for those actions; `0` waits forever.
    #[ortho_config(default = 300)]
    pub action_max_wait_secs: u64,
    /// Seconds to let the old droplet drain before collecting its logs.
    #[ortho_config(default = 5)]
    pub drain_grace_secs: u64,
}

impl DeployConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("stackswap")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Validates naming and polling settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for empty required values,
    /// including the case where neither an explicit release nor a GitHub
    /// repository is configured, and [`ConfigError::InvalidValue`] for zero
    /// intervals.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.name_prefix,
            &FieldMetadata::new(
                "droplet name prefix",
                "STACKSWAP_NAME_PREFIX",
                "name_prefix",
                "deploy",
            ),
        )?;
        require_field(
            &self.template_path,
            &FieldMetadata::new(
                "bootstrap template path",
                "STACKSWAP_TEMPLATE_PATH",
                "template_path",
                "deploy",
            ),
        )?;
        if self.release.is_none() {
            require_field(
                self.github_repo.as_deref().unwrap_or_default(),
                &FieldMetadata::new(
                    "release (pass --release) or GitHub repository",
                    "STACKSWAP_GITHUB_REPO",
                    "github_repo",
                    "deploy",
                ),
            )?;
        }
        if !self.health_path.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "health_path",
                message: String::from("must start with '/'"),
            });
        }
        require_positive(self.health_interval_secs, "health_interval_secs")?;
        require_positive(self.health_probe_timeout_secs, "health_probe_timeout_secs")?;
        require_positive(self.boot_poll_interval_secs, "boot_poll_interval_secs")?;
        require_positive(self.action_poll_interval_secs, "action_poll_interval_secs")?;
        if self.health_max_attempts == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "health_max_attempts",
                message: String::from("must be greater than zero when set"),
            });
        }
        if self.health_max_wait_secs == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "health_max_wait_secs",
                message: String::from("must be greater than zero when set"),
            });
        }
        Ok(())
    }

    /// Policy for application health probes.
    #[must_use]
    pub fn health_policy(&self) -> PollPolicy {
        let interval = Duration::from_secs(self.health_interval_secs);
        let base = self.health_max_wait_secs.map_or_else(
            || PollPolicy::unbounded(interval),
            |secs| PollPolicy::bounded(interval, Duration::from_secs(secs)),
        );
        match self.health_max_attempts {
            Some(attempts) => base.with_max_attempts(attempts),
            None => base,
        }
    }

    /// Policy for the new droplet's boot action.
    #[must_use]
    pub const fn boot_policy(&self) -> PollPolicy {
        bounded_or_not(self.boot_poll_interval_secs, self.boot_max_wait_secs)
    }

    /// Policy for floating IP assignment and destroy actions.
    #[must_use]
    pub const fn action_policy(&self) -> PollPolicy {
        bounded_or_not(self.action_poll_interval_secs, self.action_max_wait_secs)
    }

    /// Per-probe health check timeout.
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.health_probe_timeout_secs)
    }

    /// Grace period before the old droplet's logs are collected.
    #[must_use]
    pub const fn drain_grace(&self) -> Duration {
        Duration::from_secs(self.drain_grace_secs)
    }
}

const fn bounded_or_not(interval_secs: u64, max_wait_secs: u64) -> PollPolicy {
    let interval = Duration::from_secs(interval_secs);
    if max_wait_secs == 0 {
        PollPolicy::unbounded(interval)
    } else {
        PollPolicy::bounded(interval, Duration::from_secs(max_wait_secs))
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// A field is present but unusable.
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        /// Offending TOML key.
        field: &'static str,
        /// Why the value was rejected.
        message: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
