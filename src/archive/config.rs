//! Log archival settings loaded via `ortho-config`.

use ortho_config::OrthoConfig;
use serde::Deserialize;

use super::ArchiveError;
use crate::config::split_list;

/// Remote paths collected from a retiring droplet unless overridden.
pub const DEFAULT_REMOTE_PATHS: &str =
    "/apps/digitalocean-stack/logs/,/var/log/cloud-init.log,/var/log/cloud-init-output.log";

/// Where and how logs are copied off the old droplet and stored.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "STACKSWAP_ARCHIVE",
    discovery(
        app_name = "stackswap",
        env_var = "STACKSWAP_CONFIG_PATH",
        config_file_name = "stackswap.toml",
        dotfile_name = ".stackswap.toml",
        project_file_name = "stackswap.toml"
    )
)]
pub struct ArchiveConfig {
    /// Path to the `scp` executable.
    #[ortho_config(default = "scp".to_owned())]
    pub scp_bin: String,
    /// Remote user to copy as.
    #[ortho_config(default = "root".to_owned())]
    pub ssh_user: String,
    /// Private key matching one of the account keys installed on droplets.
    #[ortho_config(default = "secrets/deploy_key".to_owned())]
    pub ssh_identity_file: String,
    /// Comma separated remote files and directories to collect.
    #[ortho_config(default = DEFAULT_REMOTE_PATHS.to_owned())]
    pub remote_paths: String,
    /// Local directory receiving copies and bundles.
    #[ortho_config(default = "logs".to_owned())]
    pub staging_dir: String,
    /// Bundle name prefix; a UTC timestamp is appended.
    #[ortho_config(default = "stack-a".to_owned())]
    pub bundle_prefix: String,
    /// Object key prefix under which bundles are stored.
    #[ortho_config(default = "stack-logs".to_owned())]
    pub key_prefix: String,
    /// Path to the `aws` executable.
    #[ortho_config(default = "aws".to_owned())]
    pub aws_bin: String,
    /// Destination bucket. Required.
    #[ortho_config(default = String::new())]
    pub bucket: String,
}

impl ArchiveConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::ConfigLoad`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ArchiveError> {
        Self::load_from_iter([std::ffi::OsString::from("stackswap")])
            .map_err(|err| ArchiveError::ConfigLoad(err.to_string()))
    }

    /// Ensures every value is present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::InvalidConfig`] naming the first empty field.
    pub fn validate(&self) -> Result<(), ArchiveError> {
        for (value, field) in [
            (&self.scp_bin, "scp_bin"),
            (&self.ssh_user, "ssh_user"),
            (&self.ssh_identity_file, "ssh_identity_file"),
            (&self.staging_dir, "staging_dir"),
            (&self.bundle_prefix, "bundle_prefix"),
            (&self.aws_bin, "aws_bin"),
            (&self.bucket, "bucket"),
        ] {
            if value.trim().is_empty() {
                return Err(ArchiveError::InvalidConfig {
                    field: field.to_owned(),
                });
            }
        }
        if self.remote_path_list().is_empty() {
            return Err(ArchiveError::InvalidConfig {
                field: String::from("remote_paths"),
            });
        }
        Ok(())
    }

    /// Remote paths as a list.
    #[must_use]
    pub fn remote_path_list(&self) -> Vec<String> {
        split_list(&self.remote_paths)
    }

    /// Object key for a bundle file name.
    #[must_use]
    pub fn object_key(&self, file_name: &str) -> String {
        let prefix = self.key_prefix.trim_matches('/');
        if prefix.is_empty() {
            file_name.to_owned()
        } else {
            format!("{prefix}/{file_name}")
        }
    }
}
