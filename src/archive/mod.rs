//! Log collection from a retiring droplet.
//!
//! Before the old droplet is destroyed its application and cloud-init logs
//! are copied off with `scp`, packed into one timestamped tarball, and
//! pushed to object storage. The stored size is read back and compared with
//! the local bundle so a truncated upload is noticed before the only other
//! copy of the logs disappears with the droplet.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use shell_escape::unix::escape;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::command::{CommandError, CommandRunner, ProcessCommandRunner};
use crate::paths::{
    create_dir_all_ambient, expand_tilde, file_len_ambient, remove_dir_all_ambient,
    remove_file_ambient,
};
use crate::provider::Instance;

mod bundle;
mod config;
mod upload;

pub use bundle::bundle_stem;
pub use config::{ArchiveConfig, DEFAULT_REMOTE_PATHS};
pub use upload::{AwsCliUploader, ObjectUploader, StoredObject, UploadError};

const BUNDLE_SUFFIX: &str = ".tar.gz";

/// Errors raised while collecting or publishing logs.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ArchiveError {
    /// Raised when configuration is missing required values.
    #[error("missing {field}: set STACKSWAP_ARCHIVE_{env_suffix} or add {field} to [archive] in stackswap.toml", env_suffix = field.to_uppercase())]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Layered configuration could not be merged.
    #[error("archive configuration parsing failed: {0}")]
    ConfigLoad(String),
    /// The droplet has no public IPv4 address to copy from.
    #[error("instance {instance} has no public IPv4 address")]
    NoPublicAddress {
        /// Instance name.
        instance: String,
    },
    /// The staging directory could not be prepared.
    #[error("failed to prepare staging directory {path}: {message}")]
    Stage {
        /// Directory path.
        path: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
    /// A copy command could not be started.
    #[error(transparent)]
    Spawn(#[from] CommandError),
    /// A copy command exited unsuccessfully.
    #[error("{program} could not copy {remote}: status {status_text}: {stderr}")]
    Copy {
        /// Program invoked.
        program: String,
        /// Remote source, `user@host:path`.
        remote: String,
        /// Exit status text.
        status_text: String,
        /// Captured stderr.
        stderr: String,
    },
    /// The tarball could not be written or measured.
    #[error("failed to write bundle {path}: {message}")]
    Bundle {
        /// Bundle path.
        path: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
    /// The upload failed.
    #[error("upload failed: {0}")]
    Upload(#[from] UploadError),
    /// The stored object's size differs from the local bundle.
    #[error("stored object {key} is {stored} bytes but the local bundle is {local} bytes")]
    VerificationMismatch {
        /// Object key.
        key: String,
        /// Local size in bytes.
        local: u64,
        /// Stored size in bytes.
        stored: u64,
    },
}

/// Where a published bundle ended up.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArchiveReceipt {
    /// Local bundle path. [`LogArchive::archive`] deletes the file once the
    /// upload is verified.
    pub bundle: Utf8PathBuf,
    /// Object key.
    pub key: String,
    /// Verified size in bytes.
    pub size: u64,
}

/// Archives the logs of an instance that is about to be destroyed.
pub trait LogArchive {
    /// Collects `remote_paths` from `instance` and publishes them.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] when any step fails. Callers treat this as a
    /// warning; it never blocks destruction.
    fn archive(
        &self,
        instance: &Instance,
        remote_paths: &[String],
    ) -> Result<ArchiveReceipt, ArchiveError>;
}

/// `scp` based collector paired with an [`ObjectUploader`].
#[derive(Clone, Debug)]
pub struct LogArchiver<R, U> {
    config: ArchiveConfig,
    runner: R,
    uploader: U,
}

impl LogArchiver<ProcessCommandRunner, AwsCliUploader<ProcessCommandRunner>> {
    /// Wires the process runner and the AWS CLI uploader.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::InvalidConfig`] when validation fails.
    pub fn with_process_runner(config: ArchiveConfig) -> Result<Self, ArchiveError> {
        let uploader = AwsCliUploader::new(
            config.aws_bin.clone(),
            config.bucket.clone(),
            ProcessCommandRunner,
        );
        Self::new(config, ProcessCommandRunner, uploader)
    }
}

impl<R: CommandRunner, U: ObjectUploader> LogArchiver<R, U> {
    /// Creates an archiver after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::InvalidConfig`] when validation fails.
    pub fn new(config: ArchiveConfig, runner: R, uploader: U) -> Result<Self, ArchiveError> {
        config.validate()?;
        Ok(Self {
            config,
            runner,
            uploader,
        })
    }

    /// Returns a reference to the underlying configuration.
    #[must_use]
    pub const fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Copies `remote_paths` from `host` and bundles them, stamping the
    /// bundle with the current time.
    ///
    /// # Errors
    ///
    /// See [`LogArchiver::collect_at`].
    pub fn collect(&self, host: &str, remote_paths: &[String]) -> Result<Utf8PathBuf, ArchiveError> {
        self.collect_at(host, remote_paths, Utc::now())
    }

    /// Copies `remote_paths` from `host` into a staging directory named after
    /// `at`, then packs it into `<staging_dir>/<prefix>-<timestamp>.tar.gz`.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Stage`] when the staging directory cannot be
    /// created, [`ArchiveError::Copy`] or [`ArchiveError::Spawn`] when a copy
    /// fails, and [`ArchiveError::Bundle`] when the tarball cannot be written.
    pub fn collect_at(
        &self,
        host: &str,
        remote_paths: &[String],
        at: DateTime<Utc>,
    ) -> Result<Utf8PathBuf, ArchiveError> {
        let stem = bundle_stem(&self.config.bundle_prefix, at);
        let staging_root = Utf8PathBuf::from(expand_tilde(&self.config.staging_dir));
        let stage = staging_root.join(&stem);
        create_dir_all_ambient(&stage).map_err(|message| ArchiveError::Stage {
            path: stage.clone(),
            message,
        })?;

        for path in remote_paths {
            self.copy_remote(host, path, &stage)?;
        }

        let bundle = staging_root.join(format!("{stem}{BUNDLE_SUFFIX}"));
        bundle::write_tarball(&stage, &stem, &bundle).map_err(|message| {
            ArchiveError::Bundle {
                path: bundle.clone(),
                message,
            }
        })?;
        info!(%bundle, host, "collected logs");
        Ok(bundle)
    }

    /// Uploads `bundle` as `key` and checks the stored size.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Bundle`] when the local size cannot be read,
    /// [`ArchiveError::Upload`] when the upload fails, and
    /// [`ArchiveError::VerificationMismatch`] when the sizes differ.
    pub fn publish(&self, bundle: &Utf8Path, key: &str) -> Result<ArchiveReceipt, ArchiveError> {
        let local = file_len_ambient(bundle).map_err(|message| ArchiveError::Bundle {
            path: bundle.to_path_buf(),
            message,
        })?;
        let stored = self.uploader.upload(bundle, key)?;
        if stored.size != local {
            return Err(ArchiveError::VerificationMismatch {
                key: key.to_owned(),
                local,
                stored: stored.size,
            });
        }
        info!(key, size = local, "published log bundle");
        Ok(ArchiveReceipt {
            bundle: bundle.to_path_buf(),
            key: key.to_owned(),
            size: local,
        })
    }

    /// Deletes `bundle` and the staging directory it was packed from. A
    /// failure only leaves files behind, so it is logged rather than returned.
    fn discard(bundle: &Utf8Path) {
        if let Some(stage) = bundle.as_str().strip_suffix(BUNDLE_SUFFIX).map(Utf8Path::new)
            && let Err(message) = remove_dir_all_ambient(stage)
        {
            warn!(%stage, error = %message, "could not remove staging directory");
        }
        if let Err(message) = remove_file_ambient(bundle) {
            warn!(%bundle, error = %message, "could not remove local bundle");
        }
    }

    fn copy_remote(&self, host: &str, path: &str, stage: &Utf8Path) -> Result<(), ArchiveError> {
        let escaped = escape(path.into());
        let remote = format!("{}@{host}:{escaped}", self.config.ssh_user);
        let args = self.build_scp_args(&remote, stage);
        debug!(%remote, "copying remote logs");
        let output = self.runner.run(&self.config.scp_bin, &args)?;
        if output.is_success() {
            return Ok(());
        }
        Err(ArchiveError::Copy {
            program: self.config.scp_bin.clone(),
            status_text: output.status_text(),
            remote,
            stderr: output.stderr,
        })
    }

    fn build_scp_args(&self, remote: &str, stage: &Utf8Path) -> Vec<OsString> {
        vec![
            OsString::from("-rp"),
            OsString::from("-i"),
            OsString::from(expand_tilde(&self.config.ssh_identity_file)),
            OsString::from("-o"),
            OsString::from("BatchMode=yes"),
            OsString::from("-o"),
            OsString::from("StrictHostKeyChecking=no"),
            OsString::from("-o"),
            OsString::from("UserKnownHostsFile=/dev/null"),
            OsString::from(remote),
            OsString::from(stage.as_str()),
        ]
    }
}

impl<R: CommandRunner, U: ObjectUploader> LogArchive for LogArchiver<R, U> {
    fn archive(
        &self,
        instance: &Instance,
        remote_paths: &[String],
    ) -> Result<ArchiveReceipt, ArchiveError> {
        let host = instance
            .public_ipv4()
            .ok_or_else(|| ArchiveError::NoPublicAddress {
                instance: instance.name.clone(),
            })?
            .to_string();
        let bundle = self.collect(&host, remote_paths)?;
        let file_name = bundle.file_name().unwrap_or(bundle.as_str());
        let key = self.config.object_key(file_name);
        let receipt = self.publish(&bundle, &key)?;
        Self::discard(&bundle);
        Ok(receipt)
    }
}
