//! Object storage collaborator used to persist log bundles.

use std::ffi::OsString;

use camino::Utf8Path;
use serde::Deserialize;
use thiserror::Error;

use crate::command::{CommandError, CommandRunner};

/// Metadata of an object as reported by the store after upload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StoredObject {
    /// Size in bytes.
    pub size: u64,
}

/// Errors raised while uploading or inspecting an object.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum UploadError {
    /// The upload or metadata request failed.
    #[error("{program} failed with status {status_text}: {stderr}")]
    Transport {
        /// Program invoked.
        program: String,
        /// Exit status text.
        status_text: String,
        /// Captured stderr.
        stderr: String,
    },
    /// The command could not be started.
    #[error(transparent)]
    Spawn(#[from] CommandError),
    /// Object metadata could not be decoded.
    #[error("failed to parse object metadata: {0}")]
    Parse(String),
}

/// Uploads a local file under a key and reports what the store holds.
pub trait ObjectUploader {
    /// Uploads `local` as `key`.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError`] when the upload or the follow-up metadata
    /// read fails.
    fn upload(&self, local: &Utf8Path, key: &str) -> Result<StoredObject, UploadError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HeadObject {
    content_length: u64,
}

/// Uploads through the AWS CLI: `aws s3 cp`, then `aws s3api head-object`
/// to read back the stored size.
#[derive(Clone, Debug)]
pub struct AwsCliUploader<R> {
    aws_bin: String,
    bucket: String,
    runner: R,
}

impl<R: CommandRunner> AwsCliUploader<R> {
    /// Creates an uploader targeting `bucket`.
    #[must_use]
    pub fn new(aws_bin: impl Into<String>, bucket: impl Into<String>, runner: R) -> Self {
        Self {
            aws_bin: aws_bin.into(),
            bucket: bucket.into(),
            runner,
        }
    }

    fn run_checked(&self, args: &[OsString]) -> Result<String, UploadError> {
        let output = self.runner.run(&self.aws_bin, args)?;
        if output.is_success() {
            return Ok(output.stdout);
        }
        Err(UploadError::Transport {
            program: self.aws_bin.clone(),
            status_text: output.status_text(),
            stderr: output.stderr,
        })
    }
}

impl<R: CommandRunner> ObjectUploader for AwsCliUploader<R> {
    fn upload(&self, local: &Utf8Path, key: &str) -> Result<StoredObject, UploadError> {
        let destination = format!("s3://{}/{key}", self.bucket);
        self.run_checked(&[
            OsString::from("s3"),
            OsString::from("cp"),
            OsString::from(local.as_str()),
            OsString::from(destination),
            OsString::from("--only-show-errors"),
        ])?;

        let stdout = self.run_checked(&[
            OsString::from("s3api"),
            OsString::from("head-object"),
            OsString::from("--bucket"),
            OsString::from(&self.bucket),
            OsString::from("--key"),
            OsString::from(key),
            OsString::from("--output"),
            OsString::from("json"),
        ])?;
        let head: HeadObject =
            serde_json::from_str(&stdout).map_err(|err| UploadError::Parse(err.to_string()))?;
        Ok(StoredObject {
            size: head.content_length,
        })
    }
}
