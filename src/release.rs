//! Release identification and droplet naming.
//!
//! Every droplet of the stack is named `<prefix><short sha>`, so the name
//! alone says which commit a droplet serves. The sha either comes from the
//! operator or from the head of the deployed branch on GitHub.

use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const GITHUB_API_BASE: &str = "https://api.github.com";
const SHORT_LEN: usize = 7;

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("stackswap/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Errors raised while resolving the release.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ReleaseError {
    /// The supplied commit id is not hexadecimal or is too short.
    #[error("invalid release id `{0}`: expected at least 7 hexadecimal characters")]
    InvalidId(String),
    /// The refs API request failed.
    #[error("GitHub request for {repo}@{branch} failed: {message}")]
    Lookup {
        /// Repository queried.
        repo: String,
        /// Branch queried.
        branch: String,
        /// Transport or HTTP error text.
        message: String,
    },
}

/// A validated commit id.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ReleaseId(String);

impl ReleaseId {
    /// Validates a commit id.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError::InvalidId`] unless `raw` is at least seven
    /// hexadecimal characters.
    pub fn parse(raw: &str) -> Result<Self, ReleaseError> {
        let trimmed = raw.trim();
        if trimmed.len() < SHORT_LEN || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ReleaseError::InvalidId(raw.to_owned()));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    /// The full commit id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first seven characters, as used in droplet names.
    #[must_use]
    pub fn short(&self) -> String {
        self.0.chars().take(SHORT_LEN).collect()
    }
}

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Joins the stack prefix and the release's short id.
#[must_use]
pub fn instance_name(prefix: &str, release: &ReleaseId) -> String {
    format!("{prefix}{}", release.short())
}

#[derive(Debug, Deserialize)]
struct GitRef {
    object: GitObject,
}

#[derive(Debug, Deserialize)]
struct GitObject {
    sha: String,
}

/// Looks up the head commit of a branch through the GitHub refs API.
#[derive(Clone, Debug)]
pub struct GitHubRefResolver {
    repo: String,
    branch: String,
    token: Option<String>,
    api_base: String,
}

impl GitHubRefResolver {
    /// Creates a resolver for `repo` (`owner/name`) and `branch`.
    #[must_use]
    pub fn new(repo: impl Into<String>, branch: impl Into<String>, token: Option<String>) -> Self {
        Self {
            repo: repo.into(),
            branch: branch.into(),
            token,
            api_base: GITHUB_API_BASE.to_owned(),
        }
    }

    /// Overrides the API root.
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// URL of the branch ref.
    #[must_use]
    pub fn ref_url(&self) -> String {
        format!(
            "{}/repos/{}/git/refs/heads/{}",
            self.api_base.trim_end_matches('/'),
            self.repo,
            self.branch
        )
    }

    /// Fetches the branch head.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError::Lookup`] on transport, HTTP or decoding
    /// failures and [`ReleaseError::InvalidId`] when GitHub returns a
    /// malformed sha.
    pub async fn resolve(&self) -> Result<ReleaseId, ReleaseError> {
        let lookup = |message: String| ReleaseError::Lookup {
            repo: self.repo.clone(),
            branch: self.branch.clone(),
            message,
        };

        let mut request = HTTP_CLIENT
            .get(self.ref_url())
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("token {token}"));
        }
        let response = request.send().await.map_err(|err| lookup(err.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| lookup(err.to_string()))?;
        if !status.is_success() {
            return Err(lookup(format!(
                "HTTP {status}: {}",
                String::from_utf8_lossy(&body)
            )));
        }

        let parsed: GitRef = serde_json::from_slice(&body).map_err(|err| lookup(err.to_string()))?;
        let release = ReleaseId::parse(&parsed.object.sha)?;
        info!(repo = %self.repo, branch = %self.branch, sha = %release, "resolved release");
        Ok(release)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("abc1234")]
    #[case("ABC1234DEF")]
    #[case("  0123456789abcdef0123456789abcdef01234567 ")]
    fn accepts_hex_ids(#[case] raw: &str) {
        assert!(ReleaseId::parse(raw).is_ok());
    }

    #[rstest]
    #[case("abc123")]
    #[case("xyz1234")]
    #[case("")]
    fn rejects_short_or_non_hex_ids(#[case] raw: &str) {
        assert_eq!(
            ReleaseId::parse(raw),
            Err(ReleaseError::InvalidId(raw.to_owned()))
        );
    }

    #[rstest]
    fn names_instances_with_the_short_sha() {
        let release = ReleaseId::parse("ABC1234DEADBEEF").unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(instance_name("stack-a-", &release), "stack-a-abc1234");
    }

    #[rstest]
    fn builds_ref_urls() {
        let resolver = GitHubRefResolver::new("example/stack", "main", None)
            .with_api_base("http://127.0.0.1:9/");
        assert_eq!(
            resolver.ref_url(),
            "http://127.0.0.1:9/repos/example/stack/git/refs/heads/main"
        );
    }
}
