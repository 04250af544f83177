//! The build payload delivered at process start.
//!
//! A single JSON object, read from stdin or the first CLI argument,
//! carrying the pipeline text, the encrypted secrets blob and the
//! repository/build/job/system metadata threaded through every step.

use std::collections::HashMap;
use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::pipeline::errors::Error;

/// Push event.
pub const EVENT_PUSH: &str = "push";
/// Pull-request event.
pub const EVENT_PULL_REQUEST: &str = "pull_request";
/// Tag-push event.
pub const EVENT_TAG: &str = "tag";
/// Deployment event.
pub const EVENT_DEPLOY: &str = "deploy";

/// Build passed.
pub const STATE_SUCCESS: &str = "success";
/// Build failed.
pub const STATE_FAILURE: &str = "failure";
/// Build not yet finished.
pub const STATE_PENDING: &str = "pending";

/// Repository metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Repo {
    /// Owner/name form.
    pub full_name: String,
    /// Canonical repository URL.
    pub link: String,
    /// Private repositories receive credentials and full injection.
    pub private: bool,
    /// Trusted repositories keep privileged/volume/entrypoint overrides.
    pub trusted: bool,
    /// Build timeout in minutes; zero means the default.
    pub timeout: u64,
}

/// Build metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Build {
    /// Sequential build number.
    pub number: i64,
    /// Triggering event; see the `EVENT_*` constants.
    pub event: String,
    /// Branch under build.
    pub branch: String,
    /// Commit SHA under build.
    pub commit: String,
    /// Full git ref, e.g. `refs/tags/v1.0.0`.
    #[serde(rename = "ref")]
    pub git_ref: String,
    /// Current status; see the `STATE_*` constants.
    pub status: String,
}

/// Job metadata, including job-scoped environment (matrix axes).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Job {
    /// Sequential job number within the build.
    pub number: i64,
    /// Current status; see the `STATE_*` constants.
    pub status: String,
    /// Job-scoped environment injected into the pipeline text.
    pub environment: HashMap<String, String>,
}

/// Installation-wide metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct System {
    /// Link to the installation.
    pub link: String,
    /// Global `KEY=VALUE` variables injected into every pipeline.
    pub globals: Vec<String>,
    /// Glob patterns naming the allowed plugin images.
    pub plugins: Vec<String>,
}

/// A single source-control credential entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Netrc {
    /// Remote machine name.
    pub machine: String,
    /// Login name.
    pub login: String,
    /// Password or access token.
    pub password: String,
}

/// Asymmetric key material for the repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Keypair {
    /// Private key, hex encoded; unseals the secrets blob.
    pub private: String,
    /// Public counterpart.
    pub public: String,
}

/// Resolved workspace for this build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Workspace {
    /// Workspace tree root inside containers.
    pub root: String,
    /// Checkout path for this repository.
    pub path: String,
    /// Source-control credentials for private repositories.
    pub netrc: Vec<Netrc>,
    /// Repository key material.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys: Option<Keypair>,
}

/// The raw build payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Payload {
    /// Pipeline YAML text.
    #[serde(rename = "config")]
    pub yaml: String,
    /// Encrypted secrets blob; empty when the repository has none.
    #[serde(rename = "secret")]
    pub yaml_enc: String,
    /// Repository metadata.
    pub repo: Repo,
    /// Build metadata.
    pub build: Build,
    /// The previous build, for change-detection guards.
    pub build_last: Option<Build>,
    /// Job metadata.
    pub job: Job,
    /// Source-control credentials.
    pub netrc: Vec<Netrc>,
    /// Repository key material.
    pub keys: Option<Keypair>,
    /// Installation metadata.
    pub system: System,
    /// Workspace, resolved during compilation when absent.
    pub workspace: Option<Workspace>,
}

impl Payload {
    /// Parses a payload from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the JSON is malformed.
    pub fn parse(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|e| Error::Config(format!("invalid payload: {e}")))
    }

    /// Reads and parses a payload from a reader (normally stdin).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when reading fails or the JSON is
    /// malformed.
    pub fn from_reader(mut reader: impl Read) -> Result<Self, Error> {
        let mut text = String::new();
        reader
            .read_to_string(&mut text)
            .map_err(|e| Error::Config(format!("reading payload: {e}")))?;
        Self::parse(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_payload_parse_minimal() {
        let payload = Payload::parse(r#"{"config": "build:\n  image: golang\n"}"#).unwrap();
        assert_eq!(payload.yaml, "build:\n  image: golang\n");
        assert!(payload.yaml_enc.is_empty());
        assert!(payload.keys.is_none());
    }

    #[test]
    fn test_payload_parse_build_ref() {
        let payload = Payload::parse(
            r#"{"build": {"number": 7, "event": "tag", "ref": "refs/tags/v1.0.0"}}"#,
        )
        .unwrap();
        assert_eq!(payload.build.number, 7);
        assert_eq!(payload.build.git_ref, "refs/tags/v1.0.0");
    }

    #[test]
    fn test_payload_parse_invalid_is_config_error() {
        assert!(matches!(
            Payload::parse("not json"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_payload_from_reader() {
        let json = r#"{"repo": {"full_name": "acme/hello", "private": true}}"#;
        let payload = Payload::from_reader(json.as_bytes()).unwrap();
        assert_eq!(payload.repo.full_name, "acme/hello");
        assert!(payload.repo.private);
    }
}
