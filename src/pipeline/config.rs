//! The pipeline document model.
//!
//! A pipeline document has one section per phase (`cache`, `clone`,
//! `compose`, `build`, `publish`, `deploy`, `notify`) plus a `debug` switch
//! and an optional `workspace` override. Sections other than `build` and
//! the two singletons are keyed maps whose source order is preserved.

use serde::{Deserialize, Serialize};

use super::errors::Error;
use super::types::{Command, EnvMap, Keyed, StringOrSlice};

/// Root of the workspace tree inside build containers.
pub const WORKSPACE_ROOT: &str = "/gantry/src";

/// Conditional guard attached to a step (`when` block).
///
/// All specified conditions must hold for the guarded subtree to run;
/// the status pair (`success`/`failure`) is evaluated as a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct When {
    /// Branch patterns; `*` acts as a wildcard.
    #[serde(skip_serializing_if = "StringOrSlice::is_empty")]
    pub branch: StringOrSlice,
    /// Event names (push, pull_request, tag, deploy).
    #[serde(skip_serializing_if = "StringOrSlice::is_empty")]
    pub event: StringOrSlice,
    /// Run when the build has (not) failed so far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    /// Run when the build has failed so far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<bool>,
    /// Run when the build status differs from the previous build.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change: Option<bool>,
}

impl When {
    /// True when no condition is specified at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.branch.is_empty()
            && self.event.is_empty()
            && self.success.is_none()
            && self.failure.is_none()
            && self.change.is_none()
    }
}

/// Registry credentials attached to a step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Registry username.
    pub username: String,
    /// Registry password.
    pub password: String,
    /// Registry account email.
    pub email: String,
    /// Registry bearer token, used instead of username/password.
    pub registry_token: String,
}

impl AuthConfig {
    /// Auth is presented to the backend only when a password or token is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.password.is_empty() && self.registry_token.is_empty()
    }
}

/// One container step as written in the document.
///
/// Unrecognized fields are collected into `vargs` and handed to plugin
/// images through the structured payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Container {
    /// Image reference; keyed sections default it to the step key.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image: String,
    /// Always pull the image before running.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub pull: bool,
    /// Run the container in privileged mode.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub privileged: bool,
    /// Entrypoint override.
    #[serde(skip_serializing_if = "Command::is_empty")]
    pub entrypoint: Command,
    /// Command override.
    #[serde(skip_serializing_if = "Command::is_empty")]
    pub command: Command,
    /// Build shell commands (build section only).
    #[serde(skip_serializing_if = "StringOrSlice::is_empty")]
    pub commands: StringOrSlice,
    /// Step environment.
    #[serde(skip_serializing_if = "EnvMap::is_empty")]
    pub environment: EnvMap,
    /// Volume bindings (`host:container` or bare container paths).
    #[serde(skip_serializing_if = "StringOrSlice::is_empty")]
    pub volumes: StringOrSlice,
    /// Network mode override.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub net: String,
    /// Registry credentials.
    #[serde(skip_serializing_if = "AuthConfig::is_empty")]
    pub auth_config: AuthConfig,
    /// Conditional guard.
    #[serde(skip_serializing_if = "When::is_empty")]
    pub when: When,
    /// Plugin-specific configuration, passed through verbatim.
    #[serde(flatten)]
    pub vargs: serde_yaml::Mapping,
}

/// The build section: a single step or an ordered keyed map of steps.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildSection {
    /// A single bare step with the image at the top level.
    Single(Box<Container>),
    /// Multiple named steps, run in source order.
    Multi(Keyed<Container>),
}

impl Serialize for BuildSection {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Single(container) => container.serialize(serializer),
            Self::Multi(keyed) => keyed.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for BuildSection {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_yaml::Value::deserialize(deserializer)?;
        // A bare step carries its image at the top level; anything else is
        // treated as a keyed multi-step map.
        if let Ok(container) = serde_yaml::from_value::<Container>(value.clone()) {
            if !container.image.is_empty() {
                return Ok(Self::Single(Box::new(container)));
            }
        }
        let keyed: Keyed<Container> =
            serde_yaml::from_value(value).map_err(serde::de::Error::custom)?;
        Ok(Self::Multi(keyed))
    }
}

/// Workspace override section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceSection {
    /// Checkout path, relative to the workspace root unless absolute.
    pub path: String,
}

/// The parsed pipeline document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Document {
    /// Debug switch; also raises the process log level.
    pub debug: bool,
    /// Workspace override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<WorkspaceSection>,
    /// Cache restore/rebuild step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<Container>,
    /// Source checkout step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clone: Option<Container>,
    /// Auxiliary service containers, started fire-and-forget.
    #[serde(skip_serializing_if = "Keyed::is_empty")]
    pub compose: Keyed<Container>,
    /// Build steps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSection>,
    /// Publish steps.
    #[serde(skip_serializing_if = "Keyed::is_empty")]
    pub publish: Keyed<Container>,
    /// Deploy steps.
    #[serde(skip_serializing_if = "Keyed::is_empty")]
    pub deploy: Keyed<Container>,
    /// Notify steps.
    #[serde(skip_serializing_if = "Keyed::is_empty")]
    pub notify: Keyed<Container>,
}

impl Document {
    /// Parses a pipeline document from YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] when the text is not valid YAML or does
    /// not match the document shape.
    pub fn parse(text: &str) -> Result<Self, Error> {
        serde_yaml::from_str(text).map_err(Error::from)
    }
}

/// Extracts the `debug` flag from document text without a full parse.
///
/// Used before compilation to pick the log level; any malformed document
/// reads as not-debug and fails properly later.
#[must_use]
pub fn parse_debug(text: &str) -> bool {
    #[derive(Deserialize)]
    struct DebugOnly {
        #[serde(default)]
        debug: bool,
    }
    serde_yaml::from_str::<DebugOnly>(text)
        .map(|d| d.debug)
        .unwrap_or(false)
}

/// Resolves the in-container workspace path for this build.
///
/// The document's `workspace.path` wins when present; otherwise the path
/// is derived from the repository link (host plus path under
/// [`WORKSPACE_ROOT`]).
#[must_use]
pub fn workspace_path(doc: &Document, repo_link: &str) -> String {
    if let Some(ws) = &doc.workspace {
        if !ws.path.is_empty() {
            if ws.path.starts_with('/') {
                return ws.path.clone();
            }
            return format!("{WORKSPACE_ROOT}/{}", ws.path);
        }
    }
    match url::Url::parse(repo_link) {
        Ok(url) => {
            let host = url.host_str().unwrap_or_default();
            let path = url.path().trim_end_matches('/').trim_end_matches(".git");
            format!("{WORKSPACE_ROOT}/{host}{path}")
        }
        Err(_) => WORKSPACE_ROOT.to_string(),
    }
}
