//! Error types for pipeline compilation and execution

use thiserror::Error;

/// Errors that can occur while compiling or executing a build.
///
/// `Config` and `Parse` are fatal and surface before any container runs.
/// Launch and runtime failures during execution are recorded on the run
/// state instead, so that later phases (notify in particular) still get a
/// chance to run.
#[derive(Error, Debug)]
pub enum Error {
    /// The encrypted secrets blob was malformed or could not be decrypted
    #[error("config error: {0}")]
    Config(String),

    /// The pipeline document failed YAML parsing or a policy rule
    #[error("parse error: {0}")]
    Parse(String),

    /// The container backend was unreachable or rejected a request
    #[error("launch error: {0}")]
    Launch(String),
}

impl Error {
    /// Creates a [`Error::Config`] from any displayable cause.
    pub fn config(err: impl std::fmt::Display) -> Self {
        Self::Config(err.to_string())
    }

    /// Creates a [`Error::Parse`] from any displayable cause.
    pub fn parse(err: impl std::fmt::Display) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
