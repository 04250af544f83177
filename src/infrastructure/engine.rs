//! The container backend contract.
//!
//! The execution engine drives the backend through this narrow trait:
//! launch-and-wait, detached start, and idempotent teardown. The backend
//! itself is opaque; anything that can honor a [`LaunchSpec`] can run a
//! build.

use std::io::Write;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;

/// Registry credentials presented with a launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryAuth {
    /// Registry username.
    pub username: String,
    /// Registry password.
    pub password: String,
    /// Registry account email.
    pub email: String,
    /// Bearer token, used instead of username/password.
    pub registry_token: String,
}

/// A container launch request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchSpec {
    /// Image reference.
    pub image: String,
    /// Command; empty uses the image default.
    pub command: Vec<String>,
    /// Entrypoint override; empty uses the image default.
    pub entrypoint: Vec<String>,
    /// Environment as `KEY=VALUE` lines.
    pub environment: Vec<String>,
    /// Volume bindings.
    pub volumes: Vec<String>,
    /// Working directory; empty uses the image default.
    pub working_dir: String,
    /// Privileged mode.
    pub privileged: bool,
    /// Network mode; empty uses the backend default.
    pub network_mode: String,
    /// Always pull the image before launching.
    pub pull: bool,
    /// Registry credentials; absent when the step supplies none.
    pub auth: Option<RegistryAuth>,
}

/// Errors from the container backend.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Could not reach the backend endpoint.
    #[error("engine connection failed: {0}")]
    Connect(String),
    /// The image could not be pulled.
    #[error("image pull failed: {0}")]
    Pull(String),
    /// The backend rejected the launch.
    #[error("container launch failed: {0}")]
    Launch(String),
    /// Waiting on the container failed.
    #[error("container wait failed: {0}")]
    Wait(String),
}

/// Shared sink for container output.
pub type OutputSink = Arc<Mutex<dyn Write + Send>>;

/// A sink writing to process stdout.
#[must_use]
pub fn stdout_sink() -> OutputSink {
    Arc::new(Mutex::new(std::io::stdout()))
}

/// A sink discarding all output.
#[must_use]
pub fn null_sink() -> OutputSink {
    Arc::new(Mutex::new(std::io::sink()))
}

/// The container backend.
///
/// `destroy` must be safe to call more than once: the normal completion
/// path, the cancel listener and the timeout listener may all attempt
/// teardown.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Launches a container and waits for completion, streaming its output
    /// into `sink`. Returns the in-container exit code.
    async fn run(&self, spec: &LaunchSpec, sink: OutputSink) -> Result<i64, EngineError>;

    /// Launches a container without waiting (auxiliary services).
    async fn start(&self, spec: &LaunchSpec) -> Result<(), EngineError>;

    /// Tears down every container this engine launched. Idempotent.
    async fn destroy(&self);
}
