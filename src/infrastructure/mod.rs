//! Container backends and process-level plumbing.

pub mod docker;
pub mod engine;
pub mod logging;
pub mod mock;

pub use docker::DockerEngine;
pub use engine::{null_sink, stdout_sink, Engine, EngineError, LaunchSpec, OutputSink, RegistryAuth};
pub use mock::MockEngine;
