//! # Gantry - single-build pipeline executor
//!
//! Gantry executes one CI build from a self-contained JSON payload:
//! it unseals and verifies the repository secrets, substitutes variables
//! into the pipeline text, compiles the document into an execution tree
//! through a chain of normalization rules, and walks the tree phase by
//! phase inside containers on the local Docker daemon.
//!
//! ## Quick Start
//!
//! ```bash
//! gantry --clone --build --notify <<'EOF'
//! {"config": "build:\n  image: golang\n  commands:\n    - go build\n"}
//! EOF
//! ```
//!
//! ## Phases
//!
//! `cache`, `clone`, `compose`, `build`, `publish`, `deploy`, `notify`,
//! each enabled by its CLI flag; publish is governed by `--deploy`. The
//! cache phase runs twice, before the clone and again after deployment.
//!
//! ## Exit Codes
//!
//! - `0` - every step succeeded
//! - `1-127` - first failing step's exit code
//! - `128` - the build timed out
//! - `130` - the build was cancelled
//! - `255` - a container could not be launched

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod cli;
pub mod exec;
pub mod infrastructure;
pub mod payload;
pub mod pipeline;
pub mod runner;

pub use exec::{run, Options, Outcome};
pub use infrastructure::{DockerEngine, Engine, EngineError, LaunchSpec, MockEngine};
pub use payload::Payload;
pub use pipeline::{Document, Error, Phase, Tree, TrustLevel};
pub use runner::{Runner, State, StepHook};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
