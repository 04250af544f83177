//! Command-line interface.

use std::io;

use clap::Parser;

use crate::exec;
use crate::payload::Payload;
use crate::pipeline::Error;

/// Executes a single build on the local container daemon.
#[derive(Debug, Parser)]
#[command(name = "gantry", author, version, about)]
pub struct Args {
    /// Run the cache phases.
    #[arg(long)]
    pub cache: bool,

    /// Run the clone phase.
    #[arg(long)]
    pub clone: bool,

    /// Run the compose and build phases.
    #[arg(long)]
    pub build: bool,

    /// Run the publish and deploy phases.
    #[arg(long)]
    pub deploy: bool,

    /// Run the notify phase.
    #[arg(long)]
    pub notify: bool,

    /// Enable debug output.
    #[arg(long)]
    pub debug: bool,

    /// Pull images even when present locally.
    #[arg(long = "pull")]
    pub pull: bool,

    /// Mount this host directory as the build workspace.
    #[arg(long)]
    pub mount: Option<String>,

    /// Build payload as JSON; read from stdin when omitted.
    pub payload: Option<String>,
}

impl Args {
    /// Loads the payload from the positional argument or stdin.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the payload cannot be read or parsed.
    pub fn load_payload(&self) -> Result<Payload, Error> {
        match &self.payload {
            Some(text) => Payload::parse(text),
            None => Payload::from_reader(io::stdin()),
        }
    }
}

impl From<&Args> for exec::Options {
    fn from(args: &Args) -> Self {
        Self {
            cache: args.cache,
            clone: args.clone,
            build: args.build,
            deploy: args.deploy,
            notify: args.notify,
            debug: args.debug,
            force_pull: args.pull,
            mount: args.mount.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_phase_flags() {
        let args = Args::parse_from(["gantry", "--clone", "--build", "--pull", "{}"]);
        let opt = exec::Options::from(&args);
        assert!(opt.clone);
        assert!(opt.build);
        assert!(opt.force_pull);
        assert!(!opt.deploy);
        assert_eq!(args.payload.as_deref(), Some("{}"));
    }

    #[test]
    fn test_args_payload_argument() {
        let args = Args::parse_from(["gantry", "--build", r#"{"config": "build:\n  image: golang"}"#]);
        let payload = args.load_payload().unwrap();
        assert_eq!(payload.yaml, "build:\n  image: golang");
    }
}
