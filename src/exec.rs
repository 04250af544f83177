//! Build orchestration: payload to exit code.
//!
//! `compile` turns the payload into an execution tree (secret
//! verification, variable injection, parsing); `run` walks the tree
//! phase by phase while racing cancellation and the build timeout, and
//! always tears the engine down before reporting the outcome.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::infrastructure::{stdout_sink, DockerEngine, Engine};
use crate::payload::{Payload, Workspace, EVENT_TAG};
use crate::pipeline::config::{workspace_path, Document, WORKSPACE_ROOT};
use crate::pipeline::{inject, parser, secrets};
use crate::pipeline::{Error, Phase, RuleConfig, RuleContext, Tree, TrustLevel};
use crate::runner::{LogHook, Runner, State};

/// Builds time out after this many minutes unless the repository says
/// otherwise.
pub const DEFAULT_TIMEOUT_MINUTES: u64 = 60;

/// Which phases to run, plus compile-time switches.
///
/// Phase flags default to off; the CLI turns on what it wants. The
/// publish phase is governed by `deploy`.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Run the cache phase (restore before the build, rebuild after).
    pub cache: bool,
    /// Run the clone phase.
    pub clone: bool,
    /// Run the compose and build phases.
    pub build: bool,
    /// Run the publish and deploy phases.
    pub deploy: bool,
    /// Run the notify phase.
    pub notify: bool,
    /// Force debug output.
    pub debug: bool,
    /// Pull images even when present locally.
    pub force_pull: bool,
    /// Mount the named host directory as the workspace.
    pub mount: Option<String>,
}

/// How a build ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every step succeeded.
    Success,
    /// A step failed; carries the first non-zero exit code.
    Failed {
        /// First non-zero step exit code.
        exit_code: i32,
    },
    /// The cancel future fired first.
    Cancelled,
    /// The build timeout elapsed first.
    TimedOut,
}

impl Outcome {
    /// Process exit code for this outcome.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failed { exit_code } => exit_code,
            Self::Cancelled => 130,
            Self::TimedOut => 128,
        }
    }
}

/// Compiles the payload into an execution tree and a resolved workspace.
///
/// Secrets are unsealed and checked first; the trust level then decides
/// how variables are injected and may disable the deploy and notify
/// phases in `opt`.
///
/// # Errors
///
/// Returns [`Error::Config`] when the secrets blob cannot be unsealed and
/// [`Error::Parse`] when injection or parsing fails.
pub fn compile(payload: &Payload, opt: &mut Options) -> Result<(Tree, Workspace), Error> {
    let mut yaml = payload.yaml.clone();

    let bundle = match &payload.keys {
        Some(keys) if !payload.yaml_enc.is_empty() => {
            Some(secrets::decrypt(&payload.yaml_enc, &keys.private)?)
        }
        _ => None,
    };
    let level = secrets::trust_level(
        bundle.as_ref(),
        &yaml,
        &payload.build.event,
        payload.repo.private,
    );
    match (level, bundle) {
        (TrustLevel::VerifiedFull, Some(bundle)) => {
            yaml = inject::inject(&yaml, &bundle.environment.pairs());
        }
        (TrustLevel::VerifiedSafe, Some(bundle)) => {
            yaml = inject::inject_safe(&yaml, &bundle.environment.pairs())?;
        }
        (TrustLevel::Unverified, _) => {
            tracing::debug!("secrets rejected; deploy and notify disabled");
            opt.deploy = false;
            opt.notify = false;
        }
        _ => {}
    }

    // Job environment and matrix parameters come from the server and are
    // always substituted in full.
    let mut job_env: Vec<(String, String)> = payload
        .job
        .environment
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    job_env.sort();
    yaml = inject::inject(&yaml, &job_env);
    yaml = inject::inject(&yaml, &matrix_params(payload));

    let globals: Vec<(String, String)> = payload
        .system
        .globals
        .iter()
        .filter_map(|g| g.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    if payload.repo.private {
        yaml = inject::inject(&yaml, &globals);
    } else if let Ok(injected) = inject::inject_safe(&yaml, &globals) {
        yaml = injected;
    }

    let doc = Document::parse(&yaml)?;
    let workspace = resolve_workspace(payload, &doc);

    let ctx = RuleContext {
        trusted_repo: payload.repo.trusted,
        force_pull: opt.force_pull,
        repo_full_name: payload.repo.full_name.clone(),
        debug: opt.debug || doc.debug,
        mount: opt.mount.clone(),
        workspace_path: workspace.path.clone(),
        plugin_patterns: payload.system.plugins.clone(),
    };
    let tree = parser::parse(&yaml, &RuleConfig::default(), &ctx)?;
    Ok((tree, workspace))
}

fn matrix_params(payload: &Payload) -> Vec<(String, String)> {
    let commit = &payload.build.commit;
    let mut params = vec![
        ("COMMIT".to_string(), commit.clone()),
        // Deprecated alias; carries the full commit SHA.
        ("COMMIT_SHORT".to_string(), commit.clone()),
        ("BRANCH".to_string(), payload.build.branch.clone()),
        ("BUILD_NUMBER".to_string(), payload.build.number.to_string()),
    ];
    if payload.build.event == EVENT_TAG {
        let tag = payload.build.git_ref.trim_start_matches("refs/tags/");
        params.push(("TAG".to_string(), tag.to_string()));
    }
    params
}

fn resolve_workspace(payload: &Payload, doc: &Document) -> Workspace {
    if let Some(ws) = &payload.workspace {
        if !ws.path.is_empty() {
            return ws.clone();
        }
    }
    Workspace {
        root: WORKSPACE_ROOT.to_string(),
        path: workspace_path(doc, &payload.repo.link),
        netrc: payload.netrc.clone(),
        keys: payload.keys.clone(),
    }
}

/// Runs the build against the local Docker daemon.
///
/// # Errors
///
/// Returns [`Error::Launch`] when the daemon is unreachable, plus any
/// compilation error.
pub async fn run(payload: Payload, opt: Options) -> Result<Outcome, Error> {
    let engine = DockerEngine::connect()
        .await
        .map_err(|e| Error::Launch(e.to_string()))?;
    let minutes = if payload.repo.timeout == 0 {
        DEFAULT_TIMEOUT_MINUTES
    } else {
        payload.repo.timeout
    };
    let timeout = Duration::from_secs(minutes * 60);
    run_with_engine(payload, opt, Arc::new(engine), cancel_signal(), timeout).await
}

enum Raced {
    Done,
    Cancelled,
    TimedOut,
}

/// Runs the build on the given engine, racing the phase walk against the
/// cancel future and the timeout. The engine is destroyed on every path
/// before the outcome is reported.
///
/// # Errors
///
/// Returns any compilation error; execution itself reports through the
/// [`Outcome`].
pub async fn run_with_engine(
    payload: Payload,
    mut opt: Options,
    engine: Arc<dyn Engine>,
    cancel: impl Future<Output = ()>,
    timeout: Duration,
) -> Result<Outcome, Error> {
    let (tree, workspace) = compile(&payload, &mut opt)?;
    let runner = Runner::load(tree);
    let mut state = State::new(
        engine.clone(),
        stdout_sink(),
        payload.repo,
        payload.build,
        payload.build_last,
        payload.job,
        payload.system,
        workspace,
    );

    let raced = {
        let phases = run_phases(&runner, &mut state, &opt);
        tokio::pin!(phases);
        tokio::pin!(cancel);
        tokio::select! {
            () = &mut phases => Raced::Done,
            () = &mut cancel => Raced::Cancelled,
            () = tokio::time::sleep(timeout) => Raced::TimedOut,
        }
    };
    engine.destroy().await;

    match raced {
        Raced::Done if state.failed() => Ok(Outcome::Failed {
            exit_code: state.exit_code(),
        }),
        Raced::Done => Ok(Outcome::Success),
        Raced::Cancelled => {
            tracing::warn!("build cancelled");
            Ok(Outcome::Cancelled)
        }
        Raced::TimedOut => {
            tracing::warn!(minutes = timeout.as_secs() / 60, "build timed out");
            Ok(Outcome::TimedOut)
        }
    }
}

async fn run_phases(runner: &Runner, state: &mut State, opt: &Options) {
    let hook = LogHook;
    if opt.cache {
        runner.run_phase(state, Phase::Cache, &hook).await;
    }
    if opt.clone {
        runner.run_phase(state, Phase::Clone, &hook).await;
    }
    if opt.build && !state.failed() {
        runner.run_phase(state, Phase::Compose, &hook).await;
        runner.run_phase(state, Phase::Build, &hook).await;
    }
    if opt.deploy && !state.failed() {
        runner.run_phase(state, Phase::Publish, &hook).await;
        runner.run_phase(state, Phase::Deploy, &hook).await;
    }
    state.mark_success();
    // The cache rebuild and notifications run regardless of failure;
    // notify guards decide for themselves.
    if opt.cache {
        runner.run_phase(state, Phase::Cache, &hook).await;
    }
    if opt.notify {
        runner.run_phase(state, Phase::Notify, &hook).await;
    }
}

/// Resolves when the process receives SIGINT or SIGTERM.
pub async fn cancel_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let interrupt = signal(SignalKind::interrupt());
    let terminate = signal(SignalKind::terminate());
    match (interrupt, terminate) {
        (Ok(mut interrupt), Ok(mut terminate)) => {
            tokio::select! {
                _ = interrupt.recv() => {}
                _ = terminate.recv() => {}
            }
        }
        _ => {
            tracing::warn!("signal handlers unavailable; cancellation disabled");
            futures::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{Build, Keypair, Repo, EVENT_PULL_REQUEST, EVENT_PUSH};

    const KEY: &str = "6368616e676520746869732070617373776f726420746f206120736563726574";

    fn payload(yaml: &str) -> Payload {
        Payload {
            yaml: yaml.to_string(),
            repo: Repo {
                full_name: "acme/hello".to_string(),
                link: "https://github.com/acme/hello".to_string(),
                ..Repo::default()
            },
            build: Build {
                number: 1,
                event: EVENT_PUSH.to_string(),
                branch: "master".to_string(),
                commit: "0123456789abcdef".to_string(),
                ..Build::default()
            },
            ..Payload::default()
        }
    }

    #[test]
    fn test_compile_simple_document() {
        let mut opt = Options {
            build: true,
            ..Options::default()
        };
        let (tree, workspace) =
            compile(&payload("build:\n  image: golang\n  commands: [go build]"), &mut opt)
                .unwrap();
        assert_eq!(workspace.path, "/gantry/src/github.com/acme/hello");
        let mut images = Vec::new();
        tree.each_step(&mut |step| images.push(step.image.clone()));
        assert!(images.contains(&"golang".to_string()));
    }

    #[test]
    fn test_compile_injects_matrix_params() {
        let mut opt = Options::default();
        let yaml = "build:\n  image: golang\n  commands:\n    - echo $$COMMIT_SHORT on $$BRANCH";
        let (tree, _) = compile(&payload(yaml), &mut opt).unwrap();
        let mut commands = Vec::new();
        tree.each_step(&mut |step| commands.extend(step.commands.clone()));
        assert_eq!(commands, vec!["echo 0123456789abcdef on master"]);
    }

    #[test]
    fn test_compile_unverified_disables_deploy_and_notify() {
        let sealed = secrets::seal("environment:\n  TOKEN: hunter2\n", KEY).unwrap();
        let mut p = payload("build:\n  image: golang");
        p.yaml_enc = sealed;
        p.keys = Some(Keypair {
            private: KEY.to_string(),
            ..Keypair::default()
        });
        p.build.event = EVENT_PULL_REQUEST.to_string();
        // Public repository pull request with no checksum: untrusted.
        p.repo.private = false;

        let mut opt = Options {
            deploy: true,
            notify: true,
            ..Options::default()
        };
        compile(&p, &mut opt).unwrap();
        assert!(!opt.deploy);
        assert!(!opt.notify);
    }

    #[test]
    fn test_compile_verified_full_injects_secrets() {
        let yaml = "deploy:\n  ssh:\n    image: plugins/drone-ssh\n    token: $$TOKEN";
        let plaintext = format!(
            "checksum: {}\nenvironment:\n  TOKEN: hunter2\n",
            secrets::checksum(yaml)
        );
        let sealed = secrets::seal(&plaintext, KEY).unwrap();
        let mut p = payload(yaml);
        p.yaml_enc = sealed;
        p.keys = Some(Keypair {
            private: KEY.to_string(),
            ..Keypair::default()
        });

        let mut opt = Options::default();
        let (tree, _) = compile(&p, &mut opt).unwrap();
        let mut found = false;
        tree.each_step(&mut |step| {
            if step.phase == Phase::Deploy {
                found = true;
                assert_eq!(
                    step.vargs.get("token").and_then(|v| v.as_str()),
                    Some("hunter2")
                );
            }
        });
        assert!(found);
    }

    #[test]
    fn test_compile_workspace_from_payload_wins() {
        let mut p = payload("build:\n  image: golang");
        p.workspace = Some(Workspace {
            root: "/custom".to_string(),
            path: "/custom/checkout".to_string(),
            ..Workspace::default()
        });
        let mut opt = Options::default();
        let (_, workspace) = compile(&p, &mut opt).unwrap();
        assert_eq!(workspace.path, "/custom/checkout");
    }

    #[test]
    fn test_outcome_exit_codes() {
        assert_eq!(Outcome::Success.exit_code(), 0);
        assert_eq!(Outcome::Failed { exit_code: 3 }.exit_code(), 3);
        assert_eq!(Outcome::Cancelled.exit_code(), 130);
        assert_eq!(Outcome::TimedOut.exit_code(), 128);
    }
}
