//! The execution engine: walks the compiled tree phase by phase.
//!
//! Each pass over the tree runs only the leaves of one phase; list nodes
//! run children in order, filter nodes evaluate their guard lazily against
//! the build state at arrival time. Step results feed the failure latch in
//! [`State`], which later guards and the build phase consult.

pub mod script;
pub mod state;

pub use state::{State, EXIT_LAUNCH_FAILURE};

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;

use crate::infrastructure::{LaunchSpec, RegistryAuth};
use crate::payload::{STATE_FAILURE, STATE_SUCCESS};
use crate::pipeline::config::When;
use crate::pipeline::parser::rules::match_pattern;
use crate::pipeline::{Node, Phase, StepNode, Tree};

/// Observer of step lifecycle events.
///
/// Hooks exist for reporting; they cannot alter the walk.
pub trait StepHook: Send + Sync {
    /// A step is about to launch.
    fn started(&self, _name: &str, _phase: Phase) {}
    /// A step was skipped (wrong phase or failed build).
    fn skipped(&self, _name: &str, _phase: Phase) {}
    /// A step finished with the given exit code.
    fn finished(&self, _name: &str, _phase: Phase, _code: i32) {}
}

/// A hook that reports through tracing.
pub struct LogHook;

impl StepHook for LogHook {
    fn started(&self, name: &str, phase: Phase) {
        tracing::info!(step = name, phase = phase.as_str(), "step started");
    }

    fn skipped(&self, name: &str, phase: Phase) {
        tracing::debug!(step = name, phase = phase.as_str(), "step skipped");
    }

    fn finished(&self, name: &str, phase: Phase, code: i32) {
        tracing::info!(step = name, phase = phase.as_str(), code, "step finished");
    }
}

/// Walks a compiled tree one phase at a time.
pub struct Runner {
    tree: Tree,
}

impl Runner {
    /// Wraps a compiled tree for execution.
    #[must_use]
    pub fn load(tree: Tree) -> Self {
        Self { tree }
    }

    /// Runs every leaf of `phase`, in tree order.
    pub async fn run_phase(&self, state: &mut State, phase: Phase, hook: &dyn StepHook) {
        walk(&self.tree.root, state, phase, hook).await;
    }
}

fn walk<'a>(
    node: &'a Node,
    state: &'a mut State,
    phase: Phase,
    hook: &'a dyn StepHook,
) -> BoxFuture<'a, ()> {
    async move {
        match node {
            Node::List(children) => {
                for child in children {
                    walk(child, state, phase, hook).await;
                }
            }
            Node::Filter { when, node } => {
                if guard_matches(when, state) {
                    walk(node, state, phase, hook).await;
                } else {
                    skip_subtree(node, hook);
                }
            }
            Node::Step(step) => run_step(step, state, phase, hook).await,
        }
    }
    .boxed()
}

/// Reports every leaf under a ruled-out guard as skipped, so tooling can
/// still render declared steps that never ran.
fn skip_subtree(node: &Node, hook: &dyn StepHook) {
    match node {
        Node::List(children) => {
            for child in children {
                skip_subtree(child, hook);
            }
        }
        Node::Filter { node, .. } => skip_subtree(node, hook),
        Node::Step(step) => hook.skipped(step.name(), step.phase),
    }
}

/// Evaluates a guard against the build state at arrival time.
fn guard_matches(when: &When, state: &State) -> bool {
    if !when.branch.is_empty()
        && !when
            .branch
            .iter()
            .any(|p| match_pattern(p, &state.build.branch))
    {
        return false;
    }
    if !when.event.is_empty()
        && !when
            .event
            .iter()
            .any(|p| match_pattern(p, &state.build.event))
    {
        return false;
    }
    // The status pair is one condition: the step runs when any named
    // status matches the build so far.
    if when.success.is_some() || when.failure.is_some() {
        let allowed = (when.success == Some(true) && !state.failed())
            || (when.failure == Some(true) && state.failed());
        if !allowed {
            return false;
        }
    }
    if let Some(want) = when.change {
        let current = if state.failed() {
            STATE_FAILURE
        } else {
            STATE_SUCCESS
        };
        let changed = state
            .build_last
            .as_ref()
            .map_or(true, |last| last.status != current);
        if changed != want {
            return false;
        }
    }
    true
}

async fn run_step(step: &StepNode, state: &mut State, phase: Phase, hook: &dyn StepHook) {
    if step.phase != phase {
        hook.skipped(step.name(), step.phase);
        return;
    }
    // A failed build stops compiling; everything after the build phase is
    // guarded by the caller, and further build steps are pointless.
    if phase == Phase::Build && state.failed() {
        hook.skipped(step.name(), step.phase);
        return;
    }

    let spec = launch_spec(step, state);
    hook.started(step.name(), step.phase);

    if phase == Phase::Compose {
        // Services run detached; a launch failure still fails the build.
        let code = match state.engine.start(&spec).await {
            Ok(()) => 0,
            Err(err) => {
                tracing::warn!(step = step.name(), error = %err, "service failed to start");
                state.exit(EXIT_LAUNCH_FAILURE);
                EXIT_LAUNCH_FAILURE
            }
        };
        hook.finished(step.name(), step.phase, code);
        return;
    }

    let engine = state.engine.clone();
    let code = match engine.run(&spec, state.sink.clone()).await {
        Ok(code) => i32::try_from(code).unwrap_or(EXIT_LAUNCH_FAILURE),
        Err(err) => {
            tracing::warn!(step = step.name(), error = %err, "step failed to launch");
            EXIT_LAUNCH_FAILURE
        }
    };
    state.exit(code);
    hook.finished(step.name(), step.phase, code);
}

/// Materializes the launch request for one step.
fn launch_spec(step: &StepNode, state: &State) -> LaunchSpec {
    let mut spec = LaunchSpec {
        image: step.image.clone(),
        command: step.command.clone(),
        entrypoint: step.entrypoint.clone(),
        environment: step.environment.clone(),
        volumes: step.volumes.clone(),
        privileged: step.privileged,
        network_mode: step.network_mode.clone(),
        pull: step.pull,
        ..LaunchSpec::default()
    };
    if !step.auth.is_empty() {
        spec.auth = Some(RegistryAuth {
            username: step.auth.username.clone(),
            password: step.auth.password.clone(),
            email: step.auth.email.clone(),
            registry_token: step.auth.registry_token.clone(),
        });
    }

    match step.phase {
        Phase::Build => {
            spec.working_dir = state.workspace.path.clone();
            spec.environment.extend(metadata_environment(state));
            let netrc: &[_] = if state.repo.private {
                &state.workspace.netrc
            } else {
                &[]
            };
            let (entrypoint, command) = script::encode(&step.commands, netrc);
            spec.entrypoint = entrypoint;
            spec.command = command;
        }
        Phase::Compose => {}
        _ => {
            // Plugin steps receive the structured payload as their single
            // argument unless the document overrides the command.
            if spec.command.is_empty() {
                spec.command = vec![plugin_payload(step, state)];
            }
            if matches!(step.phase, Phase::Publish | Phase::Deploy) {
                spec.working_dir = state.workspace.path.clone();
            }
            if state.repo.private && !state.workspace.netrc.is_empty() {
                spec.environment.push(format!(
                    "NETRC_DATA={}",
                    netrc_data(&state.workspace.netrc)
                ));
            }
        }
    }
    spec
}

/// Standard CI environment exposed to build steps.
fn metadata_environment(state: &State) -> Vec<String> {
    vec![
        "CI=true".to_string(),
        "GANTRY=true".to_string(),
        format!("GANTRY_REPO={}", state.repo.full_name),
        format!("GANTRY_BRANCH={}", state.build.branch),
        format!("GANTRY_COMMIT={}", state.build.commit),
        format!("GANTRY_BUILD_NUMBER={}", state.build.number),
        format!("GANTRY_DIR={}", state.workspace.path),
    ]
}

fn netrc_data(entries: &[crate::payload::Netrc]) -> String {
    entries
        .iter()
        .filter(|n| !n.machine.is_empty())
        .map(|n| format!("machine {} login {} password {}", n.machine, n.login, n.password))
        .collect::<Vec<_>>()
        .join(" ")
}

fn plugin_payload(step: &StepNode, state: &State) -> String {
    let vargs = serde_json::to_value(&step.vargs).unwrap_or(Value::Null);
    serde_json::json!({
        "repo": state.repo,
        "build": state.build,
        "build_last": state.build_last,
        "job": state.job,
        "system": state.system,
        "workspace": state.workspace,
        "vargs": vargs,
    })
    .to_string()
}
