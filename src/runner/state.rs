//! Mutable build state threaded through the walk.

use std::sync::Arc;

use crate::infrastructure::{Engine, OutputSink};
use crate::payload::{Build, Job, Repo, System, Workspace, STATE_SUCCESS};

/// Exit code reported when a container cannot be launched at all.
pub const EXIT_LAUNCH_FAILURE: i32 = 255;

/// Everything a step needs while running, plus the failure latch.
pub struct State {
    /// Container backend for this build.
    pub engine: Arc<dyn Engine>,
    /// Where step output goes.
    pub sink: OutputSink,
    /// Repository metadata.
    pub repo: Repo,
    /// Build metadata.
    pub build: Build,
    /// The previous build, for change-detection guards.
    pub build_last: Option<Build>,
    /// Job metadata.
    pub job: Job,
    /// Installation metadata.
    pub system: System,
    /// Resolved workspace.
    pub workspace: Workspace,
    failed: bool,
    exit_code: i32,
}

impl State {
    /// Fresh state for one build.
    pub fn new(
        engine: Arc<dyn Engine>,
        sink: OutputSink,
        repo: Repo,
        build: Build,
        build_last: Option<Build>,
        job: Job,
        system: System,
        workspace: Workspace,
    ) -> Self {
        Self {
            engine,
            sink,
            repo,
            build,
            build_last,
            job,
            system,
            workspace,
            failed: false,
            exit_code: 0,
        }
    }

    /// Records a step exit code. The first non-zero code wins and latches
    /// the failure flag; later codes never overwrite it.
    pub fn exit(&mut self, code: i32) {
        if code != 0 {
            self.failed = true;
            if self.exit_code == 0 {
                self.exit_code = code;
            }
        }
    }

    /// True once any step has failed.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// The build exit code so far; zero while nothing failed.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Flips build and job status to success, unless something failed.
    pub fn mark_success(&mut self) {
        if !self.failed {
            self.build.status = STATE_SUCCESS.to_string();
            self.job.status = STATE_SUCCESS.to_string();
        }
    }
}
