//! One external tool invocation with captured output and a hard timeout.
//!
//! Each stage is a separate process with its own stdout/stderr capture; two
//! stages never share an error channel. A stage that overruns its timeout
//! is killed (`kill_on_drop`) and reported as [`StageFailure::TimedOut`].

use super::Stage;
use crate::config::ToolCommand;
use crate::error::StageFailure;
use serde::Serialize;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

/// Result of one stage: exit status plus captured diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub stage: Stage,
    /// Process exit code; `None` if it never ran, timed out, or was signalled.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// `None` on success.
    pub failure: Option<StageFailure>,
}

impl StageResult {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    /// The text a human should read to understand the stage's outcome:
    /// stderr, or stdout when stderr is empty.
    pub fn diagnostics(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }

    fn aborted(stage: Stage, start: Instant, failure: StageFailure) -> Self {
        Self {
            stage,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: start.elapsed().as_millis() as u64,
            failure: Some(failure),
        }
    }
}

/// Run `tool` with `paths` appended as positional arguments.
///
/// Never returns an error: every outcome, including a tool that cannot be
/// started, is folded into the [`StageResult`].
pub async fn run_stage(
    stage: Stage,
    tool: &ToolCommand,
    paths: &[&Path],
    timeout: Duration,
) -> StageResult {
    let start = Instant::now();
    let mut command = Command::new(&tool.program);
    command
        .args(&tool.args)
        .args(paths)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("{} stage: {} {:?} {:?}", stage, tool.program, tool.args, paths);

    let output = match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!("{} stage could not start '{}': {}", stage, tool.program, e);
            return StageResult::aborted(
                stage,
                start,
                StageFailure::SpawnFailed {
                    detail: format!("{}: {e}", tool.program),
                },
            );
        }
        Err(_) => {
            warn!("{} stage timed out after {:?}", stage, timeout);
            return StageResult::aborted(
                stage,
                start,
                StageFailure::TimedOut { timeout },
            );
        }
    };

    let mut result = StageResult {
        stage,
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        duration_ms: start.elapsed().as_millis() as u64,
        failure: None,
    };

    if !output.status.success() {
        warn!("{} stage exited with {:?}", stage, result.exit_code);
        result.failure = Some(StageFailure::ExitStatus {
            code: result.exit_code,
            diagnostics: result.diagnostics().to_string(),
        });
    } else {
        debug!("{} stage finished in {}ms", stage, result.duration_ms);
    }
    result
}
