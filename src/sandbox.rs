mod build;
mod classify;
mod process;
mod run;

pub use build::{BuildLimits, build};
pub use classify::classify;
pub use run::{RunLimits, run};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::detect::Detection;
use crate::submission::Submission;

/// Result of the compile step for one submission.
///
/// Interpreted languages get a no-op success carrying the run command, so
/// downstream stages never special-case "needs compiling".
#[derive(Debug)]
pub struct BuildResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub program: Option<BuiltProgram>,
}

/// A runnable artifact: the fully expanded run command plus the isolated
/// working directory it must run in.
#[derive(Debug, Clone)]
pub struct BuiltProgram {
    pub command: Vec<String>,
    pub workdir: PathBuf,
}

/// Captured output stream, capped at the configured byte budget.
#[derive(Debug, Default, Clone)]
pub struct CapturedStream {
    pub content: String,
    pub truncated: bool,
}

/// Telemetry of one run attempt. Immutable once produced.
///
/// Invariant: `timed_out == true` implies `exit_code == None` — a deadline
/// kill never reports a concrete exit code.
#[derive(Debug)]
pub struct ExecutionResult {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub timed_out: bool,
    pub memory_exceeded: bool,
    pub duration: Duration,
    pub peak_memory_kb: Option<u64>,
    pub stdout: CapturedStream,
    pub stderr: CapturedStream,
}

/// Closed classification of an evaluation outcome. Drives the execution
/// sub-score; the variant names are a stable contract with exporters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutionState {
    NotAttempted,
    CompileFailed,
    TimedOut,
    Crashed,
    RanWithErrorOutput,
    RanSuccessfully,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::NotAttempted => "NotAttempted",
            ExecutionState::CompileFailed => "CompileFailed",
            ExecutionState::TimedOut => "TimedOut",
            ExecutionState::Crashed => "Crashed",
            ExecutionState::RanWithErrorOutput => "RanWithErrorOutput",
            ExecutionState::RanSuccessfully => "RanSuccessfully",
        }
    }
}

/// Faults of the grading environment itself, as opposed to failures of the
/// submission under test. A faulted evaluation is reported distinctly and
/// never scored against the student.
#[derive(Debug, Error)]
pub enum SandboxFault {
    #[error("toolchain binary `{program}` is not available on this host")]
    MissingToolchain {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sandbox workspace error")]
    Workspace(#[from] std::io::Error),
    #[error("evaluation cancelled")]
    Cancelled,
}

/// Build result, run telemetry and classified state for one submission.
#[derive(Debug)]
pub struct EvaluationOutcome {
    pub build: BuildResult,
    pub execution: Option<ExecutionResult>,
    pub state: ExecutionState,
}

/// Runs the full build-then-run pipeline for one detected submission inside
/// `workdir`. Build always completes (or fails) before any run is attempted;
/// a compile failure ends the attempt without aborting the caller's batch.
pub async fn evaluate(
    submission: &Submission,
    detection: &Detection,
    workdir: &Path,
    build_limits: &BuildLimits,
    output_cap: usize,
    token: &CancellationToken,
) -> Result<EvaluationOutcome, SandboxFault> {
    materialize(submission, workdir)?;

    let build = build::build(detection, workdir, build_limits, token).await?;
    if !build.success {
        let state = classify::classify(&build, None);
        return Ok(EvaluationOutcome {
            build,
            execution: None,
            state,
        });
    }

    // Compile success always produces a program; anything else is a fault of
    // the environment, not of the submission.
    let Some(program) = build.program.clone() else {
        return Err(SandboxFault::Workspace(std::io::Error::other(
            "successful build produced no runnable program",
        )));
    };

    let limits = RunLimits {
        wall_time: detection.profile.run_timeout,
        memory_limit_kb: detection.profile.memory_limit_kb,
        hard_address_limit: detection.profile.hard_address_limit,
        output_cap,
    };
    let execution = run::run(&program, &limits, token).await?;
    let state = classify::classify(&build, Some(&execution));

    Ok(EvaluationOutcome {
        build,
        execution: Some(execution),
        state,
    })
}

/// Writes the submission's files into the isolated working directory.
fn materialize(submission: &Submission, workdir: &Path) -> Result<(), SandboxFault> {
    for file in &submission.files {
        let target = workdir.join(&file.path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, &file.content)?;
    }
    Ok(())
}

/// Per-run isolated working directory, removed (best effort) on drop so
/// concurrent runs never share state.
pub struct RunWorkspace {
    path: PathBuf,
}

impl RunWorkspace {
    pub fn create(base: &Path, tag: &str) -> Result<Self, SandboxFault> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static SEQ: AtomicU64 = AtomicU64::new(0);

        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        let sanitized: String = tag
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let path = base.join(format!("{sanitized}-{}-{seq}", std::process::id()));
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunWorkspace {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            log::warn!("failed to remove workspace {}: {e}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::SourceFile;
    use pretty_assertions::assert_eq;

    #[test]
    fn execution_state_names_are_stable() {
        let states = [
            (ExecutionState::NotAttempted, "NotAttempted"),
            (ExecutionState::CompileFailed, "CompileFailed"),
            (ExecutionState::TimedOut, "TimedOut"),
            (ExecutionState::Crashed, "Crashed"),
            (ExecutionState::RanWithErrorOutput, "RanWithErrorOutput"),
            (ExecutionState::RanSuccessfully, "RanSuccessfully"),
        ];
        for (state, name) in states {
            assert_eq!(state.as_str(), name);
            assert_eq!(
                serde_json::to_value(state).unwrap(),
                serde_json::Value::String(name.to_string())
            );
        }
    }

    #[test]
    fn materialize_writes_nested_files() {
        let workspace =
            RunWorkspace::create(&std::env::temp_dir().join("codegrade-tests"), "materialize")
                .unwrap();
        let submission = Submission::new(
            "g",
            vec![
                SourceFile {
                    path: PathBuf::from("src/main.c"),
                    content: b"int main(){return 0;}".to_vec(),
                },
                SourceFile {
                    path: PathBuf::from("README"),
                    content: b"hello".to_vec(),
                },
            ],
        );
        materialize(&submission, workspace.path()).unwrap();
        assert!(workspace.path().join("src/main.c").exists());
        assert_eq!(
            fs::read_to_string(workspace.path().join("README")).unwrap(),
            "hello"
        );
    }

    #[test]
    fn workspace_is_removed_on_drop() {
        let base = std::env::temp_dir().join("codegrade-tests");
        let path = {
            let workspace = RunWorkspace::create(&base, "drop-check").unwrap();
            workspace.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
