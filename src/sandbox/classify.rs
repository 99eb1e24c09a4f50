use super::{BuildResult, ExecutionResult, ExecutionState};

/// Maps raw build/run telemetry to one execution state.
///
/// Precedence is deliberate policy: compilation problems dominate runtime
/// problems, and timeouts dominate generic crashes, because each earlier
/// state is diagnostically more specific than the ones after it.
pub fn classify(build: &BuildResult, execution: Option<&ExecutionResult>) -> ExecutionState {
    if !build.success {
        return ExecutionState::CompileFailed;
    }
    let Some(execution) = execution else {
        return ExecutionState::NotAttempted;
    };
    if execution.timed_out {
        return ExecutionState::TimedOut;
    }
    if execution.memory_exceeded || execution.signal.is_some() || execution.exit_code != Some(0) {
        return ExecutionState::Crashed;
    }
    if !execution.stderr.content.is_empty() {
        return ExecutionState::RanWithErrorOutput;
    }
    ExecutionState::RanSuccessfully
}
