use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::process::{SpawnSpec, supervise};
use super::{BuiltProgram, ExecutionResult, SandboxFault};

/// Bounds enforced on the submission's run: wall-clock deadline, best-effort
/// memory ceiling, and the capture cap for each output stream.
#[derive(Debug, Clone)]
pub struct RunLimits {
    pub wall_time: Duration,
    pub memory_limit_kb: Option<u64>,
    /// Back the ceiling with a hard `RLIMIT_AS` as well. Must stay off for
    /// VM runtimes; see [`crate::registry::LanguageProfile`].
    pub hard_address_limit: bool,
    pub output_cap: usize,
}

/// Runs a built program under the given limits.
///
/// The child gets no stdin, runs in the program's isolated working directory
/// and its own process group, and is forcibly killed (whole group) on
/// deadline expiry, memory ceiling breach or cancellation.
pub async fn run(
    program: &BuiltProgram,
    limits: &RunLimits,
    token: &CancellationToken,
) -> Result<ExecutionResult, SandboxFault> {
    log::debug!(
        "running {:?} in {} (deadline {:?})",
        program.command,
        program.workdir.display(),
        limits.wall_time
    );

    let spec = SpawnSpec {
        command: &program.command,
        workdir: &program.workdir,
        wall_time: limits.wall_time,
        memory_limit_kb: limits.memory_limit_kb,
        hard_address_limit: limits.hard_address_limit,
        output_cap: limits.output_cap,
    };
    let result = supervise(spec, token).await?;

    if result.timed_out {
        log::info!(
            "run killed at the {:?} deadline after {:?}",
            limits.wall_time,
            result.duration
        );
    } else if result.memory_exceeded {
        log::info!(
            "run killed over the {:?} KB memory ceiling",
            limits.memory_limit_kb
        );
    }

    Ok(result)
}
