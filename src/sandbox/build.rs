use std::path::Path;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::process::{SpawnSpec, supervise};
use super::{BuildResult, BuiltProgram, SandboxFault};
use crate::detect::Detection;
use crate::registry::CommandContext;

/// Bounds applied to the compiler subprocess. The compile deadline is its own
/// budget, shorter than the run deadline by default.
#[derive(Debug, Clone)]
pub struct BuildLimits {
    pub timeout: Duration,
    pub output_cap: usize,
}

impl Default for BuildLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            output_cap: 64 * 1024,
        }
    }
}

/// Compiles the detected entry point inside `workdir`.
///
/// Interpreted languages are a no-op success producing the run command
/// directly; compiled languages go through a bounded compiler subprocess with
/// diagnostics captured verbatim.
pub async fn build(
    detection: &Detection,
    workdir: &Path,
    limits: &BuildLimits,
    token: &CancellationToken,
) -> Result<BuildResult, SandboxFault> {
    let profile = &detection.profile;
    let ctx = command_context(detection, workdir);

    let Some(compile_template) = &profile.compile_command else {
        log::debug!("{}: interpreted, skipping compile step", profile.name);
        return Ok(BuildResult {
            success: true,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::ZERO,
            program: Some(BuiltProgram {
                command: ctx.expand(&profile.run_command),
                workdir: workdir.to_path_buf(),
            }),
        });
    };

    let command = ctx.expand(compile_template);
    log::debug!("{}: compiling with {:?}", profile.name, command);

    let spec = SpawnSpec {
        command: &command,
        workdir,
        wall_time: limits.timeout,
        // Compilers get no ceiling at all; they are trusted tools.
        memory_limit_kb: None,
        hard_address_limit: false,
        output_cap: limits.output_cap,
    };
    let report = supervise(spec, token).await?;

    let mut stderr = report.stderr.content;
    if report.timed_out {
        if !stderr.is_empty() {
            stderr.push('\n');
        }
        stderr.push_str(&format!(
            "compiler exceeded the {}s compile deadline",
            limits.timeout.as_secs()
        ));
    }

    // Success requires a clean exit, and the promised artifact where the
    // template names one.
    let artifact_ok = !compile_template.iter().any(|arg| arg.contains("%OUTPUT%"))
        || Path::new(&ctx.output).exists();
    let success = report.exit_code == Some(0) && !report.timed_out && artifact_ok;

    let program = success.then(|| BuiltProgram {
        command: ctx.expand(&profile.run_command),
        workdir: workdir.to_path_buf(),
    });

    Ok(BuildResult {
        success,
        stdout: report.stdout.content,
        stderr,
        duration: report.duration,
        program,
    })
}

fn command_context(detection: &Detection, workdir: &Path) -> CommandContext {
    let input = workdir.join(&detection.entry);
    let class_name = detection
        .entry
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    CommandContext {
        input: input.to_string_lossy().into_owned(),
        output: workdir.join("main").to_string_lossy().into_owned(),
        class_name,
        dir: workdir.to_string_lossy().into_owned(),
    }
}
