use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::grading::{self, GradingPolicy};
use crate::queue::{EvalTask, TaskQueue};
use crate::registry::ToolchainRegistry;
use crate::report::{ReportSink, SubmissionReport};
use crate::sandbox::{self, BuildLimits, ExecutionState, RunWorkspace, SandboxFault};

/// Read-only evaluation context shared by all workers. The only state shared
/// across concurrent runs; everything mutable is per-run.
pub struct EvalContext {
    pub registry: ToolchainRegistry,
    pub build_limits: BuildLimits,
    pub output_cap: usize,
    pub policy: GradingPolicy,
    pub workdir_base: PathBuf,
}

/// One evaluation worker: pulls tasks until the queue closes or the token
/// fires, runs each submission's pipeline in an isolated workspace, and
/// pushes the finished report into the sink.
pub async fn worker(
    id: u8,
    ctx: Arc<EvalContext>,
    queue: Arc<TaskQueue>,
    sink: Arc<ReportSink>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    log::info!("Worker {id} initialized");

    loop {
        let task = tokio::select! {
            _ = token.cancelled() => {
                log::info!("Worker {id} received shutdown signal, stopping");
                break;
            }
            task = queue.pop() => match task {
                Some(task) => task,
                None => {
                    log::debug!("Worker {id} drained the queue, stopping");
                    break;
                }
            },
        };

        let group = task.submission.group_id.clone();
        log::info!("Worker {id} evaluating group {group}");

        match evaluate_task(&ctx, &task, &token).await {
            Some(report) => sink.push(report),
            // Cancellation mid-pipeline: the child is already dead, just stop.
            None => {
                log::info!("Worker {id} cancelled while evaluating group {group}");
                break;
            }
        }
    }

    log::info!("Worker {id} has shut down");
    Ok(())
}

/// Runs detection, build, run, classification and grading for one task.
/// Returns `None` only when the evaluation was cancelled.
async fn evaluate_task(
    ctx: &EvalContext,
    task: &EvalTask,
    token: &CancellationToken,
) -> Option<SubmissionReport> {
    let submission = &task.submission;

    let detection = match crate::detect::detect(submission, &ctx.registry) {
        Ok(detection) => detection,
        Err(error) => {
            log::warn!("group {}: {error}", submission.group_id);
            return Some(detection_failure_report(ctx, task, &error));
        }
    };
    log::debug!(
        "group {}: detected {} (entry {})",
        submission.group_id,
        detection.profile.name,
        detection.entry.display()
    );

    let workspace = match RunWorkspace::create(&ctx.workdir_base, &submission.group_id) {
        Ok(workspace) => workspace,
        Err(fault) => {
            log::error!("group {}: {fault}", submission.group_id);
            return Some(SubmissionReport::from_fault(submission, &ctx.registry, fault));
        }
    };

    let outcome = sandbox::evaluate(
        submission,
        &detection,
        workspace.path(),
        &ctx.build_limits,
        ctx.output_cap,
        token,
    )
    .await;

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(SandboxFault::Cancelled) => return None,
        Err(fault) => {
            // A broken grading host, not a bad submission; never scored.
            log::error!("group {}: grading environment fault: {fault}", submission.group_id);
            return Some(SubmissionReport::from_fault(submission, &ctx.registry, fault));
        }
    };

    let duration = outcome
        .execution
        .as_ref()
        .map(|e| e.duration)
        .unwrap_or(Duration::ZERO);
    let grade = match grading::score(
        outcome.state,
        duration,
        detection.profile.baseline,
        task.code_score,
        task.documentation_score,
        &ctx.policy,
    ) {
        Ok(grade) => grade,
        Err(error) => {
            log::error!("group {}: {error}", submission.group_id);
            return Some(SubmissionReport::from_fault(submission, &ctx.registry, error));
        }
    };

    log::info!(
        "group {}: {} in {:?}, final grade {:.2}/20",
        submission.group_id,
        outcome.state.as_str(),
        duration,
        grade.final_grade
    );

    Some(SubmissionReport::from_outcome(
        submission,
        &ctx.registry,
        &detection,
        &outcome,
        grade,
    ))
}

fn detection_failure_report(
    ctx: &EvalContext,
    task: &EvalTask,
    error: &crate::detect::DetectionError,
) -> SubmissionReport {
    // Unresolved language: the execution sub-score is zero but static and
    // documentation scores still count toward the final grade.
    match grading::score(
        ExecutionState::NotAttempted,
        Duration::ZERO,
        Duration::from_secs(1),
        task.code_score,
        task.documentation_score,
        &ctx.policy,
    ) {
        Ok(grade) => SubmissionReport::from_detection_failure(
            &task.submission,
            &ctx.registry,
            error,
            grade,
        ),
        Err(grading_error) => {
            SubmissionReport::from_fault(&task.submission, &ctx.registry, grading_error)
        }
    }
}
