use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use codegrade::config::{CliArgs, Config, ExternalScores, SCORES_SIDECAR};
use codegrade::queue::{EvalTask, TaskQueue};
use codegrade::registry::ToolchainRegistry;
use codegrade::report::{self, ReportSink};
use codegrade::sandbox::BuildLimits;
use codegrade::submission::Submission;
use codegrade::worker::{EvalContext, worker};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let Config {
        workers: n_workers,
        compile_timeout_ms,
        output_cap_bytes,
        grading,
        languages,
    } = cli.to_config()?;

    let registry = ToolchainRegistry::with_config(&languages)?;
    let workdir_base = workdir_base()?;

    let ctx = Arc::new(EvalContext {
        registry,
        build_limits: BuildLimits {
            timeout: Duration::from_millis(compile_timeout_ms),
            output_cap: output_cap_bytes,
        },
        output_cap: output_cap_bytes,
        policy: grading,
        workdir_base,
    });
    let queue = Arc::new(TaskQueue::new());
    let sink = Arc::new(ReportSink::new());
    let shutdown_token = CancellationToken::new();

    let n_tasks = enqueue_submissions(Path::new(&cli.submissions_dir), &queue).await?;
    queue.close();
    log::info!("{n_tasks} submission(s) queued for evaluation");

    // ======= PREPARATION END, EXECUTION START =======

    let mut workers = JoinSet::new();
    for i in 1..=n_workers {
        workers.spawn(worker(
            i,
            ctx.clone(),
            queue.clone(),
            sink.clone(),
            shutdown_token.clone(),
        ));
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, aborting evaluation...");
            shutdown_token.cancel();
        }
        _ = async {
            while workers.join_next().await.is_some() {}
        } => {}
    }

    // Wait until every worker terminates; cancellation has already reached
    // any live child process group.
    while let Some(res) = workers.join_next().await {
        if let Err(e) = res {
            if e.is_panic() {
                log::error!("Worker handle panicked: {:?}", e);
            } else {
                log::error!("Worker handle finished with error: {:?}", e);
            }
        }
    }

    let reports = sink.take_sorted();
    if let Some(summary) = report::summarize(&reports) {
        log::info!(
            "evaluated {} group(s), {} graded: average {:.2}/20, best {:.2}, worst {:.2}",
            summary.evaluated,
            summary.graded,
            summary.average_grade,
            summary.best_grade,
            summary.worst_grade
        );
    }

    match &cli.output_path {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("failed to create report file {path}"))?;
            serde_json::to_writer_pretty(std::io::BufWriter::new(file), &reports)?;
            log::info!("batch report written to {path}");
        }
        None => {
            serde_json::to_writer_pretty(std::io::stdout().lock(), &reports)?;
            println!();
        }
    }

    Ok(())
}

/// Loads one submission per immediate subdirectory of `root`, with each
/// group's external sub-scores from its optional sidecar.
async fn enqueue_submissions(root: &Path, queue: &TaskQueue) -> Result<usize> {
    let mut groups: Vec<PathBuf> = std::fs::read_dir(root)
        .with_context(|| format!("failed to read submissions directory {}", root.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
        .map(|entry| entry.path())
        .collect();
    groups.sort();

    let mut count = 0;
    for dir in groups {
        let group_id = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        let mut submission = Submission::from_dir(&group_id, &dir)?;
        // the sidecar is grading metadata, not part of the submitted tree
        submission
            .files
            .retain(|f| f.path.as_os_str() != SCORES_SIDECAR);
        let scores = ExternalScores::load(&dir)?;
        queue
            .push(EvalTask {
                submission,
                code_score: scores.code,
                documentation_score: scores.documentation,
            })
            .await;
        count += 1;
    }
    Ok(count)
}

/// Base directory all per-run workspaces are created under.
fn workdir_base() -> Result<PathBuf> {
    use directories::ProjectDirs;

    let proj_dirs = ProjectDirs::from("", "", "codegrade")
        .ok_or_else(|| anyhow::anyhow!("Unable to find user directory"))?;
    let base = proj_dirs.cache_dir().join("runs");
    std::fs::create_dir_all(&base)?;
    Ok(base)
}
