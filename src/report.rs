use parking_lot::Mutex;
use serde::Serialize;

use crate::detect::{Detection, DetectionError};
use crate::grading::GradeBreakdown;
use crate::registry::ToolchainRegistry;
use crate::sandbox::{EvaluationOutcome, ExecutionState};
use crate::submission::Submission;

/// Language tag for one submitted file.
#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub path: String,
    pub language: String,
}

/// The serialized record exporters consume, one per submission.
///
/// Field names and the `execution_state` vocabulary are a stable contract:
/// they must not change silently between versions.
#[derive(Debug, Serialize)]
pub struct SubmissionReport {
    pub group_id: String,
    pub evaluated_at: String,
    pub files: Vec<FileRecord>,
    pub language: Option<String>,
    pub entry_file: Option<String>,
    pub detection_error: Option<String>,
    pub compile_success: bool,
    pub compile_output: String,
    pub execution_state: ExecutionState,
    pub execution_time_us: u64,
    pub exit_code: Option<i32>,
    pub peak_memory_kb: Option<u64>,
    pub stdout: String,
    pub stdout_truncated: bool,
    pub stderr: String,
    pub stderr_truncated: bool,
    /// Absent exactly when the evaluation faulted: a grading-environment
    /// problem is never scored as a zero against the student.
    pub grade: Option<GradeBreakdown>,
    pub system_fault: Option<String>,
}

impl SubmissionReport {
    fn base(submission: &Submission, registry: &ToolchainRegistry) -> Self {
        let files = submission
            .files
            .iter()
            .map(|f| FileRecord {
                path: f.path.to_string_lossy().into_owned(),
                language: crate::detect::file_language(registry, &f.path)
                    .unwrap_or_else(|| "Unknown".to_string()),
            })
            .collect();
        Self {
            group_id: submission.group_id.clone(),
            evaluated_at: crate::create_timestamp(),
            files,
            language: None,
            entry_file: None,
            detection_error: None,
            compile_success: false,
            compile_output: String::new(),
            execution_state: ExecutionState::NotAttempted,
            execution_time_us: 0,
            exit_code: None,
            peak_memory_kb: None,
            stdout: String::new(),
            stdout_truncated: false,
            stderr: String::new(),
            stderr_truncated: false,
            grade: None,
            system_fault: None,
        }
    }

    /// Record for a completed build/run pipeline.
    pub fn from_outcome(
        submission: &Submission,
        registry: &ToolchainRegistry,
        detection: &Detection,
        outcome: &EvaluationOutcome,
        grade: GradeBreakdown,
    ) -> Self {
        let mut report = Self::base(submission, registry);
        report.language = Some(detection.profile.name.clone());
        report.entry_file = Some(detection.entry.to_string_lossy().into_owned());
        report.compile_success = outcome.build.success;
        report.compile_output = join_output(&outcome.build.stdout, &outcome.build.stderr);
        report.execution_state = outcome.state;
        if let Some(execution) = &outcome.execution {
            report.execution_time_us = execution.duration.as_micros() as u64;
            report.exit_code = execution.exit_code;
            report.peak_memory_kb = execution.peak_memory_kb;
            report.stdout = execution.stdout.content.clone();
            report.stdout_truncated = execution.stdout.truncated;
            report.stderr = execution.stderr.content.clone();
            report.stderr_truncated = execution.stderr.truncated;
        }
        report.grade = Some(grade);
        report
    }

    /// Record for a submission whose language could not be resolved. The
    /// execution sub-score is zero but the other sub-scores still count.
    pub fn from_detection_failure(
        submission: &Submission,
        registry: &ToolchainRegistry,
        error: &DetectionError,
        grade: GradeBreakdown,
    ) -> Self {
        let mut report = Self::base(submission, registry);
        report.detection_error = Some(error.to_string());
        report.grade = Some(grade);
        report
    }

    /// Record for an evaluation the grading environment itself could not
    /// carry out. Carries no grade.
    pub fn from_fault(
        submission: &Submission,
        registry: &ToolchainRegistry,
        fault: impl std::fmt::Display,
    ) -> Self {
        let mut report = Self::base(submission, registry);
        report.system_fault = Some(fault.to_string());
        report
    }
}

fn join_output(stdout: &str, stderr: &str) -> String {
    match (stdout.is_empty(), stderr.is_empty()) {
        (true, true) => String::new(),
        (false, true) => stdout.to_string(),
        (true, false) => stderr.to_string(),
        (false, false) => format!("{stdout}\n{stderr}"),
    }
}

/// Thread-safe collector the workers push finished reports into.
#[derive(Default)]
pub struct ReportSink {
    reports: Mutex<Vec<SubmissionReport>>,
}

impl ReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, report: SubmissionReport) {
        self.reports.lock().push(report);
    }

    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains the collected reports, sorted by group for stable output.
    pub fn take_sorted(&self) -> Vec<SubmissionReport> {
        let mut reports = std::mem::take(&mut *self.reports.lock());
        reports.sort_by(|a, b| a.group_id.cmp(&b.group_id));
        reports
    }
}

/// Batch-level statistics over the graded (non-faulted) reports.
#[derive(Debug, Serialize)]
pub struct BatchSummary {
    pub evaluated: usize,
    pub graded: usize,
    pub average_grade: f64,
    pub best_grade: f64,
    pub worst_grade: f64,
}

pub fn summarize(reports: &[SubmissionReport]) -> Option<BatchSummary> {
    let grades: Vec<f64> = reports
        .iter()
        .filter_map(|r| r.grade.as_ref().map(|g| g.final_grade))
        .collect();
    if grades.is_empty() {
        return None;
    }
    Some(BatchSummary {
        evaluated: reports.len(),
        graded: grades.len(),
        average_grade: grades.iter().sum::<f64>() / grades.len() as f64,
        best_grade: grades.iter().cloned().fold(f64::MIN, f64::max),
        worst_grade: grades.iter().cloned().fold(f64::MAX, f64::min),
    })
}
