use std::path::PathBuf;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use codegrade::config::LanguageProfileConfig;
use codegrade::detect::detect;
use codegrade::grading::{self, GradingPolicy};
use codegrade::registry::ToolchainRegistry;
use codegrade::sandbox::{self, BuildLimits, ExecutionState, RunWorkspace};
use codegrade::submission::{SourceFile, Submission};

const OUTPUT_CAP: usize = 64 * 1024;

/// Registry with a shell profile so the pipeline can be exercised end to end
/// without assuming any compiler on the host.
fn test_registry() -> ToolchainRegistry {
    ToolchainRegistry::with_config(&[LanguageProfileConfig {
        name: "Shell".to_string(),
        extensions: Some(vec!["sh".to_string()]),
        entry_names: Some(vec!["main.sh".to_string()]),
        compile_command: None,
        run_command: Some(vec!["/bin/sh".to_string(), "%INPUT%".to_string()]),
        run_timeout_ms: Some(2_000),
        memory_limit_kb: None,
        hard_address_limit: None,
        baseline_ms: Some(1_000),
    }])
    .unwrap()
}

fn toolchain_available(program: &str, arg: &str) -> bool {
    std::process::Command::new(program)
        .arg(arg)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn submission(group: &str, files: &[(&str, &str)]) -> Submission {
    Submission::new(
        group,
        files
            .iter()
            .map(|(path, content)| SourceFile {
                path: PathBuf::from(path),
                content: content.as_bytes().to_vec(),
            })
            .collect(),
    )
}

async fn evaluate(
    registry: &ToolchainRegistry,
    sub: &Submission,
) -> sandbox::EvaluationOutcome {
    let detection = detect(sub, registry).unwrap();
    let workspace = RunWorkspace::create(
        &std::env::temp_dir().join("codegrade-tests"),
        &sub.group_id,
    )
    .unwrap();
    sandbox::evaluate(
        sub,
        &detection,
        workspace.path(),
        &BuildLimits::default(),
        OUTPUT_CAP,
        &CancellationToken::new(),
    )
    .await
    .unwrap()
}

fn execution_grade(outcome: &sandbox::EvaluationOutcome) -> f64 {
    let duration = outcome
        .execution
        .as_ref()
        .map(|e| e.duration)
        .unwrap_or(Duration::ZERO);
    grading::execution_score(
        outcome.state,
        duration,
        Duration::from_secs(1),
        &GradingPolicy::default(),
    )
}

#[tokio::test]
async fn hello_world_runs_successfully_and_scores_high() {
    let registry = test_registry();
    let sub = submission("hello", &[("main.sh", "echo 'hello world'\n")]);
    let outcome = evaluate(&registry, &sub).await;

    assert_eq!(outcome.state, ExecutionState::RanSuccessfully);
    let execution = outcome.execution.as_ref().unwrap();
    assert_eq!(execution.exit_code, Some(0));
    assert_eq!(execution.stdout.content, "hello world\n");
    assert!(execution.stderr.content.is_empty());

    let score = execution_grade(&outcome);
    assert!((15.0..=20.0).contains(&score), "score was {score}");
}

#[tokio::test]
async fn stderr_output_downgrades_a_clean_exit() {
    let registry = test_registry();
    let sub = submission(
        "warny",
        &[("main.sh", "echo ok; echo 'deprecation warning' >&2\n")],
    );
    let outcome = evaluate(&registry, &sub).await;
    assert_eq!(outcome.state, ExecutionState::RanWithErrorOutput);

    let score = execution_grade(&outcome);
    assert!((10.0..=15.0).contains(&score), "score was {score}");
}

#[tokio::test]
async fn crashing_submission_is_classified_and_partially_credited() {
    let registry = test_registry();
    let sub = submission("crashy", &[("main.sh", "exit 2\n")]);
    let outcome = evaluate(&registry, &sub).await;
    assert_eq!(outcome.state, ExecutionState::Crashed);

    let score = execution_grade(&outcome);
    assert!((5.0..=8.0).contains(&score), "score was {score}");
}

#[tokio::test]
async fn infinite_loop_times_out_within_bounded_overhead() {
    let registry = test_registry();
    let sub = submission("looper", &[("main.sh", "while :; do :; done\n")]);
    let started = Instant::now();
    let outcome = evaluate(&registry, &sub).await;
    let elapsed = started.elapsed();

    assert_eq!(outcome.state, ExecutionState::TimedOut);
    let execution = outcome.execution.as_ref().unwrap();
    assert!(execution.timed_out);
    assert_eq!(execution.exit_code, None);
    // profile deadline is 2s; the pipeline must come back well before 2s + 2s
    assert!(elapsed < Duration::from_secs(4), "took {elapsed:?}");

    assert_eq!(execution_grade(&outcome), 5.0);
}

#[tokio::test]
async fn unbounded_output_is_truncated_and_marked() {
    let registry = test_registry();
    let sub = submission(
        "spewer",
        &[(
            "main.sh",
            "i=0; while [ $i -lt 5000 ]; do echo 'aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa'; i=$((i+1)); done\n",
        )],
    );
    let outcome = evaluate(&registry, &sub).await;

    let execution = outcome.execution.as_ref().unwrap();
    assert!(execution.stdout.truncated);
    assert_eq!(execution.stdout.content.len(), OUTPUT_CAP);
    assert_eq!(execution.exit_code, Some(0));
}

#[tokio::test]
async fn final_grade_combines_all_three_sub_scores() {
    let registry = test_registry();
    let sub = submission("combined", &[("main.sh", "true\n")]);
    let outcome = evaluate(&registry, &sub).await;
    assert_eq!(outcome.state, ExecutionState::RanSuccessfully);

    let duration = outcome.execution.as_ref().unwrap().duration;
    let grade = grading::score(
        outcome.state,
        duration,
        Duration::from_secs(1),
        16.0,
        12.0,
        &GradingPolicy::default(),
    )
    .unwrap();
    assert!(grade.execution_score >= 15.0);
    assert!(grade.final_grade >= 0.0 && grade.final_grade <= 20.0);
    // 0.4*16 + 0.3*exec + 0.3*12 with exec in [15,20]
    assert!(grade.final_grade >= 14.4);
}

// Real-toolchain scenarios with the default profiles. Each is guarded on its
// toolchain being present so the suite still passes on bare hosts.

#[tokio::test]
async fn minimal_c_program_compiles_runs_and_scores() {
    if !toolchain_available("gcc", "--version") {
        eprintln!("gcc not available, skipping native compile test");
        return;
    }
    let registry = ToolchainRegistry::with_defaults();
    let sub = submission("c-hello", &[("main.c", "int main(){return 0;}\n")]);
    let outcome = evaluate(&registry, &sub).await;

    assert!(outcome.build.success);
    let execution = outcome.execution.as_ref().unwrap();
    assert_eq!(execution.exit_code, Some(0));
    assert!(execution.stderr.content.is_empty());
    assert_eq!(outcome.state, ExecutionState::RanSuccessfully);
    assert!(execution_grade(&outcome) >= 15.0);
}

#[tokio::test]
async fn python_hello_world_runs_with_the_default_profile() {
    if !toolchain_available("python3", "--version") {
        eprintln!("python3 not available, skipping");
        return;
    }
    let registry = ToolchainRegistry::with_defaults();
    let sub = submission("py-hello", &[("main.py", "print('hello')\n")]);
    let outcome = evaluate(&registry, &sub).await;

    assert_eq!(outcome.state, ExecutionState::RanSuccessfully);
    assert_eq!(outcome.execution.as_ref().unwrap().stdout.content, "hello\n");
    assert!(execution_grade(&outcome) >= 15.0);
}

// The V8 and JVM runtimes reserve large virtual ranges at startup; these two
// pin down that the default memory ceiling does not kill them on launch.
#[tokio::test]
async fn javascript_hello_world_runs_with_the_default_profile() {
    if !toolchain_available("node", "--version") {
        eprintln!("node not available, skipping");
        return;
    }
    let registry = ToolchainRegistry::with_defaults();
    let sub = submission("js-hello", &[("main.js", "console.log('hello');\n")]);
    let outcome = evaluate(&registry, &sub).await;

    assert_eq!(outcome.state, ExecutionState::RanSuccessfully);
    let execution = outcome.execution.as_ref().unwrap();
    assert_eq!(execution.exit_code, Some(0));
    assert_eq!(execution.stdout.content, "hello\n");
    assert!(!execution.memory_exceeded);
    assert!(execution_grade(&outcome) >= 15.0);
}

#[tokio::test]
async fn java_hello_world_compiles_and_runs_with_the_default_profile() {
    if !toolchain_available("javac", "-version") || !toolchain_available("java", "-version") {
        eprintln!("JDK not available, skipping");
        return;
    }
    let registry = ToolchainRegistry::with_defaults();
    let source = "public class Main {\n    public static void main(String[] args) {\n        System.out.println(\"hello\");\n    }\n}\n";
    let sub = submission("java-hello", &[("Main.java", source)]);
    let outcome = evaluate(&registry, &sub).await;

    assert!(outcome.build.success, "compile failed: {}", outcome.build.stderr);
    let execution = outcome.execution.as_ref().unwrap();
    assert_eq!(execution.exit_code, Some(0));
    assert_eq!(execution.stdout.content, "hello\n");
    assert!(!execution.memory_exceeded);
    assert_eq!(outcome.state, ExecutionState::RanSuccessfully);
    assert!(execution_grade(&outcome) >= 15.0);
}

#[tokio::test]
async fn memory_hog_is_killed_and_scored_as_a_crash() {
    let registry = ToolchainRegistry::with_config(&[LanguageProfileConfig {
        name: "Shell".to_string(),
        extensions: Some(vec!["sh".to_string()]),
        entry_names: Some(vec!["main.sh".to_string()]),
        compile_command: None,
        run_command: Some(vec!["/bin/sh".to_string(), "%INPUT%".to_string()]),
        run_timeout_ms: Some(60_000),
        memory_limit_kb: Some(10_000),
        hard_address_limit: None,
        baseline_ms: Some(1_000),
    }])
    .unwrap();
    let sub = submission(
        "hoggy",
        &[(
            "main.sh",
            "a=$(head -c 50000000 /dev/zero | tr '\\0' x); sleep 30\n",
        )],
    );
    let outcome = evaluate(&registry, &sub).await;

    assert_eq!(outcome.state, ExecutionState::Crashed);
    let execution = outcome.execution.as_ref().unwrap();
    assert!(execution.memory_exceeded);
    assert!(!execution.timed_out);
    assert_eq!(execution_grade(&outcome), 6.0);
}

#[tokio::test]
async fn c_syntax_error_fails_compilation_and_scores_zero() {
    if !toolchain_available("gcc", "--version") {
        eprintln!("gcc not available, skipping native compile test");
        return;
    }
    let registry = ToolchainRegistry::with_defaults();
    let sub = submission("c-broken", &[("main.c", "int main( { this is not C\n")]);
    let outcome = evaluate(&registry, &sub).await;

    assert!(!outcome.build.success);
    assert_eq!(outcome.state, ExecutionState::CompileFailed);
    assert!(outcome.execution.is_none());
    // compiler diagnostics are surfaced verbatim
    assert!(!outcome.build.stderr.is_empty());
    assert_eq!(execution_grade(&outcome), 0.0);

    // documentation score still counts toward the final grade
    let grade = grading::score(
        outcome.state,
        Duration::ZERO,
        Duration::from_secs(1),
        0.0,
        18.0,
        &GradingPolicy::default(),
    )
    .unwrap();
    assert_eq!(grade.execution_score, 0.0);
    assert!(grade.final_grade > 5.0);
}
