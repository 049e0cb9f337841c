//! The per-job execution pipeline: workspace, compile phase, run phase,
//! per-test I/O, bounded capture.

use crate::error::SandboxError;
use crate::languages::{Language, LanguagePlan};
use crate::limits::ResourceLimits;
use crate::protocol::{
    parse_runner_output, truncate_with_marker, OUTPUT_CAP_PAYLOAD,
};
use crate::runtime::{ContainerRuntime, RunOutput, RunSpec};
use crate::workspace::JobWorkspace;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One test case fed to the program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub input: String,
    pub expected_output: String,
    #[serde(default)]
    pub stop_on_failure: bool,
}

/// One job handed to the harness.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub submission_id: Uuid,
    pub language: Language,
    pub code: Vec<u8>,
    pub limits: ResourceLimits,
    pub test_cases: Vec<TestCase>,
}

/// Execution-level status of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    TimedOut,
    MemoryExceeded,
    Crashed,
    Skipped,
}

impl RunStatus {
    /// Severity for picking the overall status; higher wins.
    fn severity(&self) -> u8 {
        match self {
            Self::Completed => 0,
            Self::Skipped => 1,
            Self::Crashed => 2,
            Self::MemoryExceeded => 3,
            Self::TimedOut => 4,
        }
    }
}

/// Result of running one test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRun {
    pub test_id: String,
    pub status: RunStatus,
    /// Trimmed-equality check against the expected output. The judge
    /// applies the configured comparison mode on top of this.
    pub passed: bool,
    pub input: String,
    pub expected: String,
    pub actual: String,
    pub wall_time_ms: u64,
}

/// The structured execution result for one submission attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub success: bool,
    pub status: RunStatus,
    pub output: String,
    pub error: String,
    pub exit_code: i64,
    /// Maximum wall time across runs, in milliseconds.
    pub execution_time_ms: u64,
    /// Peak memory across runs, in KB.
    pub memory_used_kb: u64,
    pub test_results: Option<Vec<CaseRun>>,
}

/// Outcome of one harness invocation.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// The program ran (possibly hitting limits); see the report.
    Finished(ExecutionReport),
    /// Compilation failed; the submission is terminal with the compiler
    /// diagnostics.
    CompileError { stderr: String },
}

/// Harness tuning.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// tmpfs-backed root for job workspaces.
    pub workspace_base: PathBuf,
    /// Wall-clock cap on the compile phase.
    pub compile_timeout: Duration,
    /// Startup slack added to the run-phase deadline on top of the time
    /// limit.
    pub startup_buffer: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            workspace_base: std::env::temp_dir(),
            compile_timeout: Duration::from_secs(30),
            startup_buffer: Duration::from_secs(5),
        }
    }
}

/// Compiles and runs one submission inside the sandbox runtime.
pub struct ExecutionHarness {
    runtime: Arc<dyn ContainerRuntime>,
    config: HarnessConfig,
}

impl ExecutionHarness {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: HarnessConfig) -> Self {
        Self { runtime, config }
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Execute one submission end to end.
    ///
    /// The workspace is removed on every exit path; the `JobWorkspace`
    /// drop guard covers early returns and panics.
    pub async fn execute(
        &self,
        request: ExecutionRequest,
    ) -> Result<ExecutionOutcome, SandboxError> {
        let plan = request.language.plan();

        let workspace = JobWorkspace::create(&self.config.workspace_base, request.submission_id)?;
        workspace.write_file(&plan.source_filename, &request.code)?;

        debug!(
            submission_id = %request.submission_id,
            language = %request.language.as_str(),
            workspace = %workspace.dir().display(),
            "Workspace ready"
        );

        if let Some(compile_argv) = &plan.compile {
            let compile_output = self
                .runtime
                .run(self.compile_spec(&plan, compile_argv, &workspace, &request))
                .await?;

            if compile_output.timed_out || compile_output.exit_code != 0 {
                let stderr = truncate_with_marker(
                    &String::from_utf8_lossy(&compile_output.stderr),
                    OUTPUT_CAP_PAYLOAD,
                );
                info!(
                    submission_id = %request.submission_id,
                    exit_code = compile_output.exit_code,
                    "Compilation failed"
                );
                return Ok(ExecutionOutcome::CompileError { stderr });
            }
        }

        let report = if request.test_cases.is_empty() {
            self.run_single(&plan, &workspace, &request).await?
        } else {
            self.run_test_cases(&plan, &workspace, &request).await?
        };

        if let Err(e) = workspace.cleanup() {
            warn!(
                submission_id = %request.submission_id,
                error = %e,
                "Workspace cleanup failed"
            );
        }

        Ok(ExecutionOutcome::Finished(report))
    }

    fn compile_spec(
        &self,
        plan: &LanguagePlan,
        argv: &[String],
        workspace: &JobWorkspace,
        request: &ExecutionRequest,
    ) -> RunSpec {
        let compile_ms = self.config.compile_timeout.as_millis() as u64;
        RunSpec {
            image: plan.image.clone(),
            argv: argv.to_vec(),
            env: plan_env(plan),
            workspace_dir: workspace.dir().to_path_buf(),
            workspace_writable: true,
            stdin: None,
            // Compilers get the wall cap as CPU budget and a roomier
            // memory floor than the submission itself
            limits: ResourceLimits::new(
                compile_ms,
                request.limits.memory_limit_kb.max(524_288),
            ),
            deadline: self.config.compile_timeout,
        }
    }

    fn run_spec(
        &self,
        plan: &LanguagePlan,
        workspace: &JobWorkspace,
        request: &ExecutionRequest,
        stdin: Option<Vec<u8>>,
    ) -> RunSpec {
        RunSpec {
            image: plan.image.clone(),
            argv: plan.run.clone(),
            env: plan_env(plan),
            workspace_dir: workspace.dir().to_path_buf(),
            workspace_writable: false,
            stdin,
            limits: request.limits,
            deadline: Duration::from_millis(request.limits.time_limit_ms)
                + self.config.startup_buffer,
        }
    }

    /// Run once with no test cases; honor the runner protocol when the
    /// image ships a structured runner.
    async fn run_single(
        &self,
        plan: &LanguagePlan,
        workspace: &JobWorkspace,
        request: &ExecutionRequest,
    ) -> Result<ExecutionReport, SandboxError> {
        let output = self
            .runtime
            .run(self.run_spec(plan, workspace, request, None))
            .await?;

        let status = status_of(&output);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        // A malformed sentinel line is a protocol violation and surfaces
        // as an error to the caller
        let report = parse_runner_output(&stdout)?;

        let (success, out_text, err_text, exit_code, exec_ms, mem_kb) = match report {
            Some(runner) => (
                runner.success && status == RunStatus::Completed,
                runner.output,
                runner.error.unwrap_or(stderr),
                runner.exit_code.unwrap_or(output.exit_code),
                runner.execution_time_ms.unwrap_or(output.wall_time_ms),
                runner
                    .memory_used_kb
                    .or(output.peak_memory_kb)
                    .unwrap_or(0),
            ),
            None => (
                status == RunStatus::Completed,
                stdout,
                stderr,
                output.exit_code,
                output.wall_time_ms,
                output.peak_memory_kb.unwrap_or(0),
            ),
        };

        Ok(ExecutionReport {
            success,
            status,
            output: truncate_with_marker(&out_text, OUTPUT_CAP_PAYLOAD),
            error: truncate_with_marker(&err_text, OUTPUT_CAP_PAYLOAD),
            exit_code,
            execution_time_ms: exec_ms,
            memory_used_kb: mem_kb,
            test_results: None,
        })
    }

    /// Run every test case, feeding input on stdin.
    async fn run_test_cases(
        &self,
        plan: &LanguagePlan,
        workspace: &JobWorkspace,
        request: &ExecutionRequest,
    ) -> Result<ExecutionReport, SandboxError> {
        let mut case_runs: Vec<CaseRun> = Vec::with_capacity(request.test_cases.len());
        let mut exit_code = 0;
        let mut last_stderr = String::new();
        let mut max_wall_ms = 0;
        let mut max_memory_kb = 0;
        let mut stopped_at: Option<usize> = None;

        for (index, case) in request.test_cases.iter().enumerate() {
            let output = self
                .runtime
                .run(self.run_spec(
                    plan,
                    workspace,
                    request,
                    Some(case.input.clone().into_bytes()),
                ))
                .await?;

            let status = status_of(&output);
            let actual = String::from_utf8_lossy(&output.stdout).to_string();
            let passed =
                status == RunStatus::Completed && actual.trim() == case.expected_output.trim();

            max_wall_ms = max_wall_ms.max(output.wall_time_ms);
            max_memory_kb = max_memory_kb.max(output.peak_memory_kb.unwrap_or(0));
            if output.exit_code != 0 {
                exit_code = output.exit_code;
            }
            if !output.stderr.is_empty() {
                last_stderr = String::from_utf8_lossy(&output.stderr).to_string();
            }

            debug!(
                submission_id = %request.submission_id,
                test_id = %case.id,
                status = ?status,
                passed,
                wall_time_ms = output.wall_time_ms,
                "Test case finished"
            );

            case_runs.push(CaseRun {
                test_id: case.id.clone(),
                status,
                passed,
                input: case.input.clone(),
                expected: case.expected_output.clone(),
                actual: truncate_with_marker(&actual, OUTPUT_CAP_PAYLOAD),
                wall_time_ms: output.wall_time_ms,
            });

            if case.stop_on_failure && !passed {
                stopped_at = Some(index);
                break;
            }
        }

        if let Some(index) = stopped_at {
            for case in &request.test_cases[index + 1..] {
                case_runs.push(CaseRun {
                    test_id: case.id.clone(),
                    status: RunStatus::Skipped,
                    passed: false,
                    input: case.input.clone(),
                    expected: case.expected_output.clone(),
                    actual: String::new(),
                    wall_time_ms: 0,
                });
            }
        }

        let success = case_runs
            .iter()
            .all(|run| run.passed && run.status == RunStatus::Completed);

        let status = case_runs
            .iter()
            .map(|run| run.status)
            .max_by_key(|s| s.severity())
            .unwrap_or(RunStatus::Completed);

        let combined_output = case_runs
            .iter()
            .map(|run| run.actual.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        Ok(ExecutionReport {
            success,
            status,
            output: truncate_with_marker(&combined_output, OUTPUT_CAP_PAYLOAD),
            error: truncate_with_marker(&last_stderr, OUTPUT_CAP_PAYLOAD),
            exit_code,
            execution_time_ms: max_wall_ms,
            memory_used_kb: max_memory_kb,
            test_results: Some(case_runs),
        })
    }
}

fn plan_env(plan: &LanguagePlan) -> Vec<String> {
    plan.env
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect()
}

/// Map a raw run to its execution status.
fn status_of(output: &RunOutput) -> RunStatus {
    if output.timed_out {
        RunStatus::TimedOut
    } else if output.oom_killed {
        RunStatus::MemoryExceeded
    } else if output.exit_code != 0 {
        RunStatus::Crashed
    } else {
        RunStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted runtime: pops one canned output per run call.
    struct FakeRuntime {
        outputs: Mutex<VecDeque<RunOutput>>,
        seen_specs: Mutex<Vec<RunSpec>>,
    }

    impl FakeRuntime {
        fn new(outputs: Vec<RunOutput>) -> Self {
            Self {
                outputs: Mutex::new(outputs.into()),
                seen_specs: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn ping(&self) -> Result<(), SandboxError> {
            Ok(())
        }

        async fn run(&self, spec: RunSpec) -> Result<RunOutput, SandboxError> {
            self.seen_specs.lock().unwrap().push(spec);
            self.outputs
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| SandboxError::Runtime("no scripted output left".into()))
        }
    }

    fn completed(stdout: &str) -> RunOutput {
        RunOutput {
            exit_code: 0,
            stdout: stdout.as_bytes().to_vec(),
            stderr: Vec::new(),
            wall_time_ms: 10,
            peak_memory_kb: Some(2048),
            timed_out: false,
            oom_killed: false,
        }
    }

    fn harness(outputs: Vec<RunOutput>) -> (ExecutionHarness, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = HarnessConfig {
            workspace_base: dir.path().to_path_buf(),
            ..Default::default()
        };
        let harness = ExecutionHarness::new(Arc::new(FakeRuntime::new(outputs)), config);
        (harness, dir)
    }

    fn request(language: Language, cases: Vec<TestCase>) -> ExecutionRequest {
        ExecutionRequest {
            submission_id: Uuid::new_v4(),
            language,
            code: b"print(input())".to_vec(),
            limits: ResourceLimits::new(1000, 65_536),
            test_cases: cases,
        }
    }

    fn case(id: &str, input: &str, expected: &str) -> TestCase {
        TestCase {
            id: id.to_string(),
            input: input.to_string(),
            expected_output: expected.to_string(),
            stop_on_failure: false,
        }
    }

    #[tokio::test]
    async fn test_single_run_success() {
        let (harness, _dir) = harness(vec![completed("42\n")]);

        let outcome = harness.execute(request(Language::Python, vec![])).await.unwrap();

        let ExecutionOutcome::Finished(report) = outcome else {
            panic!("expected Finished");
        };
        assert!(report.success);
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.output.trim(), "42");
        assert!(report.test_results.is_none());
    }

    #[tokio::test]
    async fn test_compile_error_short_circuits() {
        let compile_failed = RunOutput {
            exit_code: 1,
            stdout: Vec::new(),
            stderr: b"solution.cpp:1: error: expected ';'".to_vec(),
            wall_time_ms: 300,
            peak_memory_kb: None,
            timed_out: false,
            oom_killed: false,
        };
        let (harness, _dir) = harness(vec![compile_failed]);

        let outcome = harness.execute(request(Language::Cpp, vec![])).await.unwrap();

        let ExecutionOutcome::CompileError { stderr } = outcome else {
            panic!("expected CompileError");
        };
        assert!(stderr.contains("expected ';'"));
    }

    #[tokio::test]
    async fn test_test_cases_feed_stdin_and_compare() {
        let (harness, _dir) = harness(vec![completed("5\n"), completed("9\n")]);

        let outcome = harness
            .execute(request(
                Language::Python,
                vec![case("t1", "2 3\n", "5\n"), case("t2", "4 5\n", "8\n")],
            ))
            .await
            .unwrap();

        let ExecutionOutcome::Finished(report) = outcome else {
            panic!("expected Finished");
        };
        assert!(!report.success);
        let cases = report.test_results.unwrap();
        assert!(cases[0].passed);
        assert!(!cases[1].passed);
        assert_eq!(report.output, "5\n9");
    }

    #[tokio::test]
    async fn test_stop_on_failure_skips_rest() {
        let (harness, _dir) = harness(vec![completed("wrong\n")]);

        let mut first = case("t1", "a\n", "right\n");
        first.stop_on_failure = true;
        let cases = vec![first, case("t2", "b\n", "x\n"), case("t3", "c\n", "y\n")];

        let outcome = harness.execute(request(Language::Python, cases)).await.unwrap();

        let ExecutionOutcome::Finished(report) = outcome else {
            panic!("expected Finished");
        };
        let runs = report.test_results.unwrap();
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[1].status, RunStatus::Skipped);
        assert_eq!(runs[2].status, RunStatus::Skipped);
    }

    #[tokio::test]
    async fn test_timeout_maps_to_timed_out() {
        let timed_out = RunOutput {
            exit_code: 137,
            stdout: Vec::new(),
            stderr: Vec::new(),
            wall_time_ms: 6001,
            peak_memory_kb: None,
            timed_out: true,
            oom_killed: false,
        };
        let (harness, _dir) = harness(vec![timed_out]);

        let outcome = harness
            .execute(request(Language::Python, vec![case("t1", "", "5")]))
            .await
            .unwrap();

        let ExecutionOutcome::Finished(report) = outcome else {
            panic!("expected Finished");
        };
        assert_eq!(report.status, RunStatus::TimedOut);
        assert!(!report.success);
    }

    #[tokio::test]
    async fn test_oom_maps_to_memory_exceeded() {
        let oom = RunOutput {
            exit_code: 137,
            stdout: Vec::new(),
            stderr: Vec::new(),
            wall_time_ms: 50,
            peak_memory_kb: Some(32_768),
            timed_out: false,
            oom_killed: true,
        };
        let (harness, _dir) = harness(vec![oom]);

        let outcome = harness
            .execute(request(Language::Python, vec![case("t1", "", "5")]))
            .await
            .unwrap();

        let ExecutionOutcome::Finished(report) = outcome else {
            panic!("expected Finished");
        };
        assert_eq!(report.status, RunStatus::MemoryExceeded);
    }

    #[tokio::test]
    async fn test_runner_protocol_parsed_in_single_mode() {
        let sentinel = "__RESULT__{\"success\":true,\"output\":\"done\",\"executionTimeMs\":7}\n";
        let (harness, _dir) = harness(vec![completed(sentinel)]);

        let outcome = harness.execute(request(Language::Python, vec![])).await.unwrap();

        let ExecutionOutcome::Finished(report) = outcome else {
            panic!("expected Finished");
        };
        assert!(report.success);
        assert_eq!(report.output, "done");
        assert_eq!(report.execution_time_ms, 7);
    }

    #[tokio::test]
    async fn test_malformed_protocol_is_error() {
        let (harness, _dir) = harness(vec![completed("__RESULT__{oops\n")]);

        let result = harness.execute(request(Language::Python, vec![])).await;
        assert!(matches!(result, Err(SandboxError::Protocol(_))));
    }
}
