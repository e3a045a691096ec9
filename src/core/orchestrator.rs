use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    constants::{
        MSG_SCRIPT_FAILED, MSG_SCRIPT_OK, MSG_SERVER_FAILED, MSG_SERVER_OK, MSG_SUBMISSION_FAILED,
        SHUTDOWN_TIMEOUT, STAGE_EXERCISE_SETUP, STAGE_SERVER_RUNTIME, STAGE_SERVER_SETUP,
        STAGE_SERVER_STARTUP, STAGE_SUBMISSION_SETUP, STAGE_TEST_EXECUTION,
    },
    core::{
        domain::{ErrorKind, Exercise, ExerciseKind, GradeResult, RunResult, TestOutcome, Timeouts},
        errors::GradingError,
        normalizer::normalize,
        process::ManagedProcess,
        traits::{
            framework::TestFramework,
            materializer::Materializer,
            reclaimer::PortReclaimer,
            registry::ExerciseRegistry,
            supervisor::{ServerLaunch, Supervisor},
        },
    },
};

/// Where a grading run is. Failure can happen in any stage and still passes
/// through `Terminating` before `Done`. The exercise lookup happens in `Idle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Idle,
    PortReclaiming,
    Materializing,
    Spawning,
    AwaitingReadiness,
    TestingViaAdapter,
    Normalizing,
    Terminating,
    Done,
}

impl Stage {
    /// Name of the synthetic outcome reported when a setup stage fails.
    pub fn failure_name(&self) -> &'static str {
        match self {
            Stage::Idle => STAGE_EXERCISE_SETUP,
            Stage::PortReclaiming | Stage::Materializing => STAGE_SUBMISSION_SETUP,
            Stage::Spawning => STAGE_SERVER_SETUP,
            Stage::AwaitingReadiness => STAGE_SERVER_STARTUP,
            Stage::TestingViaAdapter | Stage::Normalizing => STAGE_TEST_EXECUTION,
            Stage::Terminating | Stage::Done => STAGE_SERVER_RUNTIME,
        }
    }

    fn run_message(&self) -> &'static str {
        match self {
            Stage::Materializing => MSG_SUBMISSION_FAILED,
            _ => MSG_SERVER_FAILED,
        }
    }
}

fn enter(stage: Stage) {
    tracing::debug!(?stage, "entering stage");
}

#[derive(Debug)]
struct RunContext {
    id: Uuid,
    started_at: chrono::DateTime<chrono::Utc>,
    clock: Instant,
    exercise_id: String,
}

impl RunContext {
    fn start(exercise_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: chrono::Utc::now(),
            clock: Instant::now(),
            exercise_id: exercise_id.to_string(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.clock.elapsed().as_millis() as u64
    }

    fn run_result(&self, kind: Option<ExerciseKind>, message: &str) -> RunResult {
        RunResult {
            run_id: self.id,
            started_at: self.started_at,
            exercise_id: self.exercise_id.clone(),
            kind,
            success: true,
            message: message.to_string(),
            elapsed_ms: self.elapsed_ms(),
            output: None,
            error: None,
            error_kind: None,
        }
    }

    fn run_failure(
        &self,
        kind: Option<ExerciseKind>,
        message: &str,
        error: &GradingError,
    ) -> RunResult {
        RunResult {
            success: false,
            error: Some(error.to_string()),
            error_kind: Some(error.into()),
            ..self.run_result(kind, message)
        }
    }

    fn grade_result(
        &self,
        kind: Option<ExerciseKind>,
        outcomes: Vec<TestOutcome>,
        error_kind: Option<ErrorKind>,
    ) -> GradeResult {
        let passed_tests = outcomes.iter().filter(|outcome| outcome.passed).count();

        GradeResult {
            run_id: self.id,
            started_at: self.started_at,
            exercise_id: self.exercise_id.clone(),
            kind,
            total_tests: outcomes.len(),
            passed_tests,
            failed_tests: outcomes.len() - passed_tests,
            outcomes,
            elapsed_ms: self.elapsed_ms(),
            error_kind,
        }
    }

    fn grade_failure(
        &self,
        kind: Option<ExerciseKind>,
        stage: Stage,
        error: &GradingError,
        detail: Option<String>,
    ) -> GradeResult {
        let text = match detail.filter(|detail| !detail.is_empty()) {
            Some(detail) => format!("{}\nOutput: {}", error, detail),
            None => error.to_string(),
        };
        self.grade_result(
            kind,
            vec![TestOutcome::failed(stage.failure_name(), text)],
            Some(error.into()),
        )
    }
}

/// Public entry point of the grader.
///
/// Both operations always return a well-formed result; every component
/// failure is converted into result data. Requests for the same exercise
/// are serialized because they share its port and submission file.
#[derive(Debug)]
pub struct Orchestrator {
    registry: Arc<dyn ExerciseRegistry>,
    reclaimer: Arc<dyn PortReclaimer>,
    materializer: Arc<dyn Materializer>,
    supervisor: Arc<dyn Supervisor>,
    framework: Arc<dyn TestFramework>,
    timeouts: Timeouts,
    slots: DashMap<String, Arc<Mutex<()>>>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<dyn ExerciseRegistry>,
        reclaimer: Arc<dyn PortReclaimer>,
        materializer: Arc<dyn Materializer>,
        supervisor: Arc<dyn Supervisor>,
        framework: Arc<dyn TestFramework>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            registry,
            reclaimer,
            materializer,
            supervisor,
            framework,
            timeouts,
            slots: DashMap::new(),
        }
    }

    fn slot(&self, exercise_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(&self.slots.entry(exercise_id.to_string()).or_default())
    }

    #[tracing::instrument(skip(self, code), fields(run_id))]
    pub async fn run_code(&self, exercise_id: &str, code: &str) -> RunResult {
        let run = RunContext::start(exercise_id);
        tracing::Span::current().record("run_id", tracing::field::display(run.id));
        enter(Stage::Idle);

        let exercise = match self.registry.lookup(exercise_id).await {
            Ok(exercise) => exercise,
            Err(err) => {
                tracing::warn!(error = %err, "exercise lookup failed");
                return RunResult {
                    message: err.to_string(),
                    ..run.run_failure(None, "", &err)
                };
            }
        };

        let slot = self.slot(&exercise.id);
        let _guard = slot.lock().await;

        let result = match exercise.kind {
            ExerciseKind::Direct => self.run_script(&run, &exercise, code).await,
            ExerciseKind::Server => self.run_server(&run, &exercise, code).await,
        };

        enter(Stage::Done);
        tracing::info!(
            kind = exercise.kind.as_str(),
            success = result.success,
            elapsed_ms = result.elapsed_ms,
            "run finished"
        );
        result
    }

    #[tracing::instrument(skip(self, code), fields(run_id))]
    pub async fn run_tests(&self, exercise_id: &str, code: &str) -> GradeResult {
        let run = RunContext::start(exercise_id);
        tracing::Span::current().record("run_id", tracing::field::display(run.id));
        enter(Stage::Idle);

        let exercise = match self.registry.lookup(exercise_id).await {
            Ok(exercise) => exercise,
            Err(err) => {
                tracing::warn!(error = %err, "exercise lookup failed");
                return run.grade_failure(None, Stage::Idle, &err, None);
            }
        };

        let slot = self.slot(&exercise.id);
        let _guard = slot.lock().await;

        let result = match exercise.kind {
            ExerciseKind::Direct => self.grade_script(&run, &exercise, code).await,
            ExerciseKind::Server => self.grade_server(&run, &exercise, code).await,
        };

        enter(Stage::Done);
        tracing::info!(
            kind = exercise.kind.as_str(),
            total = result.total_tests,
            passed = result.passed_tests,
            failed = result.failed_tests,
            all_passed = result.is_all_passed(),
            elapsed_ms = result.elapsed_ms,
            "grading finished"
        );
        result
    }

    async fn run_script(&self, run: &RunContext, exercise: &Exercise, code: &str) -> RunResult {
        let kind = Some(exercise.kind);

        enter(Stage::Materializing);
        if let Err(err) = self.materializer.materialize(exercise, code).await {
            tracing::warn!(error = %err, "materialization failed");
            return run.run_failure(kind, MSG_SUBMISSION_FAILED, &err);
        }

        enter(Stage::Spawning);
        let output = match self.supervisor.run_script(exercise, &self.timeouts).await {
            Ok(output) => output,
            Err(err) => {
                tracing::warn!(error = %err, "script could not be started");
                return run.run_failure(kind, MSG_SCRIPT_FAILED, &err);
            }
        };

        if output.success() {
            return RunResult {
                output: Some(output.stdout.trim().to_string()),
                ..run.run_result(kind, MSG_SCRIPT_OK)
            };
        }

        let err = if output.timed_out {
            GradingError::ExecutionTimeout {
                limit_ms: self.timeouts.script.as_millis() as u64,
            }
        } else {
            GradingError::ExecutionFailed {
                status: output.status,
            }
        };
        tracing::warn!(error = %err, "script failed");

        let captured = if output.stderr.trim().is_empty() {
            output.stdout.trim()
        } else {
            output.stderr.trim()
        };
        let reason = match (output.timed_out, captured.is_empty()) {
            (true, false) => format!("{err}\n{captured}"),
            (true, true) => err.to_string(),
            (false, _) => captured.to_string(),
        };
        RunResult {
            output: Some(output.stdout.trim().to_string()),
            error: Some(reason),
            ..run.run_failure(kind, MSG_SCRIPT_FAILED, &err)
        }
    }

    async fn run_server(&self, run: &RunContext, exercise: &Exercise, code: &str) -> RunResult {
        let kind = Some(exercise.kind);

        let mut process = match self.launch_server(exercise, code).await {
            Ok(ServerLaunch {
                process,
                readiness: Ok(()),
            }) => process,
            Ok(ServerLaunch {
                mut process,
                readiness: Err(err),
            }) => {
                tracing::warn!(error = %err, "server did not become ready");
                enter(Stage::Terminating);
                process.shutdown(SHUTDOWN_TIMEOUT).await;
                return RunResult {
                    output: Some(process.combined().trim().to_string()),
                    ..run.run_failure(kind, MSG_SERVER_FAILED, &err)
                };
            }
            Err((stage, err)) => {
                tracing::warn!(error = %err, ?stage, "server launch failed");
                return run.run_failure(kind, stage.run_message(), &err);
            }
        };

        enter(Stage::Terminating);
        process.shutdown(SHUTDOWN_TIMEOUT).await;

        RunResult {
            output: Some(process.combined().trim().to_string()),
            ..run.run_result(kind, MSG_SERVER_OK)
        }
    }

    async fn grade_script(&self, run: &RunContext, exercise: &Exercise, code: &str) -> GradeResult {
        let kind = Some(exercise.kind);

        enter(Stage::Materializing);
        if let Err(err) = self.materializer.materialize(exercise, code).await {
            tracing::warn!(error = %err, "materialization failed");
            return run.grade_failure(kind, Stage::Materializing, &err, None);
        }

        let (outcomes, error_kind) = self.run_suite(exercise, None).await;
        enter(Stage::Terminating);
        run.grade_result(kind, outcomes, error_kind)
    }

    async fn grade_server(&self, run: &RunContext, exercise: &Exercise, code: &str) -> GradeResult {
        let kind = Some(exercise.kind);

        let mut process = match self.launch_server(exercise, code).await {
            Ok(ServerLaunch {
                process,
                readiness: Ok(()),
            }) => process,
            Ok(ServerLaunch {
                mut process,
                readiness: Err(err),
            }) => {
                tracing::warn!(error = %err, "server did not become ready");
                enter(Stage::Terminating);
                process.shutdown(SHUTDOWN_TIMEOUT).await;
                let output = process.combined().trim().to_string();
                return run.grade_failure(kind, Stage::AwaitingReadiness, &err, Some(output));
            }
            Err((stage, err)) => {
                tracing::warn!(error = %err, ?stage, "server launch failed");
                return run.grade_failure(kind, stage, &err, None);
            }
        };

        let (outcomes, error_kind) = self.run_suite(exercise, Some(&mut process)).await;

        enter(Stage::Terminating);
        process.shutdown(SHUTDOWN_TIMEOUT).await;
        run.grade_result(kind, outcomes, error_kind)
    }

    /// Reclaims the port, writes the submission and starts the server.
    /// Errors carry the stage that failed.
    async fn launch_server(
        &self,
        exercise: &Exercise,
        code: &str,
    ) -> Result<ServerLaunch, (Stage, GradingError)> {
        enter(Stage::PortReclaiming);
        let killed = self.reclaimer.reclaim(exercise.port).await;
        if !killed.is_empty() {
            tracing::info!(port = exercise.port, ?killed, "reclaimed port");
        }

        enter(Stage::Materializing);
        self.materializer
            .materialize(exercise, code)
            .await
            .map_err(|err| (Stage::Materializing, err))?;

        // The supervisor spawns and then awaits readiness in one call
        enter(Stage::Spawning);
        self.supervisor
            .start_server(exercise, &self.timeouts)
            .await
            .map_err(|err| (Stage::Spawning, err))
    }

    /// Runs the test suite and normalizes its report. When a server is
    /// under test, its early exit is reported as an extra failure.
    async fn run_suite(
        &self,
        exercise: &Exercise,
        server: Option<&mut ManagedProcess>,
    ) -> (Vec<TestOutcome>, Option<ErrorKind>) {
        enter(Stage::TestingViaAdapter);
        let suite = match self.framework.run_suite(exercise, self.timeouts.tests).await {
            Ok(suite) => suite,
            Err(err) => {
                tracing::warn!(error = %err, "test suite did not produce a report");
                return (
                    vec![TestOutcome::failed(STAGE_TEST_EXECUTION, err.to_string())],
                    Some((&err).into()),
                );
            }
        };

        enter(Stage::Normalizing);
        let mut outcomes = normalize(&suite.report);
        let mut error_kind = None;

        if suite.status != Some(0) && suite.report.failures.is_empty() {
            let err = GradingError::RunnerInconsistent {
                status: suite.status,
            };
            tracing::warn!(error = %err, "test runner exit status disagrees with its report");
            outcomes.push(TestOutcome::failed(STAGE_TEST_EXECUTION, err.to_string()));
            error_kind = Some((&err).into());
        }

        if let Some(process) = server {
            if let Some(status) = process.try_exit_status() {
                let err = GradingError::ServerExited {
                    status: status.code(),
                };
                tracing::warn!(error = %err, "server died during the test run");

                let stderr = process.stderr();
                let text = if stderr.trim().is_empty() {
                    err.to_string()
                } else {
                    format!("{}\n{}", err, stderr.trim())
                };
                outcomes.push(TestOutcome::failed(STAGE_SERVER_RUNTIME, text));
                error_kind = Some((&err).into());
            }
        }

        (outcomes, error_kind)
    }
}
