use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::{
    core::{
        domain::{ErrorKind, Submission},
        orchestrator::Orchestrator,
    },
    grpc::{
        mappers::ConversionError,
        models::{
            GradeResult as GrpcGradeResult, RunResult as GrpcRunResult, SubmissionRequest,
            grading_service_server::GradingService,
        },
    },
};

#[derive(Clone, Debug)]
pub struct GradingServiceImpl {
    orchestrator: Arc<Orchestrator>,
}

impl GradingServiceImpl {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

fn submission(request: Request<SubmissionRequest>) -> Result<Submission, Status> {
    let submission: Result<Submission, ConversionError> = request.into_inner().try_into();
    submission.map_err(|error| Status::invalid_argument(error.to_string()))
}

#[tonic::async_trait]
impl GradingService for GradingServiceImpl {
    #[tracing::instrument(skip(self, request))]
    async fn run_code(
        &self,
        request: Request<SubmissionRequest>,
    ) -> Result<Response<GrpcRunResult>, Status> {
        let submission = submission(request)?;
        tracing::info!(exercise = %submission.exercise_id, "received run request");

        let result = self
            .orchestrator
            .run_code(&submission.exercise_id, &submission.code)
            .await;

        if result.error_kind == Some(ErrorKind::ExerciseNotFound) {
            return Err(Status::not_found(result.message));
        }
        Ok(Response::new(result.into()))
    }

    #[tracing::instrument(skip(self, request))]
    async fn run_tests(
        &self,
        request: Request<SubmissionRequest>,
    ) -> Result<Response<GrpcGradeResult>, Status> {
        let submission = submission(request)?;
        tracing::info!(exercise = %submission.exercise_id, "received grading request");

        let result = self
            .orchestrator
            .run_tests(&submission.exercise_id, &submission.code)
            .await;

        if result.error_kind == Some(ErrorKind::ExerciseNotFound) {
            let message = result
                .outcomes
                .first()
                .and_then(|outcome| outcome.error.clone())
                .unwrap_or_default();
            return Err(Status::not_found(message));
        }
        Ok(Response::new(result.into()))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use regex::RegexSet;

    use super::*;
    use crate::{
        core::{
            domain::{Exercise, ExerciseKind, ReadinessSpec, Timeouts},
            errors::GradingError,
            report::{RawError, RawReport, RawTest},
            traits::{
                framework::{MockTestFramework, SuiteRun},
                materializer::MockMaterializer,
                reclaimer::MockPortReclaimer,
                registry::MockExerciseRegistry,
                supervisor::{MockSupervisor, ScriptOutput},
            },
        },
        grpc::models::{self, ExerciseKind as GrpcExerciseKind},
    };

    fn exercise(kind: ExerciseKind) -> Exercise {
        Exercise {
            id: "module-4".to_string(),
            kind,
            working_dir: PathBuf::from("/tmp/module-4/exercise"),
            submission_file: PathBuf::from("/tmp/module-4/exercise/tmp-server.js"),
            test_file: PathBuf::from("/tmp/module-4/exercise/test.js"),
            port: 3000,
            readiness: ReadinessSpec {
                ready: RegexSet::empty(),
                port_in_use: RegexSet::empty(),
                probe_port: false,
            },
        }
    }

    fn service(
        registry: MockExerciseRegistry,
        supervisor: MockSupervisor,
        framework: MockTestFramework,
    ) -> GradingServiceImpl {
        let mut materializer = MockMaterializer::new();
        materializer
            .expect_materialize()
            .returning(|exercise, _| Ok(exercise.submission_file.clone()));
        let mut reclaimer = MockPortReclaimer::new();
        reclaimer.expect_reclaim().returning(|_| vec![]);

        GradingServiceImpl::new(Arc::new(Orchestrator::new(
            Arc::new(registry),
            Arc::new(reclaimer),
            Arc::new(materializer),
            Arc::new(supervisor),
            Arc::new(framework),
            Timeouts {
                startup: Duration::from_millis(100),
                settle: Duration::ZERO,
                script: Duration::from_millis(100),
                tests: Duration::from_millis(100),
            },
        )))
    }

    fn request(exercise_id: &str, code: &str) -> Request<SubmissionRequest> {
        Request::new(SubmissionRequest {
            exercise_id: exercise_id.to_string(),
            code: code.to_string(),
        })
    }

    #[tokio::test]
    async fn test_run_code_invalid_argument() {
        let mut registry = MockExerciseRegistry::new();
        registry.expect_lookup().never();
        let service = service(registry, MockSupervisor::new(), MockTestFramework::new());

        let error = service.run_code(request("", "code")).await.unwrap_err();
        assert_eq!(error.code(), tonic::Code::InvalidArgument);
        assert!(error.message().contains("exercise_id"));

        let error = service.run_tests(request("module-4", "")).await.unwrap_err();
        assert_eq!(error.code(), tonic::Code::InvalidArgument);
        assert!(error.message().contains("code"));

        let error = service
            .run_tests(request("../../etc", "code"))
            .await
            .unwrap_err();
        assert_eq!(error.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_unknown_exercise_is_not_found() {
        let mut registry = MockExerciseRegistry::new();
        registry.expect_lookup().returning(|id| {
            Err(GradingError::ExerciseNotFound {
                id: id.to_string(),
            })
        });
        let service = service(registry, MockSupervisor::new(), MockTestFramework::new());

        let error = service
            .run_code(request("module-99", "code"))
            .await
            .unwrap_err();
        assert_eq!(error.code(), tonic::Code::NotFound);
        assert_eq!(error.message(), "Exercise module-99 not found");

        let error = service
            .run_tests(request("module-99", "code"))
            .await
            .unwrap_err();
        assert_eq!(error.code(), tonic::Code::NotFound);
        assert_eq!(error.message(), "Exercise module-99 not found");
    }

    #[tokio::test]
    async fn test_run_code_failure_is_data() {
        let mut registry = MockExerciseRegistry::new();
        registry
            .expect_lookup()
            .returning(|_| Ok(exercise(ExerciseKind::Direct)));
        let mut supervisor = MockSupervisor::new();
        supervisor.expect_run_script().returning(|_, _| {
            Ok(ScriptOutput {
                status: Some(1),
                stdout: String::new(),
                stderr: "ReferenceError: x is not defined".to_string(),
                timed_out: false,
            })
        });
        let service = service(registry, supervisor, MockTestFramework::new());

        let result = service
            .run_code(request("module-4", "x"))
            .await
            .unwrap()
            .into_inner();

        assert!(!result.success);
        assert_eq!(result.kind(), GrpcExerciseKind::Direct);
        assert_eq!(result.error_kind(), models::ErrorKind::ExecutionFailed);
        assert!(
            result
                .error
                .as_deref()
                .is_some_and(|error| error.contains("ReferenceError"))
        );
    }

    #[tokio::test]
    async fn test_run_tests_maps_outcomes() {
        let mut registry = MockExerciseRegistry::new();
        registry
            .expect_lookup()
            .returning(|_| Ok(exercise(ExerciseKind::Direct)));
        let mut framework = MockTestFramework::new();
        framework.expect_run_suite().returning(|_, _| {
            Ok(SuiteRun {
                report: RawReport {
                    stats: None,
                    passes: vec![RawTest {
                        title: "prints greeting".to_string(),
                        full_title: None,
                        err: None,
                    }],
                    failures: vec![RawTest {
                        title: "adds numbers".to_string(),
                        full_title: None,
                        err: Some(RawError {
                            message: Some("expected 3 to equal 4".to_string()),
                            expected: None,
                            actual: None,
                        }),
                    }],
                },
                status: Some(1),
            })
        });
        let service = service(registry, MockSupervisor::new(), framework);

        let result = service
            .run_tests(request("module-4", "module.exports = {}"))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(result.total_tests, 2);
        assert_eq!(result.passed_tests, 1);
        assert_eq!(result.failed_tests, 1);
        assert_eq!(result.error_kind, None);
        let failed = &result.outcomes[1];
        assert_eq!(failed.name, "adds numbers");
        assert_eq!(
            failed.expected.as_ref().and_then(|value| value.kind.clone()),
            Some(prost_types::value::Kind::NumberValue(4.0))
        );
        assert_eq!(
            failed.actual.as_ref().and_then(|value| value.kind.clone()),
            Some(prost_types::value::Kind::NumberValue(3.0))
        );
    }
}
