use prost_types::value::Kind;

use crate::core::domain::{self, is_valid_exercise_id};
use crate::grpc::models;

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid exercise id: {id}")]
    InvalidExerciseId { id: String },
}

impl TryFrom<models::SubmissionRequest> for domain::Submission {
    type Error = ConversionError;

    fn try_from(req: models::SubmissionRequest) -> Result<Self, ConversionError> {
        if req.exercise_id.is_empty() {
            return Err(ConversionError::MissingField {
                field: "exercise_id".to_string(),
            });
        }
        if req.code.is_empty() {
            return Err(ConversionError::MissingField {
                field: "code".to_string(),
            });
        }
        if !is_valid_exercise_id(&req.exercise_id) {
            return Err(ConversionError::InvalidExerciseId {
                id: req.exercise_id,
            });
        }

        Ok(Self {
            exercise_id: req.exercise_id,
            code: req.code,
        })
    }
}

impl From<domain::ExerciseKind> for models::ExerciseKind {
    fn from(kind: domain::ExerciseKind) -> Self {
        match kind {
            domain::ExerciseKind::Direct => models::ExerciseKind::Direct,
            domain::ExerciseKind::Server => models::ExerciseKind::Server,
        }
    }
}

impl From<domain::ErrorKind> for models::ErrorKind {
    fn from(kind: domain::ErrorKind) -> Self {
        match kind {
            domain::ErrorKind::ExerciseNotFound => models::ErrorKind::ExerciseNotFound,
            domain::ErrorKind::InvalidManifest => models::ErrorKind::InvalidManifest,
            domain::ErrorKind::Io => models::ErrorKind::Io,
            domain::ErrorKind::Spawn => models::ErrorKind::Spawn,
            domain::ErrorKind::PortInUse => models::ErrorKind::PortInUse,
            domain::ErrorKind::StartupTimeout => models::ErrorKind::StartupTimeout,
            domain::ErrorKind::ExitedBeforeReady => models::ErrorKind::ExitedBeforeReady,
            domain::ErrorKind::ExecutionTimeout => models::ErrorKind::ExecutionTimeout,
            domain::ErrorKind::ExecutionFailed => models::ErrorKind::ExecutionFailed,
            domain::ErrorKind::AdapterParse => models::ErrorKind::AdapterParse,
            domain::ErrorKind::TestTimeout => models::ErrorKind::TestTimeout,
            domain::ErrorKind::RunnerInconsistent => models::ErrorKind::RunnerInconsistent,
            domain::ErrorKind::ServerExited => models::ErrorKind::ServerExited,
        }
    }
}

fn kind_to_i32(kind: Option<domain::ExerciseKind>) -> i32 {
    kind.map(models::ExerciseKind::from)
        .unwrap_or(models::ExerciseKind::Unspecified) as i32
}

fn error_kind_to_i32(kind: Option<domain::ErrorKind>) -> Option<i32> {
    kind.map(|kind| models::ErrorKind::from(kind) as i32)
}

pub fn json_to_prost(value: serde_json::Value) -> prost_types::Value {
    let kind = match value {
        serde_json::Value::Null => Kind::NullValue(prost_types::NullValue::NullValue as i32),
        serde_json::Value::Bool(b) => Kind::BoolValue(b),
        serde_json::Value::Number(n) => Kind::NumberValue(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Kind::StringValue(s),
        serde_json::Value::Array(values) => Kind::ListValue(prost_types::ListValue {
            values: values.into_iter().map(json_to_prost).collect(),
        }),
        serde_json::Value::Object(fields) => Kind::StructValue(prost_types::Struct {
            fields: fields
                .into_iter()
                .map(|(key, value)| (key, json_to_prost(value)))
                .collect(),
        }),
    };

    prost_types::Value { kind: Some(kind) }
}

impl From<domain::TestOutcome> for models::TestOutcome {
    fn from(outcome: domain::TestOutcome) -> Self {
        Self {
            name: outcome.name,
            passed: outcome.passed,
            error: outcome.error,
            expected: outcome.expected.map(json_to_prost),
            actual: outcome.actual.map(json_to_prost),
        }
    }
}

impl From<domain::RunResult> for models::RunResult {
    fn from(result: domain::RunResult) -> Self {
        Self {
            run_id: result.run_id.to_string(),
            exercise_id: result.exercise_id,
            kind: kind_to_i32(result.kind),
            success: result.success,
            message: result.message,
            elapsed_ms: result.elapsed_ms,
            output: result.output,
            error: result.error,
            error_kind: error_kind_to_i32(result.error_kind),
            started_at: Some(models::chrono_to_prost(result.started_at)),
        }
    }
}

impl From<domain::GradeResult> for models::GradeResult {
    fn from(result: domain::GradeResult) -> Self {
        Self {
            run_id: result.run_id.to_string(),
            exercise_id: result.exercise_id,
            kind: kind_to_i32(result.kind),
            total_tests: result.total_tests as u32,
            passed_tests: result.passed_tests as u32,
            failed_tests: result.failed_tests as u32,
            outcomes: result.outcomes.into_iter().map(Into::into).collect(),
            elapsed_ms: result.elapsed_ms,
            error_kind: error_kind_to_i32(result.error_kind),
            started_at: Some(models::chrono_to_prost(result.started_at)),
        }
    }
}
