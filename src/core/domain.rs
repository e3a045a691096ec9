use std::path::PathBuf;
use std::time::Duration;

use regex::RegexSet;
use uuid::Uuid;

use crate::core::errors::GradingError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExerciseKind {
    /// The submission is a script; its exit and output are the whole result.
    Direct,
    /// The submission is a long-running listener exercised by a test suite.
    Server,
}

impl ExerciseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExerciseKind::Direct => "direct",
            ExerciseKind::Server => "server",
        }
    }
}

/// Ids name a directory under the exercises root, so only a flat,
/// conservative alphabet is accepted: `^[A-Za-z0-9][A-Za-z0-9_-]*$`.
pub fn is_valid_exercise_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        }
        _ => false,
    }
}

/// A learner's code aimed at one exercise.
#[derive(Clone, Debug, PartialEq)]
pub struct Submission {
    pub exercise_id: String,
    pub code: String,
}

#[derive(Clone, Debug)]
pub struct Exercise {
    pub id: String,
    pub kind: ExerciseKind,
    pub working_dir: PathBuf,
    pub submission_file: PathBuf,
    pub test_file: PathBuf,
    pub port: u16,
    pub readiness: ReadinessSpec,
}

#[derive(Clone, Debug)]
pub struct ReadinessSpec {
    /// Matched against stdout lines.
    pub ready: RegexSet,
    /// Matched against stderr lines.
    pub port_in_use: RegexSet,
    pub probe_port: bool,
}

impl ReadinessSpec {
    pub fn is_ready_line(&self, line: &str) -> bool {
        self.ready.is_match(line)
    }

    pub fn is_port_in_use_line(&self, line: &str) -> bool {
        self.port_in_use.is_match(line)
    }
}

#[derive(Clone, Debug)]
pub struct Timeouts {
    pub startup: Duration,
    pub settle: Duration,
    pub script: Duration,
    pub tests: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            startup: Duration::from_millis(5000),
            settle: Duration::from_millis(1000),
            script: Duration::from_millis(5000),
            tests: Duration::from_millis(10000),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TestOutcome {
    pub name: String,
    pub passed: bool,
    pub error: Option<String>,
    pub expected: Option<serde_json::Value>,
    pub actual: Option<serde_json::Value>,
}

impl TestOutcome {
    pub fn passed(name: &str) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            error: None,
            expected: None,
            actual: None,
        }
    }

    pub fn failed(name: &str, error: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            error: Some(error.into()),
            expected: None,
            actual: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    ExerciseNotFound,
    InvalidManifest,
    Io,
    Spawn,
    PortInUse,
    StartupTimeout,
    ExitedBeforeReady,
    ExecutionTimeout,
    ExecutionFailed,
    AdapterParse,
    TestTimeout,
    RunnerInconsistent,
    ServerExited,
}

impl From<&GradingError> for ErrorKind {
    fn from(error: &GradingError) -> Self {
        match error {
            GradingError::ExerciseNotFound { .. } => ErrorKind::ExerciseNotFound,
            GradingError::InvalidManifest { .. } => ErrorKind::InvalidManifest,
            GradingError::Io { .. } => ErrorKind::Io,
            GradingError::Spawn { .. } => ErrorKind::Spawn,
            GradingError::PortInUse => ErrorKind::PortInUse,
            GradingError::StartupTimeout { .. } => ErrorKind::StartupTimeout,
            GradingError::ExitedBeforeReady { .. } => ErrorKind::ExitedBeforeReady,
            GradingError::ExecutionTimeout { .. } => ErrorKind::ExecutionTimeout,
            GradingError::ExecutionFailed { .. } => ErrorKind::ExecutionFailed,
            GradingError::AdapterParse { .. } => ErrorKind::AdapterParse,
            GradingError::TestTimeout { .. } => ErrorKind::TestTimeout,
            GradingError::RunnerInconsistent { .. } => ErrorKind::RunnerInconsistent,
            GradingError::ServerExited { .. } => ErrorKind::ServerExited,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RunResult {
    pub run_id: Uuid,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub exercise_id: String,
    pub kind: Option<ExerciseKind>,
    pub success: bool,
    pub message: String,
    pub elapsed_ms: u64,
    pub output: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

#[derive(Clone, Debug)]
pub struct GradeResult {
    pub run_id: Uuid,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub exercise_id: String,
    pub kind: Option<ExerciseKind>,
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,
    pub outcomes: Vec<TestOutcome>,
    pub elapsed_ms: u64,
    pub error_kind: Option<ErrorKind>,
}

impl GradeResult {
    pub fn is_all_passed(&self) -> bool {
        self.total_tests > 0 && self.failed_tests == 0
    }
}
