#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GradingError {
    #[error("Exercise {id} not found")]
    ExerciseNotFound { id: String },

    #[error("Invalid manifest for exercise {id}: {msg}")]
    InvalidManifest { id: String, msg: String },

    #[error("Failed to write submission: {msg}")]
    Io { msg: String },

    #[error("Failed to start process: {msg}")]
    Spawn { msg: String },

    #[error("Port already in use")]
    PortInUse,

    #[error("Server startup timeout after {limit_ms}ms")]
    StartupTimeout { limit_ms: u64 },

    #[error("Server exited before becoming ready (status: {status:?})")]
    ExitedBeforeReady { status: Option<i32> },

    #[error("Execution timed out after {limit_ms}ms")]
    ExecutionTimeout { limit_ms: u64 },

    #[error("Code execution failed (status: {status:?})")]
    ExecutionFailed { status: Option<i32> },

    #[error("Failed to parse test results: {msg}")]
    AdapterParse { msg: String },

    #[error("Test execution timed out after {limit_ms}ms")]
    TestTimeout { limit_ms: u64 },

    #[error("Test runner exited with status {status:?} but reported no failures")]
    RunnerInconsistent { status: Option<i32> },

    #[error("Server exited while tests were running (status: {status:?})")]
    ServerExited { status: Option<i32> },
}

impl From<std::io::Error> for GradingError {
    fn from(err: std::io::Error) -> Self {
        GradingError::Io {
            msg: err.to_string(),
        }
    }
}
