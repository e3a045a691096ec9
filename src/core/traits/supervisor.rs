use crate::core::{
    domain::{Exercise, Timeouts},
    errors::GradingError,
    process::ManagedProcess,
};

#[derive(Clone, Debug, PartialEq)]
pub struct ScriptOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// The deadline was hit and the process was killed. The output is
    /// whatever it printed up to that point.
    pub timed_out: bool,
}

impl ScriptOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status == Some(0)
    }
}

/// A server process that was spawned, together with how its startup went.
///
/// The process is handed back even when readiness failed so the caller
/// owns its teardown and can report what it printed.
#[derive(Debug)]
pub struct ServerLaunch {
    pub process: ManagedProcess,
    pub readiness: Result<(), GradingError>,
}

#[mockall::automock]
#[async_trait::async_trait]
pub trait Supervisor: std::fmt::Debug + Send + Sync {
    /// Runs the submission to completion within `timeouts.script`.
    ///
    /// A non-zero exit or the deadline is reported in [`ScriptOutput`]
    /// along with the captured output; only a spawn failure is an error.
    async fn run_script(
        &self,
        exercise: &Exercise,
        timeouts: &Timeouts,
    ) -> Result<ScriptOutput, GradingError>;

    /// Spawns the submission as a server and waits for it to become ready.
    ///
    /// Fails only when the process could not be spawned at all.
    async fn start_server(
        &self,
        exercise: &Exercise,
        timeouts: &Timeouts,
    ) -> Result<ServerLaunch, GradingError>;
}
