use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::{
    net::TcpStream,
    process::Command,
    sync::mpsc::UnboundedReceiver,
    time::{Instant, sleep, timeout},
};

use crate::{
    constants::{OUTPUT_DRAIN_TIMEOUT, PORT_PROBE_CONFIRM, PORT_PROBE_INTERVAL, SHUTDOWN_TIMEOUT},
    core::{
        domain::{Exercise, ReadinessSpec, Timeouts},
        errors::GradingError,
        process::{ManagedProcess, OutputLine, StreamKind},
        traits::supervisor::{ScriptOutput, ServerLaunch, Supervisor},
    },
};

/// Runs submissions with a local interpreter as child processes.
#[derive(Debug, Clone)]
pub struct NativeSupervisor {
    interpreter: PathBuf,
}

impl NativeSupervisor {
    pub fn new<T: AsRef<Path>>(interpreter: T) -> Self {
        Self {
            interpreter: interpreter.as_ref().into(),
        }
    }

    fn spawn(
        &self,
        exercise: &Exercise,
    ) -> Result<(ManagedProcess, UnboundedReceiver<OutputLine>), GradingError> {
        let mut command = Command::new(&self.interpreter);
        command
            .arg(&exercise.submission_file)
            .current_dir(&exercise.working_dir);

        ManagedProcess::spawn(command).map_err(|e| GradingError::Spawn { msg: e.to_string() })
    }
}

#[async_trait::async_trait]
impl Supervisor for NativeSupervisor {
    #[tracing::instrument(skip(self, exercise, timeouts), fields(exercise = %exercise.id))]
    async fn run_script(
        &self,
        exercise: &Exercise,
        timeouts: &Timeouts,
    ) -> Result<ScriptOutput, GradingError> {
        let (mut process, lines) = self.spawn(exercise)?;
        drop(lines);

        let status = match timeout(timeouts.script, process.wait()).await {
            Ok(Ok(status)) => status.code(),
            Ok(Err(err)) => {
                return Err(GradingError::Spawn {
                    msg: err.to_string(),
                });
            }
            Err(_) => {
                tracing::debug!(pid = ?process.pid(), "script deadline reached");
                process.shutdown(SHUTDOWN_TIMEOUT).await;
                process.drain(OUTPUT_DRAIN_TIMEOUT).await;
                return Ok(ScriptOutput {
                    status: None,
                    stdout: process.stdout(),
                    stderr: process.stderr(),
                    timed_out: true,
                });
            }
        };

        process.drain(OUTPUT_DRAIN_TIMEOUT).await;
        Ok(ScriptOutput {
            status,
            stdout: process.stdout(),
            stderr: process.stderr(),
            timed_out: false,
        })
    }

    #[tracing::instrument(skip(self, exercise, timeouts), fields(exercise = %exercise.id, port = exercise.port))]
    async fn start_server(
        &self,
        exercise: &Exercise,
        timeouts: &Timeouts,
    ) -> Result<ServerLaunch, GradingError> {
        let (mut process, mut lines) = self.spawn(exercise)?;

        let readiness =
            await_readiness(&mut process, &mut lines, exercise, timeouts.startup).await;

        match &readiness {
            Ok(()) => {
                tracing::debug!(pid = ?process.pid(), "server ready");
                if !timeouts.settle.is_zero() {
                    sleep(timeouts.settle).await;
                }
            }
            Err(err) => tracing::debug!(pid = ?process.pid(), error = %err, "server not ready"),
        }

        Ok(ServerLaunch { process, readiness })
    }
}

enum Event {
    Line(Option<OutputLine>),
    Exited(Option<i32>),
    Listening,
    Confirmed,
    Deadline,
}

/// First of: a ready line on stdout, a port-in-use line on stderr, the
/// port accepting connections, the child exiting, or the deadline.
///
/// A successful connect only counts once the child has stayed up for
/// [`PORT_PROBE_CONFIRM`] without reporting port-in-use, since a stale
/// listener answers the probe before the child gets to bind.
async fn await_readiness(
    process: &mut ManagedProcess,
    lines: &mut UnboundedReceiver<OutputLine>,
    exercise: &Exercise,
    limit: Duration,
) -> Result<(), GradingError> {
    let deadline = sleep(limit);
    tokio::pin!(deadline);
    let probe = probe_port(exercise.port);
    tokio::pin!(probe);
    let confirm = sleep(PORT_PROBE_CONFIRM);
    tokio::pin!(confirm);

    let mut probing = exercise.readiness.probe_port;
    let mut confirming = false;
    let mut streams_open = true;

    loop {
        let event = tokio::select! {
            line = lines.recv(), if streams_open => Event::Line(line),
            status = process.wait() => Event::Exited(status.ok().and_then(|s| s.code())),
            _ = &mut probe, if probing => Event::Listening,
            _ = &mut confirm, if confirming => Event::Confirmed,
            _ = &mut deadline => Event::Deadline,
        };

        match event {
            Event::Line(Some(line)) => {
                tracing::trace!(stream = ?line.stream, text = %line.text, "server output");
                if let Some(verdict) = classify(&exercise.readiness, &line) {
                    return verdict;
                }
            }
            Event::Line(None) => streams_open = false,
            Event::Exited(status) => {
                process.drain(OUTPUT_DRAIN_TIMEOUT).await;
                while let Ok(line) = lines.try_recv() {
                    if let Some(Err(err)) = classify(&exercise.readiness, &line) {
                        return Err(err);
                    }
                }
                return Err(GradingError::ExitedBeforeReady { status });
            }
            Event::Listening => {
                tracing::debug!(port = exercise.port, "port accepts connections");
                probing = false;
                confirming = true;
                confirm.as_mut().reset(Instant::now() + PORT_PROBE_CONFIRM);
            }
            Event::Confirmed => return Ok(()),
            Event::Deadline => {
                return Err(GradingError::StartupTimeout {
                    limit_ms: limit.as_millis() as u64,
                });
            }
        }
    }
}

fn classify(readiness: &ReadinessSpec, line: &OutputLine) -> Option<Result<(), GradingError>> {
    match line.stream {
        StreamKind::Stdout if readiness.is_ready_line(&line.text) => Some(Ok(())),
        StreamKind::Stderr if readiness.is_port_in_use_line(&line.text) => {
            Some(Err(GradingError::PortInUse))
        }
        _ => None,
    }
}

async fn probe_port(port: u16) {
    loop {
        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return;
        }
        sleep(PORT_PROBE_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use regex::RegexSet;
    use uuid::Uuid;

    use super::*;
    use crate::core::domain::ExerciseKind;

    async fn exercise_with(script: &str, port: u16, probe_port: bool) -> Exercise {
        let dir = PathBuf::from(format!("/tmp/grader_{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("server.sh"), script).await.unwrap();

        Exercise {
            id: "module-4".to_string(),
            kind: ExerciseKind::Server,
            submission_file: dir.join("server.sh"),
            test_file: dir.join("test.sh"),
            working_dir: dir,
            port,
            readiness: ReadinessSpec {
                ready: RegexSet::new(["Server running", "listening"]).unwrap(),
                port_in_use: RegexSet::new(["EADDRINUSE"]).unwrap(),
                probe_port,
            },
        }
    }

    fn timeouts(startup_ms: u64) -> Timeouts {
        Timeouts {
            startup: Duration::from_millis(startup_ms),
            settle: Duration::ZERO,
            script: Duration::from_millis(2000),
            tests: Duration::from_millis(2000),
        }
    }

    #[tokio::test]
    async fn test_run_script_collects_output() {
        let exercise = exercise_with("echo hello\necho oops >&2\nexit 3\n", 3000, false).await;
        let supervisor = NativeSupervisor::new("sh");

        let output = supervisor.run_script(&exercise, &timeouts(1000)).await.unwrap();

        assert_eq!(output.status, Some(3));
        assert!(!output.success());
        assert_eq!(output.stdout, "hello");
        assert_eq!(output.stderr, "oops");
    }

    #[tokio::test]
    async fn test_run_script_runs_in_working_dir() {
        let exercise = exercise_with("pwd\n", 3000, false).await;
        let supervisor = NativeSupervisor::new("sh");

        let output = supervisor.run_script(&exercise, &timeouts(1000)).await.unwrap();

        assert!(output.success());
        assert_eq!(PathBuf::from(output.stdout), exercise.working_dir);
    }

    #[tokio::test]
    async fn test_run_script_timeout_keeps_output() {
        let exercise = exercise_with(
            "echo partial-output\necho warming up >&2\nexec sleep 30\n",
            3000,
            false,
        )
        .await;
        let supervisor = NativeSupervisor::new("sh");
        let mut limits = timeouts(1000);
        limits.script = Duration::from_millis(300);

        let output = supervisor.run_script(&exercise, &limits).await.unwrap();

        assert!(output.timed_out);
        assert!(!output.success());
        assert_eq!(output.status, None);
        assert_eq!(output.stdout, "partial-output");
        assert_eq!(output.stderr, "warming up");
    }

    #[tokio::test]
    async fn test_spawn_error() {
        let exercise = exercise_with("exit 0\n", 3000, false).await;
        let supervisor = NativeSupervisor::new("/aboba");

        let result = supervisor.run_script(&exercise, &timeouts(1000)).await;
        assert!(matches!(result, Err(GradingError::Spawn { .. })));

        let result = supervisor.start_server(&exercise, &timeouts(1000)).await;
        assert!(matches!(result, Err(GradingError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_server_ready_on_output() {
        let exercise = exercise_with(
            "echo booting\necho 'Server running on port 3000'\nexec sleep 30\n",
            3000,
            false,
        )
        .await;
        let supervisor = NativeSupervisor::new("sh");

        let mut launch = supervisor.start_server(&exercise, &timeouts(2000)).await.unwrap();

        assert_eq!(launch.readiness, Ok(()));
        assert!(launch.process.try_exit_status().is_none());
        launch.process.terminate();
        assert!(launch.process.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_server_ready_on_port_probe() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let exercise = exercise_with("exec sleep 30\n", port, true).await;
        let supervisor = NativeSupervisor::new("sh");

        let launch = supervisor.start_server(&exercise, &timeouts(2000)).await.unwrap();
        assert_eq!(launch.readiness, Ok(()));
    }

    #[tokio::test]
    async fn test_stale_listener_does_not_mask_port_in_use() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let exercise = exercise_with(
            "sleep 0.2\necho 'Error: listen EADDRINUSE: address already in use' >&2\nexit 1\n",
            port,
            true,
        )
        .await;
        let supervisor = NativeSupervisor::new("sh");

        let launch = supervisor.start_server(&exercise, &timeouts(2000)).await.unwrap();
        assert_eq!(launch.readiness, Err(GradingError::PortInUse));
    }

    #[tokio::test]
    async fn test_server_startup_timeout() {
        let exercise = exercise_with("echo still booting\nexec sleep 30\n", 3000, false).await;
        let supervisor = NativeSupervisor::new("sh");

        let launch = supervisor.start_server(&exercise, &timeouts(300)).await.unwrap();

        assert_eq!(
            launch.readiness,
            Err(GradingError::StartupTimeout { limit_ms: 300 })
        );
        assert_eq!(launch.process.stdout(), "still booting");
    }

    #[tokio::test]
    async fn test_server_port_in_use() {
        let exercise = exercise_with(
            "echo 'Error: listen EADDRINUSE: address already in use :::3000' >&2\nexec sleep 30\n",
            3000,
            false,
        )
        .await;
        let supervisor = NativeSupervisor::new("sh");

        let launch = supervisor.start_server(&exercise, &timeouts(2000)).await.unwrap();
        assert_eq!(launch.readiness, Err(GradingError::PortInUse));
    }

    #[tokio::test]
    async fn test_server_port_in_use_then_exit() {
        let exercise = exercise_with("echo EADDRINUSE >&2\nexit 1\n", 3000, false).await;
        let supervisor = NativeSupervisor::new("sh");

        let launch = supervisor.start_server(&exercise, &timeouts(2000)).await.unwrap();
        assert_eq!(launch.readiness, Err(GradingError::PortInUse));
    }

    #[tokio::test]
    async fn test_server_exits_before_ready() {
        let exercise = exercise_with("echo crashed >&2\nexit 7\n", 3000, false).await;
        let supervisor = NativeSupervisor::new("sh");

        let launch = supervisor.start_server(&exercise, &timeouts(2000)).await.unwrap();

        assert_eq!(
            launch.readiness,
            Err(GradingError::ExitedBeforeReady { status: Some(7) })
        );
        assert_eq!(launch.process.stderr(), "crashed");
    }

    #[tokio::test]
    async fn test_ready_pattern_ignored_on_stderr() {
        let exercise = exercise_with("echo 'Server running' >&2\nexec sleep 30\n", 3000, false).await;
        let supervisor = NativeSupervisor::new("sh");

        let launch = supervisor.start_server(&exercise, &timeouts(300)).await.unwrap();
        assert!(matches!(
            launch.readiness,
            Err(GradingError::StartupTimeout { .. })
        ));
    }
}
