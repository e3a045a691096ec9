use std::process::Stdio;
use std::time::Duration;

use itertools::Itertools;
use tokio::{process::Command, time::timeout};

use crate::{
    constants::TEST_FILE_PLACEHOLDER,
    core::{
        domain::Exercise,
        errors::GradingError,
        report::RawReport,
        traits::framework::{SuiteRun, TestFramework},
    },
    native::reclaimer::kill_target,
};

/// Drives a mocha-compatible runner that prints a JSON report on stdout.
///
/// The command is split into program and arguments up front; any argument
/// containing `{test}` gets the exercise's test file substituted in.
///
/// The runner leads its own process group, so a timed-out `npx` takes the
/// `node` it spawned down with it.
#[derive(Debug, Clone)]
pub struct MochaAdapter {
    command: Vec<String>,
}

impl MochaAdapter {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    fn build_command(&self, exercise: &Exercise) -> Result<Command, GradingError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(GradingError::Spawn {
                msg: "test command is empty".to_string(),
            });
        };

        let test_file = exercise.test_file.to_string_lossy();
        let args = args
            .iter()
            .map(|arg| arg.replace(TEST_FILE_PLACEHOLDER, &test_file))
            .collect_vec();

        tracing::debug!(command = %format!("{} {}", program, args.iter().join(" ")), "running test suite");

        let mut command = Command::new(program);
        command
            .args(&args)
            .current_dir(&exercise.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        Ok(command)
    }
}

#[async_trait::async_trait]
impl TestFramework for MochaAdapter {
    #[tracing::instrument(skip(self, exercise), fields(exercise = %exercise.id))]
    async fn run_suite(
        &self,
        exercise: &Exercise,
        limit: Duration,
    ) -> Result<SuiteRun, GradingError> {
        let mut command = self.build_command(exercise)?;

        let child = command.spawn().map_err(|err| GradingError::Spawn {
            msg: err.to_string(),
        })?;
        let pid = child.id();

        let output = match timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return Err(GradingError::Spawn {
                    msg: err.to_string(),
                });
            }
            Err(_) => {
                if let Some(pid) = pid {
                    kill_target(&format!("-{pid}")).await;
                }
                return Err(GradingError::TestTimeout {
                    limit_ms: limit.as_millis() as u64,
                });
            }
        };

        let status = output.status.code();
        let stdout = String::from_utf8_lossy(&output.stdout);

        match RawReport::parse(&stdout) {
            Ok(report) => {
                let stats = report.stats.as_ref();
                tracing::debug!(
                    ?status,
                    passes = report.passes.len(),
                    failures = report.failures.len(),
                    reported_tests = ?stats.map(|stats| stats.tests),
                    reported_passes = ?stats.map(|stats| stats.passes),
                    reported_failures = ?stats.map(|stats| stats.failures),
                    pending = ?stats.map(|stats| stats.pending),
                    duration_ms = ?stats.and_then(|stats| stats.duration),
                    "test suite finished"
                );
                Ok(SuiteRun { report, status })
            }
            Err(err) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let raw = if stderr.trim().is_empty() {
                    stdout.trim()
                } else {
                    stderr.trim()
                };
                Err(GradingError::AdapterParse {
                    msg: format!("{err}\n{raw}"),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use regex::RegexSet;
    use uuid::Uuid;

    use super::*;
    use crate::core::domain::{ExerciseKind, ReadinessSpec};

    async fn exercise_with(test_script: &str) -> Exercise {
        let dir = PathBuf::from(format!("/tmp/grader_{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("test.sh"), test_script).await.unwrap();

        Exercise {
            id: "module-4".to_string(),
            kind: ExerciseKind::Server,
            submission_file: dir.join("server.sh"),
            test_file: dir.join("test.sh"),
            working_dir: dir,
            port: 3000,
            readiness: ReadinessSpec {
                ready: RegexSet::empty(),
                port_in_use: RegexSet::empty(),
                probe_port: false,
            },
        }
    }

    fn adapter() -> MochaAdapter {
        MochaAdapter::new(vec!["sh".to_string(), TEST_FILE_PLACEHOLDER.to_string()])
    }

    #[tokio::test]
    async fn test_run_suite_parses_report() {
        let script = r#"cat <<'EOF'
{
  "stats": { "tests": 2, "passes": 1, "failures": 1 },
  "passes": [{ "title": "responds", "fullTitle": "GET / responds" }],
  "failures": [{
    "title": "returns json",
    "fullTitle": "GET / returns json",
    "err": { "message": "expected 'text/html' to equal 'application/json'" }
  }]
}
EOF
exit 1
"#;
        let exercise = exercise_with(script).await;

        let run = adapter()
            .run_suite(&exercise, Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(run.status, Some(1));
        assert_eq!(run.report.passes.len(), 1);
        assert_eq!(run.report.failures.len(), 1);
        assert_eq!(
            run.report.passes[0].full_title.as_deref(),
            Some("GET / responds")
        );
    }

    #[tokio::test]
    async fn test_run_suite_runs_in_working_dir() {
        let script = r#"printf '{"passes":[{"title":"%s","fullTitle":"%s"}],"failures":[]}' "$(pwd)" "$(pwd)""#;
        let exercise = exercise_with(script).await;

        let run = adapter()
            .run_suite(&exercise, Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(
            PathBuf::from(&run.report.passes[0].title),
            exercise.working_dir
        );
    }

    #[tokio::test]
    async fn test_run_suite_crash_is_parse_error() {
        let exercise = exercise_with("echo 'Error: Cannot find module chai' >&2\nexit 1\n").await;

        let result = adapter().run_suite(&exercise, Duration::from_secs(2)).await;

        match result {
            Err(GradingError::AdapterParse { msg }) => {
                assert!(msg.contains("Cannot find module chai"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_suite_timeout() {
        let exercise = exercise_with("exec sleep 30\n").await;

        let result = adapter()
            .run_suite(&exercise, Duration::from_millis(200))
            .await;

        assert!(matches!(
            result,
            Err(GradingError::TestTimeout { limit_ms: 200 })
        ));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_run_suite_timeout_kills_spawned_runner() {
        let exercise = exercise_with("sleep 30 &\necho $! > runner.pid\nwait\n").await;

        let result = adapter()
            .run_suite(&exercise, Duration::from_millis(300))
            .await;
        assert!(matches!(result, Err(GradingError::TestTimeout { .. })));

        let pid = tokio::fs::read_to_string(exercise.working_dir.join("runner.pid"))
            .await
            .unwrap();
        let stat = format!("/proc/{}/stat", pid.trim());
        let mut alive = true;
        for _ in 0..20 {
            alive = std::fs::read_to_string(&stat).is_ok_and(|stat| {
                stat.rsplit_once(')')
                    .is_some_and(|(_, rest)| !rest.trim_start().starts_with('Z'))
            });
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!alive, "runner child {} outlived the timeout", pid.trim());
    }

    #[tokio::test]
    async fn test_run_suite_missing_runner() {
        let exercise = exercise_with("exit 0\n").await;
        let adapter = MochaAdapter::new(vec!["/aboba".to_string()]);

        let result = adapter.run_suite(&exercise, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(GradingError::Spawn { .. })));

        let result = MochaAdapter::new(vec![])
            .run_suite(&exercise, Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(GradingError::Spawn { .. })));
    }
}
