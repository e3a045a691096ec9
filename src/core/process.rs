use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use itertools::Itertools;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

#[derive(Clone, Debug)]
pub struct OutputLine {
    pub stream: StreamKind,
    pub text: String,
}

/// A spawned child owned by the supervisor for one execution.
///
/// Both output streams are pumped line by line into a shared buffer for the
/// whole life of the child, so a chatty process never blocks on a full pipe.
/// Every line is also forwarded to the receiver returned by [`spawn`],
/// which is how readiness is observed. Callers that only want the buffer
/// drop the receiver right away.
///
/// The child receives a kill signal exactly once: on the first call to
/// [`terminate`] or, failing that, when the handle is dropped.
///
/// [`spawn`]: ManagedProcess::spawn
/// [`terminate`]: ManagedProcess::terminate
#[derive(Debug)]
pub struct ManagedProcess {
    pid: Option<u32>,
    child: Option<Child>,
    lines: Arc<Mutex<Vec<OutputLine>>>,
    pump: Option<JoinHandle<()>>,
    terminated: bool,
}

impl ManagedProcess {
    pub fn spawn(mut command: Command) -> std::io::Result<(Self, UnboundedReceiver<OutputLine>)> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn()?;
        let pid = child.id();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let (line_tx, line_rx) = unbounded_channel();

        let pump = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => Some(tokio::spawn(pump_output(
                stdout,
                stderr,
                lines.clone(),
                line_tx,
            ))),
            _ => None,
        };

        tracing::debug!(?pid, "process spawned");

        Ok((
            Self {
                pid,
                child: Some(child),
                lines,
                pump,
                terminated: false,
            },
            line_rx,
        ))
    }

    /// A handle with no child behind it.
    #[cfg(test)]
    pub fn detached() -> Self {
        Self {
            pid: None,
            child: None,
            lines: Arc::new(Mutex::new(Vec::new())),
            pump: None,
            terminated: false,
        }
    }

    /// Appends a line as if the child had printed it.
    #[cfg(test)]
    pub fn push_line(&self, stream: StreamKind, text: &str) {
        lock(&self.lines).push(OutputLine {
            stream,
            text: text.to_string(),
        });
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    #[cfg(test)]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        match self.child.as_mut() {
            Some(child) => child.wait().await,
            None => Err(std::io::Error::other("process has no child to wait for")),
        }
    }

    /// Exit status if the child has already exited, without blocking.
    pub fn try_exit_status(&mut self) -> Option<ExitStatus> {
        self.child
            .as_mut()
            .and_then(|child| child.try_wait().ok().flatten())
    }

    /// Waits for the output pump to reach EOF on both streams.
    pub async fn drain(&mut self, limit: Duration) {
        if let Some(pump) = self.pump.take() {
            if tokio::time::timeout(limit, pump).await.is_err() {
                tracing::debug!(pid = ?self.pid, "output pump still running after drain limit");
            }
        }
    }

    pub fn stdout(&self) -> String {
        self.collect(Some(StreamKind::Stdout))
    }

    pub fn stderr(&self) -> String {
        self.collect(Some(StreamKind::Stderr))
    }

    /// Both streams interleaved in arrival order.
    pub fn combined(&self) -> String {
        self.collect(None)
    }

    fn collect(&self, stream: Option<StreamKind>) -> String {
        lock(&self.lines)
            .iter()
            .filter(|line| stream.is_none_or(|stream| line.stream == stream))
            .map(|line| line.text.as_str())
            .join("\n")
    }

    /// Sends the kill signal without waiting for the child to exit.
    /// Calling it again, or on a child that already exited, is a no-op.
    pub fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        let Some(child) = self.child.as_mut() else {
            return;
        };

        match child.start_kill() {
            Ok(()) => tracing::debug!(pid = ?self.pid, "kill signal sent"),
            Err(err) => tracing::debug!(pid = ?self.pid, error = %err, "process already gone"),
        }
    }

    /// Terminates the child and waits up to `limit` for it to be reaped.
    pub async fn shutdown(&mut self, limit: Duration) {
        self.terminate();

        let Some(child) = self.child.as_mut() else {
            return;
        };
        if tokio::time::timeout(limit, child.wait()).await.is_err() {
            tracing::warn!(pid = ?self.pid, "process still running after kill");
        }
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

async fn pump_output(
    stdout: ChildStdout,
    stderr: ChildStderr,
    lines: Arc<Mutex<Vec<OutputLine>>>,
    line_tx: UnboundedSender<OutputLine>,
) {
    let stdout = LinesStream::new(BufReader::new(stdout).lines())
        .map(|line| (StreamKind::Stdout, line));
    let stderr = LinesStream::new(BufReader::new(stderr).lines())
        .map(|line| (StreamKind::Stderr, line));
    let mut merged = stdout.merge(stderr);

    while let Some((stream, line)) = merged.next().await {
        let text = match line {
            Ok(text) => text,
            Err(err) => {
                tracing::debug!(?stream, error = %err, "skipping unreadable output line");
                continue;
            }
        };

        let line = OutputLine { stream, text };
        lock(&lines).push(line.clone());
        // Fails once the receiver is dropped; the buffer still gets the line
        let _ = line_tx.send(line);
    }
}

fn lock(lines: &Mutex<Vec<OutputLine>>) -> MutexGuard<'_, Vec<OutputLine>> {
    lines.lock().unwrap_or_else(PoisonError::into_inner)
}
