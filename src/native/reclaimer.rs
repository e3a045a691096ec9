use itertools::Itertools;
use tokio::{
    process::Command,
    time::{sleep, timeout},
};

use crate::{
    constants::{PORT_PROBE_INTERVAL, RECLAIM_TIMEOUT},
    core::traits::reclaimer::PortReclaimer,
};

/// Finds listeners with `lsof` and force-kills them.
#[derive(Debug, Clone, Default)]
pub struct LsofPortReclaimer;

impl LsofPortReclaimer {
    pub fn new() -> Self {
        Self
    }

    async fn listeners(&self, port: u16) -> Vec<u32> {
        let lookup = Command::new("lsof")
            .arg("-ti")
            .arg(format!(":{port}"))
            .kill_on_drop(true)
            .output();

        match timeout(RECLAIM_TIMEOUT, lookup).await {
            Ok(Ok(output)) => parse_pids(&String::from_utf8_lossy(&output.stdout)),
            Ok(Err(err)) => {
                tracing::debug!(port, error = %err, "port lookup unavailable");
                Vec::new()
            }
            Err(_) => {
                tracing::debug!(port, "port lookup timed out");
                Vec::new()
            }
        }
    }

    async fn kill(&self, pid: u32) -> bool {
        kill_target(&pid.to_string()).await
    }

    /// Polls until nothing but this process listens on `port`.
    async fn await_release(&self, port: u16, own_pid: u32) {
        let released = async {
            while self.listeners(port).await.iter().any(|&pid| pid != own_pid) {
                sleep(PORT_PROBE_INTERVAL).await;
            }
        };

        if timeout(RECLAIM_TIMEOUT, released).await.is_err() {
            tracing::warn!(port, "port still held after reclaim");
        }
    }
}

/// Sends SIGKILL through `kill(1)`. `target` is a pid, or `-<pgid>` for a
/// whole process group.
pub async fn kill_target(target: &str) -> bool {
    let kill = Command::new("kill")
        .args(["-9", "--", target])
        .kill_on_drop(true)
        .status();

    match timeout(RECLAIM_TIMEOUT, kill).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(err)) => {
            tracing::debug!(pid = target, error = %err, "kill failed");
            false
        }
        Err(_) => false,
    }
}

#[async_trait::async_trait]
impl PortReclaimer for LsofPortReclaimer {
    async fn reclaim(&self, port: u16) -> Vec<u32> {
        let own_pid = std::process::id();
        let mut killed = Vec::new();

        for pid in self.listeners(port).await {
            if pid == own_pid {
                continue;
            }
            if self.kill(pid).await {
                killed.push(pid);
            }
        }

        if !killed.is_empty() {
            self.await_release(port, own_pid).await;
        }
        killed
    }
}

/// One pid per line, as printed by `lsof -t`.
pub fn parse_pids(output: &str) -> Vec<u32> {
    output
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .unique()
        .collect()
}

/// A `sleep` process that holds a listening socket on a fresh port. The
/// socket is handed over as the child's stdin so the test process keeps
/// no copy of it.
#[cfg(test)]
pub fn spawn_occupant() -> (std::process::Child, u16) {
    use std::os::fd::OwnedFd;
    use std::process::Stdio;

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let occupant = std::process::Command::new("sleep")
        .arg("30")
        .stdin(Stdio::from(OwnedFd::from(listener)))
        .spawn()
        .unwrap();
    (occupant, port)
}
