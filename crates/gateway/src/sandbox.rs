//! Sandbox collaborator interface.
//!
//! The container manager itself lives outside this gateway; the trait
//! captures exactly what the gateway consumes: where the terminal server
//! and user applications listen, a zip archive of the workspace, and a
//! stop call for shutdown.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use axum::body::Body;
use tokio::process::Command;
use tokio_util::io::ReaderStream;

#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Authority (`host:port`) of the container's terminal server.
    fn terminal_authority(&self) -> String;

    /// Network address user applications listen on inside the sandbox.
    fn app_host(&self) -> String;

    /// Zip archive of the workspace tree, streamed.
    async fn archive(&self) -> anyhow::Result<Body>;

    /// Stop the container. Idempotent, best effort.
    async fn stop(&self);
}

/// Docker-backed sandbox handle.
pub struct ContainerSandbox {
    container: String,
    host: String,
    terminal_port: u16,
}

impl ContainerSandbox {
    pub fn new(container: impl Into<String>, host: impl Into<String>, terminal_port: u16) -> Self {
        Self {
            container: container.into(),
            host: host.into(),
            terminal_port,
        }
    }
}

#[async_trait]
impl Sandbox for ContainerSandbox {
    fn terminal_authority(&self) -> String {
        format!("{}:{}", self.host, self.terminal_port)
    }

    fn app_host(&self) -> String {
        self.host.clone()
    }

    async fn archive(&self) -> anyhow::Result<Body> {
        let mut child = Command::new("docker")
            .args([
                "exec",
                &self.container,
                "sh",
                "-lc",
                "cd /workspace && zip -qr - .",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("archive process has no stdout"))?;

        // Reap the child once the stream is drained.
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if !status.success() => {
                    tracing::warn!(%status, "workspace archive exited nonzero");
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(error = %err, "failed to wait on archive process"),
            }
        });

        Ok(Body::from_stream(ReaderStream::new(stdout)))
    }

    async fn stop(&self) {
        tracing::info!(container = %self.container, "stopping sandbox");
        match Command::new("docker")
            .args(["stop", "-t", "5", &self.container])
            .status()
            .await
        {
            Ok(status) if !status.success() => {
                tracing::warn!(%status, "sandbox stop exited nonzero");
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "failed to stop sandbox"),
        }
    }
}

/// Last-resort cleanup: stops the container from `Drop` so a panic on the
/// serve path still tears the sandbox down. Disarm after an orderly stop.
pub struct StopGuard {
    container: String,
    armed: AtomicBool,
}

impl StopGuard {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            armed: AtomicBool::new(true),
        }
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        if !self.armed.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::warn!(container = %self.container, "stop guard firing");
        let _ = std::process::Command::new("docker")
            .args(["stop", "-t", "5", &self.container])
            .status();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_authority_combines_host_and_port() {
        let sandbox = ContainerSandbox::new("box", "172.17.0.2", 7681);
        assert_eq!(sandbox.terminal_authority(), "172.17.0.2:7681");
        assert_eq!(sandbox.app_host(), "172.17.0.2");
    }

    #[test]
    fn disarmed_guard_stays_quiet_on_drop() {
        let guard = StopGuard::new("box");
        guard.disarm();
        drop(guard);
    }
}
