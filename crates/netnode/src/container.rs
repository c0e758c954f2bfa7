//! Container runtime lookup for namespace adoption.

use std::process::Command;

use tracing::debug;

/// Resolves a container identity to the PID of its init process.
pub trait ContainerRuntime: Send + Sync {
    /// PID of the container's init process, or a human-readable reason.
    fn init_pid(&self, id: &str) -> Result<u32, String>;
}

/// Asks the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different executable (`podman` speaks the same inspect format).
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl ContainerRuntime for DockerCli {
    fn init_pid(&self, id: &str) -> Result<u32, String> {
        let output = Command::new(&self.binary)
            .args(["inspect", "--format", "{{.State.Pid}}", id])
            .output()
            .map_err(|e| format!("cannot run {}: {e}", self.binary))?;

        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
        }

        let pid = parse_pid(&String::from_utf8_lossy(&output.stdout))?;
        debug!(container = %id, pid, "resolved container init pid");
        Ok(pid)
    }
}

/// Parse `inspect` output. PID 0 means the container is not running.
fn parse_pid(stdout: &str) -> Result<u32, String> {
    let text = stdout.trim();
    match text.parse::<u32>() {
        Ok(0) => Err("container is not running".to_string()),
        Ok(pid) => Ok(pid),
        Err(_) => Err(format!("unexpected inspect output: {text:?}")),
    }
}
