mod backend;
mod docker;
mod runner;

pub use backend::{
    CapturedOutput, EnvironmentHandle, EnvironmentSpec, ExecutionBackend, StagedFile, WaitOutcome,
};
pub use docker::DockerBackend;
pub use runner::IsolatedRunner;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::SandboxConfig;

/// Terminal status of one runner invocation
///
/// `Success` only means the environment returned before the timeout; the
/// program may still have failed, which shows up in `stderr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Success,
    Timeout,
    Error,
}

/// Result of a single execution
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
    pub status: ExecutionStatus,
}

impl ExecutionResult {
    /// An error result for a failure that happened before anything ran
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            stderr: message.into(),
            status: ExecutionStatus::Error,
            ..Default::default()
        }
    }

    /// Elapsed wall-clock time with a unit suffix, e.g. `"120ms"`
    pub fn execution_time(&self) -> String {
        format!("{}ms", self.elapsed.as_millis())
    }

    /// Returned before the timeout with nothing written to stderr
    pub fn is_clean(&self) -> bool {
        self.status == ExecutionStatus::Success && self.stderr.is_empty()
    }
}

/// Creates the docker backend and checks that the daemon is reachable
///
/// An unreachable daemon is not fatal: every execution then reports an
/// error result until the daemon comes back.
pub fn create_sandbox_backend(config: &SandboxConfig) -> Result<Arc<dyn ExecutionBackend>> {
    let backend = DockerBackend::from_config(config)?;
    if let Err(e) = backend.ping() {
        log::error!("Docker daemon is not reachable, executions will fail: {e:#}");
    }
    Ok(Arc::new(backend))
}
