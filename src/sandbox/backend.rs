use std::fmt;
use std::time::Duration;

use anyhow::Result;

/// Opaque reference to a provisioned environment
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnvironmentHandle(String);

impl EnvironmentHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EnvironmentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything a backend needs to provision one environment
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentSpec {
    pub image: String,
    pub command: Vec<String>,
    pub working_dir: String,
    pub memory_bytes: u64,
    /// CPU quota in units of 1e-9 CPUs
    pub nano_cpus: i64,
    pub network_disabled: bool,
}

/// A file to be placed in the environment's working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub name: String,
    pub contents: Vec<u8>,
}

impl StagedFile {
    pub fn new(name: &str, contents: &str) -> Self {
        Self {
            name: name.to_string(),
            contents: contents.as_bytes().to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The entry command returned, with its exit code
    Exited(i64),
    TimedOut,
}

/// Raw bytes written by the environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Capabilities an isolation backend provides to the runner
///
/// Every error returned here is an infrastructure failure, never a failure
/// of the program being executed. Implementations must never grant the
/// environment network access.
pub trait ExecutionBackend: Send + Sync {
    fn create(&self, spec: &EnvironmentSpec) -> Result<EnvironmentHandle>;

    fn inject_files(&self, env: &EnvironmentHandle, dir: &str, files: &[StagedFile])
    -> Result<()>;

    fn start(&self, env: &EnvironmentHandle) -> Result<()>;

    /// Blocks until the environment exits or `timeout` elapses
    fn wait(&self, env: &EnvironmentHandle, timeout: Duration) -> Result<WaitOutcome>;

    /// Asks the environment to stop, killing it after `grace`
    fn stop(&self, env: &EnvironmentHandle, grace: Duration) -> Result<()>;

    fn logs(&self, env: &EnvironmentHandle) -> Result<CapturedOutput>;

    /// Forcefully removes the environment, stopping it first if needed
    fn remove(&self, env: &EnvironmentHandle) -> Result<()>;
}
