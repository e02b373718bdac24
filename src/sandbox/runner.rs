use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::config::Limits;
use crate::languages::{INPUT_FILE, LanguageProfile, WORKDIR};

use super::{
    EnvironmentHandle, EnvironmentSpec, ExecutionBackend, ExecutionResult, ExecutionStatus,
    StagedFile, WaitOutcome,
};

const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(1);

/// Runs one program in a fresh isolated environment per call
///
/// The runner never retries and keeps no state between calls; the
/// environment it provisions is removed before `run` returns.
pub struct IsolatedRunner {
    backend: Arc<dyn ExecutionBackend>,
    stop_grace: Duration,
}

impl IsolatedRunner {
    pub fn new(backend: Arc<dyn ExecutionBackend>) -> Self {
        Self {
            backend,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Executes `source` with `stdin` under `limits`
    ///
    /// Infrastructure failures are reported as [`ExecutionStatus::Error`]
    /// with the failure message in `stderr`.
    pub fn run(
        &self,
        profile: &LanguageProfile,
        source: &str,
        stdin: &str,
        limits: &Limits,
    ) -> ExecutionResult {
        let started = Instant::now();

        match self.try_run(profile, source, stdin, limits, started) {
            Ok(result) => result,
            Err(e) => {
                log::error!("Sandbox failure while running {}: {e:#}", profile.name);
                ExecutionResult {
                    stdout: String::new(),
                    stderr: format!("{e:#}"),
                    elapsed: started.elapsed(),
                    status: ExecutionStatus::Error,
                }
            }
        }
    }

    fn try_run(
        &self,
        profile: &LanguageProfile,
        source: &str,
        stdin: &str,
        limits: &Limits,
        started: Instant,
    ) -> Result<ExecutionResult> {
        // Step 1: Provision
        let spec = EnvironmentSpec {
            image: profile.image.clone(),
            command: vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                profile.build_command(WORKDIR),
            ],
            working_dir: WORKDIR.to_string(),
            memory_bytes: limits.memory.0,
            nano_cpus: limits.nano_cpus(),
            network_disabled: true,
        };
        let env = Environment {
            handle: self.backend.create(&spec)?,
            backend: self.backend.as_ref(),
        };
        log::debug!("Environment {} created for {}", env.handle, profile.name);

        // Step 2: Stage source and stdin
        self.backend.inject_files(
            &env.handle,
            WORKDIR,
            &[
                StagedFile::new(&profile.file_name, source),
                StagedFile::new(INPUT_FILE, stdin),
            ],
        )?;

        // Step 3: Execute under the wall-clock ceiling
        self.backend.start(&env.handle)?;
        let status = match self.backend.wait(&env.handle, limits.timeout)? {
            WaitOutcome::Exited(code) => {
                log::debug!("Environment {} exited with code {code}", env.handle);
                ExecutionStatus::Success
            }
            WaitOutcome::TimedOut => {
                log::warn!(
                    "Environment {} exceeded {:?}, stopping it",
                    env.handle,
                    limits.timeout
                );
                if let Err(e) = self.backend.stop(&env.handle, self.stop_grace) {
                    log::warn!("Failed to stop environment {}: {e:#}", env.handle);
                }
                ExecutionStatus::Timeout
            }
        };

        // Step 4: Capture output; a timed out run keeps whatever is readable
        let output = match status {
            ExecutionStatus::Timeout => self.backend.logs(&env.handle).unwrap_or_else(|e| {
                log::warn!("Failed to read output of {}: {e:#}", env.handle);
                Default::default()
            }),
            _ => self.backend.logs(&env.handle)?,
        };

        Ok(ExecutionResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            elapsed: started.elapsed(),
            status,
        })
    }
}

/// A provisioned environment, force-removed exactly once when dropped
struct Environment<'a> {
    handle: EnvironmentHandle,
    backend: &'a dyn ExecutionBackend,
}

impl Drop for Environment<'_> {
    fn drop(&mut self) {
        match self.backend.remove(&self.handle) {
            Ok(()) => log::debug!("Environment {} removed", self.handle),
            Err(e) => log::error!("Environment {} failed to be removed: {e:#}", self.handle),
        }
    }
}
