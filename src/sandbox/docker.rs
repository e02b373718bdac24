use std::ffi::OsStr;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use chrono::Local;

use crate::config::SandboxConfig;

use super::{
    CapturedOutput, EnvironmentHandle, EnvironmentSpec, ExecutionBackend, StagedFile, WaitOutcome,
};

const PIDS_LIMIT: u32 = 64;

// Staging directory permissions
#[cfg(unix)]
const STAGING_DIR_PERMISSIONS: u32 = 0o700;

/// Provisions one docker container per execution through the docker CLI
pub struct DockerBackend {
    /// Path or name of the docker executable
    binary: String,
    /// Whether to pull missing images before creating a container
    pull_images: bool,
    /// Host directory where files are staged before being copied in
    staging_dir: PathBuf,
    sequence: AtomicU64,
}

impl DockerBackend {
    pub fn build(binary: &str, pull_images: bool) -> Result<Self> {
        let staging_dir = Self::setup_staging_directory()?;
        log::info!(
            "DockerBackend initialized with {binary}, staging in {}",
            staging_dir.display()
        );

        Ok(Self {
            binary: binary.to_string(),
            pull_images,
            staging_dir,
            sequence: AtomicU64::new(0),
        })
    }

    pub fn from_config(config: &SandboxConfig) -> Result<Self> {
        Self::build(&config.docker_binary, config.pull_images)
    }

    /// Checks that the docker daemon answers
    pub fn ping(&self) -> Result<()> {
        self.docker_checked("version", ["version", "--format", "{{.Server.Version}}"])
            .map(|output| {
                log::info!(
                    "Docker server version {}",
                    String::from_utf8_lossy(&output.stdout).trim()
                );
            })
    }

    /// Sets up the staging directory under the user cache directory
    fn setup_staging_directory() -> Result<PathBuf> {
        use directories::ProjectDirs;

        let proj_dirs = ProjectDirs::from("", "", "codejudge")
            .ok_or_else(|| anyhow!("Unable to find user directory"))?;

        let staging_dir = proj_dirs.cache_dir().join("staging");
        fs::create_dir_all(&staging_dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(
                &staging_dir,
                fs::Permissions::from_mode(STAGING_DIR_PERMISSIONS),
            )?;
        }

        Ok(staging_dir)
    }

    /// Creates a fresh, uniquely named staging directory for one injection
    fn create_call_dir(&self) -> Result<PathBuf> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let call_dir = self.staging_dir.join(format!(
            "{}-{}-{sequence}",
            Local::now().format("%y%m%d-%H-%M-%S"),
            std::process::id()
        ));
        fs::create_dir_all(&call_dir)?;
        Ok(call_dir)
    }

    fn docker<I, S>(&self, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to spawn {}", self.binary))
    }

    fn docker_checked<I, S>(&self, action: &str, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.docker(args)?;
        if !output.status.success() {
            bail!(
                "docker {action} failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output)
    }

    /// Pulls the image when it is not present locally; failures are only logged
    fn ensure_image(&self, image: &str) {
        if !self.pull_images {
            return;
        }
        if self
            .docker(["image", "inspect", "--format", "{{.Id}}", image])
            .is_ok_and(|output| output.status.success())
        {
            return;
        }

        log::info!("Pulling image {image}");
        if let Err(e) = self.docker_checked("pull", ["pull", "--quiet", image]) {
            log::warn!("Unable to pull {image}, relying on the local image store: {e:#}");
        }
    }

    fn copy_into(
        &self,
        env: &EnvironmentHandle,
        dir: &str,
        files: &[StagedFile],
        call_dir: &Path,
    ) -> Result<()> {
        for file in files {
            fs::write(call_dir.join(&file.name), &file.contents)
                .with_context(|| format!("Failed to stage {}", file.name))?;
        }

        let source = format!("{}/.", call_dir.display());
        let target = format!("{}:{dir}", env.id());
        self.docker_checked("cp", ["cp", source.as_str(), target.as_str()])?;
        Ok(())
    }
}

impl ExecutionBackend for DockerBackend {
    fn create(&self, spec: &EnvironmentSpec) -> Result<EnvironmentHandle> {
        let args = create_args(spec)?;
        self.ensure_image(&spec.image);

        let output = self.docker_checked("create", args)?;
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            bail!(
                "docker create produced empty stdout; stderr={}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        Ok(EnvironmentHandle::new(id))
    }

    fn inject_files(
        &self,
        env: &EnvironmentHandle,
        dir: &str,
        files: &[StagedFile],
    ) -> Result<()> {
        let call_dir = self.create_call_dir()?;
        let copied = self.copy_into(env, dir, files, &call_dir);

        if let Err(e) = fs::remove_dir_all(&call_dir) {
            log::warn!("Unable to remove staging dir {}: {e}", call_dir.display());
        }
        copied
    }

    fn start(&self, env: &EnvironmentHandle) -> Result<()> {
        self.docker_checked("start", ["start", env.id()])?;
        Ok(())
    }

    fn wait(&self, env: &EnvironmentHandle, timeout: Duration) -> Result<WaitOutcome> {
        let mut command = tokio::process::Command::new(&self.binary);
        command
            .args(["wait", env.id()])
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let waited = block_on(async { tokio::time::timeout(timeout, command.output()).await })?;
        let output = match waited {
            Err(_) => return Ok(WaitOutcome::TimedOut),
            Ok(output) => output.with_context(|| format!("Failed to spawn {}", self.binary))?,
        };

        if !output.status.success() {
            bail!(
                "docker wait failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        let code = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let code = code
            .parse::<i64>()
            .with_context(|| format!("docker wait returned {code:?}"))?;

        Ok(WaitOutcome::Exited(code))
    }

    fn stop(&self, env: &EnvironmentHandle, grace: Duration) -> Result<()> {
        let grace = grace_secs(grace).to_string();
        self.docker_checked("stop", ["stop", "--time", grace.as_str(), env.id()])?;
        Ok(())
    }

    fn logs(&self, env: &EnvironmentHandle) -> Result<CapturedOutput> {
        let output = self.docker_checked("logs", ["logs", env.id()])?;
        Ok(CapturedOutput {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn remove(&self, env: &EnvironmentHandle) -> Result<()> {
        self.docker_checked("rm", ["rm", "--force", "--volumes", env.id()])?;
        Ok(())
    }
}

/// Arguments of `docker create` for `spec`, with every isolation flag applied
fn create_args(spec: &EnvironmentSpec) -> Result<Vec<String>> {
    if !spec.network_disabled {
        bail!("refusing to create an environment with network access");
    }

    let memory = spec.memory_bytes.to_string();
    let cpus = format!("{:.3}", spec.nano_cpus as f64 / 1_000_000_000.0);
    let pids = PIDS_LIMIT.to_string();

    #[rustfmt::skip]
    let mut args: Vec<String> = [
        "create",
        "--network", "none",
        "--memory", memory.as_str(),
        "--memory-swap", memory.as_str(),
        "--cpus", cpus.as_str(),
        "--pids-limit", pids.as_str(),
        "--cap-drop", "ALL",
        "--security-opt", "no-new-privileges",
        "--workdir", spec.working_dir.as_str(),
        "--label", "codejudge.sandbox=1",
        spec.image.as_str(),
    ]
    .into_iter()
    .map(String::from)
    .collect();
    args.extend(spec.command.iter().cloned());
    Ok(args)
}

/// Whole seconds for `docker stop --time`, rounded up so a short grace is not an immediate kill
fn grace_secs(grace: Duration) -> u64 {
    grace.as_secs_f64().ceil() as u64
}

/// Drives `future` to completion from synchronous code
///
/// Reuses the ambient tokio runtime when called from a blocking task or a
/// multi-thread worker, and falls back to a throwaway current-thread runtime
/// outside of tokio. Calling it on the thread of a current-thread runtime
/// panics, so such callers must go through `spawn_blocking`.
fn block_on<F: Future>(future: F) -> Result<F::Output> {
    use tokio::runtime::{Handle, RuntimeFlavor};

    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            Ok(tokio::task::block_in_place(|| handle.block_on(future)))
        }
        Ok(handle) => Ok(handle.block_on(future)),
        Err(_) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to build a runtime for docker wait")?;
            Ok(runtime.block_on(future))
        }
    }
}
