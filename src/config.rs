use std::collections::BTreeMap;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

use crate::judge::TestCase;

#[derive(Parser)]
#[command(name = "codejudge", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<String>,

    /// Number of sandbox workers, overrides the configuration file
    #[arg(long = "workers", short = 'w')]
    pub workers: Option<usize>,
}

impl CliArgs {
    /// Load the configuration from the specified file, then apply environment overrides
    pub fn to_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config_path {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        config
            .sandbox
            .apply_env_overrides(|key| std::env::var(key).ok())?;
        if let Some(workers) = self.workers {
            config.sandbox.workers = workers;
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("environment variable {var} has an invalid value {value:?}")]
    InvalidEnv { var: &'static str, value: String },
    #[error("sandbox.{field} must be positive")]
    NotPositive { field: &'static str },
    #[error("problem id {0:?} is defined more than once")]
    DuplicateProblem(String),
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub sandbox: SandboxConfig,
    pub languages: Vec<LanguageConfig>,
    pub problems: Vec<ProblemConfig>,
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sandbox.validate()?;

        let mut seen = std::collections::HashSet::new();
        for problem in &self.problems {
            if !seen.insert(problem.id.as_str()) {
                return Err(ConfigError::DuplicateProblem(problem.id.clone()));
            }
        }
        Ok(())
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SandboxConfig {
    pub timeout_sec: u64,
    pub memory_mb: u64,
    pub cpus: f64,
    pub workers: usize,
    pub batch_parallelism: usize,
    pub docker_binary: String,
    pub pull_images: bool,
    pub stop_grace_sec: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_sec: 5,
            memory_mb: 256,
            cpus: 1.0,
            workers: 2,
            batch_parallelism: 1,
            docker_binary: "docker".to_string(),
            pull_images: true,
            stop_grace_sec: 1,
        }
    }
}

impl SandboxConfig {
    /// Overrides the resource ceilings with `SANDBOX_*` variables found through `lookup`
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        fn parse<T: std::str::FromStr>(
            var: &'static str,
            lookup: &impl Fn(&str) -> Option<String>,
        ) -> Result<Option<T>, ConfigError> {
            match lookup(var) {
                None => Ok(None),
                Some(value) => value
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| ConfigError::InvalidEnv { var, value }),
            }
        }

        if let Some(timeout) = parse("SANDBOX_TIMEOUT_SEC", &lookup)? {
            self.timeout_sec = timeout;
        }
        if let Some(memory) = parse("SANDBOX_MEMORY_MB", &lookup)? {
            self.memory_mb = memory;
        }
        if let Some(cpus) = parse("SANDBOX_CPUS", &lookup)? {
            self.cpus = cpus;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("timeout_sec", self.timeout_sec > 0),
            ("memory_mb", self.memory_mb > 0),
            ("cpus", self.cpus.is_finite() && self.cpus > 0.0),
            ("workers", self.workers > 0),
            ("batch_parallelism", self.batch_parallelism > 0),
        ];
        match checks.into_iter().find(|(_, ok)| !ok) {
            Some((field, _)) => Err(ConfigError::NotPositive { field }),
            None => Ok(()),
        }
    }

    pub fn limits(&self) -> Limits {
        Limits {
            timeout: Duration::from_secs(self.timeout_sec),
            memory: ByteSize::from_mb(self.memory_mb),
            cpus: self.cpus,
        }
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_sec)
    }
}

/// Resource ceilings applied to every isolated environment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    /// Wall-clock ceiling for the wait step
    pub timeout: Duration,
    pub memory: ByteSize,
    /// Fractional number of cores
    pub cpus: f64,
}

impl Limits {
    /// CPU quota in units of 1e-9 CPUs
    pub fn nano_cpus(&self) -> i64 {
        (self.cpus * 1_000_000_000.0) as i64
    }
}

impl Default for Limits {
    fn default() -> Self {
        SandboxConfig::default().limits()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub const fn from_mb(mb: u64) -> Self {
        Self(mb * 1024 * 1024)
    }
}

/// A language profile declared in the configuration file
#[derive(Deserialize, Debug, Clone)]
pub struct LanguageConfig {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub image: String,
    pub file_name: String,
    pub compile: Option<String>,
    pub run: String,
}

/// A problem definition supplied by the problem store
#[derive(Deserialize, Debug, Clone)]
pub struct ProblemConfig {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub default_language: Option<String>,
    /// Reference solutions keyed by language identifier
    #[serde(default)]
    pub solutions: BTreeMap<String, String>,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub editorial: Option<String>,
}

pub fn find_problem<'a>(problems: &'a [ProblemConfig], id: &str) -> Option<&'a ProblemConfig> {
    problems.iter().find(|p| p.id == id)
}
