#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use parking_lot::Mutex;

use codejudge::config::Limits;
use codejudge::judge::{Judge, TestCase};
use codejudge::languages::LanguageRegistry;
use codejudge::sandbox::{
    CapturedOutput, EnvironmentHandle, EnvironmentSpec, ExecutionBackend, IsolatedRunner,
    StagedFile, WaitOutcome,
};

/// Backend operation that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Create,
    Inject,
    Start,
    Wait,
    Stop,
    Logs,
    Remove,
}

/// What the scripted program does once started
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    pub stdout: String,
    /// Raw stdout bytes, used instead of `stdout` when set
    pub raw_stdout: Option<Vec<u8>>,
    pub stderr: String,
    pub exit_code: i64,
    pub runtime: Duration,
}

impl Behavior {
    pub fn prints(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            ..Default::default()
        }
    }

    pub fn prints_bytes(bytes: &[u8]) -> Self {
        Self {
            raw_stdout: Some(bytes.to_vec()),
            ..Default::default()
        }
    }

    pub fn fails(stderr: &str, exit_code: i64) -> Self {
        Self {
            stderr: stderr.to_string(),
            exit_code,
            ..Default::default()
        }
    }

    pub fn running_for(mut self, runtime: Duration) -> Self {
        self.runtime = runtime;
        self
    }
}

/// What the program sees when it starts
#[derive(Debug, Clone)]
pub struct Invocation {
    pub spec: EnvironmentSpec,
    pub files: HashMap<String, Vec<u8>>,
}

impl Invocation {
    pub fn file(&self, name: &str) -> Option<String> {
        self.files
            .get(name)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn stdin(&self) -> String {
        self.file("input.txt").unwrap_or_default()
    }
}

type Program = dyn Fn(&Invocation) -> Behavior + Send + Sync;

struct Environment {
    spec: EnvironmentSpec,
    files: HashMap<String, Vec<u8>>,
    behavior: Option<Behavior>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    alive: HashMap<String, Environment>,
    max_alive: usize,
    created: Vec<String>,
    removed: Vec<String>,
    stopped: Vec<String>,
    specs: Vec<EnvironmentSpec>,
    staged: Vec<Vec<StagedFile>>,
}

/// In-memory backend that plays a scripted program instead of running code
pub struct ScriptedBackend {
    program: Box<Program>,
    failing: Option<Stage>,
    /// Actually sleep for the simulated runtime, capped at the timeout
    sleep: bool,
    state: Mutex<State>,
}

impl ScriptedBackend {
    pub fn new(program: impl Fn(&Invocation) -> Behavior + Send + Sync + 'static) -> Self {
        Self {
            program: Box::new(program),
            failing: None,
            sleep: false,
            state: Mutex::new(State::default()),
        }
    }

    pub fn failing_at(mut self, stage: Stage) -> Self {
        self.failing = Some(stage);
        self
    }

    pub fn sleeping(mut self) -> Self {
        self.sleep = true;
        self
    }

    fn check(&self, stage: Stage) -> Result<()> {
        if self.failing == Some(stage) {
            bail!("Cannot connect to the Docker daemon ({stage:?})");
        }
        Ok(())
    }

    pub fn created(&self) -> Vec<String> {
        self.state.lock().created.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().removed.clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.state.lock().stopped.clone()
    }

    pub fn alive(&self) -> usize {
        self.state.lock().alive.len()
    }

    pub fn max_alive(&self) -> usize {
        self.state.lock().max_alive
    }

    pub fn specs(&self) -> Vec<EnvironmentSpec> {
        self.state.lock().specs.clone()
    }

    pub fn staged(&self) -> Vec<Vec<StagedFile>> {
        self.state.lock().staged.clone()
    }

    /// Every created environment was removed exactly once
    pub fn assert_no_leaks(&self) {
        let state = self.state.lock();
        assert!(state.alive.is_empty(), "leaked: {:?}", state.alive.keys());
        let mut created = state.created.clone();
        let mut removed = state.removed.clone();
        created.sort();
        removed.sort();
        assert_eq!(created, removed);
    }
}

impl ExecutionBackend for ScriptedBackend {
    fn create(&self, spec: &EnvironmentSpec) -> Result<EnvironmentHandle> {
        self.check(Stage::Create)?;
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = format!("env-{}", state.next_id);
        state.alive.insert(
            id.clone(),
            Environment {
                spec: spec.clone(),
                files: HashMap::new(),
                behavior: None,
            },
        );
        state.max_alive = state.max_alive.max(state.alive.len());
        state.created.push(id.clone());
        state.specs.push(spec.clone());
        Ok(EnvironmentHandle::new(id))
    }

    fn inject_files(
        &self,
        env: &EnvironmentHandle,
        _dir: &str,
        files: &[StagedFile],
    ) -> Result<()> {
        self.check(Stage::Inject)?;
        let mut state = self.state.lock();
        state.staged.push(files.to_vec());
        let environment = state
            .alive
            .get_mut(env.id())
            .ok_or_else(|| anyhow!("no such environment {env}"))?;
        for file in files {
            environment
                .files
                .insert(file.name.clone(), file.contents.clone());
        }
        Ok(())
    }

    fn start(&self, env: &EnvironmentHandle) -> Result<()> {
        self.check(Stage::Start)?;
        let invocation = {
            let state = self.state.lock();
            let environment = state
                .alive
                .get(env.id())
                .ok_or_else(|| anyhow!("no such environment {env}"))?;
            Invocation {
                spec: environment.spec.clone(),
                files: environment.files.clone(),
            }
        };

        let behavior = (self.program)(&invocation);
        if let Some(environment) = self.state.lock().alive.get_mut(env.id()) {
            environment.behavior = Some(behavior);
        }
        Ok(())
    }

    fn wait(&self, env: &EnvironmentHandle, timeout: Duration) -> Result<WaitOutcome> {
        self.check(Stage::Wait)?;
        let behavior = self
            .state
            .lock()
            .alive
            .get(env.id())
            .and_then(|e| e.behavior.clone())
            .ok_or_else(|| anyhow!("environment {env} was never started"))?;

        if self.sleep {
            std::thread::sleep(behavior.runtime.min(timeout));
        }
        if behavior.runtime > timeout {
            Ok(WaitOutcome::TimedOut)
        } else {
            Ok(WaitOutcome::Exited(behavior.exit_code))
        }
    }

    fn stop(&self, env: &EnvironmentHandle, _grace: Duration) -> Result<()> {
        self.check(Stage::Stop)?;
        self.state.lock().stopped.push(env.id().to_string());
        Ok(())
    }

    fn logs(&self, env: &EnvironmentHandle) -> Result<CapturedOutput> {
        self.check(Stage::Logs)?;
        let state = self.state.lock();
        let behavior = state
            .alive
            .get(env.id())
            .and_then(|e| e.behavior.clone())
            .unwrap_or_default();
        Ok(CapturedOutput {
            stdout: behavior
                .raw_stdout
                .unwrap_or_else(|| behavior.stdout.into_bytes()),
            stderr: behavior.stderr.into_bytes(),
        })
    }

    fn remove(&self, env: &EnvironmentHandle) -> Result<()> {
        let mut state = self.state.lock();
        state.removed.push(env.id().to_string());
        if state.alive.remove(env.id()).is_none() {
            bail!("environment {env} removed twice");
        }
        drop(state);
        self.check(Stage::Remove)
    }
}

pub fn test_limits() -> Limits {
    Limits {
        timeout: Duration::from_millis(500),
        ..Default::default()
    }
}

pub fn build_judge(backend: Arc<ScriptedBackend>) -> Judge {
    let runner = IsolatedRunner::new(backend).with_stop_grace(Duration::ZERO);
    Judge::new(
        Arc::new(LanguageRegistry::with_builtin()),
        runner,
        test_limits(),
    )
}

/// Reads "n1 n2 ... target" from stdin and binary-searches for the target
pub fn binary_search_program(invocation: &Invocation) -> Behavior {
    let data: Vec<i64> = invocation
        .stdin()
        .split_whitespace()
        .filter_map(|t| t.parse().ok())
        .collect();
    let Some((target, nums)) = data.split_last() else {
        return Behavior::fails("ValueError: not enough values to unpack\n", 1);
    };
    let answer = nums
        .binary_search(target)
        .map_or(-1, |idx| idx as i64);
    Behavior::prints(&format!("{answer}\n"))
}

pub fn binary_search_cases() -> Vec<TestCase> {
    vec![
        TestCase::new("1 3 5 6 9\n5", "2"),
        TestCase::new("1 3 5 6 9\n4", "-1"),
        TestCase::new("1\n1", "0"),
    ]
}
