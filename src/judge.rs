use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::compare::{CompareMode, compare};
use crate::config::Limits;
use crate::languages::{LanguageProfile, LanguageRegistry, UnsupportedLanguage};
use crate::sandbox::{ExecutionResult, ExecutionStatus, IsolatedRunner};

/// One input/expected-output pair of a problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    #[serde(rename = "expectedOutput")]
    pub expected_output: String,
}

impl TestCase {
    pub fn new(input: &str, expected_output: &str) -> Self {
        Self {
            input: input.to_string(),
            expected_output: expected_output.to_string(),
        }
    }
}

/// Per-case state machine: `Pending -> Running -> terminal`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseState {
    Pending,
    Running,
    Passed,
    Failed,
    TimedOut,
    InfraError,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseVerdict {
    pub expected: String,
    pub actual: String,
    pub passed: bool,
    pub state: CaseState,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub hint: String,
}

impl CaseVerdict {
    /// A case passes only on a clean run whose stdout matches
    pub fn evaluate(
        case: &TestCase,
        result: &ExecutionResult,
        mode: CompareMode,
        tolerance: f64,
    ) -> Self {
        let (state, hint) = match result.status {
            ExecutionStatus::Timeout => (CaseState::TimedOut, "time limit exceeded".to_string()),
            ExecutionStatus::Error => (CaseState::InfraError, result.stderr.clone()),
            ExecutionStatus::Success if !result.is_clean() => {
                (CaseState::Failed, "non-empty stderr".to_string())
            }
            ExecutionStatus::Success => {
                let comparison = compare(&case.expected_output, &result.stdout, mode, tolerance);
                let state = if comparison.passed {
                    CaseState::Passed
                } else {
                    CaseState::Failed
                };
                (state, comparison.hint)
            }
        };

        Self {
            expected: case.expected_output.clone(),
            actual: result.stdout.clone(),
            passed: state == CaseState::Passed,
            state,
            hint,
        }
    }
}

/// Aggregated outcome of running every test case
#[derive(Debug, Clone, PartialEq)]
pub struct BatchVerdict {
    /// Verdicts in test case order
    pub cases: Vec<CaseVerdict>,
    pub passed: bool,
    /// Raw result of the last case, kept for diagnostics
    pub last_run: ExecutionResult,
}

/// Runs submissions against the isolated runner with process-wide limits
///
/// Every call blocks until the sandbox is done. From async code, call it
/// through `spawn_blocking` as the service workers do.
pub struct Judge {
    registry: Arc<LanguageRegistry>,
    runner: IsolatedRunner,
    limits: Limits,
    parallelism: usize,
}

type LanguageLookup<'a> = Result<&'a LanguageProfile, &'a UnsupportedLanguage>;

impl Judge {
    pub fn new(registry: Arc<LanguageRegistry>, runner: IsolatedRunner, limits: Limits) -> Self {
        Self {
            registry,
            runner,
            limits,
            parallelism: 1,
        }
    }

    /// Maximum number of environments a single batch may keep alive at once
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Single-run mode: executes once with the given stdin
    pub fn execute(&self, language: &str, source: &str, stdin: &str) -> ExecutionResult {
        match self.registry.resolve(language) {
            Ok(profile) => self.runner.run(&profile, source, stdin, &self.limits),
            Err(e) => {
                log::warn!("Rejected execution: {e}");
                ExecutionResult::error(e.to_string())
            }
        }
    }

    /// Runs every test case once and aggregates the verdicts
    ///
    /// Every case is executed even after a failure. An unsupported language
    /// yields an error verdict per case instead of aborting.
    pub fn run_batch(
        &self,
        language: &str,
        source: &str,
        cases: &[TestCase],
        mode: CompareMode,
        tolerance: f64,
    ) -> BatchVerdict {
        let resolved = self.registry.resolve(language);
        if let Err(e) = &resolved {
            log::warn!("Judging {} cases without a runtime: {e}", cases.len());
        }
        let profile = resolved.as_deref();

        let outcomes = if self.parallelism > 1 && cases.len() > 1 {
            self.judge_parallel(profile, source, cases, mode, tolerance)
        } else {
            cases
                .iter()
                .enumerate()
                .map(|(idx, case)| self.judge_case(profile, idx, source, case, mode, tolerance))
                .collect()
        };

        let mut verdict = BatchVerdict {
            cases: Vec::with_capacity(outcomes.len()),
            passed: true,
            last_run: ExecutionResult::default(),
        };
        for (case_verdict, result) in outcomes {
            verdict.passed &= case_verdict.passed;
            verdict.cases.push(case_verdict);
            verdict.last_run = result;
        }

        log::info!(
            "Judged {} cases in {language}: {}",
            verdict.cases.len(),
            if verdict.passed { "passed" } else { "failed" }
        );
        verdict
    }

    fn judge_case(
        &self,
        profile: LanguageLookup<'_>,
        idx: usize,
        source: &str,
        case: &TestCase,
        mode: CompareMode,
        tolerance: f64,
    ) -> (CaseVerdict, ExecutionResult) {
        let case_no = idx + 1;
        log::debug!("Case {case_no}: {:?} -> {:?}", CaseState::Pending, CaseState::Running);

        let result = match profile {
            Ok(profile) => self.runner.run(profile, source, &case.input, &self.limits),
            Err(e) => ExecutionResult::error(e.to_string()),
        };
        let verdict = CaseVerdict::evaluate(case, &result, mode, tolerance);

        log::debug!(
            "Case {case_no}: {:?} -> {:?} in {}",
            CaseState::Running,
            verdict.state,
            result.execution_time()
        );
        (verdict, result)
    }

    /// Judges cases on a bounded set of scoped threads, keeping input order
    fn judge_parallel(
        &self,
        profile: LanguageLookup<'_>,
        source: &str,
        cases: &[TestCase],
        mode: CompareMode,
        tolerance: f64,
    ) -> Vec<(CaseVerdict, ExecutionResult)> {
        let slots = Mutex::new(vec![None; cases.len()]);
        let next = AtomicUsize::new(0);
        let workers = self.parallelism.min(cases.len());

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        let idx = next.fetch_add(1, Ordering::Relaxed);
                        let Some(case) = cases.get(idx) else { break };
                        let outcome = self.judge_case(profile, idx, source, case, mode, tolerance);
                        slots.lock()[idx] = Some(outcome);
                    }
                });
            }
        });

        slots.into_inner().into_iter().flatten().collect()
    }
}
