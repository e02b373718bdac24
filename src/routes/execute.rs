use actix_web::{HttpResponse, Responder, post, web};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::{ErrorResponse, ErrorResponseWithMessage};
use crate::compare::{CompareMode, DEFAULT_FLOAT_TOLERANCE};
use crate::config::{ProblemConfig, find_problem};
use crate::judge::{BatchVerdict, CaseVerdict, Judge, TestCase};
use crate::queue::JobQueue;
use crate::sandbox::{ExecutionResult, ExecutionStatus};

#[derive(Deserialize, Debug, Clone)]
pub struct ExecuteRequest {
    pub language: String,
    pub code: String,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub problem_id: Option<String>,
    #[serde(default, rename = "match")]
    pub match_mode: Option<CompareMode>,
    #[serde(default)]
    pub float_tolerance: Option<f64>,
}

#[derive(Serialize, Debug)]
pub struct ExecuteResponse {
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "executionTime")]
    pub execution_time: String,
    pub memory: String,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cases: Option<Vec<CaseVerdict>>,
}

impl From<ExecutionResult> for ExecuteResponse {
    fn from(result: ExecutionResult) -> Self {
        Self {
            execution_time: result.execution_time(),
            stdout: result.stdout,
            stderr: result.stderr,
            memory: String::new(),
            status: result.status,
            passed: None,
            cases: None,
        }
    }
}

impl From<BatchVerdict> for ExecuteResponse {
    fn from(verdict: BatchVerdict) -> Self {
        Self {
            passed: Some(verdict.passed),
            cases: Some(verdict.cases),
            ..Self::from(verdict.last_run)
        }
    }
}

/// Work handed to a sandbox worker
#[derive(Debug)]
pub enum ExecJob {
    Single {
        language: String,
        code: String,
        stdin: String,
    },
    Batch {
        language: String,
        code: String,
        cases: Vec<TestCase>,
        mode: CompareMode,
        tolerance: f64,
    },
}

impl ExecJob {
    pub fn language(&self) -> &str {
        match self {
            Self::Single { language, .. } | Self::Batch { language, .. } => language,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Single { .. } => "single-run",
            Self::Batch { .. } => "batch",
        }
    }

    /// Runs the job synchronously; must be called off the async executor
    pub fn run(self, judge: &Judge) -> ExecuteResponse {
        match self {
            Self::Single {
                language,
                code,
                stdin,
            } => judge.execute(&language, &code, &stdin).into(),
            Self::Batch {
                language,
                code,
                cases,
                mode,
                tolerance,
            } => judge
                .run_batch(&language, &code, &cases, mode, tolerance)
                .into(),
        }
    }
}

pub struct ExecMessage {
    pub job: ExecJob,
    pub responder: oneshot::Sender<ExecuteResponse>,
}

#[post("/api/v1/execute")]
pub async fn post_execute_handler(
    job_queue: web::Data<JobQueue>,
    problems: web::Data<Vec<ProblemConfig>>,
    body: web::Json<ExecuteRequest>,
) -> impl Responder {
    let request = body.into_inner();

    let tolerance = request.float_tolerance.unwrap_or(DEFAULT_FLOAT_TOLERANCE);
    if !tolerance.is_finite() || tolerance < 0.0 {
        return HttpResponse::BadRequest().json(ErrorResponseWithMessage {
            reason: "ERR_INVALID_ARGUMENT",
            code: 1,
            message: format!("float_tolerance must be a non-negative number, got {tolerance}"),
        });
    }

    let job = match &request.problem_id {
        Some(problem_id) => {
            let Some(problem) = find_problem(&problems, problem_id) else {
                return HttpResponse::NotFound().json(ErrorResponseWithMessage {
                    reason: "ERR_NOT_FOUND",
                    code: 3,
                    message: format!("Problem {problem_id} not found."),
                });
            };
            ExecJob::Batch {
                language: request.language,
                code: request.code,
                cases: problem.test_cases.clone(),
                mode: request.match_mode.unwrap_or_default(),
                tolerance,
            }
        }
        None => ExecJob::Single {
            language: request.language,
            code: request.code,
            stdin: request.stdin.unwrap_or_default(),
        },
    };

    let (tx, rx) = oneshot::channel::<ExecuteResponse>();
    job_queue
        .push(ExecMessage {
            job,
            responder: tx,
        })
        .await;
    log::debug!("Sent execution job to queue, {} pending", job_queue.len().await);

    match rx.await {
        Ok(response) => {
            log::info!("Execution finished with status {:?}", response.status);
            HttpResponse::Ok().json(response)
        }
        Err(e) => {
            log::error!("Failed to receive execution response: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_INTERNAL",
                code: 6,
            })
        }
    }
}
