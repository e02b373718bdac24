pub mod compare;
pub mod config;
pub mod judge;
pub mod languages;
pub mod queue;
pub mod routes;
pub mod sandbox;
pub mod web_server;
pub mod worker;

pub use compare::{CompareMode, Comparison, DEFAULT_FLOAT_TOLERANCE, compare};
pub use judge::{BatchVerdict, CaseState, CaseVerdict, Judge, TestCase};
pub use sandbox::{ExecutionResult, ExecutionStatus, IsolatedRunner};
