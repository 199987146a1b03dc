//! Execution backends for the encodeq job queue.
//!
//! Provides executor implementations for running the processing step:
//! - Script (interpreter + script, one process per job)

pub mod script;

pub use encodeq_core::executor::{ExecutionOutcome, ExecutionSpec, Executor};
pub use script::ScriptExecutor;
