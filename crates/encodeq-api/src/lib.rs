//! HTTP ingress for the encodeq job queue.
//!
//! Validates submissions, hands them to the job store and exposes job status.

pub mod error;
pub mod routes;
pub mod state;

pub use state::AppState;
