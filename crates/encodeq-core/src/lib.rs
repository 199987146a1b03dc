//! Core domain types and traits for the encodeq job queue.
//!
//! This crate contains:
//! - Job identifiers and the job record with its lifecycle
//! - Submission validation
//! - Storage name generation
//! - The executor trait implemented by processing backends

pub mod error;
pub mod executor;
pub mod id;
pub mod job;
pub mod naming;

pub use error::{Error, Result};
pub use id::JobId;
pub use job::{Job, JobStatus, NewJob, Submission};
pub use naming::NameGenerator;
