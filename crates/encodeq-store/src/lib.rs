//! Durable job store for the encodeq queue.
//!
//! Provides the [`JobStore`] trait and a filesystem implementation that keeps
//! one record per job under the queue directory.

pub mod error;
mod fs;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use store::*;
