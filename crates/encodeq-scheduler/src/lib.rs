//! Job dispatch for the encodeq queue.
//!
//! Runs worker loops that claim jobs from the store, hand them to an executor
//! and record the outcome. Claiming relies on the store's atomic dequeue, so
//! any number of workers can share one store.

pub mod dispatcher;
pub mod worker;

pub use dispatcher::{DispatchHandle, DispatchSettings, Dispatcher};
pub use worker::Worker;
