//! Job queue and supervised worker pool for the generation pipeline.

pub mod job;
pub mod worker_pool;

pub use job::{Job, RequestKind};
pub use worker_pool::{JobHandler, WorkerPool};
