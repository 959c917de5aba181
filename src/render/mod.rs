//! Asynchronous render jobs: the API enqueues, workers lease a sandbox,
//! push the job's scenes into it, run the render and collect the video.

pub mod queue;
pub mod store;
pub mod worker;

pub use queue::{RenderJob, Scheduler};
pub use store::RenderStore;
pub use worker::{WorkerContext, spawn_worker_pool};
