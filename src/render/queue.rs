use std::sync::Arc;

use tokio::sync::{
    Mutex,
    mpsc::{self, Receiver, Sender, error::TrySendError},
};
use uuid::Uuid;

use crate::{
    error::{StudioError, StudioResult},
    metrics::MetricsRegistry,
    models::RenderRequest,
};

#[derive(Debug, Clone)]
pub struct RenderJob {
    pub id: Uuid,
    pub request: RenderRequest,
}

/// Bounded hand-off between the API and the render workers. A full queue
/// rejects instead of making the caller wait.
#[derive(Clone)]
pub struct Scheduler {
    sender: Sender<RenderJob>,
    receiver: Arc<Mutex<Receiver<RenderJob>>>,
    metrics: Arc<MetricsRegistry>,
}

impl Scheduler {
    pub fn new(capacity: usize, metrics: Arc<MetricsRegistry>) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            metrics,
        }
    }

    pub fn submit(&self, job: RenderJob) -> StudioResult<()> {
        match self.sender.try_send(job) {
            Ok(()) => {
                self.metrics.render_submitted();
                Ok(())
            }
            Err(TrySendError::Full(job)) => {
                tracing::warn!(job_id = %job.id, "render queue full");
                Err(StudioError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => {
                Err(StudioError::Internal("render queue closed".to_string()))
            }
        }
    }

    pub fn receiver(&self) -> Arc<Mutex<Receiver<RenderJob>>> {
        self.receiver.clone()
    }
}
