//! Bounded job queue shared by the worker pool

use super::Job;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};

/// Receiving half, shared by every worker
pub type JobReceiver = Arc<Mutex<mpsc::Receiver<Job>>>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("shutdown while waiting for queue capacity")]
    Shutdown,
    #[error("job queue closed")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
}

impl JobQueue {
    pub fn channel(size: usize) -> (Self, JobReceiver) {
        let (tx, rx) = mpsc::channel(size);
        (Self { tx }, Arc::new(Mutex::new(rx)))
    }

    /// Blocks while the queue is full, unless shutdown fires
    pub async fn send(
        &self,
        job: Job,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), QueueError> {
        tokio::select! {
            _ = shutdown.recv() => Err(QueueError::Shutdown),
            sent = self.tx.send(job) => sent.map_err(|_| QueueError::Closed),
        }
    }
}
