//! Fixed-size worker pool

use super::lock::IpLocks;
use super::queue::JobReceiver;
use super::Job;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Executes one job while its IP lock is held
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job);
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        count: usize,
        rx: JobReceiver,
        handler: Arc<dyn JobHandler>,
        locks: IpLocks,
        shutdown: &broadcast::Receiver<()>,
    ) -> Self {
        let handles = (0..count)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    rx.clone(),
                    handler.clone(),
                    locks.clone(),
                    shutdown.resubscribe(),
                ))
            })
            .collect();
        info!(workers = count, "Started SNMP worker pool");
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to exit
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "SNMP worker panicked");
            }
        }
    }
}

async fn worker_loop(
    id: usize,
    rx: JobReceiver,
    handler: Arc<dyn JobHandler>,
    locks: IpLocks,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let job = tokio::select! {
            _ = shutdown.recv() => break,
            job = async { rx.lock().await.recv().await } => match job {
                Some(job) => job,
                None => break,
            },
        };

        let ip = job.ip();
        let Some(_guard) = locks.acquire(ip, &mut shutdown).await else {
            break;
        };
        debug!(worker = id, device_ip = %ip, kind = job.kind(), "Running job");
        handler.handle(job).await;
    }
    debug!(worker = id, "SNMP worker stopped");
}
