//! Job scheduling
//!
//! Timers and the discovery task push [`Job`]s onto one bounded queue; a
//! fixed pool of workers drains it. A job only runs while it holds the lock
//! for its IP.

pub mod lock;
pub mod queue;
pub mod worker;

#[cfg(test)]
mod tests;

pub use lock::{IpGuard, IpLocks};
pub use queue::{JobQueue, JobReceiver, QueueError};
pub use worker::{JobHandler, WorkerPool};

use crate::device::SharedDevice;
use std::fmt;
use std::net::IpAddr;

pub enum Job {
    CollectObject { ip: IpAddr, device: SharedDevice },
    CollectMetric { ip: IpAddr, device: SharedDevice },
    Discovery { ip: IpAddr, subnet: String },
}

impl Job {
    pub fn ip(&self) -> IpAddr {
        match self {
            Job::CollectObject { ip, .. }
            | Job::CollectMetric { ip, .. }
            | Job::Discovery { ip, .. } => *ip,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Job::CollectObject { .. } => "object",
            Job::CollectMetric { .. } => "metric",
            Job::Discovery { .. } => "discovery",
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("kind", &self.kind())
            .field("ip", &self.ip())
            .finish()
    }
}
