//! Per-IP mutual exclusion

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;

/// Set of IPs with a job in flight.
///
/// Only one job may talk to a device at a time. Different IPs never block
/// each other.
#[derive(Debug, Clone)]
pub struct IpLocks {
    held: Arc<Mutex<HashSet<IpAddr>>>,
    poll: Duration,
}

impl IpLocks {
    pub fn new(poll: Duration) -> Self {
        Self {
            held: Arc::new(Mutex::new(HashSet::new())),
            poll,
        }
    }

    fn set(&self) -> MutexGuard<'_, HashSet<IpAddr>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn try_acquire(&self, ip: IpAddr) -> Option<IpGuard> {
        if self.set().insert(ip) {
            Some(IpGuard {
                ip,
                held: self.held.clone(),
            })
        } else {
            None
        }
    }

    /// Wait until `ip` is free. Returns `None` if shutdown fires first.
    pub async fn acquire(
        &self,
        ip: IpAddr,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Option<IpGuard> {
        loop {
            if let Some(guard) = self.try_acquire(ip) {
                return Some(guard);
            }
            tokio::select! {
                _ = shutdown.recv() => return None,
                _ = tokio::time::sleep(self.poll) => {}
            }
        }
    }

    pub fn is_locked(&self, ip: &IpAddr) -> bool {
        self.set().contains(ip)
    }
}

/// Releases the IP on drop
#[derive(Debug)]
pub struct IpGuard {
    ip: IpAddr,
    held: Arc<Mutex<HashSet<IpAddr>>>,
}

impl IpGuard {
    pub fn ip(&self) -> IpAddr {
        self.ip
    }
}

impl Drop for IpGuard {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        held.remove(&self.ip);
    }
}
