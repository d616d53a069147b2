//! SNMP input
//!
//! Owns every piece of subsystem state: configuration, static devices, the
//! discovery registry, profiles, the IP locks and the trap server. `run`
//! drives the timers until shutdown.

mod collector;

#[cfg(test)]
mod tests;

use crate::config::SnmpConfig;
use crate::device::{DeviceConfig, SharedDevice};
use crate::discovery::{DeviceRegistry, Subnet};
use crate::feeder::{Feeder, Tagger};
use crate::health::{components, HealthRegistry};
use crate::observability::{SnmpMetrics, StructuredLogger};
use crate::profile::ProfileStore;
use crate::scheduler::{IpLocks, Job, JobQueue, QueueError, WorkerPool};
use crate::session::SessionFactory;
use crate::traps::TrapServer;
use anyhow::{anyhow, Result};
use collector::Collector;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub struct SnmpInputBuilder {
    config: SnmpConfig,
    feeder: Option<Arc<dyn Feeder>>,
    tagger: Option<Arc<dyn Tagger>>,
    session_factory: Option<Arc<dyn SessionFactory>>,
    profiles: Option<ProfileStore>,
    node_name: String,
    host_name: Option<String>,
    health: Option<HealthRegistry>,
}

impl SnmpInputBuilder {
    pub fn new(config: SnmpConfig) -> Self {
        Self {
            config,
            feeder: None,
            tagger: None,
            session_factory: None,
            profiles: None,
            node_name: "snmp".to_string(),
            host_name: None,
            health: None,
        }
    }

    pub fn feeder(mut self, feeder: Arc<dyn Feeder>) -> Self {
        self.feeder = Some(feeder);
        self
    }

    pub fn tagger(mut self, tagger: Arc<dyn Tagger>) -> Self {
        self.tagger = Some(tagger);
        self
    }

    pub fn session_factory(mut self, factory: Arc<dyn SessionFactory>) -> Self {
        self.session_factory = Some(factory);
        self
    }

    /// Use an already populated profile store instead of `profiles_dir`
    pub fn profiles(mut self, profiles: ProfileStore) -> Self {
        self.profiles = Some(profiles);
        self
    }

    pub fn node_name(mut self, name: impl Into<String>) -> Self {
        self.node_name = name.into();
        self
    }

    /// Value of the `agent_host` tag, defaults to the node name
    pub fn host_name(mut self, name: impl Into<String>) -> Self {
        self.host_name = Some(name.into());
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<SnmpInput> {
        let feeder = self.feeder.ok_or_else(|| anyhow!("feeder is required"))?;
        let tagger = self.tagger.ok_or_else(|| anyhow!("tagger is required"))?;
        let session_factory = self
            .session_factory
            .ok_or_else(|| anyhow!("session_factory is required"))?;

        let profiles = self
            .profiles
            .unwrap_or_else(|| ProfileStore::new(self.config.profiles_dir.clone()));
        let locks = IpLocks::new(self.config.ip_lock_poll());
        Ok(SnmpInput {
            host_name: self.host_name.unwrap_or_else(|| self.node_name.clone()),
            logger: StructuredLogger::new(self.node_name),
            config: self.config,
            feeder,
            tagger,
            session_factory,
            profiles,
            registry: Arc::new(DeviceRegistry::new()),
            locks,
            metrics: SnmpMetrics::new(),
            health: self.health.unwrap_or_default(),
        })
    }
}

pub struct SnmpInput {
    config: SnmpConfig,
    feeder: Arc<dyn Feeder>,
    tagger: Arc<dyn Tagger>,
    session_factory: Arc<dyn SessionFactory>,
    profiles: ProfileStore,
    registry: Arc<DeviceRegistry>,
    locks: IpLocks,
    metrics: SnmpMetrics,
    logger: StructuredLogger,
    health: HealthRegistry,
    host_name: String,
}

impl SnmpInput {
    pub fn builder(config: SnmpConfig) -> SnmpInputBuilder {
        SnmpInputBuilder::new(config)
    }

    /// Devices promoted by discovery
    pub fn registry(&self) -> Arc<DeviceRegistry> {
        self.registry.clone()
    }

    pub fn health(&self) -> HealthRegistry {
        self.health.clone()
    }

    /// Run until `shutdown` fires
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        self.config.validate()?;
        let config = self.config.clone();
        let subnets = Arc::new(config.subnets()?);
        let static_ips = config.static_ips()?;

        self.health.register(components::SCHEDULER).await;
        let profiles = match self.profiles.load().await {
            Ok(profiles) => {
                self.health.set_healthy(components::PROFILES).await;
                profiles
            }
            Err(e) => {
                self.health
                    .set_unhealthy(components::PROFILES, e.to_string())
                    .await;
                return Err(e.into());
            }
        };

        let collector = Arc::new(Collector::new(&self, DeviceConfig::from_config(&config), profiles)?);

        let mut static_devices: Vec<(IpAddr, SharedDevice)> = Vec::with_capacity(static_ips.len());
        for ip in &static_ips {
            let mut device = collector.new_device(*ip, "");
            device.initialize()?;
            static_devices.push((*ip, Arc::new(Mutex::new(device))));
        }
        collector.set_static_count(static_devices.len());
        collector.update_device_gauge();
        self.logger
            .log_startup(env!("CARGO_PKG_VERSION"), static_devices.len(), subnets.len());

        let mut trap_server = None;
        if config.traps.enable {
            let mut server = TrapServer::new(
                config.clone(),
                self.feeder.clone(),
                self.tagger.clone(),
                self.metrics.clone(),
                self.logger.clone(),
            );
            match server.start().await {
                Ok(()) => {
                    self.health.set_healthy(components::TRAPS).await;
                    trap_server = Some(server);
                }
                Err(e) => {
                    error!(error = %e, "Failed to start trap server");
                    self.health
                        .set_unhealthy(components::TRAPS, e.to_string())
                        .await;
                }
            }
        }

        let (queue, rx) = JobQueue::channel(config.job_queue_size);
        let pool = WorkerPool::spawn(
            config.worker_count(),
            rx,
            collector.clone(),
            self.locks.clone(),
            &shutdown,
        );

        let discovery = DiscoveryTask {
            subnets: subnets.clone(),
            skip: Arc::new(
                config
                    .ignored_ips()
                    .into_iter()
                    .chain(static_ips.iter().copied())
                    .collect(),
            ),
            queue: queue.clone(),
            metrics: self.metrics.clone(),
        };
        if !subnets.is_empty() {
            self.health.register(components::DISCOVERY).await;
        }
        self.health.set_ready(true).await;

        let mut dispatch_shutdown = shutdown.resubscribe();
        let mut discovery_handle = discovery.spawn(None, &shutdown);
        let mut running = self
            .dispatch_collect(&queue, &static_devices, true, &mut dispatch_shutdown)
            .await
            && self
                .dispatch_collect(&queue, &static_devices, false, &mut dispatch_shutdown)
                .await;

        let mut discovery_timer = timer(config.discovery_interval_secs);
        let mut object_timer = timer(config.object_interval_secs);
        let mut metric_timer = timer(config.metric_interval_secs);

        while running {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = discovery_timer.tick() => {
                    discovery_handle = discovery.spawn(discovery_handle, &shutdown);
                }
                _ = object_timer.tick() => {
                    running = self
                        .dispatch_collect(&queue, &static_devices, true, &mut dispatch_shutdown)
                        .await;
                }
                _ = metric_timer.tick() => {
                    running = self
                        .dispatch_collect(&queue, &static_devices, false, &mut dispatch_shutdown)
                        .await;
                }
            }
        }

        self.logger.log_shutdown("shutdown signal received");
        self.health.set_ready(false).await;
        if let Some(mut server) = trap_server {
            server.stop().await;
        }
        if let Some(handle) = discovery_handle {
            handle.abort();
        }
        drop(queue);
        pool.join().await;

        for (_, device) in &static_devices {
            device.lock().await.close().await;
        }
        for device in self.registry.drain() {
            device.lock().await.close().await;
        }
        collector.set_static_count(0);
        collector.update_device_gauge();
        info!("SNMP input stopped");
        Ok(())
    }

    /// Queue one collection job per known device. False once shutting down.
    async fn dispatch_collect(
        &self,
        queue: &JobQueue,
        static_devices: &[(IpAddr, SharedDevice)],
        object: bool,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> bool {
        let devices = static_devices
            .iter()
            .cloned()
            .chain(self.registry.list());
        for (ip, device) in devices {
            let job = if object {
                Job::CollectObject { ip, device }
            } else {
                Job::CollectMetric { ip, device }
            };
            match queue.send(job, shutdown).await {
                Ok(()) => {}
                Err(QueueError::Shutdown) => return false,
                Err(QueueError::Closed) => {
                    self.metrics.inc_job_queue_send_failures();
                    warn!(device_ip = %ip, "Job queue closed");
                    return false;
                }
            }
        }
        true
    }
}

fn timer(secs: u64) -> tokio::time::Interval {
    let period = Duration::from_secs(secs);
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

/// Walks every subnet and queues a discovery job per address
#[derive(Clone)]
struct DiscoveryTask {
    subnets: Arc<Vec<Subnet>>,
    skip: Arc<HashSet<IpAddr>>,
    queue: JobQueue,
    metrics: SnmpMetrics,
}

impl DiscoveryTask {
    /// Start a new walk unless the previous one is still running
    fn spawn(
        &self,
        previous: Option<JoinHandle<()>>,
        shutdown: &broadcast::Receiver<()>,
    ) -> Option<JoinHandle<()>> {
        if self.subnets.is_empty() {
            return None;
        }
        if let Some(handle) = previous {
            if !handle.is_finished() {
                debug!("Previous discovery still running, skipping cycle");
                return Some(handle);
            }
        }
        let task = self.clone();
        let shutdown = shutdown.resubscribe();
        Some(tokio::spawn(async move { task.walk(shutdown).await }))
    }

    async fn walk(self, mut shutdown: broadcast::Receiver<()>) {
        for subnet in self.subnets.iter() {
            debug!(subnet = %subnet, hosts = subnet.size(), "Discovering subnet");
            for ip in subnet.hosts().filter(|ip| !self.skip.contains(ip)) {
                let job = Job::Discovery {
                    ip,
                    subnet: subnet.cidr().to_string(),
                };
                match self.queue.send(job, &mut shutdown).await {
                    Ok(()) => {}
                    Err(QueueError::Shutdown) => return,
                    Err(QueueError::Closed) => {
                        self.metrics.inc_job_queue_send_failures();
                        return;
                    }
                }
            }
        }
    }
}
