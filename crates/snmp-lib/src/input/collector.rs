//! Job execution: device polls, reporting and discovery probes

use super::SnmpInput;
use crate::aggregate::rewrite::KeyRewriter;
use crate::aggregate::Aggregator;
use crate::device::{Device, DeviceConfig, SharedDevice};
use crate::discovery::{probe, DeviceRegistry};
use crate::error::ConfigError;
use crate::feeder::{merge_tags, Category, FeedOptions, Feeder, Tagger};
use crate::fetch::ResultValueStore;
use crate::models::{Point, TagField, INPUT_NAME, SNMP_METRIC_NAME, SNMP_OBJECT_NAME};
use crate::observability::{SnmpMetrics, StructuredLogger};
use crate::profile::ProfileDefinitionMap;
use crate::scheduler::{Job, JobHandler};
use crate::session::SessionFactory;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub(crate) struct Collector {
    device_config: DeviceConfig,
    profiles: Arc<ProfileDefinitionMap>,
    registry: Arc<DeviceRegistry>,
    session_factory: Arc<dyn SessionFactory>,
    feeder: Arc<dyn Feeder>,
    tagger: Arc<dyn Tagger>,
    aggregator: Aggregator,
    rewriter: KeyRewriter,
    user_tags: BTreeMap<String, String>,
    election: bool,
    host_name: String,
    metrics: SnmpMetrics,
    logger: StructuredLogger,
    static_count: AtomicUsize,
}

impl Collector {
    pub(crate) fn new(
        input: &SnmpInput,
        device_config: DeviceConfig,
        profiles: Arc<ProfileDefinitionMap>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            device_config,
            profiles,
            registry: input.registry.clone(),
            session_factory: input.session_factory.clone(),
            feeder: input.feeder.clone(),
            tagger: input.tagger.clone(),
            aggregator: Aggregator::from_config(&input.config),
            rewriter: KeyRewriter::from_config(&input.config)?,
            user_tags: input.config.tags.clone(),
            election: input.config.election,
            host_name: input.host_name.clone(),
            metrics: input.metrics.clone(),
            logger: input.logger.clone(),
            static_count: AtomicUsize::new(0),
        })
    }

    pub(crate) fn new_device(&self, ip: IpAddr, subnet: &str) -> Device {
        Device::new(
            ip,
            subnet,
            self.session_factory.create(ip),
            &self.device_config,
            self.profiles.clone(),
        )
        .with_logger(self.logger.clone())
    }

    pub(crate) fn set_static_count(&self, count: usize) {
        self.static_count.store(count, Ordering::Relaxed);
    }

    pub(crate) fn update_device_gauge(&self) {
        let total = self.static_count.load(Ordering::Relaxed) + self.registry.len();
        self.metrics.set_devices_monitored(total as i64);
    }

    /// Tags every sample of a poll carries on top of the device's own
    fn job_tags(&self, ip: IpAddr, subnet: &str) -> Vec<String> {
        let mut tags: Vec<String> = self
            .user_tags
            .iter()
            .map(|(k, v)| format!("{}:{}", k, v))
            .collect();
        tags.push(format!("ip:{}", ip));
        tags.push(format!("agent_host:{}", self.host_name));
        tags.push(format!("agent_version:{}", env!("CARGO_PKG_VERSION")));
        if !subnet.is_empty() {
            tags.push(format!("autodiscovery_subnet:{}", subnet));
        }
        tags
    }

    async fn collect(&self, ip: IpAddr, device: &SharedDevice, category: Category) {
        let started = Instant::now();
        let kind = match category {
            Category::Object => "object",
            Category::Metric => "metric",
        };

        let mut device = device.lock().await;
        let result = device.collect(category == Category::Object).await;

        let mut closed = false;
        if let Some(error) = &result.error {
            closed = error.is_closed();
            if closed && device.is_dynamic() && !self.registry.contains(&ip) {
                debug!(device_ip = %ip, "Device was removed by discovery, dropping result");
                return;
            }
            self.metrics.inc_collection_errors(kind);
            warn!(device_ip = %ip, kind = kind, error = %error, "SNMP collection failed");
            self.feeder
                .feed_last_error(INPUT_NAME, &format!("{}: {}", ip, error));
        }
        if !result.reachable {
            self.metrics.inc_unreachable_polls();
        }

        let values = match (&result.values, category) {
            (Some(values), _) => values.clone(),
            (None, Category::Object) if !closed => ResultValueStore::default(),
            (None, _) => return,
        };

        let mut tags = result.tags.clone();
        tags.extend(self.job_tags(ip, device.subnet()));
        let mut samples = device.report(&values, &tags);
        self.rewriter.rename_samples(&mut samples);
        let rows = match category {
            Category::Object => {
                let meta = device.metadata(&values, result.status(), &tags);
                vec![self.aggregator.object_row(samples, &tags, &meta)]
            }
            Category::Metric => self.aggregator.metric_rows(samples),
        };
        drop(device);

        let cost = started.elapsed();
        self.feed(category, rows, cost).await;
        self.metrics
            .observe_collection_latency(kind, cost.as_secs_f64());
    }

    async fn feed(&self, category: Category, rows: Vec<TagField>, cost: Duration) {
        if rows.is_empty() {
            return;
        }
        let measurement = match category {
            Category::Object => SNMP_OBJECT_NAME,
            Category::Metric => SNMP_METRIC_NAME,
        };
        let defaults = if self.election {
            self.tagger.election_tags()
        } else {
            self.tagger.host_tags()
        };
        let now = Utc::now();
        let points = rows
            .into_iter()
            .map(|row| {
                let row = self.rewriter.rewrite_tags(row);
                let row = TagField {
                    tags: merge_tags(&defaults, &row.tags),
                    fields: row.fields,
                };
                Point::new(measurement, row, now)
            })
            .collect();
        let options = FeedOptions {
            collect_cost: cost,
            election: self.election,
            source: measurement.to_string(),
        };
        if let Err(e) = self.feeder.feed(INPUT_NAME, category, points, options).await {
            warn!(category = ?category, error = %e, "Failed to feed SNMP points");
            self.feeder.feed_last_error(INPUT_NAME, &e.to_string());
        }
    }

    /// Promote a device that answers, demote one that stopped answering
    async fn discover(&self, ip: IpAddr, subnet: &str) {
        self.metrics.inc_discovery_probes();
        if probe(self.session_factory.as_ref(), ip).await {
            if self.registry.contains(&ip) {
                return;
            }
            let mut device = self.new_device(ip, subnet);
            if let Err(e) = device.initialize() {
                warn!(device_ip = %ip, error = %e, "Failed to initialize discovered device");
                return;
            }
            if self.registry.register(ip, Arc::new(Mutex::new(device))) {
                self.logger.log_device_promoted(&ip.to_string(), subnet);
                self.metrics.inc_discovery_promotions();
                self.update_device_gauge();
            }
        } else if let Some(device) = self.registry.unregister(&ip) {
            device.lock().await.close().await;
            self.logger.log_device_demoted(&ip.to_string(), subnet);
            self.metrics.inc_discovery_demotions();
            self.update_device_gauge();
        }
    }
}

#[async_trait]
impl JobHandler for Collector {
    async fn handle(&self, job: Job) {
        match job {
            Job::CollectObject { ip, device } => self.collect(ip, &device, Category::Object).await,
            Job::CollectMetric { ip, device } => self.collect(ip, &device, Category::Metric).await,
            Job::Discovery { ip, subnet } => self.discover(ip, &subnet).await,
        }
    }
}
