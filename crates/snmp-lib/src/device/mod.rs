//! Per-device polling state
//!
//! A [`Device`] owns its session, its own copy of the resolved profile and the
//! OIDs derived from it. It is only mutated by its own collection job.

pub mod metadata;
pub mod report;


pub use metadata::DeviceInfo;

use crate::config::SnmpConfig;
use crate::error::{ConfigError, Error, FetchError, SessionError};
use crate::fetch::{fetch_values, BulkCapability, FetchConfig, ResultValue, ResultValueStore};
use crate::models::{DeviceStatus, MetricDatas};
use crate::observability::StructuredLogger;
use crate::oid::well_known;
use crate::profile::definition::{MetadataConfig, MetricTagConfig, MetricsConfig, SymbolConfig};
use crate::profile::oid_config::{legacy_metadata, with_legacy_fallback};
use crate::profile::sysobjectid::profile_for_sys_object_id;
use crate::profile::{OidConfig, ProfileDefinition, ProfileDefinitionMap};
use crate::session::Session;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// A device shared between the scheduler and its collection jobs
pub type SharedDevice = Arc<Mutex<Device>>;

/// Settings every device is built from
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub namespace: String,
    pub fetch: FetchConfig,
    /// Metrics collected regardless of profile
    pub base_metrics: Vec<MetricsConfig>,
    pub base_metric_tags: Vec<MetricTagConfig>,
    /// Pinned profile, empty for autodetection
    pub profile: String,
    pub autodetect: bool,
}

impl DeviceConfig {
    /// Expects `config` to be validated already
    pub fn from_config(config: &SnmpConfig) -> Self {
        let mut base_metrics = vec![MetricsConfig {
            symbol: SymbolConfig::new(well_known::SYS_UPTIME, "sysUpTimeInstance"),
            ..Default::default()
        }];
        base_metrics.extend(config.metrics.iter().cloned());

        Self {
            namespace: config.device_namespace.clone(),
            fetch: FetchConfig {
                oid_batch_size: config.oid_batch_size,
                column_batch_size: config.column_batch_size(),
                bulk_max_repetitions: config.bulk_max_repetitions,
            },
            base_metrics,
            base_metric_tags: config.metric_tags.clone(),
            profile: config.profile.clone(),
            autodetect: config.profile.is_empty() && config.metrics.is_empty(),
        }
    }
}

/// Outcome of one poll
#[derive(Debug)]
pub struct CollectResult {
    pub reachable: bool,
    pub tags: Vec<String>,
    /// `None` when the session could not be opened
    pub values: Option<ResultValueStore>,
    pub error: Option<Error>,
}

impl CollectResult {
    pub fn status(&self) -> DeviceStatus {
        if self.reachable {
            DeviceStatus::Reachable
        } else {
            DeviceStatus::Unreachable
        }
    }
}

pub struct Device {
    ip: IpAddr,
    namespace: String,
    /// CIDR the device was discovered in, empty for static devices
    subnet: String,
    session: Arc<dyn Session>,
    profiles: Arc<ProfileDefinitionMap>,
    fetch: FetchConfig,
    bulk: BulkCapability,

    base_metrics: Vec<MetricsConfig>,
    base_metric_tags: Vec<MetricTagConfig>,
    autodetect: bool,

    profile: String,
    profile_def: Option<ProfileDefinition>,
    profile_tags: Vec<String>,
    metrics: Vec<MetricsConfig>,
    metric_tags: Vec<MetricTagConfig>,
    metadata: MetadataConfig,
    oid_config: OidConfig,
    metadata_oids: OidConfig,

    logger: Option<StructuredLogger>,
}

impl Device {
    pub fn new(
        ip: IpAddr,
        subnet: impl Into<String>,
        session: Arc<dyn Session>,
        config: &DeviceConfig,
        profiles: Arc<ProfileDefinitionMap>,
    ) -> Self {
        let mut device = Self {
            ip,
            namespace: config.namespace.clone(),
            subnet: subnet.into(),
            session,
            profiles,
            fetch: config.fetch,
            bulk: BulkCapability::default(),
            base_metrics: config.base_metrics.clone(),
            base_metric_tags: config.base_metric_tags.clone(),
            autodetect: config.autodetect,
            profile: config.profile.clone(),
            profile_def: None,
            profile_tags: Vec::new(),
            metrics: Vec::new(),
            metric_tags: Vec::new(),
            metadata: MetadataConfig::new(),
            oid_config: OidConfig::default(),
            metadata_oids: OidConfig::default(),
            logger: None,
        };
        device.apply_base();
        device
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Apply the pinned profile, if any.
    ///
    /// Without one the device keeps its base metrics until the first poll
    /// detects a profile.
    pub fn initialize(&mut self) -> Result<(), ConfigError> {
        if self.profile.is_empty() {
            return Ok(());
        }
        let profile = self.profile.clone();
        self.refresh_with_profile(&profile)
    }

    /// Replace the device's metrics, tags and metadata with `name`'s
    pub fn refresh_with_profile(&mut self, name: &str) -> Result<(), ConfigError> {
        let config = self
            .profiles
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))?;
        let definition = config.definition.clone();
        debug!(device_ip = %self.ip, profile = %name, "Refreshing device with profile");

        self.metrics = self.base_metrics.clone();
        self.metrics.extend(definition.metrics.iter().cloned());
        self.metric_tags = self.base_metric_tags.clone();
        self.metric_tags.extend(definition.metric_tags.iter().cloned());
        self.metadata = with_legacy_fallback(definition.metadata.clone());

        self.profile_tags = vec![format!("snmp_profile:{}", name)];
        if !definition.device.vendor.is_empty() {
            self.profile_tags
                .push(format!("device_vendor:{}", definition.device.vendor));
        }
        self.profile_tags.extend(definition.static_tags.iter().cloned());

        self.profile = name.to_string();
        self.profile_def = Some(definition);
        self.update_oid_config();
        Ok(())
    }

    fn apply_base(&mut self) {
        self.metrics = self.base_metrics.clone();
        self.metric_tags = self.base_metric_tags.clone();
        self.metadata = legacy_metadata();
        self.profile_tags.clear();
        self.update_oid_config();
    }

    fn update_oid_config(&mut self) {
        self.oid_config = OidConfig::for_metrics(&self.metrics, &self.metric_tags);
        self.metadata_oids = OidConfig::for_metadata(&self.metadata);
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn subnet(&self) -> &str {
        &self.subnet
    }

    pub fn is_dynamic(&self) -> bool {
        !self.subnet.is_empty()
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn profile_definition(&self) -> Option<&ProfileDefinition> {
        self.profile_def.as_ref()
    }

    pub fn autodetect(&self) -> bool {
        self.autodetect
    }

    pub fn oid_config(&self) -> &OidConfig {
        &self.oid_config
    }

    pub fn metrics(&self) -> &[MetricsConfig] {
        &self.metrics
    }

    pub fn bulk_capability(&self) -> BulkCapability {
        self.bulk
    }

    /// Poll the device once.
    ///
    /// Failing reachability or autodetection does not stop the fetch; every
    /// failed step ends up in the returned error.
    pub async fn collect(&mut self, with_metadata: bool) -> CollectResult {
        let mut tags = vec![
            format!("device_namespace:{}", self.namespace),
            format!("snmp_device:{}", self.ip),
        ];

        if let Err(e) = self.session.connect().await {
            let error = match e {
                SessionError::Closed => Error::Session(SessionError::Closed),
                other => Error::Collect(vec![format!("snmp connection error: {}", other)]),
            };
            return CollectResult {
                reachable: false,
                tags,
                values: None,
                error: Some(error),
            };
        }

        let mut errors = Vec::new();

        let reachable = match self.check_reachable().await {
            Ok(reachable) => reachable,
            Err(SessionError::Closed) => return closed(tags),
            Err(e) => {
                errors.push(format!("check device reachable: failed: {}", e));
                false
            }
        };
        if !reachable && errors.is_empty() {
            errors.push("check device reachable: no value".to_string());
        }

        if self.autodetect {
            if let Err(e) = self.detect_profile().await {
                errors.push(format!("failed to autodetect profile: {}", e));
            }
        }

        tags.extend(self.profile_tags.iter().cloned());

        let oids = if with_metadata {
            self.oid_config.merged(&self.metadata_oids)
        } else {
            self.oid_config.clone()
        };
        let (values, fetch_errors) = fetch_values(
            self.session.as_ref(),
            &oids.scalar_oids,
            &oids.column_oids,
            &self.fetch,
            &mut self.bulk,
        )
        .await;

        if fetch_errors.iter().any(is_closed) {
            return closed(tags);
        }
        if !fetch_errors.is_empty() {
            let joined: Vec<String> = fetch_errors.iter().map(|e| e.to_string()).collect();
            errors.push(format!("failed to fetch values: {}", joined.join("; ")));
        }

        tags.extend(report::global_metric_tags(&self.metric_tags, &values));

        let error = if errors.is_empty() {
            None
        } else {
            Some(Error::Collect(errors))
        };
        CollectResult {
            reachable,
            tags,
            values: Some(values),
            error,
        }
    }

    async fn check_reachable(&self) -> Result<bool, SessionError> {
        let varbinds = self
            .session
            .get_next(&[well_known::DEVICE_REACHABLE_GET_NEXT.to_string()])
            .await?;
        Ok(varbinds
            .iter()
            .any(|vb| ResultValue::from_snmp(&vb.value).is_some()))
    }

    /// Read sysObjectID and apply the best matching profile.
    ///
    /// Autodetection stops once sysObjectID has been read, matched or not.
    async fn detect_profile(&mut self) -> Result<(), Error> {
        let varbinds = self
            .session
            .get(&[well_known::SYS_OBJECT_ID.to_string()])
            .await?;
        let sys_object_id = varbinds
            .first()
            .and_then(|vb| ResultValue::from_snmp(&vb.value))
            .map(|v| v.to_string())
            .ok_or_else(|| FetchError::ScalarNotFound(well_known::SYS_OBJECT_ID.to_string()))?;
        self.autodetect = false;

        let profile = profile_for_sys_object_id(&self.profiles, &sys_object_id)?;
        self.refresh_with_profile(&profile)?;
        if let Some(logger) = &self.logger {
            logger.log_profile_detected(&self.ip.to_string(), &sys_object_id, &profile);
        }
        Ok(())
    }

    /// Samples for one poll's values
    pub fn report(&self, values: &ResultValueStore, tags: &[String]) -> MetricDatas {
        report::report_metrics(&self.metrics, values, tags)
    }

    /// Metadata documents for the object point
    pub fn metadata(
        &self,
        values: &ResultValueStore,
        status: DeviceStatus,
        tags: &[String],
    ) -> Vec<String> {
        let info = DeviceInfo {
            ip: self.ip.to_string(),
            status,
            profile: &self.profile,
            subnet: &self.subnet,
            namespace: &self.namespace,
            tags,
        };
        metadata::build_metadata(values, &self.metadata, &info)
    }

    /// Close the session; the device cannot be polled afterwards
    pub async fn close(&self) {
        if let Err(e) = self.session.close().await {
            debug!(device_ip = %self.ip, error = %e, "Failed to close session");
        }
    }
}

fn closed(tags: Vec<String>) -> CollectResult {
    CollectResult {
        reachable: false,
        tags,
        values: None,
        error: Some(Error::Session(SessionError::Closed)),
    }
}

fn is_closed(error: &FetchError) -> bool {
    matches!(
        error,
        FetchError::Scalar(SessionError::Closed)
            | FetchError::GetNext(SessionError::Closed)
            | FetchError::GetBulk(SessionError::Closed)
    )
}
