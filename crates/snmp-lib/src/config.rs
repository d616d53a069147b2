//! SNMP subsystem configuration

use crate::aggregate::rewrite::compile_ignore_rule;
use crate::discovery::Subnet;
use crate::error::ConfigError;
use crate::profile::definition::{
    normalize_metrics, validate_enrich_metric_tags, validate_enrich_metrics, MetricTagConfig,
    MetricsConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default worker count, also used to decide whether `workers` was set
pub const DEFAULT_WORKERS: usize = 100;

/// Poller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnmpConfig {
    /// Static device IPs
    #[serde(default)]
    pub specific_devices: Vec<String>,

    /// CIDR ranges walked by discovery
    #[serde(default)]
    pub auto_discovery: Vec<String>,

    /// Addresses never probed by discovery
    #[serde(default)]
    pub discovery_ignored_ip: Vec<String>,

    #[serde(default = "default_port")]
    pub port: u16,

    /// 1, 2 (v2c) or 3
    #[serde(default = "default_snmp_version")]
    pub snmp_version: u8,

    #[serde(default = "default_community")]
    pub v2_community_string: String,

    #[serde(default)]
    pub v3_user: String,
    #[serde(default)]
    pub v3_auth_protocol: String,
    #[serde(default)]
    pub v3_auth_key: String,
    #[serde(default)]
    pub v3_priv_protocol: String,
    #[serde(default)]
    pub v3_priv_key: String,
    #[serde(default)]
    pub v3_context_name: String,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_discovery_interval")]
    pub discovery_interval_secs: u64,

    #[serde(default = "default_object_interval")]
    pub object_interval_secs: u64,

    #[serde(default = "default_metric_interval")]
    pub metric_interval_secs: u64,

    /// OIDs per scalar get
    #[serde(default = "default_oid_batch_size")]
    pub oid_batch_size: usize,

    /// Columns per walk batch, defaults to `oid_batch_size`
    #[serde(default)]
    pub column_batch_size: Option<usize>,

    #[serde(default = "default_bulk_max_repetitions")]
    pub bulk_max_repetitions: u32,

    #[serde(default = "default_namespace")]
    pub device_namespace: String,

    /// Per-request timeout
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Pinned profile name, disables autodetection
    #[serde(default)]
    pub profile: String,

    #[serde(default = "default_profiles_dir")]
    pub profiles_dir: PathBuf,

    /// Instance-level metrics added to every device
    #[serde(default)]
    pub metrics: Vec<MetricsConfig>,

    /// Instance-level scalar tags added to every device
    #[serde(default)]
    pub metric_tags: Vec<MetricTagConfig>,

    /// User tags, also reserved as object-level keys by the aggregator
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Merge election tags instead of host tags
    #[serde(default)]
    pub election: bool,

    #[serde(default)]
    pub enable_picking_data: bool,

    #[serde(default)]
    pub picking_fields: Vec<String>,

    /// Field and tag key renames on emitted points
    #[serde(default)]
    pub key_mapping: BTreeMap<String, String>,

    /// Field renames by source OID, checked before `key_mapping`
    #[serde(default)]
    pub oid_keys: BTreeMap<String, String>,

    /// Tag keys dropped from emitted points
    #[serde(default)]
    pub tags_ignore: Vec<String>,

    #[serde(default)]
    pub tags_ignore_regexp: Vec<String>,

    /// Poll interval while waiting for a busy IP
    #[serde(default = "default_ip_lock_poll")]
    pub ip_lock_poll_ms: u64,

    #[serde(default = "default_job_queue_size")]
    pub job_queue_size: usize,

    #[serde(default)]
    pub traps: TrapsConfig,
}

/// Trap receiver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrapsConfig {
    #[serde(default)]
    pub enable: bool,

    #[serde(default = "default_trap_bind_host")]
    pub bind_host: String,

    #[serde(default = "default_trap_port")]
    pub port: u16,

    /// Accepted v1/v2c communities, empty accepts all
    #[serde(default)]
    pub community_strings: Vec<String>,

    /// USM users accepted for v3 notifications
    #[serde(default)]
    pub users: Vec<TrapUser>,

    #[serde(default = "default_trap_queue_size")]
    pub queue_size: usize,

    #[serde(default = "default_trap_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// Directory of trap database files
    #[serde(default = "default_traps_db_dir")]
    pub db_dir: PathBuf,
}

/// One v3 USM user
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrapUser {
    pub username: String,
    #[serde(default)]
    pub auth_protocol: String,
    #[serde(default)]
    pub auth_key: String,
    #[serde(default)]
    pub priv_protocol: String,
    #[serde(default)]
    pub priv_key: String,
}

fn default_port() -> u16 {
    161
}

fn default_snmp_version() -> u8 {
    2
}

fn default_community() -> String {
    "public".to_string()
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_discovery_interval() -> u64 {
    3600
}

fn default_object_interval() -> u64 {
    300
}

fn default_metric_interval() -> u64 {
    10
}

fn default_oid_batch_size() -> usize {
    5
}

fn default_bulk_max_repetitions() -> u32 {
    10
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_timeout() -> u64 {
    5
}

fn default_retries() -> u32 {
    3
}

fn default_profiles_dir() -> PathBuf {
    PathBuf::from("profiles")
}

fn default_ip_lock_poll() -> u64 {
    1000
}

fn default_job_queue_size() -> usize {
    64
}

fn default_trap_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_trap_port() -> u16 {
    162
}

fn default_trap_queue_size() -> usize {
    1000
}

fn default_trap_stop_timeout() -> u64 {
    5
}

fn default_traps_db_dir() -> PathBuf {
    PathBuf::from("traps_db")
}

impl Default for SnmpConfig {
    fn default() -> Self {
        Self {
            specific_devices: Vec::new(),
            auto_discovery: Vec::new(),
            discovery_ignored_ip: Vec::new(),
            port: default_port(),
            snmp_version: default_snmp_version(),
            v2_community_string: default_community(),
            v3_user: String::new(),
            v3_auth_protocol: String::new(),
            v3_auth_key: String::new(),
            v3_priv_protocol: String::new(),
            v3_priv_key: String::new(),
            v3_context_name: String::new(),
            workers: default_workers(),
            discovery_interval_secs: default_discovery_interval(),
            object_interval_secs: default_object_interval(),
            metric_interval_secs: default_metric_interval(),
            oid_batch_size: default_oid_batch_size(),
            column_batch_size: None,
            bulk_max_repetitions: default_bulk_max_repetitions(),
            device_namespace: default_namespace(),
            timeout_secs: default_timeout(),
            retries: default_retries(),
            profile: String::new(),
            profiles_dir: default_profiles_dir(),
            metrics: Vec::new(),
            metric_tags: Vec::new(),
            tags: BTreeMap::new(),
            election: false,
            enable_picking_data: false,
            picking_fields: Vec::new(),
            key_mapping: BTreeMap::new(),
            oid_keys: BTreeMap::new(),
            tags_ignore: Vec::new(),
            tags_ignore_regexp: Vec::new(),
            ip_lock_poll_ms: default_ip_lock_poll(),
            job_queue_size: default_job_queue_size(),
            traps: TrapsConfig::default(),
        }
    }
}

impl Default for TrapsConfig {
    fn default() -> Self {
        Self {
            enable: false,
            bind_host: default_trap_bind_host(),
            port: default_trap_port(),
            community_strings: Vec::new(),
            users: Vec::new(),
            queue_size: default_trap_queue_size(),
            stop_timeout_secs: default_trap_stop_timeout(),
            db_dir: default_traps_db_dir(),
        }
    }
}

impl SnmpConfig {
    /// Check everything that must hold before the subsystem starts.
    ///
    /// Instance metrics and metric tags are normalized and their regexes
    /// compiled in place, which is why this takes `&mut self`.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if !(1..=3).contains(&self.snmp_version) {
            return Err(ConfigError::InvalidVersion(self.snmp_version));
        }

        if self.workers == 0 {
            return Err(ConfigError::Zero("workers"));
        }
        if self.oid_batch_size == 0 {
            return Err(ConfigError::Zero("oid_batch_size"));
        }
        if self.column_batch_size == Some(0) {
            return Err(ConfigError::Zero("column_batch_size"));
        }
        if self.bulk_max_repetitions == 0 {
            return Err(ConfigError::Zero("bulk_max_repetitions"));
        }
        if self.job_queue_size == 0 {
            return Err(ConfigError::Zero("job_queue_size"));
        }
        for (name, value) in [
            ("discovery_interval_secs", self.discovery_interval_secs),
            ("object_interval_secs", self.object_interval_secs),
            ("metric_interval_secs", self.metric_interval_secs),
            ("ip_lock_poll_ms", self.ip_lock_poll_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }

        self.static_ips()?;
        self.subnets()?;
        for ip in &self.discovery_ignored_ip {
            IpAddr::from_str(ip.trim()).map_err(|_| ConfigError::InvalidIp(ip.clone()))?;
        }

        if self.snmp_version == 3 {
            check_protocols(&self.v3_auth_protocol, &self.v3_priv_protocol)?;
        }

        if self.traps.enable {
            self.trap_bind_addr()?;
            if self.traps.queue_size == 0 {
                return Err(ConfigError::Zero("traps.queue_size"));
            }
            for user in &self.traps.users {
                check_protocols(&user.auth_protocol, &user.priv_protocol)?;
            }
        }

        for pattern in &self.tags_ignore_regexp {
            compile_ignore_rule(pattern)?;
        }

        normalize_metrics(&mut self.metrics);
        let mut errors = validate_enrich_metrics(&mut self.metrics);
        errors.extend(validate_enrich_metric_tags(&mut self.metric_tags));
        if !errors.is_empty() {
            return Err(ConfigError::Metrics(errors));
        }

        Ok(())
    }

    /// Parsed static device addresses, rejecting duplicates
    pub fn static_ips(&self) -> Result<Vec<IpAddr>, ConfigError> {
        let mut seen = HashSet::new();
        let mut ips = Vec::with_capacity(self.specific_devices.len());
        for raw in &self.specific_devices {
            let ip = IpAddr::from_str(raw.trim()).map_err(|_| ConfigError::InvalidIp(raw.clone()))?;
            if !seen.insert(ip) {
                return Err(ConfigError::DuplicateIp(raw.clone()));
            }
            ips.push(ip);
        }
        Ok(ips)
    }

    pub fn subnets(&self) -> Result<Vec<Subnet>, ConfigError> {
        self.auto_discovery.iter().map(|c| Subnet::parse(c)).collect()
    }

    pub fn ignored_ips(&self) -> HashSet<IpAddr> {
        self.discovery_ignored_ip
            .iter()
            .filter_map(|ip| IpAddr::from_str(ip.trim()).ok())
            .collect()
    }

    pub fn trap_bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.traps.bind_host, self.traps.port);
        SocketAddr::from_str(&raw).map_err(|_| ConfigError::InvalidBindAddress(raw))
    }

    pub fn column_batch_size(&self) -> usize {
        self.column_batch_size.unwrap_or(self.oid_batch_size)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn ip_lock_poll(&self) -> Duration {
        Duration::from_millis(self.ip_lock_poll_ms)
    }

    /// Pool size: the configured count when discovery is on or `workers` was
    /// changed, otherwise one worker per static device
    pub fn worker_count(&self) -> usize {
        if !self.auto_discovery.is_empty() || self.workers != DEFAULT_WORKERS {
            self.workers
        } else {
            self.specific_devices.len().max(1)
        }
    }

    /// Communities accepted by the trap listener
    pub fn trap_communities(&self) -> Vec<String> {
        self.traps.community_strings.clone()
    }

    /// USM users for the trap listener, including the poller's v3 user
    pub fn trap_users(&self) -> Vec<TrapUser> {
        let mut users = self.traps.users.clone();
        if self.snmp_version == 3
            && !self.v3_user.is_empty()
            && !users.iter().any(|u| u.username == self.v3_user)
        {
            users.push(TrapUser {
                username: self.v3_user.clone(),
                auth_protocol: self.v3_auth_protocol.clone(),
                auth_key: self.v3_auth_key.clone(),
                priv_protocol: self.v3_priv_protocol.clone(),
                priv_key: self.v3_priv_key.clone(),
            });
        }
        users
    }
}

fn check_protocols(auth: &str, privacy: &str) -> Result<(), ConfigError> {
    if !auth.is_empty() && async_snmp::AuthProtocol::from_str(auth).is_err() {
        return Err(ConfigError::InvalidProtocol {
            kind: "auth",
            value: auth.to_string(),
        });
    }
    if !privacy.is_empty() && async_snmp::PrivProtocol::from_str(privacy).is_err() {
        return Err(ConfigError::InvalidProtocol {
            kind: "privacy",
            value: privacy.to_string(),
        });
    }
    Ok(())
}
