//! Device sessions
//!
//! A [`Session`] is the only path to the network. The fetch engine, devices
//! and discovery all talk to it through the trait so tests can swap in an
//! in-memory `MockSession`.

mod client;
#[cfg(test)]
pub mod mock;

pub use client::{AsyncSnmpSession, AsyncSnmpSessionFactory};
pub(crate) use client::convert_varbind;

use crate::config::SnmpConfig;
use crate::error::SessionError;
use async_trait::async_trait;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Protocol version of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnmpVersion {
    V1,
    #[default]
    V2c,
    V3,
}

impl SnmpVersion {
    pub fn from_config(version: u8) -> Option<Self> {
        match version {
            1 => Some(SnmpVersion::V1),
            2 => Some(SnmpVersion::V2c),
            3 => Some(SnmpVersion::V3),
            _ => None,
        }
    }
}

impl fmt::Display for SnmpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnmpVersion::V1 => write!(f, "1"),
            SnmpVersion::V2c => write!(f, "2"),
            SnmpVersion::V3 => write!(f, "3"),
        }
    }
}

/// SMI value as returned by a device
#[derive(Debug, Clone, PartialEq)]
pub enum SnmpValue {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    ObjectIdentifier(String),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Vec<u8>),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl SnmpValue {
    /// noSuchObject, noSuchInstance or endOfMibView
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            SnmpValue::NoSuchObject | SnmpValue::NoSuchInstance | SnmpValue::EndOfMibView
        )
    }
}

/// One OID/value pair
#[derive(Debug, Clone, PartialEq)]
pub struct VarBind {
    pub oid: String,
    pub value: SnmpValue,
}

impl VarBind {
    pub fn new(oid: impl Into<String>, value: SnmpValue) -> Self {
        Self {
            oid: oid.into(),
            value,
        }
    }
}

/// Transport to one device
#[async_trait]
pub trait Session: Send + Sync {
    fn version(&self) -> SnmpVersion;

    async fn connect(&self) -> Result<(), SessionError>;

    /// Release the transport; every later request fails with `Closed`
    async fn close(&self) -> Result<(), SessionError>;

    async fn get(&self, oids: &[String]) -> Result<Vec<VarBind>, SessionError>;

    async fn get_next(&self, oids: &[String]) -> Result<Vec<VarBind>, SessionError>;

    async fn get_bulk(
        &self,
        oids: &[String],
        max_repetitions: u32,
    ) -> Result<Vec<VarBind>, SessionError>;
}

/// Builds sessions for devices and discovery probes
pub trait SessionFactory: Send + Sync {
    fn create(&self, ip: IpAddr) -> Arc<dyn Session>;
}

/// Credentials and transport settings shared by every session
#[derive(Debug, Clone)]
pub struct SessionOpts {
    pub version: SnmpVersion,
    pub port: u16,
    pub community: String,
    pub user: String,
    pub auth_protocol: String,
    pub auth_key: String,
    pub priv_protocol: String,
    pub priv_key: String,
    pub context_name: String,
    pub timeout: Duration,
    pub retries: u32,
    pub max_repetitions: u32,
    /// Upper bound on varbinds per PDU; a batch is never split below this
    pub max_oids_per_request: usize,
}

impl SessionOpts {
    pub fn from_config(config: &SnmpConfig) -> Self {
        Self {
            version: SnmpVersion::from_config(config.snmp_version).unwrap_or_default(),
            port: config.port,
            community: config.v2_community_string.clone(),
            user: config.v3_user.clone(),
            auth_protocol: config.v3_auth_protocol.clone(),
            auth_key: config.v3_auth_key.clone(),
            priv_protocol: config.v3_priv_protocol.clone(),
            priv_key: config.v3_priv_key.clone(),
            context_name: config.v3_context_name.clone(),
            timeout: config.timeout(),
            retries: config.retries,
            max_repetitions: config.bulk_max_repetitions,
            max_oids_per_request: config.oid_batch_size.max(config.column_batch_size()),
        }
    }
}
