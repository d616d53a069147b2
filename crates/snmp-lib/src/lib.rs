//! SNMP telemetry core
//!
//! This crate provides:
//! - Device sessions and the scalar/column fetch engine
//! - Profile loading, inheritance and sysObjectID matching
//! - Static and discovered devices polled by a worker pool
//! - Row aggregation into object and metric points
//! - A trap listener that resolves and forwards notifications
//! - Health checks and observability

pub mod aggregate;
pub mod config;
pub mod device;
pub mod discovery;
pub mod error;
pub mod feeder;
pub mod fetch;
pub mod health;
pub mod input;
pub mod models;
pub mod observability;
pub mod oid;
pub mod profile;
pub mod scheduler;
pub mod session;
pub mod traps;

pub use config::{SnmpConfig, TrapsConfig};
pub use error::{Error, Result};
pub use feeder::{Category, FeedOptions, Feeder, LogFeeder, StaticTagger, Tagger};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use input::{SnmpInput, SnmpInputBuilder};
pub use models::*;
pub use observability::{SnmpMetrics, StructuredLogger};
pub use session::{AsyncSnmpSessionFactory, SessionFactory, SessionOpts};
