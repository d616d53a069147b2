//! Core data models shared by the collection and trap pipelines

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Input name used when feeding points and last errors
pub const INPUT_NAME: &str = "snmp";

/// Measurement for per-device object points
pub const SNMP_OBJECT_NAME: &str = "snmp_object";

/// Measurement for flat metric rows
pub const SNMP_METRIC_NAME: &str = "snmp_metric";

/// Measurement for forwarded traps
pub const SNMP_TRAP_NAME: &str = "snmp_trap";

/// A single raw sample produced while reporting one device poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricData {
    pub name: String,
    pub value: f64,
    pub tags: Vec<String>,
    /// Row identity, filled in by the aggregator
    #[serde(default)]
    pub tags_hash: String,
    /// Source OID; empty for derived and suffixed samples
    #[serde(default)]
    pub oid: String,
}

impl MetricData {
    pub fn new(name: impl Into<String>, value: f64, tags: Vec<String>) -> Self {
        Self {
            name: name.into(),
            value,
            tags,
            tags_hash: String::new(),
            oid: String::new(),
        }
    }

    pub fn with_oid(mut self, oid: impl Into<String>) -> Self {
        self.oid = oid.into();
        self
    }
}

/// All samples of one device poll
#[derive(Debug, Clone, Default)]
pub struct MetricDatas {
    pub data: Vec<MetricData>,
}

impl MetricDatas {
    pub fn push(&mut self, data: MetricData) {
        self.data.push(data);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Reachability of a device as observed by the last poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Reachable,
    Unreachable,
}

/// Point field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Str(String),
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

/// Tag and field maps of one output row before it becomes a point
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagField {
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
}

/// A point handed to the feeder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub time: DateTime<Utc>,
}

impl Point {
    pub fn new(measurement: impl Into<String>, row: TagField, time: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: row.tags,
            fields: row.fields,
            time,
        }
    }
}
