//! Point sink and default-tag provider consumed by the SNMP core
//!
//! The core only builds tag and field maps. Serialization to the final wire
//! representation is the feeder's business.

use crate::models::Point;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};

/// Point category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Object,
    Metric,
}

/// Per-feed options
#[derive(Debug, Clone, Default)]
pub struct FeedOptions {
    /// Wall time spent producing the points
    pub collect_cost: Duration,
    /// Points were produced under election
    pub election: bool,
    /// Measurement the points belong to
    pub source: String,
}

/// Sink for collected points
#[async_trait]
pub trait Feeder: Send + Sync {
    /// Ship a batch of points
    async fn feed(
        &self,
        name: &str,
        category: Category,
        points: Vec<Point>,
        options: FeedOptions,
    ) -> Result<()>;

    /// Record the latest error of an input
    fn feed_last_error(&self, name: &str, message: &str);
}

/// Supplies host-level and election-scoped default tags
pub trait Tagger: Send + Sync {
    fn host_tags(&self) -> HashMap<String, String>;
    fn election_tags(&self) -> HashMap<String, String>;
}

/// Merge default tags under `tags`; keys already present in `tags` win
pub fn merge_tags(
    defaults: &HashMap<String, String>,
    tags: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = tags.clone();
    for (k, v) in defaults {
        merged.entry(k.clone()).or_insert_with(|| v.clone());
    }
    merged
}

/// Tagger backed by fixed maps
#[derive(Debug, Clone, Default)]
pub struct StaticTagger {
    host: HashMap<String, String>,
    election: HashMap<String, String>,
}

impl StaticTagger {
    pub fn new(host: HashMap<String, String>, election: HashMap<String, String>) -> Self {
        Self { host, election }
    }

    /// Host tags only, election tags empty
    pub fn with_host(host_name: &str) -> Self {
        let mut host = HashMap::new();
        host.insert("host".to_string(), host_name.to_string());
        Self {
            host,
            election: HashMap::new(),
        }
    }
}

impl Tagger for StaticTagger {
    fn host_tags(&self) -> HashMap<String, String> {
        self.host.clone()
    }

    fn election_tags(&self) -> HashMap<String, String> {
        self.election.clone()
    }
}

/// Feeder that writes every point as a structured log line
#[derive(Debug, Clone, Default)]
pub struct LogFeeder;

#[async_trait]
impl Feeder for LogFeeder {
    async fn feed(
        &self,
        name: &str,
        category: Category,
        points: Vec<Point>,
        options: FeedOptions,
    ) -> Result<()> {
        for point in &points {
            let line = serde_json::to_string(point)?;
            info!(
                event = "point",
                input = %name,
                category = ?category,
                source = %options.source,
                point = %line,
            );
        }
        info!(
            input = %name,
            points = points.len(),
            cost_ms = options.collect_cost.as_millis() as u64,
            "Fed points"
        );
        Ok(())
    }

    fn feed_last_error(&self, name: &str, message: &str) {
        warn!(event = "last_error", input = %name, error = %message);
    }
}

/// Feeder that keeps everything in memory
#[derive(Debug, Default)]
pub struct MemoryFeeder {
    points: Mutex<Vec<(Category, Point)>>,
    errors: Mutex<Vec<String>>,
}

impl MemoryFeeder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of fed points for one category
    pub fn points(&self, category: Category) -> Vec<Point> {
        match self.points.lock() {
            Ok(points) => points
                .iter()
                .filter(|(c, _)| *c == category)
                .map(|(_, p)| p.clone())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Snapshot of recorded last errors
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Feeder for MemoryFeeder {
    async fn feed(
        &self,
        _name: &str,
        category: Category,
        points: Vec<Point>,
        _options: FeedOptions,
    ) -> Result<()> {
        let mut guard = self
            .points
            .lock()
            .map_err(|_| anyhow::anyhow!("memory feeder poisoned"))?;
        guard.extend(points.into_iter().map(|p| (category, p)));
        Ok(())
    }

    fn feed_last_error(&self, _name: &str, message: &str) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(message.to_string());
        }
    }
}
