//! Metrics computed from other samples of the same poll

use crate::fetch::ResultValueStore;
use crate::models::MetricData;
use crate::oid::well_known::IF_HIGH_SPEED;
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

pub const MEMORY_USED: &str = "memory.used";
pub const MEMORY_FREE: &str = "memory.free";
pub const MEMORY_TOTAL: &str = "memory.total";
pub const MEMORY_USAGE: &str = "memory.usage";

/// Samples other metrics are derived from
pub fn is_dependency(name: &str) -> bool {
    matches!(name, MEMORY_USED | MEMORY_FREE | MEMORY_TOTAL | MEMORY_USAGE)
}

/// Why a derived metric was not produced
#[derive(Debug, Error, PartialEq)]
pub enum DerivedError {
    #[error("bandwidth usage: missing `ifHighSpeed` metric, skipping metric. fullIndex={0}")]
    MissingHighSpeedColumn(String),

    #[error("bandwidth usage: missing value for `ifHighSpeed`, skipping this row. fullIndex={0}")]
    MissingHighSpeed(String),

    #[error("bandwidth usage: zero or invalid value for ifHighSpeed, skipping this row. fullIndex={0}")]
    InvalidHighSpeed(String),

    #[error("missing {missing} memory metrics, skipping {kind} memory usage")]
    MissingMemory { missing: String, kind: &'static str },

    #[error("cannot evaluate memory usage, total memory is 0")]
    ZeroTotalMemory,
}

/// Usage metric base name for an octet counter
pub fn bandwidth_usage_name(symbol: &str) -> Option<&'static str> {
    match symbol {
        "ifHCInOctets" => Some("ifBandwidthInUsage"),
        "ifHCOutOctets" => Some("ifBandwidthOutUsage"),
        _ => None,
    }
}

/// Interface utilisation in percent: `octets * 8 / (ifHighSpeed * 1e6) * 100`.
///
/// `Ok(None)` for symbols that are not octet counters.
pub fn bandwidth_usage(
    symbol: &str,
    index: &str,
    octets: f64,
    values: &ResultValueStore,
    tags: &[String],
) -> Result<Option<MetricData>, DerivedError> {
    let Some(usage_name) = bandwidth_usage_name(symbol) else {
        return Ok(None);
    };
    let speeds = values
        .get_column_values(IF_HIGH_SPEED)
        .map_err(|_| DerivedError::MissingHighSpeedColumn(index.to_string()))?;
    let speed = speeds
        .get(index)
        .ok_or_else(|| DerivedError::MissingHighSpeed(index.to_string()))?
        .to_float()
        .map_err(|_| DerivedError::InvalidHighSpeed(index.to_string()))?;
    if speed == 0.0 {
        return Err(DerivedError::InvalidHighSpeed(index.to_string()));
    }

    let usage = octets * 8.0 / (speed * 1e6) * 100.0;
    Ok(Some(MetricData::new(
        format!("{}.rate", usage_name),
        usage,
        tags.to_vec(),
    )))
}

/// `used / total * 100`
pub fn evaluate_memory_usage(used: f64, total: f64) -> Result<f64, DerivedError> {
    if total == 0.0 {
        return Err(DerivedError::ZeroTotalMemory);
    }
    Ok(used / total * 100.0)
}

/// Scalar memory samples by name
pub type ScalarSamples = HashMap<String, MetricData>;

/// Column memory samples by name, then row index
pub type ColumnSamples = HashMap<String, HashMap<String, MetricData>>;

/// Memory usage from scalar samples when any exist, else per row from columns
pub fn memory_usage(
    scalar: &ScalarSamples,
    column: &ColumnSamples,
) -> Result<Vec<MetricData>, DerivedError> {
    let has_scalar = [MEMORY_USAGE, MEMORY_USED, MEMORY_FREE, MEMORY_TOTAL]
        .iter()
        .any(|name| scalar.contains_key(*name));
    if has_scalar {
        return scalar_memory_usage(scalar).map(|m| m.into_iter().collect());
    }
    column_memory_usage(column)
}

fn missing(present: [(&str, bool); 3], kind: &'static str) -> DerivedError {
    let missing: Vec<&str> = present
        .iter()
        .filter(|(_, ok)| !ok)
        .map(|(name, _)| name.trim_start_matches("memory."))
        .collect();
    DerivedError::MissingMemory {
        missing: missing.join(", "),
        kind,
    }
}

/// Pick the first usable pair: used+total, used+free, free+total
fn usage_from(
    used: Option<f64>,
    free: Option<f64>,
    total: Option<f64>,
) -> Option<Result<f64, DerivedError>> {
    match (used, free, total) {
        (Some(used), _, Some(total)) => Some(evaluate_memory_usage(used, total)),
        (Some(used), Some(free), None) => Some(evaluate_memory_usage(used, used + free)),
        (None, Some(free), Some(total)) => Some(evaluate_memory_usage(total - free, total)),
        _ => None,
    }
}

fn scalar_memory_usage(scalar: &ScalarSamples) -> Result<Option<MetricData>, DerivedError> {
    if scalar.contains_key(MEMORY_USAGE) {
        return Ok(None);
    }
    let used = scalar.get(MEMORY_USED);
    let free = scalar.get(MEMORY_FREE);
    let total = scalar.get(MEMORY_TOTAL);

    let Some(usage) = usage_from(
        used.map(|s| s.value),
        free.map(|s| s.value),
        total.map(|s| s.value),
    ) else {
        return Err(missing(
            [
                (MEMORY_USED, used.is_some()),
                (MEMORY_FREE, free.is_some()),
                (MEMORY_TOTAL, total.is_some()),
            ],
            "scalar",
        ));
    };
    let tags = used.or(free).map(|s| s.tags.clone()).unwrap_or_default();
    Ok(Some(MetricData::new(MEMORY_USAGE, usage?, tags)))
}

fn column_memory_usage(column: &ColumnSamples) -> Result<Vec<MetricData>, DerivedError> {
    if column.contains_key(MEMORY_USAGE) {
        return Ok(Vec::new());
    }
    let used = column.get(MEMORY_USED);
    let free = column.get(MEMORY_FREE);
    let total = column.get(MEMORY_TOTAL);

    let usable = matches!(
        (used.is_some(), free.is_some(), total.is_some()),
        (true, _, true) | (true, true, false) | (false, true, true)
    );
    if !usable {
        return Err(missing(
            [
                (MEMORY_USED, used.is_some()),
                (MEMORY_FREE, free.is_some()),
                (MEMORY_TOTAL, total.is_some()),
            ],
            "column",
        ));
    }

    let anchor = used.or(free).map(|rows| {
        let mut indexes: Vec<&String> = rows.keys().collect();
        indexes.sort_by(|a, b| crate::oid::compare(a, b));
        indexes
    });
    let mut samples = Vec::new();
    for index in anchor.unwrap_or_default() {
        let row_value = |rows: Option<&HashMap<String, MetricData>>| {
            rows.and_then(|r| r.get(index)).map(|s| s.value)
        };
        let usage = match usage_from(row_value(used), row_value(free), row_value(total)) {
            Some(Ok(usage)) => usage,
            Some(Err(e)) => {
                warn!(index = %index, error = %e, "Skipping column memory usage row");
                continue;
            }
            None => continue,
        };
        let tags = used
            .or(free)
            .and_then(|rows| rows.get(index))
            .map(|s| s.tags.clone())
            .unwrap_or_default();
        samples.push(MetricData::new(MEMORY_USAGE, usage, tags));
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::ResultValue;

    fn sample(name: &str, value: f64) -> (String, MetricData) {
        (
            name.to_string(),
            MetricData::new(name, value, vec!["snmp_device:10.0.0.1".to_string()]),
        )
    }

    fn speeds(index: &str, speed: f64) -> ResultValueStore {
        let mut store = ResultValueStore::default();
        store
            .column_values
            .entry(IF_HIGH_SPEED.to_string())
            .or_default()
            .insert(index.to_string(), ResultValue::number(speed));
        store
    }

    #[test]
    fn test_bandwidth_usage() {
        let store = speeds("1", 80.0);
        let tags = vec!["interface:eth0".to_string()];

        let inbound = bandwidth_usage("ifHCInOctets", "1", 5_000_000.0, &store, &tags)
            .unwrap()
            .unwrap();
        assert_eq!(inbound.name, "ifBandwidthInUsage.rate");
        assert_eq!(inbound.value, 50.0);

        let outbound = bandwidth_usage("ifHCOutOctets", "1", 1_000_000.0, &store, &tags)
            .unwrap()
            .unwrap();
        assert_eq!(outbound.name, "ifBandwidthOutUsage.rate");
        assert_eq!(outbound.value, 10.0);
    }

    #[test]
    fn test_bandwidth_skips() {
        let store = speeds("1", 0.0);
        assert_eq!(
            bandwidth_usage("ifInErrors", "1", 5.0, &store, &[]).unwrap(),
            None
        );
        assert_eq!(
            bandwidth_usage("ifHCInOctets", "1", 5.0, &store, &[]),
            Err(DerivedError::InvalidHighSpeed("1".into()))
        );
        assert_eq!(
            bandwidth_usage("ifHCInOctets", "2", 5.0, &store, &[]),
            Err(DerivedError::MissingHighSpeed("2".into()))
        );
        assert_eq!(
            bandwidth_usage("ifHCInOctets", "1", 5.0, &ResultValueStore::default(), &[]),
            Err(DerivedError::MissingHighSpeedColumn("1".into()))
        );
    }

    #[test]
    fn test_scalar_memory_usage() {
        let scalar: ScalarSamples = [sample(MEMORY_USED, 30.0), sample(MEMORY_TOTAL, 100.0)]
            .into_iter()
            .collect();
        let usage = memory_usage(&scalar, &ColumnSamples::new()).unwrap();
        assert_eq!(usage[0].name, MEMORY_USAGE);
        assert_eq!(usage[0].value, 30.0);

        let scalar: ScalarSamples = [sample(MEMORY_USED, 30.0), sample(MEMORY_FREE, 70.0)]
            .into_iter()
            .collect();
        assert_eq!(memory_usage(&scalar, &ColumnSamples::new()).unwrap()[0].value, 30.0);

        let scalar: ScalarSamples = [sample(MEMORY_FREE, 25.0), sample(MEMORY_TOTAL, 100.0)]
            .into_iter()
            .collect();
        assert_eq!(memory_usage(&scalar, &ColumnSamples::new()).unwrap()[0].value, 75.0);
    }

    #[test]
    fn test_memory_usage_errors() {
        let scalar: ScalarSamples = [sample(MEMORY_USED, 30.0)].into_iter().collect();
        let err = memory_usage(&scalar, &ColumnSamples::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing free, total memory metrics, skipping scalar memory usage"
        );

        let scalar: ScalarSamples = [sample(MEMORY_USED, 30.0), sample(MEMORY_TOTAL, 0.0)]
            .into_iter()
            .collect();
        assert_eq!(
            memory_usage(&scalar, &ColumnSamples::new()).unwrap_err(),
            DerivedError::ZeroTotalMemory
        );

        let err = memory_usage(&ScalarSamples::new(), &ColumnSamples::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing used, free, total memory metrics, skipping column memory usage"
        );
    }

    #[test]
    fn test_existing_usage_is_kept() {
        let scalar: ScalarSamples = [sample(MEMORY_USAGE, 42.0), sample(MEMORY_USED, 1.0)]
            .into_iter()
            .collect();
        assert!(memory_usage(&scalar, &ColumnSamples::new()).unwrap().is_empty());
    }

    #[test]
    fn test_column_memory_usage_per_row() {
        let mut column = ColumnSamples::new();
        for (index, used, total) in [("1", 10.0, 100.0), ("2", 50.0, 200.0)] {
            column
                .entry(MEMORY_USED.into())
                .or_default()
                .insert(index.into(), MetricData::new(MEMORY_USED, used, vec![format!("mem:{}", index)]));
            column
                .entry(MEMORY_TOTAL.into())
                .or_default()
                .insert(index.into(), MetricData::new(MEMORY_TOTAL, total, vec![]));
        }
        let usage = memory_usage(&ScalarSamples::new(), &column).unwrap();
        assert_eq!(usage.len(), 2);
        assert_eq!(usage[0].value, 10.0);
        assert_eq!(usage[0].tags, vec!["mem:1"]);
        assert_eq!(usage[1].value, 25.0);
    }

    #[test]
    fn test_zero_total_row_skips_only_that_row() {
        let mut column = ColumnSamples::new();
        for (index, used, total) in [("1", 10.0, 100.0), ("2", 50.0, 0.0)] {
            column
                .entry(MEMORY_USED.into())
                .or_default()
                .insert(index.into(), MetricData::new(MEMORY_USED, used, vec![format!("mem:{}", index)]));
            column
                .entry(MEMORY_TOTAL.into())
                .or_default()
                .insert(index.into(), MetricData::new(MEMORY_TOTAL, total, vec![]));
        }
        let usage = memory_usage(&ScalarSamples::new(), &column).unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].value, 10.0);
        assert_eq!(usage[0].tags, vec!["mem:1"]);
    }
}
