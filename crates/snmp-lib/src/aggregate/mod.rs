//! Row aggregation
//!
//! Samples of one poll are grouped by the hash of their tags. Object mode
//! folds every row into typed buckets on one device point; metric mode emits
//! one flat row per hash.

pub mod derived;
pub mod rewrite;

use crate::config::SnmpConfig;
use crate::models::{FieldValue, MetricDatas, TagField};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

const AGENT_HOST_KEY: &str = "agent_host";
const AGENT_VERSION_KEY: &str = "agent_version";

/// Tag keys lifted to the device level in object mode
const RESERVED_KEYS: &[&str] = &[
    "device_vendor",
    "host",
    "ip",
    "name",
    "snmp_host",
    "snmp_profile",
];

/// Deterministic identity of a tag list, independent of order
pub fn tags_hash(tags: &[String]) -> String {
    let mut sorted: Vec<&str> = tags.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let mut hasher = Sha256::new();
    for tag in sorted {
        hasher.update(tag.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Fill in `tags_hash` of every sample
pub fn calc_tags_hash(datas: &mut MetricDatas) {
    for data in &mut datas.data {
        data.tags_hash = tags_hash(&data.tags);
    }
}

/// One logical row: the tags of its first sample and one value per name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    pub tags: Vec<String>,
    pub fields: BTreeMap<String, f64>,
}

/// Group hashed samples into rows; a name seen twice keeps the larger value
pub fn aggregate_hash(datas: &MetricDatas) -> BTreeMap<String, Row> {
    let mut rows: BTreeMap<String, Row> = BTreeMap::new();
    for data in &datas.data {
        let row = rows.entry(data.tags_hash.clone()).or_insert_with(|| Row {
            tags: data.tags.clone(),
            fields: BTreeMap::new(),
        });
        row.fields
            .entry(data.name.clone())
            .and_modify(|v| {
                if data.value > *v {
                    *v = data.value;
                }
            })
            .or_insert(data.value);
    }
    rows
}

/// `key:value` strings as a map; agent identity tags are dropped
pub fn style_tags(tags: &[String]) -> BTreeMap<String, String> {
    tags.iter()
        .filter_map(|tag| tag.split_once(':'))
        .filter(|(k, _)| *k != AGENT_HOST_KEY && *k != AGENT_VERSION_KEY)
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// `if.speed_x` -> `if_speed_x`, `memory.usage` -> `memoryUsage`
pub fn normalize_key(key: &str) -> String {
    if key.contains('_') {
        return key.replace('.', "_");
    }
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for c in key.chars() {
        if c == '.' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn normalize_row(row: TagField) -> TagField {
    TagField {
        tags: row
            .tags
            .into_iter()
            .map(|(k, v)| (normalize_key(&k), v))
            .collect(),
        fields: row
            .fields
            .into_iter()
            .map(|(k, v)| (normalize_key(&k), v))
            .collect(),
    }
}

#[derive(Serialize)]
struct InterfaceAttribute<'a> {
    interface: &'a str,
    interface_alias: String,
    fields: &'a BTreeMap<String, f64>,
}

#[derive(Serialize)]
struct SensorAttribute<'a> {
    sensor_id: &'a str,
    sensor_type: String,
    fields: &'a BTreeMap<String, f64>,
}

#[derive(Serialize)]
struct MemAttribute<'a> {
    mem: &'a str,
    fields: &'a BTreeMap<String, f64>,
}

#[derive(Serialize)]
struct MemPoolNameAttribute<'a> {
    mem_pool_name: &'a str,
    fields: &'a BTreeMap<String, f64>,
}

#[derive(Serialize)]
struct CpuAttribute<'a> {
    cpu: &'a str,
    fields: &'a BTreeMap<String, f64>,
}

#[derive(Serialize)]
struct AllAttribute<'a> {
    tags: BTreeMap<String, String>,
    fields: &'a BTreeMap<String, f64>,
}

#[derive(Default)]
struct Buckets<'a> {
    interfaces: Vec<InterfaceAttribute<'a>>,
    sensors: Vec<SensorAttribute<'a>>,
    mems: Vec<MemAttribute<'a>>,
    mem_pool_names: Vec<MemPoolNameAttribute<'a>>,
    cpus: Vec<CpuAttribute<'a>>,
    all: Vec<AllAttribute<'a>>,
}

fn to_json<T: Serialize>(name: &str, value: &T) -> Option<FieldValue> {
    match serde_json::to_string(value) {
        Ok(s) => Some(FieldValue::Str(s)),
        Err(e) => {
            warn!(field = %name, error = %e, "Failed to encode object field");
            None
        }
    }
}

/// Splits aggregated rows into object and metric output
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    custom_tag_keys: HashSet<String>,
    picking_fields: Option<HashSet<String>>,
}

impl Aggregator {
    pub fn new(custom_tag_keys: HashSet<String>, picking_fields: Option<HashSet<String>>) -> Self {
        Self {
            custom_tag_keys,
            picking_fields,
        }
    }

    pub fn from_config(config: &SnmpConfig) -> Self {
        let picking = config
            .enable_picking_data
            .then(|| config.picking_fields.iter().cloned().collect());
        Self::new(config.tags.keys().cloned().collect(), picking)
    }

    pub fn is_reserved(&self, key: &str) -> bool {
        RESERVED_KEYS.contains(&key) || self.custom_tag_keys.contains(key)
    }

    /// Row tags with `host` and `name` replaced by the device IP
    fn row_tags(tags: &[String]) -> BTreeMap<String, String> {
        let mut tags = style_tags(tags);
        let ip = tags.get("ip").cloned().unwrap_or_default();
        tags.insert("host".to_string(), ip.clone());
        tags.insert("name".to_string(), ip);
        tags
    }

    /// One flat row per tag hash, filtered by `picking_fields` when set
    pub fn metric_rows(&self, mut datas: MetricDatas) -> Vec<TagField> {
        calc_tags_hash(&mut datas);
        aggregate_hash(&datas)
            .into_values()
            .filter(|row| match &self.picking_fields {
                Some(picking) => row
                    .fields
                    .keys()
                    .any(|name| picking.contains(&normalize_key(name))),
                None => true,
            })
            .map(|row| {
                normalize_row(TagField {
                    tags: Self::row_tags(&row.tags),
                    fields: row
                        .fields
                        .into_iter()
                        .map(|(k, v)| (k, FieldValue::Float(v)))
                        .collect(),
                })
            })
            .collect()
    }

    /// The single object row of a device.
    ///
    /// `device_tags` seed the reserved tags so an unreachable device without
    /// samples still gets its identity; `device_meta` documents are joined
    /// into `device_meta`.
    pub fn object_row(
        &self,
        mut datas: MetricDatas,
        device_tags: &[String],
        device_meta: &[String],
    ) -> TagField {
        calc_tags_hash(&mut datas);
        let rows = aggregate_hash(&datas);

        let mut object_tags: BTreeMap<String, String> = BTreeMap::new();
        let mut tagged_rows = Vec::with_capacity(rows.len());
        for row in rows.values() {
            let tags = Self::row_tags(&row.tags);
            for (k, v) in &tags {
                if self.is_reserved(k) {
                    object_tags.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
            tagged_rows.push((tags, &row.fields));
        }
        for (k, v) in Self::row_tags(device_tags) {
            if self.is_reserved(&k) {
                object_tags.entry(k).or_insert(v);
            }
        }

        let mut buckets = Buckets::default();
        for (tags, fields) in &tagged_rows {
            self.route(tags, fields, &mut buckets);
        }

        let mut object_fields: BTreeMap<String, FieldValue> = BTreeMap::new();
        let encoded = [
            ("interfaces", to_json("interfaces", &buckets.interfaces)),
            ("sensors", to_json("sensors", &buckets.sensors)),
            ("mems", to_json("mems", &buckets.mems)),
            ("mem_pool_names", to_json("mem_pool_names", &buckets.mem_pool_names)),
            ("cpus", to_json("cpus", &buckets.cpus)),
            ("all", to_json("all", &buckets.all)),
        ];
        for (name, value) in encoded {
            if let Some(value) = value {
                object_fields.insert(name.to_string(), value);
            }
        }
        object_fields.insert(
            "device_meta".to_string(),
            FieldValue::Str(device_meta.join(", ")),
        );

        normalize_row(TagField {
            tags: object_tags,
            fields: object_fields,
        })
    }

    /// Put a row into its typed bucket and into `all`; rows without any
    /// non-reserved tag are device level and go nowhere
    fn route<'a>(
        &self,
        tags: &'a BTreeMap<String, String>,
        fields: &'a BTreeMap<String, f64>,
        buckets: &mut Buckets<'a>,
    ) {
        let own: BTreeMap<String, String> = tags
            .iter()
            .filter(|(k, _)| !self.is_reserved(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if own.is_empty() {
            return;
        }

        let alias = |key: &str| tags.get(key).cloned().unwrap_or_default();
        if let Some(interface) = tags.get("interface") {
            buckets.interfaces.push(InterfaceAttribute {
                interface,
                interface_alias: alias("interface_alias"),
                fields,
            });
        } else if let Some(sensor_id) = tags.get("sensor_id") {
            buckets.sensors.push(SensorAttribute {
                sensor_id,
                sensor_type: alias("sensor_type"),
                fields,
            });
        } else if let Some(mem) = tags.get("mem") {
            buckets.mems.push(MemAttribute { mem, fields });
        } else if let Some(mem_pool_name) = tags.get("mem_pool_name") {
            buckets.mem_pool_names.push(MemPoolNameAttribute {
                mem_pool_name,
                fields,
            });
        } else if let Some(cpu) = tags.get("cpu") {
            buckets.cpus.push(CpuAttribute { cpu, fields });
        }

        buckets.all.push(AllAttribute { tags: own, fields });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricData;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn device_tags() -> Vec<String> {
        tags(&[
            "device_namespace:default",
            "snmp_device:10.0.0.1",
            "snmp_profile:cisco",
            "ip:10.0.0.1",
            "agent_host:edge-1",
            "agent_version:0.1.0",
        ])
    }

    fn with(extra: &[&str]) -> Vec<String> {
        let mut t = device_tags();
        t.extend(tags(extra));
        t
    }

    #[test]
    fn test_tags_hash_is_order_independent() {
        let a = tags(&["interface:eth0", "ip:10.0.0.1"]);
        let b = tags(&["ip:10.0.0.1", "interface:eth0"]);
        assert_eq!(tags_hash(&a), tags_hash(&b));

        let superset = tags(&["ip:10.0.0.1", "interface:eth0", "interface_alias:uplink"]);
        assert_ne!(tags_hash(&a), tags_hash(&superset));

        // concatenation without a separator would collide here
        assert_ne!(
            tags_hash(&tags(&["a:b", "c"])),
            tags_hash(&tags(&["a:bc"]))
        );
    }

    #[test]
    fn test_duplicate_name_keeps_max() {
        let mut datas = MetricDatas::default();
        datas.push(MetricData::new("ifInErrors", 3.0, with(&["interface:eth0"])));
        datas.push(MetricData::new("ifInErrors", 9.0, with(&["interface:eth0"])));
        datas.push(MetricData::new("ifInErrors", 5.0, with(&["interface:eth0"])));
        calc_tags_hash(&mut datas);

        let rows = aggregate_hash(&datas);
        assert_eq!(rows.len(), 1);
        let row = rows.values().next().unwrap();
        assert_eq!(row.fields["ifInErrors"], 9.0);
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("ifBandwidthInUsage.rate"), "ifBandwidthInUsageRate");
        assert_eq!(normalize_key("memory.usage"), "memoryUsage");
        assert_eq!(normalize_key("cpu.usage_total.x"), "cpu_usage_total_x");
        assert_eq!(normalize_key("sysUpTimeInstance"), "sysUpTimeInstance");
    }

    #[test]
    fn test_style_tags_drops_agent_identity() {
        let styled = style_tags(&tags(&["agent_host:edge-1", "ip:10.0.0.1", "broken", "url:a:b"]));
        assert_eq!(styled.len(), 2);
        assert_eq!(styled["ip"], "10.0.0.1");
        assert_eq!(styled["url"], "a:b");
    }

    #[test]
    fn test_metric_rows() {
        let mut datas = MetricDatas::default();
        datas.push(MetricData::new("sysUpTimeInstance", 42.0, device_tags()));
        datas.push(MetricData::new("ifHCInOctets", 10.0, with(&["interface:eth0"])));
        datas.push(MetricData::new(
            "ifBandwidthInUsage.rate",
            50.0,
            with(&["interface:eth0"]),
        ));

        let rows = Aggregator::default().metric_rows(datas);
        assert_eq!(rows.len(), 2);
        let iface = rows
            .iter()
            .find(|r| r.tags.contains_key("interface"))
            .unwrap();
        assert_eq!(iface.tags["host"], "10.0.0.1");
        assert_eq!(iface.tags["name"], "10.0.0.1");
        assert!(!iface.tags.contains_key("agent_host"));
        assert_eq!(iface.fields["ifBandwidthInUsageRate"], FieldValue::Float(50.0));
    }

    #[test]
    fn test_picking_filters_rows() {
        let mut datas = MetricDatas::default();
        datas.push(MetricData::new("sysUpTimeInstance", 42.0, device_tags()));
        datas.push(MetricData::new("memory.usage", 30.0, with(&["mem:0"])));

        let picking: HashSet<String> = ["memoryUsage".to_string()].into_iter().collect();
        let rows = Aggregator::new(HashSet::new(), Some(picking)).metric_rows(datas);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].tags["mem"], "0");
    }

    #[test]
    fn test_object_row_buckets() {
        let mut datas = MetricDatas::default();
        datas.push(MetricData::new("sysUpTimeInstance", 42.0, with(&["site:ams"])));
        datas.push(MetricData::new(
            "ifHCInOctets",
            10.0,
            with(&["site:ams", "interface:eth0", "interface_alias:uplink"]),
        ));
        datas.push(MetricData::new("cpu.usage", 12.0, with(&["site:ams", "cpu:1"])));

        let custom: HashSet<String> = ["site".to_string()].into_iter().collect();
        let aggregator = Aggregator::new(custom, None);
        let meta = vec!["{\"a\":1}".to_string(), "{\"b\":2}".to_string()];
        let row = aggregator.object_row(datas, &with(&["site:ams"]), &meta);

        assert_eq!(row.tags["host"], "10.0.0.1");
        assert_eq!(row.tags["snmp_profile"], "cisco");
        assert_eq!(row.tags["site"], "ams");
        assert!(!row.tags.contains_key("interface"));
        assert_eq!(
            row.fields["device_meta"],
            FieldValue::Str("{\"a\":1}, {\"b\":2}".into())
        );

        let FieldValue::Str(interfaces) = &row.fields["interfaces"] else {
            panic!("interfaces not a string");
        };
        let interfaces: serde_json::Value = serde_json::from_str(interfaces).unwrap();
        assert_eq!(interfaces[0]["interface"], "eth0");
        assert_eq!(interfaces[0]["interface_alias"], "uplink");
        assert_eq!(interfaces[0]["fields"]["ifHCInOctets"], 10.0);

        let FieldValue::Str(all) = &row.fields["all"] else {
            panic!("all not a string");
        };
        let all: serde_json::Value = serde_json::from_str(all).unwrap();
        // the device row carries non-reserved namespace tags too
        assert_eq!(all.as_array().unwrap().len(), 3);
        assert!(all[0]["tags"].get("site").is_none());
    }

    #[test]
    fn test_object_row_without_samples_keeps_identity() {
        let row = Aggregator::default().object_row(MetricDatas::default(), &device_tags(), &[]);
        assert_eq!(row.tags["ip"], "10.0.0.1");
        assert_eq!(row.tags["host"], "10.0.0.1");
        assert_eq!(row.fields["interfaces"], FieldValue::Str("[]".into()));
    }
}
