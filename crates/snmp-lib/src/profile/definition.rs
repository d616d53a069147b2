//! Declarative profile types as read from YAML
//!
//! Raw YAML is deserialized into these structs, normalized (legacy forms are
//! folded into the current ones) and validated, which also compiles every
//! regex once. Compiled regexes live next to their source text and are never
//! serialized.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// One OID with the name it is reported under
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolConfig {
    #[serde(rename = "OID", default)]
    pub oid: String,
    #[serde(default)]
    pub name: String,
    /// Regex whose first group replaces the raw value
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub extract_value: String,
    /// Regex tested against the raw value; `match_value` is its template
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub match_pattern: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub match_value: String,
    /// Multiplier applied when non-zero
    #[serde(default, skip_serializing_if = "is_zero")]
    pub scale_factor: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,

    #[serde(skip)]
    pub extract_value_compiled: Option<Regex>,
    #[serde(skip)]
    pub match_pattern_compiled: Option<Regex>,
}

fn is_zero(v: &f64) -> bool {
    *v == 0.0
}

impl SymbolConfig {
    pub fn new(oid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            oid: oid.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.oid.is_empty() && self.name.is_empty()
    }
}

impl fmt::Display for SymbolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{name={} oid={}}}", self.name, self.oid)
    }
}

/// Inclusive slice of index components
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexTransform {
    pub start: usize,
    pub end: usize,
}

/// A tag derived from an index component, a column value or a scalar value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricTagConfig {
    #[serde(default)]
    pub tag: String,
    /// 1-based index component, 0 when unused
    #[serde(default)]
    pub index: usize,
    /// Deprecated spelling of `symbol` for table tags
    #[serde(default, skip_serializing_if = "SymbolConfig::is_empty")]
    pub column: SymbolConfig,
    /// Legacy scalar OID, moved into `symbol.oid` on normalization
    #[serde(rename = "OID", default, skip_serializing_if = "String::is_empty")]
    pub oid: String,
    #[serde(default, deserialize_with = "symbol_compat")]
    pub symbol: SymbolConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub index_transform: Vec<IndexTransform>,
    #[serde(default, deserialize_with = "scalar_map", skip_serializing_if = "HashMap::is_empty")]
    pub mapping: HashMap<String, String>,
    #[serde(rename = "match", default, skip_serializing_if = "String::is_empty")]
    pub match_pattern: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,

    #[serde(skip)]
    pub pattern: Option<Regex>,
}

/// Emission options for `flag_stream`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfigOption {
    #[serde(default)]
    pub placement: usize,
    #[serde(default)]
    pub metric_suffix: String,
}

/// A scalar metric or a table of column metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(rename = "MIB", default, skip_serializing_if = "String::is_empty")]
    pub mib: String,
    #[serde(default, skip_serializing_if = "SymbolConfig::is_empty")]
    pub table: SymbolConfig,
    #[serde(default, skip_serializing_if = "SymbolConfig::is_empty")]
    pub symbol: SymbolConfig,
    /// Legacy scalar form: `OID` + `name` at the metric level
    #[serde(rename = "OID", default, skip_serializing_if = "String::is_empty")]
    pub oid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbols: Vec<SymbolConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub static_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metric_tags: Vec<MetricTagConfig>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub forced_type: String,
    #[serde(default)]
    pub options: MetricsConfigOption,
}

impl MetricsConfig {
    pub fn is_scalar(&self) -> bool {
        !self.symbol.oid.is_empty()
    }

    pub fn is_column(&self) -> bool {
        !self.symbols.is_empty()
    }
}

/// One metadata field, resolved from a symbol, a list of symbols or a constant
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataField {
    #[serde(default, skip_serializing_if = "SymbolConfig::is_empty")]
    pub symbol: SymbolConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbols: Vec<SymbolConfig>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
}

/// Fields and identifying tags of one metadata resource
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataResourceConfig {
    #[serde(default)]
    pub fields: BTreeMap<String, MetadataField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub id_tags: Vec<MetricTagConfig>,
}

/// Resource name -> resource config
pub type MetadataConfig = BTreeMap<String, MetadataResourceConfig>;

/// Name of the only scalar metadata resource
pub const DEVICE_RESOURCE: &str = "device";

/// Scalar resources are fetched with get, the rest are walked
pub fn is_scalar_resource(resource: &str) -> bool {
    resource == DEVICE_RESOURCE
}

/// Device signature
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceMeta {
    #[serde(default)]
    pub vendor: String,
}

/// A complete profile
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileDefinition {
    #[serde(default)]
    pub metrics: Vec<MetricsConfig>,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub metric_tags: Vec<MetricTagConfig>,
    #[serde(default)]
    pub static_tags: Vec<String>,
    #[serde(default)]
    pub extends: Vec<String>,
    #[serde(default)]
    pub device: DeviceMeta,
    #[serde(rename = "sysobjectid", default, deserialize_with = "string_or_list")]
    pub sys_object_ids: Vec<String>,
}

/// Accept `symbol: name` as well as `symbol: {OID, name}`
fn symbol_compat<'de, D>(deserializer: D) -> Result<SymbolConfig, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Compat {
        Name(String),
        Full(SymbolConfig),
    }

    Ok(match Compat::deserialize(deserializer)? {
        Compat::Name(name) => SymbolConfig {
            name,
            ..Default::default()
        },
        Compat::Full(symbol) => symbol,
    })
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}

/// YAML mappings are often keyed by integers (`1: ipv4`)
fn scalar_map<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize, PartialEq, Eq, Hash)]
    #[serde(untagged)]
    enum Scalar {
        Int(i64),
        Bool(bool),
        Str(String),
    }

    impl Scalar {
        fn into_string(self) -> String {
            match self {
                Scalar::Int(i) => i.to_string(),
                Scalar::Bool(b) => b.to_string(),
                Scalar::Str(s) => s,
            }
        }
    }

    let raw = Option::<HashMap<Scalar, Scalar>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .map(|(k, v)| (k.into_string(), v.into_string()))
        .collect())
}

/// Fold the legacy `OID` + `name` metric form into `symbol`
pub fn normalize_metrics(metrics: &mut [MetricsConfig]) {
    for metric in metrics.iter_mut() {
        if !metric.oid.is_empty() && metric.symbol.oid.is_empty() {
            metric.symbol.oid = std::mem::take(&mut metric.oid);
        }
        if !metric.name.is_empty() && metric.symbol.name.is_empty() {
            metric.symbol.name = std::mem::take(&mut metric.name);
        }
    }
}

/// Validate metrics, normalize their tags and compile regexes
pub fn validate_enrich_metrics(metrics: &mut [MetricsConfig]) -> Vec<String> {
    let mut errors = Vec::new();
    for metric in metrics.iter_mut() {
        if !metric.is_scalar() && !metric.is_column() {
            errors.push(format!(
                "either a table symbol or a scalar symbol must be provided: {}",
                describe_metric(metric)
            ));
        }
        if metric.is_scalar() && metric.is_column() {
            errors.push(format!(
                "table symbol and scalar symbol cannot be both provided: {}",
                describe_metric(metric)
            ));
        }
        if metric.is_scalar() {
            errors.extend(validate_enrich_symbol(&mut metric.symbol));
        }
        if metric.is_column() {
            for symbol in metric.symbols.iter_mut() {
                errors.extend(validate_enrich_symbol(symbol));
            }
            if metric.metric_tags.is_empty() {
                let names: Vec<String> = metric.symbols.iter().map(|s| s.to_string()).collect();
                errors.push(format!(
                    "column symbols [{}] doesn't have a 'metric_tags' section, all its metrics will use the same tags; \
                     please add at least one discriminating metric tag (such as a row index) to ensure metrics of all rows are submitted",
                    names.join(" ")
                ));
            }
            for tag in metric.metric_tags.iter_mut() {
                errors.extend(validate_enrich_metric_tag(tag));
            }
        }
    }
    errors
}

/// Validate global (scalar) metric tags
pub fn validate_enrich_metric_tags(tags: &mut [MetricTagConfig]) -> Vec<String> {
    tags.iter_mut().flat_map(validate_enrich_metric_tag).collect()
}

/// Validate id tags and field symbols of every metadata resource
pub fn validate_enrich_metadata(metadata: &mut MetadataConfig) -> Vec<String> {
    let mut errors = Vec::new();
    for resource in metadata.values_mut() {
        for field in resource.fields.values_mut() {
            if !field.symbol.is_empty() {
                errors.extend(validate_enrich_symbol(&mut field.symbol));
            }
            for symbol in field.symbols.iter_mut() {
                errors.extend(validate_enrich_symbol(symbol));
            }
        }
        for tag in resource.id_tags.iter_mut() {
            errors.extend(validate_enrich_metric_tag(tag));
        }
    }
    errors
}

fn describe_metric(metric: &MetricsConfig) -> String {
    format!(
        "MIB={} table={} symbol={} symbols={}",
        metric.mib,
        metric.table,
        metric.symbol,
        metric.symbols.len()
    )
}

fn validate_enrich_symbol(symbol: &mut SymbolConfig) -> Vec<String> {
    let mut errors = Vec::new();
    if symbol.name.is_empty() {
        errors.push(format!(
            "symbol name missing: name=`{}` oid=`{}`",
            symbol.name, symbol.oid
        ));
    }
    if symbol.oid.is_empty() {
        errors.push(format!(
            "symbol oid missing: name=`{}` oid=`{}`",
            symbol.name, symbol.oid
        ));
    }
    if !symbol.extract_value.is_empty() {
        match Regex::new(&symbol.extract_value) {
            Ok(re) => symbol.extract_value_compiled = Some(re),
            Err(e) => errors.push(format!(
                "cannot compile `extract_value` ({}): {}",
                symbol.extract_value, e
            )),
        }
    }
    if !symbol.match_pattern.is_empty() {
        match Regex::new(&symbol.match_pattern) {
            Ok(re) => symbol.match_pattern_compiled = Some(re),
            Err(e) => errors.push(format!(
                "cannot compile `match_pattern` ({}): {}",
                symbol.match_pattern, e
            )),
        }
    }
    errors
}

fn validate_enrich_metric_tag(tag: &mut MetricTagConfig) -> Vec<String> {
    let mut errors = Vec::new();
    if !tag.column.is_empty() && !tag.symbol.is_empty() {
        errors.push(format!(
            "metric tag symbol and column cannot be both declared: symbol={}, column={}",
            tag.symbol, tag.column
        ));
    }
    if !tag.column.is_empty() {
        tag.symbol = std::mem::take(&mut tag.column);
    }
    if !tag.oid.is_empty() && !tag.symbol.oid.is_empty() {
        errors.push(format!(
            "metric tag OID and symbol.OID cannot be both declared: OID={}, symbol.OID={}",
            tag.oid, tag.symbol.oid
        ));
    }
    if !tag.oid.is_empty() && tag.symbol.oid.is_empty() {
        tag.symbol.oid = std::mem::take(&mut tag.oid);
    }
    if !tag.symbol.is_empty() {
        errors.extend(validate_enrich_symbol(&mut tag.symbol));
    }
    if !tag.match_pattern.is_empty() {
        match Regex::new(&tag.match_pattern) {
            Ok(re) => tag.pattern = Some(re),
            Err(e) => errors.push(format!(
                "cannot compile `match` (`{}`): {}",
                tag.match_pattern, e
            )),
        }
        if tag.tags.is_empty() {
            errors.push(format!(
                "`tags` mapping must be provided if `match` (`{}`) is defined",
                tag.match_pattern
            ));
        }
    }
    for transform in &tag.index_transform {
        if transform.start > transform.end {
            errors.push(format!(
                "transform rule end should be greater than start. Invalid rule: {:?}",
                transform
            ));
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> ProfileDefinition {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_parse_full_profile() {
        let def = parse(
            r#"
extends:
  - _base.yaml
device:
  vendor: cisco
sysobjectid: 1.3.6.1.4.1.9.*
metrics:
  - MIB: IF-MIB
    table:
      OID: 1.3.6.1.2.1.31.1.1
      name: ifXTable
    symbols:
      - OID: 1.3.6.1.2.1.31.1.1.1.6
        name: ifHCInOctets
    metric_tags:
      - tag: interface
        column:
          OID: 1.3.6.1.2.1.31.1.1.1.1
          name: ifName
  - OID: 1.3.6.1.4.1.9.9.109.1.1.1.1.12
    name: cpmCPUMemoryUsed
metric_tags:
  - OID: 1.3.6.1.2.1.1.5.0
    symbol: sysName
    tag: snmp_host
"#,
        );
        assert_eq!(def.extends, vec!["_base.yaml"]);
        assert_eq!(def.device.vendor, "cisco");
        assert_eq!(def.sys_object_ids, vec!["1.3.6.1.4.1.9.*"]);
        assert_eq!(def.metrics.len(), 2);
        assert_eq!(def.metric_tags[0].symbol.name, "sysName");
        assert_eq!(def.metric_tags[0].oid, "1.3.6.1.2.1.1.5.0");
    }

    #[test]
    fn test_normalize_and_validate_legacy_forms() {
        let mut def = parse(
            r#"
metrics:
  - OID: 1.2.3.4.0
    name: legacyScalar
metric_tags:
  - OID: 1.3.6.1.2.1.1.5.0
    symbol: sysName
    tag: snmp_host
"#,
        );
        normalize_metrics(&mut def.metrics);
        let mut errors = validate_enrich_metrics(&mut def.metrics);
        errors.extend(validate_enrich_metric_tags(&mut def.metric_tags));

        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(def.metrics[0].symbol.oid, "1.2.3.4.0");
        assert_eq!(def.metrics[0].symbol.name, "legacyScalar");
        assert_eq!(def.metric_tags[0].symbol.oid, "1.3.6.1.2.1.1.5.0");
        assert!(def.metric_tags[0].oid.is_empty());
    }

    #[test]
    fn test_mapping_accepts_integer_keys() {
        let tag: MetricTagConfig = serde_yaml::from_str(
            r#"
index: 1
tag: ipversion
mapping:
  0: unknown
  1: ipv4
  16: dns
"#,
        )
        .unwrap();
        assert_eq!(tag.mapping["1"], "ipv4");
        assert_eq!(tag.mapping["16"], "dns");
    }

    #[test]
    fn test_validation_errors() {
        let mut metrics = vec![
            MetricsConfig::default(),
            MetricsConfig {
                symbols: vec![SymbolConfig::new("1.2.3.1", "col")],
                ..Default::default()
            },
            MetricsConfig {
                symbol: SymbolConfig {
                    oid: "1.2.3.0".into(),
                    name: "bad".into(),
                    extract_value: "(".into(),
                    ..Default::default()
                },
                ..Default::default()
            },
        ];
        let errors = validate_enrich_metrics(&mut metrics);

        assert!(errors[0].starts_with("either a table symbol or a scalar symbol must be provided"));
        assert!(errors[1].contains("doesn't have a 'metric_tags' section"));
        assert!(errors[2].starts_with("cannot compile `extract_value` (()"));
    }

    #[test]
    fn test_metric_tag_validation() {
        let mut tags = vec![
            MetricTagConfig {
                match_pattern: "(\\w)(\\w+)".into(),
                symbol: SymbolConfig::new("1.2.3", "name"),
                ..Default::default()
            },
            MetricTagConfig {
                tag: "t".into(),
                index_transform: vec![IndexTransform { start: 3, end: 1 }],
                ..Default::default()
            },
        ];
        let errors = validate_enrich_metric_tags(&mut tags);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("`tags` mapping must be provided"));
        assert!(errors[1].starts_with("transform rule end should be greater than start"));
        assert!(tags[0].pattern.is_some());
    }
}
