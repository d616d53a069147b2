//! OIDs requested from a device, derived from its metrics and metadata

use super::definition::{
    is_scalar_resource, MetadataConfig, MetadataField, MetadataResourceConfig, MetricTagConfig,
    MetricsConfig, SymbolConfig, DEVICE_RESOURCE,
};

/// Sorted, de-duplicated scalar and column OIDs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OidConfig {
    pub scalar_oids: Vec<String>,
    pub column_oids: Vec<String>,
}

impl OidConfig {
    pub fn add_scalar_oids<I: IntoIterator<Item = String>>(&mut self, oids: I) {
        self.scalar_oids.extend(oids);
        dedup_sorted(&mut self.scalar_oids);
    }

    pub fn add_column_oids<I: IntoIterator<Item = String>>(&mut self, oids: I) {
        self.column_oids.extend(oids);
        dedup_sorted(&mut self.column_oids);
    }

    pub fn clean(&mut self) {
        self.scalar_oids.clear();
        self.column_oids.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.scalar_oids.is_empty() && self.column_oids.is_empty()
    }

    /// Union of two configs
    pub fn merged(&self, other: &OidConfig) -> OidConfig {
        let mut merged = self.clone();
        merged.add_scalar_oids(other.scalar_oids.iter().cloned());
        merged.add_column_oids(other.column_oids.iter().cloned());
        merged
    }

    /// OIDs needed by metrics and metric tags
    pub fn for_metrics(metrics: &[MetricsConfig], metric_tags: &[MetricTagConfig]) -> Self {
        let mut config = OidConfig::default();
        config.add_scalar_oids(
            metrics
                .iter()
                .map(|m| m.symbol.oid.clone())
                .chain(metric_tags.iter().map(|t| t.symbol.oid.clone()))
                .filter(|oid| !oid.is_empty()),
        );
        config.add_column_oids(
            metrics
                .iter()
                .flat_map(|m| {
                    m.symbols
                        .iter()
                        .map(|s| s.oid.clone())
                        .chain(m.metric_tags.iter().map(|t| t.symbol.oid.clone()))
                })
                .filter(|oid| !oid.is_empty()),
        );
        config
    }

    /// OIDs needed by metadata resources
    pub fn for_metadata(metadata: &MetadataConfig) -> Self {
        let mut config = OidConfig::default();
        for (name, resource) in metadata {
            let oids: Vec<String> = resource
                .fields
                .values()
                .flat_map(|f| std::iter::once(&f.symbol).chain(f.symbols.iter()))
                .map(|s| s.oid.clone())
                .chain(resource.id_tags.iter().map(|t| t.symbol.oid.clone()))
                .filter(|oid| !oid.is_empty())
                .collect();
            if is_scalar_resource(name) {
                config.add_scalar_oids(oids);
            } else {
                config.add_column_oids(oids);
            }
        }
        config
    }
}

fn dedup_sorted(oids: &mut Vec<String>) {
    for oid in oids.iter_mut() {
        let normalized = crate::oid::normalize(oid);
        if normalized.len() != oid.len() {
            *oid = normalized.to_string();
        }
    }
    oids.sort_by(|a, b| crate::oid::compare(a, b));
    oids.dedup();
}

fn symbol_field(oid: &str, name: &str) -> MetadataField {
    MetadataField {
        symbol: SymbolConfig::new(oid, name),
        ..Default::default()
    }
}

/// Metadata used when a profile does not define `device` or `interface`
pub fn legacy_metadata() -> MetadataConfig {
    let mut metadata = MetadataConfig::new();

    let mut device = MetadataResourceConfig::default();
    device
        .fields
        .insert("name".into(), symbol_field("1.3.6.1.2.1.1.5.0", "sysName"));
    device
        .fields
        .insert("description".into(), symbol_field("1.3.6.1.2.1.1.1.0", "sysDescr"));
    device.fields.insert(
        "sys_object_id".into(),
        symbol_field("1.3.6.1.2.1.1.2.0", "sysObjectID"),
    );
    metadata.insert(DEVICE_RESOURCE.into(), device);

    let mut interface = MetadataResourceConfig::default();
    for (field, oid, name) in [
        ("name", "1.3.6.1.2.1.31.1.1.1.1", "ifName"),
        ("alias", "1.3.6.1.2.1.31.1.1.1.18", "ifAlias"),
        ("description", "1.3.6.1.2.1.2.2.1.2", "ifDescr"),
        ("admin_status", "1.3.6.1.2.1.2.2.1.7", "ifAdminStatus"),
        ("oper_status", "1.3.6.1.2.1.2.2.1.8", "ifOperStatus"),
    ] {
        interface.fields.insert(field.into(), symbol_field(oid, name));
    }
    let mut mac = symbol_field("1.3.6.1.2.1.2.2.1.6", "ifPhysAddress");
    mac.symbol.format = "mac_address".into();
    interface.fields.insert("mac_address".into(), mac);
    interface.id_tags.push(MetricTagConfig {
        tag: "interface".into(),
        symbol: SymbolConfig::new("1.3.6.1.2.1.31.1.1.1.1", "ifName"),
        ..Default::default()
    });
    metadata.insert("interface".into(), interface);

    metadata
}

/// Fill in legacy resources the profile does not define itself
pub fn with_legacy_fallback(mut metadata: MetadataConfig) -> MetadataConfig {
    for (name, resource) in legacy_metadata() {
        metadata.entry(name).or_insert(resource);
    }
    metadata
}
