//! Device and resource metadata documents for object points

use super::report::{process_value, row_tags};
use crate::fetch::ResultValueStore;
use crate::models::DeviceStatus;
use crate::profile::definition::{is_scalar_resource, MetadataConfig, MetadataField, SymbolConfig};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

/// Identity of the device a metadata document describes
#[derive(Debug, Clone)]
pub struct DeviceInfo<'a> {
    pub ip: String,
    pub status: DeviceStatus,
    pub profile: &'a str,
    pub subnet: &'a str,
    pub namespace: &'a str,
    pub tags: &'a [String],
}

fn symbol_value(store: &ResultValueStore, symbol: &SymbolConfig, index: Option<&str>) -> Option<String> {
    let raw = match index {
        None => store.get_scalar_value(&symbol.oid).ok()?,
        Some(index) => store.get_column_values(&symbol.oid).ok()?.get(index)?,
    };
    let value = process_value(raw, symbol).ok()?;
    if symbol.format.is_empty() {
        Some(value.to_string())
    } else {
        value.format(&symbol.format).ok()
    }
}

fn field_value(store: &ResultValueStore, field: &MetadataField, index: Option<&str>) -> Option<String> {
    if !field.value.is_empty() {
        return Some(field.value.clone());
    }
    if !field.symbol.oid.is_empty() {
        if let Some(value) = symbol_value(store, &field.symbol, index) {
            return Some(value);
        }
    }
    field
        .symbols
        .iter()
        .find_map(|symbol| symbol_value(store, symbol, index))
}

/// One JSON document for the device, then one per row of each column resource
pub fn build_metadata(
    store: &ResultValueStore,
    metadata: &MetadataConfig,
    info: &DeviceInfo<'_>,
) -> Vec<String> {
    let mut documents = Vec::new();

    let mut device = Map::new();
    for (name, resource) in metadata.iter().filter(|(name, _)| is_scalar_resource(name)) {
        for (field, config) in &resource.fields {
            if let Some(value) = field_value(store, config, None) {
                device.insert(field.clone(), Value::String(value));
            }
        }
        let id_tags: Vec<String> = resource
            .id_tags
            .iter()
            .filter_map(|tag| {
                symbol_value(store, &tag.symbol, None).map(|v| format!("{}:{}", tag.tag, v))
            })
            .collect();
        if !id_tags.is_empty() {
            device.insert(format!("{}_id_tags", name), json!(id_tags));
        }
    }
    device.insert("ip_address".into(), json!(info.ip));
    device.insert(
        "status".into(),
        json!(match info.status {
            DeviceStatus::Reachable => "reachable",
            DeviceStatus::Unreachable => "unreachable",
        }),
    );
    device.insert("profile".into(), json!(info.profile));
    device.insert("subnet".into(), json!(info.subnet));
    device.insert("namespace".into(), json!(info.namespace));
    device.insert("tags".into(), json!(info.tags));
    documents.push(Value::Object(device).to_string());

    for (name, resource) in metadata.iter().filter(|(name, _)| !is_scalar_resource(name)) {
        let columns = resource
            .fields
            .values()
            .flat_map(|f| std::iter::once(&f.symbol).chain(f.symbols.iter()))
            .chain(resource.id_tags.iter().map(|t| &t.symbol))
            .filter(|s| !s.oid.is_empty());
        let mut indexes: BTreeSet<String> = BTreeSet::new();
        for symbol in columns {
            if let Ok(rows) = store.get_column_values(&symbol.oid) {
                indexes.extend(rows.keys().cloned());
            }
        }
        let mut indexes: Vec<String> = indexes.into_iter().collect();
        indexes.sort_by(|a, b| crate::oid::compare(a, b));

        for index in indexes {
            let mut row = Map::new();
            row.insert("resource".into(), json!(name));
            row.insert("index".into(), json!(index));
            for (field, config) in &resource.fields {
                if let Some(value) = field_value(store, config, Some(&index)) {
                    row.insert(field.clone(), Value::String(value));
                }
            }
            row.insert("id_tags".into(), json!(row_tags(&resource.id_tags, &index, store)));
            documents.push(Value::Object(row).to_string());
        }
    }

    documents
}
