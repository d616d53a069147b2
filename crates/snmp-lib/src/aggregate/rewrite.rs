//! User renames and tag filtering applied to emitted points

use crate::config::SnmpConfig;
use crate::error::ConfigError;
use crate::models::{MetricDatas, TagField};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};

/// Compile one `tags_ignore_regexp` entry
pub fn compile_ignore_rule(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|_| ConfigError::InvalidRegex {
        field: "tags_ignore_regexp",
        pattern: pattern.to_string(),
    })
}

/// Renames sample names and tag keys, drops ignored tags.
///
/// Field names resolve through `oid_keys` by source OID first, then through
/// `key_mapping` by name. Tag keys resolve through `key_mapping` only.
#[derive(Debug, Clone, Default)]
pub struct KeyRewriter {
    key_mapping: BTreeMap<String, String>,
    oid_keys: BTreeMap<String, String>,
    tags_ignore: HashSet<String>,
    tags_ignore_rules: Vec<Regex>,
}

impl KeyRewriter {
    pub fn from_config(config: &SnmpConfig) -> Result<Self, ConfigError> {
        let tags_ignore_rules = config
            .tags_ignore_regexp
            .iter()
            .map(|p| compile_ignore_rule(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            key_mapping: config.key_mapping.clone(),
            oid_keys: config
                .oid_keys
                .iter()
                .map(|(oid, name)| (crate::oid::normalize(oid).to_string(), name.clone()))
                .collect(),
            tags_ignore: config.tags_ignore.iter().cloned().collect(),
            tags_ignore_rules,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.key_mapping.is_empty()
            && self.oid_keys.is_empty()
            && self.tags_ignore.is_empty()
            && self.tags_ignore_rules.is_empty()
    }

    pub fn field_name<'a>(&'a self, name: &'a str, oid: &str) -> &'a str {
        if !oid.is_empty() {
            if let Some(mapped) = self.oid_keys.get(crate::oid::normalize(oid)) {
                return mapped;
            }
        }
        self.tag_name(name)
    }

    pub fn tag_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.key_mapping.get(key).map(String::as_str).unwrap_or(key)
    }

    pub fn is_ignored(&self, key: &str) -> bool {
        self.tags_ignore.contains(key) || self.tags_ignore_rules.iter().any(|r| r.is_match(key))
    }

    /// Rename samples in place; runs after derived metrics are computed
    pub fn rename_samples(&self, datas: &mut MetricDatas) {
        if self.is_empty() {
            return;
        }
        for data in &mut datas.data {
            let renamed = self.field_name(&data.name, &data.oid).to_string();
            data.name = renamed;
        }
    }

    /// Drop ignored tags, then rename the rest.
    ///
    /// A tag is dropped when either its key or its renamed key is ignored.
    pub fn rewrite_tags(&self, row: TagField) -> TagField {
        if self.is_empty() {
            return row;
        }
        let tags = row
            .tags
            .into_iter()
            .filter_map(|(key, value)| {
                let renamed = self.tag_name(&key);
                if self.is_ignored(&key) || self.is_ignored(renamed) {
                    return None;
                }
                Some((renamed.to_string(), value))
            })
            .collect();
        TagField {
            tags,
            fields: row.fields,
        }
    }
}
