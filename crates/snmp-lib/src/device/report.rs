//! Turning fetched values into metric samples

use crate::aggregate::derived::{self, ColumnSamples, ScalarSamples};
use crate::error::FetchError;
use crate::fetch::{ResultValue, ResultValueStore};
use crate::models::{MetricData, MetricDatas};
use crate::profile::definition::{
    IndexTransform, MetricTagConfig, MetricsConfig, MetricsConfigOption, SymbolConfig,
};
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

/// Apply extract_value, then match_pattern, then scale_factor
pub fn process_value(value: &ResultValue, symbol: &SymbolConfig) -> Result<ResultValue, FetchError> {
    let mut value = value.clone();
    if let Some(pattern) = &symbol.extract_value_compiled {
        value = value.extract_string_value(pattern)?;
    }
    if let Some(pattern) = &symbol.match_pattern_compiled {
        let src = value.to_string();
        if !pattern.is_match(&src) {
            return Err(FetchError::Value(format!(
                "match pattern `{}` does not match string `{}`",
                symbol.match_pattern, src
            )));
        }
        let replaced = regex_replace_value(&src, pattern, &symbol.match_value);
        if replaced.is_empty() {
            return Err(FetchError::Value(format!(
                "the pattern `{}` matched value `{}`, but template `{}` is not compatible",
                symbol.match_pattern, src, symbol.match_value
            )));
        }
        value = ResultValue::text(replaced);
    }
    if symbol.scale_factor != 0.0 {
        value = ResultValue::number(value.to_float()? * symbol.scale_factor);
    }
    Ok(value)
}

/// Expand `template` with the first match of `pattern` in `value`.
///
/// `\1` style references are accepted next to `$1`.
pub fn regex_replace_value(value: &str, pattern: &Regex, template: &str) -> String {
    let template = normalize_template(template);
    let mut out = String::new();
    if let Some(captures) = pattern.captures(value) {
        captures.expand(&template, &mut out);
    }
    out
}

fn normalize_template(template: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek().is_some_and(|n| n.is_ascii_digit()) {
            let mut digits = String::new();
            while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                digits.push(d);
                chars.next();
            }
            out.push_str(&format!("${{{}}}", digits));
        } else {
            out.push(c);
        }
    }
    out
}

fn mapped_value<'a>(value: &str, mapping: &'a HashMap<String, String>) -> Option<&'a str> {
    let mapped = mapping.get(value).map(String::as_str);
    if mapped.is_none() {
        debug!(value = %value, "No mapping for tag value");
    }
    mapped
}

/// Tags produced by one metric tag for a value
pub fn tags_from_value(tag: &MetricTagConfig, value: &str) -> Vec<String> {
    if !tag.tag.is_empty() {
        let value = if tag.mapping.is_empty() {
            value
        } else {
            match mapped_value(value, &tag.mapping) {
                Some(mapped) => mapped,
                None => return Vec::new(),
            }
        };
        return vec![format!("{}:{}", tag.tag, value)];
    }

    let Some(pattern) = &tag.pattern else {
        return Vec::new();
    };
    if !pattern.is_match(value) {
        return Vec::new();
    }
    tag.tags
        .iter()
        .filter_map(|(key, template)| {
            let replaced = regex_replace_value(value, pattern, template);
            (!replaced.is_empty()).then(|| format!("{}:{}", key, replaced))
        })
        .collect()
}

/// Tags of scalar metric tags, evaluated against fetched scalars
pub fn global_metric_tags(metric_tags: &[MetricTagConfig], values: &ResultValueStore) -> Vec<String> {
    let mut tags = Vec::new();
    for tag in metric_tags {
        let value = match values
            .get_scalar_value(&tag.symbol.oid)
            .and_then(|v| process_value(v, &tag.symbol))
        {
            Ok(value) => value,
            Err(e) => {
                debug!(tag = %tag.tag, error = %e, "Skipping global metric tag");
                continue;
            }
        };
        tags.extend(tags_from_value(tag, &value.to_string()));
    }
    tags
}

/// Apply index transforms, `None` when a slice runs past the index
fn transform_index(indexes: &[&str], rules: &[IndexTransform]) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for rule in rules {
        if rule.end >= indexes.len() || rule.start > rule.end {
            return None;
        }
        parts.extend_from_slice(&indexes[rule.start..=rule.end]);
    }
    Some(parts.join("."))
}

/// Row tags for `full_index` from a table's metric tags
pub fn row_tags(
    metric_tags: &[MetricTagConfig],
    full_index: &str,
    values: &ResultValueStore,
) -> Vec<String> {
    let indexes: Vec<&str> = full_index.split('.').collect();
    let mut tags = Vec::new();
    for tag in metric_tags {
        if tag.index > 0 {
            match indexes.get(tag.index - 1) {
                Some(part) => {
                    let value = if tag.mapping.is_empty() {
                        Some(*part)
                    } else {
                        mapped_value(part, &tag.mapping)
                    };
                    if let Some(value) = value {
                        tags.push(format!("{}:{}", tag.tag, value));
                    }
                }
                None => debug!(index = tag.index, full_index = %full_index, "Index not found"),
            }
        }

        if !tag.symbol.oid.is_empty() {
            let Ok(column) = values.get_column_values(&tag.symbol.oid) else {
                continue;
            };
            let lookup = if tag.index_transform.is_empty() {
                Some(full_index.to_string())
            } else {
                transform_index(&indexes, &tag.index_transform)
            };
            let Some(raw) = lookup.as_deref().and_then(|i| column.get(i)) else {
                continue;
            };
            match process_value(raw, &tag.symbol) {
                Ok(value) => tags.extend(tags_from_value(tag, &value.to_string())),
                Err(e) => debug!(tag = %tag.tag, error = %e, "Skipping column tag"),
            }
        }
    }
    tags
}

fn flag_stream_value(placement: usize, value: &str) -> Result<f64, String> {
    let bit = placement
        .checked_sub(1)
        .and_then(|i| value.as_bytes().get(i))
        .ok_or_else(|| format!("flag stream index `{}` not found in `{}`", placement, value))?;
    match bit {
        b'1' => Ok(1.0),
        b'0' => Ok(0.0),
        _ => Err(format!("flag stream value `{}` is not valid", value)),
    }
}

/// Samples emitted for one value according to `forced_type`
fn emit(
    name: &str,
    value: &ResultValue,
    forced_type: &str,
    options: &MetricsConfigOption,
    tags: &[String],
) -> Vec<MetricData> {
    if forced_type == "flag_stream" {
        return match flag_stream_value(options.placement, &value.to_string()) {
            Ok(flag) => vec![MetricData::new(
                format!("{}.{}", name, options.metric_suffix),
                flag,
                tags.to_vec(),
            )],
            Err(e) => {
                debug!(metric = %name, error = %e, "Skipping flag stream");
                Vec::new()
            }
        };
    }

    let number = match value.to_float() {
        Ok(n) => n,
        Err(e) => {
            debug!(metric = %name, error = %e, "Skipping non numeric value");
            return Vec::new();
        }
    };
    match forced_type {
        "" | "gauge" | "counter" | "monotonic_count" => {
            vec![MetricData::new(name, number, tags.to_vec())]
        }
        "percent" => vec![MetricData::new(name, number * 100.0, tags.to_vec())],
        "monotonic_count_and_rate" => vec![
            MetricData::new(name, number, tags.to_vec()),
            MetricData::new(format!("{}.rate", name), number, tags.to_vec()),
        ],
        other => {
            debug!(metric = %name, forced_type = %other, "Unsupported forced type");
            Vec::new()
        }
    }
}

/// Record the symbol OID on the sample carrying the symbol's own name
fn tag_source(sample: MetricData, symbol: &SymbolConfig) -> MetricData {
    if sample.name == symbol.name {
        sample.with_oid(crate::oid::normalize(&symbol.oid))
    } else {
        sample
    }
}

fn with_static_tags(tags: &[String], metric: &MetricsConfig) -> Vec<String> {
    let mut out = tags.to_vec();
    out.extend(metric.static_tags.iter().cloned());
    out
}

/// All samples of one poll, plus derived bandwidth and memory usage
pub fn report_metrics(
    metrics: &[MetricsConfig],
    values: &ResultValueStore,
    tags: &[String],
) -> MetricDatas {
    let mut out = MetricDatas::default();
    let mut scalar_samples = ScalarSamples::new();
    let mut column_samples = ColumnSamples::new();

    for metric in metrics {
        if metric.is_scalar() {
            let symbol = &metric.symbol;
            let value = match values
                .get_scalar_value(&symbol.oid)
                .and_then(|v| process_value(v, symbol))
            {
                Ok(value) => value,
                Err(e) => {
                    debug!(metric = %symbol.name, error = %e, "Skipping scalar metric");
                    continue;
                }
            };
            let sample_tags = with_static_tags(tags, metric);
            for sample in emit(&symbol.name, &value, &metric.forced_type, &metric.options, &sample_tags) {
                let sample = tag_source(sample, symbol);
                if derived::is_dependency(&sample.name) {
                    scalar_samples.insert(sample.name.clone(), sample.clone());
                }
                out.push(sample);
            }
        } else if metric.is_column() {
            report_column_metric(metric, values, tags, &mut out, &mut column_samples);
        }
    }

    match derived::memory_usage(&scalar_samples, &column_samples) {
        Ok(samples) => samples.into_iter().for_each(|s| out.push(s)),
        Err(e) => debug!(error = %e, "Memory usage not derived"),
    }
    out
}

fn report_column_metric(
    metric: &MetricsConfig,
    values: &ResultValueStore,
    tags: &[String],
    out: &mut MetricDatas,
    column_samples: &mut ColumnSamples,
) {
    let mut row_tags_cache: HashMap<String, Vec<String>> = HashMap::new();
    for symbol in &metric.symbols {
        let Ok(indexes) = values.get_column_indexes(&symbol.oid) else {
            debug!(metric = %symbol.name, "Column not found in results");
            continue;
        };
        let Ok(column) = values.get_column_values(&symbol.oid) else {
            continue;
        };
        for index in indexes {
            let Some(raw) = column.get(&index) else {
                continue;
            };
            let value = match process_value(raw, symbol) {
                Ok(value) => value,
                Err(e) => {
                    debug!(metric = %symbol.name, index = %index, error = %e, "Skipping row");
                    continue;
                }
            };
            let sample_tags = row_tags_cache
                .entry(index.clone())
                .or_insert_with(|| {
                    let mut t = with_static_tags(tags, metric);
                    t.extend(row_tags(&metric.metric_tags, &index, values));
                    t
                })
                .clone();

            for sample in emit(&symbol.name, &value, &metric.forced_type, &metric.options, &sample_tags) {
                let sample = tag_source(sample, symbol);
                if derived::is_dependency(&sample.name) {
                    column_samples
                        .entry(sample.name.clone())
                        .or_default()
                        .insert(index.clone(), sample.clone());
                }
                out.push(sample);
            }

            if let Ok(octets) = value.to_float() {
                match derived::bandwidth_usage(&symbol.name, &index, octets, values, &sample_tags) {
                    Ok(Some(usage)) => out.push(usage),
                    Ok(None) => {}
                    Err(e) => debug!(error = %e, "Bandwidth usage not derived"),
                }
            }
        }
    }
}
