//! sysObjectID based profile detection

use super::ProfileDefinitionMap;
use crate::error::ProfileError;
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

const WILDCARD: i64 = -2;
const SINGLE_WILDCARD: i64 = -1;

/// Glob match where `*` is any run and `?` any single character
pub fn pattern_matches(pattern: &str, sys_object_id: &str) -> bool {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re)
        .map(|re| re.is_match(sys_object_id))
        .unwrap_or(false)
}

/// Numeric parts of a pattern, wildcards sorting below every number and
/// `*` below `?`
fn pattern_specificity(pattern: &str) -> Result<Vec<i64>, ProfileError> {
    crate::oid::normalize(pattern)
        .split('.')
        .map(|part| {
            if part.contains('*') {
                Ok(WILDCARD)
            } else if part.contains('?') {
                Ok(SINGLE_WILDCARD)
            } else {
                part.parse::<i64>().map_err(|_| ProfileError::InvalidPattern {
                    part: part.to_string(),
                    pattern: pattern.to_string(),
                })
            }
        })
        .collect()
}

/// Longer patterns win; equal lengths compare part by part
pub fn most_specific_oid<'a>(patterns: &[&'a str]) -> Result<&'a str, ProfileError> {
    let mut best: Option<(&str, Vec<i64>)> = None;
    for &pattern in patterns {
        let parts = pattern_specificity(pattern)?;
        let better = match &best {
            None => true,
            Some((_, current)) => {
                parts.len() > current.len() || (parts.len() == current.len() && parts > *current)
            }
        };
        if better {
            best = Some((pattern, parts));
        }
    }
    best.map(|(pattern, _)| pattern)
        .ok_or_else(|| ProfileError::NoMatch(String::new()))
}

/// Name of the profile whose patterns match `sys_object_id` most specifically
pub fn profile_for_sys_object_id(
    profiles: &ProfileDefinitionMap,
    sys_object_id: &str,
) -> Result<String, ProfileError> {
    let sys_object_id = crate::oid::normalize(sys_object_id);
    let mut names: Vec<&String> = profiles.keys().collect();
    names.sort();

    let mut owner: HashMap<&str, &str> = HashMap::new();
    let mut matched: Vec<&str> = Vec::new();
    for name in names {
        for pattern in &profiles[name].definition.sys_object_ids {
            if !pattern_matches(pattern, sys_object_id) {
                continue;
            }
            if let Some(previous) = owner.get(pattern.as_str()) {
                return Err(ProfileError::DuplicateSysObjectId {
                    profile: name.clone(),
                    pattern: pattern.clone(),
                    previous: previous.to_string(),
                });
            }
            owner.insert(pattern, name);
            matched.push(pattern);
        }
    }

    if matched.is_empty() {
        return Err(ProfileError::NoMatch(sys_object_id.to_string()));
    }
    let pattern = most_specific_oid(&matched)?;
    debug!(sys_object_id = %sys_object_id, pattern = %pattern, "Matched sysObjectID");
    Ok(owner[pattern].to_string())
}
