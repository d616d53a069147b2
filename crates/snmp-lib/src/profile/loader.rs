//! Reading profile files and expanding `extends`

use super::definition::{
    normalize_metrics, validate_enrich_metadata, validate_enrich_metric_tags,
    validate_enrich_metrics, ProfileDefinition,
};
use super::{ProfileConfig, ProfileDefinitionMap};
use crate::error::ProfileError;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Load every concrete profile of `dir`
pub async fn load_profiles(dir: &Path) -> Result<ProfileDefinitionMap, ProfileError> {
    let mut entries = fs::read_dir(dir).await.map_err(|source| ProfileError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|source| ProfileError::Io {
        path: dir.to_path_buf(),
        source,
    })? {
        let path = entry.path();
        if !is_profile_file(&path) {
            continue;
        }
        let abstract_profile = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('_'))
            .unwrap_or(true);
        if abstract_profile {
            continue;
        }
        files.push(path);
    }
    files.sort();

    let mut profiles = ProfileDefinitionMap::new();
    for path in files {
        let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            warn!(path = %path.display(), "Skipping profile with non UTF-8 name");
            continue;
        };
        let definition = read_expanded_profile(dir, &path).await?;
        debug!(profile = %name, metrics = definition.metrics.len(), "Loaded profile");
        profiles.insert(
            name,
            ProfileConfig {
                definition_file: path,
                definition,
            },
        );
    }
    Ok(profiles)
}

fn is_profile_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Parse one file, merge its bases, normalize and validate the result
pub async fn read_expanded_profile(
    dir: &Path,
    path: &Path,
) -> Result<ProfileDefinition, ProfileError> {
    let mut definition = read_profile_definition(path).await?;
    expand_base_profiles(dir, &mut definition).await?;

    normalize_metrics(&mut definition.metrics);
    let mut errors = validate_enrich_metrics(&mut definition.metrics);
    errors.extend(validate_enrich_metric_tags(&mut definition.metric_tags));
    errors.extend(validate_enrich_metadata(&mut definition.metadata));
    if !errors.is_empty() {
        return Err(ProfileError::Validation {
            profile: path.display().to_string(),
            errors,
        });
    }
    Ok(definition)
}

async fn read_profile_definition(path: &Path) -> Result<ProfileDefinition, ProfileError> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|source| ProfileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    serde_yaml::from_str(&content).map_err(|source| ProfileError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn resolve_profile_path(dir: &Path, name: &str) -> PathBuf {
    let path = Path::new(name);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        dir.join(path)
    }
}

/// Depth-first merge of every base, rejecting a base already on the current
/// extends path
async fn expand_base_profiles(
    dir: &Path,
    definition: &mut ProfileDefinition,
) -> Result<(), ProfileError> {
    let mut stack: Vec<(String, Vec<String>)> = definition
        .extends
        .iter()
        .rev()
        .map(|base| (base.clone(), Vec::new()))
        .collect();

    while let Some((base, history)) = stack.pop() {
        if history.contains(&base) {
            return Err(ProfileError::CyclicExtends {
                base,
                history: format!("[{}]", history.join(" ")),
            });
        }
        let mut history = history;
        history.push(base.clone());

        let base_definition = read_profile_definition(&resolve_profile_path(dir, &base)).await?;
        for next in base_definition.extends.iter().rev() {
            stack.push((next.clone(), history.clone()));
        }
        merge_profile_definition(definition, base_definition);
    }
    Ok(())
}

/// Append base metrics and tags; metadata merges per resource without
/// overwriting fields the target already defines
pub fn merge_profile_definition(target: &mut ProfileDefinition, base: ProfileDefinition) {
    target.metrics.extend(base.metrics);
    target.metric_tags.extend(base.metric_tags);
    target.static_tags.extend(base.static_tags);

    for (name, base_resource) in base.metadata {
        let resource = target.metadata.entry(name).or_default();
        resource.id_tags.extend(base_resource.id_tags);
        for (field, config) in base_resource.fields {
            resource.fields.entry(field).or_insert(config);
        }
    }
}
