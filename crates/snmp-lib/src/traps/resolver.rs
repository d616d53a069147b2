//! Trap and variable name lookup
//!
//! Database files are loaded with `default_traps_db.*` first and the rest in
//! name order, so user files override the defaults. Each file keeps its own
//! variable tree; a merged tree serves traps nobody defined.

use crate::error::TrapError;
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const DEFAULT_DB_PREFIX: &str = "default_traps_db.";

/// One trap definition as written in a database file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrapSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mib_name: String,
}

/// One variable definition as written in a database file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VariableSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "enum")]
    pub enumeration: BTreeMap<i64, String>,
}

/// Contents of one trap database file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrapDbFile {
    #[serde(default)]
    pub traps: HashMap<String, TrapSpec>,
    #[serde(default)]
    pub variables: HashMap<String, VariableSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableMetadata {
    pub name: String,
    pub description: String,
    pub enumeration: BTreeMap<i64, String>,
    /// Defined itself and also the prefix of another defined variable
    pub is_intermediate_node: bool,
}

/// Variables of one file, ordered by OID arcs
#[derive(Debug, Default)]
pub struct VariableTree {
    nodes: BTreeMap<Vec<u32>, VariableMetadata>,
}

impl VariableTree {
    fn insert(&mut self, oid: &str, spec: &VariableSpec) {
        let Some(arcs) = crate::oid::arcs(oid) else {
            warn!(oid = %oid, "Skipping variable with invalid OID");
            return;
        };
        self.nodes.insert(
            arcs,
            VariableMetadata {
                name: spec.name.clone(),
                description: spec.description.clone(),
                enumeration: spec.enumeration.clone(),
                is_intermediate_node: false,
            },
        );
    }

    /// Flag every node that has a defined descendant.
    ///
    /// Descendants sort directly after their ancestor, so checking the next
    /// key is enough.
    fn mark_intermediate_nodes(&mut self) {
        let keys: Vec<Vec<u32>> = self.nodes.keys().cloned().collect();
        for pair in keys.windows(2) {
            if pair[1].len() > pair[0].len() && pair[1].starts_with(&pair[0]) {
                if let Some(node) = self.nodes.get_mut(&pair[0]) {
                    node.is_intermediate_node = true;
                }
            }
        }
    }

    /// Exact match first, then the closest defined ancestor.
    ///
    /// An ancestor that is an intermediate node ends the search: it
    /// describes a subtree, not the requested value.
    pub fn lookup(&self, oid: &str) -> Result<&VariableMetadata, TrapError> {
        let unknown = || TrapError::UnknownVariable(oid.to_string());
        let arcs = crate::oid::arcs(oid).ok_or_else(unknown)?;
        if let Some(node) = self.nodes.get(&arcs) {
            return Ok(node);
        }
        for len in (1..arcs.len()).rev() {
            if let Some(node) = self.nodes.get(&arcs[..len]) {
                if node.is_intermediate_node {
                    return Err(unknown());
                }
                return Ok(node);
            }
        }
        Err(unknown())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct TrapMetadata {
    pub name: String,
    pub description: String,
    pub mib_name: String,
    /// Variables of the file that defined this trap
    pub variables: Arc<VariableTree>,
}

/// Resolves trap and variable OIDs to names
#[derive(Debug, Default)]
pub struct OidResolver {
    traps: HashMap<String, TrapMetadata>,
    merged: Arc<VariableTree>,
}

impl OidResolver {
    /// Load every database file in `dir`; a missing directory yields an
    /// empty resolver
    pub async fn load(dir: &Path) -> Result<Self, TrapError> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(dir = %dir.display(), "Trap database directory not found, trap names will not be resolved");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(TrapError::Io {
                    path: dir.to_path_buf(),
                    source,
                })
            }
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|source| TrapError::Io {
            path: dir.to_path_buf(),
            source,
        })? {
            let path = entry.path();
            if db_format(&path).is_some() {
                paths.push(path);
            }
        }
        sort_db_files(&mut paths);

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let file = read_db_file(&path).await?;
            files.push((path.display().to_string(), file));
        }
        let resolver = Self::from_files(files);
        info!(
            dir = %dir.display(),
            traps = resolver.traps.len(),
            variables = resolver.merged.len(),
            "Loaded trap databases"
        );
        Ok(resolver)
    }

    /// Build from already ordered files; later files win on conflicts
    pub fn from_files(files: Vec<(String, TrapDbFile)>) -> Self {
        let mut traps: HashMap<String, TrapMetadata> = HashMap::new();
        let mut merged = VariableTree::default();

        for (source, file) in files {
            let mut tree = VariableTree::default();
            for (oid, spec) in &file.variables {
                let oid = crate::oid::normalize(oid);
                tree.insert(oid, spec);
                merged.insert(oid, spec);
            }
            tree.mark_intermediate_nodes();
            let tree = Arc::new(tree);

            for (oid, spec) in file.traps {
                let oid = crate::oid::normalize(&oid).to_string();
                if let Some(previous) = traps.get(&oid) {
                    warn!(
                        trap_oid = %oid,
                        previous = %previous.name,
                        name = %spec.name,
                        source = %source,
                        "Trap OID conflict, keeping the later definition"
                    );
                }
                traps.insert(
                    oid,
                    TrapMetadata {
                        name: spec.name,
                        description: spec.description,
                        mib_name: spec.mib_name,
                        variables: tree.clone(),
                    },
                );
            }
        }
        merged.mark_intermediate_nodes();

        Self {
            traps,
            merged: Arc::new(merged),
        }
    }

    pub fn get_trap(&self, trap_oid: &str) -> Result<&TrapMetadata, TrapError> {
        self.traps
            .get(crate::oid::normalize(trap_oid))
            .ok_or_else(|| TrapError::UnknownTrap(trap_oid.to_string()))
    }

    /// Resolve a variable in the context of the trap that carried it
    pub fn get_variable(
        &self,
        trap_oid: &str,
        variable_oid: &str,
    ) -> Result<&VariableMetadata, TrapError> {
        let tree = match self.traps.get(crate::oid::normalize(trap_oid)) {
            Some(trap) => &trap.variables,
            None => &self.merged,
        };
        tree.lookup(crate::oid::normalize(variable_oid))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DbFormat {
    Yaml,
    Json,
}

/// Format of a database file and whether it is gzipped
fn db_format(path: &Path) -> Option<(DbFormat, bool)> {
    let name = path.file_name()?.to_str()?;
    let (name, gzipped) = match name.strip_suffix(".gz") {
        Some(stripped) => (stripped, true),
        None => (name, false),
    };
    let format = match Path::new(name).extension()?.to_str()? {
        "yaml" | "yml" => DbFormat::Yaml,
        "json" => DbFormat::Json,
        _ => return None,
    };
    Some((format, gzipped))
}

fn sort_db_files(paths: &mut [PathBuf]) {
    paths.sort_by_key(|path| {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        (!name.starts_with(DEFAULT_DB_PREFIX), name)
    });
}

async fn read_db_file(path: &Path) -> Result<TrapDbFile, TrapError> {
    let Some((format, gzipped)) = db_format(path) else {
        return Err(TrapError::Parse {
            path: path.to_path_buf(),
            reason: "unsupported file extension".to_string(),
        });
    };
    let raw = tokio::fs::read(path).await.map_err(|source| TrapError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let content = if gzipped {
        let mut decoded = Vec::new();
        GzDecoder::new(raw.as_slice())
            .read_to_end(&mut decoded)
            .map_err(|source| TrapError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        decoded
    } else {
        raw
    };

    debug!(path = %path.display(), bytes = content.len(), "Parsing trap database");
    let parse_error = |reason: String| TrapError::Parse {
        path: path.to_path_buf(),
        reason,
    };
    match format {
        DbFormat::Yaml => serde_yaml::from_slice(&content).map_err(|e| parse_error(e.to_string())),
        DbFormat::Json => serde_json::from_slice(&content).map_err(|e| parse_error(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    const DEFAULT_DB: &str = r#"
traps:
  1.3.6.1.6.3.1.1.5.3:
    name: linkDown
    mib_name: IF-MIB
  1.3.6.1.4.1.8072.2.3.0.1:
    name: netSnmpExampleHeartbeatNotification
    mib_name: NET-SNMP-EXAMPLES-MIB
variables:
  1.3.6.1.2.1.2.2.1.1:
    name: ifIndex
  1.3.6.1.2.1.2.2.1.7:
    name: ifAdminStatus
    enum:
      1: up
      2: down
  1.3.6.1.2.1.2.2:
    name: ifTable
"#;

    #[test]
    fn test_intermediate_node_is_not_an_ancestor_match() {
        let file: TrapDbFile = serde_yaml::from_str(DEFAULT_DB).unwrap();
        let resolver = OidResolver::from_files(vec![("default".into(), file)]);
        let link_down = "1.3.6.1.6.3.1.1.5.3";

        let var = resolver
            .get_variable(link_down, "1.3.6.1.2.1.2.2.1.7.12")
            .unwrap();
        assert_eq!(var.name, "ifAdminStatus");
        assert_eq!(var.enumeration[&2], "down");

        let table = resolver.get_variable(link_down, "1.3.6.1.2.1.2.2").unwrap();
        assert_eq!(table.name, "ifTable");
        assert!(table.is_intermediate_node);

        assert!(matches!(
            resolver.get_variable(link_down, "1.3.6.1.2.1.2.2.1.99.1"),
            Err(TrapError::UnknownVariable(_))
        ));
        assert!(resolver
            .get_variable(link_down, "1.3.6.1.4.1.1.1")
            .is_err());
    }

    #[test]
    fn test_later_file_wins_and_keeps_its_own_variables() {
        let default: TrapDbFile = serde_yaml::from_str(DEFAULT_DB).unwrap();
        let user: TrapDbFile = serde_json::from_str(
            r#"{"traps": {"1.3.6.1.6.3.1.1.5.3": {"name": "myLinkDown", "mib_name": "MY-MIB"}},
                "variables": {"1.3.6.1.4.1.99.1": {"name": "myVar"}}}"#,
        )
        .unwrap();
        let resolver =
            OidResolver::from_files(vec![("default".into(), default), ("user".into(), user)]);

        let trap = resolver.get_trap(".1.3.6.1.6.3.1.1.5.3").unwrap();
        assert_eq!(trap.name, "myLinkDown");
        assert_eq!(trap.mib_name, "MY-MIB");

        // variables of the trap's own file only
        assert!(resolver
            .get_variable("1.3.6.1.6.3.1.1.5.3", "1.3.6.1.2.1.2.2.1.1.3")
            .is_err());
        assert_eq!(
            resolver
                .get_variable("1.3.6.1.6.3.1.1.5.3", "1.3.6.1.4.1.99.1")
                .unwrap()
                .name,
            "myVar"
        );

        // unknown traps use the merged tree
        assert!(matches!(
            resolver.get_trap("1.3.6.1.4.1.5.5"),
            Err(TrapError::UnknownTrap(_))
        ));
        assert_eq!(
            resolver
                .get_variable("1.3.6.1.4.1.5.5", "1.3.6.1.2.1.2.2.1.1.3")
                .unwrap()
                .name,
            "ifIndex"
        );
    }

    #[tokio::test]
    async fn test_load_orders_default_first_and_reads_gzip() {
        let dir = TempDir::new().unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(DEFAULT_DB.as_bytes()).unwrap();
        std::fs::write(
            dir.path().join("default_traps_db.yaml.gz"),
            encoder.finish().unwrap(),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("a_user.json"),
            r#"{"traps": {"1.3.6.1.6.3.1.1.5.3": {"name": "userLinkDown"}}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let resolver = OidResolver::load(dir.path()).await.unwrap();
        assert_eq!(
            resolver.get_trap("1.3.6.1.6.3.1.1.5.3").unwrap().name,
            "userLinkDown"
        );
        assert_eq!(
            resolver
                .get_trap("1.3.6.1.4.1.8072.2.3.0.1")
                .unwrap()
                .mib_name,
            "NET-SNMP-EXAMPLES-MIB"
        );
    }

    #[tokio::test]
    async fn test_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let resolver = OidResolver::load(&dir.path().join("absent")).await.unwrap();
        assert!(resolver.get_trap("1.3.6.1.6.3.1.1.5.1").is_err());
    }

    #[test]
    fn test_db_format() {
        assert_eq!(
            db_format(Path::new("x/default_traps_db.json.gz")),
            Some((DbFormat::Json, true))
        );
        assert_eq!(db_format(Path::new("a.yml")), Some((DbFormat::Yaml, false)));
        assert_eq!(db_format(Path::new("a.gz")), None);
        assert_eq!(db_format(Path::new("a.txt")), None);
    }
}
