//! Helpers for dotted OID strings
//!
//! OIDs travel through the crate as dotted strings without a leading dot
//! (`1.3.6.1.2.1.1.5.0`). Ordering between OIDs is numeric per arc, not
//! lexicographic on the text.

use std::cmp::Ordering;

/// Well-known OIDs used by the core
pub mod well_known {
    /// Subtree probed with get-next to decide reachability
    pub const DEVICE_REACHABLE_GET_NEXT: &str = "1.3.6.1.2.1.1";
    pub const SYS_DESCR: &str = "1.3.6.1.2.1.1.1.0";
    pub const SYS_OBJECT_ID: &str = "1.3.6.1.2.1.1.2.0";
    pub const SYS_UPTIME: &str = "1.3.6.1.2.1.1.3.0";
    pub const SYS_NAME: &str = "1.3.6.1.2.1.1.5.0";
    pub const IF_HIGH_SPEED: &str = "1.3.6.1.2.1.31.1.1.1.15";
}

/// Strip surrounding whitespace and a leading dot
pub fn normalize(oid: &str) -> &str {
    oid.trim().trim_start_matches('.')
}

/// Parse the numeric arcs of an OID, `None` when any arc is not a number
pub fn arcs(oid: &str) -> Option<Vec<u32>> {
    let oid = normalize(oid);
    if oid.is_empty() {
        return Some(Vec::new());
    }
    oid.split('.').map(|p| p.parse::<u32>().ok()).collect()
}

/// Compare two OIDs arc by arc; malformed arcs fall back to text ordering
pub fn compare(a: &str, b: &str) -> Ordering {
    match (arcs(a), arcs(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => normalize(a).cmp(normalize(b)),
    }
}

/// True when `oid` lies strictly below `prefix` in the tree
pub fn is_strict_child(prefix: &str, oid: &str) -> bool {
    let prefix = normalize(prefix);
    let oid = normalize(oid);
    oid.len() > prefix.len() + 1 && oid.starts_with(prefix) && oid.as_bytes()[prefix.len()] == b'.'
}

/// Index suffix of `oid` below `prefix`, if `oid` is a strict child
pub fn index_suffix<'a>(prefix: &str, oid: &'a str) -> Option<&'a str> {
    let prefix = normalize(prefix);
    let oid = normalize(oid);
    if is_strict_child(prefix, oid) {
        Some(&oid[prefix.len() + 1..])
    } else {
        None
    }
}

/// Drop the last arc, `None` at the root
pub fn parent(oid: &str) -> Option<&str> {
    normalize(oid).rsplit_once('.').map(|(head, _)| head)
}
