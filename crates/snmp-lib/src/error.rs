//! Error taxonomy for the SNMP core
//!
//! Configuration and profile errors are fatal at startup. Session and fetch
//! errors are per-device and never stop the scheduler. Trap errors drop a
//! single packet.

use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Trap(#[from] TrapError),

    /// Several independent steps of one device collection failed
    #[error("{}", .0.join("; "))]
    Collect(Vec<String>),
}

impl Error {
    /// True when the failure was caused by using an already closed session.
    ///
    /// Discovery closes sessions of demoted devices; a poll queued before the
    /// demotion observes this error and must not report it.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Session(SessionError::Closed))
    }
}

/// Invalid configuration detected at startup
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("`snmp_version` must be 1 or 2 or 3")]
    InvalidVersion(u8),

    #[error("invalid CIDR address `{0}`")]
    InvalidCidr(String),

    #[error("invalid IP address `{0}`")]
    InvalidIp(String),

    #[error("duplicate IP address `{0}`")]
    DuplicateIp(String),

    #[error("unknown profile `{0}`")]
    UnknownProfile(String),

    #[error("invalid trap bind address `{0}`")]
    InvalidBindAddress(String),

    #[error("`{0}` must be greater than zero")]
    Zero(&'static str),

    #[error("invalid {kind} protocol `{value}`")]
    InvalidProtocol { kind: &'static str, value: String },

    #[error("invalid regex `{pattern}` in `{field}`")]
    InvalidRegex { field: &'static str, pattern: String },

    #[error("validation errors: {}", .0.join("\n"))]
    Metrics(Vec<String>),
}

/// Profile loading and resolution failures
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("failed to read profile `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse profile `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("cyclic profile extend detected, `{base}` has already been in the extends history `{history}`")]
    CyclicExtends { base: String, history: String },

    #[error("profile {profile} has the same sysObjectID ({pattern}) as {previous}")]
    DuplicateSysObjectId {
        profile: String,
        pattern: String,
        previous: String,
    },

    #[error("no profile matches sysObjectID `{0}`")]
    NoMatch(String),

    #[error("error parsing part `{part}` for pattern `{pattern}`")]
    InvalidPattern { part: String, pattern: String },

    #[error("validation errors in profile `{profile}`: {}", .errors.join("\n"))]
    Validation {
        profile: String,
        errors: Vec<String>,
    },
}

/// Failures reported by a device session
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session not connected")]
    NotConnected,

    #[error("session closed")]
    Closed,

    /// SNMPv1 noSuchName, `index` is 1-based as carried on the wire
    #[error("noSuchName at index {index}")]
    NoSuchName { index: usize },

    #[error("SNMP error {status} at index {index}")]
    Protocol { status: String, index: usize },

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid OID `{0}`")]
    InvalidOid(String),
}

/// Failures of the fetch engine
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("invalid ErrorIndex `{index}` when fetching oids `{oids:?}`")]
    InvalidErrorIndex { index: usize, oids: Vec<String> },

    #[error("failed to fetch oids with GetNext: {0}")]
    GetNext(SessionError),

    #[error("failed to fetch oids with GetBulk: {0}")]
    GetBulk(SessionError),

    #[error("failed to fetch scalar oids: {0}")]
    Scalar(SessionError),

    #[error("value for Scalar OID `{0}` not found in results")]
    ScalarNotFound(String),

    #[error("value for Column OID `{0}` not found in results")]
    ColumnNotFound(String),

    #[error("{0}")]
    Value(String),
}

/// Failures of the trap pipeline
#[derive(Debug, Error)]
pub enum TrapError {
    #[error("trap listener already running")]
    AlreadyListening,

    #[error("failed to bind trap listener on `{addr}`: {reason}")]
    Bind { addr: String, reason: String },

    #[error("failed to read trap database `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse trap database `{path}`: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("trap OID {0} is not defined")]
    UnknownTrap(String),

    #[error("variable OID {0} is not defined")]
    UnknownVariable(String),

    #[error("failed to format trap payload: {0}")]
    Format(#[from] serde_json::Error),
}
