//! Values of one poll, keyed by OID

use crate::error::FetchError;
use crate::session::{SnmpValue, VarBind};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;

/// How a numeric value is meant to be submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionType {
    Gauge,
    Counter,
}

/// Payload of a stored value
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    Number(f64),
    Text(String),
    Bytes(Vec<u8>),
}

/// A value with its submission hint
#[derive(Debug, Clone, PartialEq)]
pub struct ResultValue {
    pub submission_type: Option<SubmissionType>,
    pub value: StoredValue,
}

impl ResultValue {
    pub fn number(value: f64) -> Self {
        Self {
            submission_type: None,
            value: StoredValue::Number(value),
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self {
            submission_type: None,
            value: StoredValue::Text(value.into()),
        }
    }

    /// Convert a varbind value; exceptions and NULL have no stored form
    pub fn from_snmp(value: &SnmpValue) -> Option<Self> {
        let (submission_type, value) = match value {
            SnmpValue::Integer(v) => (Some(SubmissionType::Gauge), StoredValue::Number(*v as f64)),
            SnmpValue::Gauge32(v) | SnmpValue::TimeTicks(v) => {
                (Some(SubmissionType::Gauge), StoredValue::Number(f64::from(*v)))
            }
            SnmpValue::Counter32(v) => {
                (Some(SubmissionType::Counter), StoredValue::Number(f64::from(*v)))
            }
            SnmpValue::Counter64(v) => (Some(SubmissionType::Counter), StoredValue::Number(*v as f64)),
            SnmpValue::OctetString(b) | SnmpValue::Opaque(b) => (None, StoredValue::Bytes(b.clone())),
            SnmpValue::ObjectIdentifier(oid) => {
                (None, StoredValue::Text(crate::oid::normalize(oid).to_string()))
            }
            SnmpValue::IpAddress([a, b, c, d]) => {
                (None, StoredValue::Text(format!("{}.{}.{}.{}", a, b, c, d)))
            }
            SnmpValue::Null
            | SnmpValue::NoSuchObject
            | SnmpValue::NoSuchInstance
            | SnmpValue::EndOfMibView => return None,
        };
        Some(Self {
            submission_type,
            value,
        })
    }

    /// Numeric form; strings must parse as a float
    pub fn to_float(&self) -> Result<f64, FetchError> {
        match &self.value {
            StoredValue::Number(n) => Ok(*n),
            StoredValue::Text(_) | StoredValue::Bytes(_) => {
                let s = self.to_string();
                s.trim().parse::<f64>().map_err(|_| {
                    FetchError::Value(format!("failed to parse `{}` as float", s))
                })
            }
        }
    }

    /// Replace the value with the first capture group of `pattern`
    pub fn extract_string_value(&self, pattern: &Regex) -> Result<ResultValue, FetchError> {
        let src = self.to_string();
        let captures = pattern.captures(&src).ok_or_else(|| {
            FetchError::Value(format!(
                "extract value extractValuePattern does not match (extractValuePattern={}, srcValue={})",
                pattern.as_str(),
                src
            ))
        })?;
        let group = captures.get(1).ok_or_else(|| {
            FetchError::Value(format!(
                "extract value pattern des not contain any matching group (extractValuePattern={}, srcValue={})",
                pattern.as_str(),
                src
            ))
        })?;
        Ok(ResultValue {
            submission_type: self.submission_type,
            value: StoredValue::Text(group.as_str().to_string()),
        })
    }

    /// Render with a symbol `format`; only `mac_address` is understood
    pub fn format(&self, format: &str) -> Result<String, FetchError> {
        match (format, &self.value) {
            ("", _) => Ok(self.to_string()),
            ("mac_address", StoredValue::Bytes(b)) => Ok(b
                .iter()
                .map(|byte| format!("{:02x}", byte))
                .collect::<Vec<_>>()
                .join(":")),
            ("mac_address", _) => Err(FetchError::Value(format!(
                "value `{}` can not be formatted as mac_address",
                self
            ))),
            (other, _) => Err(FetchError::Value(format!("unknown format `{}`", other))),
        }
    }
}

fn is_printable(bytes: &[u8]) -> bool {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.chars().all(|c| !c.is_control() || c.is_whitespace()),
        Err(_) => false,
    }
}

impl fmt::Display for ResultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            StoredValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            StoredValue::Number(n) => write!(f, "{}", n),
            StoredValue::Text(s) => f.write_str(s),
            StoredValue::Bytes(b) if is_printable(b) => f.write_str(&String::from_utf8_lossy(b)),
            StoredValue::Bytes(b) => {
                f.write_str("0x")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

/// OID -> value
pub type ScalarResultValues = HashMap<String, ResultValue>;

/// Column OID -> index -> value
pub type ColumnResultValues = HashMap<String, HashMap<String, ResultValue>>;

/// Everything fetched from one device in one poll
#[derive(Debug, Clone, Default)]
pub struct ResultValueStore {
    pub scalar_values: ScalarResultValues,
    pub column_values: ColumnResultValues,
}

impl ResultValueStore {
    pub fn get_scalar_value(&self, oid: &str) -> Result<&ResultValue, FetchError> {
        self.scalar_values
            .get(crate::oid::normalize(oid))
            .ok_or_else(|| FetchError::ScalarNotFound(oid.to_string()))
    }

    pub fn get_column_values(
        &self,
        oid: &str,
    ) -> Result<&HashMap<String, ResultValue>, FetchError> {
        self.column_values
            .get(crate::oid::normalize(oid))
            .ok_or_else(|| FetchError::ColumnNotFound(oid.to_string()))
    }

    /// Indexes of a column, sorted by OID order
    pub fn get_column_indexes(&self, oid: &str) -> Result<Vec<String>, FetchError> {
        let mut indexes: Vec<String> = self.get_column_values(oid)?.keys().cloned().collect();
        indexes.sort_by(|a, b| crate::oid::compare(a, b));
        Ok(indexes)
    }

    pub fn is_empty(&self) -> bool {
        self.scalar_values.is_empty() && self.column_values.is_empty()
    }
}

/// Keep the non-exception values of a get response
pub fn result_to_scalar_values(varbinds: &[VarBind]) -> ScalarResultValues {
    varbinds
        .iter()
        .filter_map(|vb| {
            ResultValue::from_snmp(&vb.value)
                .map(|v| (crate::oid::normalize(&vb.oid).to_string(), v))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_snmp() {
        let v = ResultValue::from_snmp(&SnmpValue::Counter64(42)).unwrap();
        assert_eq!(v.submission_type, Some(SubmissionType::Counter));
        assert_eq!(v.to_float().unwrap(), 42.0);

        let v = ResultValue::from_snmp(&SnmpValue::TimeTicks(7)).unwrap();
        assert_eq!(v.submission_type, Some(SubmissionType::Gauge));

        assert!(ResultValue::from_snmp(&SnmpValue::Null).is_none());
        assert!(ResultValue::from_snmp(&SnmpValue::NoSuchInstance).is_none());
        assert_eq!(
            ResultValue::from_snmp(&SnmpValue::IpAddress([192, 168, 1, 1]))
                .unwrap()
                .to_string(),
            "192.168.1.1"
        );
    }

    #[test]
    fn test_string_rendering() {
        let printable = ResultValue::from_snmp(&SnmpValue::OctetString(b"eth0".to_vec())).unwrap();
        assert_eq!(printable.to_string(), "eth0");

        let binary =
            ResultValue::from_snmp(&SnmpValue::OctetString(vec![0x00, 0x1b, 0xff])).unwrap();
        assert_eq!(binary.to_string(), "0x001bff");
        assert_eq!(binary.format("mac_address").unwrap(), "00:1b:ff");

        assert_eq!(ResultValue::number(3.0).to_string(), "3");
        assert_eq!(ResultValue::number(0.5).to_string(), "0.5");
    }

    #[test]
    fn test_to_float_parses_strings() {
        assert_eq!(ResultValue::text(" 12.5 ").to_float().unwrap(), 12.5);
        assert!(ResultValue::text("n/a").to_float().is_err());
    }

    #[test]
    fn test_extract_string_value() {
        let re = Regex::new(r"(\d+)C").unwrap();
        let v = ResultValue::text("temp: 23C");
        assert_eq!(v.extract_string_value(&re).unwrap().to_float().unwrap(), 23.0);

        let err = ResultValue::text("none").extract_string_value(&re).unwrap_err();
        assert!(err.to_string().starts_with("extract value extractValuePattern does not match"));

        let no_group = Regex::new(r"\d+").unwrap();
        let err = ResultValue::text("12").extract_string_value(&no_group).unwrap_err();
        assert!(err.to_string().contains("not contain any matching group"));
    }

    #[test]
    fn test_store_lookup_errors_name_oid() {
        let store = ResultValueStore::default();
        assert_eq!(
            store.get_scalar_value("1.2.3.0").unwrap_err().to_string(),
            "value for Scalar OID `1.2.3.0` not found in results"
        );
        assert!(store.get_column_values("1.2.3").is_err());
    }

    #[test]
    fn test_result_to_scalar_values_skips_exceptions() {
        let values = result_to_scalar_values(&[
            VarBind::new(".1.2.3.0", SnmpValue::Integer(1)),
            VarBind::new("1.2.4.0", SnmpValue::NoSuchObject),
            VarBind::new("1.2.5.0", SnmpValue::Null),
        ]);
        assert_eq!(values.len(), 1);
        assert!(values.contains_key("1.2.3.0"));
    }
}
