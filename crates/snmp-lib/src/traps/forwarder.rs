//! Trap formatting and feeding

use super::listener::TrapPacket;
use super::resolver::OidResolver;
use crate::error::TrapError;
use crate::feeder::{merge_tags, Category, FeedOptions, Feeder, Tagger};
use crate::models::{FieldValue, Point, TagField, INPUT_NAME, SNMP_TRAP_NAME};
use crate::oid::well_known;
use crate::session::SnmpValue;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// snmpTrapOID.0, repeated in some v2c payloads
const SNMP_TRAP_OID: &str = "1.3.6.1.6.3.1.1.4.1.0";

/// Turns a packet into the tag and field maps of one point
pub struct TrapFormatter {
    namespace: String,
    tags: BTreeMap<String, String>,
    resolver: Arc<OidResolver>,
}

impl TrapFormatter {
    pub fn new(
        namespace: impl Into<String>,
        tags: BTreeMap<String, String>,
        resolver: Arc<OidResolver>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            tags,
            resolver,
        }
    }

    pub fn format(&self, packet: &TrapPacket) -> Result<TagField, TrapError> {
        let source = packet.source.to_string();
        let trap_oid = crate::oid::normalize(&packet.trap_oid).to_string();

        let mut tags = self.tags.clone();
        tags.insert("host".to_string(), source.clone());
        tags.insert("snmp_device".to_string(), source);
        tags.insert("device_namespace".to_string(), self.namespace.clone());
        tags.insert("snmp_version".to_string(), packet.version.to_string());
        match self.resolver.get_trap(&trap_oid) {
            Ok(trap) => {
                tags.insert("snmpTrapName".to_string(), trap.name.clone());
                tags.insert("snmpTrapMIB".to_string(), trap.mib_name.clone());
            }
            Err(e) => debug!(error = %e, "Trap name not resolved"),
        }
        tags.insert("snmpTrapOID".to_string(), trap_oid.clone());

        let mut message = Map::new();
        for vb in &packet.varbinds {
            let oid = crate::oid::normalize(&vb.oid);
            if oid == well_known::SYS_UPTIME || oid == SNMP_TRAP_OID {
                continue;
            }
            match self.resolver.get_variable(&trap_oid, oid) {
                Ok(var) => {
                    let value = match &vb.value {
                        SnmpValue::Integer(i) => var
                            .enumeration
                            .get(i)
                            .map(|label| Value::String(label.clone()))
                            .unwrap_or_else(|| Value::from(*i)),
                        other => json_value(other),
                    };
                    message.insert(var.name.clone(), value);
                }
                Err(_) => {
                    message.insert(oid.to_string(), json_value(&vb.value));
                }
            }
        }

        let mut fields = BTreeMap::new();
        fields.insert("uptime".to_string(), FieldValue::Int(i64::from(packet.uptime)));
        fields.insert(
            "message".to_string(),
            FieldValue::Str(serde_json::to_string(&Value::Object(message))?),
        );
        if let Some(community) = &packet.community {
            fields.insert("community".to_string(), FieldValue::Str(community.clone()));
        }
        if let Some(user) = &packet.user {
            fields.insert("user".to_string(), FieldValue::Str(user.clone()));
        }

        Ok(TagField { tags, fields })
    }
}

fn json_value(value: &SnmpValue) -> Value {
    match value {
        SnmpValue::Integer(i) => Value::from(*i),
        SnmpValue::Counter32(v) | SnmpValue::Gauge32(v) | SnmpValue::TimeTicks(v) => {
            Value::from(*v)
        }
        SnmpValue::Counter64(v) => Value::from(*v),
        SnmpValue::OctetString(b) | SnmpValue::Opaque(b) => match std::str::from_utf8(b) {
            Ok(s) => Value::String(s.to_string()),
            Err(_) => Value::String(hex::encode(b)),
        },
        SnmpValue::ObjectIdentifier(oid) => Value::String(oid.clone()),
        SnmpValue::IpAddress(octets) => Value::String(Ipv4Addr::from(*octets).to_string()),
        SnmpValue::Null
        | SnmpValue::NoSuchObject
        | SnmpValue::NoSuchInstance
        | SnmpValue::EndOfMibView => Value::Null,
    }
}

/// Drain the packet queue into the feeder until `stop` fires or the
/// listener goes away
pub async fn run_forwarder(
    mut rx: mpsc::Receiver<TrapPacket>,
    formatter: TrapFormatter,
    feeder: Arc<dyn Feeder>,
    tagger: Arc<dyn Tagger>,
    election: bool,
    mut stop: broadcast::Receiver<()>,
) {
    info!("Trap forwarder started");
    loop {
        let packet = tokio::select! {
            _ = stop.recv() => break,
            packet = rx.recv() => match packet {
                Some(packet) => packet,
                None => break,
            },
        };

        let started = Instant::now();
        let row = match formatter.format(&packet) {
            Ok(row) => row,
            Err(e) => {
                warn!(source = %packet.source, error = %e, "Failed to format trap");
                continue;
            }
        };
        let defaults = if election {
            tagger.election_tags()
        } else {
            tagger.host_tags()
        };
        let row = TagField {
            tags: merge_tags(&defaults, &row.tags),
            fields: row.fields,
        };
        let point = Point::new(SNMP_TRAP_NAME, row, Utc::now());
        let options = FeedOptions {
            collect_cost: started.elapsed(),
            election,
            source: SNMP_TRAP_NAME.to_string(),
        };
        if let Err(e) = feeder
            .feed(INPUT_NAME, Category::Object, vec![point], options)
            .await
        {
            warn!(error = %e, "Failed to feed trap");
            feeder.feed_last_error(INPUT_NAME, &e.to_string());
        }
    }
    info!("Trap forwarder stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeder::{MemoryFeeder, StaticTagger};
    use crate::session::{SnmpVersion, VarBind};
    use crate::traps::resolver::TrapDbFile;

    const DB: &str = r#"
traps:
  1.3.6.1.6.3.1.1.5.3:
    name: linkDown
    mib_name: IF-MIB
variables:
  1.3.6.1.2.1.2.2.1.1:
    name: ifIndex
  1.3.6.1.2.1.2.2.1.7:
    name: ifAdminStatus
    enum:
      1: up
      2: down
"#;

    fn formatter() -> TrapFormatter {
        let file: TrapDbFile = serde_yaml::from_str(DB).unwrap();
        let resolver = OidResolver::from_files(vec![("default".into(), file)]);
        let mut tags = BTreeMap::new();
        tags.insert("site".to_string(), "lab".to_string());
        TrapFormatter::new("default", tags, Arc::new(resolver))
    }

    fn link_down() -> TrapPacket {
        TrapPacket {
            source: "10.0.0.9".parse().unwrap(),
            version: SnmpVersion::V2c,
            community: Some("public".to_string()),
            user: None,
            uptime: 4200,
            trap_oid: "1.3.6.1.6.3.1.1.5.3".to_string(),
            varbinds: vec![
                VarBind::new("1.3.6.1.2.1.2.2.1.1.3", SnmpValue::Integer(3)),
                VarBind::new("1.3.6.1.2.1.2.2.1.7.3", SnmpValue::Integer(2)),
                VarBind::new("1.3.6.1.4.1.99.1.0", SnmpValue::OctetString(b"hi".to_vec())),
            ],
        }
    }

    #[test]
    fn test_format_resolves_names_and_enums() {
        let row = formatter().format(&link_down()).unwrap();

        assert_eq!(row.tags["host"], "10.0.0.9");
        assert_eq!(row.tags["snmp_device"], "10.0.0.9");
        assert_eq!(row.tags["device_namespace"], "default");
        assert_eq!(row.tags["snmp_version"], "2");
        assert_eq!(row.tags["snmpTrapName"], "linkDown");
        assert_eq!(row.tags["snmpTrapMIB"], "IF-MIB");
        assert_eq!(row.tags["snmpTrapOID"], "1.3.6.1.6.3.1.1.5.3");
        assert_eq!(row.tags["site"], "lab");

        assert_eq!(row.fields["uptime"], FieldValue::Int(4200));
        assert_eq!(row.fields["community"], FieldValue::Str("public".to_string()));
        let FieldValue::Str(message) = &row.fields["message"] else {
            panic!("message is not a string");
        };
        let message: Value = serde_json::from_str(message).unwrap();
        assert_eq!(message["ifIndex"], 3);
        assert_eq!(message["ifAdminStatus"], "down");
        assert_eq!(message["1.3.6.1.4.1.99.1.0"], "hi");
    }

    #[test]
    fn test_format_unknown_trap_keeps_oid() {
        let mut packet = link_down();
        packet.trap_oid = "1.3.6.1.4.1.99.0.1".to_string();
        packet.community = None;
        packet.user = Some("monitor".to_string());
        packet.version = SnmpVersion::V3;

        let row = formatter().format(&packet).unwrap();
        assert!(!row.tags.contains_key("snmpTrapName"));
        assert_eq!(row.tags["snmpTrapOID"], "1.3.6.1.4.1.99.0.1");
        assert_eq!(row.tags["snmp_version"], "3");
        assert_eq!(row.fields["user"], FieldValue::Str("monitor".to_string()));
        assert!(!row.fields.contains_key("community"));
    }

    #[tokio::test]
    async fn test_forwarder_feeds_object_points() {
        let (tx, rx) = mpsc::channel(4);
        let (stop_tx, stop_rx) = broadcast::channel(1);
        let feeder = Arc::new(MemoryFeeder::new());
        let handle = tokio::spawn(run_forwarder(
            rx,
            formatter(),
            feeder.clone(),
            Arc::new(StaticTagger::with_host("agent-1")),
            false,
            stop_rx,
        ));

        tx.send(link_down()).await.unwrap();
        drop(tx);
        handle.await.unwrap();
        drop(stop_tx);

        let points = feeder.points(Category::Object);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].measurement, "snmp_trap");
        // the source IP wins over the host default tag
        assert_eq!(points[0].tags["host"], "10.0.0.9");
        assert!(feeder.points(Category::Metric).is_empty());
    }
}
