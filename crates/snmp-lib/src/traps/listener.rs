//! UDP notification listener
//!
//! Decoding and v3 authentication are done by the async-snmp receiver. What
//! arrives here is turned into a [`TrapPacket`], checked against the accepted
//! communities and queued for the forwarder without ever blocking the socket.

use crate::config::TrapUser;
use crate::error::TrapError;
use crate::observability::{SnmpMetrics, StructuredLogger};
use crate::session::{convert_varbind, SnmpVersion, VarBind};
use async_snmp::notification::{Notification, NotificationReceiver};
use async_snmp::{AuthProtocol, PrivProtocol};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// snmpTraps, the parent of the generic v1 trap OIDs
const SNMP_TRAPS_PREFIX: &str = "1.3.6.1.6.3.1.1.5";

/// A received notification, version independent
#[derive(Debug, Clone, PartialEq)]
pub struct TrapPacket {
    pub source: IpAddr,
    pub version: SnmpVersion,
    /// v1/v2c only
    pub community: Option<String>,
    /// v3 only
    pub user: Option<String>,
    /// Hundredths of a second
    pub uptime: u32,
    pub trap_oid: String,
    pub varbinds: Vec<VarBind>,
}

/// Trap OID of a v1 trap, per the v1/v2 coexistence rules
pub fn v1_trap_oid(enterprise: &str, generic: i32, specific: i32) -> String {
    match generic {
        0..=5 => format!("{}.{}", SNMP_TRAPS_PREFIX, generic + 1),
        _ => format!("{}.0.{}", crate::oid::normalize(enterprise), specific),
    }
}

pub fn packet_from_notification(notification: Notification, source: SocketAddr) -> TrapPacket {
    let source = source.ip();
    let varbinds = |vbs: Vec<async_snmp::VarBind>| -> Vec<VarBind> {
        vbs.into_iter().map(convert_varbind).collect()
    };
    let text = |b: &[u8]| String::from_utf8_lossy(b).into_owned();

    match notification {
        Notification::TrapV1 { community, trap } => TrapPacket {
            source,
            version: SnmpVersion::V1,
            community: Some(text(&community)),
            user: None,
            uptime: trap.time_stamp,
            trap_oid: v1_trap_oid(
                &trap.enterprise.to_string(),
                trap.generic_trap,
                trap.specific_trap,
            ),
            varbinds: varbinds(trap.varbinds),
        },
        Notification::TrapV2c {
            community,
            uptime,
            trap_oid,
            varbinds: vbs,
            ..
        }
        | Notification::InformV2c {
            community,
            uptime,
            trap_oid,
            varbinds: vbs,
            ..
        } => TrapPacket {
            source,
            version: SnmpVersion::V2c,
            community: Some(text(&community)),
            user: None,
            uptime,
            trap_oid: trap_oid.to_string(),
            varbinds: varbinds(vbs),
        },
        Notification::TrapV3 {
            username,
            uptime,
            trap_oid,
            varbinds: vbs,
            ..
        }
        | Notification::InformV3 {
            username,
            uptime,
            trap_oid,
            varbinds: vbs,
            ..
        } => TrapPacket {
            source,
            version: SnmpVersion::V3,
            community: None,
            user: Some(text(&username)),
            uptime,
            trap_oid: trap_oid.to_string(),
            varbinds: varbinds(vbs),
        },
    }
}

/// Bind the notification socket with the configured USM users
pub async fn build_receiver(
    addr: SocketAddr,
    users: &[TrapUser],
) -> Result<NotificationReceiver, TrapError> {
    let bind_error = |reason: String| TrapError::Bind {
        addr: addr.to_string(),
        reason,
    };

    let mut builder = NotificationReceiver::builder().bind(addr.to_string());
    for user in users {
        let auth = parse_protocol::<AuthProtocol>(&user.auth_protocol).map_err(bind_error)?;
        let privacy = parse_protocol::<PrivProtocol>(&user.priv_protocol).map_err(bind_error)?;
        let auth_key = user.auth_key.clone();
        let priv_key = user.priv_key.clone();
        builder = builder.usm_user(user.username.clone(), move |mut u| {
            if let Some(protocol) = auth {
                u = u.auth(protocol, auth_key.as_bytes());
            }
            if let Some(protocol) = privacy {
                u = u.privacy(protocol, priv_key.as_bytes());
            }
            u
        });
    }

    builder.build().await.map_err(|e| bind_error(e.to_string()))
}

fn parse_protocol<P: FromStr>(raw: &str) -> Result<Option<P>, String> {
    if raw.is_empty() {
        return Ok(None);
    }
    P::from_str(raw)
        .map(Some)
        .map_err(|_| format!("unsupported protocol `{}`", raw))
}

/// Community filter and bounded hand-off to the forwarder
pub struct TrapIntake {
    communities: Vec<String>,
    tx: mpsc::Sender<TrapPacket>,
    metrics: SnmpMetrics,
    logger: StructuredLogger,
}

impl TrapIntake {
    pub fn new(
        communities: Vec<String>,
        tx: mpsc::Sender<TrapPacket>,
        metrics: SnmpMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            communities,
            tx,
            metrics,
            logger,
        }
    }

    fn accepts(&self, packet: &TrapPacket) -> bool {
        match &packet.community {
            Some(community) if !self.communities.is_empty() => {
                self.communities.iter().any(|c| c == community)
            }
            _ => true,
        }
    }

    /// Queue a packet; returns false when it was dropped
    pub fn accept(&self, packet: TrapPacket) -> bool {
        self.metrics.inc_traps_received();
        let source = packet.source.to_string();

        if !self.accepts(&packet) {
            self.metrics.inc_traps_dropped("community");
            self.logger.log_trap_dropped(&source, "unknown community");
            return false;
        }

        match self.tx.try_send(packet) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.inc_traps_dropped("queue_full");
                self.logger.log_trap_dropped(&source, "queue full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(source = %source, "Trap forwarder gone, dropping packet");
                false
            }
        }
    }
}

/// Receive until `stop` fires
pub async fn run_listener(
    receiver: NotificationReceiver,
    intake: TrapIntake,
    mut stop: broadcast::Receiver<()>,
) {
    info!(addr = %receiver.local_addr(), "Trap listener started");
    loop {
        tokio::select! {
            _ = stop.recv() => {
                info!("Trap listener stopping");
                break;
            }
            received = receiver.recv() => match received {
                Ok((notification, source)) => {
                    intake.accept(packet_from_notification(notification, source));
                }
                Err(e) => {
                    intake.metrics.inc_trap_decode_failures();
                    warn!(error = %e, "Failed to receive trap");
                }
            }
        }
    }
}
