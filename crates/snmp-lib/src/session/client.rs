//! `async_snmp` backed session

use super::{Session, SessionFactory, SessionOpts, SnmpValue, SnmpVersion, VarBind};
use crate::error::SessionError;
use async_snmp::client::Retry;
use async_snmp::{Auth, AuthProtocol, Client, ErrorStatus, Oid, PrivProtocol, Value};
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

enum State {
    Idle,
    Connected(Client),
    Closed,
}

/// Session over a UDP `async_snmp::Client`
pub struct AsyncSnmpSession {
    target: SocketAddr,
    opts: SessionOpts,
    state: RwLock<State>,
}

impl AsyncSnmpSession {
    pub fn new(ip: IpAddr, opts: SessionOpts) -> Self {
        Self {
            target: SocketAddr::new(ip, opts.port),
            opts,
            state: RwLock::new(State::Idle),
        }
    }

    fn auth(&self) -> Result<Auth, SessionError> {
        let opts = &self.opts;
        let auth = match opts.version {
            SnmpVersion::V1 => Auth::v1(opts.community.clone()),
            SnmpVersion::V2c => Auth::v2c(opts.community.clone()),
            SnmpVersion::V3 => {
                let mut usm = Auth::usm(opts.user.clone());
                if !opts.auth_protocol.is_empty() {
                    let protocol = AuthProtocol::from_str(&opts.auth_protocol)
                        .map_err(|e| SessionError::Transport(e.to_string()))?;
                    usm = usm.auth(protocol, opts.auth_key.clone());
                }
                if !opts.priv_protocol.is_empty() {
                    let protocol = PrivProtocol::from_str(&opts.priv_protocol)
                        .map_err(|e| SessionError::Transport(e.to_string()))?;
                    usm = usm.privacy(protocol, opts.priv_key.clone());
                }
                if !opts.context_name.is_empty() {
                    usm = usm.context_name(opts.context_name.clone());
                }
                usm.into()
            }
        };
        Ok(auth)
    }

    async fn client(&self) -> Result<Client, SessionError> {
        match &*self.state.read().await {
            State::Connected(client) => Ok(client.clone()),
            State::Idle => Err(SessionError::NotConnected),
            State::Closed => Err(SessionError::Closed),
        }
    }
}

#[async_trait]
impl Session for AsyncSnmpSession {
    fn version(&self) -> SnmpVersion {
        self.opts.version
    }

    async fn connect(&self) -> Result<(), SessionError> {
        let mut state = self.state.write().await;
        match &*state {
            State::Closed => return Err(SessionError::Closed),
            State::Connected(_) => return Ok(()),
            State::Idle => {}
        }

        let client = Client::builder(self.target.to_string(), self.auth()?)
            .timeout(self.opts.timeout)
            .retry(Retry::fixed(self.opts.retries, self.opts.timeout / 10))
            .max_repetitions(self.opts.max_repetitions)
            .max_oids_per_request(self.opts.max_oids_per_request.max(1))
            .connect()
            .await
            .map_err(map_error)?;
        debug!(target = %self.target, version = %self.opts.version, "Session connected");
        *state = State::Connected(client);
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        *self.state.write().await = State::Closed;
        Ok(())
    }

    async fn get(&self, oids: &[String]) -> Result<Vec<VarBind>, SessionError> {
        let client = self.client().await?;
        let oids = parse_oids(oids)?;
        let varbinds = client.get_many(&oids).await.map_err(map_error)?;
        Ok(varbinds.into_iter().map(convert_varbind).collect())
    }

    async fn get_next(&self, oids: &[String]) -> Result<Vec<VarBind>, SessionError> {
        let client = self.client().await?;
        let oids = parse_oids(oids)?;
        let varbinds = client.get_next_many(&oids).await.map_err(map_error)?;
        Ok(varbinds.into_iter().map(convert_varbind).collect())
    }

    async fn get_bulk(
        &self,
        oids: &[String],
        max_repetitions: u32,
    ) -> Result<Vec<VarBind>, SessionError> {
        let client = self.client().await?;
        let oids = parse_oids(oids)?;
        let repetitions = i32::try_from(max_repetitions).unwrap_or(i32::MAX);
        let varbinds = client
            .get_bulk(&oids, 0, repetitions)
            .await
            .map_err(map_error)?;
        Ok(varbinds.into_iter().map(convert_varbind).collect())
    }
}

/// Factory producing [`AsyncSnmpSession`]s that share one set of options
#[derive(Debug, Clone)]
pub struct AsyncSnmpSessionFactory {
    opts: SessionOpts,
}

impl AsyncSnmpSessionFactory {
    pub fn new(opts: SessionOpts) -> Self {
        Self { opts }
    }
}

impl SessionFactory for AsyncSnmpSessionFactory {
    fn create(&self, ip: IpAddr) -> Arc<dyn Session> {
        Arc::new(AsyncSnmpSession::new(ip, self.opts.clone()))
    }
}

fn parse_oids(oids: &[String]) -> Result<Vec<Oid>, SessionError> {
    oids.iter()
        .map(|oid| {
            Oid::parse(crate::oid::normalize(oid)).map_err(|_| SessionError::InvalidOid(oid.clone()))
        })
        .collect()
}

fn map_error(err: Box<async_snmp::Error>) -> SessionError {
    match *err {
        async_snmp::Error::Snmp {
            status: ErrorStatus::NoSuchName,
            index,
            ..
        } => SessionError::NoSuchName {
            index: index as usize,
        },
        async_snmp::Error::Snmp { status, index, .. } => SessionError::Protocol {
            status: status.to_string(),
            index: index as usize,
        },
        async_snmp::Error::Timeout { .. } => SessionError::Timeout(err.to_string()),
        async_snmp::Error::InvalidOid(ref oid) => SessionError::InvalidOid(oid.to_string()),
        ref other => SessionError::Transport(other.to_string()),
    }
}

pub(crate) fn convert_value(value: Value) -> SnmpValue {
    match value {
        Value::Integer(v) => SnmpValue::Integer(i64::from(v)),
        Value::OctetString(b) => SnmpValue::OctetString(b.to_vec()),
        Value::Null => SnmpValue::Null,
        Value::ObjectIdentifier(oid) => SnmpValue::ObjectIdentifier(oid.to_string()),
        Value::IpAddress(addr) => SnmpValue::IpAddress(addr),
        Value::Counter32(v) => SnmpValue::Counter32(v),
        Value::Gauge32(v) => SnmpValue::Gauge32(v),
        Value::TimeTicks(v) => SnmpValue::TimeTicks(v),
        Value::Opaque(b) => SnmpValue::Opaque(b.to_vec()),
        Value::Counter64(v) => SnmpValue::Counter64(v),
        Value::NoSuchObject => SnmpValue::NoSuchObject,
        Value::NoSuchInstance => SnmpValue::NoSuchInstance,
        Value::EndOfMibView => SnmpValue::EndOfMibView,
        _ => SnmpValue::Null,
    }
}

pub(crate) fn convert_varbind(vb: async_snmp::VarBind) -> VarBind {
    VarBind {
        oid: vb.oid.to_string(),
        value: convert_value(vb.value),
    }
}
