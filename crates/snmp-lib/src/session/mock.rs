//! In-memory agent used by tests

use super::{Session, SessionFactory, SnmpValue, SnmpVersion, VarBind};
use crate::error::SessionError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MockState {
    values: Mutex<BTreeMap<Vec<u32>, SnmpValue>>,
    requested: Mutex<Vec<String>>,
    get_calls: AtomicUsize,
    get_next_calls: AtomicUsize,
    get_bulk_calls: AtomicUsize,
    connect_calls: AtomicUsize,
    fail_connect: AtomicBool,
    fail_get: AtomicBool,
    fail_get_next: AtomicBool,
    fail_bulk: AtomicBool,
    closed: AtomicBool,
}

/// Agent over an ordered OID map; clones share state
#[derive(Clone)]
pub struct MockSession {
    version: SnmpVersion,
    state: Arc<MockState>,
}

fn key(oid: &str) -> Vec<u32> {
    crate::oid::arcs(oid).unwrap_or_default()
}

fn render(key: &[u32]) -> String {
    key.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(".")
}

impl MockSession {
    pub fn new(version: SnmpVersion) -> Self {
        Self {
            version,
            state: Arc::new(MockState::default()),
        }
    }

    pub fn with(self, oid: &str, value: SnmpValue) -> Self {
        self.set(oid, value);
        self
    }

    pub fn set(&self, oid: &str, value: SnmpValue) {
        self.state.values.lock().unwrap().insert(key(oid), value);
    }

    pub fn fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_get(&self, fail: bool) {
        self.state.fail_get.store(fail, Ordering::SeqCst);
    }

    pub fn fail_get_next(&self, fail: bool) {
        self.state.fail_get_next.store(fail, Ordering::SeqCst);
    }

    pub fn fail_bulk(&self, fail: bool) {
        self.state.fail_bulk.store(fail, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> usize {
        self.state.get_calls.load(Ordering::SeqCst)
    }

    pub fn get_next_calls(&self) -> usize {
        self.state.get_next_calls.load(Ordering::SeqCst)
    }

    pub fn get_bulk_calls(&self) -> usize {
        self.state.get_bulk_calls.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.state.connect_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Every OID sent in a get-next or bulk request, in order
    pub fn requested(&self) -> Vec<String> {
        self.state.requested.lock().unwrap().clone()
    }

    fn check_open(&self) -> Result<(), SessionError> {
        if self.is_closed() {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    fn next_after(&self, oid: &[u32]) -> Option<(Vec<u32>, SnmpValue)> {
        let values = self.state.values.lock().unwrap();
        values
            .range::<Vec<u32>, _>((
                std::ops::Bound::Excluded(oid.to_vec()),
                std::ops::Bound::Unbounded,
            ))
            .next()
            .map(|(k, v)| (k.clone(), v.clone()))
    }
}

#[async_trait]
impl Session for MockSession {
    fn version(&self) -> SnmpVersion {
        self.version
    }

    async fn connect(&self) -> Result<(), SessionError> {
        self.state.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.check_open()?;
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(SessionError::Transport("connection refused".into()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, oids: &[String]) -> Result<Vec<VarBind>, SessionError> {
        self.state.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check_open()?;
        if self.state.fail_get.load(Ordering::SeqCst) {
            return Err(SessionError::Timeout("mock".into()));
        }
        let values = self.state.values.lock().unwrap();
        let mut out = Vec::with_capacity(oids.len());
        for (i, oid) in oids.iter().enumerate() {
            match values.get(&key(oid)) {
                Some(value) => out.push(VarBind::new(oid.clone(), value.clone())),
                None if self.version == SnmpVersion::V1 => {
                    return Err(SessionError::NoSuchName { index: i + 1 })
                }
                None => out.push(VarBind::new(oid.clone(), SnmpValue::NoSuchObject)),
            }
        }
        Ok(out)
    }

    async fn get_next(&self, oids: &[String]) -> Result<Vec<VarBind>, SessionError> {
        self.state.get_next_calls.fetch_add(1, Ordering::SeqCst);
        self.check_open()?;
        if self.state.fail_get_next.load(Ordering::SeqCst) {
            return Err(SessionError::Timeout("mock".into()));
        }
        self.state.requested.lock().unwrap().extend(oids.iter().cloned());
        Ok(oids
            .iter()
            .map(|oid| match self.next_after(&key(oid)) {
                Some((k, v)) => VarBind::new(render(&k), v),
                None => VarBind::new(oid.clone(), SnmpValue::EndOfMibView),
            })
            .collect())
    }

    async fn get_bulk(
        &self,
        oids: &[String],
        max_repetitions: u32,
    ) -> Result<Vec<VarBind>, SessionError> {
        self.state.get_bulk_calls.fetch_add(1, Ordering::SeqCst);
        self.check_open()?;
        if self.version == SnmpVersion::V1 || self.state.fail_bulk.load(Ordering::SeqCst) {
            return Err(SessionError::Timeout("mock bulk".into()));
        }
        self.state.requested.lock().unwrap().extend(oids.iter().cloned());

        let mut cursors: Vec<Vec<u32>> = oids.iter().map(|o| key(o)).collect();
        let mut out = Vec::new();
        for _ in 0..max_repetitions {
            for cursor in cursors.iter_mut() {
                match self.next_after(cursor) {
                    Some((k, v)) => {
                        out.push(VarBind::new(render(&k), v));
                        *cursor = k;
                    }
                    None => out.push(VarBind::new(render(cursor), SnmpValue::EndOfMibView)),
                }
            }
        }
        Ok(out)
    }
}

/// Hands out pre-registered mock sessions, or empty ones for unknown IPs
#[derive(Clone, Default)]
pub struct MockSessionFactory {
    sessions: Arc<Mutex<HashMap<IpAddr, MockSession>>>,
    created: Arc<AtomicUsize>,
}

impl MockSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, ip: IpAddr, session: MockSession) {
        self.sessions.lock().unwrap().insert(ip, session);
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl SessionFactory for MockSessionFactory {
    fn create(&self, ip: IpAddr) -> Arc<dyn Session> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let sessions = self.sessions.lock().unwrap();
        match sessions.get(&ip) {
            Some(session) => Arc::new(session.clone()),
            None => {
                let unreachable = MockSession::new(SnmpVersion::V2c);
                unreachable.fail_connect(true);
                Arc::new(unreachable)
            }
        }
    }
}
