//! Subnet discovery
//!
//! Walks configured CIDR ranges, probes every address and tracks the devices
//! that answered in a concurrent registry the scheduler iterates.

use crate::device::SharedDevice;
use crate::error::ConfigError;
use crate::fetch::ResultValue;
use crate::oid::well_known;
use crate::session::SessionFactory;
use dashmap::DashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use tracing::debug;

/// An IPv4 CIDR range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    cidr: String,
    network: u32,
    prefix: u8,
}

impl Subnet {
    pub fn parse(cidr: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidCidr(cidr.to_string());
        let (addr, prefix) = cidr.trim().split_once('/').ok_or_else(invalid)?;
        let addr = Ipv4Addr::from_str(addr).map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        if prefix > 32 {
            return Err(invalid());
        }
        Ok(Self {
            cidr: cidr.trim().to_string(),
            network: u32::from(addr) & mask(prefix),
            prefix,
        })
    }

    pub fn cidr(&self) -> &str {
        &self.cidr
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => u32::from(*v4) & mask(self.prefix) == self.network,
            IpAddr::V6(_) => false,
        }
    }

    /// Number of addresses in the range
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix))
    }

    /// Every address from the network to the broadcast address, inclusive
    pub fn hosts(&self) -> impl Iterator<Item = IpAddr> {
        let first = u64::from(self.network);
        let last = first + self.size() - 1;
        (first..=last).map(|n| IpAddr::V4(Ipv4Addr::from(n as u32)))
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cidr)
    }
}

fn mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

/// Devices promoted by discovery, keyed by IP
#[derive(Default)]
pub struct DeviceRegistry {
    devices: DashMap<IpAddr, SharedDevice>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the IP was already registered; the existing device is kept
    pub fn register(&self, ip: IpAddr, device: SharedDevice) -> bool {
        match self.devices.entry(ip) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!(device_ip = %ip, "Registering discovered device");
                slot.insert(device);
                true
            }
        }
    }

    pub fn unregister(&self, ip: &IpAddr) -> Option<SharedDevice> {
        self.devices.remove(ip).map(|(_, device)| device)
    }

    pub fn get(&self, ip: &IpAddr) -> Option<SharedDevice> {
        self.devices.get(ip).map(|r| r.value().clone())
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.devices.contains_key(ip)
    }

    pub fn list(&self) -> Vec<(IpAddr, SharedDevice)> {
        self.devices
            .iter()
            .map(|r| (*r.key(), r.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Remove every device, returning them so their sessions can be closed
    pub fn drain(&self) -> Vec<SharedDevice> {
        let ips: Vec<IpAddr> = self.devices.iter().map(|r| *r.key()).collect();
        ips.iter().filter_map(|ip| self.unregister(ip)).collect()
    }
}

/// Probe one address with a fresh session: connect, then get-next on the
/// system group. True when the device answered with a value.
///
/// The probe session is dropped, not closed.
pub async fn probe(factory: &dyn SessionFactory, ip: IpAddr) -> bool {
    let session = factory.create(ip);
    if let Err(e) = session.connect().await {
        debug!(device_ip = %ip, error = %e, "SNMP connect failed");
        return false;
    }

    match session
        .get_next(&[well_known::DEVICE_REACHABLE_GET_NEXT.to_string()])
        .await
    {
        Ok(varbinds) => varbinds
            .first()
            .and_then(|vb| ResultValue::from_snmp(&vb.value))
            .is_some(),
        Err(e) => {
            debug!(device_ip = %ip, error = %e, "SNMP get-next failed");
            false
        }
    }
}
