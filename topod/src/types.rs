// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2024 Oxide Computer Company

use std::fmt;
use std::net::Ipv4Addr;

use protocol::MacAddr;

use crate::errors;

pub type TopodResult<T> = Result<T, errors::TopodError>;

/// Value stored for capabilities, interface ids, and operating status that
/// could not be determined from a host's walk.
pub const UNKNOWN: i64 = -1;

/// System name stored for hosts that don't report one.
pub const UNKNOWN_NAME: &str = "Unknown";

/// A host that answered our scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Device {
    /// Row id in the store, once the device has been written
    pub id: Option<i64>,
    pub management_address: Ipv4Addr,
    /// LLDP system capabilities bitmasks.  Only the first octet of the
    /// advertised mask is kept.
    pub capabilities_supported: i64,
    pub capabilities_enabled: i64,
    pub system_name: String,
}

impl Device {
    pub fn new(management_address: Ipv4Addr) -> Self {
        Device {
            id: None,
            management_address,
            capabilities_supported: UNKNOWN,
            capabilities_enabled: UNKNOWN,
            system_name: UNKNOWN_NAME.to_string(),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.system_name, self.management_address)
    }
}

/// One interface on a device.  The MAC address is the port's identity; a
/// port without one is never stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Port {
    pub id: Option<i64>,
    pub device_id: Option<i64>,
    /// The interface's ifIndex on its device
    pub interface_id: i64,
    pub mac_address: Option<MacAddr>,
    /// ifSpeed, in bits per second
    pub max_speed: u32,
    pub operating_status: i64,
    pub name: String,
}

impl Default for Port {
    fn default() -> Self {
        Port {
            id: None,
            device_id: None,
            interface_id: UNKNOWN,
            mac_address: None,
            max_speed: 0,
            operating_status: UNKNOWN,
            name: String::new(),
        }
    }
}

/// A neighbor reported in a host's LLDP remote table, identified by its
/// chassis MAC and attached to one of the host's own interfaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemotePortCandidate {
    pub mac_address: MacAddr,
    pub local_interface_id: i64,
}

/// A cable between two stored ports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    pub id: Option<i64>,
    pub port_a_id: i64,
    pub port_b_id: i64,
    /// Never populated, always 0
    pub link_type: i64,
    /// The slower of the two ends' max speeds
    pub speed: u32,
    /// Never populated, always 0
    pub length: u32,
}

impl Link {
    pub fn new(port_a_id: i64, port_b_id: i64, speed: u32) -> Self {
        Link {
            id: None,
            port_a_id,
            port_b_id,
            link_type: 0,
            speed,
            length: 0,
        }
    }
}

/// Everything learned from one walk of one host.
#[derive(Clone, Debug)]
pub struct Observation {
    pub device: Device,
    pub ports: Vec<Port>,
    pub remotes: Vec<RemotePortCandidate>,
}

impl Observation {
    /// The neighbor seen on the given local interface, if any.  When a host
    /// reports more than one neighbor on an interface the first one wins.
    pub fn remote_for(
        &self,
        interface_id: i64,
    ) -> Option<&RemotePortCandidate> {
        self.remotes
            .iter()
            .find(|r| r.local_interface_id == interface_id)
    }
}
