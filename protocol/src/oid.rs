// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2024 Oxide Computer Company

//! Object identifiers walked on every host, in the numeric form printed by
//! `snmpwalk -One`.

// LLDP-MIB, local system data
pub const LLDP_LOC_SYS_NAME: &str = ".1.0.8802.1.1.2.1.3.3";
pub const LLDP_LOC_SYS_CAP_SUPPORTED: &str = ".1.0.8802.1.1.2.1.3.5";
pub const LLDP_LOC_SYS_CAP_ENABLED: &str = ".1.0.8802.1.1.2.1.3.6";
pub const LLDP_LOC_PORT_ID_SUBTYPE: &str = ".1.0.8802.1.1.2.1.3.7.1.2";
pub const LLDP_LOC_PORT_ID: &str = ".1.0.8802.1.1.2.1.3.7.1.3";

// IF-MIB, interface table
pub const IF_INDEX: &str = ".1.3.6.1.2.1.2.2.1.1";
pub const IF_TYPE: &str = ".1.3.6.1.2.1.2.2.1.3";
pub const IF_SPEED: &str = ".1.3.6.1.2.1.2.2.1.5";
pub const IF_PHYS_ADDRESS: &str = ".1.3.6.1.2.1.2.2.1.6";
pub const IF_OPER_STATUS: &str = ".1.3.6.1.2.1.2.2.1.8";
pub const IF_NAME: &str = ".1.3.6.1.2.1.31.1.1.1.1";

// LLDP-MIB, remote systems table.  Rows are indexed by
// lldpRemTimeMark.lldpRemLocalPortNum.lldpRemIndex.
pub const LLDP_REM_CHASSIS_ID_SUBTYPE: &str = ".1.0.8802.1.1.2.1.4.1.1.4";
pub const LLDP_REM_CHASSIS_ID: &str = ".1.0.8802.1.1.2.1.4.1.1.5";
pub const LLDP_REM_PORT_ID_SUBTYPE: &str = ".1.0.8802.1.1.2.1.4.1.1.6";
pub const LLDP_REM_PORT_ID: &str = ".1.0.8802.1.1.2.1.4.1.1.7";
pub const LLDP_REM_SYS_NAME: &str = ".1.0.8802.1.1.2.1.4.1.1.9";
pub const LLDP_REM_SYS_CAP_SUPPORTED: &str = ".1.0.8802.1.1.2.1.4.1.1.11";
pub const LLDP_REM_SYS_CAP_ENABLED: &str = ".1.0.8802.1.1.2.1.4.1.1.12";

const INTERFACE_OIDS: [&str; 6] = [
    IF_INDEX,
    IF_TYPE,
    IF_SPEED,
    IF_PHYS_ADDRESS,
    IF_OPER_STATUS,
    IF_NAME,
];

const REMOTE_OIDS: [&str; 7] = [
    LLDP_REM_CHASSIS_ID_SUBTYPE,
    LLDP_REM_CHASSIS_ID,
    LLDP_REM_PORT_ID_SUBTYPE,
    LLDP_REM_PORT_ID,
    LLDP_REM_SYS_NAME,
    LLDP_REM_SYS_CAP_SUPPORTED,
    LLDP_REM_SYS_CAP_ENABLED,
];

const LOCAL_OIDS: [&str; 5] = [
    LLDP_LOC_SYS_NAME,
    LLDP_LOC_SYS_CAP_SUPPORTED,
    LLDP_LOC_SYS_CAP_ENABLED,
    LLDP_LOC_PORT_ID_SUBTYPE,
    LLDP_LOC_PORT_ID,
];

/// An ordered list of OIDs to walk and to recognize in walk output.  Order
/// matters: when a line matches more than one entry, the earliest one wins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Catalog {
    oids: Vec<&'static str>,
}

impl Catalog {
    pub fn new(oids: Vec<&'static str>) -> Self {
        Catalog { oids }
    }

    /// Everything needed to build a host's device, ports, and neighbors.
    /// Used for the first sweep and for trap-driven refreshes.
    pub fn initial() -> Self {
        let mut oids = LOCAL_OIDS.to_vec();
        oids.extend(INTERFACE_OIDS);
        oids.extend(REMOTE_OIDS);
        Catalog { oids }
    }

    /// Just the interface and neighbor tables, which are the parts of a
    /// host that change once it has been discovered.
    pub fn periodic() -> Self {
        let mut oids = INTERFACE_OIDS.to_vec();
        oids.extend(REMOTE_OIDS);
        Catalog { oids }
    }

    pub fn oids(&self) -> &[&'static str] {
        &self.oids
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.oids.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.oids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.oids.is_empty()
    }
}
