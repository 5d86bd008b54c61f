// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2024 Oxide Computer Company

//! The persistent topology graph: devices, their ports, and the links
//! between ports, kept in SQLite.  Devices are identified by management
//! address and ports by MAC address; the integer row ids are resolved from
//! those natural keys whenever a record is written.

use std::net::Ipv4Addr;
use std::path::Path;

use rusqlite::params;
use rusqlite::types::Type;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use slog::debug;
use slog::info;

use protocol::MacAddr;

use crate::errors::TopodError;
use crate::types::Device;
use crate::types::Link;
use crate::types::Observation;
use crate::types::Port;
use crate::TopodResult;

const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS "Devices" (
    "Id" INTEGER,
    "ManagementAddress" INTEGER,
    "CapabilitiesSupported" INTEGER,
    "CapabilitiesEnabled" INTEGER,
    "SystemName" TEXT,
    PRIMARY KEY("Id" AUTOINCREMENT)
);
CREATE TABLE IF NOT EXISTS "Ports" (
    "Id" INTEGER,
    "DeviceId" INTEGER,
    "InterfaceId" INTEGER,
    "MACAddress" TEXT,
    "MaxSpeed" INTEGER,
    "OperatingStatus" INTEGER,
    "Name" TEXT,
    PRIMARY KEY("Id" AUTOINCREMENT),
    FOREIGN KEY("DeviceId") REFERENCES "Devices"("Id")
);
CREATE TABLE IF NOT EXISTS "Links" (
    "Id" INTEGER,
    "PortAId" INTEGER,
    "PortBId" INTEGER,
    "LinkType" INTEGER,
    "Speed" INTEGER,
    "Length" INTEGER,
    PRIMARY KEY("Id" AUTOINCREMENT),
    FOREIGN KEY("PortAId") REFERENCES "Ports"("Id"),
    FOREIGN KEY("PortBId") REFERENCES "Ports"("Id")
);
"#;

const DROP_TABLES: &str = r#"
DROP TABLE IF EXISTS "Links";
DROP TABLE IF EXISTS "Ports";
DROP TABLE IF EXISTS "Devices";
"#;

const DEVICE_COLUMNS: &str = r#""Id", "ManagementAddress",
    "CapabilitiesSupported", "CapabilitiesEnabled", "SystemName""#;
const PORT_COLUMNS: &str = r#""Id", "DeviceId", "InterfaceId", "MACAddress",
    "MaxSpeed", "OperatingStatus", "Name""#;
const LINK_COLUMNS: &str =
    r#""Id", "PortAId", "PortBId", "LinkType", "Speed", "Length""#;

fn addr_key(addr: Ipv4Addr) -> i64 {
    i64::from(u32::from(addr))
}

fn row_to_device(row: &Row) -> rusqlite::Result<Device> {
    let addr: i64 = row.get(1)?;
    let addr = u32::try_from(addr).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, Type::Integer, Box::new(e))
    })?;
    Ok(Device {
        id: row.get(0)?,
        management_address: Ipv4Addr::from(addr),
        capabilities_supported: row.get(2)?,
        capabilities_enabled: row.get(3)?,
        system_name: row.get(4)?,
    })
}

fn row_to_port(row: &Row) -> rusqlite::Result<Port> {
    let mac: Option<String> = row.get(3)?;
    let mac_address = match mac {
        Some(mac) => Some(mac.parse::<MacAddr>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                Type::Text,
                Box::new(e),
            )
        })?),
        None => None,
    };
    Ok(Port {
        id: row.get(0)?,
        device_id: row.get(1)?,
        interface_id: row.get(2)?,
        mac_address,
        max_speed: row.get(4)?,
        operating_status: row.get(5)?,
        name: row.get(6)?,
    })
}

fn row_to_link(row: &Row) -> rusqlite::Result<Link> {
    Ok(Link {
        id: row.get(0)?,
        port_a_id: row.get(1)?,
        port_b_id: row.get(2)?,
        link_type: row.get(3)?,
        speed: row.get(4)?,
        length: row.get(5)?,
    })
}

fn port_mac(port: &Port) -> TopodResult<String> {
    port.mac_address.map(|m| m.to_string()).ok_or_else(|| {
        TopodError::Invalid(format!(
            "port {} has no MAC address",
            port.interface_id
        ))
    })
}

/// Counts of what a single [`Store::reconcile`] call wrote.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub device_id: i64,
    pub ports: usize,
    pub links_upserted: usize,
    pub links_removed: usize,
}

pub struct Store {
    conn: Connection,
    log: slog::Logger,
}

impl Store {
    /// Open (creating if needed) the store at `path`.
    pub fn open(
        path: impl AsRef<Path>,
        log: &slog::Logger,
    ) -> TopodResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        let log = log.new(slog::o!("unit" => "store"));
        info!(log, "opened topology store at {}", path.display());
        Store::init(conn, log)
    }

    /// A store that lives only as long as the returned value.
    #[cfg(test)]
    pub fn in_memory(log: &slog::Logger) -> TopodResult<Self> {
        let conn = Connection::open_in_memory()?;
        Store::init(conn, log.new(slog::o!("unit" => "store")))
    }

    fn init(conn: Connection, log: slog::Logger) -> TopodResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Store { conn, log };
        store.create_tables()?;
        Ok(store)
    }

    pub fn create_tables(&self) -> TopodResult<()> {
        self.conn.execute_batch(CREATE_TABLES)?;
        Ok(())
    }

    /// Throw away everything and start with empty tables.
    pub fn reset(&self) -> TopodResult<()> {
        self.conn.execute_batch(DROP_TABLES)?;
        self.create_tables()?;
        debug!(self.log, "reset topology store");
        Ok(())
    }

    // Run `f` inside a savepoint, rolling back everything it wrote if it
    // fails.  Savepoints nest, so `f` may itself use one.
    fn with_savepoint<T>(
        &self,
        name: &str,
        f: impl FnOnce(&Self) -> TopodResult<T>,
    ) -> TopodResult<T> {
        self.conn.execute_batch(&format!("SAVEPOINT {name}"))?;
        match f(self) {
            Ok(v) => {
                self.conn.execute_batch(&format!("RELEASE SAVEPOINT {name}"))?;
                Ok(v)
            }
            Err(e) => {
                let _ = self.conn.execute_batch(&format!(
                    "ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}"
                ));
                Err(e)
            }
        }
    }

    pub fn device_id(&self, addr: Ipv4Addr) -> TopodResult<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                r#"SELECT "Id" FROM "Devices" WHERE "ManagementAddress" = ?1"#,
                params![addr_key(addr)],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn device_exists(&self, addr: Ipv4Addr) -> TopodResult<bool> {
        Ok(self.device_id(addr)?.is_some())
    }

    pub fn insert_device(&self, device: &Device) -> TopodResult<i64> {
        self.conn.execute(
            r#"INSERT INTO "Devices" ("ManagementAddress",
                "CapabilitiesSupported", "CapabilitiesEnabled", "SystemName")
               VALUES (?1, ?2, ?3, ?4)"#,
            params![
                addr_key(device.management_address),
                device.capabilities_supported,
                device.capabilities_enabled,
                device.system_name,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Overwrite the stored device with the same management address.
    pub fn update_device(&self, device: &Device) -> TopodResult<()> {
        self.conn.execute(
            r#"UPDATE "Devices" SET "CapabilitiesSupported" = ?2,
                "CapabilitiesEnabled" = ?3, "SystemName" = ?4
               WHERE "ManagementAddress" = ?1"#,
            params![
                addr_key(device.management_address),
                device.capabilities_supported,
                device.capabilities_enabled,
                device.system_name,
            ],
        )?;
        Ok(())
    }

    /// Insert or update `device`, filling in its row id.
    pub fn upsert_device(&self, device: &mut Device) -> TopodResult<i64> {
        if self.device_exists(device.management_address)? {
            self.update_device(device)?;
        } else {
            self.insert_device(device)?;
        }
        let id = self.device_id(device.management_address)?.ok_or_else(|| {
            TopodError::Store(format!("lost device {device}"))
        })?;
        device.id = Some(id);
        Ok(id)
    }

    pub fn get_device(&self, addr: Ipv4Addr) -> TopodResult<Option<Device>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    r#"SELECT {DEVICE_COLUMNS} FROM "Devices"
                       WHERE "ManagementAddress" = ?1"#
                ),
                params![addr_key(addr)],
                row_to_device,
            )
            .optional()?)
    }

    /// Remove a device along with all of its ports and their links.
    /// Returns `false` if there was no such device.
    pub fn delete_device(&self, addr: Ipv4Addr) -> TopodResult<bool> {
        let Some(id) = self.device_id(addr)? else {
            return Ok(false);
        };
        self.with_savepoint("delete_device", |s| {
            for port in s.ports_for_device(id)? {
                if let Some(port_id) = port.id {
                    s.delete_links_for_port(port_id)?;
                }
            }
            s.conn.execute(
                r#"DELETE FROM "Ports" WHERE "DeviceId" = ?1"#,
                params![id],
            )?;
            s.conn.execute(
                r#"DELETE FROM "Devices" WHERE "Id" = ?1"#,
                params![id],
            )?;
            Ok(())
        })?;
        debug!(self.log, "deleted device {addr}");
        Ok(true)
    }

    pub fn port_id(&self, mac: MacAddr) -> TopodResult<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                r#"SELECT "Id" FROM "Ports" WHERE "MACAddress" = ?1"#,
                params![mac.to_string()],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn port_exists(&self, mac: MacAddr) -> TopodResult<bool> {
        Ok(self.port_id(mac)?.is_some())
    }

    pub fn insert_port(&self, port: &Port) -> TopodResult<i64> {
        let mac = port_mac(port)?;
        self.conn.execute(
            r#"INSERT INTO "Ports" ("DeviceId", "InterfaceId", "MACAddress",
                "MaxSpeed", "OperatingStatus", "Name")
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                port.device_id,
                port.interface_id,
                mac,
                port.max_speed,
                port.operating_status,
                port.name,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Overwrite the stored port with the same MAC address.
    pub fn update_port(&self, port: &Port) -> TopodResult<()> {
        let mac = port_mac(port)?;
        self.conn.execute(
            r#"UPDATE "Ports" SET "DeviceId" = ?1, "InterfaceId" = ?2,
                "MaxSpeed" = ?4, "OperatingStatus" = ?5, "Name" = ?6
               WHERE "MACAddress" = ?3"#,
            params![
                port.device_id,
                port.interface_id,
                mac,
                port.max_speed,
                port.operating_status,
                port.name,
            ],
        )?;
        Ok(())
    }

    /// Insert or update `port`, filling in its row id.
    pub fn upsert_port(&self, port: &mut Port) -> TopodResult<i64> {
        let Some(mac) = port.mac_address else {
            return Err(TopodError::Invalid(format!(
                "port {} has no MAC address",
                port.interface_id
            )));
        };
        if self.port_exists(mac)? {
            self.update_port(port)?;
        } else {
            self.insert_port(port)?;
        }
        let id = self
            .port_id(mac)?
            .ok_or_else(|| TopodError::Store(format!("lost port {mac}")))?;
        port.id = Some(id);
        Ok(id)
    }

    pub fn get_port(&self, mac: MacAddr) -> TopodResult<Option<Port>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    r#"SELECT {PORT_COLUMNS} FROM "Ports"
                       WHERE "MACAddress" = ?1"#
                ),
                params![mac.to_string()],
                row_to_port,
            )
            .optional()?)
    }

    pub fn ports_for_device(&self, device_id: i64) -> TopodResult<Vec<Port>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"SELECT {PORT_COLUMNS} FROM "Ports" WHERE "DeviceId" = ?1
               ORDER BY "Id""#
        ))?;
        let ports = stmt
            .query_map(params![device_id], row_to_port)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ports)
    }

    /// Remove a port and any link attached to it.  Returns `false` if
    /// there was no such port.
    pub fn delete_port(&self, mac: MacAddr) -> TopodResult<bool> {
        let Some(id) = self.port_id(mac)? else {
            return Ok(false);
        };
        self.with_savepoint("delete_port", |s| {
            s.delete_links_for_port(id)?;
            s.conn.execute(
                r#"DELETE FROM "Ports" WHERE "Id" = ?1"#,
                params![id],
            )?;
            Ok(())
        })?;
        debug!(self.log, "deleted port {mac}");
        Ok(true)
    }

    /// The id of the link between two ports.  Either port may be the A
    /// side, since both ends of a cable report it.
    pub fn link_id(&self, a: i64, b: i64) -> TopodResult<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                r#"SELECT "Id" FROM "Links"
                   WHERE ("PortAId" = ?1 AND "PortBId" = ?2)
                      OR ("PortAId" = ?2 AND "PortBId" = ?1)
                   ORDER BY "Id" LIMIT 1"#,
                params![a, b],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn link_exists(&self, a: i64, b: i64) -> TopodResult<bool> {
        Ok(self.link_id(a, b)?.is_some())
    }

    pub fn insert_link(&self, link: &Link) -> TopodResult<i64> {
        self.conn.execute(
            r#"INSERT INTO "Links" ("PortAId", "PortBId", "LinkType",
                "Speed", "Length")
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![
                link.port_a_id,
                link.port_b_id,
                link.link_type,
                link.speed,
                link.length,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Overwrite the stored link between the same pair of ports.
    pub fn update_link(&self, link: &Link) -> TopodResult<()> {
        self.conn.execute(
            r#"UPDATE "Links" SET "LinkType" = ?3, "Speed" = ?4,
                "Length" = ?5
               WHERE ("PortAId" = ?1 AND "PortBId" = ?2)
                  OR ("PortAId" = ?2 AND "PortBId" = ?1)"#,
            params![
                link.port_a_id,
                link.port_b_id,
                link.link_type,
                link.speed,
                link.length,
            ],
        )?;
        Ok(())
    }

    /// Insert or update `link`, filling in its row id.
    pub fn upsert_link(&self, link: &mut Link) -> TopodResult<i64> {
        if self.link_exists(link.port_a_id, link.port_b_id)? {
            self.update_link(link)?;
        } else {
            self.insert_link(link)?;
        }
        let id =
            self.link_id(link.port_a_id, link.port_b_id)?.ok_or_else(|| {
                TopodError::Store(format!(
                    "lost link {}-{}",
                    link.port_a_id, link.port_b_id
                ))
            })?;
        link.id = Some(id);
        Ok(id)
    }

    /// The link attached to a port, on either side.
    pub fn link_for_port(&self, port_id: i64) -> TopodResult<Option<Link>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    r#"SELECT {LINK_COLUMNS} FROM "Links"
                       WHERE "PortAId" = ?1 OR "PortBId" = ?1
                       ORDER BY "Id" LIMIT 1"#
                ),
                params![port_id],
                row_to_link,
            )
            .optional()?)
    }

    pub fn delete_link(&self, a: i64, b: i64) -> TopodResult<bool> {
        let n = self.conn.execute(
            r#"DELETE FROM "Links"
               WHERE ("PortAId" = ?1 AND "PortBId" = ?2)
                  OR ("PortAId" = ?2 AND "PortBId" = ?1)"#,
            params![a, b],
        )?;
        Ok(n > 0)
    }

    /// Remove every link attached to a port, returning how many there were.
    pub fn delete_links_for_port(&self, port_id: i64) -> TopodResult<usize> {
        Ok(self.conn.execute(
            r#"DELETE FROM "Links" WHERE "PortAId" = ?1 OR "PortBId" = ?1"#,
            params![port_id],
        )?)
    }

    /// Remove every link attached to `port_id` except one to `peer_id`,
    /// returning how many were removed.
    pub fn delete_other_links_for_port(
        &self,
        port_id: i64,
        peer_id: i64,
    ) -> TopodResult<usize> {
        Ok(self.conn.execute(
            r#"DELETE FROM "Links"
               WHERE ("PortAId" = ?1 AND "PortBId" != ?2)
                  OR ("PortBId" = ?1 AND "PortAId" != ?2)"#,
            params![port_id, peer_id],
        )?)
    }

    pub fn devices(&self) -> TopodResult<Vec<Device>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"SELECT {DEVICE_COLUMNS} FROM "Devices" ORDER BY "Id""#
        ))?;
        let devices = stmt
            .query_map([], row_to_device)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(devices)
    }

    pub fn ports(&self) -> TopodResult<Vec<Port>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"SELECT {PORT_COLUMNS} FROM "Ports" ORDER BY "Id""#
        ))?;
        let ports = stmt
            .query_map([], row_to_port)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ports)
    }

    pub fn links(&self) -> TopodResult<Vec<Link>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"SELECT {LINK_COLUMNS} FROM "Links" ORDER BY "Id""#
        ))?;
        let links = stmt
            .query_map([], row_to_link)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(links)
    }

    /// Bring the store in line with what one host just reported: the
    /// device and each of its ports are written, and each port's link is
    /// created, updated, or removed depending on whether its LLDP neighbor
    /// is a port we already know about.  Either all of this lands or none
    /// of it does.
    pub fn reconcile(
        &self,
        observation: &Observation,
        log: &slog::Logger,
    ) -> TopodResult<ReconcileStats> {
        self.with_savepoint("reconcile", |s| {
            s.reconcile_inner(observation, log)
        })
    }

    fn reconcile_inner(
        &self,
        observation: &Observation,
        log: &slog::Logger,
    ) -> TopodResult<ReconcileStats> {
        let mut device = observation.device.clone();
        let device_id = self.upsert_device(&mut device)?;
        let mut stats = ReconcileStats {
            device_id,
            ..Default::default()
        };

        for port in &observation.ports {
            if port.mac_address.is_none() {
                continue;
            }
            let mut port = port.clone();
            port.device_id = Some(device_id);
            let port_id = self.upsert_port(&mut port)?;
            stats.ports += 1;

            let remote = match observation.remote_for(port.interface_id) {
                Some(candidate) => self.get_port(candidate.mac_address)?,
                None => None,
            };
            match remote {
                Some(Port {
                    id: Some(remote_id),
                    max_speed,
                    ..
                }) if remote_id != port_id => {
                    let removed =
                        self.delete_other_links_for_port(port_id, remote_id)?;
                    if removed > 0 {
                        debug!(log, "{} was recabled", port.name;
                            "removed" => removed);
                    }
                    stats.links_removed += removed;
                    let speed = port.max_speed.min(max_speed);
                    let mut link = Link::new(port_id, remote_id, speed);
                    self.upsert_link(&mut link)?;
                    debug!(log, "link {} <-> {}", port.name, remote_id;
                        "speed" => speed);
                    stats.links_upserted += 1;
                }
                _ => {
                    let removed = self.delete_links_for_port(port_id)?;
                    if removed > 0 {
                        debug!(log, "removed stale link from {}", port.name);
                    }
                    stats.links_removed += removed;
                }
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RemotePortCandidate;

    fn log() -> slog::Logger {
        common::logging::discard()
    }

    const HOST_A: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const HOST_B: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    fn mac(last: u8) -> MacAddr {
        MacAddr::new(0x00, 0x1b, 0x21, 0x0a, 0x0b, last)
    }

    fn port(interface_id: i64, mac: MacAddr, max_speed: u32) -> Port {
        Port {
            interface_id,
            mac_address: Some(mac),
            max_speed,
            operating_status: 1,
            name: format!("eth{interface_id}"),
            ..Default::default()
        }
    }

    fn observation(
        host: Ipv4Addr,
        ports: Vec<Port>,
        remotes: Vec<(MacAddr, i64)>,
    ) -> Observation {
        let mut device = Device::new(host);
        device.system_name = format!("sw-{host}");
        device.capabilities_supported = 0x28;
        device.capabilities_enabled = 0x08;
        Observation {
            device,
            ports,
            remotes: remotes
                .into_iter()
                .map(|(mac_address, local_interface_id)| RemotePortCandidate {
                    mac_address,
                    local_interface_id,
                })
                .collect(),
        }
    }

    // Two switches cabled together: A's interface 1 to B's interface 3.
    fn pair() -> (Observation, Observation) {
        let a = observation(
            HOST_A,
            vec![port(1, mac(0xa1), 1_000_000_000), port(2, mac(0xa2), 0)],
            vec![(mac(0xb3), 1)],
        );
        let b = observation(
            HOST_B,
            vec![port(3, mac(0xb3), 100_000_000)],
            vec![(mac(0xa1), 3)],
        );
        (a, b)
    }

    #[test]
    fn test_device_upsert() {
        let store = Store::in_memory(&log()).unwrap();
        let mut d = Device::new(HOST_A);
        assert!(!store.device_exists(HOST_A).unwrap());
        let id = store.upsert_device(&mut d).unwrap();
        assert_eq!(d.id, Some(id));

        d.system_name = "renamed".to_string();
        assert_eq!(store.upsert_device(&mut d).unwrap(), id);
        let stored = store.get_device(HOST_A).unwrap().unwrap();
        assert_eq!(stored, d);
        assert_eq!(store.devices().unwrap().len(), 1);
        assert!(store.get_device(HOST_B).unwrap().is_none());
    }

    #[test]
    fn test_port_without_mac_is_rejected() {
        let store = Store::in_memory(&log()).unwrap();
        let mut p = Port::default();
        assert!(matches!(
            store.upsert_port(&mut p),
            Err(TopodError::Invalid(_))
        ));
        assert!(store.insert_port(&p).is_err());

        let mut obs = observation(HOST_A, vec![port(1, mac(1), 10)], vec![]);
        obs.ports.push(Port {
            interface_id: 2,
            ..Default::default()
        });
        let stats = store.reconcile(&obs, &log()).unwrap();
        assert_eq!(stats.ports, 1);
        let ports = store.ports().unwrap();
        assert_eq!(ports.len(), 1);
        assert!(ports.iter().all(|p| p.mac_address.is_some()));
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let store = Store::in_memory(&log()).unwrap();
        let (a, b) = pair();
        store.reconcile(&a, &log()).unwrap();
        store.reconcile(&b, &log()).unwrap();

        let devices = store.devices().unwrap();
        let ports = store.ports().unwrap();
        let links = store.links().unwrap();

        store.reconcile(&a, &log()).unwrap();
        store.reconcile(&b, &log()).unwrap();

        assert_eq!(store.devices().unwrap(), devices);
        assert_eq!(store.ports().unwrap(), ports);
        assert_eq!(store.links().unwrap(), links);
        assert_eq!(devices.len(), 2);
        assert_eq!(ports.len(), 3);
    }

    #[test]
    fn test_mutual_neighbors_make_one_link() {
        let store = Store::in_memory(&log()).unwrap();
        let (a, b) = pair();

        // A's neighbor isn't stored yet, so no link.
        let stats = store.reconcile(&a, &log()).unwrap();
        assert_eq!(stats.links_upserted, 0);
        assert!(store.links().unwrap().is_empty());

        let stats = store.reconcile(&b, &log()).unwrap();
        assert_eq!(stats.links_upserted, 1);
        let stats = store.reconcile(&a, &log()).unwrap();
        assert_eq!(stats.links_upserted, 1);

        let links = store.links().unwrap();
        assert_eq!(links.len(), 1);
        let link = &links[0];
        assert_eq!(link.speed, 100_000_000);
        assert_eq!(link.link_type, 0);
        assert_eq!(link.length, 0);

        let a1 = store.port_id(mac(0xa1)).unwrap().unwrap();
        let b3 = store.port_id(mac(0xb3)).unwrap().unwrap();
        assert!(store.link_exists(a1, b3).unwrap());
        assert!(store.link_exists(b3, a1).unwrap());
        assert_eq!(store.link_for_port(a1).unwrap().as_ref(), Some(link));

        let a2 = store.port_id(mac(0xa2)).unwrap().unwrap();
        assert!(store.link_for_port(a2).unwrap().is_none());
    }

    #[test]
    fn test_recabled_port_drops_old_link() {
        let store = Store::in_memory(&log()).unwrap();
        let (a, b) = pair();
        store.reconcile(&a, &log()).unwrap();
        store.reconcile(&b, &log()).unwrap();
        let c = observation(
            Ipv4Addr::new(10, 0, 0, 3),
            vec![port(7, mac(0xc7), 1_000_000_000)],
            vec![],
        );
        store.reconcile(&c, &log()).unwrap();
        assert_eq!(store.links().unwrap().len(), 1);

        // A's interface 1 now sees C's interface 7 instead of B's 3.
        let mut a = a;
        a.remotes[0].mac_address = mac(0xc7);
        let stats = store.reconcile(&a, &log()).unwrap();
        assert_eq!(stats.links_upserted, 1);
        assert_eq!(stats.links_removed, 1);

        let a1 = store.port_id(mac(0xa1)).unwrap().unwrap();
        let b3 = store.port_id(mac(0xb3)).unwrap().unwrap();
        let c7 = store.port_id(mac(0xc7)).unwrap().unwrap();
        let links = store.links().unwrap();
        let touching: Vec<_> = links
            .iter()
            .filter(|l| l.port_a_id == a1 || l.port_b_id == a1)
            .collect();
        assert_eq!(touching.len(), 1);
        assert!(store.link_exists(a1, c7).unwrap());
        assert!(!store.link_exists(a1, b3).unwrap());
        let link = store.link_for_port(a1).unwrap().unwrap();
        assert_eq!(link.speed, 1_000_000_000);

        // Reporting the same neighbor again removes nothing.
        let stats = store.reconcile(&a, &log()).unwrap();
        assert_eq!(stats.links_removed, 0);
        assert_eq!(store.links().unwrap().len(), 1);
    }

    #[test]
    fn test_vanished_neighbor_removes_link() {
        let store = Store::in_memory(&log()).unwrap();
        let (a, b) = pair();
        store.reconcile(&a, &log()).unwrap();
        store.reconcile(&b, &log()).unwrap();
        assert_eq!(store.links().unwrap().len(), 1);

        let mut b = b;
        b.remotes.clear();
        let stats = store.reconcile(&b, &log()).unwrap();
        assert_eq!(stats.links_removed, 1);
        assert!(store.links().unwrap().is_empty());
        // Both ports are still there.
        assert_eq!(store.ports().unwrap().len(), 3);
    }

    #[test]
    fn test_unresolvable_neighbor_removes_link() {
        let store = Store::in_memory(&log()).unwrap();
        let (a, b) = pair();
        store.reconcile(&a, &log()).unwrap();
        store.reconcile(&b, &log()).unwrap();

        let mut b = b;
        b.remotes[0].mac_address = mac(0xee);
        store.reconcile(&b, &log()).unwrap();
        assert!(store.links().unwrap().is_empty());
    }

    #[test]
    fn test_port_moves_between_devices() {
        let store = Store::in_memory(&log()).unwrap();
        let a = observation(HOST_A, vec![port(1, mac(1), 10)], vec![]);
        let b = observation(HOST_B, vec![port(7, mac(1), 20)], vec![]);
        let a_stats = store.reconcile(&a, &log()).unwrap();
        let b_stats = store.reconcile(&b, &log()).unwrap();

        let ports = store.ports().unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].device_id, Some(b_stats.device_id));
        assert_eq!(ports[0].interface_id, 7);
        assert!(store.ports_for_device(a_stats.device_id).unwrap().is_empty());
    }

    #[test]
    fn test_delete_device_cascades() {
        let store = Store::in_memory(&log()).unwrap();
        let (a, b) = pair();
        store.reconcile(&a, &log()).unwrap();
        store.reconcile(&b, &log()).unwrap();

        assert!(store.delete_device(HOST_B).unwrap());
        assert!(!store.delete_device(HOST_B).unwrap());
        assert_eq!(store.devices().unwrap().len(), 1);
        assert_eq!(store.ports().unwrap().len(), 2);
        assert!(store.links().unwrap().is_empty());
        assert!(!store.port_exists(mac(0xb3)).unwrap());
    }

    #[test]
    fn test_delete_port_cascades() {
        let store = Store::in_memory(&log()).unwrap();
        let (a, b) = pair();
        store.reconcile(&a, &log()).unwrap();
        store.reconcile(&b, &log()).unwrap();

        assert!(store.delete_port(mac(0xa1)).unwrap());
        assert!(!store.delete_port(mac(0xa1)).unwrap());
        assert!(store.links().unwrap().is_empty());
        assert_eq!(store.ports().unwrap().len(), 2);
    }

    #[test]
    fn test_link_crud() {
        let store = Store::in_memory(&log()).unwrap();
        let obs = observation(
            HOST_A,
            vec![port(1, mac(1), 10), port(2, mac(2), 20)],
            vec![],
        );
        store.reconcile(&obs, &log()).unwrap();
        let p1 = store.port_id(mac(1)).unwrap().unwrap();
        let p2 = store.port_id(mac(2)).unwrap().unwrap();

        let mut link = Link::new(p1, p2, 10);
        let id = store.upsert_link(&mut link).unwrap();
        assert_eq!(link.id, Some(id));

        let mut reversed = Link::new(p2, p1, 5);
        assert_eq!(store.upsert_link(&mut reversed).unwrap(), id);
        let links = store.links().unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].speed, 5);

        assert!(store.delete_link(p2, p1).unwrap());
        assert!(!store.delete_link(p1, p2).unwrap());
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let store = Store::in_memory(&log()).unwrap();
        let link = Link::new(100, 200, 10);
        assert!(matches!(
            store.insert_link(&link),
            Err(TopodError::Store(_))
        ));
    }

    #[test]
    fn test_failed_reconcile_rolls_back() {
        let store = Store::in_memory(&log()).unwrap();
        let mut obs = observation(HOST_A, vec![port(1, mac(1), 10)], vec![]);
        store.reconcile(&obs, &log()).unwrap();
        let before = store.ports().unwrap();

        // Dropping the links table makes the stale-link cleanup fail after
        // the device and port have already been written.
        store.conn.execute_batch(r#"DROP TABLE "Links""#).unwrap();
        obs.device.system_name = "changed".to_string();
        obs.ports[0].max_speed = 99;
        assert!(store.reconcile(&obs, &log()).is_err());

        assert_eq!(
            store.get_device(HOST_A).unwrap().unwrap().system_name,
            format!("sw-{HOST_A}")
        );
        assert_eq!(store.ports().unwrap(), before);
    }

    #[test]
    fn test_file_store_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.db");
        let (a, _) = pair();
        {
            let store = Store::open(&path, &log()).unwrap();
            store.reconcile(&a, &log()).unwrap();
        }

        let store = Store::open(&path, &log()).unwrap();
        assert_eq!(store.devices().unwrap().len(), 1);
        assert_eq!(store.ports().unwrap().len(), 2);

        store.reset().unwrap();
        assert!(store.devices().unwrap().is_empty());
        assert!(store.ports().unwrap().is_empty());
        let stats = store.reconcile(&a, &log()).unwrap();
        assert_eq!(stats.device_id, 1);
    }
}
