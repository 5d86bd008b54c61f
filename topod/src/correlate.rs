// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2024 Oxide Computer Company

//! Turns the tuples from one host's walk into the device, ports, and LLDP
//! neighbors that host describes.  Nothing in here fails: values that can't
//! be decoded are reported and left at their defaults.

use std::net::Ipv4Addr;

use slog::warn;

use protocol::oid;
use protocol::types::parse_integer;
use protocol::types::ChassisIdSubtype;
use protocol::walk;
use protocol::MacAddr;
use protocol::OidTuple;
use protocol::WireType;

use crate::types::Device;
use crate::types::Observation;
use crate::types::Port;
use crate::types::RemotePortCandidate;

fn not_implemented(log: &slog::Logger, t: &OidTuple) {
    warn!(log, "couldn't parse {} of type {} - not implemented",
        t.oid, t.wire_type);
}

fn not_found(log: &slog::Logger, oid: &str, index: &str) {
    warn!(log, "couldn't find {oid}.{index} - not found");
}

/// Decode an LLDP capabilities bitmask.  Agents print the two-octet mask
/// either as a `Hex-STRING` ("28 00"), of which only the leading hex digits
/// are read, or as a `STRING` whose first character is the first octet.
fn decode_capabilities(t: &OidTuple) -> Option<i64> {
    match t.wire_type {
        WireType::HexString => {
            let v = t.value.trim_start();
            let v = v
                .strip_prefix("0x")
                .or_else(|| v.strip_prefix("0X"))
                .unwrap_or(v);
            let digits = v
                .find(|c: char| !c.is_ascii_hexdigit())
                .map_or(v, |end| &v[..end]);
            i64::from_str_radix(digits, 16).ok()
        }
        WireType::String => t.value.bytes().next().map(i64::from),
        _ => None,
    }
}

fn capabilities(log: &slog::Logger, t: &OidTuple) -> Option<i64> {
    match (&t.wire_type, decode_capabilities(t)) {
        (_, Some(mask)) => Some(mask),
        (WireType::HexString | WireType::String, None) => {
            warn!(log, "couldn't decode {} value {:?}", t.oid, t.value);
            None
        }
        (_, None) => {
            not_implemented(log, t);
            None
        }
    }
}

// How a MAC carried in a `STRING` value is laid out.  `Hex-STRING` values
// are always space-separated octets.
#[derive(Clone, Copy, Debug)]
enum StringMac {
    /// Colon-separated only
    Colons,
    /// Colon- or space-separated, whichever the value uses
    Either,
}

fn decode_mac(
    log: &slog::Logger,
    t: &OidTuple,
    layout: StringMac,
) -> Option<MacAddr> {
    let parsed = match (&t.wire_type, layout) {
        (WireType::HexString, _) => MacAddr::from_hex_string(&t.value),
        (WireType::String, StringMac::Colons) => {
            MacAddr::from_colon_str(&t.value)
        }
        (WireType::String, StringMac::Either) => t.value.parse(),
        _ => {
            not_implemented(log, t);
            return None;
        }
    };
    match parsed {
        Ok(mac) if mac.is_null() => {
            warn!(log, "ignoring null MAC address in {}.{}", t.oid, t.index);
            None
        }
        Ok(mac) => Some(mac),
        Err(e) => {
            warn!(log, "bad MAC address {:?} in {}.{}: {e}",
                t.value, t.oid, t.index);
            None
        }
    }
}

// The local port number is the middle field of the remote table's
// timeMark.localPortNum.remoteIndex index.
fn local_port_number(index: &str) -> Option<i64> {
    let fields: Vec<&str> = index.split('.').collect();
    match fields.as_slice() {
        [_, port, _] => port.parse().ok(),
        _ => None,
    }
}

fn build_port(
    log: &slog::Logger,
    tuples: &[OidTuple],
    if_index: i64,
) -> Port {
    let index = if_index.to_string();
    let mut port = Port {
        interface_id: if_index,
        ..Default::default()
    };

    match walk::find(tuples, oid::IF_PHYS_ADDRESS, &index) {
        Some(t) => port.mac_address = decode_mac(log, t, StringMac::Either),
        None => not_found(log, oid::IF_PHYS_ADDRESS, &index),
    }

    match walk::find(tuples, oid::IF_OPER_STATUS, &index) {
        Some(t) if t.wire_type == WireType::Integer => {
            match parse_integer(&t.value) {
                Some(status) => port.operating_status = status,
                None => warn!(log, "bad operating status {:?}", t.value;
                    "interface" => if_index),
            }
        }
        Some(t) => not_implemented(log, t),
        None => not_found(log, oid::IF_OPER_STATUS, &index),
    }

    match walk::find(tuples, oid::IF_SPEED, &index) {
        Some(t) if t.wire_type == WireType::Gauge32 => {
            match t.value.trim().parse() {
                Ok(speed) => port.max_speed = speed,
                Err(_) => warn!(log, "bad interface speed {:?}", t.value;
                    "interface" => if_index),
            }
        }
        Some(t) => not_implemented(log, t),
        None => not_found(log, oid::IF_SPEED, &index),
    }

    match walk::find(tuples, oid::IF_NAME, &index) {
        Some(t) if t.wire_type == WireType::String => {
            port.name = t.value.clone()
        }
        Some(t) => not_implemented(log, t),
        None => not_found(log, oid::IF_NAME, &index),
    }

    port
}

fn build_remote(
    log: &slog::Logger,
    tuples: &[OidTuple],
    subtype: &OidTuple,
) -> Option<RemotePortCandidate> {
    if subtype.wire_type != WireType::Integer {
        not_implemented(log, subtype);
        return None;
    }
    match subtype.value.parse::<ChassisIdSubtype>() {
        Ok(ChassisIdSubtype::MacAddress) => {}
        _ => {
            warn!(log, "couldn't parse {} subtype {} - not implemented",
                subtype.oid, subtype.value);
            return None;
        }
    }

    let Some(chassis) =
        walk::find(tuples, oid::LLDP_REM_CHASSIS_ID, &subtype.index)
    else {
        not_found(log, oid::LLDP_REM_CHASSIS_ID, &subtype.index);
        return None;
    };
    let mac_address = decode_mac(log, chassis, StringMac::Colons)?;
    let Some(local_interface_id) = local_port_number(&subtype.index) else {
        warn!(log, "malformed remote table index {:?}", subtype.index);
        return None;
    };

    Some(RemotePortCandidate {
        mac_address,
        local_interface_id,
    })
}

/// Build everything `host` told us about itself in `tuples`.  Interfaces
/// without a usable MAC address are dropped, since they can't be stored.
pub fn correlate(
    host: Ipv4Addr,
    tuples: &[OidTuple],
    log: &slog::Logger,
) -> Observation {
    let log = log.new(slog::o!("host" => host.to_string()));
    let mut device = Device::new(host);
    let mut ports = Vec::new();
    let mut remotes = Vec::new();

    for t in tuples {
        match t.oid {
            oid::LLDP_LOC_SYS_CAP_SUPPORTED => {
                if let Some(mask) = capabilities(&log, t) {
                    device.capabilities_supported = mask;
                }
            }
            oid::LLDP_LOC_SYS_CAP_ENABLED => {
                if let Some(mask) = capabilities(&log, t) {
                    device.capabilities_enabled = mask;
                }
            }
            oid::LLDP_LOC_SYS_NAME => {
                if t.wire_type == WireType::String {
                    device.system_name = t.value.clone();
                } else {
                    not_implemented(&log, t);
                }
            }
            oid::IF_INDEX => {
                let if_index = match t.wire_type {
                    WireType::Integer => parse_integer(&t.value),
                    _ => {
                        not_implemented(&log, t);
                        continue;
                    }
                };
                let Some(if_index) = if_index else {
                    warn!(log, "bad interface index {:?}", t.value);
                    continue;
                };
                let port = build_port(&log, tuples, if_index);
                if port.mac_address.is_some() {
                    ports.push(port);
                } else {
                    warn!(log, "dropping interface {if_index} without a MAC");
                }
            }
            oid::LLDP_REM_CHASSIS_ID_SUBTYPE => {
                if let Some(remote) = build_remote(&log, tuples, t) {
                    remotes.push(remote);
                }
            }
            _ => {}
        }
    }

    Observation {
        device,
        ports,
        remotes,
    }
}
