// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2024 Oxide Computer Company

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// The type tag a walk tool prints between the `=` and the `:` of each line.
/// Only the tags the correlator decodes get their own variant; everything
/// else is carried verbatim so it can be reported.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum WireType {
    String,
    HexString,
    Integer,
    Gauge32,
    Other(String),
}

impl From<&str> for WireType {
    fn from(s: &str) -> Self {
        match s {
            "STRING" => WireType::String,
            "Hex-STRING" => WireType::HexString,
            "INTEGER" => WireType::Integer,
            "Gauge32" => WireType::Gauge32,
            x => WireType::Other(x.to_string()),
        }
    }
}

impl FromStr for WireType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.into())
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WireType::String => write!(f, "STRING"),
            WireType::HexString => write!(f, "Hex-STRING"),
            WireType::Integer => write!(f, "INTEGER"),
            WireType::Gauge32 => write!(f, "Gauge32"),
            WireType::Other(x) => write!(f, "{x}"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid ChassisId subtype: {0}")]
pub struct SubtypeError(pub String);

/// Chassis ID Subtype values as defined by table 8-2 of 802.1AB and
/// reported through lldpRemChassisIdSubtype.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum ChassisIdSubtype {
    ChassisComponent = 1,
    InterfaceAlias,
    PortComponent,
    MacAddress,
    NetworkAddress,
    InterfaceName,
    LocallyAssigned,
}

impl TryFrom<u8> for ChassisIdSubtype {
    type Error = SubtypeError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            1 => Ok(ChassisIdSubtype::ChassisComponent),
            2 => Ok(ChassisIdSubtype::InterfaceAlias),
            3 => Ok(ChassisIdSubtype::PortComponent),
            4 => Ok(ChassisIdSubtype::MacAddress),
            5 => Ok(ChassisIdSubtype::NetworkAddress),
            6 => Ok(ChassisIdSubtype::InterfaceName),
            7 => Ok(ChassisIdSubtype::LocallyAssigned),
            x => Err(SubtypeError(x.to_string())),
        }
    }
}

impl FromStr for ChassisIdSubtype {
    type Err = SubtypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n =
            parse_integer(s).ok_or_else(|| SubtypeError(s.to_string()))?;
        u8::try_from(n)
            .map_err(|_| SubtypeError(s.to_string()))
            .and_then(ChassisIdSubtype::try_from)
    }
}

impl From<ChassisIdSubtype> for u8 {
    fn from(x: ChassisIdSubtype) -> u8 {
        x as u8
    }
}

/// Parse the payload of an `INTEGER` value.  Depending on how the walk tool
/// was asked to print enumerations, the payload is either a bare number
/// ("1") or a label with the number in parentheses ("up(1)").
pub fn parse_integer(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(n) = s.parse() {
        return Some(n);
    }
    let open = s.find('(')?;
    let close = s[open..].find(')')? + open;
    s[open + 1..close].trim().parse().ok()
}

#[test]
fn verify_chassis_subtype() {
    assert_eq!(
        ChassisIdSubtype::try_from(1),
        Ok(ChassisIdSubtype::ChassisComponent)
    );
    assert_eq!(
        ChassisIdSubtype::try_from(4),
        Ok(ChassisIdSubtype::MacAddress)
    );
    assert_eq!(
        ChassisIdSubtype::try_from(7),
        Ok(ChassisIdSubtype::LocallyAssigned)
    );
    assert!(ChassisIdSubtype::try_from(0).is_err());
    assert!(ChassisIdSubtype::try_from(8).is_err());

    assert_eq!(
        "4".parse::<ChassisIdSubtype>(),
        Ok(ChassisIdSubtype::MacAddress)
    );
    assert_eq!(
        "macAddress(4)".parse::<ChassisIdSubtype>(),
        Ok(ChassisIdSubtype::MacAddress)
    );
    assert!("300".parse::<ChassisIdSubtype>().is_err());
    assert!("mac".parse::<ChassisIdSubtype>().is_err());
}

#[test]
fn verify_wire_type() {
    for tag in ["STRING", "Hex-STRING", "INTEGER", "Gauge32", "Timeticks"] {
        assert_eq!(WireType::from(tag).to_string(), tag);
    }
    assert_eq!(WireType::from("Hex-STRING"), WireType::HexString);
    assert_eq!(WireType::from("OID"), WireType::Other("OID".to_string()));
}

#[test]
fn verify_parse_integer() {
    assert_eq!(parse_integer("1"), Some(1));
    assert_eq!(parse_integer(" -1 "), Some(-1));
    assert_eq!(parse_integer("up(1)"), Some(1));
    assert_eq!(parse_integer("lowerLayerDown(7)"), Some(7));
    assert_eq!(parse_integer("up"), None);
    assert_eq!(parse_integer(""), None);
}
