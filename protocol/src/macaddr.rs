// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2024 Oxide Computer Company

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// An EUI-48 MAC address, used for layer-2 addressing.
///
/// Walk output carries these in two shapes: `Hex-STRING` values are
/// space-separated octet pairs ("AA BB CC DD EE FF") while `STRING` values
/// are usually colon-separated, with agents free to drop leading zeroes
/// ("0:1b:21:a:b:c").  Both parse to the same address, and the `Display`
/// form is the canonical upper-case, zero-padded, colon-separated string
/// used as the natural key of a port.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MacAddr {
    a: [u8; 6],
}

impl From<[u8; 6]> for MacAddr {
    fn from(a: [u8; 6]) -> Self {
        Self { a }
    }
}

impl From<MacAddr> for [u8; 6] {
    fn from(mac: MacAddr) -> [u8; 6] {
        mac.a
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MacError {
    /// Too few octets to be a valid MAC address
    #[error("Too few octets")]
    TooShort,
    /// Too many octets to be a valid MAC address
    #[error("Too many octets")]
    TooLong,
    /// Found an octet with a non-hexadecimal character or invalid separator
    #[error("Invalid octet: {0:?}")]
    InvalidOctet(String),
}

impl MacAddr {
    pub const ZERO: Self = MacAddr {
        a: [0, 0, 0, 0, 0, 0],
    };

    /// Create a new MAC address from octets in network byte order.
    pub fn new(o0: u8, o1: u8, o2: u8, o3: u8, o4: u8, o5: u8) -> MacAddr {
        MacAddr {
            a: [o0, o1, o2, o3, o4, o5],
        }
    }

    /// Return `true` if `self` is the null MAC address, all zeros.
    pub fn is_null(self) -> bool {
        self == Self::ZERO
    }

    /// Parse the colon-separated form, as reported in `STRING` values.
    pub fn from_colon_str(s: &str) -> Result<MacAddr, MacError> {
        Self::from_octets(s.trim().split(':'))
    }

    /// Parse the space-separated form, as reported in `Hex-STRING` values.
    pub fn from_hex_string(s: &str) -> Result<MacAddr, MacError> {
        Self::from_octets(s.split_whitespace())
    }

    fn from_octets<'a>(
        octets: impl Iterator<Item = &'a str>,
    ) -> Result<MacAddr, MacError> {
        let mut m = MacAddr::ZERO;
        let mut n = 0;
        for octet in octets {
            if n == m.a.len() {
                return Err(MacError::TooLong);
            }
            if octet.is_empty()
                || octet.len() > 2
                || !octet.chars().all(|c| c.is_ascii_hexdigit())
            {
                return Err(MacError::InvalidOctet(octet.to_string()));
            }
            m.a[n] = u8::from_str_radix(octet, 16)
                .map_err(|_| MacError::InvalidOctet(octet.to_string()))?;
            n += 1;
        }

        if n < m.a.len() {
            Err(MacError::TooShort)
        } else {
            Ok(m)
        }
    }
}

/// Accepts either encoding: colon-separated if the string contains a colon,
/// whitespace-separated otherwise.
impl FromStr for MacAddr {
    type Err = MacError;

    fn from_str(s: &str) -> Result<Self, MacError> {
        if s.contains(':') {
            MacAddr::from_colon_str(s)
        } else {
            MacAddr::from_hex_string(s)
        }
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.a[0], self.a[1], self.a[2], self.a[3], self.a[4], self.a[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
