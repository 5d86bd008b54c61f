// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2024 Oxide Computer Company

//! Parsing of the line-oriented text printed by `snmpwalk -One`.  Each line
//! of interest looks like one of:
//!
//! ```text
//! .1.3.6.1.2.1.2.2.1.6.3 = STRING: "aa bb cc dd ee ff"
//! .1.0.8802.1.1.2.1.3.3 = STRING: "core-sw1"
//! ```

use std::fmt;
use std::net::Ipv4Addr;

use slog::debug;
use slog::warn;

use crate::oid::Catalog;
use crate::types::WireType;

/// A single value pulled out of a walk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OidTuple {
    /// The catalog OID the line matched
    pub oid: &'static str,
    /// The table index following the OID, empty for scalars
    pub index: String,
    pub wire_type: WireType,
    pub value: String,
}

impl fmt::Display for OidTuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.index.is_empty() {
            write!(f, "{} = {}: {}", self.oid, self.wire_type, self.value)
        } else {
            write!(
                f,
                "{}.{} = {}: {}",
                self.oid, self.index, self.wire_type, self.value
            )
        }
    }
}

// Returns the byte offset just past `oid` if the line contains it followed
// by either a '.' (a table entry) or a space (a scalar).  Anything else means
// the line names a longer OID that merely shares a prefix.
fn oid_end(line: &str, oid: &str) -> Option<usize> {
    line.match_indices(oid).find_map(|(start, _)| {
        let end = start + oid.len();
        match line.as_bytes().get(end) {
            Some(b'.') | Some(b' ') => Some(end),
            _ => None,
        }
    })
}

/// Returns `true` if `raw` mentions `oid` as a complete identifier.
pub fn contains_oid(raw: &str, oid: &str) -> bool {
    oid_end(raw, oid).is_some()
}

/// Flat completeness check: does every OID in `oids` appear somewhere in
/// `raw`?  The ones that are missing are logged at debug level.
pub fn contains_all(raw: &str, oids: &[&str], log: &slog::Logger) -> bool {
    let mut all = true;
    for oid in oids {
        if !contains_oid(raw, oid) {
            debug!(log, "walk output is missing {oid}");
            all = false;
        }
    }
    all
}

fn trim_set<'a>(s: &'a str, set: &str) -> &'a str {
    s.trim_matches(|c: char| set.contains(c))
}

// Split a line that is known to contain a catalog OID ending at `end` into
// its index, type, and value fields.
fn split_fields(line: &str, end: usize) -> Option<(&str, &str, &str)> {
    let eq = end + line[end..].find('=')?;
    let colon = eq + line[eq..].find(':')?;
    Some((
        trim_set(&line[end..eq], ". "),
        trim_set(&line[eq..colon], "= "),
        trim_set(&line[colon..], ": \""),
    ))
}

/// Convert the raw output of one or more walks against `host` into tuples,
/// keeping only lines that name an OID in `catalog`.  Lines naming an OID we
/// care about but not shaped like `<oid>[.<index>] = <type>: <value>` are
/// reported and skipped.
pub fn parse(
    raw: &str,
    catalog: &Catalog,
    host: Ipv4Addr,
    log: &slog::Logger,
) -> Vec<OidTuple> {
    let mut tuples = Vec::new();

    for line in raw.lines() {
        let mut matches = catalog
            .iter()
            .filter_map(|oid| oid_end(line, oid).map(|end| (oid, end)));
        let Some((oid, end)) = matches.next() else {
            continue;
        };
        if matches.next().is_some() {
            warn!(log, "line matches multiple OIDs, using {oid}";
                "host" => host.to_string(),
                "line" => line);
        }

        let Some((index, wire_type, value)) = split_fields(line, end) else {
            warn!(log, "line doesn't contain expected format";
                "host" => host.to_string(),
                "line" => line);
            continue;
        };

        tuples.push(OidTuple {
            oid,
            index: index.to_string(),
            wire_type: WireType::from(wire_type),
            value: value.to_string(),
        });
    }
    tuples
}

/// Find the tuple for `oid` whose index is exactly `index`.
pub fn find<'a>(
    tuples: &'a [OidTuple],
    oid: &str,
    index: &str,
) -> Option<&'a OidTuple> {
    tuples.iter().find(|t| t.oid == oid && t.index == index)
}

/// All tuples reported for `oid`, in walk order.
pub fn column<'a>(
    tuples: &'a [OidTuple],
    oid: &'a str,
) -> impl Iterator<Item = &'a OidTuple> + 'a {
    tuples.iter().filter(move |t| t.oid == oid)
}
