// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2024 Oxide Computer Company

pub mod logging;

pub use logging::LogFormat;

/// The file the topology store is kept in when no path is given.
pub const DEFAULT_DB_FILE: &str = "topology.db";

/// The number of trap notifications that may be pending before new ones are
/// dropped.
pub const DEFAULT_TRAP_BUFFER_SIZE: usize = 1000;

/// How often the poll loop looks for pending trap notifications.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
