// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2024 Oxide Computer Company

pub mod macaddr;
pub mod oid;
pub mod types;
pub mod walk;

pub use macaddr::MacAddr;
pub use macaddr::MacError;
pub use oid::Catalog;
pub use types::WireType;
pub use walk::OidTuple;
