// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2024 Oxide Computer Company

use std::convert;

#[derive(Debug, thiserror::Error)]
pub enum TopodError {
    #[error("I/O error: {0:?}")]
    Io(std::io::Error),
    /// An external tool could not be launched or exited unsuccessfully
    #[error("{tool} failed: {msg}")]
    Subprocess { tool: String, msg: String },
    /// An error returned by the topology store
    #[error("store error: {0}")]
    Store(String),
    #[error("Invalid argument: {0}")]
    Invalid(String),
    /// The daemon was started without the privileges it needs
    #[error("insufficient privileges: {0}")]
    Privilege(String),
    #[error("error: {0}")]
    Other(String),
}

impl TopodError {
    pub fn subprocess(tool: impl ToString, msg: impl ToString) -> Self {
        TopodError::Subprocess {
            tool: tool.to_string(),
            msg: msg.to_string(),
        }
    }
}

impl convert::From<std::io::Error> for TopodError {
    fn from(err: std::io::Error) -> Self {
        TopodError::Io(err)
    }
}

impl convert::From<rusqlite::Error> for TopodError {
    fn from(err: rusqlite::Error) -> Self {
        TopodError::Store(err.to_string())
    }
}

impl convert::From<String> for TopodError {
    fn from(err: String) -> Self {
        TopodError::Other(err)
    }
}

impl convert::From<&str> for TopodError {
    fn from(err: &str) -> Self {
        TopodError::Other(err.to_string())
    }
}

impl convert::From<anyhow::Error> for TopodError {
    fn from(err: anyhow::Error) -> Self {
        TopodError::Other(err.to_string())
    }
}
