// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2024 Oxide Computer Company

//! Root logger construction shared by the daemon and its admin commands.

use std::fmt;
use std::fmt::Write;
use std::fs::File;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::Context;
use slog::{o, Drain, KV};

// Records are written from a background thread.  Writes to a terminal can
// block for a while, so stdout gets a much deeper queue than a file does.
const FILE_CHANNEL_SIZE: usize = 1024;
const STDOUT_CHANNEL_SIZE: usize = 32768;

#[derive(Debug, Default, Eq, PartialEq, Clone, Copy)]
pub enum LogFormat {
    #[default]
    Human,
    /// Bunyan-style JSON, one record per line
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "h" | "human" => Ok(LogFormat::Human),
            "j" | "json" => Ok(LogFormat::Json),
            _ => Err(format!("invalid log format: {s}")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LogFormat::Human => write!(f, "human"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

type AsyncDrain = slog::Fuse<slog_async::Async>;

fn spawn_async<D>(drain: D, chan_size: usize) -> AsyncDrain
where
    D: Drain<Ok = (), Err = slog::Never> + Send + 'static,
{
    slog_async::Async::new(drain)
        .chan_size(chan_size)
        .build()
        .fuse()
}

fn open_log_file(path: &str) -> anyhow::Result<File> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {path}"))
}

/// Build the root logger for a daemon.  Records go to `log_file` when one is
/// provided and to the terminal otherwise.
pub fn init(
    name: &'static str,
    log_file: &Option<String>,
    log_format: LogFormat,
) -> anyhow::Result<slog::Logger> {
    let drain = match (log_file, log_format) {
        (Some(path), LogFormat::Json) => {
            let file = open_log_file(path)?;
            let drain = slog_bunyan::with_name(name, file).build().fuse();
            spawn_async(drain, FILE_CHANNEL_SIZE)
        }
        (Some(path), LogFormat::Human) => {
            let file = open_log_file(path)?;
            let decorator = slog_term::PlainDecorator::new(file);
            let drain = slog_term::FullFormat::new(decorator).build().fuse();
            spawn_async(drain, FILE_CHANNEL_SIZE)
        }
        (None, LogFormat::Json) => {
            let drain = slog_bunyan::with_name(name, std::io::stdout())
                .build()
                .fuse();
            spawn_async(drain, STDOUT_CHANNEL_SIZE)
        }
        (None, LogFormat::Human) => {
            let decorator = slog_term::TermDecorator::new().build();
            let drain = slog_term::FullFormat::new(decorator).build().fuse();
            spawn_async(drain, STDOUT_CHANNEL_SIZE)
        }
    };
    Ok(slog::Logger::root(drain, o!("daemon" => name)))
}

/// A logger that throws everything away, for tests and tools that don't
/// want output.
pub fn discard() -> slog::Logger {
    slog::Logger::root(slog::Discard, o!())
}

/// Records captured by a logger from [`memory`], one line per record in
/// the form `LEVEL message key=value ...`.
#[derive(Clone, Debug, Default)]
pub struct LogRecords(Arc<Mutex<Vec<String>>>);

impl LogRecords {
    pub fn lines(&self) -> Vec<String> {
        self.0.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Warning records containing every one of `needles`.
    pub fn warnings_with(&self, needles: &[&str]) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|l| l.starts_with("WARN "))
            .filter(|l| needles.iter().all(|n| l.contains(n)))
            .collect()
    }
}

struct LineSerializer(String);

impl slog::Serializer for LineSerializer {
    fn emit_arguments(
        &mut self,
        key: slog::Key,
        val: &fmt::Arguments,
    ) -> slog::Result {
        let _ = write!(self.0, " {key}={val}");
        Ok(())
    }
}

struct MemoryDrain(LogRecords);

impl Drain for MemoryDrain {
    type Ok = ();
    type Err = slog::Never;

    fn log(
        &self,
        record: &slog::Record,
        values: &slog::OwnedKVList,
    ) -> Result<(), slog::Never> {
        let mut line = LineSerializer(format!(
            "{} {}",
            record.level().as_short_str(),
            record.msg()
        ));
        let _ = record.kv().serialize(record, &mut line);
        let _ = values.serialize(record, &mut line);
        if let Ok(mut lines) = (self.0).0.lock() {
            lines.push(line.0);
        }
        Ok(())
    }
}

/// A synchronous logger that keeps every record in memory, for checking
/// what was reported.
pub fn memory() -> (slog::Logger, LogRecords) {
    let records = LogRecords::default();
    let drain = MemoryDrain(records.clone());
    (slog::Logger::root(drain, o!()), records)
}
