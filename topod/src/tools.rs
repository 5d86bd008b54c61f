// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2024 Oxide Computer Company

//! The external programs that actually speak SNMP: `onesixtyone` finds
//! hosts, `snmpwalk` reads their MIBs, and `snmptrapd` tells us when one of
//! them has something to report.

use std::collections::BTreeSet;
use std::future::Future;
use std::net::Ipv4Addr;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;

use chrono::DateTime;
use chrono::Utc;
use slog::debug;
use slog::warn;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::BufReader;
use tokio::io::Lines;
use tokio::process::Child;
use tokio::process::Command;

use protocol::Catalog;

use crate::errors::TopodError;
use crate::TopodResult;

pub const SCANNER: &str = "onesixtyone";
pub const WALKER: &str = "snmpwalk";
pub const DEFAULT_TRAPD: &str = "/usr/bin/snmptrapd";
pub const TRAPD_CONF: &str = "snmptrapd.conf";

// Each received trap is printed as "<RFC 3339 timestamp> <source address>".
const TRAP_FORMAT: &str =
    "%#04y-%#02m-%#02lT%#02h:%#02j:%#02k+00:00 %a\\n";

/// Which of a command's output streams end up in the captured text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capture {
    Stdout,
    /// stdout followed by stderr
    Merged,
}

/// Runs external commands to completion and hands back what they printed.
#[derive(Clone)]
pub struct ProcessRunner {
    log: slog::Logger,
}

impl ProcessRunner {
    pub fn new(log: &slog::Logger) -> Self {
        ProcessRunner {
            log: log.new(slog::o!("unit" => "process")),
        }
    }

    /// Run `program` and return its output.  A program that can't be
    /// started or that exits unsuccessfully is an error.
    pub async fn run(
        &self,
        program: &Path,
        args: &[String],
        capture: Capture,
    ) -> TopodResult<String> {
        let name = program.display().to_string();
        debug!(self.log, "running {name} {}", args.join(" "));

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TopodError::subprocess(&name, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.lines().next().unwrap_or("").trim();
            return Err(TopodError::subprocess(
                &name,
                format!("{} {detail}", output.status).trim_end(),
            ));
        }

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        if capture == Capture::Merged {
            text.push_str(&String::from_utf8_lossy(&output.stderr));
        }
        Ok(text)
    }

    /// Like [`ProcessRunner::run`], split into lines.
    pub async fn lines(
        &self,
        program: &Path,
        args: &[String],
        capture: Capture,
    ) -> TopodResult<Vec<String>> {
        let text = self.run(program, args, capture).await?;
        Ok(text.lines().map(str::to_string).collect())
    }

    /// Start a long-running `program` whose stdout is read a line at a
    /// time.  The process is killed when the returned listener is dropped.
    pub fn spawn(
        &self,
        program: &Path,
        args: &[String],
    ) -> TopodResult<TrapListener> {
        let name = program.display().to_string();
        debug!(self.log, "starting {name} {}", args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TopodError::subprocess(&name, e))?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TopodError::subprocess(&name, "no stdout pipe")
        })?;
        let mut listener = TrapListener::from_reader(stdout);
        listener.child = Some(child);
        Ok(listener)
    }
}

/// The output of the trap daemon, one line per received trap.
pub struct TrapListener {
    child: Option<Child>,
    lines: Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>,
}

impl TrapListener {
    pub fn from_reader(
        reader: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        TrapListener {
            child: None,
            lines: BufReader::new(reader).lines(),
        }
    }

    /// The next line printed, or `None` once the listener has exited.
    pub async fn next_line(&mut self) -> TopodResult<Option<String>> {
        Ok(self.lines.next_line().await?)
    }

    /// Stop the listener process, if there is one.
    pub async fn kill(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.kill().await;
        }
        self.child = None;
    }
}

/// A trap received by the listener.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrapNotification {
    pub timestamp: Option<DateTime<Utc>>,
    pub address: Ipv4Addr,
}

/// Parse one line of listener output.  Anything that isn't exactly a
/// timestamp and an address, including the daemon's own startup banner,
/// is ignored.
pub fn parse_trap_line(line: &str) -> Option<TrapNotification> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let [timestamp, address] = tokens.as_slice() else {
        return None;
    };
    if line.contains("snmptrapd") {
        return None;
    }
    let address = address
        .trim_start_matches('[')
        .trim_end_matches(|c: char| c == ']' || c == ':')
        .parse()
        .ok()?;
    let timestamp = DateTime::parse_from_rfc3339(timestamp)
        .ok()
        .map(|t| t.with_timezone(&Utc));
    Some(TrapNotification { timestamp, address })
}

/// Pull the responding addresses out of the scanner's output.  Each line
/// starts with the address of a host that answered; duplicates are dropped.
pub fn parse_scan_output(
    lines: &[String],
    log: &slog::Logger,
) -> Vec<Ipv4Addr> {
    let mut seen = BTreeSet::new();
    let mut hosts = Vec::new();
    for line in lines {
        let Some(token) = line.split_whitespace().next() else {
            continue;
        };
        match token.parse::<Ipv4Addr>() {
            Ok(addr) => {
                if seen.insert(addr) {
                    hosts.push(addr);
                }
            }
            Err(_) => warn!(log, "ignoring scan output {line:?}"),
        }
    }
    hosts
}

/// The SNMP operations the poller needs.
pub trait SnmpTools: Sync {
    /// Find the hosts in `target` that answer to `community`.
    fn scan(
        &self,
        target: &str,
        community: &str,
    ) -> impl Future<Output = TopodResult<Vec<Ipv4Addr>>> + Send;

    /// Walk the subtree under `oid` on `host`.
    fn walk(
        &self,
        host: Ipv4Addr,
        community: &str,
        oid: &str,
    ) -> impl Future<Output = TopodResult<String>> + Send;

    /// Walk every OID in `catalog`, concatenating the output.  Gives up at
    /// the first walk that fails.
    fn walk_batch(
        &self,
        host: Ipv4Addr,
        community: &str,
        catalog: &Catalog,
    ) -> impl Future<Output = TopodResult<String>> + Send {
        async move {
            let mut raw = String::new();
            for oid in catalog.iter() {
                raw.push_str(&self.walk(host, community, oid).await?);
                if !raw.ends_with('\n') {
                    raw.push('\n');
                }
            }
            Ok(raw)
        }
    }
}

/// The real tools, run as subprocesses.
pub struct Tools {
    scanner: PathBuf,
    walker: PathBuf,
    trapd: PathBuf,
    runner: ProcessRunner,
    log: slog::Logger,
}

impl Tools {
    /// Use the scanner and walker found in `tools_dir`.
    pub fn new(tools_dir: &Path, trapd: &Path, log: &slog::Logger) -> Self {
        Tools::with_paths(
            tools_dir.join(SCANNER),
            tools_dir.join(WALKER),
            trapd.to_path_buf(),
            log,
        )
    }

    pub fn with_paths(
        scanner: PathBuf,
        walker: PathBuf,
        trapd: PathBuf,
        log: &slog::Logger,
    ) -> Self {
        Tools {
            scanner,
            walker,
            trapd,
            runner: ProcessRunner::new(log),
            log: log.new(slog::o!("unit" => "tools")),
        }
    }

    /// The `external` directory next to the running executable.
    pub fn default_dir() -> TopodResult<PathBuf> {
        let exe = std::env::current_exe()?;
        let dir = exe.parent().ok_or_else(|| {
            TopodError::Invalid(format!("{} has no parent", exe.display()))
        })?;
        Ok(dir.join("external"))
    }

    /// Write the trap daemon's config into `state_dir` and start it,
    /// accepting traps sent with `community`.
    pub fn trap_listener(
        &self,
        community: &str,
        state_dir: &Path,
    ) -> TopodResult<TrapListener> {
        std::fs::create_dir_all(state_dir)?;
        let conf = state_dir.join(TRAPD_CONF);
        std::fs::write(&conf, trapd_conf(community))?;
        debug!(self.log, "wrote {}", conf.display());
        self.runner.spawn(&self.trapd, &trapd_args(&conf))
    }
}

fn trapd_conf(community: &str) -> String {
    format!("authCommunity log,execute,net {community}\n")
}

fn trapd_args(conf: &Path) -> Vec<String> {
    vec![
        "-C".to_string(),
        "-c".to_string(),
        conf.display().to_string(),
        "-Lo".to_string(),
        "-f".to_string(),
        "-t".to_string(),
        "-n".to_string(),
        "-F".to_string(),
        TRAP_FORMAT.to_string(),
    ]
}

fn scan_args(target: &str, community: &str) -> Vec<String> {
    ["-s", "fix", "-q", target, community]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn walk_args(host: Ipv4Addr, community: &str, oid: &str) -> Vec<String> {
    vec![
        "-c".to_string(),
        community.to_string(),
        "-v".to_string(),
        "2c".to_string(),
        "-One".to_string(),
        host.to_string(),
        oid.to_string(),
    ]
}

impl SnmpTools for Tools {
    async fn scan(
        &self,
        target: &str,
        community: &str,
    ) -> TopodResult<Vec<Ipv4Addr>> {
        let lines = self
            .runner
            .lines(
                &self.scanner,
                &scan_args(target, community),
                Capture::Stdout,
            )
            .await?;
        Ok(parse_scan_output(&lines, &self.log))
    }

    async fn walk(
        &self,
        host: Ipv4Addr,
        community: &str,
        oid: &str,
    ) -> TopodResult<String> {
        self.runner
            .run(
                &self.walker,
                &walk_args(host, community, oid),
                Capture::Merged,
            )
            .await
    }
}
