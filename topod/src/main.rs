// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2024 Oxide Computer Company

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use signal_hook::consts::signal::*;
use signal_hook::iterator::Signals;
use slog::debug;
use slog::error;
use slog::info;
use slog::warn;
use structopt::StructOpt;
use tokio::sync::watch;

pub use errors::TopodError;
use poll::Poller;
use protocol::MacAddr;
use store::Store;
use tools::SnmpTools;
use tools::Tools;
pub use types::TopodResult;

mod correlate;
mod errors;
mod poll;
mod store;
mod tools;
mod traps;
mod types;

#[derive(Debug, StructOpt)]
#[structopt(name = "topod", about = "SNMP/LLDP network topology daemon")]
enum Args {
    /// Discover the network and keep its topology up to date.
    Run(Opt),
    /// Print the topology recorded in a database.
    Show(DbOpt),
    /// Remove a device, a port, or the link between two ports.
    Forget(ForgetOpt),
}

#[derive(Clone, Debug, StructOpt)]
pub(crate) struct DbOpt {
    #[structopt(
        long,
        parse(from_os_str),
        help = "topology database (default topology.db)"
    )]
    db: Option<PathBuf>,
}

impl DbOpt {
    fn path(&self) -> PathBuf {
        self.db
            .clone()
            .unwrap_or_else(|| PathBuf::from(common::DEFAULT_DB_FILE))
    }
}

#[derive(Clone, Debug, StructOpt)]
pub(crate) struct ForgetOpt {
    #[structopt(flatten)]
    db: DbOpt,

    #[structopt(help = "management address of a device or MAC of a port")]
    target: String,

    #[structopt(help = "MAC of the port at the other end of a link")]
    peer: Option<String>,
}

#[derive(Clone, Debug, StructOpt)]
pub(crate) struct Opt {
    #[structopt(help = "host, range, or subnet to scan for SNMP agents")]
    target: String,

    #[structopt(help = "SNMP community string")]
    community: String,

    #[structopt(long, about = "log file")]
    log_file: Option<String>,

    #[structopt(
        long,
        short = "l",
        default_value = "human",
        about = "log format",
        help = "format logs for 'human' or 'json' consumption"
    )]
    log_format: common::LogFormat,

    #[structopt(flatten)]
    db: DbOpt,

    #[structopt(long, help = "keep the existing contents of the database")]
    keep_db: bool,

    #[structopt(
        long,
        parse(from_os_str),
        help = "directory holding onesixtyone and snmpwalk \
                (default <exe dir>/external)"
    )]
    tools_dir: Option<PathBuf>,

    #[structopt(
        long,
        parse(from_os_str),
        default_value = "/usr/bin/snmptrapd",
        help = "path to snmptrapd"
    )]
    trapd: PathBuf,

    #[structopt(
        long,
        parse(from_os_str),
        default_value = ".",
        help = "directory for the generated snmptrapd.conf"
    )]
    state_dir: PathBuf,

    #[structopt(long, help = "how often to check for traps (default 100)")]
    poll_interval_ms: Option<u64>,

    #[structopt(
        long,
        help = "number of pending traps to hold before dropping (default 1000)"
    )]
    trap_buffer: Option<usize>,

    #[structopt(
        long,
        help = "re-read every known host's tables this often, in seconds"
    )]
    rescan_secs: Option<u64>,

    #[structopt(long, help = "run without checking for root privileges")]
    no_root_check: bool,
}

fn signal_handler(
    mut signals: Signals,
    shutdown: watch::Sender<bool>,
    log: slog::Logger,
) {
    let log = log.new(slog::o!("unit" => "signal-handler"));
    for signal in &mut signals {
        if signal == SIGINT || signal == SIGQUIT || signal == SIGTERM {
            info!(&log, "caught signal {signal} - exiting");
            break;
        }
    }
    let _ = shutdown.send(true);
}

fn get_euid() -> Option<u32> {
    const ID: &str = "/usr/bin/id";

    let out = std::process::Command::new(ID).arg("-u").output().ok()?;
    if !out.status.success() {
        return None;
    }
    String::from_utf8_lossy(&out.stdout).trim().parse().ok()
}

fn check_privileges(log: &slog::Logger) -> TopodResult<()> {
    match get_euid() {
        Some(0) => Ok(()),
        Some(uid) => {
            error!(log, "this daemon needs root privileges"; "euid" => uid);
            Err(TopodError::Privilege(format!("running as uid {uid}")))
        }
        None => {
            error!(log, "unable to determine effective uid");
            Err(TopodError::Privilege("unknown uid".to_string()))
        }
    }
}

async fn run_topod(opts: Opt) -> TopodResult<()> {
    let log = common::logging::init("topod", &opts.log_file, opts.log_format)?;

    if !opts.no_root_check {
        check_privileges(&log)?;
    }

    let tools_dir = match &opts.tools_dir {
        Some(dir) => dir.clone(),
        None => Tools::default_dir()?,
    };
    let tools = Tools::new(&tools_dir, &opts.trapd, &log);

    info!(&log, "starting network scan of {}", opts.target);
    let hosts = tools.scan(&opts.target, &opts.community).await?;
    info!(&log, "finished network scan, found {} SNMP devices", hosts.len();
        "community" => &opts.community);
    if hosts.is_empty() {
        info!(&log, "no SNMP devices found, nothing to do");
        return Ok(());
    }

    let db = opts.db.path();
    let store = match Store::open(&db, &log) {
        Ok(store) => store,
        Err(e) => {
            error!(&log, "failed to open {}: {e}", db.display());
            return Err(e);
        }
    };
    if !opts.keep_db {
        store.reset()?;
    }

    let mut poller = Poller::new(store, tools, &opts.community, &log);
    poller.initial_sweep(&hosts).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (trap_tx, mut trap_rx) = traps::trap_buffer(
        opts.trap_buffer.unwrap_or(common::DEFAULT_TRAP_BUFFER_SIZE),
        &log,
    );

    let reader = match poller
        .tools()
        .trap_listener(&opts.community, &opts.state_dir)
    {
        Ok(listener) => Some(tokio::task::spawn(traps::trap_reader(
            listener,
            trap_tx,
            shutdown_rx.clone(),
            log.clone(),
        ))),
        Err(e) => {
            error!(&log, "failed to start trap listener: {e}");
            warn!(&log, "hosts will not be refreshed on traps");
            None
        }
    };

    const SIGNALS: &[std::ffi::c_int] = &[SIGTERM, SIGQUIT, SIGINT];
    let signals = Signals::new(SIGNALS)?;
    let signals_handle = signals.handle();
    let signal_log = log.clone();
    let signal_task = tokio::task::spawn_blocking(move || {
        signal_handler(signals, shutdown_tx, signal_log)
    });

    let interval = Duration::from_millis(
        opts.poll_interval_ms
            .unwrap_or(common::DEFAULT_POLL_INTERVAL_MS),
    );
    let rescan = opts.rescan_secs.map(Duration::from_secs);
    poller.run(&mut trap_rx, shutdown_rx, interval, rescan).await;

    signals_handle.close();
    if let Some(reader) = reader {
        debug!(&log, "waiting for trap reader");
        match reader.await {
            Ok(n) => debug!(&log, "trap reader queued {n} traps"),
            Err(e) => error!(&log, "trap reader failed: {e}"),
        }
    }
    _ = signal_task.await;

    let store = poller.store();
    info!(&log, "exiting";
        "hosts" => poller.index().len(),
        "devices" => store.devices()?.len(),
        "ports" => store.ports()?.len(),
        "links" => store.links()?.len());
    Ok(())
}

fn parse_mac(s: &str) -> TopodResult<MacAddr> {
    s.parse()
        .map_err(|e| TopodError::Invalid(format!("bad MAC {s:?}: {e}")))
}

fn show_topology(opts: DbOpt) -> TopodResult<()> {
    let store = Store::open(opts.path(), &common::logging::discard())?;
    let devices = store.devices()?;

    for device in &devices {
        println!(
            "{:<16} {:<24} supported: {:#04x} enabled: {:#04x}",
            device.management_address,
            device.system_name,
            device.capabilities_supported,
            device.capabilities_enabled,
        );
        let Some(device_id) = device.id else {
            continue;
        };
        for port in store.ports_for_device(device_id)? {
            let mac = port
                .mac_address
                .map_or_else(|| "-".to_string(), |m| m.to_string());
            let link = match port.id {
                Some(id) => store.link_for_port(id)?.map(|l| {
                    let peer = if l.port_a_id == id {
                        l.port_b_id
                    } else {
                        l.port_a_id
                    };
                    format!("-> port {peer} at {} bps", l.speed)
                }),
                None => None,
            };
            println!(
                "    {:>4} {:<12} {} {:>12} status {:<2} {}",
                port.interface_id,
                port.name,
                mac,
                port.max_speed,
                port.operating_status,
                link.unwrap_or_default(),
            );
        }
    }
    println!(
        "{} devices, {} ports, {} links",
        devices.len(),
        store.ports()?.len(),
        store.links()?.len()
    );
    Ok(())
}

fn forget(opts: ForgetOpt) -> TopodResult<()> {
    let store = Store::open(opts.db.path(), &common::logging::discard())?;
    let target = opts.target.as_str();

    let removed = match &opts.peer {
        Some(peer) => {
            let a = store.port_id(parse_mac(target)?)?;
            let b = store.port_id(parse_mac(peer)?)?;
            match (a, b) {
                (Some(a), Some(b)) => store.delete_link(a, b)?,
                _ => false,
            }
        }
        None => match target.parse::<Ipv4Addr>() {
            Ok(addr) => {
                if let Some(device) = store.get_device(addr)? {
                    println!("removing {device}");
                }
                store.delete_device(addr)?
            }
            Err(_) => store.delete_port(parse_mac(target)?)?,
        },
    };

    if removed {
        Ok(())
    } else {
        Err(TopodError::Invalid(format!("nothing to remove for {target}")))
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> TopodResult<()> {
    let args = Args::from_args();

    match args {
        Args::Run(opt) => run_topod(opt).await,
        Args::Show(opt) => show_topology(opt),
        Args::Forget(opt) => forget(opt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Opt, structopt::clap::Error> {
        match Args::from_iter_safe(args)? {
            Args::Run(opt) => Ok(opt),
            other => panic!("unexpected subcommand {other:?}"),
        }
    }

    #[test]
    fn test_minimal_args() {
        let opt = parse(&["topod", "run", "10.0.0.0/24", "public"]).unwrap();
        assert_eq!(opt.target, "10.0.0.0/24");
        assert_eq!(opt.community, "public");
        assert_eq!(opt.log_format, common::LogFormat::Human);
        assert_eq!(opt.trapd, PathBuf::from("/usr/bin/snmptrapd"));
        assert_eq!(opt.state_dir, PathBuf::from("."));
        assert!(opt.db.db.is_none());
        assert_eq!(opt.db.path(), PathBuf::from("topology.db"));
        assert!(!opt.keep_db);
        assert!(!opt.no_root_check);
        assert!(opt.rescan_secs.is_none());
    }

    #[test]
    fn test_all_args() {
        let opt = parse(&[
            "topod",
            "run",
            "192.168.1.1",
            "private",
            "--db",
            "/tmp/topo.db",
            "--keep-db",
            "--tools-dir",
            "/opt/snmp",
            "--poll-interval-ms",
            "5",
            "--trap-buffer",
            "10",
            "--rescan-secs",
            "60",
            "-l",
            "json",
            "--no-root-check",
        ])
        .unwrap();
        assert_eq!(opt.db.path(), PathBuf::from("/tmp/topo.db"));
        assert!(opt.keep_db);
        assert_eq!(opt.tools_dir, Some(PathBuf::from("/opt/snmp")));
        assert_eq!(opt.poll_interval_ms, Some(5));
        assert_eq!(opt.trap_buffer, Some(10));
        assert_eq!(opt.rescan_secs, Some(60));
        assert_eq!(opt.log_format, common::LogFormat::Json);
        assert!(opt.no_root_check);
    }

    #[test]
    fn test_missing_args() {
        assert!(parse(&["topod", "run", "10.0.0.0/24"]).is_err());
        assert!(parse(&["topod", "run"]).is_err());
        assert!(parse(&["topod", "run", "a", "b", "-l", "xml"]).is_err());
    }

    #[test]
    fn test_forget_args() {
        let args = Args::from_iter_safe([
            "topod",
            "forget",
            "--db",
            "/tmp/topo.db",
            "00:1b:21:0a:0b:0c",
            "00:1b:21:0a:0b:0d",
        ])
        .unwrap();
        let Args::Forget(opt) = args else {
            panic!("expected forget, got {args:?}");
        };
        assert_eq!(opt.db.path(), PathBuf::from("/tmp/topo.db"));
        assert_eq!(opt.target, "00:1b:21:0a:0b:0c");
        assert_eq!(opt.peer.as_deref(), Some("00:1b:21:0a:0b:0d"));

        assert!(Args::from_iter_safe(["topod", "forget"]).is_err());
        assert!(matches!(
            Args::from_iter_safe(["topod", "show"]).unwrap(),
            Args::Show(_)
        ));
    }

    #[test]
    fn test_forget() {
        let dir = tempfile::tempdir().unwrap();
        let db = DbOpt {
            db: Some(dir.path().join("topo.db")),
        };
        let forget_opt = |target: &str, peer: Option<&str>| ForgetOpt {
            db: db.clone(),
            target: target.to_string(),
            peer: peer.map(str::to_string),
        };

        let log = common::logging::discard();
        let addr = Ipv4Addr::new(10, 0, 0, 1);
        let mac_a: MacAddr = "00:1b:21:0a:0b:0c".parse().unwrap();
        let mac_b: MacAddr = "00:1b:21:0a:0b:0d".parse().unwrap();
        {
            let store = Store::open(db.path(), &log).unwrap();
            let mut device = types::Device::new(addr);
            let device_id = store.upsert_device(&mut device).unwrap();
            let mut ids = Vec::new();
            for (n, mac) in [mac_a, mac_b].into_iter().enumerate() {
                let mut port = types::Port {
                    device_id: Some(device_id),
                    interface_id: n as i64 + 1,
                    mac_address: Some(mac),
                    ..Default::default()
                };
                ids.push(store.upsert_port(&mut port).unwrap());
            }
            let mut link = types::Link::new(ids[0], ids[1], 1000);
            store.upsert_link(&mut link).unwrap();
        }

        let (a, b) = ("00:1b:21:0a:0b:0c", "00:1b:21:0a:0b:0d");
        assert!(forget(forget_opt(a, Some("bogus"))).is_err());
        forget(forget_opt(b, Some(a))).unwrap();
        assert!(forget(forget_opt(a, Some(b))).is_err());
        show_topology(db.clone()).unwrap();

        forget(forget_opt(a, None)).unwrap();
        forget(forget_opt("10.0.0.1", None)).unwrap();
        assert!(forget(forget_opt("10.0.0.1", None)).is_err());

        let store = Store::open(db.path(), &log).unwrap();
        assert!(store.devices().unwrap().is_empty());
        assert!(store.ports().unwrap().is_empty());
    }
}
