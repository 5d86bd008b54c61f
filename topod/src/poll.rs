// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2024 Oxide Computer Company

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::time::Duration;
use std::time::Instant;

use chrono::DateTime;
use chrono::Utc;
use slog::debug;
use slog::error;
use slog::info;
use slog::warn;
use tokio::sync::watch;

use protocol::walk;
use protocol::Catalog;
use protocol::OidTuple;

use crate::correlate::correlate;
use crate::store::ReconcileStats;
use crate::store::Store;
use crate::tools::SnmpTools;
use crate::traps::TrapReceiver;
use crate::TopodResult;

/// The most recent walk of a host.
#[derive(Clone, Debug)]
pub struct HostRecord {
    pub tuples: Vec<OidTuple>,
    pub last_scanned: DateTime<Utc>,
}

/// The latest walk results for every host we have heard from, keyed by
/// management address.
#[derive(Debug, Default)]
pub struct HostIndex {
    hosts: BTreeMap<Ipv4Addr, HostRecord>,
}

impl HostIndex {
    /// Replace the record for `addr`, or add one if this is a new host.
    /// Returns `true` if an existing record was replaced.
    pub fn record(&mut self, addr: Ipv4Addr, tuples: Vec<OidTuple>) -> bool {
        let record = HostRecord {
            tuples,
            last_scanned: Utc::now(),
        };
        self.hosts.insert(addr, record).is_some()
    }

    pub fn get(&self, addr: Ipv4Addr) -> Option<&HostRecord> {
        self.hosts.get(&addr)
    }

    pub fn addresses(&self) -> Vec<Ipv4Addr> {
        self.hosts.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

/// Owns the store and drives every walk and reconciliation.
pub struct Poller<T> {
    store: Store,
    tools: T,
    initial: Catalog,
    periodic: Catalog,
    community: String,
    index: HostIndex,
    log: slog::Logger,
}

impl<T: SnmpTools> Poller<T> {
    pub fn new(
        store: Store,
        tools: T,
        community: &str,
        log: &slog::Logger,
    ) -> Self {
        Poller {
            store,
            tools,
            initial: Catalog::initial(),
            periodic: Catalog::periodic(),
            community: community.to_string(),
            index: HostIndex::default(),
            log: log.new(slog::o!("unit" => "poller")),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn index(&self) -> &HostIndex {
        &self.index
    }

    pub fn tools(&self) -> &T {
        &self.tools
    }

    // Walk `addr` with `catalog`, then parse, correlate, reconcile, and
    // remember what we saw.  `carried` supplies tuples for OIDs the walk
    // didn't cover.
    async fn sync_host(
        &mut self,
        addr: Ipv4Addr,
        catalog: &Catalog,
        carried: Vec<OidTuple>,
    ) -> TopodResult<ReconcileStats> {
        let log = self.log.new(slog::o!("host" => addr.to_string()));
        let raw = self
            .tools
            .walk_batch(addr, &self.community, catalog)
            .await?;

        if !walk::contains_all(&raw, catalog.oids(), &log) {
            warn!(log, "not all needed OIDs are implemented on host";
                "community" => &self.community);
        }

        let mut tuples = walk::parse(&raw, catalog, addr, &log);
        tuples.extend(carried);
        let observation = correlate(addr, &tuples, &log);
        let stats = self.store.reconcile(&observation, &log)?;
        debug!(log, "reconciled";
            "ports" => stats.ports,
            "links" => stats.links_upserted,
            "stale" => stats.links_removed);

        self.index.record(addr, tuples);
        Ok(stats)
    }

    /// Bring a single host up to date with a full walk.
    pub async fn refresh_host(
        &mut self,
        addr: Ipv4Addr,
    ) -> TopodResult<ReconcileStats> {
        let catalog = self.initial.clone();
        self.sync_host(addr, &catalog, Vec::new()).await
    }

    /// Re-read the interface and neighbor tables of a host we've already
    /// walked, reusing its last reported system data.
    pub async fn refresh_tables(
        &mut self,
        addr: Ipv4Addr,
    ) -> TopodResult<ReconcileStats> {
        let catalog = self.periodic.clone();
        let carried = match self.index.get(addr) {
            Some(record) => record
                .tuples
                .iter()
                .filter(|t| !catalog.oids().contains(&t.oid))
                .cloned()
                .collect(),
            None => return self.refresh_host(addr).await,
        };
        self.sync_host(addr, &catalog, carried).await
    }

    /// Walk every host found by the scan.  A host that can't be walked or
    /// stored is reported and skipped.  Returns how many hosts succeeded.
    pub async fn initial_sweep(&mut self, hosts: &[Ipv4Addr]) -> usize {
        let mut synced = 0;
        for addr in hosts {
            match self.refresh_host(*addr).await {
                Ok(_) => synced += 1,
                Err(e) => error!(self.log, "failed to sync {addr}: {e}"),
            }
        }
        info!(self.log, "initial sweep synced {synced} of {} hosts",
            hosts.len());
        synced
    }

    /// Re-walk every host with a pending trap.  Returns how many hosts were
    /// refreshed.
    pub async fn poll_once(&mut self, receiver: &mut TrapReceiver) -> usize {
        let mut seen = BTreeSet::new();
        let pending: Vec<Ipv4Addr> = receiver
            .drain()
            .into_iter()
            .filter(|addr| seen.insert(*addr))
            .collect();

        let mut refreshed = 0;
        for addr in pending {
            info!(self.log, "received SNMP trap from {addr}");
            match self.refresh_host(addr).await {
                Ok(_) => refreshed += 1,
                Err(e) => error!(self.log, "failed to refresh {addr}: {e}"),
            }
        }
        refreshed
    }

    /// Re-read the tables of every known host.
    pub async fn rescan_known(&mut self) -> usize {
        let mut refreshed = 0;
        for addr in self.index.addresses() {
            match self.refresh_tables(addr).await {
                Ok(_) => refreshed += 1,
                Err(e) => error!(self.log, "failed to rescan {addr}: {e}"),
            }
        }
        refreshed
    }

    /// Poll for traps every `interval` until shutdown is requested.  When
    /// `rescan` is set, every known host's tables are also re-read that
    /// often.
    pub async fn run(
        &mut self,
        receiver: &mut TrapReceiver,
        mut shutdown: watch::Receiver<bool>,
        interval: Duration,
        rescan: Option<Duration>,
    ) {
        let mut last_rescan = Instant::now();
        loop {
            if *shutdown.borrow() {
                break;
            }

            self.poll_once(receiver).await;

            if let Some(period) = rescan {
                if last_rescan.elapsed() >= period {
                    let n = self.rescan_known().await;
                    debug!(self.log, "rescanned {n} hosts");
                    last_rescan = Instant::now();
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(self.log, "poll loop exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TopodError;
    use crate::traps::trap_buffer;
    use std::sync::Mutex;

    fn log() -> slog::Logger {
        common::logging::discard()
    }

    const HOST_A: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const HOST_B: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
    const HOST_C: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 3);

    // A's interface 1 is cabled to B's interface 5.
    const WALK_A: &str = "\
.1.0.8802.1.1.2.1.3.3.0 = STRING: \"sw-a\"
.1.0.8802.1.1.2.1.3.5.0 = Hex-STRING: 28 00
.1.0.8802.1.1.2.1.3.6.0 = Hex-STRING: 08 00
.1.3.6.1.2.1.2.2.1.1.1 = INTEGER: 1
.1.3.6.1.2.1.2.2.1.5.1 = Gauge32: 1000000000
.1.3.6.1.2.1.2.2.1.6.1 = Hex-STRING: 00 1B 21 0A 0B 01
.1.3.6.1.2.1.2.2.1.8.1 = INTEGER: up(1)
.1.3.6.1.2.1.31.1.1.1.1.1 = STRING: \"xe-0/0/1\"
.1.0.8802.1.1.2.1.4.1.1.4.0.1.1 = INTEGER: 4
.1.0.8802.1.1.2.1.4.1.1.5.0.1.1 = Hex-STRING: 00 1B 21 0A 0B 02
";

    const WALK_B: &str = "\
.1.0.8802.1.1.2.1.3.3.0 = STRING: \"sw-b\"
.1.3.6.1.2.1.2.2.1.1.5 = INTEGER: 5
.1.3.6.1.2.1.2.2.1.5.5 = Gauge32: 100000000
.1.3.6.1.2.1.2.2.1.6.5 = STRING: 0:1b:21:a:b:2
.1.3.6.1.2.1.2.2.1.8.5 = INTEGER: 1
.1.3.6.1.2.1.31.1.1.1.1.5 = STRING: \"eth5\"
.1.0.8802.1.1.2.1.4.1.1.4.0.5.1 = INTEGER: 4
.1.0.8802.1.1.2.1.4.1.1.5.0.5.1 = STRING: \"0:1b:21:a:b:1\"
";

    // Answers each walk with the lines of a canned host walk that belong
    // to the requested OID.
    #[derive(Default)]
    struct FakeTools {
        hosts: Mutex<BTreeMap<Ipv4Addr, String>>,
        walks: Mutex<Vec<(Ipv4Addr, String)>>,
    }

    impl FakeTools {
        fn with(hosts: &[(Ipv4Addr, &str)]) -> Self {
            let tools = FakeTools::default();
            for (addr, raw) in hosts {
                tools.set(*addr, raw);
            }
            tools
        }

        fn set(&self, addr: Ipv4Addr, raw: &str) {
            self.hosts.lock().unwrap().insert(addr, raw.to_string());
        }

        fn walked(&self, addr: Ipv4Addr) -> Vec<String> {
            self.walks
                .lock()
                .unwrap()
                .iter()
                .filter(|(a, _)| *a == addr)
                .map(|(_, oid)| oid.clone())
                .collect()
        }
    }

    impl SnmpTools for FakeTools {
        async fn scan(
            &self,
            _target: &str,
            _community: &str,
        ) -> TopodResult<Vec<Ipv4Addr>> {
            Ok(self.hosts.lock().unwrap().keys().copied().collect())
        }

        async fn walk(
            &self,
            host: Ipv4Addr,
            _community: &str,
            oid: &str,
        ) -> TopodResult<String> {
            self.walks.lock().unwrap().push((host, oid.to_string()));
            let hosts = self.hosts.lock().unwrap();
            let Some(raw) = hosts.get(&host) else {
                return Err(TopodError::subprocess("snmpwalk", "timeout"));
            };
            let mut out = String::new();
            for line in raw.lines().filter(|l| walk::contains_oid(l, oid)) {
                out.push_str(line);
                out.push('\n');
            }
            Ok(out)
        }
    }

    fn poller(tools: FakeTools) -> Poller<FakeTools> {
        let store = Store::in_memory(&log()).unwrap();
        Poller::new(store, tools, "public", &log())
    }

    #[test]
    fn test_host_index_record() {
        let mut index = HostIndex::default();
        assert!(index.is_empty());
        assert!(!index.record(HOST_A, Vec::new()));
        assert!(!index.record(HOST_B, Vec::new()));

        let tuples = walk::parse(WALK_A, &Catalog::initial(), HOST_A, &log());
        assert!(index.record(HOST_A, tuples.clone()));
        assert_eq!(index.len(), 2);
        assert_eq!(index.get(HOST_A).unwrap().tuples, tuples);
        assert!(index.get(HOST_B).unwrap().tuples.is_empty());
        assert_eq!(index.addresses(), vec![HOST_A, HOST_B]);
    }

    #[tokio::test]
    async fn test_initial_sweep() {
        let tools = FakeTools::with(&[(HOST_A, WALK_A), (HOST_B, WALK_B)]);
        let mut p = poller(tools);
        let hosts = p.tools.scan("10.0.0.0/24", "public").await.unwrap();
        assert_eq!(p.initial_sweep(&hosts).await, 2);

        let store = p.store();
        assert_eq!(store.devices().unwrap().len(), 2);
        assert_eq!(store.ports().unwrap().len(), 2);
        let links = store.links().unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].speed, 100_000_000);

        let a = store.get_device(HOST_A).unwrap().unwrap();
        assert_eq!(a.system_name, "sw-a");
        assert_eq!(a.capabilities_supported, 40);
        assert_eq!(p.index().len(), 2);
        assert_eq!(p.tools.walked(HOST_A).len(), Catalog::initial().len());
    }

    #[tokio::test]
    async fn test_sweep_skips_failed_hosts() {
        let tools = FakeTools::with(&[(HOST_A, WALK_A)]);
        let mut p = poller(tools);
        assert_eq!(p.initial_sweep(&[HOST_C, HOST_A]).await, 1);
        assert_eq!(p.store().devices().unwrap().len(), 1);
        assert!(p.index().get(HOST_C).is_none());
        // The walk of C gave up after its first OID.
        assert_eq!(p.tools.walked(HOST_C).len(), 1);
    }

    #[tokio::test]
    async fn test_trap_refresh_removes_stale_link() {
        let tools = FakeTools::with(&[(HOST_A, WALK_A), (HOST_B, WALK_B)]);
        let mut p = poller(tools);
        p.initial_sweep(&[HOST_A, HOST_B]).await;
        assert_eq!(p.store().links().unwrap().len(), 1);

        // B's neighbor goes away and B sends a trap, twice.
        let without_neighbor: String = WALK_B
            .lines()
            .filter(|l| !l.starts_with(".1.0.8802.1.1.2.1.4"))
            .map(|l| format!("{l}\n"))
            .collect();
        p.tools.set(HOST_B, &without_neighbor);

        let (tx, mut rx) = trap_buffer(10, &log());
        tx.push(HOST_B);
        tx.push(HOST_B);
        assert_eq!(p.poll_once(&mut rx).await, 1);
        assert!(p.store().links().unwrap().is_empty());
        assert_eq!(p.store().ports().unwrap().len(), 2);

        // Nothing pending, nothing to do.
        assert_eq!(p.poll_once(&mut rx).await, 0);
    }

    #[tokio::test]
    async fn test_trap_from_new_host() {
        let tools = FakeTools::with(&[(HOST_A, WALK_A), (HOST_B, WALK_B)]);
        let mut p = poller(tools);
        p.initial_sweep(&[HOST_A]).await;
        assert!(p.store().links().unwrap().is_empty());

        let (tx, mut rx) = trap_buffer(10, &log());
        tx.push(HOST_B);
        assert_eq!(p.poll_once(&mut rx).await, 1);
        assert_eq!(p.index().len(), 2);
        assert_eq!(p.store().links().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rescan_keeps_system_data() {
        let tools = FakeTools::with(&[(HOST_A, WALK_A), (HOST_B, WALK_B)]);
        let mut p = poller(tools);
        p.initial_sweep(&[HOST_A, HOST_B]).await;

        assert_eq!(p.rescan_known().await, 2);
        let a = p.store().get_device(HOST_A).unwrap().unwrap();
        assert_eq!(a.system_name, "sw-a");
        assert_eq!(a.capabilities_enabled, 8);
        assert_eq!(p.store().links().unwrap().len(), 1);

        // The rescan only walked the periodic tables.
        let walked = p.tools.walked(HOST_A);
        let periodic = Catalog::periodic();
        assert_eq!(walked.len(), Catalog::initial().len() + periodic.len());
        assert!(walked[Catalog::initial().len()..]
            .iter()
            .all(|oid| periodic.iter().any(|p| p == oid.as_str())));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let tools = FakeTools::with(&[(HOST_A, WALK_A)]);
        let mut p = poller(tools);
        let (_tx, mut rx) = trap_buffer(10, &log());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let stop = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            shutdown_tx.send(true).unwrap();
            shutdown_tx
        });
        p.run(&mut rx, shutdown_rx, Duration::from_millis(1), None).await;
        let _ = stop.await.unwrap();
        assert!(p.store().devices().unwrap().is_empty());
    }
}
