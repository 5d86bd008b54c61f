// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2024 Oxide Computer Company

//! Traps arrive asynchronously from the trap daemon and are queued here
//! until the poll loop gets around to re-walking the hosts that sent them.
//! The queue is bounded: once it is full, new traps are dropped rather than
//! stalling the reader.

use std::net::Ipv4Addr;

use slog::debug;
use slog::error;
use slog::info;
use slog::warn;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;

use crate::tools::parse_trap_line;
use crate::tools::TrapListener;

/// What happened to an address handed to [`TrapSender::push`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// The buffer was full
    Dropped,
    /// The poll loop has gone away
    Closed,
}

/// The producing half of the trap buffer.
#[derive(Clone)]
pub struct TrapSender {
    tx: mpsc::Sender<Ipv4Addr>,
    log: slog::Logger,
}

/// The consuming half of the trap buffer.
pub struct TrapReceiver {
    rx: mpsc::Receiver<Ipv4Addr>,
}

/// Create a buffer holding up to `capacity` pending trap addresses.
pub fn trap_buffer(
    capacity: usize,
    log: &slog::Logger,
) -> (TrapSender, TrapReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let log = log.new(slog::o!("unit" => "trap-buffer"));
    (TrapSender { tx, log }, TrapReceiver { rx })
}

impl TrapSender {
    /// Queue `addr` without waiting.
    pub fn push(&self, addr: Ipv4Addr) -> PushOutcome {
        match self.tx.try_send(addr) {
            Ok(()) => PushOutcome::Queued,
            Err(TrySendError::Full(addr)) => {
                warn!(self.log, "trap buffer full, dropping trap from {addr}");
                PushOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => PushOutcome::Closed,
        }
    }
}

impl TrapReceiver {
    /// Take everything queued right now, oldest first.  Never waits.
    pub fn drain(&mut self) -> Vec<Ipv4Addr> {
        let mut pending = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(addr) => pending.push(addr),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                    break
                }
            }
        }
        pending
    }
}

/// Read trap notifications from `listener` and queue their source
/// addresses until shutdown is requested or the listener exits.  Returns
/// the number of traps that were queued.
pub async fn trap_reader(
    mut listener: TrapListener,
    sender: TrapSender,
    mut shutdown: watch::Receiver<bool>,
    log: slog::Logger,
) -> usize {
    let log = log.new(slog::o!("unit" => "trap-reader"));
    let mut queued = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }
        let line = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            line = listener.next_line() => line,
        };

        match line {
            Ok(Some(line)) => {
                let Some(trap) = parse_trap_line(&line) else {
                    debug!(log, "ignoring listener output {line:?}");
                    continue;
                };
                debug!(log, "trap from {}", trap.address);
                match sender.push(trap.address) {
                    PushOutcome::Queued => queued += 1,
                    PushOutcome::Dropped => {}
                    PushOutcome::Closed => break,
                }
            }
            Ok(None) => {
                warn!(log, "trap listener exited");
                break;
            }
            Err(e) => {
                error!(log, "reading from trap listener: {e}");
                break;
            }
        }
    }

    listener.kill().await;
    info!(log, "trap reader exiting after {queued} traps");
    queued
}
