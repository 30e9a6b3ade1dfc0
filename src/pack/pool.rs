//! Bounded envelope pools and the leak auditor.
//!
//! Each pool is a bounded FIFO of idle packs. `acquire` awaits an idle pack
//! (the primary back-pressure point); `recycle` returns the pack on the
//! zero-crossing of its reference count. Pool exhaustion is never an error.
//!
//! The auditor periodically scans in-flight packs and reports any whose
//! last-access timestamp is stale while references are still held. Leaks are
//! bugs to be reported and counted per plugin; the auditor never reclaims.

use super::{Pack, PackRef, RecycleTarget};
use crate::types::GlobalConfig;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A bounded pool of reusable packs.
#[derive(Debug)]
pub struct PackPool {
    name: &'static str,
    target: RecycleTarget,
    capacity: usize,
    idle_tx: mpsc::Sender<Pack>,
    idle_rx: tokio::sync::Mutex<mpsc::Receiver<Pack>>,
    live: Mutex<Vec<Weak<Pack>>>,
    acquired: AtomicU64,
    returned: AtomicU64,
}

impl PackPool {
    /// Create a pool pre-filled to capacity.
    pub fn new(name: &'static str, target: RecycleTarget, capacity: usize) -> Arc<Self> {
        let (idle_tx, idle_rx) = mpsc::channel(capacity.max(1));
        for _ in 0..capacity {
            // Channel sized to capacity, so these sends cannot fail.
            let _ = idle_tx.try_send(Pack::new(target));
        }
        Arc::new(Self {
            name,
            target,
            capacity,
            idle_tx,
            idle_rx: tokio::sync::Mutex::new(idle_rx),
            live: Mutex::new(Vec::new()),
            acquired: AtomicU64::new(0),
            returned: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn target(&self) -> RecycleTarget {
        self.target
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of packs currently idle in the pool.
    pub fn idle_len(&self) -> usize {
        self.idle_tx.max_capacity() - self.idle_tx.capacity()
    }

    /// Total packs handed out since startup.
    pub fn acquired_total(&self) -> u64 {
        self.acquired.load(Ordering::Acquire)
    }

    /// Total packs returned to the pool since startup.
    pub fn returned_total(&self) -> u64 {
        self.returned.load(Ordering::Acquire)
    }

    /// Await an idle pack. Returns `None` only if the pool has been torn
    /// down. The returned pack has `ref_count = 1`.
    pub async fn acquire(&self) -> Option<PackRef> {
        let pack = {
            let mut rx = self.idle_rx.lock().await;
            rx.recv().await?
        };
        Some(self.hand_out(pack))
    }

    /// Take an idle pack without waiting. `None` if the pool is empty.
    pub async fn try_acquire(&self) -> Option<PackRef> {
        let pack = {
            let mut rx = self.idle_rx.lock().await;
            rx.try_recv().ok()?
        };
        Some(self.hand_out(pack))
    }

    fn hand_out(&self, pack: Pack) -> PackRef {
        pack.set_ref_count(1);
        pack.touch();
        let pack = Arc::new(pack);
        self.acquired.fetch_add(1, Ordering::AcqRel);
        if let Ok(mut live) = self.live.lock() {
            // Opportunistic pruning keeps the registry bounded.
            if live.len() >= self.capacity * 2 {
                live.retain(|w| w.strong_count() > 0);
            }
            live.push(Arc::downgrade(&pack));
        }
        pack
    }

    /// Release one reference. On the zero-crossing the pack is reset and
    /// re-enqueued; otherwise this is a no-op beyond the decrement. A count
    /// that would go negative is a programming error: it is logged and the
    /// pack abandoned rather than corrupting the pool.
    pub fn recycle(&self, pack: PackRef) {
        let remaining = pack.dec_ref();
        if remaining > 0 {
            return;
        }
        if remaining < 0 {
            tracing::error!(
                pool = self.name,
                trail = ?pack.handler_trail(),
                "pack recycled below zero references"
            );
            return;
        }

        // The zero-crossing handle is the last logical owner, but another
        // releaser may still be between its decrement and its Arc drop.
        // That window is a handful of instructions; spin it out.
        let mut shared = pack;
        let mut spins = 0u32;
        let inner = loop {
            match Arc::try_unwrap(shared) {
                Ok(inner) => break Some(inner),
                Err(still_shared) => {
                    shared = still_shared;
                    spins += 1;
                    if spins <= 1024 {
                        std::hint::spin_loop();
                    } else if spins <= 1044 {
                        std::thread::yield_now();
                    } else {
                        break None;
                    }
                }
            }
        };

        match inner {
            Some(mut pack) => {
                pack.zero();
                self.returned.fetch_add(1, Ordering::AcqRel);
                if self.idle_tx.try_send(pack).is_err() {
                    tracing::error!(pool = self.name, "idle queue full on recycle");
                }
            }
            None => {
                tracing::error!(
                    pool = self.name,
                    "pack reached zero references while still shared; dropped"
                );
            }
        }
    }

    /// Scan in-flight packs for leaks. Returns the number reported.
    pub fn audit(&self, max_idle: Duration, counters: &LeakCounters) -> usize {
        let now = Utc::now().timestamp_millis();
        let threshold = max_idle.as_millis() as i64;
        let mut reported = 0;

        let live: Vec<PackRef> = match self.live.lock() {
            Ok(mut live) => {
                live.retain(|w| w.strong_count() > 0);
                live.iter().filter_map(|w| w.upgrade()).collect()
            }
            Err(_) => return 0,
        };

        for pack in live {
            if pack.ref_count() > 0 && now - pack.last_access_millis() > threshold {
                let trail = pack.handler_trail();
                tracing::warn!(
                    pool = self.name,
                    ref_count = pack.ref_count(),
                    idle_ms = now - pack.last_access_millis(),
                    trail = ?trail,
                    "leaked pack detected"
                );
                counters.record(trail.last().map(String::as_str).unwrap_or("unknown"));
                reported += 1;
            }
        }
        reported
    }
}

/// Per-plugin leak counts maintained by the auditor.
#[derive(Debug, Default)]
pub struct LeakCounters {
    total: AtomicU64,
    by_plugin: Mutex<HashMap<String, u64>>,
}

impl LeakCounters {
    pub fn record(&self, plugin: &str) {
        self.total.fetch_add(1, Ordering::AcqRel);
        if let Ok(mut map) = self.by_plugin.lock() {
            *map.entry(plugin.to_string()).or_insert(0) += 1;
        }
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    pub fn count_for(&self, plugin: &str) -> u64 {
        self.by_plugin
            .lock()
            .ok()
            .and_then(|map| map.get(plugin).copied())
            .unwrap_or(0)
    }
}

/// The input and injection pools. Separation prevents a filter-induced
/// fan-out from starving input intake and deadlocking the pipeline.
#[derive(Debug, Clone)]
pub struct Pools {
    pub input: Arc<PackPool>,
    pub inject: Arc<PackPool>,
}

impl Pools {
    pub fn new(config: &GlobalConfig) -> Self {
        Self {
            input: PackPool::new("input", RecycleTarget::Input, config.pool_size),
            inject: PackPool::new("inject", RecycleTarget::Inject, config.pool_size),
        }
    }

    /// Release one reference, returning the pack to the pool it came from.
    pub fn recycle(&self, pack: PackRef) {
        match pack.recycle_target {
            RecycleTarget::Input => self.input.recycle(pack),
            RecycleTarget::Inject => self.inject.recycle(pack),
        }
    }
}

/// Spawn the background auditor task. It ticks on the configured interval
/// until the pipeline is cancelled.
pub fn spawn_leak_auditor(
    pools: Pools,
    config: Arc<GlobalConfig>,
    counters: Arc<LeakCounters>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(config.leak_audit_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    pools.input.audit(config.max_pack_idle, &counters);
                    pools.inject.audit(config.max_pack_idle, &counters);
                }
            }
        }
    })
}
