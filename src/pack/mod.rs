//! Pack - the reusable envelope carrying work through the pipeline.
//!
//! A `Pack` holds raw input bytes and, once decoded, a structured
//! [`Record`](crate::message::Record). Packs are created at startup, live in
//! a bounded pool, and are infinitely reused: acquire → populate → route →
//! recycle. Exactly one stage mutates a pack at a time; transfer is by
//! channel send. After the router fans a pack out, it is shared read-only
//! and each subscriber releases it exactly once.
//!
//! In-flight packs are carried as `PackRef = Arc<Pack>`. Mutation before
//! fan-out goes through [`pack_mut`] (unique ownership); `recycle` consumes
//! the handle by value, so releasing the same handle twice is
//! unrepresentable.

use crate::message::Record;
use chrono::Utc;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

pub mod pool;

pub use pool::{spawn_leak_auditor, LeakCounters, PackPool, Pools};

/// Which pool a pack returns to when its reference count reaches zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecycleTarget {
    /// The input pool (Inputs → decoders → router).
    Input,
    /// The injection pool (Filter-generated packs re-entering the router).
    Inject,
}

/// Shared handle to an in-flight pack.
pub type PackRef = Arc<Pack>;

/// The envelope.
#[derive(Debug)]
pub struct Pack {
    /// Opaque buffer for undecoded input. Backing capacity is retained
    /// across recycles.
    pub raw_bytes: Vec<u8>,

    /// Structured record; valid iff `decoded`.
    pub record: Record,

    /// Whether `record` holds a decoded message.
    pub decoded: bool,

    /// Authenticated origin, stamped by the frame authenticator.
    pub signer: Option<String>,

    /// Incremented each time a Filter re-injects a derived pack carrying
    /// this pack's lineage.
    pub loop_count: u32,

    /// Pool this pack returns to.
    pub recycle_target: RecycleTarget,

    ref_count: AtomicI32,
    last_access: AtomicI64,
    trail: Mutex<Vec<String>>,
}

impl Pack {
    pub(crate) fn new(recycle_target: RecycleTarget) -> Self {
        let mut record = Record::new();
        record.clear();
        Self {
            raw_bytes: Vec::new(),
            record,
            decoded: false,
            signer: None,
            loop_count: 0,
            recycle_target,
            ref_count: AtomicI32::new(0),
            last_access: AtomicI64::new(Utc::now().timestamp_millis()),
            trail: Mutex::new(Vec::new()),
        }
    }

    /// Current reference count.
    pub fn ref_count(&self) -> i32 {
        self.ref_count.load(Ordering::Acquire)
    }

    pub(crate) fn set_ref_count(&self, n: i32) {
        self.ref_count.store(n, Ordering::Release);
    }

    /// Atomically increase the reference count by `n`. Used by the router
    /// before fan-out.
    pub fn add_ref(&self, n: i32) {
        self.ref_count.fetch_add(n, Ordering::AcqRel);
    }

    /// Atomically decrement, returning the new count.
    pub(crate) fn dec_ref(&self) -> i32 {
        self.ref_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// Stamp the last-access timestamp.
    pub fn touch(&self) {
        self.last_access
            .store(Utc::now().timestamp_millis(), Ordering::Release);
    }

    /// Epoch-millis of the last access.
    pub fn last_access_millis(&self) -> i64 {
        self.last_access.load(Ordering::Acquire)
    }

    /// Record a handling plugin in the diagnostic trail and touch the pack.
    pub fn stamp_handler(&self, plugin: &str) {
        self.touch();
        if let Ok(mut trail) = self.trail.lock() {
            trail.push(plugin.to_string());
        }
    }

    /// Ordered list of plugin names that handled this pack since the last
    /// reset.
    pub fn handler_trail(&self) -> Vec<String> {
        self.trail.lock().map(|t| t.clone()).unwrap_or_default()
    }

    /// Reset for reuse: clears record, signer, loop count, decoded flag and
    /// trail. The raw-byte backing store is retained (length reset only).
    pub(crate) fn zero(&mut self) {
        self.raw_bytes.clear();
        self.record.clear();
        self.decoded = false;
        self.signer = None;
        self.loop_count = 0;
        self.ref_count.store(0, Ordering::Release);
        if let Ok(mut trail) = self.trail.lock() {
            trail.clear();
        }
        self.touch();
    }
}

/// Mutable access to a pack that is still uniquely owned (pre-fan-out).
/// Returns `None` once the router has shared the pack.
pub fn pack_mut(pack: &mut PackRef) -> Option<&mut Pack> {
    Arc::get_mut(pack)
}
