//! Filter runner context.

use crate::pack::{PackRef, Pools};
use crate::router::InjectHandle;
use crate::types::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Context lent to a Filter's `run`. The inbound channel survives plugin
/// restarts; it closes only when the router drops the subscription.
#[derive(Debug)]
pub struct FilterRunner {
    name: String,
    in_rx: mpsc::Receiver<PackRef>,
    inject: InjectHandle,
    pools: Pools,
    processed: Arc<AtomicU64>,
}

impl FilterRunner {
    pub(crate) fn new(
        name: String,
        in_rx: mpsc::Receiver<PackRef>,
        inject: InjectHandle,
        pools: Pools,
    ) -> Self {
        Self {
            name,
            in_rx,
            inject,
            pools,
            processed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn processed_counter(&self) -> Arc<AtomicU64> {
        self.processed.clone()
    }

    /// Receive the next matched pack. `None` means the subscription was
    /// removed: treat it as shutdown.
    pub async fn in_chan(&mut self) -> Option<PackRef> {
        let pack = self.in_rx.recv().await?;
        pack.stamp_handler(&self.name);
        self.processed.fetch_add(1, Ordering::AcqRel);
        Some(pack)
    }

    /// Acquire a pack for a derived record. Filter-generated packs come
    /// from the injection pool.
    pub async fn new_pack(&self) -> Result<PackRef> {
        self.pools.inject.acquire().await.ok_or(Error::ShuttingDown)
    }

    /// The injection gateway back into the router.
    pub fn inject(&self) -> &InjectHandle {
        &self.inject
    }

    /// Release one reference on a consumed pack.
    pub fn recycle(&self, pack: PackRef) {
        self.pools.recycle(pack);
    }

    /// Recycle everything currently queued. Used when the plugin is dead
    /// and nobody will read the channel again.
    pub(crate) fn drain(&mut self) {
        while let Ok(pack) = self.in_rx.try_recv() {
            self.pools.recycle(pack);
        }
    }
}
