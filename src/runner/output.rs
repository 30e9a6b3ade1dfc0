//! Output runner context.

use crate::pack::{PackRef, Pools};
use crate::plugins::Encoder;
use crate::spool::Spool;
use crate::types::Result;
use crate::wire::frame_record;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Context lent to an Output's `run`. The inbound channel survives plugin
/// restarts; it closes only when the router drops the subscription.
pub struct OutputRunner {
    name: String,
    in_rx: mpsc::Receiver<PackRef>,
    pools: Pools,
    encoder: Option<Arc<dyn Encoder>>,
    use_framing: bool,
    spool: Option<Spool>,
    processed: Arc<AtomicU64>,
}

impl std::fmt::Debug for OutputRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputRunner")
            .field("name", &self.name)
            .field("use_framing", &self.use_framing)
            .field("spooled", &self.spool.is_some())
            .finish_non_exhaustive()
    }
}

impl OutputRunner {
    pub(crate) fn new(
        name: String,
        in_rx: mpsc::Receiver<PackRef>,
        pools: Pools,
        encoder: Option<Arc<dyn Encoder>>,
        use_framing: bool,
        spool: Option<Spool>,
    ) -> Self {
        Self {
            name,
            in_rx,
            pools,
            encoder,
            use_framing,
            spool,
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

    /// Serialize a pack with the configured encoder, adding the wire
    /// framing when requested. `None` when no encoder is configured.
    pub fn encode(&self, pack: &PackRef) -> Result<Option<Vec<u8>>> {
        let Some(encoder) = &self.encoder else {
            return Ok(None);
        };
        let encoded = encoder.encode(pack)?;
        if !self.use_framing {
            return Ok(Some(encoded));
        }
        let mut framed = Vec::with_capacity(encoded.len() + 16);
        frame_record(&encoded, None, &mut framed)?;
        Ok(Some(framed))
    }

    /// The optional disk spool this output requested.
    pub fn spool(&mut self) -> Option<&mut Spool> {
        self.spool.as_mut()
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
