//! Input runner context.
//!
//! Owns the splitter runner for stream inputs and the delivery edge: each
//! populated pack goes to a decoder runner, through the synchronous decode
//! path, or straight to the router.

use super::decoder::{DecoderHandle, SyncDecoder};
use crate::pack::{pack_mut, PackRef, Pools};
use crate::router::RouterHandle;
use crate::splitter::SplitterRunner;
use crate::types::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Where an input's packs go after population.
#[derive(Debug, Clone)]
pub enum DeliverTo {
    /// Straight to the router (the input produced a decoded record).
    Router,
    /// Queue on a decoder runner's inbound channel.
    Decoder(DecoderHandle),
    /// Invoke the decoder inline before routing.
    SyncDecoder(SyncDecoder),
}

/// Context lent to an Input's `run`.
#[derive(Debug)]
pub struct InputRunner {
    name: String,
    deliver_to: DeliverTo,
    splitter: Option<SplitterRunner>,
    pools: Pools,
    router: RouterHandle,
    read_deadline: Duration,
    transient: bool,
    delivered: Arc<AtomicU64>,
}

impl InputRunner {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        deliver_to: DeliverTo,
        splitter: Option<SplitterRunner>,
        pools: Pools,
        router: RouterHandle,
        read_deadline: Duration,
        transient: bool,
    ) -> Self {
        Self {
            name,
            deliver_to,
            splitter,
            pools,
            router,
            read_deadline,
            transient,
            delivered: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// I/O reads should use this deadline so the stop signal is observed.
    pub fn read_deadline(&self) -> Duration {
        self.read_deadline
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub(crate) fn delivered_counter(&self) -> Arc<AtomicU64> {
        self.delivered.clone()
    }

    /// Acquire a fresh pack from the input pool (blocks on exhaustion).
    pub async fn new_pack(&self) -> Result<PackRef> {
        self.pools.input.acquire().await.ok_or(Error::ShuttingDown)
    }

    /// The splitter runner, for inputs that read byte streams.
    pub fn splitter(&mut self) -> Option<&mut SplitterRunner> {
        self.splitter.as_mut()
    }

    /// Hand one populated pack downstream.
    pub async fn deliver(&self, pack: PackRef) -> Result<()> {
        pack.stamp_handler(&self.name);
        self.delivered.fetch_add(1, Ordering::AcqRel);
        match &self.deliver_to {
            DeliverTo::Router => {
                if let Err(pack) = self.router.send(pack).await {
                    self.pools.recycle(pack);
                    return Err(Error::ShuttingDown);
                }
            }
            DeliverTo::Decoder(handle) => {
                if let Err(pack) = handle.send(pack).await {
                    self.pools.recycle(pack);
                    return Err(Error::ShuttingDown);
                }
            }
            DeliverTo::SyncDecoder(sync) => sync.decode_and_route(pack).await,
        }
        Ok(())
    }

    /// Drain every complete record currently buffered in the splitter into
    /// fresh packs and deliver them. Returns the number delivered.
    pub async fn deliver_split_records(&mut self) -> Result<usize> {
        let mut count = 0;
        loop {
            let record = match self.splitter.as_mut() {
                Some(splitter) => splitter.next_record()?,
                None => return Err(Error::config("input has no splitter configured")),
            };
            let Some(record) = record else {
                return Ok(count);
            };

            let mut pack = self.new_pack().await?;
            if let Some(inner) = pack_mut(&mut pack) {
                inner.raw_bytes.extend_from_slice(&record.payload);
                inner.signer = record.signer;
            }
            self.deliver(pack).await?;
            count += 1;
        }
    }
}
