//! Decoder runners - the fan-out between inputs and the router.
//!
//! One shared runner exists per named decoder, owning a bounded inbound
//! channel. Inputs that request synchronous decoding bypass the channel and
//! invoke the same decoder inline through [`SyncDecoder`], which bounds
//! latency but serializes that input with that decoder.

use crate::pack::{pack_mut, PackPool, PackRef, Pools};
use crate::plugins::Decoder;
use crate::router::RouterHandle;
use crate::types::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Decode failures carry the original pack back to the runner so it can be
/// recycled or stamped and forwarded.
#[derive(Debug)]
pub struct DecodeFailure {
    pub pack: PackRef,
    pub message: String,
}

impl DecodeFailure {
    pub fn new(pack: PackRef, message: impl Into<String>) -> Self {
        Self {
            pack,
            message: message.into(),
        }
    }
}

/// Capabilities a decoder sees while decoding.
#[derive(Debug)]
pub struct DecoderContext {
    name: String,
    input_pool: Arc<PackPool>,
}

impl DecoderContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquire an extra output pack. Extras are paid for from the input
    /// pool; awaiting here is the back-pressure signal.
    pub async fn new_pack(&self) -> Result<PackRef> {
        self.input_pool.acquire().await.ok_or(Error::ShuttingDown)
    }
}

/// Per-runner behavior for decode failures.
#[derive(Debug, Clone, Default)]
pub struct DecoderRunnerConfig {
    /// Stamp failure fields and forward instead of recycling on error.
    pub send_decode_failures: bool,
}

/// Cloneable handle to a running decoder.
#[derive(Debug, Clone)]
pub struct DecoderHandle {
    name: String,
    tx: mpsc::Sender<PackRef>,
    sync: SyncDecoder,
}

impl DecoderHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a pack for asynchronous decoding. On failure the pack is
    /// handed back for recycling.
    pub async fn send(&self, pack: PackRef) -> std::result::Result<(), PackRef> {
        self.tx.send(pack).await.map_err(|e| e.0)
    }

    /// The synchronous decode path for inputs that request it.
    pub fn sync(&self) -> &SyncDecoder {
        &self.sync
    }

    pub fn in_chan_capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub fn in_chan_len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub(crate) fn downgrade(&self) -> mpsc::WeakSender<PackRef> {
        self.tx.downgrade()
    }
}

/// Invokes a decoder inline and routes its results.
#[derive(Debug, Clone)]
pub struct SyncDecoder {
    inner: Arc<DecoderWorker>,
}

impl SyncDecoder {
    /// Decode one pack and forward the results to the router.
    pub async fn decode_and_route(&self, pack: PackRef) {
        self.inner.process(pack).await;
    }
}

struct DecoderWorker {
    name: String,
    decoder: Arc<dyn Decoder>,
    ctx: DecoderContext,
    router: RouterHandle,
    pools: Pools,
    config: DecoderRunnerConfig,
    failures: AtomicU64,
}

impl std::fmt::Debug for DecoderWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderWorker")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DecoderWorker {
    async fn process(&self, pack: PackRef) {
        pack.stamp_handler(&self.name);
        match self.decoder.decode(pack, &self.ctx).await {
            Ok(packs) => {
                for pack in packs {
                    if let Err(pack) = self.router.send(pack).await {
                        self.pools.recycle(pack);
                    }
                }
            }
            Err(failure) => {
                self.failures.fetch_add(1, Ordering::AcqRel);
                tracing::debug!(
                    decoder = %self.name,
                    error = %failure.message,
                    "decode failed"
                );
                if self.config.send_decode_failures {
                    let mut pack = failure.pack;
                    if let Some(inner) = pack_mut(&mut pack) {
                        inner.record.add_bool_field("decode_failure", true);
                        inner
                            .record
                            .add_str_field("decode_error", truncate_error(&failure.message));
                        inner.decoded = true;
                    }
                    if let Err(pack) = self.router.send(pack).await {
                        self.pools.recycle(pack);
                    }
                } else {
                    self.pools.recycle(failure.pack);
                }
            }
        }
    }
}

/// Only the first 500 bytes of an error make it onto the record.
fn truncate_error(message: &str) -> String {
    if message.len() <= 500 {
        return message.to_string();
    }
    let mut cut = 500;
    while !message.is_char_boundary(cut) {
        cut -= 1;
    }
    message[..cut].to_string()
}

/// Spawn the shared runner for one named decoder. The runner drains its
/// inbound channel until every sender is dropped, then exits.
pub fn spawn_decoder_runner(
    name: &str,
    decoder: Arc<dyn Decoder>,
    config: DecoderRunnerConfig,
    chan_size: usize,
    input_pool: Arc<PackPool>,
    pools: Pools,
    router: RouterHandle,
) -> (DecoderHandle, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<PackRef>(chan_size);
    let worker = Arc::new(DecoderWorker {
        name: name.to_string(),
        decoder,
        ctx: DecoderContext {
            name: name.to_string(),
            input_pool,
        },
        router,
        pools,
        config,
        failures: AtomicU64::new(0),
    });

    let handle = DecoderHandle {
        name: name.to_string(),
        tx,
        sync: SyncDecoder {
            inner: worker.clone(),
        },
    };

    let task = tokio::spawn(async move {
        while let Some(pack) = rx.recv().await {
            worker.process(pack).await;
        }
        tracing::debug!(decoder = %worker.name, "decoder runner drained and stopped");
    });

    (handle, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::Matcher;
    use crate::router::{spawn_router, MatcherStats, SubscriberKind, Subscription};
    use crate::types::GlobalConfig;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Splits a comma-separated payload into one pack per element.
    struct CommaDecoder;

    #[async_trait]
    impl Decoder for CommaDecoder {
        async fn decode(
            &self,
            mut pack: PackRef,
            ctx: &DecoderContext,
        ) -> std::result::Result<Vec<PackRef>, DecodeFailure> {
            let raw = String::from_utf8_lossy(&pack.raw_bytes).into_owned();
            if raw.is_empty() {
                return Err(DecodeFailure::new(pack, "empty payload"));
            }
            let mut parts = raw.split(',');

            let first = parts.next().unwrap_or_default().to_string();
            let mut out = Vec::new();
            {
                let inner = pack_mut(&mut pack).unwrap();
                inner.record.payload = first;
                inner.record.msg_type = "csv".to_string();
                inner.decoded = true;
            }
            out.push(pack);

            for part in parts {
                let mut extra = ctx.new_pack().await.map_err(|e| {
                    DecodeFailure::new(out.remove(0), format!("pool unavailable: {e}"))
                })?;
                let inner = pack_mut(&mut extra).unwrap();
                inner.record.payload = part.to_string();
                inner.record.msg_type = "csv".to_string();
                inner.decoded = true;
                out.push(extra);
            }
            Ok(out)
        }
    }

    async fn harness(
        config: DecoderRunnerConfig,
    ) -> (
        Pools,
        DecoderHandle,
        mpsc::Receiver<PackRef>,
        RouterHandle,
    ) {
        let cfg = GlobalConfig {
            pool_size: 8,
            ..GlobalConfig::default()
        };
        let pools = Pools::new(&cfg);
        let (router, _task) = spawn_router(&cfg, pools.clone());

        let (tx, rx) = mpsc::channel(8);
        router
            .add_subscriber(Subscription {
                name: "sink".to_string(),
                kind: SubscriberKind::Output,
                matcher: Arc::new(Matcher::new("TRUE").unwrap()),
                tx,
                stats: Arc::new(MatcherStats::default()),
            })
            .await
            .unwrap();

        let (handle, _task) = spawn_decoder_runner(
            "CommaDecoder",
            Arc::new(CommaDecoder),
            config,
            cfg.plugin_chan_size,
            pools.input.clone(),
            pools.clone(),
            router.clone(),
        );
        (pools, handle, rx, router)
    }

    async fn raw_pack(pools: &Pools, bytes: &[u8]) -> PackRef {
        let mut pack = pools.input.acquire().await.unwrap();
        pack_mut(&mut pack)
            .unwrap()
            .raw_bytes
            .extend_from_slice(bytes);
        pack
    }

    #[tokio::test]
    async fn fan_out_preserves_order_and_uses_input_pool() {
        let (pools, handle, mut rx, _router) = harness(DecoderRunnerConfig::default()).await;

        handle.send(raw_pack(&pools, b"a,b,c").await).await.unwrap();

        for expected in ["a", "b", "c"] {
            let pack = rx.recv().await.unwrap();
            assert_eq!(pack.record.payload, expected);
            assert!(pack.decoded);
            pools.recycle(pack);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pools.input.idle_len(), 8, "all packs returned");
    }

    #[tokio::test]
    async fn decode_failure_recycles_by_default() {
        let (pools, handle, mut rx, _router) = harness(DecoderRunnerConfig::default()).await;

        handle.send(raw_pack(&pools, b"").await).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(pools.input.idle_len(), 8);
    }

    #[tokio::test]
    async fn decode_failure_forwards_with_stamped_fields() {
        let (pools, handle, mut rx, _router) = harness(DecoderRunnerConfig {
            send_decode_failures: true,
        })
        .await;

        handle.send(raw_pack(&pools, b"").await).await.unwrap();
        let pack = rx.recv().await.unwrap();
        assert_eq!(
            pack.record.field("decode_failure").unwrap().value,
            crate::message::FieldValue::Bool(vec![true])
        );
        assert_eq!(
            pack.record.field("decode_error").unwrap().value,
            crate::message::FieldValue::Str(vec!["empty payload".to_string()])
        );
        pools.recycle(pack);
    }

    #[tokio::test]
    async fn sync_decode_routes_inline() {
        let (pools, handle, mut rx, _router) = harness(DecoderRunnerConfig::default()).await;

        handle
            .sync()
            .decode_and_route(raw_pack(&pools, b"only").await)
            .await;
        let pack = rx.recv().await.unwrap();
        assert_eq!(pack.record.payload, "only");
        pools.recycle(pack);
    }

    #[test]
    fn error_text_is_truncated_at_500_bytes() {
        let long = "x".repeat(1000);
        assert_eq!(truncate_error(&long).len(), 500);
        let multibyte = "é".repeat(300); // 600 bytes
        let cut = truncate_error(&multibyte);
        assert!(cut.len() <= 500);
        assert!(multibyte.starts_with(&cut));
    }
}
