//! Router - matcher-driven fan-out to Filters and Outputs.
//!
//! The router is a single worker owning the subscription map, so the
//! dispatch path needs no locking. Per inbound pack it evaluates every
//! Filter matcher, then every Output matcher, bumps the pack's reference
//! count to the number of matches, and sends a shared handle down each
//! matched subscriber's bounded inbound channel.
//!
//! Subscription changes are sequenced through the same inbound queue as
//! packs: they apply between dispatches, never race a dispatch, and can
//! never overtake a pack the router already accepted. That ordering is
//! what lets shutdown drain a subscriber's channel before removing it
//! without losing in-flight packs.

use crate::matcher::Matcher;
use crate::pack::{pack_mut, PackRef, Pools};
use crate::types::{Error, GlobalConfig, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

/// What kind of plugin a subscription feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberKind {
    Filter,
    Output,
}

/// Matcher evaluation statistics, shared with the self-reporter.
#[derive(Debug, Default)]
pub struct MatcherStats {
    evaluations: AtomicU64,
    matches: AtomicU64,
    total_ns: AtomicU64,
}

impl MatcherStats {
    fn record(&self, matched: bool, elapsed_ns: u64) {
        self.evaluations.fetch_add(1, Ordering::AcqRel);
        if matched {
            self.matches.fetch_add(1, Ordering::AcqRel);
        }
        self.total_ns.fetch_add(elapsed_ns, Ordering::AcqRel);
    }

    pub fn matches(&self) -> u64 {
        self.matches.load(Ordering::Acquire)
    }

    /// Mean evaluation duration in nanoseconds.
    pub fn avg_duration_ns(&self) -> u64 {
        let evals = self.evaluations.load(Ordering::Acquire);
        if evals == 0 {
            0
        } else {
            self.total_ns.load(Ordering::Acquire) / evals
        }
    }
}

/// One registered Filter or Output.
#[derive(Debug)]
pub struct Subscription {
    pub name: String,
    pub kind: SubscriberKind,
    pub matcher: Arc<Matcher>,
    pub tx: mpsc::Sender<PackRef>,
    pub stats: Arc<MatcherStats>,
}

/// Subscription map mutations.
#[derive(Debug)]
pub enum RouterCommand {
    Add {
        subscription: Subscription,
        ack: Option<oneshot::Sender<()>>,
    },
    Remove {
        name: String,
        ack: Option<oneshot::Sender<bool>>,
    },
}

#[derive(Debug)]
enum RouterMessage {
    Pack(PackRef),
    Control(RouterCommand),
}

/// Router-wide counters.
#[derive(Debug, Default)]
pub struct RouterStats {
    processed: AtomicU64,
    dropped_loops: AtomicU64,
    unmatched: AtomicU64,
}

impl RouterStats {
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Acquire)
    }

    pub fn dropped_loops(&self) -> u64 {
        self.dropped_loops.load(Ordering::Acquire)
    }

    pub fn unmatched(&self) -> u64 {
        self.unmatched.load(Ordering::Acquire)
    }
}

/// Cloneable handle for feeding and reconfiguring the router.
#[derive(Debug, Clone)]
pub struct RouterHandle {
    in_tx: mpsc::Sender<RouterMessage>,
    stats: Arc<RouterStats>,
}

impl RouterHandle {
    /// Send a pack to the router. On failure the pack is handed back so the
    /// caller can recycle it.
    pub async fn send(&self, pack: PackRef) -> std::result::Result<(), PackRef> {
        self.in_tx
            .send(RouterMessage::Pack(pack))
            .await
            .map_err(|e| match e.0 {
                RouterMessage::Pack(pack) => pack,
                // send returns the value it was given
                RouterMessage::Control(_) => unreachable!(),
            })
    }

    /// Register a subscriber, waiting until the router has applied the
    /// change between dispatches.
    pub async fn add_subscriber(&self, subscription: Subscription) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.in_tx
            .send(RouterMessage::Control(RouterCommand::Add {
                subscription,
                ack: Some(ack_tx),
            }))
            .await
            .map_err(|_| Error::ShuttingDown)?;
        ack_rx.await.map_err(|_| Error::ShuttingDown)
    }

    /// Remove a subscriber by name, waiting until the router has dropped
    /// its sender (which closes the subscriber's inbound channel). Every
    /// pack accepted before this call dispatches first.
    pub async fn remove_subscriber(&self, name: &str) -> Result<bool> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.in_tx
            .send(RouterMessage::Control(RouterCommand::Remove {
                name: name.to_string(),
                ack: Some(ack_tx),
            }))
            .await
            .map_err(|_| Error::ShuttingDown)?;
        ack_rx.await.map_err(|_| Error::ShuttingDown)
    }

    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    pub fn in_chan_capacity(&self) -> usize {
        self.in_tx.max_capacity()
    }

    pub fn in_chan_len(&self) -> usize {
        self.in_tx.max_capacity() - self.in_tx.capacity()
    }
}

/// Spawn the router worker. The task exits when every handle is gone and
/// the inbound queue drains.
pub fn spawn_router(
    config: &GlobalConfig,
    pools: Pools,
) -> (RouterHandle, tokio::task::JoinHandle<()>) {
    let (in_tx, in_rx) = mpsc::channel(config.plugin_chan_size);
    let stats = Arc::new(RouterStats::default());

    let router = Router {
        in_rx,
        pools,
        max_message_loops: config.max_message_loops,
        filters: Vec::new(),
        outputs: Vec::new(),
        stats: stats.clone(),
        scratch: Vec::new(),
    };
    let handle = RouterHandle { in_tx, stats };
    (handle, tokio::spawn(router.run()))
}

struct Router {
    in_rx: mpsc::Receiver<RouterMessage>,
    pools: Pools,
    max_message_loops: u32,
    filters: Vec<Subscription>,
    outputs: Vec<Subscription>,
    stats: Arc<RouterStats>,
    scratch: Vec<usize>,
}

impl Router {
    async fn run(mut self) {
        while let Some(message) = self.in_rx.recv().await {
            match message {
                RouterMessage::Pack(pack) => self.dispatch(pack).await,
                RouterMessage::Control(cmd) => self.apply(cmd),
            }
        }
        tracing::debug!("router drained and stopped");
    }

    fn apply(&mut self, cmd: RouterCommand) {
        match cmd {
            RouterCommand::Add { subscription, ack } => {
                let list = match subscription.kind {
                    SubscriberKind::Filter => &mut self.filters,
                    SubscriberKind::Output => &mut self.outputs,
                };
                if let Some(existing) = list.iter_mut().find(|s| s.name == subscription.name) {
                    *existing = subscription;
                } else {
                    list.push(subscription);
                }
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            RouterCommand::Remove { name, ack } => {
                let before = self.filters.len() + self.outputs.len();
                self.filters.retain(|s| s.name != name);
                self.outputs.retain(|s| s.name != name);
                let removed = self.filters.len() + self.outputs.len() < before;
                if let Some(ack) = ack {
                    let _ = ack.send(removed);
                }
            }
        }
    }

    async fn dispatch(&mut self, pack: PackRef) {
        self.stats.processed.fetch_add(1, Ordering::AcqRel);

        if pack.loop_count > self.max_message_loops {
            self.stats.dropped_loops.fetch_add(1, Ordering::AcqRel);
            tracing::warn!(
                loop_count = pack.loop_count,
                max = self.max_message_loops,
                "dropping pack exceeding max message loops"
            );
            self.pools.recycle(pack);
            return;
        }

        // Filters first, then outputs; scratch holds matched indexes with
        // filter entries in front.
        self.scratch.clear();
        for (i, sub) in self.filters.iter().enumerate() {
            if eval_timed(sub, &pack) {
                self.scratch.push(i);
            }
        }
        let filter_matches = self.scratch.len();
        for (i, sub) in self.outputs.iter().enumerate() {
            if eval_timed(sub, &pack) {
                self.scratch.push(i);
            }
        }

        let total = self.scratch.len();
        if total == 0 {
            self.stats.unmatched.fetch_add(1, Ordering::AcqRel);
            self.pools.recycle(pack);
            return;
        }

        // The acquiring stage's reference transfers to the first subscriber,
        // so after this the count equals the number of matches.
        pack.add_ref(total as i32 - 1);
        pack.touch();

        for slot in 0..total - 1 {
            self.send_to(slot, filter_matches, pack.clone()).await;
        }
        // The last subscriber takes the router's own handle, so the final
        // recycle never waits on this task to release it.
        self.send_to(total - 1, filter_matches, pack).await;
    }

    async fn send_to(&self, slot: usize, filter_matches: usize, pack: PackRef) {
        let sub = if slot < filter_matches {
            &self.filters[self.scratch[slot]]
        } else {
            &self.outputs[self.scratch[slot]]
        };
        if let Err(mpsc::error::SendError(rejected)) = sub.tx.send(pack).await {
            // Subscriber is gone; release its reference.
            tracing::debug!(subscriber = %sub.name, "dropping pack for dead subscriber");
            self.pools.recycle(rejected);
        }
    }
}

fn eval_timed(sub: &Subscription, pack: &PackRef) -> bool {
    let start = Instant::now();
    let matched = sub.matcher.matches(&pack.record);
    sub.stats
        .record(matched, start.elapsed().as_nanos() as u64);
    matched
}

/// A Filter's gateway for re-entering the router with derived packs.
///
/// Injection refuses packs that would match the injecting filter's own
/// matcher, preventing trivial self-loops below the loop-count ceiling.
#[derive(Debug, Clone)]
pub struct InjectHandle {
    router: RouterHandle,
    pools: Pools,
    own_matcher: Arc<Matcher>,
    name: String,
    refused: Arc<AtomicU64>,
}

impl InjectHandle {
    pub fn new(
        router: RouterHandle,
        pools: Pools,
        own_matcher: Arc<Matcher>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            router,
            pools,
            own_matcher,
            name: name.into(),
            refused: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Injections refused by the self-loop guard.
    pub fn refused(&self) -> u64 {
        self.refused.load(Ordering::Acquire)
    }

    /// Send a derived pack back through the router, bumping its loop count.
    pub async fn inject(&self, mut pack: PackRef) -> Result<()> {
        if self.own_matcher.would_match(&pack.record) {
            self.refused.fetch_add(1, Ordering::AcqRel);
            self.pools.recycle(pack);
            let msg = format!(
                "filter {} refused injection: pack matches its own matcher",
                self.name
            );
            tracing::error!("{msg}");
            return Err(Error::plugin(msg));
        }

        match pack_mut(&mut pack) {
            Some(inner) => inner.loop_count += 1,
            None => {
                self.pools.recycle(pack);
                return Err(Error::plugin(format!(
                    "filter {} injected a shared pack",
                    self.name
                )));
            }
        }
        pack.stamp_handler(&self.name);

        if let Err(pack) = self.router.send(pack).await {
            self.pools.recycle(pack);
            return Err(Error::ShuttingDown);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn globals(pool_size: usize) -> GlobalConfig {
        GlobalConfig {
            pool_size,
            ..GlobalConfig::default()
        }
    }

    async fn subscribe(
        handle: &RouterHandle,
        name: &str,
        kind: SubscriberKind,
        expression: &str,
    ) -> mpsc::Receiver<PackRef> {
        let (tx, rx) = mpsc::channel(8);
        handle
            .add_subscriber(Subscription {
                name: name.to_string(),
                kind,
                matcher: Arc::new(Matcher::new(expression).unwrap()),
                tx,
                stats: Arc::new(MatcherStats::default()),
            })
            .await
            .unwrap();
        rx
    }

    async fn typed_pack(pools: &Pools, msg_type: &str) -> PackRef {
        let mut pack = pools.input.acquire().await.unwrap();
        let inner = pack_mut(&mut pack).unwrap();
        inner.record.msg_type = msg_type.to_string();
        inner.decoded = true;
        pack
    }

    #[tokio::test]
    async fn ref_count_equals_match_count_at_dispatch() {
        let cfg = globals(4);
        let pools = Pools::new(&cfg);
        let (handle, task) = spawn_router(&cfg, pools.clone());

        let mut f1 = subscribe(&handle, "f1", SubscriberKind::Filter, "TRUE").await;
        let mut o1 = subscribe(&handle, "o1", SubscriberKind::Output, "Type == \"x\"").await;
        let mut o2 = subscribe(&handle, "o2", SubscriberKind::Output, "Type == \"nope\"").await;

        handle.send(typed_pack(&pools, "x").await).await.unwrap();

        let a = f1.recv().await.unwrap();
        let b = o1.recv().await.unwrap();
        assert_eq!(a.ref_count(), 2);

        pools.recycle(a);
        pools.recycle(b);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pools.input.idle_len(), 4);
        assert!(o2.try_recv().is_err());

        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn unmatched_packs_are_recycled() {
        let cfg = globals(2);
        let pools = Pools::new(&cfg);
        let (handle, task) = spawn_router(&cfg, pools.clone());

        let _rx = subscribe(&handle, "o", SubscriberKind::Output, "Type == \"wanted\"").await;
        handle
            .send(typed_pack(&pools, "unwanted").await)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pools.input.idle_len(), 2);
        assert_eq!(handle.stats().unmatched(), 1);

        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn excessive_loop_count_is_dropped() {
        let cfg = globals(2);
        let pools = Pools::new(&cfg);
        let (handle, task) = spawn_router(&cfg, pools.clone());
        let _rx = subscribe(&handle, "o", SubscriberKind::Output, "TRUE").await;

        let mut pack = pools.inject.acquire().await.unwrap();
        pack_mut(&mut pack).unwrap().loop_count = cfg.max_message_loops + 1;
        handle.send(pack).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.stats().dropped_loops(), 1);
        assert_eq!(pools.inject.idle_len(), 2);

        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn subscriber_order_is_fifo() {
        let cfg = globals(8);
        let pools = Pools::new(&cfg);
        let (handle, task) = spawn_router(&cfg, pools.clone());
        let mut rx = subscribe(&handle, "o", SubscriberKind::Output, "TRUE").await;

        for i in 0..5 {
            handle
                .send(typed_pack(&pools, &format!("t{i}")).await)
                .await
                .unwrap();
        }
        for i in 0..5 {
            let pack = rx.recv().await.unwrap();
            assert_eq!(pack.record.msg_type, format!("t{i}"));
            pools.recycle(pack);
        }

        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn remove_dispatches_accepted_packs_first() {
        let cfg = globals(8);
        let pools = Pools::new(&cfg);
        let (handle, task) = spawn_router(&cfg, pools.clone());
        let mut rx = subscribe(&handle, "o", SubscriberKind::Output, "TRUE").await;

        for _ in 0..3 {
            handle.send(typed_pack(&pools, "t").await).await.unwrap();
        }
        // The removal is queued behind the three packs: they must all
        // arrive before the channel closes.
        let remover = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.remove_subscriber("o").await })
        };

        let mut received = 0;
        while let Some(pack) = rx.recv().await {
            received += 1;
            pools.recycle(pack);
        }
        assert_eq!(received, 3);
        assert!(remover.await.unwrap().unwrap());

        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn remove_subscriber_closes_its_channel() {
        let cfg = globals(2);
        let pools = Pools::new(&cfg);
        let (handle, task) = spawn_router(&cfg, pools.clone());
        let mut rx = subscribe(&handle, "f", SubscriberKind::Filter, "TRUE").await;

        assert!(handle.remove_subscriber("f").await.unwrap());
        assert!(rx.recv().await.is_none(), "channel closes on removal");
        assert!(!handle.remove_subscriber("f").await.unwrap());

        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn inject_refuses_self_matching_packs() {
        let cfg = globals(2);
        let pools = Pools::new(&cfg);
        let (handle, task) = spawn_router(&cfg, pools.clone());

        let own = Arc::new(Matcher::new("Type == \"X\"").unwrap());
        let inject = InjectHandle::new(handle.clone(), pools.clone(), own, "F");

        let mut pack = pools.inject.acquire().await.unwrap();
        pack_mut(&mut pack).unwrap().record.msg_type = "X".to_string();
        assert!(inject.inject(pack).await.is_err());
        assert_eq!(inject.refused(), 1);
        assert_eq!(pools.inject.idle_len(), 2, "refused pack was recycled");

        drop(inject);
        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn inject_increments_loop_count() {
        let cfg = globals(2);
        let pools = Pools::new(&cfg);
        let (handle, task) = spawn_router(&cfg, pools.clone());
        let mut rx = subscribe(&handle, "o", SubscriberKind::Output, "TRUE").await;

        let own = Arc::new(Matcher::new("Type == \"X\"").unwrap());
        let inject = InjectHandle::new(handle.clone(), pools.clone(), own, "F");

        let mut pack = pools.inject.acquire().await.unwrap();
        pack_mut(&mut pack).unwrap().record.msg_type = "Y".to_string();
        inject.inject(pack).await.unwrap();

        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.loop_count, 1);
        pools.recycle(delivered);

        drop(inject);
        drop(handle);
        task.await.unwrap();
    }
}
