//! Self-reporting.
//!
//! The dump-reports trigger (SIGUSR1, or a direct call in tests) emits one
//! record per registered runner carrying channel depths, leak counts, and
//! matcher timings, plus a `heka.memstat` record with current process
//! memory statistics. Reports are ordinary records routed like any other.

use crate::pack::{pack_mut, LeakCounters, PackRef, Pools};
use crate::router::{MatcherStats, RouterHandle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// Record type for per-runner reports.
pub const PLUGIN_REPORT_RECORD_TYPE: &str = "heka.plugin-report";

/// Record type for the heap statistics report.
pub const MEMSTAT_RECORD_TYPE: &str = "heka.memstat";

/// What kind of runner an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerKind {
    Input,
    Decoder,
    Filter,
    Output,
}

impl RunnerKind {
    fn as_str(self) -> &'static str {
        match self {
            RunnerKind::Input => "input",
            RunnerKind::Decoder => "decoder",
            RunnerKind::Filter => "filter",
            RunnerKind::Output => "output",
        }
    }
}

/// One runner's reporting hooks. The channel sender is held weakly so a
/// registered entry never keeps a drained channel alive.
#[derive(Debug, Clone)]
pub struct RunnerReport {
    pub name: String,
    pub kind: RunnerKind,
    pub in_chan: Option<mpsc::WeakSender<PackRef>>,
    pub matcher_stats: Option<Arc<MatcherStats>>,
    pub processed: Option<Arc<AtomicU64>>,
}

/// Registry of reportable runners.
#[derive(Debug, Default)]
pub struct ReportRegistry {
    entries: RwLock<Vec<RunnerReport>>,
}

impl ReportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, entry: RunnerReport) {
        if let Ok(mut entries) = self.entries.write() {
            entries.retain(|e| e.name != entry.name);
            entries.push(entry);
        }
    }

    pub fn unregister(&self, name: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.retain(|e| e.name != name);
        }
    }

    pub fn snapshot(&self) -> Vec<RunnerReport> {
        self.entries.read().map(|e| e.clone()).unwrap_or_default()
    }
}

/// Emit one report record per registered runner, a router report, and the
/// memstat record. Draws packs from the injection pool; when it is empty
/// the remaining reports are skipped rather than blocking the trigger.
pub async fn emit_reports(
    registry: &ReportRegistry,
    pools: &Pools,
    router: &RouterHandle,
    leaks: &LeakCounters,
) {
    for entry in registry.snapshot() {
        let mut fields: Vec<(&str, i64)> = Vec::new();
        if let Some(tx) = entry.in_chan.as_ref().and_then(|w| w.upgrade()) {
            fields.push(("InChanCapacity", tx.max_capacity() as i64));
            fields.push(("InChanLength", (tx.max_capacity() - tx.capacity()) as i64));
            if entry.matcher_stats.is_some() {
                fields.push(("MatchChanCapacity", tx.max_capacity() as i64));
                fields.push(("MatchChanLength", (tx.max_capacity() - tx.capacity()) as i64));
            }
        }
        if let Some(stats) = &entry.matcher_stats {
            fields.push(("MatchAvgDuration", stats.avg_duration_ns() as i64));
        }
        if let Some(processed) = &entry.processed {
            fields.push(("Processed", processed.load(Ordering::Acquire) as i64));
        }
        fields.push(("LeakCount", leaks.count_for(&entry.name) as i64));

        if !send_report(
            pools,
            router,
            PLUGIN_REPORT_RECORD_TYPE,
            &entry.name,
            Some(entry.kind),
            &fields,
        )
        .await
        {
            return;
        }
    }

    let router_fields = [
        ("InChanCapacity", router.in_chan_capacity() as i64),
        ("InChanLength", router.in_chan_len() as i64),
        ("Processed", router.stats().processed() as i64),
        ("DroppedLoops", router.stats().dropped_loops() as i64),
        ("Unmatched", router.stats().unmatched() as i64),
    ];
    if !send_report(
        pools,
        router,
        PLUGIN_REPORT_RECORD_TYPE,
        "router",
        None,
        &router_fields,
    )
    .await
    {
        return;
    }

    let memstats = memory_stats();
    send_report(pools, router, MEMSTAT_RECORD_TYPE, "memstat", None, &memstats).await;
}

async fn send_report(
    pools: &Pools,
    router: &RouterHandle,
    record_type: &str,
    logger: &str,
    kind: Option<RunnerKind>,
    fields: &[(&str, i64)],
) -> bool {
    let Some(mut pack) = pools.inject.try_acquire().await else {
        tracing::warn!("injection pool empty; report truncated");
        return false;
    };
    if let Some(inner) = pack_mut(&mut pack) {
        inner.record = crate::message::Record::new();
        inner.record.msg_type = record_type.to_string();
        inner.record.logger = logger.to_string();
        if let Some(kind) = kind {
            inner.record.add_str_field("RunnerKind", kind.as_str());
        }
        for (name, value) in fields {
            inner.record.add_int_field(*name, *value);
        }
        inner.decoded = true;
    }
    if let Err(pack) = router.send(pack).await {
        pools.recycle(pack);
        return false;
    }
    true
}

/// Best-effort process memory statistics, in kilobytes.
#[cfg(target_os = "linux")]
fn memory_stats() -> Vec<(&'static str, i64)> {
    let mut stats = Vec::new();
    let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
        return stats;
    };
    for line in status.lines() {
        let field = match line.split(':').next() {
            Some("VmRSS") => "VmRSS_kB",
            Some("VmSize") => "VmSize_kB",
            Some("VmHWM") => "VmHWM_kB",
            _ => continue,
        };
        if let Some(value) = line
            .split_whitespace()
            .nth(1)
            .and_then(|v| v.parse::<i64>().ok())
        {
            stats.push((field, value));
        }
    }
    stats
}

#[cfg(not(target_os = "linux"))]
fn memory_stats() -> Vec<(&'static str, i64)> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::Matcher;
    use crate::router::{spawn_router, SubscriberKind, Subscription};
    use crate::types::GlobalConfig;

    #[tokio::test]
    async fn reports_are_routed_per_runner() {
        let cfg = GlobalConfig {
            pool_size: 16,
            ..GlobalConfig::default()
        };
        let pools = Pools::new(&cfg);
        let (router, _task) = spawn_router(&cfg, pools.clone());

        // A sink that captures every report.
        let (tx, mut rx) = mpsc::channel(16);
        router
            .add_subscriber(Subscription {
                name: "sink".to_string(),
                kind: SubscriberKind::Output,
                matcher: Arc::new(Matcher::new("Type =~ /^heka\\./").unwrap()),
                tx,
                stats: Arc::new(MatcherStats::default()),
            })
            .await
            .unwrap();

        let registry = ReportRegistry::new();
        let (chan_tx, _chan_rx) = mpsc::channel::<PackRef>(30);
        registry.register(RunnerReport {
            name: "CounterFilter".to_string(),
            kind: RunnerKind::Filter,
            in_chan: Some(chan_tx.downgrade()),
            matcher_stats: Some(Arc::new(MatcherStats::default())),
            processed: Some(Arc::new(AtomicU64::new(7))),
        });

        let leaks = LeakCounters::default();
        leaks.record("CounterFilter");
        emit_reports(&registry, &pools, &router, &leaks).await;

        let report = rx.recv().await.unwrap();
        assert_eq!(report.record.msg_type, PLUGIN_REPORT_RECORD_TYPE);
        assert_eq!(report.record.logger, "CounterFilter");
        assert_eq!(
            report.record.field("InChanCapacity").unwrap().value,
            crate::message::FieldValue::Int(vec![30])
        );
        assert_eq!(
            report.record.field("LeakCount").unwrap().value,
            crate::message::FieldValue::Int(vec![1])
        );
        assert_eq!(
            report.record.field("Processed").unwrap().value,
            crate::message::FieldValue::Int(vec![7])
        );
        pools.recycle(report);

        let router_report = rx.recv().await.unwrap();
        assert_eq!(router_report.record.logger, "router");
        pools.recycle(router_report);

        let memstat = rx.recv().await.unwrap();
        assert_eq!(memstat.record.msg_type, MEMSTAT_RECORD_TYPE);
        pools.recycle(memstat);
    }

    #[test]
    fn unregister_removes_entry() {
        let registry = ReportRegistry::new();
        registry.register(RunnerReport {
            name: "A".to_string(),
            kind: RunnerKind::Input,
            in_chan: None,
            matcher_stats: None,
            processed: None,
        });
        assert_eq!(registry.snapshot().len(), 1);
        registry.unregister("A");
        assert!(registry.snapshot().is_empty());
    }
}
