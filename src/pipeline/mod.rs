//! Pipeline - plugin wiring, startup, signals, and ordered shutdown.
//!
//! The [`Pipeline`] collects plugin specs, validates configuration, and
//! [`start`](Pipeline::start)s the worker fleet: pools, router, leak
//! auditor, decoder runners, and one supervised task per Input, Filter, and
//! Output. The returned [`RunningPipeline`] drives the strict shutdown
//! ordering that drains every stage without losing in-flight packs:
//!
//! 1. set the shutdown signal, stop input listeners;
//! 2. wait for input workers;
//! 3. close decoder inbound channels and wait for decoders (drains decoded
//!    packs into the router);
//! 4. remove each Filter's subscription (closing its inbound channel) and
//!    wait for filters;
//! 5. the same for Outputs;
//! 6. stop the router and auditor, exit.

use crate::matcher::Matcher;
use crate::pack::{spawn_leak_auditor, LeakCounters, Pools};
use crate::plugins::{Decoder, Encoder, Filter, Input, Output, PluginHelper};
use crate::report::{emit_reports, ReportRegistry, RunnerKind, RunnerReport};
use crate::router::{
    spawn_router, InjectHandle, MatcherStats, RouterHandle, SubscriberKind, Subscription,
};
use crate::runner::supervisor::{
    supervise, SupervisedFilter, SupervisedInput, SupervisedOutput,
};
use crate::runner::{
    spawn_decoder_runner, DecoderHandle, DecoderRunnerConfig, DeliverTo, FilterRunner,
    InputRunner, OutputRunner, SupervisionMeta,
};
use crate::splitter::{Splitter, SplitterConfig, SplitterRunner};
use crate::spool::{Spool, SpoolConfig};
use crate::types::{Config, Error, GlobalConfig, Result, RetryConfig};
use crate::wire::SignerTable;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Input wiring options.
#[derive(Debug)]
pub struct InputConfig {
    pub type_name: String,
    pub plugin_config: serde_json::Value,
    /// Feed populated packs to this decoder runner instead of the router.
    pub decoder: Option<String>,
    /// Invoke the decoder inline (no intermediate channel).
    pub sync_decode: bool,
    /// Splitter for stream inputs.
    pub splitter: Option<Box<dyn Splitter>>,
    pub splitter_config: SplitterConfig,
    /// Transient inputs are neither reported on nor restarted.
    pub transient: bool,
    pub retry: Option<RetryConfig>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            type_name: "Input".to_string(),
            plugin_config: serde_json::Value::Null,
            decoder: None,
            sync_decode: false,
            splitter: None,
            splitter_config: SplitterConfig::default(),
            transient: false,
            retry: None,
        }
    }
}

/// Filter wiring options.
#[derive(Debug)]
pub struct FilterConfig {
    pub type_name: String,
    pub plugin_config: serde_json::Value,
    /// Matcher expression selecting this filter's records.
    pub matcher: String,
    /// Match only once every N passes.
    pub sample_denominator: Option<u64>,
    pub retry: Option<RetryConfig>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            type_name: "Filter".to_string(),
            plugin_config: serde_json::Value::Null,
            matcher: "TRUE".to_string(),
            sample_denominator: None,
            retry: None,
        }
    }
}

/// Output wiring options.
pub struct OutputConfig {
    pub type_name: String,
    pub plugin_config: serde_json::Value,
    pub matcher: String,
    pub sample_denominator: Option<u64>,
    pub encoder: Option<Arc<dyn Encoder>>,
    /// Wrap encoded records in the wire framing.
    pub use_framing: bool,
    /// Request a disk spool under the base directory.
    pub spool: Option<SpoolConfig>,
    pub retry: Option<RetryConfig>,
}

impl std::fmt::Debug for OutputConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputConfig")
            .field("type_name", &self.type_name)
            .field("matcher", &self.matcher)
            .field("use_framing", &self.use_framing)
            .field("spool", &self.spool)
            .finish_non_exhaustive()
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            type_name: "Output".to_string(),
            plugin_config: serde_json::Value::Null,
            matcher: "TRUE".to_string(),
            sample_denominator: None,
            encoder: None,
            use_framing: false,
            spool: None,
            retry: None,
        }
    }
}

struct InputSpec {
    name: String,
    plugin: Arc<dyn Input>,
    config: InputConfig,
}

struct DecoderSpec {
    name: String,
    decoder: Arc<dyn Decoder>,
    config: DecoderRunnerConfig,
}

struct FilterSpec {
    name: String,
    plugin: Arc<dyn Filter>,
    matcher: Arc<Matcher>,
    config: FilterConfig,
}

struct OutputSpec {
    name: String,
    plugin: Arc<dyn Output>,
    matcher: Arc<Matcher>,
    config: OutputConfig,
}

/// Collects plugin wiring before startup.
pub struct Pipeline {
    config: Config,
    global: Arc<GlobalConfig>,
    signers: Arc<SignerTable>,
    inputs: Vec<InputSpec>,
    decoders: Vec<DecoderSpec>,
    filters: Vec<FilterSpec>,
    outputs: Vec<OutputSpec>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("inputs", &self.inputs.len())
            .field("decoders", &self.decoders.len())
            .field("filters", &self.filters.len())
            .field("outputs", &self.outputs.len())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        let global = Arc::new(config.global.clone());
        let signers = Arc::new(SignerTable::from_config(&config.signers));
        Self {
            config,
            global,
            signers,
            inputs: Vec::new(),
            decoders: Vec::new(),
            filters: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// The signer table built from configuration, for framed splitters.
    pub fn signer_table(&self) -> Arc<SignerTable> {
        self.signers.clone()
    }

    pub fn add_input(
        &mut self,
        name: &str,
        plugin: Arc<dyn Input>,
        config: InputConfig,
    ) -> Result<()> {
        self.check_name(name)?;
        self.inputs.push(InputSpec {
            name: name.to_string(),
            plugin,
            config,
        });
        Ok(())
    }

    pub fn add_decoder(
        &mut self,
        name: &str,
        decoder: Arc<dyn Decoder>,
        config: DecoderRunnerConfig,
    ) -> Result<()> {
        self.check_name(name)?;
        self.decoders.push(DecoderSpec {
            name: name.to_string(),
            decoder,
            config,
        });
        Ok(())
    }

    pub fn add_filter(
        &mut self,
        name: &str,
        plugin: Arc<dyn Filter>,
        config: FilterConfig,
    ) -> Result<()> {
        self.check_name(name)?;
        let matcher = compile_matcher(&config.matcher, config.sample_denominator)?;
        self.filters.push(FilterSpec {
            name: name.to_string(),
            plugin,
            matcher,
            config,
        });
        Ok(())
    }

    pub fn add_output(
        &mut self,
        name: &str,
        plugin: Arc<dyn Output>,
        config: OutputConfig,
    ) -> Result<()> {
        self.check_name(name)?;
        let matcher = compile_matcher(&config.matcher, config.sample_denominator)?;
        self.outputs.push(OutputSpec {
            name: name.to_string(),
            plugin,
            matcher,
            config,
        });
        Ok(())
    }

    fn check_name(&self, name: &str) -> Result<()> {
        let taken = self.inputs.iter().any(|s| s.name == name)
            || self.decoders.iter().any(|s| s.name == name)
            || self.filters.iter().any(|s| s.name == name)
            || self.outputs.iter().any(|s| s.name == name);
        if taken {
            return Err(Error::config(format!("plugin name '{name}' already used")));
        }
        Ok(())
    }

    /// Validate configuration, initialize plugins, and spawn the fleet.
    /// Configuration problems surface here and are fatal.
    pub async fn start(self) -> Result<RunningPipeline> {
        let shutdown = CancellationToken::new();
        let pools = Pools::new(&self.global);
        let leaks = Arc::new(LeakCounters::default());
        let (router, router_task) = spawn_router(&self.global, pools.clone());
        let helper = PluginHelper::new(
            self.global.clone(),
            pools.clone(),
            router.clone(),
            shutdown.clone(),
        );
        let registry = Arc::new(ReportRegistry::new());
        let auditor = spawn_leak_auditor(
            pools.clone(),
            self.global.clone(),
            leaks.clone(),
            shutdown.clone(),
        );
        let (reload_tx, _) = broadcast::channel(4);

        // Decoder runners first so inputs can resolve them.
        let mut decoder_handles = Vec::new();
        let mut decoder_tasks = Vec::new();
        for spec in &self.decoders {
            let (handle, task) = spawn_decoder_runner(
                &spec.name,
                spec.decoder.clone(),
                spec.config.clone(),
                self.global.plugin_chan_size,
                pools.input.clone(),
                pools.clone(),
                router.clone(),
            );
            helper.register_decoder(&spec.name, handle.clone());
            registry.register(RunnerReport {
                name: spec.name.clone(),
                kind: RunnerKind::Decoder,
                in_chan: Some(handle.downgrade()),
                matcher_stats: None,
                processed: None,
            });
            decoder_handles.push(handle);
            decoder_tasks.push(task);
        }

        let filter_tracker = TaskTracker::new();
        let mut filter_names = Vec::new();
        for spec in self.filters {
            spec.plugin
                .init(&spec.config.plugin_config)
                .map_err(|e| Error::config(format!("filter {} init failed: {e}", spec.name)))?;

            let (tx, rx) = mpsc::channel(self.global.plugin_chan_size);
            let stats = Arc::new(MatcherStats::default());
            router
                .add_subscriber(Subscription {
                    name: spec.name.clone(),
                    kind: SubscriberKind::Filter,
                    matcher: spec.matcher.clone(),
                    tx: tx.clone(),
                    stats: stats.clone(),
                })
                .await?;

            let inject = InjectHandle::new(
                router.clone(),
                pools.clone(),
                spec.matcher.clone(),
                spec.name.clone(),
            );
            let runner = FilterRunner::new(spec.name.clone(), rx, inject, pools.clone());
            registry.register(RunnerReport {
                name: spec.name.clone(),
                kind: RunnerKind::Filter,
                in_chan: Some(tx.downgrade()),
                matcher_stats: Some(stats),
                processed: Some(runner.processed_counter()),
            });

            let meta = SupervisionMeta {
                name: spec.name.clone(),
                type_name: spec.config.type_name.clone(),
                retry: spec.config.retry.clone().unwrap_or_else(|| self.config.retry.clone()),
                config: spec.config.plugin_config.clone(),
            };
            let supervised = Box::new(SupervisedFilter {
                plugin: spec.plugin,
                runner: tokio::sync::Mutex::new(runner),
            });
            filter_names.push(spec.name);
            filter_tracker.spawn(supervise(meta, supervised, helper.clone()));
        }

        let output_tracker = TaskTracker::new();
        let mut output_names = Vec::new();
        for spec in self.outputs {
            spec.plugin
                .init(&spec.config.plugin_config)
                .map_err(|e| Error::config(format!("output {} init failed: {e}", spec.name)))?;

            let spool = match &spec.config.spool {
                Some(cfg) => {
                    let mut cfg = cfg.clone();
                    if cfg.directory.is_relative() {
                        cfg.directory = self.global.base_dir.join(&cfg.directory);
                    }
                    Some(Spool::open(cfg).await?)
                }
                None => None,
            };

            let (tx, rx) = mpsc::channel(self.global.plugin_chan_size);
            let stats = Arc::new(MatcherStats::default());
            router
                .add_subscriber(Subscription {
                    name: spec.name.clone(),
                    kind: SubscriberKind::Output,
                    matcher: spec.matcher.clone(),
                    tx: tx.clone(),
                    stats: stats.clone(),
                })
                .await?;
            helper.register_output_chan(&spec.name, tx.clone());

            let runner = OutputRunner::new(
                spec.name.clone(),
                rx,
                pools.clone(),
                spec.config.encoder.clone(),
                spec.config.use_framing,
                spool,
            );
            registry.register(RunnerReport {
                name: spec.name.clone(),
                kind: RunnerKind::Output,
                in_chan: Some(tx.downgrade()),
                matcher_stats: Some(stats),
                processed: Some(runner.processed_counter()),
            });

            let meta = SupervisionMeta {
                name: spec.name.clone(),
                type_name: spec.config.type_name.clone(),
                retry: spec.config.retry.clone().unwrap_or_else(|| self.config.retry.clone()),
                config: spec.config.plugin_config.clone(),
            };
            let supervised = Box::new(SupervisedOutput {
                plugin: spec.plugin,
                runner: tokio::sync::Mutex::new(runner),
            });
            output_names.push(spec.name);
            output_tracker.spawn(supervise(meta, supervised, helper.clone()));
        }

        // Inputs last: every downstream stage is ready to receive.
        let input_tracker = TaskTracker::new();
        let mut input_plugins = Vec::new();
        for spec in self.inputs {
            spec.plugin
                .init(&spec.config.plugin_config)
                .map_err(|e| Error::config(format!("input {} init failed: {e}", spec.name)))?;

            let deliver_to = match &spec.config.decoder {
                None => DeliverTo::Router,
                Some(decoder_name) => {
                    let handle = helper.decoder(decoder_name).ok_or_else(|| {
                        Error::config(format!(
                            "input {} references unknown decoder '{decoder_name}'",
                            spec.name
                        ))
                    })?;
                    if spec.config.sync_decode {
                        DeliverTo::SyncDecoder(handle.sync().clone())
                    } else {
                        DeliverTo::Decoder(handle)
                    }
                }
            };
            let splitter = spec
                .config
                .splitter
                .map(|s| SplitterRunner::new(s, spec.config.splitter_config.clone()));
            let runner = InputRunner::new(
                spec.name.clone(),
                deliver_to,
                splitter,
                pools.clone(),
                router.clone(),
                self.global.read_deadline,
                spec.config.transient,
            );

            if spec.config.transient {
                // Transient inputs: no supervision, no reporting.
                let plugin = spec.plugin.clone();
                let helper_clone = helper.clone();
                let name = spec.name.clone();
                input_tracker.spawn(async move {
                    let mut runner = runner;
                    if let Err(e) = plugin.run(&mut runner, &helper_clone).await {
                        tracing::warn!(input = %name, error = %e, "transient input exited");
                    }
                });
            } else {
                registry.register(RunnerReport {
                    name: spec.name.clone(),
                    kind: RunnerKind::Input,
                    in_chan: None,
                    matcher_stats: None,
                    processed: Some(runner.delivered_counter()),
                });
                let meta = SupervisionMeta {
                    name: spec.name.clone(),
                    type_name: spec.config.type_name.clone(),
                    retry: spec
                        .config
                        .retry
                        .clone()
                        .unwrap_or_else(|| self.config.retry.clone()),
                    config: spec.config.plugin_config.clone(),
                };
                let supervised = Box::new(SupervisedInput {
                    plugin: spec.plugin.clone(),
                    runner: tokio::sync::Mutex::new(runner),
                });
                input_tracker.spawn(supervise(meta, supervised, helper.clone()));
            }
            input_plugins.push((spec.name, spec.plugin));
        }

        tracing::info!(
            inputs = input_plugins.len(),
            decoders = decoder_handles.len(),
            filters = filter_names.len(),
            outputs = output_names.len(),
            "pipeline started"
        );

        Ok(RunningPipeline {
            shutdown,
            pools,
            router,
            helper,
            registry,
            leaks,
            reload_tx,
            input_plugins,
            input_tracker,
            decoder_handles,
            decoder_tasks,
            filter_names,
            filter_tracker,
            output_names,
            output_tracker,
            router_task,
            auditor,
        })
    }
}

fn compile_matcher(expression: &str, sample: Option<u64>) -> Result<Arc<Matcher>> {
    let mut matcher = Matcher::new(expression)?;
    if let Some(n) = sample {
        matcher = matcher.with_sampling(n);
    }
    Ok(Arc::new(matcher))
}

/// A started pipeline. Dropping it does not stop the workers; call
/// [`shutdown`](RunningPipeline::shutdown) (or deliver a signal via
/// [`run_with_signals`](RunningPipeline::run_with_signals)) and then
/// [`wait`](RunningPipeline::wait).
pub struct RunningPipeline {
    shutdown: CancellationToken,
    pools: Pools,
    router: RouterHandle,
    helper: PluginHelper,
    registry: Arc<ReportRegistry>,
    leaks: Arc<LeakCounters>,
    reload_tx: broadcast::Sender<()>,

    input_plugins: Vec<(String, Arc<dyn Input>)>,
    input_tracker: TaskTracker,
    decoder_handles: Vec<DecoderHandle>,
    decoder_tasks: Vec<tokio::task::JoinHandle<()>>,
    filter_names: Vec<String>,
    filter_tracker: TaskTracker,
    output_names: Vec<String>,
    output_tracker: TaskTracker,
    router_task: tokio::task::JoinHandle<()>,
    auditor: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for RunningPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningPipeline")
            .field("shutting_down", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl RunningPipeline {
    /// The process-wide shutdown signal.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The capability object, for tests and embedders.
    pub fn helper(&self) -> &PluginHelper {
        &self.helper
    }

    pub fn pools(&self) -> &Pools {
        &self.pools
    }

    /// Subscribe to configuration-reload notifications (SIGHUP).
    pub fn reload_notifications(&self) -> broadcast::Receiver<()> {
        self.reload_tx.subscribe()
    }

    /// Emit the self-report records.
    pub async fn dump_reports(&self) {
        emit_reports(&self.registry, &self.pools, &self.router, &self.leaks).await;
    }

    /// Handle process signals until shutdown, then drain.
    pub async fn run_with_signals(self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        let registry = self.registry.clone();
        let pools = self.pools.clone();
        let router = self.router.clone();
        let leaks = self.leaks.clone();
        let reload_tx = self.reload_tx.clone();

        tokio::spawn(async move {
            signal_loop(shutdown, registry, pools, router, leaks, reload_tx).await;
        });

        self.wait().await
    }

    /// Wait for the shutdown signal, then drain every stage in order.
    pub async fn wait(self) -> Result<()> {
        let RunningPipeline {
            shutdown,
            pools,
            router,
            helper,
            registry: _registry,
            leaks: _leaks,
            reload_tx: _reload_tx,
            input_plugins,
            input_tracker,
            mut decoder_handles,
            decoder_tasks,
            filter_names,
            filter_tracker,
            output_names,
            output_tracker,
            router_task,
            auditor,
        } = self;

        shutdown.cancelled().await;
        tracing::info!("shutting down");

        // 1. Stop input listeners so blocked reads return.
        for (name, plugin) in &input_plugins {
            tracing::debug!(input = %name, "stopping input");
            plugin.stop();
        }

        // 2. Inputs drain.
        input_tracker.close();
        input_tracker.wait().await;

        // 3. Close decoder inbound channels and drain decoders into the
        // router.
        helper.clear_decoders();
        decoder_handles.clear();
        for task in decoder_tasks {
            let _ = task.await;
        }

        // 4. Remove filter subscriptions; each removal closes the filter's
        // inbound channel, which drains, which ends its run.
        for name in &filter_names {
            let _ = router.remove_subscriber(name).await;
        }
        filter_tracker.close();
        filter_tracker.wait().await;

        // 5. The same for outputs.
        for name in &output_names {
            helper.unregister_output_chan(name);
            let _ = router.remove_subscriber(name).await;
        }
        output_tracker.close();
        output_tracker.wait().await;

        // 6. Drop the remaining router senders; the router drains and
        // stops, then the auditor.
        drop(helper);
        drop(router);
        let _ = router_task.await;
        let _ = auditor.await;

        tracing::info!(
            input_acquired = pools.input.acquired_total(),
            input_returned = pools.input.returned_total(),
            inject_acquired = pools.inject.acquired_total(),
            inject_returned = pools.inject.returned_total(),
            "pipeline stopped"
        );
        Ok(())
    }
}

#[cfg(unix)]
async fn signal_loop(
    shutdown: CancellationToken,
    registry: Arc<ReportRegistry>,
    pools: Pools,
    router: RouterHandle,
    leaks: Arc<LeakCounters>,
    reload_tx: broadcast::Sender<()>,
) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "signal handler install failed");
            return;
        }
    };
    let Ok(mut terminate) = signal(SignalKind::terminate()) else {
        return;
    };
    let Ok(mut hangup) = signal(SignalKind::hangup()) else {
        return;
    };
    let Ok(mut user1) = signal(SignalKind::user_defined1()) else {
        return;
    };

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interrupt.recv() => {
                tracing::info!("interrupt received");
                shutdown.cancel();
                return;
            }
            _ = terminate.recv() => {
                tracing::info!("terminate received");
                shutdown.cancel();
                return;
            }
            _ = hangup.recv() => {
                tracing::info!("hangup received; publishing reload notification");
                let _ = reload_tx.send(());
            }
            _ = user1.recv() => {
                tracing::info!("dump-reports signal received");
                emit_reports(&registry, &pools, &router, &leaks).await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn signal_loop(
    shutdown: CancellationToken,
    _registry: Arc<ReportRegistry>,
    _pools: Pools,
    _router: RouterHandle,
    _leaks: Arc<LeakCounters>,
    _reload_tx: broadcast::Sender<()>,
) {
    tokio::select! {
        _ = shutdown.cancelled() => {}
        result = tokio::signal::ctrl_c() => {
            if result.is_ok() {
                tracing::info!("interrupt received");
            }
            shutdown.cancel();
        }
    }
}
