//! Plugin helper - the capability object handed to every plugin at run
//! time.
//!
//! Exposes (and only exposes) what plugins need: decoder runners and output
//! channels by name, the input pool, the router, the read-only globals, and
//! the process-wide shutdown signal.

use crate::pack::{PackRef, Pools};
use crate::router::RouterHandle;
use crate::runner::DecoderHandle;
use crate::types::{Error, GlobalConfig, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capabilities shared with plugins.
#[derive(Debug, Clone)]
pub struct PluginHelper {
    config: Arc<GlobalConfig>,
    pools: Pools,
    router: RouterHandle,
    shutdown: CancellationToken,
    decoders: Arc<RwLock<HashMap<String, DecoderHandle>>>,
    output_chans: Arc<RwLock<HashMap<String, mpsc::Sender<PackRef>>>>,
}

impl PluginHelper {
    pub fn new(
        config: Arc<GlobalConfig>,
        pools: Pools,
        router: RouterHandle,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            pools,
            router,
            shutdown,
            decoders: Arc::new(RwLock::new(HashMap::new())),
            output_chans: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Read-only process globals.
    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    pub fn pools(&self) -> &Pools {
        &self.pools
    }

    pub fn router(&self) -> &RouterHandle {
        &self.router
    }

    /// Acquire a fresh pack from the input pool. Awaiting here is the
    /// back-pressure signal.
    pub async fn new_pack(&self) -> Result<PackRef> {
        self.pools.input.acquire().await.ok_or(Error::ShuttingDown)
    }

    /// Obtain a decoder runner by name.
    pub fn decoder(&self, name: &str) -> Option<DecoderHandle> {
        self.decoders.read().ok()?.get(name).cloned()
    }

    /// Obtain an output's inbound channel by name.
    pub fn output_chan(&self, name: &str) -> Option<mpsc::Sender<PackRef>> {
        self.output_chans.read().ok()?.get(name).cloned()
    }

    /// Whether the process-wide shutdown signal is set.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Await the shutdown signal.
    pub async fn shutdown_signal(&self) {
        self.shutdown.cancelled().await;
    }

    /// Trip the process-wide shutdown signal (fatal plugin exits).
    pub fn trigger_shutdown(&self) {
        self.shutdown.cancel();
    }

    pub(crate) fn register_decoder(&self, name: &str, handle: DecoderHandle) {
        if let Ok(mut map) = self.decoders.write() {
            map.insert(name.to_string(), handle);
        }
    }

    /// Drop every decoder handle. Part of shutdown: closing the decoder
    /// inbound channels lets the decoder runners drain and exit.
    pub(crate) fn clear_decoders(&self) {
        if let Ok(mut map) = self.decoders.write() {
            map.clear();
        }
    }

    pub(crate) fn register_output_chan(&self, name: &str, tx: mpsc::Sender<PackRef>) {
        if let Ok(mut map) = self.output_chans.write() {
            map.insert(name.to_string(), tx);
        }
    }

    pub(crate) fn unregister_output_chan(&self, name: &str) {
        if let Ok(mut map) = self.output_chans.write() {
            map.remove(name);
        }
    }
}
