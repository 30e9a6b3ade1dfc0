//! Plugin interfaces - the API boundary the core exposes.
//!
//! Concrete transports, decoders, and outputs live outside the runtime and
//! plug in through these small traits. Supervised plugins (Inputs, Filters,
//! Outputs) additionally implement [`Plugin`] so the supervisor can
//! re-initialize them across restarts. Plugin state is interior-mutable:
//! `run` borrows the plugin shared so the supervisor can signal `stop`
//! while a run is in flight.

pub mod helper;
pub mod registry;

pub use helper::PluginHelper;
pub use registry::PluginRegistry;

use crate::pack::PackRef;
use crate::runner::{DecodeFailure, DecoderContext, FilterRunner, InputRunner, OutputRunner};
use crate::types::Result;
use async_trait::async_trait;

/// Behavior shared by supervised plugins.
pub trait Plugin: Send + Sync + 'static {
    /// (Re-)initialize from decoded configuration. Called before the first
    /// run and again before every restart.
    fn init(&self, config: &serde_json::Value) -> Result<()>;

    /// Release per-run resources before a restart.
    fn cleanup_for_restart(&self) {}

    /// Whether an exit should re-init and restart the plugin rather than
    /// terminate it.
    fn restarting(&self) -> bool {
        false
    }

    /// Whether this plugin's death must not take down the process. A
    /// stoppable plugin that exits is unregistered and a `heka.terminated`
    /// record is routed in its stead.
    fn stoppable(&self) -> bool {
        false
    }
}

/// A source of packs.
#[async_trait]
pub trait Input: Plugin {
    /// Produce packs until `stop` is signalled or a fatal error occurs.
    async fn run(&self, ir: &mut InputRunner, helper: &PluginHelper) -> Result<()>;

    /// Unblock outstanding I/O (close listeners) so `run` can observe the
    /// stop signal and return.
    fn stop(&self);
}

/// Transforms raw pack bytes into structured records. Extra packs beyond
/// the input must be drawn from the input pool via the context.
#[async_trait]
pub trait Decoder: Send + Sync + 'static {
    async fn decode(
        &self,
        pack: PackRef,
        ctx: &DecoderContext,
    ) -> std::result::Result<Vec<PackRef>, DecodeFailure>;
}

/// Consumes matched records and may inject derived records back into the
/// router through the runner's injection handle.
#[async_trait]
pub trait Filter: Plugin {
    /// Read `fr.in_chan()` until closure; closure means shutdown.
    async fn run(&self, fr: &mut FilterRunner, helper: &PluginHelper) -> Result<()>;
}

/// Consumes matched records and emits them externally. No re-injection.
#[async_trait]
pub trait Output: Plugin {
    /// Read `or.in_chan()` until closure; closure means shutdown.
    async fn run(&self, or: &mut OutputRunner, helper: &PluginHelper) -> Result<()>;
}

/// Serializes a record for an output. Pure; the runner adds the optional
/// wire framing.
pub trait Encoder: Send + Sync + 'static {
    fn encode(&self, pack: &PackRef) -> Result<Vec<u8>>;
}
