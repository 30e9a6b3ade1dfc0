//! Plugin supervision.
//!
//! Every Input, Filter, and Output runs under a supervisor implementing the
//! exponential-backoff retry loop:
//!
//! - run returns (or panics) while the plugin is not restarting → the exit
//!   is terminal: fatal for the process unless the plugin is stoppable, in
//!   which case the plugin is unregistered and a synthetic
//!   `heka.terminated` record is routed in its stead.
//! - run returns while restarting → `cleanup_for_restart`, wait per the
//!   retry policy, re-`init`, run again. Exhausting the retry budget is
//!   terminal as above.
//! - the process-wide shutdown signal stops the loop.
//!
//! Panics inside plugin code are caught and converted into plugin errors,
//! so a misbehaving plugin can never unwind the runtime.

use super::retry::RetryState;
use crate::pack::pack_mut;
use crate::plugins::{Filter, Input, Output, Plugin, PluginHelper};
use crate::types::{Error, Result, RetryConfig};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Record type routed when a stoppable plugin dies.
pub const TERMINATED_RECORD_TYPE: &str = "heka.terminated";

/// Identity and policy for one supervised plugin.
#[derive(Debug, Clone)]
pub struct SupervisionMeta {
    pub name: String,
    pub type_name: String,
    pub retry: RetryConfig,
    /// Config value handed back to `init` on every restart.
    pub config: serde_json::Value,
}

/// Adapter binding a plugin to its runner context so the supervisor can
/// drive either without knowing the concrete kind.
#[async_trait::async_trait]
pub(crate) trait SupervisedPlugin: Send + Sync {
    fn plugin(&self) -> &dyn Plugin;
    async fn run_once(&self, helper: &PluginHelper) -> Result<()>;

    /// Recycle anything queued on the plugin's inbound channel. Called for
    /// dead stoppable plugins so the router never blocks on a channel
    /// nobody reads.
    async fn drain(&self) {}
}

pub(crate) struct SupervisedInput {
    pub plugin: Arc<dyn Input>,
    pub runner: tokio::sync::Mutex<super::InputRunner>,
}

#[async_trait::async_trait]
impl SupervisedPlugin for SupervisedInput {
    fn plugin(&self) -> &dyn Plugin {
        self.plugin.as_ref()
    }

    async fn run_once(&self, helper: &PluginHelper) -> Result<()> {
        let mut runner = self.runner.lock().await;
        self.plugin.run(&mut runner, helper).await
    }
}

pub(crate) struct SupervisedFilter {
    pub plugin: Arc<dyn Filter>,
    pub runner: tokio::sync::Mutex<super::FilterRunner>,
}

#[async_trait::async_trait]
impl SupervisedPlugin for SupervisedFilter {
    fn plugin(&self) -> &dyn Plugin {
        self.plugin.as_ref()
    }

    async fn run_once(&self, helper: &PluginHelper) -> Result<()> {
        let mut runner = self.runner.lock().await;
        self.plugin.run(&mut runner, helper).await
    }

    async fn drain(&self) {
        self.runner.lock().await.drain();
    }
}

pub(crate) struct SupervisedOutput {
    pub plugin: Arc<dyn Output>,
    pub runner: tokio::sync::Mutex<super::OutputRunner>,
}

#[async_trait::async_trait]
impl SupervisedPlugin for SupervisedOutput {
    fn plugin(&self) -> &dyn Plugin {
        self.plugin.as_ref()
    }

    async fn run_once(&self, helper: &PluginHelper) -> Result<()> {
        let mut runner = self.runner.lock().await;
        self.plugin.run(&mut runner, helper).await
    }

    async fn drain(&self) {
        self.runner.lock().await.drain();
    }
}

/// Drive one plugin until shutdown or a terminal exit.
pub(crate) async fn supervise(
    meta: SupervisionMeta,
    supervised: Box<dyn SupervisedPlugin>,
    helper: PluginHelper,
) {
    let mut retry = RetryState::new(meta.retry.clone());

    loop {
        let run_result = match AssertUnwindSafe(supervised.run_once(&helper))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => Err(Error::plugin(format!(
                "panic in {}: {}",
                meta.name,
                panic_message(&payload)
            ))),
        };

        if helper.is_shutting_down() {
            tracing::debug!(plugin = %meta.name, "plugin stopped for shutdown");
            return;
        }

        let cause = match &run_result {
            Ok(()) => {
                tracing::info!(plugin = %meta.name, "plugin exited");
                // A successful run restores the retry budget.
                retry.reset();
                "clean exit".to_string()
            }
            Err(e) => {
                tracing::error!(plugin = %meta.name, error = %e, "plugin run failed");
                e.to_string()
            }
        };

        if !supervised.plugin().restarting() {
            terminal_exit(&meta, supervised.as_ref(), &cause, &helper).await;
            return;
        }

        supervised.plugin().cleanup_for_restart();
        match wait_and_reinit(&meta, supervised.plugin(), &mut retry, &helper).await {
            ReinitOutcome::Running => continue,
            ReinitOutcome::ShuttingDown => return,
            ReinitOutcome::Exhausted(last_error) => {
                terminal_exit(&meta, supervised.as_ref(), &last_error, &helper).await;
                return;
            }
        }
    }
}

enum ReinitOutcome {
    Running,
    ShuttingDown,
    Exhausted(String),
}

async fn wait_and_reinit(
    meta: &SupervisionMeta,
    plugin: &dyn Plugin,
    retry: &mut RetryState,
    helper: &PluginHelper,
) -> ReinitOutcome {
    let mut last_error = "retries exhausted".to_string();
    loop {
        let Some(wait) = retry.next_wait() else {
            return ReinitOutcome::Exhausted(last_error);
        };
        tracing::info!(
            plugin = %meta.name,
            attempt = retry.retries(),
            wait_ms = wait.as_millis() as u64,
            "restarting plugin"
        );
        tokio::select! {
            _ = helper.shutdown_signal() => return ReinitOutcome::ShuttingDown,
            _ = tokio::time::sleep(wait) => {}
        }
        match plugin.init(&meta.config) {
            Ok(()) => return ReinitOutcome::Running,
            Err(e) => {
                tracing::error!(plugin = %meta.name, error = %e, "plugin re-init failed");
                last_error = e.to_string();
            }
        }
    }
}

/// A terminal exit: fatal for the process, or unregister-and-report for a
/// stoppable plugin.
async fn terminal_exit(
    meta: &SupervisionMeta,
    supervised: &dyn SupervisedPlugin,
    cause: &str,
    helper: &PluginHelper,
) {
    if !supervised.plugin().stoppable() {
        tracing::error!(
            plugin = %meta.name,
            cause,
            "non-stoppable plugin died; shutting the process down"
        );
        helper.trigger_shutdown();
        return;
    }

    // Keep the dead plugin's channel empty until its subscription is gone,
    // so the router is never left blocked on a channel nobody reads.
    supervised.drain().await;
    {
        let mut removal = std::pin::pin!(helper.router().remove_subscriber(&meta.name));
        loop {
            tokio::select! {
                _ = &mut removal => break,
                _ = tokio::time::sleep(std::time::Duration::from_millis(5)) => {
                    supervised.drain().await;
                }
            }
        }
    }
    supervised.drain().await;

    emit_terminated(meta, cause, helper).await;
}

/// Route the synthetic termination record for a dead stoppable plugin.
async fn emit_terminated(meta: &SupervisionMeta, cause: &str, helper: &PluginHelper) {
    let Some(mut pack) = helper.pools().inject.try_acquire().await else {
        tracing::warn!(plugin = %meta.name, "injection pool empty; termination record dropped");
        return;
    };
    if let Some(inner) = pack_mut(&mut pack) {
        inner.record = crate::message::Record::new();
        inner.record.msg_type = TERMINATED_RECORD_TYPE.to_string();
        inner.record.logger = meta.name.clone();
        inner.record.payload = format!(
            "{} (type {}) terminated. Error: {}",
            meta.name, meta.type_name, cause
        );
        inner.record.add_str_field("plugin", meta.name.clone());
        inner.decoded = true;
    }
    if let Err(pack) = helper.router().send(pack).await {
        helper.pools().recycle(pack);
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic (no message)".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_extracts_str_and_string() {
        let payload = std::panic::catch_unwind(|| panic!("static message")).unwrap_err();
        assert_eq!(panic_message(&payload), "static message");

        let payload =
            std::panic::catch_unwind(|| panic!("{}", String::from("dynamic"))).unwrap_err();
        assert_eq!(panic_message(&payload), "dynamic");
    }
}
