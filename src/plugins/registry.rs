//! Dynamic plugin registry.
//!
//! An explicit, ordered registry keyed by type name replaces any
//! registration-at-init magic: each entry is a factory taking a decoded
//! config value and returning a constructed plugin. Duplicate registration
//! is a configuration error.

use super::{Decoder, Encoder, Filter, Input, Output};
use crate::types::{Error, Result};
use std::sync::Arc;

pub type InputFactory = Box<dyn Fn(&serde_json::Value) -> Result<Arc<dyn Input>> + Send + Sync>;
pub type DecoderFactory = Box<dyn Fn(&serde_json::Value) -> Result<Arc<dyn Decoder>> + Send + Sync>;
pub type FilterFactory = Box<dyn Fn(&serde_json::Value) -> Result<Arc<dyn Filter>> + Send + Sync>;
pub type OutputFactory = Box<dyn Fn(&serde_json::Value) -> Result<Arc<dyn Output>> + Send + Sync>;
pub type EncoderFactory = Box<dyn Fn(&serde_json::Value) -> Result<Arc<dyn Encoder>> + Send + Sync>;

/// Ordered factories for every plugin kind.
#[derive(Default)]
pub struct PluginRegistry {
    inputs: Vec<(String, InputFactory)>,
    decoders: Vec<(String, DecoderFactory)>,
    filters: Vec<(String, FilterFactory)>,
    outputs: Vec<(String, OutputFactory)>,
    encoders: Vec<(String, EncoderFactory)>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("inputs", &self.type_names(&self.inputs))
            .field("decoders", &self.type_names(&self.decoders))
            .field("filters", &self.type_names(&self.filters))
            .field("outputs", &self.type_names(&self.outputs))
            .field("encoders", &self.type_names(&self.encoders))
            .finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn type_names<F>(&self, list: &[(String, F)]) -> Vec<String> {
        list.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn register_input(&mut self, type_name: &str, factory: InputFactory) -> Result<()> {
        register(&mut self.inputs, type_name, factory)
    }

    pub fn register_decoder(&mut self, type_name: &str, factory: DecoderFactory) -> Result<()> {
        register(&mut self.decoders, type_name, factory)
    }

    pub fn register_filter(&mut self, type_name: &str, factory: FilterFactory) -> Result<()> {
        register(&mut self.filters, type_name, factory)
    }

    pub fn register_output(&mut self, type_name: &str, factory: OutputFactory) -> Result<()> {
        register(&mut self.outputs, type_name, factory)
    }

    pub fn register_encoder(&mut self, type_name: &str, factory: EncoderFactory) -> Result<()> {
        register(&mut self.encoders, type_name, factory)
    }

    pub fn create_input(&self, type_name: &str, config: &serde_json::Value) -> Result<Arc<dyn Input>> {
        create(&self.inputs, type_name, config)
    }

    pub fn create_decoder(
        &self,
        type_name: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn Decoder>> {
        create(&self.decoders, type_name, config)
    }

    pub fn create_filter(
        &self,
        type_name: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn Filter>> {
        create(&self.filters, type_name, config)
    }

    pub fn create_output(
        &self,
        type_name: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn Output>> {
        create(&self.outputs, type_name, config)
    }

    pub fn create_encoder(
        &self,
        type_name: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn Encoder>> {
        create(&self.encoders, type_name, config)
    }
}

fn register<F>(list: &mut Vec<(String, F)>, type_name: &str, factory: F) -> Result<()> {
    if list.iter().any(|(name, _)| name == type_name) {
        return Err(Error::config(format!(
            "plugin type '{type_name}' registered twice"
        )));
    }
    list.push((type_name.to_string(), factory));
    Ok(())
}

fn create<T: ?Sized, F>(
    list: &[(String, F)],
    type_name: &str,
    config: &serde_json::Value,
) -> Result<Arc<T>>
where
    F: Fn(&serde_json::Value) -> Result<Arc<T>>,
{
    let (_, factory) = list
        .iter()
        .find(|(name, _)| name == type_name)
        .ok_or_else(|| Error::not_found(format!("unknown plugin type '{type_name}'")))?;
    factory(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::PackRef;

    #[derive(Debug)]
    struct NoopEncoder;

    impl Encoder for NoopEncoder {
        fn encode(&self, pack: &PackRef) -> Result<Vec<u8>> {
            Ok(pack.record.payload.clone().into_bytes())
        }
    }

    #[test]
    fn register_and_create() {
        let mut registry = PluginRegistry::new();
        registry
            .register_encoder("NoopEncoder", Box::new(|_| Ok(Arc::new(NoopEncoder))))
            .unwrap();

        assert!(registry
            .create_encoder("NoopEncoder", &serde_json::Value::Null)
            .is_ok());
        assert!(registry
            .create_encoder("Missing", &serde_json::Value::Null)
            .is_err());
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let mut registry = PluginRegistry::new();
        registry
            .register_encoder("NoopEncoder", Box::new(|_| Ok(Arc::new(NoopEncoder))))
            .unwrap();
        assert!(registry
            .register_encoder("NoopEncoder", Box::new(|_| Ok(Arc::new(NoopEncoder))))
            .is_err());
    }
}
