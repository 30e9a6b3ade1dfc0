//! Core types for the sluice pipeline runtime.
//!
//! This module provides foundational types used throughout the system:
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Global, retry, and signer-key configuration

mod config;
mod errors;

pub use config::{Config, GlobalConfig, LoggingConfig, RetryConfig, SignerKeyConfig};
pub use errors::{Error, Result};
