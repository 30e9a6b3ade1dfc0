//! # Sluice Core - Telemetry Pipeline Runtime
//!
//! A pluggable, multi-stage pipeline for ingesting, decoding, filtering,
//! routing, and emitting structured telemetry records:
//! - Bounded envelope pools with recycle discipline and leak auditing
//! - Matcher-expression routing with reference-counted fan-out
//! - Supervised plugin lifecycles with exponential-backoff restarts
//! - Framed wire protocol with HMAC authentication
//! - Ordered shutdown that drains every stage without losing envelopes
//!
//! ## Architecture
//!
//! ```text
//!  Inputs ──▶ Splitters ──▶ Decoders ──▶ Router ──▶ Filters ──┐
//!     ▲                                    │   └──▶ Outputs   │
//!     │                                    │                  │
//!  input pool ◀──────── recycle ◀──────────┘   injection pool ◀┘
//! ```
//!
//! Envelopes ([`pack::Pack`]) are created at startup and infinitely reused;
//! every stage is an independent worker communicating over bounded
//! channels, and pool exhaustion is the back-pressure signal.

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod matcher;
pub mod message;
pub mod pack;
pub mod pipeline;
pub mod plugins;
pub mod report;
pub mod router;
pub mod runner;
pub mod splitter;
pub mod spool;
pub mod types;
pub mod wire;

pub use pipeline::{Pipeline, RunningPipeline};
pub use types::{Config, Error, GlobalConfig, Result};
