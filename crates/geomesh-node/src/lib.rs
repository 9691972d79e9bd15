//! # GeoMesh Node Library
//!
//! This library exposes the modules of the node binary for testing.
//! The main entry point is the `main.rs` binary.
//!
//! - `config` - TOML configuration with environment overrides
//! - `cli` - command-line flags
//! - `runtime` - adapter wiring and background tasks
//! - `chat` - stdin-to-peer chat forwarding
//! - `metrics_server` - Prometheus scrape endpoint

#![warn(missing_docs)]

pub mod chat;
pub mod cli;
pub mod config;
pub mod metrics_server;
pub mod runtime;

pub use cli::Cli;
pub use config::{ConfigError, NodeConfig};
pub use runtime::NodeRuntime;
