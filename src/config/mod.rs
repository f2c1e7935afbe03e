//! Configuration module for Crawl-Relay
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use crawl_relay::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("relay.toml")).unwrap();
//! println!("Sweeping every {}s", config.coordinator.sweep_interval);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{ChannelConfig, Config, CoordinatorConfig, FrontierConfig, WorkerConfig};

pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate;
