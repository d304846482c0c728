//! TideFS common types
//!
//! Shared error taxonomy and configuration for the TideFS crates.

pub mod config;
pub mod error;

pub use config::{CacheConfig, EnvConfig};
pub use error::{Error, Result};
