//! Helix Core Library
//!
//! Shared functionality for Helix components:
//! - Configuration resolution and hierarchy
//! - Tracing subscriber setup
//! - Common error types

pub mod config;
pub mod error;
pub mod tracing_init;

pub use config::{ClientConfig, Config, ServerConfig};
pub use error::{Error, Result};
