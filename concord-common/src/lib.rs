//! # Concord Common Library
//!
//! Shared code for the Concord workspace:
//! - Common error type
//! - TOML configuration file model and root folder resolution
//! - Logging initialization

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
