//! Configuration for the client: loading the TOML config file and resolving its paths.
//!
//! This module provides a unified interface to all configuration-related functionality,
//! including data types and loading utilities.

mod loader;
mod types;

pub use loader::*;
pub use types::*;
