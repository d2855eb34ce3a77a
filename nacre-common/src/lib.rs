//! # NACRE Common Library
//!
//! Shared code for the NACRE classification services:
//! - Error type used across crates
//! - Configuration loading (TOML file, root folder resolution)
//! - Event types (NacreEvent enum) and the broadcast EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
