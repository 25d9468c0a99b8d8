//! # Seismo Common Library
//!
//! Shared code for the seismogram services including:
//! - Error types
//! - Service configuration loading
//! - Timestamp arithmetic on second offsets
//! - Spherical geometry for source/receiver pairs

pub mod config;
pub mod error;
pub mod geo;
pub mod time;

pub use config::ServiceConfig;
pub use error::{Error, Result};
