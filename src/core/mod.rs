//! Shared infrastructure: configuration and error types.

pub mod config;
pub mod error;

pub use config::{Config, ConfigHandle};
pub use error::{DallyError, Result};
