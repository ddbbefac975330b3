//! `cadence-core` — configuration shared by every cadence crate.

pub mod config;
pub mod error;

pub use config::CadenceConfig;
pub use error::{CoreError, Result};
