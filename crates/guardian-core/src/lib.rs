//! Core utilities and types shared across all Guardian crates

pub mod config;
pub mod problemdetails;
pub mod types;
pub mod utils;

pub use config::*;
pub use problemdetails::ProblemDetails;
pub use types::*;
pub use utils::*;

// Re-export external dependencies
pub use anyhow;
pub use async_trait;
pub use chrono;
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tokio;
pub use tracing;
pub use uuid;
