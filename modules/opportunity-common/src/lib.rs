pub mod types;
pub mod config;
pub mod error;
pub mod telemetry;

pub use types::*;
pub use config::{Config, PipelineConfig};
pub use error::{EnrichError, Result};
