//! Core types, credentials, and configuration for amiforge.
//!
//! This crate provides the building blocks shared by the signing, transport,
//! and pipeline crates: region and service endpoint resolution, the
//! credential key-file loader, and the pipeline tuning configuration.

mod config;
mod credentials;
mod error;
mod types;

pub use config::{DEFAULT_PART_SIZE, PipelineConfig};
pub use credentials::Credentials;
pub use error::{CoreError, CoreResult};
pub use types::{Region, Service};
