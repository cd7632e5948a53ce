//! Image provisioning pipeline for amiforge.
//!
//! Turns a raw disk image into registered machine images:
//!
//! - [`upload`] - multipart upload of the image and its import manifest
//! - [`compute`] - the compute API actions the pipeline drives
//! - [`provision`] - the staged [`Provisioner`] and its [`RegionImageSet`] result
//! - [`notify`] - release notifications for finished images
//! - [`progress`] - operator-facing progress output

pub mod compute;
pub mod error;
pub mod notify;
pub mod progress;
pub mod provision;
pub mod upload;

#[cfg(test)]
mod testing;

pub use compute::{Architecture, ComputeApi, ConversionStatus, ImageSpec, PollState};
pub use error::{PipelineError, PipelineResult};
pub use notify::{Notification, NotificationPublisher};
pub use progress::Progress;
pub use provision::{ImageJob, Provisioner, RegionImageSet};
pub use upload::{IMPORTER_NAME, IMPORTER_RELEASE, UploadManager, UploadedImage};
