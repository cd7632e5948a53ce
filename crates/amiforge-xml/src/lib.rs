//! XML handling for amiforge.
//!
//! Two directions are covered:
//!
//! - **Writing**: the import manifest, built incrementally with
//!   [`ManifestBuilder`] and exported once as an immutable [`Manifest`].
//! - **Reading**: extraction of individual fields from API responses with
//!   [`extract_first`], [`extract_all`], and [`extract_text`].

pub mod error;
pub mod escape;
pub mod extract;
pub mod manifest;

pub use error::XmlError;
pub use escape::escape_ampersands;
pub use extract::{contains_element, extract_all, extract_first, extract_text};
pub use manifest::{Importer, Manifest, ManifestBuilder, Part, part_count, volume_size_gib};
