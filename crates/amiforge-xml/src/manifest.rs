//! Import manifest document.
//!
//! The manifest tells the import service where each uploaded part lives and
//! how to fetch, probe, and delete it. It is assembled part by part through
//! [`ManifestBuilder`] while the upload progresses and exported exactly once
//! by [`ManifestBuilder::finish`] into an immutable [`Manifest`].
//!
//! Output is a single line with no indentation:
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8" standalone="yes"?>
//! <manifest>
//!   <version>2010-11-15</version>
//!   <file-format>RAW</file-format>
//!   <importer>...</importer>
//!   <self-destruct-url>...</self-destruct-url>
//!   <import>
//!     <size>...</size>
//!     <volume-size>...</volume-size>
//!     <parts count="n"><part index="0">...</part></parts>
//!   </import>
//! </manifest>
//! ```

use std::io::{self, Write};

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesText, Event};
use tracing::debug;

use crate::error::XmlError;
use crate::escape::escape_ampersands;

/// Manifest schema version understood by the import service.
pub const MANIFEST_VERSION: &str = "2010-11-15";

/// Image file format declared in the manifest.
pub const FILE_FORMAT: &str = "RAW";

const GIB: u64 = 1 << 30;

/// Number of whole gibibytes needed to hold `size` bytes.
///
/// # Examples
///
/// ```
/// use amiforge_xml::volume_size_gib;
///
/// assert_eq!(volume_size_gib(1), 1);
/// assert_eq!(volume_size_gib(1 << 30), 1);
/// assert_eq!(volume_size_gib((1 << 30) + 1), 2);
/// ```
#[must_use]
pub fn volume_size_gib(size: u64) -> u64 {
    size.div_ceil(GIB)
}

/// Number of parts an object of `size` bytes splits into.
#[must_use]
pub fn part_count(size: u64, part_size: u64) -> u64 {
    size.div_ceil(part_size)
}

/// The tool identification block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Importer {
    /// Tool name.
    pub name: String,
    /// Tool version.
    pub version: String,
    /// Release date of the tool version.
    pub release: String,
}

/// One uploaded part of the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// Zero-based part index.
    pub index: u64,
    /// Offset of the first byte.
    pub start: u64,
    /// Offset of the last byte (inclusive).
    pub end: u64,
    /// Storage key, `<nonce>/part<index>`.
    pub key: String,
    /// Presigned HEAD URL, unescaped.
    pub head_url: String,
    /// Presigned GET URL, unescaped.
    pub get_url: String,
    /// Presigned DELETE URL, unescaped.
    pub delete_url: String,
}

impl Part {
    /// Number of bytes in the part.
    #[must_use]
    pub fn byte_len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Append-only manifest under construction.
#[derive(Debug)]
pub struct ManifestBuilder {
    importer: Importer,
    self_destruct_url: String,
    size: u64,
    parts: Vec<Part>,
}

impl ManifestBuilder {
    /// Start a manifest for an object of `size` bytes.
    #[must_use]
    pub fn new(importer: Importer, self_destruct_url: impl Into<String>, size: u64) -> Self {
        Self {
            importer,
            self_destruct_url: self_destruct_url.into(),
            size,
            parts: Vec::new(),
        }
    }

    /// Offset where the next part must start.
    #[must_use]
    pub fn next_offset(&self) -> u64 {
        self.parts.last().map_or(0, |p| p.end + 1)
    }

    /// Append the next part. Parts must arrive in order and be contiguous.
    pub fn push_part(&mut self, part: Part) {
        debug_assert_eq!(part.start, self.next_offset(), "parts must be contiguous");
        debug_assert_eq!(part.index, self.parts.len() as u64, "parts must be in order");
        self.parts.push(part);
    }

    /// Export the finished document.
    ///
    /// # Errors
    ///
    /// Returns [`XmlError::IncompleteParts`] if the parts do not cover the
    /// whole object, or an I/O error from the XML writer.
    pub fn finish(self) -> Result<Manifest, XmlError> {
        let covered = self.next_offset();
        if covered != self.size {
            return Err(XmlError::IncompleteParts {
                size: self.size,
                covered,
            });
        }

        let mut document = Vec::with_capacity(1024 + self.parts.len() * 2048);
        let mut writer = Writer::new(&mut document);
        writer.write_event(Event::Decl(BytesDecl::new(
            "1.0",
            Some("UTF-8"),
            Some("yes"),
        )))?;
        writer
            .create_element("manifest")
            .write_inner_content(|w| self.write_body(w))?;

        debug!(
            size = self.size,
            parts = self.parts.len(),
            bytes = document.len(),
            "manifest exported"
        );
        Ok(Manifest {
            document,
            size: self.size,
            parts: self.parts,
        })
    }

    fn write_body<W: Write>(&self, w: &mut Writer<W>) -> io::Result<()> {
        write_text_element(w, "version", MANIFEST_VERSION)?;
        write_text_element(w, "file-format", FILE_FORMAT)?;
        w.create_element("importer")
            .write_inner_content(|w| -> io::Result<()> {
                write_text_element(w, "name", &self.importer.name)?;
                write_text_element(w, "version", &self.importer.version)?;
                write_text_element(w, "release", &self.importer.release)
            })?;
        write_url_element(w, "self-destruct-url", &self.self_destruct_url)?;
        w.create_element("import")
            .write_inner_content(|w| -> io::Result<()> {
                write_text_element(w, "size", &self.size.to_string())?;
                write_text_element(w, "volume-size", &volume_size_gib(self.size).to_string())?;
                let count = self.parts.len().to_string();
                w.create_element("parts")
                    .with_attribute(("count", count.as_str()))
                    .write_inner_content(|w| -> io::Result<()> {
                        for part in &self.parts {
                            write_part(w, part)?;
                        }
                        Ok(())
                    })?;
                Ok(())
            })?;
        Ok(())
    }
}

/// A finished, immutable manifest document.
#[derive(Debug, Clone)]
pub struct Manifest {
    document: Vec<u8>,
    size: u64,
    parts: Vec<Part>,
}

impl Manifest {
    /// The serialized document.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.document
    }

    /// Total object size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whole-gibibyte volume size.
    #[must_use]
    pub fn volume_size_gib(&self) -> u64 {
        volume_size_gib(self.size)
    }

    /// The parts, in index order.
    #[must_use]
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }
}

fn write_part<W: Write>(w: &mut Writer<W>, part: &Part) -> io::Result<()> {
    let index = part.index.to_string();
    let start = part.start.to_string();
    let end = part.end.to_string();
    w.create_element("part")
        .with_attribute(("index", index.as_str()))
        .write_inner_content(|w| -> io::Result<()> {
            w.create_element("byte-range")
                .with_attribute(("start", start.as_str()))
                .with_attribute(("end", end.as_str()))
                .write_empty()?;
            write_text_element(w, "key", &part.key)?;
            write_url_element(w, "head-url", &part.head_url)?;
            write_url_element(w, "get-url", &part.get_url)?;
            write_url_element(w, "delete-url", &part.delete_url)
        })?;
    Ok(())
}

fn write_text_element<W: Write>(w: &mut Writer<W>, tag: &str, text: &str) -> io::Result<()> {
    w.create_element(tag)
        .write_text_content(BytesText::new(text))?;
    Ok(())
}

/// URLs carry only `&` as an XML-special character.
fn write_url_element<W: Write>(w: &mut Writer<W>, tag: &str, url: &str) -> io::Result<()> {
    w.create_element(tag)
        .write_text_content(BytesText::from_escaped(escape_ampersands(url)))?;
    Ok(())
}
