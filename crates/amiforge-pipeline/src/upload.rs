//! Multipart image upload.
//!
//! The image is split into fixed-size parts stored under a random per-upload
//! prefix, `/<nonce>/part<i>`. Each stored part is recorded in the import
//! manifest together with presigned HEAD, GET, and DELETE URLs, and the
//! finished manifest is stored last as `/<nonce>/manifest.xml`.

use std::path::Path;

use amiforge_auth::PRESIGN_EXPIRY_SECS;
use amiforge_core::Region;
use amiforge_http::AwsClient;
use amiforge_xml::{Importer, ManifestBuilder, Part, part_count};
use rand::RngExt;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};
use crate::progress::Progress;

/// Name reported in the manifest importer block.
pub const IMPORTER_NAME: &str = "amiforge";

/// Release date reported in the manifest importer block.
pub const IMPORTER_RELEASE: &str = "2026-10-16";

const NONCE_BYTES: usize = 16;

/// Result of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    /// Storage path of the manifest, `/<nonce>/manifest.xml`.
    pub manifest_path: String,
    /// Image size in bytes.
    pub size: u64,
    /// Image size in whole gibibytes, rounded up.
    pub volume_size_gib: u64,
}

/// Uploads one image and its manifest to a bucket.
#[derive(Debug)]
pub struct UploadManager<'a> {
    client: &'a AwsClient,
    region: &'a Region,
    bucket: &'a str,
    part_size: usize,
}

impl<'a> UploadManager<'a> {
    /// Create an upload manager. `part_size` must be non-zero.
    #[must_use]
    pub fn new(
        client: &'a AwsClient,
        region: &'a Region,
        bucket: &'a str,
        part_size: usize,
    ) -> Self {
        debug_assert!(part_size > 0, "part size must be non-zero");
        Self {
            client,
            region,
            bucket,
            part_size,
        }
    }

    /// Upload the image at `image` under a fresh random prefix.
    ///
    /// Parts already stored when a later step fails are left in place.
    pub async fn upload(
        &self,
        image: &Path,
        progress: &mut Progress,
    ) -> PipelineResult<UploadedImage> {
        self.upload_with_nonce(image, &generate_nonce(), progress)
            .await
    }

    async fn upload_with_nonce(
        &self,
        image: &Path,
        nonce: &str,
        progress: &mut Progress,
    ) -> PipelineResult<UploadedImage> {
        let io_error = |source| PipelineError::Io {
            path: image.to_path_buf(),
            source,
        };

        let mut file = File::open(image).await.map_err(io_error)?;
        let size = file.metadata().await.map_err(io_error)?.len();
        if size == 0 {
            return Err(PipelineError::EmptyImage(image.to_path_buf()));
        }

        let manifest_path = format!("/{nonce}/manifest.xml");
        let mut manifest = ManifestBuilder::new(
            importer(),
            self.presign("DELETE", &manifest_path),
            size,
        );

        let count = part_count(size, self.part_size as u64);
        info!(
            image = %image.display(),
            bucket = %self.bucket,
            %nonce,
            size,
            parts = count,
            "uploading image"
        );
        progress.message(&format!(
            "Uploading {} to\nhttp://{}.s3.amazonaws.com/{nonce}/\nin {count} part(s)",
            image.display(),
            self.bucket,
        ));

        let mut buf = vec![0u8; self.part_size];
        let mut start = 0u64;
        let mut index = 0u64;
        while start < size {
            progress.dot();

            let len = usize::try_from(size - start)
                .map_or(self.part_size, |r| r.min(self.part_size));
            let chunk = &mut buf[..len];
            file.read_exact(chunk).await.map_err(io_error)?;

            let path = format!("/{nonce}/part{index}");
            self.client
                .put_object_with_retry(self.region, self.bucket, &path, chunk)
                .await
                .map_err(PipelineError::request("S3 PUT"))?;
            debug!(%path, start, len, "uploaded part");

            let end = start + len as u64 - 1;
            manifest.push_part(Part {
                index,
                start,
                end,
                key: format!("{nonce}/part{index}"),
                head_url: self.presign("HEAD", &path),
                get_url: self.presign("GET", &path),
                delete_url: self.presign("DELETE", &path),
            });

            start = end + 1;
            index += 1;
        }
        progress.done();

        let manifest = manifest.finish()?;
        progress.message("Uploading volume manifest...");
        self.client
            .put_object_with_retry(
                self.region,
                self.bucket,
                &manifest_path,
                manifest.as_bytes(),
            )
            .await
            .map_err(PipelineError::request("S3 PUT"))?;
        progress.done();

        Ok(UploadedImage {
            manifest_path,
            size,
            volume_size_gib: manifest.volume_size_gib(),
        })
    }

    fn presign(&self, method: &str, path: &str) -> String {
        self.client
            .presign_object_url(self.region, self.bucket, method, path, PRESIGN_EXPIRY_SECS)
    }
}

fn importer() -> Importer {
    Importer {
        name: IMPORTER_NAME.to_owned(),
        version: env!("CARGO_PKG_VERSION").to_owned(),
        release: IMPORTER_RELEASE.to_owned(),
    }
}

/// A random hex prefix that keeps concurrent uploads apart.
fn generate_nonce() -> String {
    let mut rng = rand::rng();
    let mut buf = [0u8; NONCE_BYTES];
    rng.fill(&mut buf);
    hex::encode(buf)
}
