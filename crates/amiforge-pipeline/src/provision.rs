//! The provisioning pipeline.
//!
//! [`Provisioner::run`] drives one image from a local file to a registered
//! (and optionally replicated and public) machine image:
//!
//! 1. discover regions (this also validates the credentials)
//! 2. upload the image parts and manifest
//! 3. import the manifest as a volume and wait for it
//! 4. snapshot the volume, wait, and delete the volume
//! 5. optionally make the snapshot public
//! 6. register the image and wait for it
//! 7. with `public`: copy to every other region, wait for each copy, and
//!    make every image public
//!
//! Stages run strictly in order. Any failure aborts the run and leaves
//! resources created by earlier stages in place.

use std::path::PathBuf;

use amiforge_auth::PRESIGN_EXPIRY_SECS;
use amiforge_core::{PipelineConfig, Region};
use amiforge_http::AwsClient;
use tracing::info;
use typed_builder::TypedBuilder;

use crate::compute::{ComputeApi, ConversionStatus, ImageSpec, PollState};
use crate::error::PipelineResult;
use crate::progress::Progress;
use crate::upload::UploadManager;

/// One image to provision.
#[derive(Debug, Clone, TypedBuilder)]
pub struct ImageJob {
    /// Path of the raw disk image.
    #[builder(setter(into))]
    pub image_path: PathBuf,
    /// Region the image is built in.
    pub region: Region,
    /// Bucket that stages the upload.
    #[builder(setter(into))]
    pub bucket: String,
    /// Registration attributes.
    pub image: ImageSpec,
    /// Copy the image to every region and make all copies public.
    #[builder(default)]
    pub public: bool,
    /// Make the root snapshot public.
    #[builder(default)]
    pub public_snapshot: bool,
}

/// Image IDs by region, in region-list order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionImageSet {
    entries: Vec<(Region, String)>,
}

impl RegionImageSet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the image for `region`.
    pub fn push(&mut self, region: Region, image_id: impl Into<String>) {
        self.entries.push((region, image_id.into()));
    }

    /// Iterate `(region, image ID)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&Region, &str)> {
        self.entries.iter().map(|(r, id)| (r, id.as_str()))
    }

    /// Number of regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Runs image jobs against the remote services.
#[derive(Debug)]
pub struct Provisioner {
    api: ComputeApi,
    config: PipelineConfig,
    progress: Progress,
}

impl Provisioner {
    /// Create a provisioner reporting to `progress`.
    #[must_use]
    pub fn new(client: AwsClient, config: PipelineConfig, progress: Progress) -> Self {
        Self {
            api: ComputeApi::new(client),
            config,
            progress,
        }
    }

    /// Provision `job` and return the resulting images.
    ///
    /// Without `job.public` the set holds only the home region.
    pub async fn run(&mut self, job: &ImageJob) -> PipelineResult<RegionImageSet> {
        let home = &job.region;

        let regions = self.api.describe_regions(home).await?;
        info!(%home, regions = regions.len(), "credentials verified");

        let part_size = self.config.part_size;
        let uploader = UploadManager::new(self.api.client(), home, &job.bucket, part_size);
        let uploaded = uploader.upload(&job.image_path, &mut self.progress).await?;

        let manifest_url = self.api.client().presign_object_url(
            home,
            &job.bucket,
            "GET",
            &uploaded.manifest_path,
            PRESIGN_EXPIRY_SECS,
        );
        let task_id = self
            .api
            .import_volume(
                home,
                &manifest_url,
                uploaded.size,
                uploaded.volume_size_gib,
            )
            .await?;
        info!(%task_id, "import started");

        let volume_id = self.await_volume(home, &task_id).await?;
        info!(%volume_id, "volume imported");

        self.progress.message("Creating snapshot");
        let snapshot_id = self.api.create_snapshot(home, &volume_id).await?;
        self.await_snapshot(home, &snapshot_id).await?;
        info!(%snapshot_id, "snapshot completed");

        self.api.delete_volume(home, &volume_id).await?;

        if job.public_snapshot {
            self.progress
                .message(&format!("Marking {snapshot_id} in {home} as public..."));
            self.api.make_snapshot_public(home, &snapshot_id).await?;
            self.progress.done();
        }

        self.progress.message("Registering AMI...");
        let image_id = self
            .api
            .register_image(home, &snapshot_id, &job.image)
            .await?;
        self.await_image(home, &image_id).await?;
        info!(%image_id, "image registered");

        if !job.public {
            let mut images = RegionImageSet::new();
            images.push(home.clone(), image_id);
            return Ok(images);
        }

        let images = self.replicate(home, &image_id, regions).await?;

        self.progress.message("Marking images as public...");
        for (region, id) in images.iter() {
            self.api.make_image_public(region, id).await?;
        }
        self.progress.done();

        Ok(images)
    }

    /// Issue every copy first, then wait for each in order.
    async fn replicate(
        &mut self,
        home: &Region,
        image_id: &str,
        regions: Vec<Region>,
    ) -> PipelineResult<RegionImageSet> {
        let mut targets = regions;
        if !targets.contains(home) {
            targets.insert(0, home.clone());
        }

        let mut images = RegionImageSet::new();
        self.progress.message("Copying AMI to regions:");
        for region in targets {
            if &region == home {
                images.push(region, image_id);
                continue;
            }
            self.progress.message(&format!(" {region}"));
            let copy_id = self.api.copy_image(home, image_id, &region).await?;
            info!(%region, %copy_id, "copy started");
            images.push(region, copy_id);
        }
        self.progress.message(".\n");

        for (region, id) in images.iter() {
            if region == home {
                continue;
            }
            self.progress
                .message(&format!("Waiting for AMI copying to {region}..."));
            self.await_image(region, id).await?;
        }

        Ok(images)
    }

    async fn await_volume(&mut self, region: &Region, task_id: &str) -> PipelineResult<String> {
        loop {
            match self.api.describe_conversion_task(region, task_id).await? {
                ConversionStatus::Completed { volume_id } => {
                    self.progress.done();
                    return Ok(volume_id);
                }
                ConversionStatus::InProgress { message } => {
                    self.progress.status("Importing volume", &message);
                }
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    async fn await_snapshot(&mut self, region: &Region, snapshot_id: &str) -> PipelineResult<()> {
        while self.api.snapshot_state(region, snapshot_id).await? == PollState::Pending {
            self.progress.dot();
            tokio::time::sleep(self.config.poll_interval()).await;
        }
        self.progress.done();
        Ok(())
    }

    async fn await_image(&mut self, region: &Region, image_id: &str) -> PipelineResult<()> {
        while self.api.image_state(region, image_id).await? == PollState::Pending {
            self.progress.dot();
            tokio::time::sleep(self.config.poll_interval()).await;
        }
        self.progress.done();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::compute::Architecture;
    use crate::error::PipelineError;
    use crate::progress::tests::{SharedBuffer, captured};
    use crate::testing::{ScriptedTransport, client};

    const REGIONS: &str = "<DescribeRegionsResponse><regionInfo>\
                           <item><regionName>us-east-1</regionName></item>\
                           <item><regionName>eu-west-1</regionName></item>\
                           <item><regionName>ap-south-1</regionName></item>\
                           </regionInfo></DescribeRegionsResponse>";

    const ACTIVE: &str = "<item><importVolume><volume><size>1</size></volume></importVolume>\
                          <state>active</state><statusMessage>Pending</statusMessage></item>";

    const CONVERTED: &str = "<item><importVolume>\
                             <volume><size>1</size><id>vol-123</id></volume>\
                             </importVolume><state>completed</state></item>";

    struct Harness {
        transport: Arc<ScriptedTransport>,
        output: SharedBuffer,
        provisioner: Provisioner,
        job: ImageJob,
        _image: tempfile::NamedTempFile,
    }

    fn harness(public: bool, public_snapshot: bool) -> Harness {
        let mut image = tempfile::NamedTempFile::new().unwrap();
        image.write_all(b"bootable").unwrap();

        let transport = ScriptedTransport::new();
        let config = PipelineConfig::builder().part_size(8).build();
        let (progress, output) = captured();
        let provisioner = Provisioner::new(client(&transport), config, progress);
        let job = ImageJob::builder()
            .image_path(image.path())
            .region(Region::new("eu-west-1"))
            .bucket("images")
            .image(
                ImageSpec::builder()
                    .name("FreeBSD 14.1")
                    .description("FreeBSD/amd64 14.1-RELEASE")
                    .architecture(Architecture::X86_64)
                    .build(),
            )
            .public(public)
            .public_snapshot(public_snapshot)
            .build();

        Harness {
            transport,
            output,
            provisioner,
            job,
            _image: image,
        }
    }

    /// Requests made by a private run with no pending image polls.
    const HOME_IMAGE_CALLS: usize = 14;

    /// Replies up to and including the volume deletion.
    fn script_home_image(transport: &ScriptedTransport) {
        transport
            .ok(REGIONS)
            .ok_times(2)
            .ok("<conversionTaskId>import-vol-1</conversionTaskId>")
            .ok(ACTIVE)
            .ok(ACTIVE)
            .ok(CONVERTED)
            .ok("<snapshotId>snap-1</snapshotId>")
            .ok("<status>pending</status>")
            .ok("<status>pending</status>")
            .ok("<status>completed</status>")
            .ok("<return>true</return>");
    }

    fn script_registration(transport: &ScriptedTransport) {
        transport
            .ok("<imageId>ami-home</imageId>")
            .ok("<imageState>available</imageState>");
    }

    fn body_of(transport: &ScriptedTransport, label: &str) -> String {
        let request = transport
            .requests()
            .into_iter()
            .find(|r| r.label() == label)
            .unwrap();
        String::from_utf8(request.body().to_vec()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_provision_private_image_in_home_region() {
        let mut h = harness(false, false);
        script_home_image(&h.transport);
        script_registration(&h.transport);

        let images = h.provisioner.run(&h.job).await.unwrap();

        let entries: Vec<(&str, &str)> =
            images.iter().map(|(r, id)| (r.as_str(), id)).collect();
        assert_eq!(entries, vec![("eu-west-1", "ami-home")]);
        let labels: Vec<String> = h
            .transport
            .labels()
            .into_iter()
            .map(|l| {
                if l.starts_with("PUT ") {
                    "PUT".to_owned()
                } else {
                    l
                }
            })
            .collect();
        assert_eq!(
            labels,
            vec![
                "DescribeRegions",
                "PUT",
                "PUT",
                "ImportVolume",
                "DescribeConversionTasks",
                "DescribeConversionTasks",
                "DescribeConversionTasks",
                "CreateSnapshot",
                "DescribeSnapshots",
                "DescribeSnapshots",
                "DescribeSnapshots",
                "DeleteVolume",
                "RegisterImage",
                "DescribeImages",
            ]
        );
        assert_eq!(h.transport.remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_snapshot_volume_after_two_active_polls() {
        let mut h = harness(false, false);
        script_home_image(&h.transport);
        script_registration(&h.transport);
        let started = tokio::time::Instant::now();

        h.provisioner.run(&h.job).await.unwrap();

        assert!(
            body_of(&h.transport, "CreateSnapshot").contains("VolumeId=vol-123")
        );
        assert!(
            body_of(&h.transport, "DeleteVolume").contains("VolumeId=vol-123")
        );
        let polls = h
            .transport
            .labels()
            .iter()
            .filter(|l| *l == "DescribeConversionTasks")
            .count();
        assert_eq!(polls, 3);
        // Two conversion polls and two snapshot polls were pending.
        assert_eq!(started.elapsed(), Duration::from_secs(40));
        assert!(
            h.output
                .contents()
                .contains("Importing volume: Pending. done.\n")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_print_two_dots_for_two_pending_snapshot_polls() {
        let mut h = harness(false, false);
        script_home_image(&h.transport);
        script_registration(&h.transport);

        h.provisioner.run(&h.job).await.unwrap();

        assert!(h.output.contents().contains("Creating snapshot.. done.\n"));
        assert!(h.output.contents().ends_with("Registering AMI... done.\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_abort_on_snapshot_error_status() {
        let mut h = harness(false, false);
        h.transport
            .ok(REGIONS)
            .ok_times(2)
            .ok("<conversionTaskId>import-vol-1</conversionTaskId>")
            .ok(CONVERTED)
            .ok("<snapshotId>snap-1</snapshotId>")
            .ok("<status>pending</status>")
            .ok("<status>error</status>")
            .ok("<return>true</return>");

        let result = h.provisioner.run(&h.job).await;

        assert!(matches!(
            result,
            Err(PipelineError::UnexpectedStatus {
                operation: "DescribeSnapshots",
                ..
            })
        ));
        assert_eq!(
            h.transport.labels().last().map(String::as_str),
            Some("DescribeSnapshots")
        );
        assert_eq!(h.transport.remaining(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_import_manifest_through_presigned_get_url() {
        let mut h = harness(false, false);
        script_home_image(&h.transport);
        script_registration(&h.transport);

        h.provisioner.run(&h.job).await.unwrap();

        let import = body_of(&h.transport, "ImportVolume");
        assert!(
            import.contains("&Image.ImportManifestUrl=https%3A%2F%2Fimages.s3.amazonaws.com%2F")
        );
        assert!(
            import.contains("%2Fmanifest.xml%3FX-Amz-Algorithm%3DAWS4-HMAC-SHA256")
        );
        assert!(import.contains("&Image.Bytes=8&"));
        assert!(import.contains("&Volume.Size=1&"));
        let bytes = import.find("&Image.Bytes=").unwrap();
        let url = import.find("&Image.ImportManifestUrl=").unwrap();
        let volume = import.find("&Volume.Size=").unwrap();
        assert!(bytes < url && url < volume);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_make_snapshot_public_before_registering() {
        let mut h = harness(false, true);
        script_home_image(&h.transport);
        h.transport.ok("<return>true</return>");
        script_registration(&h.transport);

        h.provisioner.run(&h.job).await.unwrap();

        let labels = h.transport.labels();
        let at = labels
            .iter()
            .position(|l| l == "ModifySnapshotAttribute")
            .unwrap();
        assert_eq!(labels[at - 1], "DeleteVolume");
        assert_eq!(labels[at + 1], "RegisterImage");
        assert!(
            h.output
                .contents()
                .contains("Marking snap-1 in eu-west-1 as public... done.\n")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_replicate_and_publish_in_region_order() {
        let mut h = harness(true, false);
        script_home_image(&h.transport);
        script_registration(&h.transport);
        h.transport
            .ok("<imageId>ami-us</imageId>")
            .ok("<imageId>ami-ap</imageId>")
            .ok("<imageState>pending</imageState>")
            .ok("<imageState>available</imageState>")
            .ok("<imageState>available</imageState>")
            .ok("<return>true</return>")
            .ok("<return>true</return>")
            .ok("<return>true</return>");

        let images = h.provisioner.run(&h.job).await.unwrap();

        let pairs: Vec<(String, String)> = images
            .iter()
            .map(|(r, id)| (r.to_string(), id.to_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("us-east-1".to_owned(), "ami-us".to_owned()),
                ("eu-west-1".to_owned(), "ami-home".to_owned()),
                ("ap-south-1".to_owned(), "ami-ap".to_owned()),
            ]
        );

        let tail: Vec<String> = h
            .transport
            .requests()
            .iter()
            .skip(HOME_IMAGE_CALLS)
            .map(|r| format!("{} {}", r.label(), r.host))
            .collect();
        assert_eq!(
            tail,
            vec![
                "CopyImage ec2.us-east-1.amazonaws.com",
                "CopyImage ec2.ap-south-1.amazonaws.com",
                "DescribeImages ec2.us-east-1.amazonaws.com",
                "DescribeImages ec2.us-east-1.amazonaws.com",
                "DescribeImages ec2.ap-south-1.amazonaws.com",
                "ModifyImageAttribute ec2.us-east-1.amazonaws.com",
                "ModifyImageAttribute ec2.eu-west-1.amazonaws.com",
                "ModifyImageAttribute ec2.ap-south-1.amazonaws.com",
            ]
        );

        let output = h.output.contents();
        assert!(
            output.contains("Copying AMI to regions: us-east-1 ap-south-1.\n")
        );
        assert!(
            output.contains("Waiting for AMI copying to us-east-1.... done.\n")
        );
        assert!(
            output.contains("Waiting for AMI copying to ap-south-1... done.\n")
        );
        assert!(output.ends_with("Marking images as public... done.\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_keep_home_region_missing_from_region_list() {
        let mut h = harness(true, false);
        h.job.region = Region::new("eu-central-2");
        script_home_image(&h.transport);
        script_registration(&h.transport);
        h.transport
            .ok("<imageId>ami-us</imageId>")
            .ok("<imageId>ami-eu</imageId>")
            .ok("<imageId>ami-ap</imageId>")
            .ok("<imageState>available</imageState>")
            .ok("<imageState>available</imageState>")
            .ok("<imageState>available</imageState>");
        for _ in 0..4 {
            h.transport.ok("<return>true</return>");
        }

        let images = h.provisioner.run(&h.job).await.unwrap();

        let regions: Vec<&str> = images.iter().map(|(r, _)| r.as_str()).collect();
        assert_eq!(
            regions,
            vec!["eu-central-2", "us-east-1", "eu-west-1", "ap-south-1"]
        );
        assert_eq!(images.iter().next().map(|(_, id)| id), Some("ami-home"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_stop_before_upload_when_region_discovery_fails() {
        let mut h = harness(false, false);
        for _ in 0..3 {
            h.transport.fail("HTTP/1.1 403 Forbidden");
        }

        let result = h.provisioner.run(&h.job).await;

        assert!(matches!(
            result,
            Err(PipelineError::Request {
                operation: "DescribeRegions",
                ..
            })
        ));
        assert!(h.transport.labels().iter().all(|l| l == "DescribeRegions"));
    }
}
