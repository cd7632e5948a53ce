//! Compute (EC2) API actions used by the pipeline.
//!
//! Each action builds its form body, issues it through [`AwsClient`], and
//! pulls the fields it needs out of the response. Status queries and
//! attribute changes retry; resource-creating calls make a single attempt so
//! a lost response never creates a duplicate resource.

use std::fmt;

use amiforge_core::{Region, Service};
use amiforge_http::{AwsClient, FormBody};
use amiforge_xml::{contains_element, extract_all, extract_first, extract_text};
use tracing::debug;
use typed_builder::TypedBuilder;

use crate::error::{PipelineError, PipelineResult};

/// API version used for every action except image registration.
pub const API_VERSION: &str = "2014-09-01";

/// API version used by `RegisterImage`, the first that accepts `EnaSupport`.
pub const REGISTER_IMAGE_VERSION: &str = "2016-11-15";

const DESCRIBE_REGIONS: &str = "DescribeRegions";
const IMPORT_VOLUME: &str = "ImportVolume";
const DESCRIBE_CONVERSION_TASKS: &str = "DescribeConversionTasks";
const CREATE_SNAPSHOT: &str = "CreateSnapshot";
const DESCRIBE_SNAPSHOTS: &str = "DescribeSnapshots";
const DELETE_VOLUME: &str = "DeleteVolume";
const MODIFY_SNAPSHOT_ATTRIBUTE: &str = "ModifySnapshotAttribute";
const REGISTER_IMAGE: &str = "RegisterImage";
const DESCRIBE_IMAGES: &str = "DescribeImages";
const COPY_IMAGE: &str = "CopyImage";
const MODIFY_IMAGE_ATTRIBUTE: &str = "ModifyImageAttribute";

const ROOT_DEVICE: &str = "/dev/sda1";
const ROOT_VOLUME_TYPE: &str = "gp2";
const ROOT_VOLUME_SIZE_GIB: u32 = 10;
const EPHEMERAL_DEVICES: [&str; 4] = ["/dev/sdb", "/dev/sdc", "/dev/sdd", "/dev/sde"];

/// CPU architecture of the registered image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Architecture {
    /// 64-bit x86.
    #[default]
    X86_64,
    /// 64-bit ARM.
    Arm64,
}

impl Architecture {
    /// The API value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Arm64 => "arm64",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration attributes of the image.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct ImageSpec {
    /// Image name.
    #[builder(setter(into))]
    pub name: String,
    /// Image description.
    #[builder(setter(into))]
    pub description: String,
    /// CPU architecture.
    #[builder(default)]
    pub architecture: Architecture,
    /// Enable SR-IOV enhanced networking.
    #[builder(default)]
    pub sriov: bool,
    /// Enable ENA enhanced networking.
    #[builder(default)]
    pub ena: bool,
}

/// Outcome of one conversion-task poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionStatus {
    /// The volume exists and the task is no longer active.
    Completed {
        /// ID of the imported volume.
        volume_id: String,
    },
    /// The task is still running.
    InProgress {
        /// The service's current status message.
        message: String,
    },
}

impl ConversionStatus {
    /// Interpret a `DescribeConversionTasks` response body.
    ///
    /// The task is complete once the body no longer reports
    /// `<state>active</state>` and its `<volume>` carries an `<id>`.
    /// Cancelled tasks are an error.
    ///
    /// # Errors
    ///
    /// Fails if the task was cancelled, or if `<volume>` or (while the task
    /// is running) `<statusMessage>` is missing.
    pub fn parse(body: &str) -> PipelineResult<Self> {
        if contains_element(body, "state", "cancelled")
            || contains_element(body, "state", "cancelling")
        {
            return Err(PipelineError::UnexpectedStatus {
                operation: DESCRIBE_CONVERSION_TASKS,
                status: extract_text(body, "state")?.unwrap_or_default(),
            });
        }

        let volume = extract_first(body, "volume")?
            .ok_or_else(|| missing(DESCRIBE_CONVERSION_TASKS, "volume", body))?;

        if !contains_element(body, "state", "active") {
            if let Some(volume_id) = extract_text(volume, "id")?.filter(|id| !id.is_empty()) {
                return Ok(Self::Completed { volume_id });
            }
        }

        let message = extract_text(body, "statusMessage")?
            .ok_or_else(|| missing(DESCRIBE_CONVERSION_TASKS, "statusMessage", body))?;
        Ok(Self::InProgress { message })
    }
}

/// Outcome of one snapshot or image poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Not ready yet.
    Pending,
    /// Ready.
    Ready,
}

/// Compute API bound to a signed client.
#[derive(Debug, Clone)]
pub struct ComputeApi {
    client: AwsClient,
}

impl ComputeApi {
    /// Wrap `client`.
    #[must_use]
    pub fn new(client: AwsClient) -> Self {
        Self { client }
    }

    /// The underlying client.
    #[must_use]
    pub fn client(&self) -> &AwsClient {
        &self.client
    }

    async fn call(
        &self,
        region: &Region,
        form: &FormBody,
        operation: &'static str,
    ) -> PipelineResult<String> {
        self.client
            .call(Service::Compute, region, form)
            .await
            .map_err(PipelineError::request(operation))
    }

    async fn call_with_retry(
        &self,
        region: &Region,
        form: &FormBody,
        operation: &'static str,
    ) -> PipelineResult<String> {
        self.client
            .call_with_retry(Service::Compute, region, form)
            .await
            .map_err(PipelineError::request(operation))
    }

    /// List every region visible from `region`, in response order.
    pub async fn describe_regions(&self, region: &Region) -> PipelineResult<Vec<Region>> {
        let form = FormBody::new(DESCRIBE_REGIONS, API_VERSION);
        let body = self.call_with_retry(region, &form, DESCRIBE_REGIONS).await?;

        let region_info = extract_first(&body, "regionInfo")?
            .ok_or_else(|| missing(DESCRIBE_REGIONS, "regionInfo", &body))?;
        let regions: Vec<Region> = extract_all(region_info, "regionName")?
            .into_iter()
            .map(|name| Region::new(name.trim()))
            .collect();

        if regions.is_empty() {
            return Err(PipelineError::NoRegions(body));
        }
        debug!(count = regions.len(), "discovered regions");
        Ok(regions)
    }

    /// Start importing the manifest at `manifest_url` as a new volume.
    ///
    /// Returns the conversion task ID.
    pub async fn import_volume(
        &self,
        region: &Region,
        manifest_url: &str,
        size: u64,
        volume_size_gib: u64,
    ) -> PipelineResult<String> {
        let form = FormBody::new(IMPORT_VOLUME, API_VERSION)
            .param("AvailabilityZone", format!("{region}a"))
            .param("Image.Format", "RAW")
            .param("Image.Bytes", size.to_string())
            .param("Image.ImportManifestUrl", manifest_url)
            .param("Volume.Size", volume_size_gib.to_string());
        let body = self.call(region, &form, IMPORT_VOLUME).await?;
        required(IMPORT_VOLUME, "conversionTaskId", &body)
    }

    /// Poll a conversion task once.
    pub async fn describe_conversion_task(
        &self,
        region: &Region,
        task_id: &str,
    ) -> PipelineResult<ConversionStatus> {
        let form = FormBody::new(DESCRIBE_CONVERSION_TASKS, API_VERSION)
            .param("ConversionTaskId.1", task_id);
        let body = self
            .call_with_retry(region, &form, DESCRIBE_CONVERSION_TASKS)
            .await?;
        ConversionStatus::parse(&body)
    }

    /// Snapshot `volume_id`. Returns the snapshot ID.
    pub async fn create_snapshot(
        &self,
        region: &Region,
        volume_id: &str,
    ) -> PipelineResult<String> {
        let form =
            FormBody::new(CREATE_SNAPSHOT, API_VERSION).param("VolumeId", volume_id);
        let body = self.call(region, &form, CREATE_SNAPSHOT).await?;
        required(CREATE_SNAPSHOT, "snapshotId", &body)
    }

    /// Poll a snapshot once. `error` or any unknown status fails.
    pub async fn snapshot_state(
        &self,
        region: &Region,
        snapshot_id: &str,
    ) -> PipelineResult<PollState> {
        let form = FormBody::new(DESCRIBE_SNAPSHOTS, API_VERSION)
            .param("SnapshotId.1", snapshot_id);
        let body = self.call_with_retry(region, &form, DESCRIBE_SNAPSHOTS).await?;
        let status = required(DESCRIBE_SNAPSHOTS, "status", &body)?;
        poll_state(DESCRIBE_SNAPSHOTS, status, "completed")
    }

    /// Delete a volume that is no longer needed.
    pub async fn delete_volume(&self, region: &Region, volume_id: &str) -> PipelineResult<()> {
        let form =
            FormBody::new(DELETE_VOLUME, API_VERSION).param("VolumeId", volume_id);
        let body = self.call(region, &form, DELETE_VOLUME).await?;
        expect_true(DELETE_VOLUME, body)
    }

    /// Allow every account to create volumes from `snapshot_id`.
    pub async fn make_snapshot_public(
        &self,
        region: &Region,
        snapshot_id: &str,
    ) -> PipelineResult<()> {
        let form = FormBody::new(MODIFY_SNAPSHOT_ATTRIBUTE, API_VERSION)
            .param("SnapshotId", snapshot_id)
            .param("CreateVolumePermission.Add.1.Group", "all");
        let body = self
            .call_with_retry(region, &form, MODIFY_SNAPSHOT_ATTRIBUTE)
            .await?;
        expect_true(MODIFY_SNAPSHOT_ATTRIBUTE, body)
    }

    /// Register an HVM image rooted on `snapshot_id`. Returns the image ID.
    pub async fn register_image(
        &self,
        region: &Region,
        snapshot_id: &str,
        spec: &ImageSpec,
    ) -> PipelineResult<String> {
        let form = register_image_form(snapshot_id, spec);
        let body = self.call(region, &form, REGISTER_IMAGE).await?;
        required(REGISTER_IMAGE, "imageId", &body)
    }

    /// Poll an image once. Anything but `pending` or `available` fails.
    pub async fn image_state(&self, region: &Region, image_id: &str) -> PipelineResult<PollState> {
        let form =
            FormBody::new(DESCRIBE_IMAGES, API_VERSION).param("ImageId.1", image_id);
        let body = self.call_with_retry(region, &form, DESCRIBE_IMAGES).await?;
        let state = required(DESCRIBE_IMAGES, "imageState", &body)?;
        poll_state(DESCRIBE_IMAGES, state, "available")
    }

    /// Copy `image_id` from `source` into `destination`.
    ///
    /// The call is sent to the destination region. Returns the new image ID.
    pub async fn copy_image(
        &self,
        source: &Region,
        image_id: &str,
        destination: &Region,
    ) -> PipelineResult<String> {
        let form = FormBody::new(COPY_IMAGE, API_VERSION)
            .param("SourceRegion", source.as_str())
            .param("SourceImageId", image_id);
        let body = self.call(destination, &form, COPY_IMAGE).await?;
        required(COPY_IMAGE, "imageId", &body)
    }

    /// Allow every account to launch `image_id`.
    pub async fn make_image_public(&self, region: &Region, image_id: &str) -> PipelineResult<()> {
        let form = FormBody::new(MODIFY_IMAGE_ATTRIBUTE, API_VERSION)
            .param("ImageId", image_id)
            .param("LaunchPermission.Add.1.Group", "all");
        let body = self
            .call_with_retry(region, &form, MODIFY_IMAGE_ATTRIBUTE)
            .await?;
        expect_true(MODIFY_IMAGE_ATTRIBUTE, body)
    }
}

fn register_image_form(snapshot_id: &str, spec: &ImageSpec) -> FormBody {
    let mut form = FormBody::new(REGISTER_IMAGE, REGISTER_IMAGE_VERSION)
        .param("Name", spec.name.as_str())
        .param("Description", spec.description.as_str())
        .param("Architecture", spec.architecture.as_str())
        .param("RootDeviceName", ROOT_DEVICE)
        .param("VirtualizationType", "hvm")
        .param_if(spec.sriov, "SriovNetSupport", "simple")
        .param_if(spec.ena, "EnaSupport", "true")
        .param("BlockDeviceMapping.1.DeviceName", ROOT_DEVICE)
        .param("BlockDeviceMapping.1.Ebs.SnapshotId", snapshot_id)
        .param("BlockDeviceMapping.1.Ebs.VolumeType", ROOT_VOLUME_TYPE)
        .param(
            "BlockDeviceMapping.1.Ebs.VolumeSize",
            ROOT_VOLUME_SIZE_GIB.to_string(),
        );

    for (i, device) in EPHEMERAL_DEVICES.iter().enumerate() {
        let n = i + 2;
        form = form
            .param(format!("BlockDeviceMapping.{n}.DeviceName"), *device)
            .param(
                format!("BlockDeviceMapping.{n}.VirtualName"),
                format!("ephemeral{i}"),
            );
    }
    form
}

fn missing(operation: &'static str, field: &'static str, body: &str) -> PipelineError {
    PipelineError::MissingField {
        operation,
        field,
        body: body.to_owned(),
    }
}

fn required(operation: &'static str, field: &'static str, body: &str) -> PipelineResult<String> {
    extract_text(body, field)?.ok_or_else(|| missing(operation, field, body))
}

fn expect_true(operation: &'static str, body: String) -> PipelineResult<()> {
    if contains_element(&body, "return", "true") {
        Ok(())
    } else {
        Err(PipelineError::OperationFailed { operation, body })
    }
}

fn poll_state(operation: &'static str, status: String, ready: &str) -> PipelineResult<PollState> {
    match status.as_str() {
        "pending" => Ok(PollState::Pending),
        s if s == ready => Ok(PollState::Ready),
        _ => Err(PipelineError::UnexpectedStatus { operation, status }),
    }
}
