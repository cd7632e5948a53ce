//! amiforge - publish a raw disk image as an EC2 machine image.
//!
//! Uploads the image to a staging bucket, imports it as a volume, snapshots
//! it, and registers an image in the home region. With `--public` the image
//! is copied to every region and made public in all of them.
//!
//! # Usage
//!
//! ```text
//! amiforge [--public] [--publicsnap] [--sriov] [--ena] [--arm64]
//!     <disk image> <name> <description> <region> <bucket> <key file>
//!     [<topic arn> <release version> <image version>]
//! ```
//!
//! Flags may also follow the positional arguments.
//!
//! One `Created AMI in <region> region: <id>` line per region is written to
//! standard output. Progress and diagnostics go to standard error. The
//! notification arguments only take effect together with `--public`.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `AMIFORGE_PART_SIZE` | `10485760` | Upload part size in bytes |
//! | `AMIFORGE_POLL_INTERVAL_SECS` | `10` | Delay between status polls |
//! | `AMIFORGE_MAX_ATTEMPTS` | `10` | Attempts per retried request |
//! | `AMIFORGE_IO_TIMEOUT_SECS` | `60` | Per-request I/O timeout |
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use amiforge_core::{Credentials, PipelineConfig, Region};
use amiforge_http::{AwsClient, TlsTransport};
use amiforge_pipeline::{
    Architecture, ImageJob, ImageSpec, Notification, NotificationPublisher, Progress, Provisioner,
};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "amiforge")]
#[command(about = "Upload a raw disk image and publish it as an EC2 machine image")]
#[command(version)]
struct Cli {
    /// Copy the image to every region and make all copies public
    #[arg(long)]
    public: bool,

    /// Make the root snapshot public
    #[arg(long)]
    publicsnap: bool,

    /// Enable SR-IOV enhanced networking
    #[arg(long)]
    sriov: bool,

    /// Enable ENA enhanced networking
    #[arg(long)]
    ena: bool,

    /// Register an arm64 image instead of x86_64
    #[arg(long)]
    arm64: bool,

    /// Raw disk image to upload
    disk_image: PathBuf,

    /// Image name
    name: String,

    /// Image description
    description: String,

    /// Region to build the image in
    region: String,

    /// Bucket that stages the upload
    bucket: String,

    /// File holding ACCESS_KEY_ID and ACCESS_KEY_SECRET lines
    key_file: PathBuf,

    /// Notification topic to announce the images on
    #[arg(requires_all = ["release_version", "image_version"])]
    topic_arn: Option<String>,

    /// Release version reported in the notification
    #[arg(requires = "image_version")]
    release_version: Option<String>,

    /// Image version reported in the notification
    image_version: Option<String>,
}

impl Cli {
    fn image_job(&self) -> ImageJob {
        let architecture = if self.arm64 {
            Architecture::Arm64
        } else {
            Architecture::X86_64
        };

        ImageJob::builder()
            .image_path(self.disk_image.clone())
            .region(Region::new(self.region.as_str()))
            .bucket(self.bucket.as_str())
            .image(
                ImageSpec::builder()
                    .name(self.name.as_str())
                    .description(self.description.as_str())
                    .architecture(architecture)
                    .sriov(self.sriov)
                    .ena(self.ena)
                    .build(),
            )
            .public(self.public)
            .public_snapshot(self.publicsnap)
            .build()
    }

    /// The release announcement, sent only for public images.
    fn notification(&self) -> Option<Notification> {
        if !self.public {
            return None;
        }
        match (&self.topic_arn, &self.release_version, &self.image_version) {
            (Some(topic_arn), Some(release_version), Some(image_version)) => Some(Notification {
                topic_arn: topic_arn.clone(),
                release_version: release_version.clone(),
                image_version: image_version.clone(),
            }),
            _ => None,
        }
    }
}

/// Initialize the tracing subscriber on standard error.
///
/// Uses `RUST_LOG` if set, otherwise falls back to the `LOG_LEVEL` config value.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = PipelineConfig::from_env();
    init_tracing(&config.log_level)?;

    let credentials = Credentials::from_key_file(&cli.key_file).context("cannot read AWS keys")?;
    let transport = TlsTransport::new(config.io_timeout()).context("cannot set up TLS")?;
    let client = AwsClient::new(Arc::new(transport), credentials, config.max_attempts);

    info!(
        image = %cli.disk_image.display(),
        region = %cli.region,
        bucket = %cli.bucket,
        public = cli.public,
        version = env!("CARGO_PKG_VERSION"),
        "starting amiforge",
    );

    let job = cli.image_job();
    let images = Provisioner::new(client.clone(), config, Progress::stderr())
        .run(&job)
        .await
        .context("failed to provision image")?;

    let mut stdout = std::io::stdout().lock();
    for (region, image_id) in images.iter() {
        writeln!(stdout, "Created AMI in {region} region: {image_id}")?;
    }
    stdout.flush()?;
    drop(stdout);

    if !cli.public && cli.topic_arn.is_some() {
        info!("image is private, release notification skipped");
    }
    if let Some(notification) = cli.notification() {
        let published = NotificationPublisher::new(&client)
            .publish(&notification, &cli.name, &images)
            .await;
        if let Err(err) = published {
            warn!(topic = %notification.topic_arn, error = %err, "notification not sent");
            eprintln!("Failed to send SNS notification: {err}");
        }
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}
