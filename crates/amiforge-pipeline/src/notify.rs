//! Release notifications.
//!
//! After a public release, subscribers of a notification topic are told
//! which image was created in which region. The message is a JSON document
//! keyed by format version:
//!
//! ```json
//! {
//!   "v1": {
//!     "ReleaseVersion": "14.1-RELEASE",
//!     "ImageVersion": "1",
//!     "Regions": {
//!       "us-east-1": [{ "Name": "FreeBSD 14.1", "ImageId": "ami-..." }]
//!     }
//!   }
//! }
//! ```

use amiforge_core::{Region, Service};
use amiforge_http::{AwsClient, FormBody};
use amiforge_xml::extract_text;
use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};
use tracing::info;

use crate::error::{PipelineError, PipelineResult};
use crate::provision::RegionImageSet;

/// API version of the notification service.
pub const SNS_API_VERSION: &str = "2010-03-31";

const PUBLISH: &str = "Publish";

/// Where and what to announce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Topic ARN, `arn:<partition>:sns:<region>:<account>:<name>`.
    pub topic_arn: String,
    /// Release the images belong to.
    pub release_version: String,
    /// Version of the image build.
    pub image_version: String,
}

impl Notification {
    /// Subject line of the published message.
    #[must_use]
    pub fn subject(&self) -> String {
        format!("New {} AMIs", self.release_version)
    }

    /// Render the message body for `images` registered under `image_name`.
    pub fn message(&self, image_name: &str, images: &RegionImageSet) -> PipelineResult<String> {
        let envelope = Envelope {
            v1: Payload {
                release_version: &self.release_version,
                image_version: &self.image_version,
                regions: RegionEntries { image_name, images },
            },
        };
        Ok(serde_json::to_string_pretty(&envelope)?)
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    v1: Payload<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Payload<'a> {
    release_version: &'a str,
    image_version: &'a str,
    regions: RegionEntries<'a>,
}

/// Serializes as a map in region-list order.
struct RegionEntries<'a> {
    image_name: &'a str,
    images: &'a RegionImageSet,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ImageEntry<'a> {
    name: &'a str,
    image_id: &'a str,
}

impl Serialize for RegionEntries<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.images.len()))?;
        for (region, image_id) in self.images.iter() {
            let entry = ImageEntry {
                name: self.image_name,
                image_id,
            };
            map.serialize_entry(region.as_str(), &[entry])?;
        }
        map.end()
    }
}

/// Publishes release notifications.
#[derive(Debug)]
pub struct NotificationPublisher<'a> {
    client: &'a AwsClient,
}

impl<'a> NotificationPublisher<'a> {
    /// Publish through `client`.
    #[must_use]
    pub fn new(client: &'a AwsClient) -> Self {
        Self { client }
    }

    /// Publish `notification` for `images` and return the message ID.
    ///
    /// The call is signed for the region named in the topic ARN and made
    /// once.
    pub async fn publish(
        &self,
        notification: &Notification,
        image_name: &str,
        images: &RegionImageSet,
    ) -> PipelineResult<String> {
        let region = Region::from_topic_arn(&notification.topic_arn)?;
        let form = FormBody::new(PUBLISH, SNS_API_VERSION)
            .param("Message", notification.message(image_name, images)?)
            .param("Subject", notification.subject())
            .param("TopicArn", notification.topic_arn.as_str());

        let body = self
            .client
            .call(Service::Notification, &region, &form)
            .await
            .map_err(PipelineError::request(PUBLISH))?;
        let message_id =
            extract_text(&body, "MessageId")?.ok_or_else(|| PipelineError::MissingField {
                operation: PUBLISH,
                field: "MessageId",
                body: body.clone(),
            })?;

        info!(topic = %notification.topic_arn, %message_id, "notification published");
        Ok(message_id)
    }
}
