//! Region and service endpoint definitions.

use std::fmt;

use crate::error::{CoreError, CoreResult};

/// AWS Region identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Region(String);

impl Region {
    /// The region whose storage endpoint is not regionalized.
    pub const US_EAST_1: &str = "us-east-1";

    /// Create a new region.
    #[must_use]
    pub fn new(region: impl Into<String>) -> Self {
        Self(region.into())
    }

    /// Get the region as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extract the region from an SNS topic ARN.
    ///
    /// Topic ARNs have the shape `arn:<partition>:sns:<region>:<account>:<name>`.
    ///
    /// # Examples
    ///
    /// ```
    /// use amiforge_core::Region;
    ///
    /// let region = Region::from_topic_arn("arn:aws:sns:eu-west-1:123456789012:releases").unwrap();
    /// assert_eq!(region.as_str(), "eu-west-1");
    /// ```
    pub fn from_topic_arn(arn: &str) -> CoreResult<Self> {
        let mut fields = arn.splitn(6, ':');
        let prefix = fields.next();
        let _partition = fields.next();
        let service = fields.next();
        let region = fields.next();

        match (prefix, service, region, fields.next()) {
            (Some("arn"), Some("sns"), Some(region), Some(_)) if !region.is_empty() => {
                Ok(Self::new(region))
            }
            _ => Err(CoreError::InvalidTopicArn(arn.to_owned())),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The remote services driven by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// Object storage (S3).
    Storage,
    /// Compute provisioning (EC2).
    Compute,
    /// Notifications (SNS).
    Notification,
}

impl Service {
    /// The service name used in the SigV4 credential scope.
    #[must_use]
    pub fn signing_name(self) -> &'static str {
        match self {
            Self::Storage => "s3",
            Self::Compute => "ec2",
            Self::Notification => "sns",
        }
    }

    /// The hostname to connect to for this service in `region`.
    ///
    /// # Examples
    ///
    /// ```
    /// use amiforge_core::{Region, Service};
    ///
    /// assert_eq!(Service::Storage.endpoint(&Region::new("us-east-1")), "s3.amazonaws.com");
    /// assert_eq!(Service::Compute.endpoint(&Region::new("eu-west-1")), "ec2.eu-west-1.amazonaws.com");
    /// ```
    #[must_use]
    pub fn endpoint(self, region: &Region) -> String {
        match self {
            Self::Storage if region.as_str() == Region::US_EAST_1 => "s3.amazonaws.com".to_owned(),
            _ => format!("{}.{}.amazonaws.com", self.signing_name(), region),
        }
    }

    /// The virtual-hosted-style storage hostname for `bucket`.
    #[must_use]
    pub fn bucket_host(bucket: &str) -> String {
        format!("{bucket}.s3.amazonaws.com")
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.signing_name())
    }
}
