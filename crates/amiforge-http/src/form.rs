//! Form-encoded API request bodies.

use std::fmt;

use amiforge_auth::canonical::uri_encode;

/// An `application/x-www-form-urlencoded` API body.
///
/// `Action` is always first and `Version` always last; parameters in between
/// keep insertion order. Keys and values are percent-encoded with the
/// RFC 3986 unreserved set.
///
/// # Examples
///
/// ```
/// use amiforge_http::FormBody;
///
/// let form = FormBody::new("DescribeImages", "2014-09-01").param("ImageId.1", "ami-1");
/// assert_eq!(form.encode(), "Action=DescribeImages&ImageId.1=ami-1&Version=2014-09-01");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormBody {
    action: String,
    version: String,
    params: Vec<(String, String)>,
}

impl FormBody {
    /// Start a body for `action` at API `version`.
    #[must_use]
    pub fn new(action: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            version: version.into(),
            params: Vec::new(),
        }
    }

    /// Append a parameter.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Append a parameter only when `enabled`.
    #[must_use]
    pub fn param_if(self, enabled: bool, key: impl Into<String>, value: impl Into<String>) -> Self {
        if enabled { self.param(key, value) } else { self }
    }

    /// The API action name.
    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Serialize to the wire form.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut out = format!("Action={}", uri_encode(&self.action));
        for (key, value) in &self.params {
            out.push('&');
            out.push_str(&uri_encode(key));
            out.push('=');
            out.push_str(&uri_encode(value));
        }
        out.push_str("&Version=");
        out.push_str(&uri_encode(&self.version));
        out
    }
}

impl fmt::Display for FormBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
