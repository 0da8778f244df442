use std::time::Duration;

use thiserror::Error;

/// Coarse classification of [`Error`] values.
///
/// Every kind is terminal for the request that produced it: nothing in this crate retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A required resource fetch failed, timed out or returned a malformed document.
    UpstreamLookup,
    /// The resource walk completed without finding an inbound NAT rule for the RDP port.
    EndpointNotFound,
    /// A configuration value is present but invalid.
    Configuration,
    /// The signing certificate could not be loaded or the signature operation failed.
    Signing,
    /// The caller supplied an invalid request parameter.
    InvalidRequest,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to fetch resource '{resource_id}': {reason}")]
    UpstreamLookup { resource_id: String, reason: String },

    #[error("resource '{resource_id}' is malformed: {source}")]
    MalformedResource {
        resource_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("resource '{resource_id}' is missing the {field} value")]
    MissingField { resource_id: String, field: &'static str },

    #[error("timed out after {timeout:?} while resolving '{resource_id}'")]
    UpstreamTimeout { resource_id: String, timeout: Duration },

    #[error("could not resolve RDP end point for virtual machine '{0}'")]
    EndpointNotFound(String),

    #[error("failed to parse token lifetime '{value}' from configuration: {reason}")]
    InvalidLifetime { value: String, reason: &'static str },

    #[error("invalid {name} value '{value}' in configuration")]
    InvalidConfigValue { name: &'static str, value: String },

    #[error("missing {0} value in configuration")]
    MissingConfigValue(&'static str),

    #[error("failed to load certificate from key vault by URL '{url}': {reason}")]
    CertificateLoad { url: String, reason: String },

    #[error("invalid signing certificate: {0}")]
    InvalidCertificate(String),

    #[error("signing certificate has no usable RSA private key: {0}")]
    MissingPrivateKey(String),

    #[error("machine token for host '{host}' contains non-ASCII characters")]
    NonAsciiToken { host: String },

    #[error("failed to sign machine token: {0}")]
    Signature(String),

    #[error("missing or invalid user id '{0}'")]
    InvalidUserId(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UpstreamLookup { .. }
            | Error::MalformedResource { .. }
            | Error::MissingField { .. }
            | Error::UpstreamTimeout { .. } => ErrorKind::UpstreamLookup,
            Error::EndpointNotFound(_) => ErrorKind::EndpointNotFound,
            Error::InvalidLifetime { .. } | Error::InvalidConfigValue { .. } | Error::MissingConfigValue(_) => {
                ErrorKind::Configuration
            }
            Error::CertificateLoad { .. }
            | Error::InvalidCertificate(_)
            | Error::MissingPrivateKey(_)
            | Error::NonAsciiToken { .. }
            | Error::Signature(_) => ErrorKind::Signing,
            Error::InvalidUserId(_) => ErrorKind::InvalidRequest,
        }
    }

    #[cfg_attr(not(feature = "network_client"), allow(dead_code))]
    pub(crate) fn upstream(resource_id: impl ToString, reason: impl ToString) -> Self {
        Error::UpstreamLookup {
            resource_id: resource_id.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
