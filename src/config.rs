use std::env;
use std::time::Duration;

use serde::Deserialize;

use crate::lifetime::parse_lifetime;
use crate::resolver::{ResolverOptions, DEFAULT_FETCH_TIMEOUT, DEFAULT_WALK_DEADLINE};
use crate::{Error, Result};

pub const SIGN_CERTIFICATE_URL_VAR: &str = "SignCertificateUrl";
pub const TOKEN_LIFETIME_VAR: &str = "TokenLifetime";
pub const FETCH_TIMEOUT_VAR: &str = "RDG_FETCH_TIMEOUT_SECS";
pub const WALK_DEADLINE_VAR: &str = "RDG_WALK_DEADLINE_SECS";
pub const CERTIFICATE_TTL_VAR: &str = "RDG_CERTIFICATE_TTL_SECS";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenConfig {
    /// Key vault secret holding the signing certificate envelope. Passed through unmodified.
    pub sign_certificate_url: String,
    /// Token lifetime in `[d.]hh:mm[:ss[.fffffff]]` notation. One minute when absent or empty.
    #[serde(default)]
    pub token_lifetime: Option<String>,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_walk_deadline_secs")]
    pub walk_deadline_secs: u64,
    /// Reload the certificate after this many seconds. Kept for the process lifetime when absent.
    #[serde(default)]
    pub certificate_ttl_secs: Option<u64>,
}

fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT.as_secs()
}

fn default_walk_deadline_secs() -> u64 {
    DEFAULT_WALK_DEADLINE.as_secs()
}

impl TokenConfig {
    pub fn new(sign_certificate_url: impl Into<String>) -> Self {
        Self {
            sign_certificate_url: sign_certificate_url.into(),
            token_lifetime: None,
            fetch_timeout_secs: default_fetch_timeout_secs(),
            walk_deadline_secs: default_walk_deadline_secs(),
            certificate_ttl_secs: None,
        }
    }

    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which returns the value of a variable if set.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let sign_certificate_url = lookup(SIGN_CERTIFICATE_URL_VAR)
            .filter(|url| !url.is_empty())
            .ok_or(Error::MissingConfigValue(SIGN_CERTIFICATE_URL_VAR))?;

        let seconds = |name: &'static str| -> Result<Option<u64>> {
            lookup(name)
                .map(|value| {
                    value
                        .trim()
                        .parse()
                        .map_err(|_| Error::InvalidConfigValue { name, value })
                })
                .transpose()
        };

        let config = Self {
            sign_certificate_url,
            token_lifetime: lookup(TOKEN_LIFETIME_VAR),
            fetch_timeout_secs: seconds(FETCH_TIMEOUT_VAR)?.unwrap_or_else(default_fetch_timeout_secs),
            walk_deadline_secs: seconds(WALK_DEADLINE_VAR)?.unwrap_or_else(default_walk_deadline_secs),
            certificate_ttl_secs: seconds(CERTIFICATE_TTL_VAR)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Rejects a present but unparsable lifetime and zero timeouts.
    pub fn validate(&self) -> Result<()> {
        if self.sign_certificate_url.is_empty() {
            return Err(Error::MissingConfigValue(SIGN_CERTIFICATE_URL_VAR));
        }

        if let Some(lifetime) = self.token_lifetime.as_deref().filter(|lifetime| !lifetime.is_empty()) {
            parse_lifetime(lifetime)?;
        }

        for (name, value) in [
            (FETCH_TIMEOUT_VAR, self.fetch_timeout_secs),
            (WALK_DEADLINE_VAR, self.walk_deadline_secs),
        ] {
            if value == 0 {
                return Err(Error::InvalidConfigValue {
                    name,
                    value: value.to_string(),
                });
            }
        }

        Ok(())
    }

    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            walk_deadline: Duration::from_secs(self.walk_deadline_secs),
        }
    }

    pub fn certificate_ttl(&self) -> Option<Duration> {
        self.certificate_ttl_secs.map(Duration::from_secs)
    }
}
