//! Machine token construction and signing.
//!
//! ```text
//! Host={host}&Port={port}&ExpiresOn={posix seconds}&Signature=1|SHA256|{thumbprint}|{escaped base64 signature}
//! ```
//!
//! The signature covers the ASCII bytes of everything before `&Signature=`.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use time::OffsetDateTime;

use crate::certificate::SigningCertificate;
use crate::lifetime::compute_expiry;
use crate::resolver::Endpoint;
use crate::utils::escape_data_string;
use crate::{Error, Result};

/// Version of the signature field layout.
pub const SIGNATURE_FORMAT_VERSION: u8 = 1;
/// Name of the digest algorithm announced in the signature field.
pub const SIGNATURE_DIGEST_NAME: &str = "SHA256";

const SIGNATURE_FIELD: &str = "&Signature=";

/// Canonical unsigned token: the exact text that gets signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineToken {
    value: String,
    endpoint: Endpoint,
    expires_on: i64,
}

impl MachineToken {
    pub fn new(endpoint: &Endpoint, expires_on: i64) -> Self {
        Self {
            value: format!(
                "Host={}&Port={}&ExpiresOn={}",
                endpoint.host(),
                endpoint.port(),
                expires_on
            ),
            endpoint: endpoint.clone(),
            expires_on,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn expires_on(&self) -> i64 {
        self.expires_on
    }
}

impl fmt::Display for MachineToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Machine token followed by its signature field. Self-contained; nothing is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedToken {
    value: String,
    machine_token_len: usize,
    expires_on: i64,
}

impl SignedToken {
    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn into_string(self) -> String {
        self.value
    }

    /// The signed part of the token.
    pub fn machine_token(&self) -> &str {
        &self.value[..self.machine_token_len]
    }

    pub fn expires_on(&self) -> i64 {
        self.expires_on
    }
}

impl fmt::Display for SignedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Signs machine tokens with the configured lifetime.
#[derive(Debug, Clone, Default)]
pub struct TokenSigner {
    lifetime: Option<String>,
}

impl TokenSigner {
    /// `lifetime` uses the `[d.]hh:mm[:ss[.fffffff]]` notation; `None` means one minute.
    pub fn new(lifetime: Option<String>) -> Self {
        Self { lifetime }
    }

    pub fn lifetime(&self) -> Option<&str> {
        self.lifetime.as_deref()
    }

    pub fn sign(&self, certificate: &SigningCertificate, endpoint: &Endpoint) -> Result<SignedToken> {
        self.sign_at(certificate, endpoint, OffsetDateTime::now_utc())
    }

    #[instrument(level = "debug", skip_all, fields(endpoint = %endpoint, thumbprint = certificate.thumbprint()))]
    pub fn sign_at(
        &self,
        certificate: &SigningCertificate,
        endpoint: &Endpoint,
        now: OffsetDateTime,
    ) -> Result<SignedToken> {
        let expires_on = compute_expiry(now, self.lifetime.as_deref())?;
        let machine_token = MachineToken::new(endpoint, expires_on);

        let signed_token = sign_machine_token(certificate, &machine_token)?;

        debug!(expires_on, "Signed machine token");

        Ok(signed_token)
    }
}

/// Signs `machine_token` with RSASSA-PKCS1-v1_5 / SHA-256.
///
/// Only ASCII text can be signed: the verifier reads the token as single-byte text.
pub fn sign_machine_token(certificate: &SigningCertificate, machine_token: &MachineToken) -> Result<SignedToken> {
    let text = machine_token.as_str();

    if !text.is_ascii() {
        return Err(Error::NonAsciiToken {
            host: machine_token.endpoint().host().to_owned(),
        });
    }

    let signature = certificate.sign_sha256(text.as_bytes())?;
    let signature = escape_data_string(&STANDARD.encode(signature));

    let value = format!(
        "{text}{SIGNATURE_FIELD}{SIGNATURE_FORMAT_VERSION}|{SIGNATURE_DIGEST_NAME}|{}|{signature}",
        certificate.thumbprint()
    );

    Ok(SignedToken {
        value,
        machine_token_len: text.len(),
        expires_on: machine_token.expires_on(),
    })
}
