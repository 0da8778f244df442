//! Signing certificate loading and caching.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::RwLock;
use picky::key::PrivateKey;
use picky::pkcs12::{Pfx, Pkcs12CryptoContext, Pkcs12ParsingParams, SafeBagKind, SafeContentsKind};
use picky::x509::Cert;
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use serde::Deserialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::network_client::SecretClient;
use crate::secret::SecretPrivateKey;
use crate::utils::to_upper_hex;
use crate::{Error, Result, Secret};

/// JSON document stored (base64-encoded) in the certificate store.
#[derive(Deserialize)]
struct CertificateEnvelope {
    data: Secret<String>,
    password: Secret<String>,
}

/// Certificate and RSA private key used to sign machine tokens.
///
/// Immutable once loaded. Share it as `Arc<SigningCertificate>`.
#[derive(Clone)]
pub struct SigningCertificate {
    certificate: Cert,
    private_key: SecretPrivateKey,
    thumbprint: String,
}

impl SigningCertificate {
    /// Pairs `certificate` with its RSA `private_key`.
    ///
    /// Fails if the key is not an RSA key or does not belong to the certificate.
    pub fn new(certificate: Cert, private_key: &PrivateKey) -> Result<Self> {
        let private_key =
            RsaPrivateKey::try_from(private_key).map_err(|err| Error::MissingPrivateKey(err.to_string()))?;

        let certificate_key = RsaPublicKey::try_from(certificate.public_key())
            .map_err(|err| Error::InvalidCertificate(format!("certificate does not hold an RSA key: {err}")))?;

        if certificate_key != private_key.to_public_key() {
            return Err(Error::MissingPrivateKey(
                "private key does not match the certificate".to_owned(),
            ));
        }

        let der = certificate
            .to_der()
            .map_err(|err| Error::InvalidCertificate(err.to_string()))?;
        let thumbprint = to_upper_hex(&Sha1::digest(&der));

        Ok(Self {
            certificate,
            private_key: SecretPrivateKey::new(private_key),
            thumbprint,
        })
    }

    /// Parses a password-protected PKCS#12 archive.
    ///
    /// The certificate paired with the archive's private key is selected; CA certificates shipped
    /// alongside it are ignored.
    pub fn from_pkcs12(der: &[u8], password: &str) -> Result<Self> {
        let crypto_context = Pkcs12CryptoContext::new_with_password(password);
        let pfx = Pfx::from_der(der, &crypto_context, &Pkcs12ParsingParams::default())
            .map_err(|err| Error::InvalidCertificate(format!("failed to parse PKCS#12 archive: {err}")))?;

        let mut private_key = None;
        let mut certificates = Vec::new();

        for safe_contents in pfx.safe_contents() {
            let safe_bags = match safe_contents.kind() {
                SafeContentsKind::SafeBags(safe_bags) => safe_bags,
                SafeContentsKind::EncryptedSafeBags { safe_bags, .. } => safe_bags,
                _ => continue,
            };

            for safe_bag in safe_bags {
                match safe_bag.kind() {
                    SafeBagKind::PrivateKey(key) | SafeBagKind::EncryptedPrivateKey { key, .. } => {
                        private_key.get_or_insert(key);
                    }
                    SafeBagKind::Certificate(certificate) => certificates.push(certificate),
                    _ => {}
                }
            }
        }

        let private_key = private_key
            .ok_or_else(|| Error::MissingPrivateKey("PKCS#12 archive does not contain a private key".to_owned()))?;

        let mut last_error = None;

        for certificate in certificates {
            match Self::new(certificate.clone(), private_key) {
                Ok(signing_certificate) => return Ok(signing_certificate),
                Err(err) => last_error = Some(err),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::InvalidCertificate("PKCS#12 archive does not contain a certificate".to_owned())
        }))
    }

    /// Decodes the certificate store secret: base64 of `{ "data": "<base64 pkcs12>", "password": "..." }`.
    pub fn from_secret_envelope(secret: &str) -> Result<Self> {
        let envelope = STANDARD
            .decode(secret.trim())
            .map_err(|err| Error::InvalidCertificate(format!("secret is not valid base64: {err}")))?;

        let envelope: CertificateEnvelope = serde_json::from_slice(&envelope)
            .map_err(|err| Error::InvalidCertificate(format!("invalid certificate envelope: {err}")))?;

        let pkcs12 = STANDARD
            .decode(envelope.data.as_ref())
            .map_err(|err| Error::InvalidCertificate(format!("certificate data is not valid base64: {err}")))?;

        Self::from_pkcs12(&pkcs12, envelope.password.as_ref())
    }

    /// Uppercase hex SHA-1 of the DER certificate.
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    pub fn certificate(&self) -> &Cert {
        &self.certificate
    }

    /// RSASSA-PKCS1-v1_5 signature with SHA-256 over `data`.
    pub fn sign_sha256(&self, data: &[u8]) -> Result<Vec<u8>> {
        let hash = Sha256::digest(data);

        self.private_key
            .as_ref()
            .sign(Pkcs1v15Sign::new::<Sha256>(), &hash)
            .map_err(|err| Error::Signature(err.to_string()))
    }
}

impl fmt::Debug for SigningCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCertificate")
            .field("thumbprint", &self.thumbprint)
            .finish_non_exhaustive()
    }
}

struct CachedCertificate {
    certificate: Arc<SigningCertificate>,
    loaded_at: Instant,
}

/// Loads the signing certificate from the certificate store and keeps it for the process lifetime,
/// or for `ttl` when one is set.
pub struct CertificateProvider {
    client: Arc<dyn SecretClient>,
    certificate_url: String,
    ttl: Option<Duration>,
    cached: RwLock<Option<CachedCertificate>>,
}

impl CertificateProvider {
    pub fn new(client: Arc<dyn SecretClient>, certificate_url: impl Into<String>) -> Self {
        Self {
            client,
            certificate_url: certificate_url.into(),
            ttl: None,
            cached: RwLock::new(None),
        }
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn certificate_url(&self) -> &str {
        &self.certificate_url
    }

    /// Returns the cached certificate, loading it first if absent or expired.
    pub async fn certificate(&self) -> Result<Arc<SigningCertificate>> {
        let cached = self
            .cached
            .read()
            .as_ref()
            .filter(|cached| !self.ttl.is_some_and(|ttl| cached.loaded_at.elapsed() >= ttl))
            .map(|cached| Arc::clone(&cached.certificate));

        match cached {
            Some(certificate) => Ok(certificate),
            None => self.reload().await,
        }
    }

    /// Loads the certificate from the store and replaces the cached one.
    ///
    /// Requests already holding the previous certificate keep using it.
    #[instrument(level = "debug", skip_all, fields(url = %self.certificate_url))]
    pub async fn reload(&self) -> Result<Arc<SigningCertificate>> {
        let certificate = Arc::new(self.load().await?);

        *self.cached.write() = Some(CachedCertificate {
            certificate: Arc::clone(&certificate),
            loaded_at: Instant::now(),
        });

        info!(thumbprint = certificate.thumbprint(), "Loaded signing certificate");

        Ok(certificate)
    }

    async fn load(&self) -> Result<SigningCertificate> {
        let load_error = |reason: String| Error::CertificateLoad {
            url: self.certificate_url.clone(),
            reason,
        };

        let secret = self
            .client
            .get_secret(&self.certificate_url)
            .await
            .map_err(|err| load_error(err.to_string()))?;

        debug!(length = secret.as_ref().len(), "Downloaded certificate secret");

        SigningCertificate::from_secret_envelope(secret.as_ref()).map_err(|err| {
            error!(%err, "Failed to decode the signing certificate");
            load_error(err.to_string())
        })
    }
}
