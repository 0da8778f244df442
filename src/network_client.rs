use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::resource::ResourceId;
use crate::{Result, Secret};

/// Resource the management access token is requested for.
pub const AZURE_MANAGEMENT_RESOURCE: &str = "https://management.azure.com/";

/// Resource the key vault access token is requested for.
pub const AZURE_KEY_VAULT_RESOURCE: &str = "https://vault.azure.net";

pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Supplies bearer tokens for the cloud APIs.
///
/// Implementations are created once at process start and shared by all requests.
pub trait AccessTokenProvider: Send + Sync {
    fn access_token<'a>(&'a self, resource: &'a str) -> ClientFuture<'a, Secret<String>>;
}

/// Fetches resource documents from the resource graph.
pub trait ResourceClient: Send + Sync {
    /// Returns the JSON document of `resource_id`.
    ///
    /// A missing resource, a transport failure or a non-JSON body must be reported as
    /// [`Error::UpstreamLookup`](crate::Error::UpstreamLookup) carrying the resource id.
    fn get_resource<'a>(&'a self, resource_id: &'a ResourceId, api_version: &'a str) -> ClientFuture<'a, Value>;
}

/// Fetches secrets from the certificate store.
pub trait SecretClient: Send + Sync {
    fn get_secret<'a>(&'a self, secret_url: &'a str) -> ClientFuture<'a, Secret<String>>;
}

/// Access token provider handing out a token obtained elsewhere.
#[derive(Debug, Clone)]
pub struct StaticAccessToken(Secret<String>);

impl StaticAccessToken {
    pub fn new(token: impl Into<Secret<String>>) -> Self {
        Self(token.into())
    }
}

impl AccessTokenProvider for StaticAccessToken {
    fn access_token<'a>(&'a self, _resource: &'a str) -> ClientFuture<'a, Secret<String>> {
        Box::pin(async move { Ok(self.0.clone()) })
    }
}

#[cfg(feature = "network_client")]
pub mod reqwest_network_client {
    use std::collections::HashMap;
    use std::env;
    use std::sync::Arc;

    use parking_lot::RwLock;
    use serde::Deserialize;
    use serde_json::Value;
    use time::OffsetDateTime;
    use url::Url;

    use super::{
        AccessTokenProvider, ClientFuture, ResourceClient, SecretClient, AZURE_KEY_VAULT_RESOURCE,
        AZURE_MANAGEMENT_RESOURCE,
    };
    use crate::resource::ResourceId;
    use crate::{Error, Secret};

    const KEY_VAULT_API_VERSION: &str = "7.0";

    const IMDS_TOKEN_URL: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
    const IMDS_API_VERSION: &str = "2018-02-01";
    const APP_SERVICE_API_VERSION: &str = "2019-08-01";
    const IDENTITY_ENDPOINT_VAR: &str = "IDENTITY_ENDPOINT";
    const IDENTITY_HEADER_VAR: &str = "IDENTITY_HEADER";

    /// Cached tokens are refreshed once they expire within this many seconds.
    const TOKEN_REFRESH_MARGIN_SECS: i64 = 300;

    /// Resource graph client backed by the Azure management API.
    #[derive(Clone)]
    pub struct ArmResourceClient {
        client: reqwest::Client,
        base_url: String,
        token_provider: Arc<dyn AccessTokenProvider>,
    }

    impl ArmResourceClient {
        pub fn new(token_provider: Arc<dyn AccessTokenProvider>) -> Self {
            Self {
                client: reqwest::Client::new(),
                base_url: AZURE_MANAGEMENT_RESOURCE.to_owned(),
                token_provider,
            }
        }

        /// Targets another management endpoint (sovereign clouds, local fakes).
        pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
            self.base_url = base_url.into();
            self
        }

        async fn fetch(&self, resource_id: &ResourceId, api_version: &str) -> crate::Result<Value> {
            let url = Url::parse(&self.base_url)
                .and_then(|base_url| base_url.join(resource_id.as_str().trim_start_matches('/')))
                .map_err(|err| Error::upstream(resource_id, format!("invalid resource URL: {err}")))?;

            let token = self.token_provider.access_token(AZURE_MANAGEMENT_RESOURCE).await?;

            let response = self
                .client
                .get(url)
                .query(&[("api-version", api_version)])
                .bearer_auth(token.as_ref())
                .send()
                .await
                .map_err(|err| Error::upstream(resource_id, format!("unable to send the request: {err}")))?
                .error_for_status()
                .map_err(|err| Error::upstream(resource_id, err))?;

            response
                .json::<Value>()
                .await
                .map_err(|err| Error::upstream(resource_id, format!("unable to read the response body: {err}")))
        }
    }

    impl ResourceClient for ArmResourceClient {
        fn get_resource<'a>(&'a self, resource_id: &'a ResourceId, api_version: &'a str) -> ClientFuture<'a, Value> {
            Box::pin(self.fetch(resource_id, api_version))
        }
    }

    #[derive(Deserialize)]
    struct SecretBundle {
        value: Secret<String>,
    }

    /// Secret client backed by the Azure key vault REST API.
    #[derive(Clone)]
    pub struct KeyVaultSecretClient {
        client: reqwest::Client,
        token_provider: Arc<dyn AccessTokenProvider>,
    }

    impl KeyVaultSecretClient {
        pub fn new(token_provider: Arc<dyn AccessTokenProvider>) -> Self {
            Self {
                client: reqwest::Client::new(),
                token_provider,
            }
        }

        async fn fetch(&self, secret_url: &str) -> crate::Result<Secret<String>> {
            let token = self.token_provider.access_token(AZURE_KEY_VAULT_RESOURCE).await?;

            let bundle = self
                .client
                .get(secret_url)
                .query(&[("api-version", KEY_VAULT_API_VERSION)])
                .bearer_auth(token.as_ref())
                .send()
                .await
                .map_err(|err| Error::upstream(secret_url, format!("unable to send the request: {err}")))?
                .error_for_status()
                .map_err(|err| Error::upstream(secret_url, err))?
                .json::<SecretBundle>()
                .await
                .map_err(|err| Error::upstream(secret_url, format!("unable to read the secret bundle: {err}")))?;

            Ok(bundle.value)
        }
    }

    impl SecretClient for KeyVaultSecretClient {
        fn get_secret<'a>(&'a self, secret_url: &'a str) -> ClientFuture<'a, Secret<String>> {
            Box::pin(self.fetch(secret_url))
        }
    }

    /// Where managed identity tokens are requested.
    #[derive(Debug, Clone)]
    pub enum ManagedIdentityEndpoint {
        /// Instance metadata service of a virtual machine.
        Imds { url: String },
        /// Identity endpoint of App Service and Functions hosts.
        AppService { url: String, header: Secret<String> },
    }

    impl ManagedIdentityEndpoint {
        /// App Service endpoint when `IDENTITY_ENDPOINT` and `IDENTITY_HEADER` are set, IMDS otherwise.
        pub fn from_env() -> Self {
            match (env::var(IDENTITY_ENDPOINT_VAR), env::var(IDENTITY_HEADER_VAR)) {
                (Ok(url), Ok(header)) => Self::AppService {
                    url,
                    header: Secret::new(header),
                },
                _ => Self::imds(),
            }
        }

        pub fn imds() -> Self {
            Self::Imds {
                url: IMDS_TOKEN_URL.to_owned(),
            }
        }

        fn url(&self) -> &str {
            match self {
                Self::Imds { url } | Self::AppService { url, .. } => url,
            }
        }
    }

    #[derive(Deserialize)]
    struct TokenResponse {
        access_token: Secret<String>,
        expires_on: ExpiresOn,
    }

    /// POSIX seconds, sent as a string by both identity endpoints.
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ExpiresOn {
        Seconds(i64),
        Text(String),
    }

    struct CachedAccessToken {
        token: Secret<String>,
        expires_on: i64,
    }

    /// Access tokens of the managed identity, cached per resource until shortly before they expire.
    pub struct ManagedIdentityTokenProvider {
        client: reqwest::Client,
        endpoint: ManagedIdentityEndpoint,
        client_id: Option<String>,
        clock: fn() -> i64,
        cached: RwLock<HashMap<String, CachedAccessToken>>,
    }

    impl ManagedIdentityTokenProvider {
        pub fn new(endpoint: ManagedIdentityEndpoint) -> crate::Result<Self> {
            // identity endpoints are host-local and must not go through a proxy
            let client = reqwest::Client::builder()
                .no_proxy()
                .build()
                .map_err(|err| Error::upstream(endpoint.url(), format!("unable to build the HTTP client: {err}")))?;

            Ok(Self {
                client,
                endpoint,
                client_id: None,
                clock: unix_now,
                cached: RwLock::new(HashMap::new()),
            })
        }

        pub fn from_env() -> crate::Result<Self> {
            Self::new(ManagedIdentityEndpoint::from_env())
        }

        /// Requests tokens for a user-assigned identity.
        pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
            self.client_id = Some(client_id.into());
            self
        }

        #[cfg(test)]
        fn with_clock(mut self, clock: fn() -> i64) -> Self {
            self.clock = clock;
            self
        }

        fn cached_token(&self, resource: &str, now: i64) -> Option<Secret<String>> {
            self.cached
                .read()
                .get(resource)
                .filter(|cached| cached.expires_on - TOKEN_REFRESH_MARGIN_SECS > now)
                .map(|cached| cached.token.clone())
        }

        async fn token(&self, resource: &str) -> crate::Result<Secret<String>> {
            if let Some(token) = self.cached_token(resource, (self.clock)()) {
                return Ok(token);
            }

            let (token, expires_on) = self.request(resource).await?;

            debug!(resource, expires_on, "Acquired managed identity access token");

            self.cached.write().insert(
                resource.to_owned(),
                CachedAccessToken {
                    token: token.clone(),
                    expires_on,
                },
            );

            Ok(token)
        }

        async fn request(&self, resource: &str) -> crate::Result<(Secret<String>, i64)> {
            let request = match &self.endpoint {
                ManagedIdentityEndpoint::Imds { url } => self
                    .client
                    .get(url)
                    .query(&[("api-version", IMDS_API_VERSION)])
                    .header("Metadata", "true"),
                ManagedIdentityEndpoint::AppService { url, header } => self
                    .client
                    .get(url)
                    .query(&[("api-version", APP_SERVICE_API_VERSION)])
                    .header("X-IDENTITY-HEADER", header.as_ref().as_str()),
            };

            let mut request = request.query(&[("resource", resource)]);

            if let Some(client_id) = &self.client_id {
                request = request.query(&[("client_id", client_id)]);
            }

            let response = request
                .send()
                .await
                .map_err(|err| Error::upstream(resource, format!("unable to request an access token: {err}")))?
                .error_for_status()
                .map_err(|err| Error::upstream(resource, err))?
                .json::<TokenResponse>()
                .await
                .map_err(|err| Error::upstream(resource, format!("unable to read the access token: {err}")))?;

            let expires_on = match response.expires_on {
                ExpiresOn::Seconds(seconds) => seconds,
                ExpiresOn::Text(text) => text
                    .trim()
                    .parse()
                    .map_err(|_| Error::upstream(resource, format!("invalid access token expiry '{text}'")))?,
            };

            Ok((response.access_token, expires_on))
        }
    }

    impl AccessTokenProvider for ManagedIdentityTokenProvider {
        fn access_token<'a>(&'a self, resource: &'a str) -> ClientFuture<'a, Secret<String>> {
            Box::pin(self.token(resource))
        }
    }

    fn unix_now() -> i64 {
        OffsetDateTime::now_utc().unix_timestamp()
    }

}
