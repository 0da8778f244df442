//! Request boundary: resolves the target endpoint, records the user activity and signs the token.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::certificate::CertificateProvider;
use crate::resolver::{Endpoint, EndpointResolver};
use crate::resource::ResourceId;
use crate::token::{SignedToken, TokenSigner};
use crate::{Error, Result};

/// DevTest Labs virtual machine addressed by its names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabVirtualMachine {
    pub subscription_id: String,
    pub resource_group: String,
    pub lab_name: String,
    pub vm_name: String,
}

impl LabVirtualMachine {
    pub fn resource_id(&self) -> ResourceId {
        ResourceId::new(format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.DevTestLab/labs/{}/virtualmachines/{}",
            self.subscription_id, self.resource_group, self.lab_name, self.vm_name
        ))
    }
}

/// Identity of an authorized request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub correlation_id: Uuid,
    pub user_id: Uuid,
}

impl RequestContext {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            user_id,
        }
    }

    /// Builds a context from the caller supplied user object id.
    pub fn from_user_id(user_id: Option<&str>) -> Result<Self> {
        let user_id = user_id.unwrap_or_default();

        Uuid::parse_str(user_id.trim())
            .map(Self::new)
            .map_err(|_| Error::InvalidUserId(user_id.to_owned()))
    }
}

/// One connection grant, recorded once per authorized request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActivity {
    pub correlation_id: Uuid,
    pub user_id: Uuid,
    pub host: String,
    pub port: u16,
}

impl UserActivity {
    pub fn new(context: &RequestContext, endpoint: &Endpoint) -> Self {
        Self {
            correlation_id: context.correlation_id,
            user_id: context.user_id,
            host: endpoint.host().to_owned(),
            port: endpoint.port(),
        }
    }
}

/// Side channel receiving user activity records.
///
/// Called once per issued token, after signing succeeded.
pub trait ActivitySink: Send + Sync {
    fn record(&self, activity: UserActivity) -> Result<()>;
}

/// Writes activity records to the `tracing` output.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingActivitySink;

impl ActivitySink for TracingActivitySink {
    fn record(&self, activity: UserActivity) -> Result<()> {
        info!(
            correlation_id = %activity.correlation_id,
            user_id = %activity.user_id,
            host = %activity.host,
            port = activity.port,
            "User activity"
        );

        Ok(())
    }
}

pub struct TokenService {
    resolver: EndpointResolver,
    signer: TokenSigner,
    certificates: Arc<CertificateProvider>,
    activity: Arc<dyn ActivitySink>,
}

impl TokenService {
    pub fn new(
        resolver: EndpointResolver,
        signer: TokenSigner,
        certificates: Arc<CertificateProvider>,
        activity: Arc<dyn ActivitySink>,
    ) -> Self {
        Self {
            resolver,
            signer,
            certificates,
            activity,
        }
    }

    /// Issues a token for the RDP endpoint of a lab virtual machine.
    #[instrument(level = "info", skip_all, fields(correlation_id = %context.correlation_id, vm = %vm.vm_name))]
    pub async fn create_token_for_vm(&self, context: &RequestContext, vm: &LabVirtualMachine) -> Result<SignedToken> {
        let endpoint = self.resolver.resolve(&vm.resource_id()).await?;

        self.issue(context, endpoint).await
    }

    /// Issues a token for an endpoint chosen by the caller.
    #[instrument(level = "info", skip_all, fields(correlation_id = %context.correlation_id))]
    pub async fn create_token_for_endpoint(&self, context: &RequestContext, endpoint: Endpoint) -> Result<SignedToken> {
        self.issue(context, endpoint).await
    }

    async fn issue(&self, context: &RequestContext, endpoint: Endpoint) -> Result<SignedToken> {
        let certificate = self.certificates.certificate().await?;
        let token = self.signer.sign(&certificate, &endpoint)?;

        if let Err(err) = self.activity.record(UserActivity::new(context, &endpoint)) {
            // tracking must not block the connection
            warn!(%err, "Failed to record user activity");
        }

        info!(%endpoint, expires_on = token.expires_on(), "Issued RDP gateway token");

        Ok(token)
    }
}
