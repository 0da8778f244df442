use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::de::DeserializeOwned;
use tokio::time::timeout;

use crate::network_client::ResourceClient;
use crate::resource::{
    self, ComputeVirtualMachine, FrontendIpConfiguration, InboundNatRule, LabVirtualMachineResource,
    NetworkInterface, PublicIpAddress, ResourceId, SubResource, RESOURCE_API_VERSION,
};
use crate::{Error, Result};

/// Port of the remote desktop service.
pub const RDP_PORT: u16 = 3389;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_WALK_DEADLINE: Duration = Duration::from_secs(30);

/// Host and port a client connects to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverOptions {
    /// Upper bound for a single resource fetch.
    pub fetch_timeout: Duration,
    /// Upper bound for the whole walk of one virtual machine.
    pub walk_deadline: Duration,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            walk_deadline: DEFAULT_WALK_DEADLINE,
        }
    }
}

/// Resolves the RDP endpoint of a lab virtual machine.
///
/// A machine allowing a public IP address is reached on its own FQDN and [`RDP_PORT`]. Otherwise the
/// walk goes VM -> network interfaces -> IP configurations -> inbound NAT rules, and the first rule
/// forwarding to [`RDP_PORT`] (in listed order) gives the load balancer FQDN and frontend port.
#[derive(Clone)]
pub struct EndpointResolver {
    client: Arc<dyn ResourceClient>,
    options: ResolverOptions,
}

impl EndpointResolver {
    pub fn new(client: Arc<dyn ResourceClient>) -> Self {
        Self {
            client,
            options: ResolverOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ResolverOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    #[instrument(level = "debug", skip_all, fields(vm = %vm_resource_id))]
    pub async fn resolve(&self, vm_resource_id: &ResourceId) -> Result<Endpoint> {
        match timeout(self.options.walk_deadline, self.walk(vm_resource_id)).await {
            Ok(endpoint) => endpoint,
            Err(_) => {
                warn!(deadline = ?self.options.walk_deadline, "Endpoint resolution deadline expired");

                Err(Error::UpstreamTimeout {
                    resource_id: vm_resource_id.to_string(),
                    timeout: self.options.walk_deadline,
                })
            }
        }
    }

    async fn walk(&self, vm_resource_id: &ResourceId) -> Result<Endpoint> {
        let lab_vm: LabVirtualMachineResource = self.fetch(vm_resource_id).await?;
        let properties = lab_vm.properties;

        if !properties.disallow_public_ip_address {
            let fqdn = properties
                .fqdn
                .filter(|fqdn| !fqdn.is_empty())
                .ok_or_else(|| missing_field(vm_resource_id, "properties.fqdn"))?;

            debug!(%fqdn, "Virtual machine exposes a public IP address");

            return Ok(Endpoint::new(fqdn, RDP_PORT));
        }

        let compute_id = properties
            .compute_id
            .ok_or_else(|| missing_field(vm_resource_id, "properties.computeId"))?;
        let compute_vm: ComputeVirtualMachine = self.fetch(&compute_id).await?;

        for network_interface_ref in compute_vm.network_interfaces() {
            let network_interface: NetworkInterface = self.fetch(&network_interface_ref.id).await?;

            for ip_configuration in network_interface.ip_configurations() {
                if let Some((rule_id, rule)) = self.find_rdp_nat_rule(ip_configuration.inbound_nat_rules()).await? {
                    debug!(rule = %rule_id, "Found inbound NAT rule forwarding to the RDP port");

                    return self.resolve_nat_rule(rule_id, &rule).await;
                }
            }
        }

        Err(Error::EndpointNotFound(vm_resource_id.to_string()))
    }

    /// Fetches the rules of one IP configuration concurrently, then picks the first match by listed
    /// position. A failed fetch ordered before the match fails the walk, as a sequential walk would.
    async fn find_rdp_nat_rule<'r>(
        &self,
        rules: &'r [SubResource],
    ) -> Result<Option<(&'r ResourceId, InboundNatRule)>> {
        let fetched = join_all(rules.iter().map(|rule| self.fetch::<InboundNatRule>(&rule.id))).await;

        for (reference, rule) in rules.iter().zip(fetched) {
            let rule = rule?;

            trace!(rule = %reference.id, backend_port = ?rule.backend_port(), "Inspecting inbound NAT rule");

            if rule.backend_port() == Some(RDP_PORT) {
                return Ok(Some((&reference.id, rule)));
            }
        }

        Ok(None)
    }

    async fn resolve_nat_rule(&self, rule_id: &ResourceId, rule: &InboundNatRule) -> Result<Endpoint> {
        let frontend_port = rule
            .frontend_port()
            .ok_or_else(|| missing_field(rule_id, "properties.frontendPort"))?;
        let frontend_id = rule
            .frontend_ip_configuration()
            .ok_or_else(|| missing_field(rule_id, "frontendIPConfiguration.id"))?;

        let frontend: FrontendIpConfiguration = self.fetch(frontend_id).await?;
        let public_ip_id = frontend
            .public_ip_address()
            .ok_or_else(|| missing_field(frontend_id, "publicIPAddress.id"))?;

        let public_ip: PublicIpAddress = self.fetch(public_ip_id).await?;
        let fqdn = public_ip
            .fqdn()
            .ok_or_else(|| missing_field(public_ip_id, "properties.dnsSettings.fqdn"))?;

        Ok(Endpoint::new(fqdn, frontend_port))
    }

    async fn fetch<T: DeserializeOwned>(&self, resource_id: &ResourceId) -> Result<T> {
        trace!(resource = %resource_id, "Fetching resource");

        let document = timeout(
            self.options.fetch_timeout,
            self.client.get_resource(resource_id, RESOURCE_API_VERSION),
        )
        .await
        .map_err(|_| {
            warn!(resource = %resource_id, timeout = ?self.options.fetch_timeout, "Resource fetch timed out");

            Error::UpstreamTimeout {
                resource_id: resource_id.to_string(),
                timeout: self.options.fetch_timeout,
            }
        })??;

        resource::decode(resource_id, document)
    }
}

fn missing_field(resource_id: &ResourceId, field: &'static str) -> Error {
    Error::MissingField {
        resource_id: resource_id.to_string(),
        field,
    }
}
