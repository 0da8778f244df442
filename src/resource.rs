//! Typed views over the resource documents read by the endpoint walk.
//!
//! Only the fields the walk needs are modeled. Unknown fields are ignored and missing collections
//! decode as empty, but a field with the wrong type makes the whole document malformed.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// API version sent with every resource-graph request.
pub const RESOURCE_API_VERSION: &str = "2016-05-15";

/// Opaque identifier of a cloud resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Reference to another resource (`{ "id": "..." }`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubResource {
    pub id: ResourceId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabVirtualMachineResource {
    #[serde(default, deserialize_with = "null_as_default")]
    pub properties: LabVirtualMachineProperties,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabVirtualMachineProperties {
    #[serde(default, deserialize_with = "null_as_default")]
    pub disallow_public_ip_address: bool,
    pub fqdn: Option<String>,
    pub compute_id: Option<ResourceId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComputeVirtualMachine {
    #[serde(default, deserialize_with = "null_as_default")]
    pub properties: ComputeVirtualMachineProperties,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeVirtualMachineProperties {
    #[serde(default, deserialize_with = "null_as_default")]
    pub network_profile: NetworkProfile,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkProfile {
    #[serde(default, deserialize_with = "null_as_default")]
    pub network_interfaces: Vec<SubResource>,
}

impl ComputeVirtualMachine {
    pub fn network_interfaces(&self) -> &[SubResource] {
        &self.properties.network_profile.network_interfaces
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkInterface {
    #[serde(default, deserialize_with = "null_as_default")]
    pub properties: NetworkInterfaceProperties,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceProperties {
    #[serde(default, deserialize_with = "null_as_default")]
    pub ip_configurations: Vec<IpConfiguration>,
}

impl NetworkInterface {
    pub fn ip_configurations(&self) -> &[IpConfiguration] {
        &self.properties.ip_configurations
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IpConfiguration {
    #[serde(default, deserialize_with = "null_as_default")]
    pub properties: IpConfigurationProperties,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpConfigurationProperties {
    #[serde(default, deserialize_with = "null_as_default")]
    pub load_balancer_inbound_nat_rules: Vec<SubResource>,
}

impl IpConfiguration {
    pub fn inbound_nat_rules(&self) -> &[SubResource] {
        &self.properties.load_balancer_inbound_nat_rules
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundNatRule {
    #[serde(default, deserialize_with = "null_as_default")]
    pub properties: InboundNatRuleProperties,
    // older documents carry the reference next to `properties`
    #[serde(rename = "frontendIPConfiguration")]
    pub frontend_ip_configuration: Option<SubResource>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundNatRuleProperties {
    pub backend_port: Option<u16>,
    pub frontend_port: Option<u16>,
    #[serde(rename = "frontendIPConfiguration")]
    pub frontend_ip_configuration: Option<SubResource>,
}

impl InboundNatRule {
    pub fn backend_port(&self) -> Option<u16> {
        self.properties.backend_port
    }

    pub fn frontend_port(&self) -> Option<u16> {
        self.properties.frontend_port
    }

    pub fn frontend_ip_configuration(&self) -> Option<&ResourceId> {
        self.properties
            .frontend_ip_configuration
            .as_ref()
            .or(self.frontend_ip_configuration.as_ref())
            .map(|reference| &reference.id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrontendIpConfiguration {
    #[serde(default, deserialize_with = "null_as_default")]
    pub properties: FrontendIpConfigurationProperties,
    #[serde(rename = "publicIPAddress")]
    pub public_ip_address: Option<SubResource>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FrontendIpConfigurationProperties {
    #[serde(rename = "publicIPAddress")]
    pub public_ip_address: Option<SubResource>,
}

impl FrontendIpConfiguration {
    pub fn public_ip_address(&self) -> Option<&ResourceId> {
        self.properties
            .public_ip_address
            .as_ref()
            .or(self.public_ip_address.as_ref())
            .map(|reference| &reference.id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublicIpAddress {
    #[serde(default, deserialize_with = "null_as_default")]
    pub properties: PublicIpAddressProperties,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicIpAddressProperties {
    pub dns_settings: Option<DnsSettings>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DnsSettings {
    pub fqdn: Option<String>,
}

impl PublicIpAddress {
    pub fn fqdn(&self) -> Option<&str> {
        self.properties
            .dns_settings
            .as_ref()
            .and_then(|dns_settings| dns_settings.fqdn.as_deref())
            .filter(|fqdn| !fqdn.is_empty())
    }
}

/// Reads an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decodes a fetched document into one of the typed views above.
pub fn decode<T: DeserializeOwned>(resource_id: &ResourceId, document: Value) -> Result<T> {
    serde_json::from_value(document).map_err(|source| Error::MalformedResource {
        resource_id: resource_id.to_string(),
        source,
    })
}
