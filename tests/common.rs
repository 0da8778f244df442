#![allow(dead_code)]

use std::collections::HashMap;
use std::future::pending;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use picky::key::PrivateKey;
use picky::x509::Cert;
use rdg_token::network_client::{ClientFuture, ResourceClient, SecretClient};
use rdg_token::{ActivitySink, Error, ResourceId, Secret, SigningCertificate, UserActivity};
use serde_json::{json, Value};

pub const SIGNING_KEY_PEM: &str = include_str!("fixtures/signing_key.pem");
pub const SIGNING_CERT_PEM: &str = include_str!("fixtures/signing_cert.pem");
pub const SIGNING_PFX: &[u8] = include_bytes!("fixtures/signing.pfx");
pub const SIGNING_PFX_PASSWORD: &str = "test-password";
pub const SIGNING_SECRET: &str = include_str!("fixtures/signing_secret.txt");
pub const SIGNING_THUMBPRINT: &str = "31112C39C6DA1C0DFC18C6E2754AB466676DA9A3";

/// `openssl dgst -sha256 -sign signing_key.pem` of `Host=vm1.example.com&Port=3389&ExpiresOn=1700000060`.
pub const VM1_SIGNATURE_BASE64: &str = include_str!("fixtures/vm1_signature.b64");

pub const VM_ID: &str =
    "/subscriptions/s1/resourceGroups/lab-rg/providers/Microsoft.DevTestLab/labs/training/virtualmachines/vm1";
pub const COMPUTE_ID: &str = "/subscriptions/s1/resourceGroups/lab-vm1/providers/Microsoft.Compute/virtualMachines/vm1";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn signing_private_key() -> PrivateKey {
    PrivateKey::from_pem_str(SIGNING_KEY_PEM).unwrap()
}

pub fn signing_cert() -> Cert {
    Cert::from_pem_str(SIGNING_CERT_PEM).unwrap()
}

pub fn signing_certificate() -> SigningCertificate {
    SigningCertificate::new(signing_cert(), &signing_private_key()).unwrap()
}

/// Resource graph serving canned documents and recording every requested id.
#[derive(Default)]
pub struct InMemoryResourceClient {
    documents: HashMap<String, Value>,
    stalled: Vec<String>,
    fetched: Mutex<Vec<String>>,
}

impl InMemoryResourceClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: &str, document: Value) -> Self {
        self.documents.insert(id.to_owned(), document);
        self
    }

    /// Requests for `id` never complete.
    pub fn stalled(mut self, id: &str) -> Self {
        self.stalled.push(id.to_owned());
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

impl ResourceClient for InMemoryResourceClient {
    fn get_resource<'a>(&'a self, resource_id: &'a ResourceId, api_version: &'a str) -> ClientFuture<'a, Value> {
        Box::pin(async move {
            assert_eq!(api_version, "2016-05-15");

            self.fetched.lock().unwrap().push(resource_id.to_string());

            if self.stalled.iter().any(|id| id == resource_id.as_str()) {
                pending::<()>().await;
            }

            self.documents
                .get(resource_id.as_str())
                .cloned()
                .ok_or_else(|| Error::UpstreamLookup {
                    resource_id: resource_id.to_string(),
                    reason: "404 Not Found".to_owned(),
                })
        })
    }
}

/// Certificate store holding a single secret.
pub struct InMemorySecretClient {
    url: String,
    secret: String,
    calls: AtomicUsize,
    unavailable: AtomicBool,
}

impl InMemorySecretClient {
    pub fn new(url: &str, secret: &str) -> Self {
        Self {
            url: url.to_owned(),
            secret: secret.to_owned(),
            calls: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Makes every following request fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SecretClient for InMemorySecretClient {
    fn get_secret<'a>(&'a self, secret_url: &'a str) -> ClientFuture<'a, Secret<String>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if self.unavailable.load(Ordering::SeqCst) {
                return Err(Error::UpstreamLookup {
                    resource_id: secret_url.to_owned(),
                    reason: "503 Service Unavailable".to_owned(),
                });
            }

            if secret_url != self.url {
                return Err(Error::UpstreamLookup {
                    resource_id: secret_url.to_owned(),
                    reason: "SecretNotFound".to_owned(),
                });
            }

            Ok(Secret::new(self.secret.clone()))
        })
    }
}

#[derive(Default)]
pub struct RecordingActivitySink {
    records: Mutex<Vec<UserActivity>>,
}

impl RecordingActivitySink {
    pub fn records(&self) -> Vec<UserActivity> {
        self.records.lock().unwrap().clone()
    }
}

impl ActivitySink for RecordingActivitySink {
    fn record(&self, activity: UserActivity) -> rdg_token::Result<()> {
        self.records.lock().unwrap().push(activity);
        Ok(())
    }
}

pub fn lab_vm(disallow_public_ip_address: bool, fqdn: Option<&str>) -> Value {
    json!({
        "id": VM_ID,
        "name": "vm1",
        "properties": {
            "disallowPublicIpAddress": disallow_public_ip_address,
            "fqdn": fqdn,
            "computeId": COMPUTE_ID,
        }
    })
}

pub fn compute_vm(network_interfaces: &[&str]) -> Value {
    let network_interfaces: Vec<Value> = network_interfaces.iter().map(|id| json!({ "id": id })).collect();

    json!({ "properties": { "networkProfile": { "networkInterfaces": network_interfaces } } })
}

pub fn network_interface(ip_configurations: &[&[&str]]) -> Value {
    let ip_configurations: Vec<Value> = ip_configurations
        .iter()
        .map(|rules| {
            let rules: Vec<Value> = rules.iter().map(|id| json!({ "id": id })).collect();
            json!({ "name": "ipconfig", "properties": { "loadBalancerInboundNatRules": rules } })
        })
        .collect();

    json!({ "properties": { "ipConfigurations": ip_configurations } })
}

pub fn nat_rule(backend_port: u16, frontend_port: u16, frontend_ip_configuration: &str) -> Value {
    json!({
        "properties": {
            "backendPort": backend_port,
            "frontendPort": frontend_port,
            "frontendIPConfiguration": { "id": frontend_ip_configuration },
            "protocol": "Tcp",
        }
    })
}

pub fn frontend_ip_configuration(public_ip: &str) -> Value {
    json!({ "properties": { "publicIPAddress": { "id": public_ip } } })
}

pub fn public_ip(fqdn: &str) -> Value {
    json!({ "properties": { "dnsSettings": { "fqdn": fqdn, "domainNameLabel": "lb" } } })
}

pub const SHORT_TIMEOUT: Duration = Duration::from_millis(50);
