#![doc = include_str!("../README.md")]

#[macro_use]
extern crate tracing;

pub mod certificate;
pub mod config;
mod error;
pub mod lifetime;
pub mod network_client;
pub mod resolver;
pub mod resource;
mod secret;
pub mod service;
pub mod token;
mod utils;

pub use crate::certificate::{CertificateProvider, SigningCertificate};
pub use crate::config::TokenConfig;
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::lifetime::{compute_expiry, DEFAULT_TOKEN_LIFETIME};
pub use crate::resolver::{Endpoint, EndpointResolver, ResolverOptions, RDP_PORT};
pub use crate::resource::ResourceId;
pub use crate::secret::Secret;
pub use crate::service::{ActivitySink, LabVirtualMachine, RequestContext, TokenService, UserActivity};
pub use crate::token::{MachineToken, SignedToken, TokenSigner};
pub use crate::utils::escape_data_string;
