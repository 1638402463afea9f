//! Certificate lifecycle automation for NetScaler ADC appliances.
//!
//! Certificates are issued by ACME (Automatic Certificate Management Environment) providers such
//! as [Let's Encrypt](https://letsencrypt.org/), following
//! [RFC 8555](https://datatracker.ietf.org/doc/html/rfc8555), and then installed on one or more
//! ADC environments through the NITRO REST API.
//!
//! # Usage
//!
//! An [`AppConfig`] names organizations, their environments and credentials, ACME users, and
//! provider parameter sets. Certificate requests live in their own YAML files below the configured
//! request directory. The [`Orchestrator`] runs one request or all of them:
//!
//! ```no_run
//! # async fn run() -> eyre::Result<()> {
//! use adc_acme::{AppConfig, Orchestrator};
//!
//! let config = AppConfig::load("config.yaml".as_ref())?;
//! let report = Orchestrator::from_config(config)?.request_all().await?;
//!
//! for failure in &report.failures {
//!     eprintln!("{failure}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Domain Ownership
//!
//! Every domain of a request is proven with one of these providers:
//!
//! - `netscaler-http-global`: HTTP-01 answered by a responder policy bound globally on the device;
//! - `netscaler-adns`: DNS-01 answered by TXT records in the device's authoritative DNS;
//! - `webserver`: HTTP-01 answered by a built-in listener;
//! - any DNS solver registered in [`DnsSolvers`].
//!
//! # Rate Limits
//!
//! Let's Encrypt uses [rate limits] to ensure the API is not being abused. Use the staging
//! directory while trying out new requests.
//!
//! [rate limits]: https://letsencrypt.org/docs/rate-limits

#![deny(rust_2018_idioms, nonstandard_style, future_incompatible)]

pub mod account;
pub mod acme;
pub mod config;
pub mod device;
pub mod error;
pub mod install;
pub mod loader;
pub mod orchestrator;
pub mod params;
pub mod provider;
pub mod registry;
pub mod request;


pub use crate::{
    acme::{AcmeClient, CertificateAuthority, CertificateMaterial, ChallengeSolver, ChallengeType},
    config::AppConfig,
    device::{DeviceClient, DeviceError, NitroClient},
    error::{BatchReport, ConfigError, RequestFailure, Stage},
    orchestrator::{Orchestrator, Plan},
    provider::DnsSolvers,
    registry::{ConfiguredRegistry, DeviceRegistry},
    request::{CertificateRequest, Target},
};
