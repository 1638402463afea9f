//! Application configuration.
//!
//! Loaded from a single YAML document with camelCase keys:
//!
//! ```yaml
//! configPath: ./requests
//! organizations:
//!   - name: acme-corp
//!     environments:
//!       - name: production
//!         management: { name: vpx-snip, address: 10.0.0.10 }
//!         credentials: { username: nsroot, password: secret }
//!         connection: { useSsl: true, validateServerCertificate: true, timeout: 5000 }
//! users:
//!   - name: default
//!     email: admin@example.com
//! ```

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    time::Duration,
};

use eyre::WrapErr as _;
use serde::Deserialize;

use crate::{
    acme::{ExternalAccountBinding, LETSENCRYPT_STAGING_URL, LETSENCRYPT_URL},
    error::ConfigError,
    request::Target,
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Directory holding certificate request files.
    ///
    /// Relative paths are resolved against the directory of the configuration file.
    #[serde(default)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub organizations: Vec<Organization>,

    #[serde(default)]
    pub users: Vec<User>,

    #[serde(default)]
    pub services: Vec<Service>,

    #[serde(default)]
    pub parameters: Vec<ProviderParameters>,

    #[serde(default)]
    pub acme: AcmeSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Organization {
    pub name: String,

    #[serde(default)]
    pub environments: Vec<Environment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Environment {
    pub name: String,

    /// Management address (SNIP) of the environment, preferred over the nodes.
    pub management: Option<Endpoint>,

    #[serde(default)]
    pub nodes: Vec<Endpoint>,

    pub credentials: Credentials,

    #[serde(default)]
    pub connection: Connection,
}

impl Environment {
    /// The endpoint device calls are sent to.
    pub fn primary_endpoint(&self) -> Option<&Endpoint> {
        self.management.as_ref().or_else(|| self.nodes.first())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub address: String,
}

#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    #[serde(default = "default_true")]
    pub use_ssl: bool,

    #[serde(default = "default_true")]
    pub validate_server_certificate: bool,

    /// Request timeout in milliseconds.
    #[serde(default = "default_connection_timeout")]
    pub timeout: u64,
}

impl Default for Connection {
    fn default() -> Self {
        Connection {
            use_ssl: true,
            validate_server_certificate: true,
            timeout: default_connection_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub name: String,
    pub email: String,
    pub external_account_binding: Option<ExternalAccountBinding>,
}

/// Named ACME directory.
#[derive(Debug, Clone, Deserialize)]
pub struct Service {
    pub name: String,
    pub url: String,
}

/// Named set of environment variables applied around a challenge.
#[derive(Clone, Deserialize)]
pub struct ProviderParameters {
    pub name: String,

    #[serde(default)]
    pub variables: Vec<Variable>,
}

impl std::fmt::Debug for ProviderParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = self.variables.iter().map(|v| &v.name).collect::<Vec<_>>();
        f.debug_struct("ProviderParameters")
            .field("name", &self.name)
            .field("variables", &names)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
pub struct Variable {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcmeSettings {
    /// Attempts at binding a global responder policy.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Listen address of the built-in HTTP-01 responder.
    #[serde(default = "default_http_listen_address")]
    pub http_listen_address: String,

    /// Seconds to wait for DNS propagation after presenting a dns-01 challenge.
    #[serde(default = "default_dns_propagation_delay")]
    pub dns_propagation_delay: u64,

    /// Seconds between order and authorization polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

impl Default for AcmeSettings {
    fn default() -> Self {
        AcmeSettings {
            max_retries: default_max_retries(),
            http_listen_address: default_http_listen_address(),
            dns_propagation_delay: default_dns_propagation_delay(),
            poll_interval: default_poll_interval(),
        }
    }
}

impl AcmeSettings {
    pub fn dns_propagation_delay(&self) -> Duration {
        Duration::from_secs(self.dns_propagation_delay)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }
}

fn default_true() -> bool {
    true
}

fn default_connection_timeout() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    10
}

fn default_http_listen_address() -> String {
    "0.0.0.0:80".to_owned()
}

fn default_dns_propagation_delay() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    2
}

impl AppConfig {
    /// Reads and validates the configuration file at `path`.
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let text = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read configuration {}", path.display()))?;

        let mut config = Self::from_yaml(&text)
            .wrap_err_with(|| format!("invalid configuration {}", path.display()))?;

        if config.config_path.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            config.config_path = base.join(&config.config_path);
        }

        Ok(config)
    }

    pub fn from_yaml(text: &str) -> eyre::Result<Self> {
        let config = serde_yaml::from_str::<AppConfig>(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut emails = HashSet::new();
        for user in &self.users {
            if !emails.insert(user.email.to_lowercase()) {
                return Err(ConfigError::DuplicateEmail(user.email.clone()));
            }
        }

        for org in &self.organizations {
            for env in &org.environments {
                if env.primary_endpoint().is_none() {
                    return Err(ConfigError::NoManagementEndpoint(Target::new(
                        &org.name, &env.name,
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn user(&self, name: &str) -> Result<&User, ConfigError> {
        self.users
            .iter()
            .find(|user| user.name == name)
            .ok_or_else(|| ConfigError::UnknownUser(name.to_owned()))
    }

    pub fn environment(&self, target: &Target) -> Result<&Environment, ConfigError> {
        self.organizations
            .iter()
            .filter(|org| org.name == target.organization)
            .flat_map(|org| &org.environments)
            .find(|env| env.name == target.environment)
            .ok_or_else(|| ConfigError::UnknownTarget(target.clone()))
    }

    pub fn parameters(&self, name: &str) -> Result<&ProviderParameters, ConfigError> {
        self.parameters
            .iter()
            .find(|set| set.name == name)
            .ok_or_else(|| ConfigError::UnknownProviderParameters(name.to_owned()))
    }

    /// Resolves a service name to an ACME directory URL.
    ///
    /// `LE_PRODUCTION` and `LE_STAGING` are built in, configured services come next and anything
    /// that looks like a URL is used as is.
    pub fn service_url(&self, service: &str) -> Result<String, ConfigError> {
        match service {
            "LE_PRODUCTION" => return Ok(LETSENCRYPT_URL.to_owned()),
            "LE_STAGING" => return Ok(LETSENCRYPT_STAGING_URL.to_owned()),
            _ => {}
        }

        if let Some(configured) = self.services.iter().find(|s| s.name == service) {
            return Ok(configured.url.clone());
        }

        if service.starts_with("https://") || service.starts_with("http://") {
            return Ok(service.to_owned());
        }

        Err(ConfigError::UnknownService(service.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
configPath: requests
organizations:
  - name: acme-corp
    environments:
      - name: production
        nodes:
          - { name: vpx-1, address: 10.0.0.11 }
          - { name: vpx-2, address: 10.0.0.12 }
        credentials: { username: nsroot, password: secret }
users:
  - name: default
    email: admin@example.com
services:
  - { name: ZEROSSL, url: "https://acme.zerossl.com/v2/DV90" }
acme:
  maxRetries: 3
"#;

    #[test]
    fn parses_and_applies_defaults() {
        let config = AppConfig::from_yaml(CONFIG).unwrap();

        assert_eq!(config.acme.max_retries, 3);
        assert_eq!(config.acme.dns_propagation_delay, 30);
        assert_eq!(config.acme.http_listen_address, "0.0.0.0:80");

        let env = config
            .environment(&Target::new("acme-corp", "production"))
            .unwrap();
        assert!(env.connection.use_ssl);
        assert_eq!(env.primary_endpoint().unwrap().name, "vpx-1");
    }

    #[test]
    fn resolves_services() {
        let config = AppConfig::from_yaml(CONFIG).unwrap();

        assert_eq!(config.service_url("LE_STAGING").unwrap(), LETSENCRYPT_STAGING_URL);
        assert_eq!(
            config.service_url("ZEROSSL").unwrap(),
            "https://acme.zerossl.com/v2/DV90"
        );
        assert_eq!(
            config.service_url("https://ca.internal/directory").unwrap(),
            "https://ca.internal/directory"
        );
        assert!(matches!(
            config.service_url("NOPE"),
            Err(ConfigError::UnknownService(_))
        ));
    }

    #[test]
    fn rejects_shared_email() {
        let yaml = r#"
users:
  - { name: a, email: ops@example.com }
  - { name: b, email: OPS@example.com }
"#;
        let err = AppConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::DuplicateEmail(_))
        ));
    }

    #[test]
    fn environment_needs_an_endpoint() {
        let yaml = r#"
organizations:
  - name: o
    environments:
      - name: e
        credentials: { username: u, password: p }
"#;
        assert!(AppConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn relative_config_path_follows_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adc-acme.yaml");
        std::fs::write(&path, CONFIG).unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.config_path, dir.path().join("requests"));
    }
}
