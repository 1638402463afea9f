use std::{collections::HashMap, sync::Arc};

use eyre::WrapErr as _;

use crate::{
    config::AppConfig,
    device::{DeviceClient, NitroClient},
    error::ConfigError,
    request::Target,
};

/// Looks up the device client responsible for a target.
pub trait DeviceRegistry: Send + Sync {
    fn primary_client(&self, target: &Target) -> Result<Arc<dyn DeviceClient>, ConfigError>;
}

/// Registry over a fixed map of clients.
#[derive(Default)]
pub struct ConfiguredRegistry {
    clients: HashMap<Target, Arc<dyn DeviceClient>>,
}

impl ConfiguredRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// NITRO clients for every environment in `config`, addressed at its primary endpoint.
    pub fn from_config(config: &AppConfig) -> eyre::Result<Self> {
        let mut registry = Self::new();

        for org in &config.organizations {
            for env in &org.environments {
                let target = Target::new(&org.name, &env.name);

                let endpoint = env
                    .primary_endpoint()
                    .ok_or_else(|| ConfigError::NoManagementEndpoint(target.clone()))?;

                let client = NitroClient::new(endpoint, &env.credentials, &env.connection)
                    .wrap_err_with(|| format!("failed to create device client for {target}"))?;

                log::debug!("registered device={} target={target}", endpoint.name);
                registry.insert(target, Arc::new(client));
            }
        }

        Ok(registry)
    }

    pub fn insert(&mut self, target: Target, client: Arc<dyn DeviceClient>) {
        self.clients.insert(target, client);
    }
}

impl DeviceRegistry for ConfiguredRegistry {
    fn primary_client(&self, target: &Target) -> Result<Arc<dyn DeviceClient>, ConfigError> {
        self.clients
            .get(target)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownTarget(target.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_clients_for_every_environment() {
        let config = AppConfig::from_yaml(
            r#"
organizations:
  - name: o
    environments:
      - name: prod
        management: { name: snip, address: 10.0.0.10 }
        nodes: [ { name: n1, address: 10.0.0.11 } ]
        credentials: { username: u, password: p }
      - name: test
        nodes: [ { name: n2, address: 10.0.1.11 } ]
        credentials: { username: u, password: p }
"#,
        )
        .unwrap();

        let registry = ConfiguredRegistry::from_config(&config).unwrap();

        assert_eq!(
            registry.primary_client(&Target::new("o", "prod")).unwrap().name(),
            "snip"
        );
        assert_eq!(
            registry.primary_client(&Target::new("o", "test")).unwrap().name(),
            "n2"
        );
        assert!(matches!(
            registry.primary_client(&Target::new("o", "nope")),
            Err(ConfigError::UnknownTarget(_))
        ));
    }
}
