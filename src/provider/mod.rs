//! Challenge providers.
//!
//! A request names its provider in `challenge.provider`:
//!
//! | Provider | Challenge | Mechanism |
//! |---|---|---|
//! | `netscaler-http-global` | `http-01` | responder policy bound globally on the target device |
//! | `netscaler-adns` | `dns-01` | TXT record in the target device's authoritative DNS |
//! | `webserver` | `http-01` | built-in HTTP listener |
//! | any registered DNS solver | `dns-01` | see [`DnsSolvers`] |

use std::{collections::HashMap, fmt, sync::Arc};

use eyre::eyre;

use crate::{
    acme::{ChallengeSolver, ChallengeType},
    device::DeviceClient,
    error::ConfigError,
    request::ChallengeSpec,
};

mod adns;
mod dns;
mod global_http;
mod http01;

pub use self::{
    adns::AdnsProvider,
    dns::{challenge_fqdn, WebhookSolver},
    global_http::GlobalHttpProvider,
    http01::Http01Server,
};

pub const GLOBAL_HTTP: &str = "netscaler-http-global";
pub const ADNS: &str = "netscaler-adns";
pub const WEBSERVER: &str = "webserver";

/// Provider selected for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderKind {
    GlobalHttp,
    Adns,
    Webserver,
    Dns(String),
}

impl ProviderKind {
    /// Maps a challenge spec to its provider, checking the provider can solve the challenge type.
    pub fn select(spec: &ChallengeSpec, dns: &DnsSolvers) -> Result<Self, ConfigError> {
        let (kind, supported) = match spec.provider.as_str() {
            GLOBAL_HTTP => (ProviderKind::GlobalHttp, ChallengeType::Http01),
            ADNS => (ProviderKind::Adns, ChallengeType::Dns01),
            WEBSERVER => (ProviderKind::Webserver, ChallengeType::Http01),
            name if dns.contains(name) => (ProviderKind::Dns(name.to_owned()), ChallengeType::Dns01),
            name => return Err(ConfigError::UnknownProvider(name.to_owned())),
        };

        if spec.challenge_type != supported {
            return Err(ConfigError::ChallengeMismatch {
                provider: spec.provider.clone(),
                challenge_type: spec.challenge_type,
            });
        }

        Ok(kind)
    }

    /// Whether the provider acts on the request's target device.
    pub fn is_device_bound(&self) -> bool {
        matches!(self, ProviderKind::GlobalHttp | ProviderKind::Adns)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::GlobalHttp => f.write_str(GLOBAL_HTTP),
            ProviderKind::Adns => f.write_str(ADNS),
            ProviderKind::Webserver => f.write_str(WEBSERVER),
            ProviderKind::Dns(name) => f.write_str(name),
        }
    }
}

type DnsSolverFactory = Box<dyn Fn() -> eyre::Result<Arc<dyn ChallengeSolver>> + Send + Sync>;

/// Named DNS-01 solvers.
///
/// Factories run after the request's provider parameters were applied, so they may read their
/// settings from the environment.
#[derive(Default)]
pub struct DnsSolvers {
    factories: HashMap<String, DnsSolverFactory>,
}

impl DnsSolvers {
    /// Table holding the built-in `webhook` solver.
    pub fn with_builtin() -> Self {
        let mut solvers = Self::default();
        solvers.register("webhook", || {
            Ok(Arc::new(WebhookSolver::from_env()?) as Arc<dyn ChallengeSolver>)
        });
        solvers
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> eyre::Result<Arc<dyn ChallengeSolver>> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_owned(), Box::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    fn build(&self, name: &str) -> eyre::Result<Arc<dyn ChallengeSolver>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProvider(name.to_owned()))?;
        factory()
    }
}

impl fmt::Debug for DnsSolvers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

/// Builds solvers for one run.
pub struct ProviderFactory {
    pub(crate) timestamp: String,
    pub(crate) max_retries: u32,
    pub(crate) http01: Arc<Http01Server>,
    pub(crate) dns: Arc<DnsSolvers>,
}

impl ProviderFactory {
    pub fn build(
        &self,
        kind: &ProviderKind,
        device: Option<Arc<dyn DeviceClient>>,
    ) -> eyre::Result<Arc<dyn ChallengeSolver>> {
        let device = || device.clone().ok_or_else(|| eyre!("provider {kind} requires a target device"));

        Ok(match kind {
            ProviderKind::GlobalHttp => Arc::new(GlobalHttpProvider::new(
                device()?,
                &self.timestamp,
                self.max_retries,
            )),
            ProviderKind::Adns => Arc::new(AdnsProvider::new(device()?)),
            ProviderKind::Webserver => Arc::clone(&self.http01) as Arc<dyn ChallengeSolver>,
            ProviderKind::Dns(name) => self.dns.build(name)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(provider: &str, challenge_type: ChallengeType) -> ChallengeSpec {
        ChallengeSpec {
            service: "LE_STAGING".to_owned(),
            challenge_type,
            provider: provider.to_owned(),
            disable_dns_propagation_check: false,
            provider_parameters: None,
        }
    }

    #[test]
    fn selects_by_provider_name() {
        let dns = DnsSolvers::with_builtin();

        assert_eq!(
            ProviderKind::select(&spec(GLOBAL_HTTP, ChallengeType::Http01), &dns).unwrap(),
            ProviderKind::GlobalHttp
        );
        assert_eq!(
            ProviderKind::select(&spec(ADNS, ChallengeType::Dns01), &dns).unwrap(),
            ProviderKind::Adns
        );
        assert_eq!(
            ProviderKind::select(&spec(WEBSERVER, ChallengeType::Http01), &dns).unwrap(),
            ProviderKind::Webserver
        );
        assert_eq!(
            ProviderKind::select(&spec("webhook", ChallengeType::Dns01), &dns).unwrap(),
            ProviderKind::Dns("webhook".to_owned())
        );
    }

    #[test]
    fn unknown_provider_is_a_configuration_error() {
        let dns = DnsSolvers::default();
        assert!(matches!(
            ProviderKind::select(&spec("route53", ChallengeType::Dns01), &dns),
            Err(ConfigError::UnknownProvider(_))
        ));
    }

    #[test]
    fn challenge_type_must_match_provider() {
        let dns = DnsSolvers::with_builtin();

        for (provider, challenge_type) in [
            (GLOBAL_HTTP, ChallengeType::Dns01),
            (ADNS, ChallengeType::Http01),
            (WEBSERVER, ChallengeType::TlsAlpn01),
            ("webhook", ChallengeType::Http01),
        ] {
            assert!(matches!(
                ProviderKind::select(&spec(provider, challenge_type), &dns),
                Err(ConfigError::ChallengeMismatch { .. })
            ));
        }
    }

    #[test]
    fn device_bound_providers_need_a_device() {
        let factory = ProviderFactory {
            timestamp: "20240101000000".to_owned(),
            max_retries: 10,
            http01: Arc::new(Http01Server::new("127.0.0.1:0")),
            dns: Arc::new(DnsSolvers::default()),
        };

        assert!(factory.build(&ProviderKind::GlobalHttp, None).is_err());
        assert!(factory.build(&ProviderKind::Webserver, None).is_ok());
    }
}
