//! Certificate issuance over ACME ([RFC 8555]).
//!
//! The rest of the crate sees issuance through two seams:
//!
//! - [`ChallengeSolver`]: proves control of a domain by presenting a key authorization and removing
//!   it again afterwards.
//! - [`CertificateAuthority`]: registers accounts and runs the order exchange, calling back into a
//!   solver for every pending authorization.
//!
//! [`AcmeClient`] implements the latter against any RFC 8555 directory.
//!
//! [RFC 8555]: https://datatracker.ietf.org/doc/html/rfc8555

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use eyre::{eyre, WrapErr as _};
use serde::Deserialize;
use tokio::sync::Mutex;

pub mod api;
mod auth;
mod cert;
mod directory;
mod eab;
mod jws;
mod key;
mod order;
mod req;
mod trans;

pub use self::{
    auth::ChallengeState,
    cert::CertificateMaterial,
    eab::ExternalAccountBinding,
    key::{dns01_value, AccountKey},
};
pub(crate) use self::directory::{LETSENCRYPT_STAGING_URL, LETSENCRYPT_URL};
use self::directory::Directory;
use crate::request::KeyType;

/// Challenge types a solver can answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum ChallengeType {
    /// See [RFC 8555 §8.3](https://datatracker.ietf.org/doc/html/rfc8555#section-8.3).
    #[serde(rename = "http-01")]
    Http01,

    /// See [RFC 8555 §8.4](https://datatracker.ietf.org/doc/html/rfc8555#section-8.4).
    #[serde(rename = "dns-01")]
    Dns01,

    /// See [RFC 8737](https://datatracker.ietf.org/doc/html/rfc8737).
    #[serde(rename = "tls-alpn-01")]
    TlsAlpn01,
}

impl ChallengeType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeType::Http01 => "http-01",
            ChallengeType::Dns01 => "dns-01",
            ChallengeType::TlsAlpn01 => "tls-alpn-01",
        }
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Two-phase proof of domain control.
///
/// `key_auth` is the key authorization of [RFC 8555 §8.1]; DNS solvers publish
/// [`dns01_value`] of it.
///
/// [RFC 8555 §8.1]: https://datatracker.ietf.org/doc/html/rfc8555#section-8.1
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    fn challenge_type(&self) -> ChallengeType;

    async fn present(&self, domain: &str, token: &str, key_auth: &str) -> eyre::Result<()>;

    async fn clean_up(&self, domain: &str, token: &str, key_auth: &str) -> eyre::Result<()>;
}

/// Account registration with one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub directory_url: String,

    /// Account URL, used as the JWS key ID.
    pub account_url: String,

    pub account: api::Account,
}

/// Everything one certificate exchange needs.
pub struct ObtainRequest<'a> {
    pub directory_url: &'a str,
    pub account_key: &'a AccountKey,
    pub registration: &'a Registration,

    /// Domains to certify; the first becomes the subject CN.
    pub domains: &'a [String],

    pub key_type: KeyType,
    pub solver: &'a dyn ChallengeSolver,

    /// Upper bound for the exchange with the server. A challenge presented before it runs out
    /// is still cleaned up.
    pub timeout: Duration,

    /// Wait between presenting a DNS challenge and asking the server to validate it.
    pub dns_propagation_delay: Option<Duration>,

    pub poll_interval: Duration,
}

/// Issues certificates.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    async fn register(
        &self,
        directory_url: &str,
        account_key: &AccountKey,
        email: &str,
        eab: Option<&ExternalAccountBinding>,
    ) -> eyre::Result<Registration>;

    async fn obtain(&self, req: ObtainRequest<'_>) -> eyre::Result<CertificateMaterial>;
}

/// [`CertificateAuthority`] speaking ACME v2 over HTTPS.
///
/// Directories are fetched once per URL and shared, together with their nonce pool, between all
/// accounts.
#[derive(Debug)]
pub struct AcmeClient {
    client: reqwest::Client,
    directories: Mutex<HashMap<String, Arc<Directory>>>,
}

impl AcmeClient {
    pub fn new() -> eyre::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(30))
            .build()
            .wrap_err("failed to build HTTP client")?;

        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        AcmeClient {
            client,
            directories: Mutex::default(),
        }
    }

    async fn directory(&self, url: &str) -> eyre::Result<Arc<Directory>> {
        let mut directories = self.directories.lock().await;

        if let Some(directory) = directories.get(url) {
            return Ok(Arc::clone(directory));
        }

        log::debug!("fetching ACME directory {url}");
        let directory = Arc::new(Directory::fetch(&self.client, url).await?);
        directories.insert(url.to_owned(), Arc::clone(&directory));

        Ok(directory)
    }
}

#[async_trait]
impl CertificateAuthority for AcmeClient {
    async fn register(
        &self,
        directory_url: &str,
        account_key: &AccountKey,
        email: &str,
        eab: Option<&ExternalAccountBinding>,
    ) -> eyre::Result<Registration> {
        let directory = self.directory(directory_url).await?;

        directory
            .register(account_key, email, eab)
            .await
            .wrap_err_with(|| format!("failed to register {email} with {directory_url}"))
    }

    async fn obtain(&self, req: ObtainRequest<'_>) -> eyre::Result<CertificateMaterial> {
        if req.registration.directory_url != req.directory_url {
            return Err(eyre!(
                "registration belongs to {}, not {}",
                req.registration.directory_url,
                req.directory_url
            ));
        }

        let directory = self.directory(req.directory_url).await?;
        let transport = directory.transport(req.account_key, req.registration);

        let material = order::exchange(&directory, &transport, &req).await?;

        match material.valid_days_left() {
            Ok(days) => log::info!(
                "issued certificate domain={} valid_days_left={days}",
                material.domain
            ),
            Err(err) => log::warn!(
                "issued certificate domain={} could not be inspected: {err:#}",
                material.domain
            ),
        }

        Ok(material)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        provider::AdnsProvider,
        test::{with_directory_server, FakeDevice, RecordingSolver, TestServer},
    };

    async fn issue(solver: &dyn ChallengeSolver, server: &TestServer) -> eyre::Result<CertificateMaterial> {
        issue_within(solver, server, Duration::from_secs(10), None).await
    }

    async fn issue_within(
        solver: &dyn ChallengeSolver,
        server: &TestServer,
        timeout: Duration,
        dns_propagation_delay: Option<Duration>,
    ) -> eyre::Result<CertificateMaterial> {
        let client = AcmeClient::with_client(reqwest::Client::new());
        let key = AccountKey::generate();

        let registration = client
            .register(&server.dir_url, &key, "foo@bar.com", None)
            .await?;

        let domains = ["acme-test.example.com".to_owned()];

        client
            .obtain(ObtainRequest {
                directory_url: &server.dir_url,
                account_key: &key,
                registration: &registration,
                domains: &domains,
                key_type: KeyType::Ec256,
                solver,
                timeout,
                dns_propagation_delay,
                poll_interval: Duration::from_millis(1),
            })
            .await
    }

    #[tokio::test]
    async fn obtains_certificate_through_http_challenge() {
        let server = with_directory_server();
        let solver = RecordingSolver::default();

        let material = issue(&solver, &server).await.unwrap();

        assert_eq!(material.domain, "acme-test.example.com");
        assert!(material.certificate.contains("BEGIN CERTIFICATE"));
        assert!(material.private_key.contains("BEGIN PRIVATE KEY"));
        assert_eq!(
            solver.calls(),
            ["present acme-test.example.com", "clean_up acme-test.example.com"]
        );
    }

    #[tokio::test]
    async fn rejected_challenge_fails_exchange_after_clean_up() {
        let server = crate::test::with_failing_directory_server();
        let solver = RecordingSolver::default();

        let err = issue(&solver, &server).await.unwrap_err();

        assert!(format!("{err:#}").contains("unauthorized"));
        assert_eq!(solver.calls().len(), 2);
    }

    #[tokio::test]
    async fn missing_challenge_type_is_reported() {
        let server = with_directory_server();
        let solver = RecordingSolver {
            challenge_type: Some(ChallengeType::TlsAlpn01),
            ..Default::default()
        };
        // the mock server only offers http-01 and dns-01
        let err = issue(&solver, &server).await.unwrap_err();

        assert!(err.to_string().contains("no tls-alpn-01 challenge"));
        assert!(solver.calls().is_empty());
    }

    #[tokio::test]
    async fn timeout_after_present_still_cleans_up() {
        let server = with_directory_server();
        let solver = RecordingSolver {
            challenge_type: Some(ChallengeType::Dns01),
            ..Default::default()
        };

        // the deadline passes while waiting for DNS propagation
        let err = issue_within(
            &solver,
            &server,
            Duration::from_millis(200),
            Some(Duration::from_secs(10)),
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("timed out"), "{err:#}");
        assert_eq!(
            solver.calls(),
            ["present acme-test.example.com", "clean_up acme-test.example.com"]
        );
    }

    #[tokio::test]
    async fn timed_out_dns_challenge_leaves_no_txt_record() {
        let server = with_directory_server();
        let device = Arc::new(FakeDevice::default());
        let solver = AdnsProvider::new(device.clone());

        issue_within(
            &solver,
            &server,
            Duration::from_millis(200),
            Some(Duration::from_secs(10)),
        )
        .await
        .unwrap_err();

        assert_eq!(device.txt_record_count(), 0);
    }
}
