use std::time::Duration;

use async_trait::async_trait;
use eyre::{eyre, WrapErr as _};
use serde::Serialize;
use zeroize::Zeroizing;

use crate::acme::{dns01_value, ChallengeSolver, ChallengeType};

/// Name of the TXT record proving control of `domain`, with trailing dot.
///
/// A wildcard prefix is dropped; `*.example.com` is validated at `_acme-challenge.example.com.`.
pub fn challenge_fqdn(domain: &str) -> String {
    let domain = domain.strip_prefix("*.").unwrap_or(domain);
    format!("_acme-challenge.{}.", domain.trim_end_matches('.'))
}

#[derive(Debug, Serialize)]
struct WebhookRecord<'a> {
    fqdn: &'a str,
    value: &'a str,
}

/// DNS-01 solver delegating record changes to an HTTP endpoint.
///
/// Configured from the environment, usually through provider parameters:
///
/// - `DNS_WEBHOOK_CREATE_URL`: receives `POST {"fqdn": ..., "value": ...}` to create the record
/// - `DNS_WEBHOOK_DELETE_URL`: receives the same body to delete it
/// - `DNS_WEBHOOK_TOKEN` (optional): sent as bearer token
pub struct WebhookSolver {
    client: reqwest::Client,
    create_url: String,
    delete_url: String,
    token: Option<Zeroizing<String>>,
}

impl WebhookSolver {
    pub fn from_env() -> eyre::Result<Self> {
        let var = |name: &str| {
            std::env::var(name).wrap_err_with(|| format!("webhook solver needs {name}"))
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .wrap_err("failed to build HTTP client")?;

        Ok(WebhookSolver {
            client,
            create_url: var("DNS_WEBHOOK_CREATE_URL")?,
            delete_url: var("DNS_WEBHOOK_DELETE_URL")?,
            token: std::env::var("DNS_WEBHOOK_TOKEN").ok().map(Zeroizing::new),
        })
    }

    async fn call(&self, url: &str, fqdn: &str, value: &str) -> eyre::Result<()> {
        let mut req = self.client.post(url).json(&WebhookRecord { fqdn, value });

        if let Some(token) = &self.token {
            req = req.bearer_auth(token.as_str());
        }

        let res = req.send().await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(eyre!("webhook {url} answered {status}: {body}"));
        }

        Ok(())
    }
}

#[async_trait]
impl ChallengeSolver for WebhookSolver {
    fn challenge_type(&self) -> ChallengeType {
        ChallengeType::Dns01
    }

    async fn present(&self, domain: &str, _token: &str, key_auth: &str) -> eyre::Result<()> {
        let fqdn = challenge_fqdn(domain);

        self.call(&self.create_url, &fqdn, &dns01_value(key_auth))
            .await
            .wrap_err_with(|| format!("failed to create TXT record {fqdn}"))?;

        log::info!("presented dns-01 domain={domain} record={fqdn} via webhook");
        Ok(())
    }

    async fn clean_up(&self, domain: &str, _token: &str, key_auth: &str) -> eyre::Result<()> {
        let fqdn = challenge_fqdn(domain);

        self.call(&self.delete_url, &fqdn, &dns01_value(key_auth))
            .await
            .wrap_err_with(|| format!("failed to delete TXT record {fqdn}"))
    }
}
