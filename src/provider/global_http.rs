use std::sync::Arc;

use async_trait::async_trait;
use eyre::WrapErr as _;

use crate::{
    acme::{ChallengeSolver, ChallengeType},
    device::{DeviceClient, ResponderAction, ResponderPolicy},
};

/// Priorities above this are probed for a free slot.
const PRIORITY_BASE: u32 = 33500;

/// Answers HTTP-01 challenges with a responder policy bound at the device's global
/// `REQ_OVERRIDE` bind point.
///
/// Objects are named `RSA_ACME_<domain>_<timestamp>` (action) and `RSP_ACME_<domain>_<timestamp>`
/// (policy), so leftovers of a run can be traced back to it.
pub struct GlobalHttpProvider {
    device: Arc<dyn DeviceClient>,
    timestamp: String,
    max_retries: u32,
}

impl GlobalHttpProvider {
    pub fn new(device: Arc<dyn DeviceClient>, timestamp: &str, max_retries: u32) -> Self {
        GlobalHttpProvider {
            device,
            timestamp: timestamp.to_owned(),
            max_retries,
        }
    }

    fn action_name(&self, domain: &str) -> String {
        format!("RSA_ACME_{domain}_{}", self.timestamp)
    }

    fn policy_name(&self, domain: &str) -> String {
        format!("RSP_ACME_{domain}_{}", self.timestamp)
    }

    /// Binds `policy` at the lowest free priority above the base.
    ///
    /// Other runs may claim the probed priority between probing and binding; a failed bind
    /// re-probes until the retry budget is spent.
    async fn bind_policy(&self, policy: &str) -> eyre::Result<u32> {
        let mut retries = 0;

        loop {
            retries += 1;

            let used = self
                .device
                .global_responder_priorities()
                .await
                .wrap_err("failed to read global responder bindings")?;

            let priority = next_free_priority(&used);

            match self.device.bind_global_responder_policy(policy, priority).await {
                Ok(()) => return Ok(priority),

                Err(err) if retries >= self.max_retries.max(1) => {
                    return Err(err).wrap_err_with(|| {
                        format!("failed to bind responder policy {policy} after {retries} attempts")
                    });
                }

                Err(err) => {
                    log::debug!("binding policy={policy} priority={priority} failed, retrying: {err}");
                }
            }
        }
    }
}

pub(crate) fn next_free_priority(used: &[u32]) -> u32 {
    let mut priority = PRIORITY_BASE + 1;
    while used.contains(&priority) {
        priority += 1;
    }
    priority
}

fn responder_target(key_auth: &str) -> String {
    format!(r#""HTTP/1.1 200 OK\r\n\r\n{key_auth}""#)
}

fn responder_rule(domain: &str, token: &str) -> String {
    format!(
        r#"HTTP.REQ.HOSTNAME.EQ("{domain}") && HTTP.REQ.URL.EQ("/.well-known/acme-challenge/{token}")"#
    )
}

#[async_trait]
impl ChallengeSolver for GlobalHttpProvider {
    fn challenge_type(&self) -> ChallengeType {
        ChallengeType::Http01
    }

    async fn present(&self, domain: &str, token: &str, key_auth: &str) -> eyre::Result<()> {
        let action = ResponderAction {
            name: self.action_name(domain),
            action_type: "respondwith".to_owned(),
            target: responder_target(key_auth),
        };

        self.device
            .add_responder_action(&action)
            .await
            .wrap_err_with(|| format!("failed to add responder action {}", action.name))?;

        let policy = ResponderPolicy {
            name: self.policy_name(domain),
            rule: responder_rule(domain, token),
            action: action.name.clone(),
        };

        self.device
            .add_responder_policy(&policy)
            .await
            .wrap_err_with(|| format!("failed to add responder policy {}", policy.name))?;

        let priority = self.bind_policy(&policy.name).await?;

        log::info!(
            "presented http-01 domain={domain} device={} policy={} priority={priority}",
            self.device.name(),
            policy.name
        );

        Ok(())
    }

    async fn clean_up(&self, domain: &str, _token: &str, _key_auth: &str) -> eyre::Result<()> {
        let policy = self.policy_name(domain);
        let action = self.action_name(domain);

        self.device
            .unbind_global_responder_policy(&policy)
            .await
            .wrap_err_with(|| format!("failed to unbind responder policy {policy}"))?;

        self.device
            .delete_responder_policy(&policy)
            .await
            .wrap_err_with(|| format!("failed to delete responder policy {policy}"))?;

        self.device
            .delete_responder_action(&action)
            .await
            .wrap_err_with(|| format!("failed to delete responder action {action}"))?;

        log::debug!("cleaned up http-01 domain={domain} device={}", self.device.name());

        Ok(())
    }
}
