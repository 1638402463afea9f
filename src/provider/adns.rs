use std::sync::Arc;

use async_trait::async_trait;
use eyre::WrapErr as _;

use super::dns::challenge_fqdn;
use crate::{
    acme::{dns01_value, ChallengeSolver, ChallengeType},
    device::DeviceClient,
};

const TXT_TTL: u32 = 30;

/// Answers DNS-01 challenges with TXT records in the device's authoritative DNS service.
pub struct AdnsProvider {
    device: Arc<dyn DeviceClient>,
}

impl AdnsProvider {
    pub fn new(device: Arc<dyn DeviceClient>) -> Self {
        AdnsProvider { device }
    }
}

#[async_trait]
impl ChallengeSolver for AdnsProvider {
    fn challenge_type(&self) -> ChallengeType {
        ChallengeType::Dns01
    }

    async fn present(&self, domain: &str, _token: &str, key_auth: &str) -> eyre::Result<()> {
        let fqdn = challenge_fqdn(domain);

        self.device
            .add_txt_record(&fqdn, &dns01_value(key_auth), TXT_TTL)
            .await
            .wrap_err_with(|| format!("failed to add TXT record {fqdn}"))?;

        log::info!(
            "presented dns-01 domain={domain} device={} record={fqdn}",
            self.device.name()
        );

        Ok(())
    }

    /// Deletes only the record sets carrying this challenge's value; other values published
    /// under the same name (e.g. for a parallel wildcard order) stay.
    async fn clean_up(&self, domain: &str, _token: &str, key_auth: &str) -> eyre::Result<()> {
        let fqdn = challenge_fqdn(domain);
        let value = dns01_value(key_auth);

        let records = self
            .device
            .txt_records(&fqdn)
            .await
            .wrap_err_with(|| format!("failed to read TXT records {fqdn}"))?;

        for record in records.iter().filter(|r| r.values.contains(&value)) {
            self.device
                .delete_txt_record(&fqdn, record.record_id)
                .await
                .wrap_err_with(|| {
                    format!("failed to delete TXT record {fqdn} id={}", record.record_id)
                })?;
        }

        log::debug!("cleaned up dns-01 domain={domain} device={}", self.device.name());

        Ok(())
    }
}
