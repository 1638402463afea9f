//! Order life cycle.
//!
//! 1. Create the order for all domains.
//! 2. Prove ownership of every domain whose authorization is not yet valid.
//! 3. Submit the CSR ("finalize") and wait for issuance.
//! 4. Download the certificate chain.

use std::{collections::HashSet, future::Future, time::Duration};

use base64::prelude::*;
use eyre::{eyre, WrapErr as _};
use tokio::time::Instant;

use super::{
    api,
    auth::{fetch_authorization, validate_challenge, ChallengeAttempt},
    cert::{CertificateKey, CertificateMaterial},
    directory::Directory,
    req::req_expect_header,
    trans::Transport,
    ChallengeType, ObtainRequest,
};

/// An order together with the URL it lives at.
struct Order {
    api_order: api::Order,
    url: String,
}

/// Point in time by which the exchange has to be done.
///
/// Server round trips are bounded by it, challenge presentation and clean-up are not: a
/// presented challenge is always removed again.
pub(crate) struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub(crate) fn after(budget: Duration) -> Self {
        Deadline {
            at: Instant::now() + budget,
            budget,
        }
    }

    pub(crate) async fn bound<T>(
        &self,
        fut: impl Future<Output = eyre::Result<T>>,
    ) -> eyre::Result<T> {
        tokio::time::timeout_at(self.at, fut)
            .await
            .map_err(|_| eyre!("certificate exchange timed out after {:?}", self.budget))?
    }
}

/// Runs the whole exchange for `req` against `directory` within `req.timeout`.
pub(crate) async fn exchange(
    directory: &Directory,
    transport: &Transport,
    req: &ObtainRequest<'_>,
) -> eyre::Result<CertificateMaterial> {
    let deadline = Deadline::after(req.timeout);

    let mut order = deadline
        .bound(new_order(directory, transport, req.domains))
        .await?;
    log::debug!("created order {}", order.url);

    authorize(transport, &order, req, &deadline).await?;

    let key = CertificateKey::generate(req.key_type)?;
    order = deadline
        .bound(finalize(transport, order, &key, req.poll_interval))
        .await?;

    let certificate_url = order
        .api_order
        .certificate
        .as_deref()
        .ok_or_else(|| eyre!("order {} is valid but has no certificate URL", order.url))?;

    let chain = deadline
        .bound(async {
            let res = transport
                .call_kid(certificate_url, &api::EmptyString)
                .await?;
            Ok::<_, eyre::Report>(res.text().await?)
        })
        .await?;

    CertificateMaterial::from_chain(&req.domains[0], &chain, key.to_pkcs8_pem()?)
}

async fn new_order(
    directory: &Directory,
    transport: &Transport,
    domains: &[String],
) -> eyre::Result<Order> {
    let mut dedup = HashSet::new();
    let identifiers = domains
        .iter()
        .filter(|domain| dedup.insert(domain.as_str()))
        .map(|domain| api::Identifier::dns(domain))
        .collect::<Vec<_>>();

    if identifiers.is_empty() {
        return Err(eyre!("cannot order a certificate without domains"));
    }

    let res = transport
        .call_kid(
            &directory.api_directory().new_order,
            &api::NewOrder {
                identifiers: &identifiers,
            },
        )
        .await?;
    let url = req_expect_header(&res, "location")?;

    let mut api_order = api::Order::requested(identifiers);
    api_order.refresh(res.json::<api::Order>().await?)?;

    Ok(Order { api_order, url })
}

async fn authorize(
    transport: &Transport,
    order: &Order,
    req: &ObtainRequest<'_>,
    deadline: &Deadline,
) -> eyre::Result<()> {
    let challenge_type = req.solver.challenge_type();

    for auth_url in &order.api_order.authorizations {
        let auth = deadline
            .bound(fetch_authorization(transport, auth_url))
            .await?;
        let domain = auth.domain();

        if matches!(auth.status, api::AuthorizationStatus::Valid) {
            log::debug!("authorization for {domain} is already valid");
            continue;
        }

        let challenge = auth
            .challenge(challenge_type.as_str())
            .ok_or_else(|| eyre!("server offers no {challenge_type} challenge for {domain}"))?;

        let key_auth = transport.account_key().key_authorization(&challenge.token)?;

        let validate = async {
            if challenge_type == ChallengeType::Dns01 {
                if let Some(delay) = req.dns_propagation_delay {
                    log::debug!("waiting {delay:?} for DNS propagation of {domain}");
                    tokio::time::sleep(delay).await;
                }
            }

            validate_challenge(transport, &challenge.url, auth_url, req.poll_interval).await
        };

        ChallengeAttempt::new(req.solver, &domain, &challenge.token, &key_auth)
            .run(deadline.bound(validate))
            .await?;
    }

    Ok(())
}

async fn finalize(
    transport: &Transport,
    mut order: Order,
    key: &CertificateKey,
    delay: Duration,
) -> eyre::Result<Order> {
    order = wait_for_order(transport, order, delay, |status| {
        matches!(status, Some(api::OrderStatus::Pending))
    })
    .await?;

    if !matches!(order.api_order.status, Some(api::OrderStatus::Ready)) {
        return Err(order_failure(&order, "not ready for finalization"));
    }

    let domains = order
        .api_order
        .domains()
        .into_iter()
        .map(ToOwned::to_owned)
        .collect::<Vec<_>>();

    // this is not the same as PEM.
    let csr = BASE64_URL_SAFE_NO_PAD.encode(key.create_csr(&domains)?);

    transport
        .call_kid(&order.api_order.finalize, &api::Finalize { csr })
        .await
        .wrap_err("finalize request rejected")?;

    // wait for the status to not be processing.
    // valid -> cert is issued
    // invalid -> the whole thing is off
    order = wait_for_order(transport, order, delay, |status| {
        matches!(
            status,
            Some(api::OrderStatus::Ready | api::OrderStatus::Processing)
        )
    })
    .await?;

    if !matches!(order.api_order.status, Some(api::OrderStatus::Valid)) {
        return Err(order_failure(&order, "not issued"));
    }

    Ok(order)
}

/// Refreshes the order (POST-as-GET) for as long as `keep_waiting` holds.
async fn wait_for_order<F>(
    transport: &Transport,
    mut order: Order,
    delay: Duration,
    keep_waiting: F,
) -> eyre::Result<Order>
where
    F: Fn(Option<api::OrderStatus>) -> bool,
{
    loop {
        let res = transport.call_kid(&order.url, &api::EmptyString).await?;
        order.api_order.refresh(res.json::<api::Order>().await?)?;

        if !keep_waiting(order.api_order.status) {
            return Ok(order);
        }

        tokio::time::sleep(delay).await;
    }
}

fn order_failure(order: &Order, what: &str) -> eyre::Report {
    match &order.api_order.error {
        Some(problem) => eyre!(
            "order {} {what} (status {:?}): {problem}",
            order.url,
            order.api_order.status
        ),
        None => eyre!("order {} {what} (status {:?})", order.url, order.api_order.status),
    }
}
