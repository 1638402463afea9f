use std::{collections::VecDeque, sync::Arc};

use eyre::eyre;
use parking_lot::Mutex;
use serde::Serialize;

use super::{
    jws::{jws_with, JwsProtectedHeader},
    key::AccountKey,
    req::{req_expect_header, req_handle_error, req_head, req_post},
};

/// Number of attempts made for one call when the server keeps rejecting our nonce or JWS.
const MAX_ATTEMPTS: usize = 5;

/// JWS payload and nonce handling for requests to the API.
///
/// Setup is:
///
/// 1. `Transport::new()`
/// 2. `call_jwk()` against newAccount url
/// 3. `set_key_id` from the returned `Location` header.
/// 4. `call_kid()` for all calls after that.
#[derive(Clone, Debug)]
pub(crate) struct Transport {
    account_key: AccountKey,
    key_id: Option<String>,
    nonce_pool: Arc<NoncePool>,
}

impl Transport {
    pub(crate) fn new(nonce_pool: Arc<NoncePool>, account_key: AccountKey) -> Self {
        Transport {
            account_key,
            key_id: None,
            nonce_pool,
        }
    }

    /// Update the key ID once it is known (part of setting up the transport).
    pub(crate) fn set_key_id(&mut self, kid: String) {
        self.key_id = Some(kid);
    }

    /// The key used in the transport.
    pub(crate) fn account_key(&self) -> &AccountKey {
        &self.account_key
    }

    /// Make call using the full JWK.
    ///
    /// Only needed for the newAccount request.
    pub(crate) async fn call_jwk<T>(&self, url: &str, body: &T) -> eyre::Result<reqwest::Response>
    where
        T: Serialize + ?Sized,
    {
        self.do_call(url, body, |nonce| {
            let jwk = self.account_key.jwk()?;
            Ok(JwsProtectedHeader::new_jwk(jwk, url, nonce))
        })
        .await
    }

    /// Make call using the key ID.
    pub(crate) async fn call_kid<T>(&self, url: &str, body: &T) -> eyre::Result<reqwest::Response>
    where
        T: Serialize + ?Sized,
    {
        let kid = self
            .key_id
            .as_deref()
            .ok_or_else(|| eyre!("account is not registered with the directory"))?;

        self.do_call(url, body, |nonce| {
            Ok(JwsProtectedHeader::new_kid(kid, url, nonce))
        })
        .await
    }

    async fn do_call<T, F>(&self, url: &str, body: &T, header: F) -> eyre::Result<reqwest::Response>
    where
        T: Serialize + ?Sized,
        F: Fn(String) -> eyre::Result<JwsProtectedHeader>,
    {
        let mut attempt = 0;

        // The ACME API may at any point invalidate all nonces. If we detect such an
        // error, we retry with a fresh nonce.
        loop {
            attempt += 1;

            let nonce = self.nonce_pool.get_nonce().await?;
            let jws = jws_with(header(nonce)?, &self.account_key, body)?;
            let jws = serde_json::to_string(&jws)?;

            log::debug!("call endpoint: {url}");

            let response = req_post(self.nonce_pool.client(), url, jws).await?;

            // Regardless of the request being a success or not, there might be a nonce in the
            // response.
            self.nonce_pool.extract_nonce(&response);

            match req_handle_error(response).await {
                Ok(response) => return Ok(response),

                Err(problem)
                    if attempt < MAX_ATTEMPTS
                        && (problem.is_bad_nonce() || problem.is_jws_verification_error()) =>
                {
                    log::debug!("retrying {url} on: {problem}");
                }

                Err(problem) => return Err(problem.into()),
            }
        }
    }
}

/// Shared pool of nonces.
#[derive(Debug)]
pub(crate) struct NoncePool {
    client: reqwest::Client,
    nonce_url: String,
    pool: Mutex<VecDeque<String>>,
}

impl NoncePool {
    pub(crate) fn new(client: reqwest::Client, nonce_url: &str) -> Self {
        NoncePool {
            client,
            nonce_url: nonce_url.to_owned(),
            pool: Mutex::default(),
        }
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    fn extract_nonce(&self, res: &reqwest::Response) {
        let Some(nonce) = res
            .headers()
            .get("replay-nonce")
            .and_then(|value| value.to_str().ok())
        else {
            return;
        };

        log::trace!("extracting new nonce");

        let mut pool = self.pool.lock();

        pool.push_back(nonce.to_owned());

        if pool.len() > 10 {
            pool.pop_front();
        }
    }

    async fn get_nonce(&self) -> eyre::Result<String> {
        let pooled = self.pool.lock().pop_front();

        if let Some(nonce) = pooled {
            log::trace!("use previous nonce");
            return Ok(nonce);
        }

        log::trace!("request new nonce");
        let res = req_head(&self.client, &self.nonce_url).await?;

        Ok(req_expect_header(&res, "replay-nonce")?)
    }
}
