use std::sync::Arc;

use eyre::{eyre, WrapErr as _};

use super::{
    api,
    eab::ExternalAccountBinding,
    key::AccountKey,
    req::{req_expect_header, req_get, req_handle_error},
    trans::{NoncePool, Transport},
    Registration,
};

pub(crate) const LETSENCRYPT_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";
pub(crate) const LETSENCRYPT_STAGING_URL: &str =
    "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Entry point for accessing an ACME API.
///
/// Holds the resource URLs advertised by the server and the nonce pool shared by every account
/// talking to it.
#[derive(Debug)]
pub(crate) struct Directory {
    url: String,
    nonce_pool: Arc<NoncePool>,
    api_directory: api::Directory,
}

impl Directory {
    /// Fetches the directory document at `url`.
    pub(crate) async fn fetch(client: &reqwest::Client, url: &str) -> eyre::Result<Directory> {
        let res = req_handle_error(req_get(client, url).await?).await?;
        let api_directory = res
            .json::<api::Directory>()
            .await
            .wrap_err_with(|| format!("invalid ACME directory at {url}"))?;

        let nonce_pool = Arc::new(NoncePool::new(client.clone(), &api_directory.new_nonce));

        Ok(Directory {
            url: url.to_owned(),
            nonce_pool,
            api_directory,
        })
    }

    pub(crate) fn api_directory(&self) -> &api::Directory {
        &self.api_directory
    }

    /// Registers `key` with this directory, or looks up the account already bound to it.
    ///
    /// For existing keys the server answers with the `Location` of the account, which becomes the
    /// key ID for later requests.
    pub(crate) async fn register(
        &self,
        key: &AccountKey,
        email: &str,
        eab: Option<&ExternalAccountBinding>,
    ) -> eyre::Result<Registration> {
        let new_account_url = self.api_directory.new_account.as_str();

        let external_account_binding = match eab {
            Some(eab) => Some(eab.bind(&key.jwk()?, new_account_url)?),
            None if self.external_account_required() => {
                return Err(eyre!(
                    "directory {} requires an external account binding",
                    self.url
                ));
            }
            None => None,
        };

        let account = api::Account {
            contact: (!email.is_empty()).then(|| vec![format!("mailto:{email}")]),
            terms_of_service_agreed: Some(true),
            external_account_binding,
            ..Default::default()
        };

        let transport = Transport::new(Arc::clone(&self.nonce_pool), key.clone());
        let res = transport.call_jwk(new_account_url, &account).await?;

        let account_url = req_expect_header(&res, "location")?;
        log::debug!("key ID is: {account_url}");

        let account = res.json::<api::Account>().await?;

        if !account.is_usable() {
            return Err(eyre!(
                "account {account_url} is in status {:?}",
                account.status
            ));
        }

        Ok(Registration {
            directory_url: self.url.clone(),
            account_url,
            account,
        })
    }

    /// Transport signing with `key` under the key ID of `registration`.
    pub(crate) fn transport(&self, key: &AccountKey, registration: &Registration) -> Transport {
        let mut transport = Transport::new(Arc::clone(&self.nonce_pool), key.clone());
        transport.set_key_id(registration.account_url.clone());
        transport
    }

    fn external_account_required(&self) -> bool {
        self.api_directory.meta.external_account_required
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_directory() {
        let server = crate::test::with_directory_server();

        let dir = Directory::fetch(&reqwest::Client::new(), &server.dir_url)
            .await
            .unwrap();
        assert!(dir.api_directory().new_order.ends_with("/acme/new-order"));
    }

    #[tokio::test]
    async fn test_create_account() {
        let server = crate::test::with_directory_server();

        let dir = Directory::fetch(&reqwest::Client::new(), &server.dir_url)
            .await
            .unwrap();

        let registration = dir
            .register(&AccountKey::generate(), "foo@bar.com", None)
            .await
            .unwrap();
        assert!(registration.account_url.ends_with("/acme/acct/7728515"));
        assert_eq!(registration.directory_url, server.dir_url);
    }
}
