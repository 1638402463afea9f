use base64::prelude::*;
use eyre::WrapErr as _;
use p256::ecdsa::signature::Signer as _;
use sha2::{Digest as _, Sha256};

use super::jws::{Jwk, JwkThumb};

/// ES256 key identifying an account with a certificate authority.
///
/// The same key is reused for every directory the account registers with.
#[derive(Clone)]
pub struct AccountKey {
    signing_key: p256::ecdsa::SigningKey,
}

impl AccountKey {
    /// Generates a fresh P-256 account key.
    pub fn generate() -> Self {
        let csprng = &mut rand::thread_rng();
        AccountKey {
            signing_key: p256::ecdsa::SigningKey::random(csprng),
        }
    }

    pub(crate) fn jwk(&self) -> eyre::Result<Jwk> {
        Jwk::try_from(self)
    }

    pub(crate) fn signing_key(&self) -> &p256::ecdsa::SigningKey {
        &self.signing_key
    }

    /// Signs `data` and returns the raw `r || s` signature as used by JWS.
    pub(crate) fn sign(&self, data: &[u8]) -> eyre::Result<Vec<u8>> {
        let signature: p256::ecdsa::Signature = self
            .signing_key
            .try_sign(data)
            .wrap_err("failed to sign JWS payload")?;
        Ok(signature.to_bytes().to_vec())
    }

    /// Builds the key authorization for `token` as defined in [RFC 8555 §8.1].
    ///
    /// [RFC 8555 §8.1]: https://datatracker.ietf.org/doc/html/rfc8555#section-8.1
    pub fn key_authorization(&self, token: &str) -> eyre::Result<String> {
        let jwk = self.jwk()?;
        let jwk_json = serde_json::to_string(&JwkThumb::from(&jwk))?;
        let thumbprint = BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(jwk_json));
        Ok(format!("{token}.{thumbprint}"))
    }
}

impl std::fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountKey").finish_non_exhaustive()
    }
}

/// Value published in the `_acme-challenge` TXT record for a key authorization.
///
/// See [RFC 8555 §8.4](https://datatracker.ietf.org/doc/html/rfc8555#section-8.4).
pub fn dns01_value(key_authorization: &str) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(key_authorization))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_authorization_is_token_dot_thumbprint() {
        let key = AccountKey::generate();
        let key_auth = key.key_authorization("tok").unwrap();
        let (token, thumb) = key_auth.split_once('.').unwrap();
        assert_eq!(token, "tok");
        // base64url of a sha256 digest
        assert_eq!(thumb.len(), 43);
        assert_eq!(key_auth, key.key_authorization("tok").unwrap());
    }

    #[test]
    fn dns01_value_is_digest_of_key_authorization() {
        // sha256("abc") in base64url
        assert_eq!(
            dns01_value("abc"),
            "ungWv48Bz-pBQUDeXa4iI7ADYaOWF3qctBD_YfIAFa0",
        );
    }
}
