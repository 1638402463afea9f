//! External account binding, see [RFC 8555 §7.3.4].
//!
//! [RFC 8555 §7.3.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.3.4

use base64::prelude::*;
use eyre::{eyre, WrapErr as _};
use hmac::{Hmac, Mac as _};
use serde::Deserialize;
use sha2::Sha256;

use super::jws::{jws_with_mac, Jwk, JwsProtectedHeader};

/// Credentials issued by a CA operator to tie a new ACME account to an existing customer account.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAccountBinding {
    /// Key identifier supplied by the CA.
    pub kid: String,

    /// MAC key, base64url encoded.
    pub hmac_encoded: String,
}

impl std::fmt::Debug for ExternalAccountBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalAccountBinding")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

impl ExternalAccountBinding {
    /// Produces the `externalAccountBinding` member of a newAccount payload.
    pub(crate) fn bind(&self, account_jwk: &Jwk, new_account_url: &str) -> eyre::Result<serde_json::Value> {
        let mac_key = decode_mac_key(&self.hmac_encoded)?;

        let protected = JwsProtectedHeader::new_eab(&self.kid, new_account_url);
        let jws = jws_with_mac(protected, account_jwk, |input| {
            let mut mac = Hmac::<Sha256>::new_from_slice(&mac_key)
                .map_err(|_| eyre!("invalid external account binding MAC key"))?;
            mac.update(input);
            Ok(mac.finalize().into_bytes().to_vec())
        })?;

        Ok(serde_json::to_value(jws)?)
    }
}

fn decode_mac_key(encoded: &str) -> eyre::Result<Vec<u8>> {
    let trimmed = encoded.trim().trim_end_matches('=');
    BASE64_URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| BASE64_STANDARD_NO_PAD.decode(trimmed))
        .wrap_err("external account binding MAC key is not valid base64")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::key::AccountKey;

    #[test]
    fn binding_is_flattened_hs256_jws() {
        let eab = ExternalAccountBinding {
            kid: "kid-7".to_owned(),
            hmac_encoded: BASE64_URL_SAFE_NO_PAD.encode(b"0123456789abcdef0123456789abcdef"),
        };
        let jwk = AccountKey::generate().jwk().unwrap();

        let value = eab.bind(&jwk, "https://ca.test/new-acct").unwrap();

        let protected = value["protected"].as_str().unwrap();
        let header: serde_json::Value =
            serde_json::from_slice(&BASE64_URL_SAFE_NO_PAD.decode(protected).unwrap()).unwrap();
        assert_eq!(header["alg"], "HS256");
        assert_eq!(header["kid"], "kid-7");
        assert_eq!(header["url"], "https://ca.test/new-acct");

        // HMAC-SHA256 output is 32 bytes
        let signature = value["signature"].as_str().unwrap();
        assert_eq!(BASE64_URL_SAFE_NO_PAD.decode(signature).unwrap().len(), 32);
    }

    #[test]
    fn rejects_garbage_mac_key() {
        assert!(decode_mac_key("not base64 !!").is_err());
    }
}
