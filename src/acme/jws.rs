//! See [RFC 8555 §6.2](https://datatracker.ietf.org/doc/html/rfc8555#section-6.2).

use base64::prelude::*;
use eyre::eyre;
use serde::{Deserialize, Serialize};

use super::key::AccountKey;

/// JWT Protected Header scheme as defined in [RFC 8555 §6.2].
///
/// > For newAccount requests, and for revokeCert requests authenticated by a certificate key,
/// there MUST be a "jwk" field. This field MUST contain the public key corresponding to the
/// private key used to sign the JWS.
/// >
/// > For all other requests, the request is signed using an existing account, and there MUST be a
/// "kid" field. This field MUST contain the account URL received by POSTing to the newAccount
/// resource.
///
/// [RFC 8555 §6.2]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.2
#[derive(Debug, Serialize, Deserialize, Default)]
pub(crate) struct JwsProtectedHeader {
    /// Algorithm.
    ///
    /// `ES256` for requests signed by the account key, `HS256` for the inner JWS of an external
    /// account binding.
    alg: String,

    /// Anti-replay nonce, as defined in [RFC 8555 §6.5].
    ///
    /// Absent only in the inner JWS of an external account binding.
    ///
    /// [RFC 8555 §6.5]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.5
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<String>,

    /// Defined in [RFC 8555 §6.4].
    ///
    /// [RFC 8555 §6.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.4
    url: String,

    /// JSON Web Key.
    ///
    /// Mutually exclusive with `kid` field.
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<Jwk>,

    /// Key ID.
    ///
    /// Mutually exclusive with `jwk` field.
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

impl JwsProtectedHeader {
    pub(crate) fn new_jwk(jwk: Jwk, url: &str, nonce: String) -> Self {
        JwsProtectedHeader {
            alg: "ES256".to_owned(),
            url: url.to_owned(),
            nonce: Some(nonce),
            jwk: Some(jwk),
            ..Default::default()
        }
    }

    pub(crate) fn new_kid(kid: &str, url: &str, nonce: String) -> Self {
        JwsProtectedHeader {
            alg: "ES256".to_owned(),
            url: url.to_owned(),
            nonce: Some(nonce),
            kid: Some(kid.to_owned()),
            ..Default::default()
        }
    }

    /// Header of the MAC-protected inner JWS used for external account binding.
    pub(crate) fn new_eab(kid: &str, url: &str) -> Self {
        JwsProtectedHeader {
            alg: "HS256".to_owned(),
            url: url.to_owned(),
            kid: Some(kid.to_owned()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct Jwk {
    alg: String,
    crv: String,
    kty: String,
    #[serde(rename = "use")]
    _use: String,
    x: String,
    y: String,
}

impl TryFrom<&AccountKey> for Jwk {
    type Error = eyre::Error;

    fn try_from(key: &AccountKey) -> eyre::Result<Self> {
        let point = key.signing_key().verifying_key().to_encoded_point(false);

        let x = point.x().ok_or_else(|| eyre!("account key has no x coordinate"))?;
        let y = point.y().ok_or_else(|| eyre!("account key has no y coordinate"))?;

        Ok(Jwk {
            alg: "ES256".to_owned(),
            kty: "EC".to_owned(),
            crv: "P-256".to_owned(),
            _use: "sig".to_owned(),
            x: BASE64_URL_SAFE_NO_PAD.encode(x),
            y: BASE64_URL_SAFE_NO_PAD.encode(y),
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
// LEXICAL ORDER OF FIELDS MATTER!
pub(crate) struct JwkThumb {
    crv: String,
    kty: String,
    x: String,
    y: String,
}

impl From<&Jwk> for JwkThumb {
    fn from(a: &Jwk) -> Self {
        JwkThumb {
            crv: a.crv.clone(),
            kty: a.kty.clone(),
            x: a.x.clone(),
            y: a.y.clone(),
        }
    }
}

/// <https://datatracker.ietf.org/doc/html/rfc7515#section-7.2.2>
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct FlattenedJsonJws {
    protected: String,
    payload: String,
    signature: String,
}

/// Encodes `header` and `payload` as the base64url signing input of [RFC 7515 §5.1].
///
/// A payload serializing to `""` is the POST-as-GET marker and stays empty.
///
/// [RFC 7515 §5.1]: https://datatracker.ietf.org/doc/html/rfc7515#section-5.1
fn signing_input<T: Serialize + ?Sized>(
    protected: &JwsProtectedHeader,
    payload: &T,
) -> eyre::Result<(String, String)> {
    let header = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_string(protected)?);

    let payload_json = serde_json::to_string(payload)?;
    let payload = if payload_json == "\"\"" {
        String::new()
    } else {
        BASE64_URL_SAFE_NO_PAD.encode(payload_json)
    };

    Ok((header, payload))
}

/// Signs with the account key and returns the flattened JWS.
pub(crate) fn jws_with<T: Serialize + ?Sized>(
    protected: JwsProtectedHeader,
    key: &AccountKey,
    payload: &T,
) -> eyre::Result<FlattenedJsonJws> {
    let (protected, payload) = signing_input(&protected, payload)?;
    let signature = key.sign(format!("{protected}.{payload}").as_bytes())?;

    Ok(FlattenedJsonJws {
        protected,
        payload,
        signature: BASE64_URL_SAFE_NO_PAD.encode(signature),
    })
}

/// Signs with a MAC function instead of the account key.
pub(crate) fn jws_with_mac<T, F>(
    protected: JwsProtectedHeader,
    payload: &T,
    mac: F,
) -> eyre::Result<FlattenedJsonJws>
where
    T: Serialize + ?Sized,
    F: FnOnce(&[u8]) -> eyre::Result<Vec<u8>>,
{
    let (protected, payload) = signing_input(&protected, payload)?;
    let signature = mac(format!("{protected}.{payload}").as_bytes())?;

    Ok(FlattenedJsonJws {
        protected,
        payload,
        signature: BASE64_URL_SAFE_NO_PAD.encode(signature),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::api;

    #[test]
    fn post_as_get_has_empty_payload() {
        let key = AccountKey::generate();
        let header = JwsProtectedHeader::new_kid("kid", "https://ca/x", "n".to_owned());
        let jws = jws_with(header, &key, &api::EmptyString).unwrap();
        assert!(jws.payload.is_empty());
        assert!(!jws.signature.is_empty());
    }

    #[test]
    fn eab_header_has_no_nonce() {
        let header = JwsProtectedHeader::new_eab("kid-1", "https://ca/new-acct");
        let json = serde_json::to_value(&header).unwrap();
        assert_eq!(json["alg"], "HS256");
        assert_eq!(json["kid"], "kid-1");
        assert!(json.get("nonce").is_none());
        assert!(json.get("jwk").is_none());
    }
}
