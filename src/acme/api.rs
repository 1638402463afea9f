//! JSON payloads exchanged with an ACME server.
//!
//! Only the fields the exchange reads or sends are modelled; everything else a server returns is
//! ignored when deserializing.

use std::fmt;

use serde::{
    ser::{SerializeMap as _, Serializer},
    Deserialize, Serialize,
};

/// Serializes to `""`, the payload of a POST-as-GET request.
pub struct EmptyString;

impl Serialize for EmptyString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("")
    }
}

/// Serializes to `{}`, the payload telling the server a challenge is ready.
pub struct EmptyObject;

impl Serialize for EmptyObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_map(Some(0))?.end()
    }
}

/// Problem document ([RFC 7807]) as returned on errors ([RFC 8555 §6.7]).
///
/// [RFC 7807]: https://datatracker.ietf.org/doc/html/rfc7807
/// [RFC 8555 §6.7]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.7
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub kind: String,

    pub detail: Option<String>,

    pub subproblems: Option<Vec<Subproblem>>,
}

impl Problem {
    pub(crate) fn new(kind: impl Into<String>, detail: Option<String>) -> Self {
        Problem {
            kind: kind.into(),
            detail,
            subproblems: None,
        }
    }

    /// Servers use both the short and the URN form of `badNonce`.
    pub fn is_bad_nonce(&self) -> bool {
        matches!(
            self.kind.as_str(),
            "badNonce" | "urn:ietf:params:acme:error:badNonce"
        )
    }

    /// A malformed-request problem caused by a signature the server could not verify.
    pub fn is_jws_verification_error(&self) -> bool {
        matches!(
            self.kind.as_str(),
            "urn:ietf:params:acme:error:malformed" | "urn:acme:error:malformed"
        ) && self.detail.as_deref() == Some("JWS verification error")
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {detail}", self.kind),
            None => f.write_str(&self.kind),
        }
    }
}

impl std::error::Error for Problem {}

/// Per-identifier problem inside a compound [`Problem`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Subproblem {
    #[serde(rename = "type")]
    pub kind: String,
    pub detail: Option<String>,
    pub identifier: Option<Identifier>,
}

/// Resource URLs a server advertises ([RFC 8555 §7.1.1]).
///
/// [RFC 8555 §7.1.1]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.1
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
    pub new_nonce: String,
    pub new_account: String,
    pub new_order: String,

    #[serde(default)]
    pub meta: DirectoryMeta,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryMeta {
    /// New accounts must carry an external account binding.
    #[serde(default)]
    pub external_account_required: bool,
}

/// Account object, sent on registration and returned by the server ([RFC 8555 §7.1.2]).
///
/// [RFC 8555 §7.1.2]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.2
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<Vec<String>>,

    /// Flattened HS256 JWS over the account key, see [`crate::acme::ExternalAccountBinding`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_account_binding: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub terms_of_service_agreed: Option<bool>,
}

impl Account {
    /// An absent status is taken as valid; only an explicit other status is not.
    pub fn is_usable(&self) -> bool {
        self.status.as_deref().map_or(true, |status| status == "valid")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl Identifier {
    pub(crate) fn dns(value: &str) -> Self {
        Identifier {
            kind: "dns".to_owned(),
            value: value.to_owned(),
        }
    }
}

/// Payload of a newOrder request.
#[derive(Debug, Serialize)]
pub struct NewOrder<'a> {
    pub identifiers: &'a [Identifier],
}

/// [RFC 8555 §7.1.6](https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.6)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

/// Order object ([RFC 8555 §7.1.3]).
///
/// [RFC 8555 §7.1.3]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.3
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Order {
    pub status: Option<OrderStatus>,
    pub identifiers: Vec<Identifier>,
    pub error: Option<Problem>,

    #[serde(default)]
    pub authorizations: Vec<String>,

    pub finalize: String,
    pub certificate: Option<String>,
}

impl Order {
    /// Locally known order for `identifiers`, before the server has answered.
    pub(crate) fn requested(identifiers: Vec<Identifier>) -> Self {
        Order {
            identifiers,
            ..Default::default()
        }
    }

    /// Domains in the order they were requested.
    pub fn domains(&self) -> Vec<&str> {
        self.identifiers.iter().map(|id| id.value.as_str()).collect()
    }

    /// Takes over the server's view of the order but keeps the requested identifier order.
    ///
    /// Servers may list identifiers in any order, which would otherwise swap the CSR's common
    /// name with one of its alternative names.
    pub(crate) fn refresh(&mut self, mut fresh: Order) -> eyre::Result<()> {
        let same_identifiers = fresh.identifiers.len() == self.identifiers.len()
            && fresh.identifiers.iter().all(|id| self.identifiers.contains(id));

        if !same_identifiers {
            return Err(eyre::eyre!(
                "server changed order identifiers from {:?} to {:?}",
                self.domains(),
                fresh.domains()
            ));
        }

        fresh.identifiers = std::mem::take(&mut self.identifiers);
        *self = fresh;
        Ok(())
    }
}

/// [RFC 8555 §7.1.6](https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.6)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

/// Authorization object ([RFC 8555 §7.1.4]).
///
/// The identifier of a wildcard authorization carries the base domain; `wildcard` is set
/// instead.
///
/// [RFC 8555 §7.1.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.4
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Authorization {
    pub identifier: Identifier,
    pub status: AuthorizationStatus,
    pub challenges: Vec<Challenge>,

    #[serde(default)]
    pub wildcard: bool,
}

impl Authorization {
    /// Domain the authorization was created for, with the `*.` prefix restored for wildcards.
    pub fn domain(&self) -> String {
        if self.wildcard {
            format!("*.{}", self.identifier.value)
        } else {
            self.identifier.value.clone()
        }
    }

    /// The offered challenge of type `kind`.
    pub fn challenge(&self, kind: &str) -> Option<&Challenge> {
        self.challenges.iter().find(|c| c.kind == kind)
    }

    /// First error reported on any of the challenges.
    pub fn error(&self) -> Option<&Problem> {
        self.challenges.iter().find_map(|c| c.error.as_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

/// Challenge object ([RFC 8555 §7.1.5]).
///
/// [RFC 8555 §7.1.5]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.5
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Challenge {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub status: ChallengeStatus,
    pub token: String,
    pub error: Option<Problem>,
}

/// Payload of a finalize request: the CSR as base64url DER, not PEM.
#[derive(Debug, Serialize)]
pub struct Finalize {
    pub csr: String,
}
