use std::io::{BufReader, Cursor};

use der::{asn1::Ia5String, pem::LineEnding, Decode as _, Encode as _};
use eyre::{eyre, WrapErr as _};
use pkcs8::EncodePrivateKey as _;
use time::OffsetDateTime;
use x509_cert::{
    builder::{Builder, RequestBuilder as CsrBuilder},
    ext::pkix::{name::GeneralName, SubjectAltName},
    name::Name,
    request::CertReq,
};
use zeroize::Zeroizing;

use crate::request::KeyType;

/// Private key of an issued certificate.
pub(crate) enum CertificateKey {
    P256(p256::ecdsa::SigningKey),
    P384(p384::ecdsa::SigningKey),
}

impl CertificateKey {
    pub(crate) fn generate(key_type: KeyType) -> eyre::Result<Self> {
        let csprng = &mut rand::thread_rng();

        match key_type {
            KeyType::Ec256 => Ok(Self::P256(p256::ecdsa::SigningKey::random(csprng))),
            KeyType::Ec384 => Ok(Self::P384(p384::ecdsa::SigningKey::random(csprng))),
            other => Err(eyre!("unsupported certificate key type {other}")),
        }
    }

    pub(crate) fn to_pkcs8_pem(&self) -> eyre::Result<Zeroizing<String>> {
        let pem = match self {
            Self::P256(key) => key.to_pkcs8_pem(LineEnding::LF),
            Self::P384(key) => key.to_pkcs8_pem(LineEnding::LF),
        };
        pem.wrap_err("failed to encode certificate key")
    }

    /// Creates a CSR for `domains`, signed by this key, in DER encoding.
    ///
    /// The first domain is the subject's Common Name (CN). All domains are added to a Subject
    /// Alternative Name (SAN) extension.
    pub(crate) fn create_csr(&self, domains: &[String]) -> eyre::Result<Vec<u8>> {
        let csr = match self {
            Self::P256(key) => build_csr::<_, p256::ecdsa::DerSignature>(key, domains)?,
            Self::P384(key) => build_csr::<_, p384::ecdsa::DerSignature>(key, domains)?,
        };

        csr.to_der().wrap_err("failed to encode CSR")
    }
}

fn build_csr<S, Sig>(signer: &S, domains: &[String]) -> eyre::Result<CertReq>
where
    S: x509_cert::spki::DynSignatureAlgorithmIdentifier
        + ecdsa::signature::Keypair
        + ecdsa::signature::Signer<Sig>,
    S::VerifyingKey: x509_cert::spki::EncodePublicKey,
    Sig: x509_cert::spki::SignatureBitStringEncoding,
{
    let primary_domain = domains
        .first()
        .ok_or_else(|| eyre!("cannot create a CSR without domains"))?;
    let subject = format!("CN={primary_domain}").parse::<Name>()?;

    let mut csr = CsrBuilder::new(subject, signer)?;

    let names = domains
        .iter()
        .map(|domain| Ok(GeneralName::DnsName(Ia5String::new(domain)?)))
        .collect::<Result<Vec<_>, der::Error>>()?;
    csr.add_extension(&SubjectAltName(names))?;

    csr.build::<Sig>().wrap_err("build csr")
}

/// Signed certificate material returned by a completed exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateMaterial {
    /// Primary domain the certificate was validated for.
    pub domain: String,

    /// Leaf certificate, PEM.
    pub certificate: String,

    /// Remaining certificates of the chain, PEM, possibly empty.
    pub issuer_certificate: String,

    /// Certificate private key, PKCS#8 PEM.
    pub private_key: Zeroizing<String>,
}

impl std::fmt::Debug for CertificateMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateMaterial")
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

impl CertificateMaterial {
    /// Splits a downloaded PEM chain into the leaf and its issuers.
    pub(crate) fn from_chain(
        domain: &str,
        chain_pem: &str,
        private_key: Zeroizing<String>,
    ) -> eyre::Result<Self> {
        let mut rdr = BufReader::new(Cursor::new(chain_pem));

        let chain = rustls_pemfile::certs(&mut rdr)
            .map(|res| {
                let cert_der = res?;
                der::pem::encode_string("CERTIFICATE", LineEnding::LF, cert_der.as_ref())
                    .map_err(|err| eyre!("failed to encode certificate: {err}"))
            })
            .collect::<eyre::Result<Vec<String>>>()
            .wrap_err("invalid certificate chain")?;

        let (certificate, issuers) = chain
            .split_first()
            .ok_or_else(|| eyre!("no certificates in chain"))?;

        Ok(CertificateMaterial {
            domain: domain.to_owned(),
            certificate: certificate.clone(),
            issuer_certificate: issuers.concat(),
            private_key,
        })
    }

    /// Inspects the leaf certificate to count the number of whole valid days left.
    ///
    /// It is possible to get negative days for an expired certificate.
    pub fn valid_days_left(&self) -> eyre::Result<i64> {
        let mut rdr = BufReader::new(Cursor::new(&self.certificate));
        let leaf = rustls_pemfile::certs(&mut rdr)
            .next()
            .ok_or_else(|| eyre!("no certificates in chain"))??;

        let cert = x509_cert::Certificate::from_der(&leaf)?;
        let not_after = cert.tbs_certificate.validity.not_after.to_unix_duration();
        let not_after = i64::try_from(not_after.as_secs())?;

        Ok((not_after - OffsetDateTime::now_utc().unix_timestamp()) / 86_400)
    }
}

#[cfg(test)]
mod tests {
    use der::Decode as _;
    use x509_cert::request::CertReq;

    use super::*;

    #[test]
    fn csr_has_common_name_and_sans() {
        let key = CertificateKey::generate(KeyType::Ec384).unwrap();
        let domains = vec!["www.example.com".to_owned(), "example.com".to_owned()];

        let der = key.create_csr(&domains).unwrap();
        let csr = CertReq::from_der(&der).unwrap();

        assert_eq!(csr.info.subject.to_string(), "CN=www.example.com");
        assert_eq!(csr.info.attributes.len(), 1);
    }

    #[test]
    fn rsa_keys_are_not_generated() {
        assert!(CertificateKey::generate(KeyType::Rsa2048).is_err());
    }

    #[test]
    fn chain_is_split_into_leaf_and_issuer() {
        let chain = crate::test::certificate_chain("chain.example.com");
        let key = CertificateKey::generate(KeyType::Ec256).unwrap();

        let material =
            CertificateMaterial::from_chain("chain.example.com", &chain, key.to_pkcs8_pem().unwrap())
                .unwrap();

        assert!(material.certificate.starts_with("-----BEGIN CERTIFICATE-----"));
        assert_eq!(material.certificate.matches("BEGIN CERTIFICATE").count(), 1);
        assert_eq!(material.issuer_certificate.matches("BEGIN CERTIFICATE").count(), 1);
        assert!(material.valid_days_left().unwrap() > 0);
    }
}
