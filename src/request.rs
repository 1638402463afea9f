//! Certificate requests.

use std::fmt;

use serde::Deserialize;

use crate::acme::ChallengeType;

/// One desired certificate, as read from a request file.
#[derive(Debug, Clone, Deserialize)]
pub struct CertificateRequest {
    /// Unique name; also names the certkey object on the device (`ACME_<name>`).
    pub name: String,

    pub request: AcmeRequest,

    #[serde(default)]
    pub installation: Vec<Installation>,
}

impl CertificateRequest {
    /// Distinct installation targets, in order of first appearance.
    pub fn targets(&self) -> Vec<&Target> {
        let mut targets = Vec::new();
        for installation in &self.installation {
            if !targets.contains(&&installation.target) {
                targets.push(&installation.target);
            }
        }
        targets
    }

    pub fn provider(&self) -> &str {
        &self.request.challenge.provider
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcmeRequest {
    /// Environment used by device-bound challenge providers.
    pub target: Option<Target>,

    pub user: String,

    /// Seconds allowed for the whole certificate exchange.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default)]
    pub key_type: KeyType,

    pub challenge: ChallengeSpec,

    pub content: Content,
}

fn default_timeout() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeSpec {
    /// ACME service name or directory URL.
    pub service: String,

    #[serde(rename = "type")]
    pub challenge_type: ChallengeType,

    pub provider: String,

    #[serde(default)]
    pub disable_dns_propagation_check: bool,

    /// Name of the provider parameter set to apply.
    #[serde(default)]
    pub provider_parameters: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    pub common_name: String,

    #[serde(default)]
    pub subject_alternative_names: Vec<String>,

    /// File with one additional name per line.
    #[serde(default)]
    pub subject_alternative_names_file: Option<String>,

    /// Names read from `subject_alternative_names_file` when the request was loaded.
    #[serde(skip)]
    pub file_names: Vec<String>,
}

impl Content {
    /// Common name, then the listed names, then the file's names; first occurrence wins.
    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = Vec::new();

        let names = std::iter::once(&self.common_name)
            .chain(&self.subject_alternative_names)
            .chain(&self.file_names)
            .map(|name| name.trim())
            .filter(|name| !name.is_empty());

        for name in names {
            if !domains.iter().any(|d| d == name) {
                domains.push(name.to_owned());
            }
        }

        domains
    }
}

/// Key algorithm of the issued certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum KeyType {
    #[default]
    #[serde(rename = "EC256")]
    Ec256,
    #[serde(rename = "EC384")]
    Ec384,
    #[serde(rename = "RSA2048")]
    Rsa2048,
    #[serde(rename = "RSA3072")]
    Rsa3072,
    #[serde(rename = "RSA4096")]
    Rsa4096,
    #[serde(rename = "RSA8192")]
    Rsa8192,
}

impl KeyType {
    pub fn is_supported(self) -> bool {
        matches!(self, KeyType::Ec256 | KeyType::Ec384)
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeyType::Ec256 => "EC256",
            KeyType::Ec384 => "EC384",
            KeyType::Rsa2048 => "RSA2048",
            KeyType::Rsa3072 => "RSA3072",
            KeyType::Rsa4096 => "RSA4096",
            KeyType::Rsa8192 => "RSA8192",
        })
    }
}

/// An (organization, environment) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
pub struct Target {
    pub organization: String,
    pub environment: String,
}

impl Target {
    pub fn new(organization: &str, environment: &str) -> Self {
        Target {
            organization: organization.to_owned(),
            environment: environment.to_owned(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.organization, self.environment)
    }
}

/// Where and how to install a certificate.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Installation {
    pub target: Target,

    /// Replace the device's default certificate instead of binding.
    #[serde(default)]
    pub replace_default_certificate: bool,

    #[serde(default)]
    pub ssl_virtual_servers: Vec<Binding>,

    #[serde(default)]
    pub ssl_services: Vec<Binding>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    pub name: String,

    #[serde(default)]
    pub sni_enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUEST: &str = r#"
name: www-example
request:
  target: { organization: acme-corp, environment: production }
  user: default
  keyType: EC384
  challenge:
    service: LE_STAGING
    type: http-01
    provider: netscaler-http-global
  content:
    commonName: www.example.com
    subjectAlternativeNames: [ example.com, www.example.com ]
installation:
  - target: { organization: acme-corp, environment: production }
    sslVirtualServers: [ { name: vs-www, sniEnabled: true } ]
  - target: { organization: acme-corp, environment: production }
    replaceDefaultCertificate: true
  - target: { organization: acme-corp, environment: staging }
"#;

    #[test]
    fn parses_request_file() {
        let req: CertificateRequest = serde_yaml::from_str(REQUEST).unwrap();

        assert_eq!(req.request.key_type, KeyType::Ec384);
        assert_eq!(req.request.timeout, 120);
        assert_eq!(req.request.challenge.challenge_type, ChallengeType::Http01);
        assert_eq!(req.provider(), "netscaler-http-global");
        assert_eq!(
            req.installation[0].ssl_virtual_servers,
            [Binding {
                name: "vs-www".to_owned(),
                sni_enabled: true
            }]
        );
    }

    #[test]
    fn targets_are_distinct() {
        let req: CertificateRequest = serde_yaml::from_str(REQUEST).unwrap();
        let targets = req.targets();

        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].to_string(), "acme-corp/production");
        assert_eq!(targets[1].to_string(), "acme-corp/staging");
    }

    #[test]
    fn domains_are_deduplicated_in_order() {
        let content = Content {
            common_name: "www.example.com".to_owned(),
            subject_alternative_names: vec!["example.com".to_owned(), "www.example.com".to_owned()],
            subject_alternative_names_file: None,
            file_names: vec![" api.example.com ".to_owned(), "".to_owned(), "example.com".to_owned()],
        };

        assert_eq!(
            content.domains(),
            ["www.example.com", "example.com", "api.example.com"]
        );
    }
}
