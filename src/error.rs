use std::fmt;

use crate::{acme::ChallengeType, request::Target};

/// Invalid or inconsistent configuration; fatal to the request it affects.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown user {0}")]
    UnknownUser(String),

    #[error("users share the email address {0}")]
    DuplicateEmail(String),

    #[error("unknown target {0}")]
    UnknownTarget(Target),

    #[error("unknown ACME service {0}")]
    UnknownService(String),

    #[error("unknown provider parameters {0}")]
    UnknownProviderParameters(String),

    #[error("unknown challenge provider {0}")]
    UnknownProvider(String),

    #[error("challenge provider {provider} cannot solve {challenge_type} challenges")]
    ChallengeMismatch {
        provider: String,
        challenge_type: ChallengeType,
    },

    #[error("unsupported key type {0}")]
    UnsupportedKeyType(String),

    #[error("environment {0} has no management endpoint or nodes")]
    NoManagementEndpoint(Target),

    #[error("{0}")]
    Invalid(String),
}

/// Pipeline stage a request failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configuration,
    Issuance,
    Installation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Configuration => "configuration",
            Stage::Issuance => "issuance",
            Stage::Installation => "installation",
        })
    }
}

/// One request that did not make it through a stage.
#[derive(Debug)]
pub struct RequestFailure {
    pub request: String,
    pub stage: Stage,

    /// Installation target, for installation failures.
    pub target: Option<Target>,

    pub error: eyre::Report,
}

impl fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request={} stage={}", self.request, self.stage)?;
        if let Some(target) = &self.target {
            write!(f, " target={target}")?;
        }
        write!(f, ": {:#}", self.error)
    }
}

/// Certificate installed on one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installed {
    pub request: String,
    pub target: Target,
}

/// Outcome of a batch run.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Requests for which a certificate was issued.
    pub issued: Vec<String>,

    pub installed: Vec<Installed>,

    pub failures: Vec<RequestFailure>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures of `request`, if any.
    pub fn failures_of<'a>(&'a self, request: &'a str) -> impl Iterator<Item = &'a RequestFailure> + 'a {
        self.failures.iter().filter(move |f| f.request == request)
    }
}
