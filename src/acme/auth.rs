use std::{future::Future, time::Duration};

use eyre::eyre;

use super::{api, trans::Transport, ChallengeSolver};

/// Progress of one challenge attempt.
///
/// `Idle → Presenting → Presented → CleaningUp → Done`, or `Failed` on the first error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    Idle,
    Presenting,
    Presented,
    CleaningUp,
    Done,
    Failed,
}

/// Drives a solver through present, validation and clean-up for one authorization.
pub(crate) struct ChallengeAttempt<'a> {
    solver: &'a dyn ChallengeSolver,
    domain: &'a str,
    token: &'a str,
    key_auth: &'a str,
    state: ChallengeState,
}

impl<'a> ChallengeAttempt<'a> {
    pub(crate) fn new(
        solver: &'a dyn ChallengeSolver,
        domain: &'a str,
        token: &'a str,
        key_auth: &'a str,
    ) -> Self {
        ChallengeAttempt {
            solver,
            domain,
            token,
            key_auth,
            state: ChallengeState::Idle,
        }
    }

    pub(crate) fn state(&self) -> ChallengeState {
        self.state
    }

    fn transition(&mut self, state: ChallengeState) {
        log::debug!(
            "challenge domain={} {:?} -> {:?}",
            self.domain,
            self.state,
            state
        );
        self.state = state;
    }

    /// Presents the proof, awaits `validate` and cleans up.
    ///
    /// Clean-up runs whenever present succeeded. A validation failure is reported in preference to
    /// a clean-up failure.
    pub(crate) async fn run<F>(&mut self, validate: F) -> eyre::Result<()>
    where
        F: Future<Output = eyre::Result<()>>,
    {
        self.transition(ChallengeState::Presenting);

        log::info!("presenting challenge domain={}", self.domain);
        if let Err(err) = self
            .solver
            .present(self.domain, self.token, self.key_auth)
            .await
        {
            self.transition(ChallengeState::Failed);
            return Err(err.wrap_err(format!("failed to present challenge for {}", self.domain)));
        }

        self.transition(ChallengeState::Presented);

        let validated = validate.await;

        self.transition(ChallengeState::CleaningUp);

        log::info!("cleaning up challenge domain={}", self.domain);
        let cleaned = self
            .solver
            .clean_up(self.domain, self.token, self.key_auth)
            .await;

        match (validated, cleaned) {
            (Ok(()), Ok(())) => {
                self.transition(ChallengeState::Done);
                Ok(())
            }

            (Err(err), cleaned) => {
                if let Err(clean_err) = cleaned {
                    log::warn!(
                        "clean-up after failed validation domain={} failed: {clean_err:#}",
                        self.domain
                    );
                }
                self.transition(ChallengeState::Failed);
                Err(err)
            }

            (Ok(()), Err(err)) => {
                self.transition(ChallengeState::Failed);
                Err(err.wrap_err(format!("failed to clean up challenge for {}", self.domain)))
            }
        }
    }
}

/// Tells the server the challenge is ready and waits for the authorization to settle.
pub(crate) async fn validate_challenge(
    transport: &Transport,
    challenge_url: &str,
    auth_url: &str,
    delay: Duration,
) -> eyre::Result<()> {
    transport
        .call_kid(challenge_url, &api::EmptyObject)
        .await?
        .json::<api::Challenge>()
        .await?;

    let auth = poll_authorization_result(transport, auth_url, delay).await?;

    if !matches!(auth.status, api::AuthorizationStatus::Valid) {
        let reason = match auth.error() {
            Some(error) => format!("{error} (subproblems: {:?})", error.subproblems),
            None => "Validation failed and no error found".to_owned(),
        };

        return Err(eyre!(
            "validation of {} failed: {reason}",
            auth.identifier.value
        ));
    }

    Ok(())
}

pub(crate) async fn fetch_authorization(
    transport: &Transport,
    auth_url: &str,
) -> eyre::Result<api::Authorization> {
    Ok(transport
        .call_kid(auth_url, &api::EmptyString)
        .await?
        .json::<api::Authorization>()
        .await?)
}

/// Polls the authorization status until it transitions out of the "pending" state.
async fn poll_authorization_result(
    transport: &Transport,
    auth_url: &str,
    delay: Duration,
) -> eyre::Result<api::Authorization> {
    loop {
        let auth = fetch_authorization(transport, auth_url).await?;

        if !matches!(auth.status, api::AuthorizationStatus::Pending) {
            return Ok(auth);
        }

        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::RecordingSolver;

    #[tokio::test]
    async fn clean_up_follows_successful_validation() {
        let solver = RecordingSolver::default();
        let mut attempt = ChallengeAttempt::new(&solver, "a.example.com", "tok", "tok.thumb");

        attempt.run(async { Ok(()) }).await.unwrap();

        assert_eq!(attempt.state(), ChallengeState::Done);
        assert_eq!(solver.calls(), ["present a.example.com", "clean_up a.example.com"]);
    }

    #[tokio::test]
    async fn validation_error_wins_over_clean_up_error() {
        let solver = RecordingSolver {
            fail_clean_up: true,
            ..Default::default()
        };
        let mut attempt = ChallengeAttempt::new(&solver, "a.example.com", "tok", "tok.thumb");

        let err = attempt
            .run(async { Err(eyre!("unauthorized")) })
            .await
            .unwrap_err();

        assert_eq!(attempt.state(), ChallengeState::Failed);
        assert_eq!(err.to_string(), "unauthorized");
        assert_eq!(solver.calls().len(), 2);
    }

    #[tokio::test]
    async fn failed_present_skips_validation_and_clean_up() {
        let solver = RecordingSolver {
            fail_present: true,
            ..Default::default()
        };
        let mut attempt = ChallengeAttempt::new(&solver, "a.example.com", "tok", "tok.thumb");

        let err = attempt
            .run(std::future::pending::<eyre::Result<()>>())
            .await
            .unwrap_err();

        assert_eq!(attempt.state(), ChallengeState::Failed);
        assert!(format!("{err:#}").contains("failed to present"));
        assert_eq!(solver.calls(), ["present a.example.com"]);
    }
}
