use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use second_thought::application::scheduler::DelayPolicy;
use second_thought::{ChallengeOutcome, ChallengeRequest, ChallengeUi};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

const MAX_ATTEMPTS: usize = 5;

/// Shows the challenge on stdout and reads answers from stdin. An empty line walks away.
pub struct TerminalChallengeUi {
    policy: DelayPolicy,
    scripted_response: Option<String>,
}

impl TerminalChallengeUi {
    pub fn new(policy: DelayPolicy, scripted_response: Option<String>) -> Self {
        Self {
            policy,
            scripted_response,
        }
    }
}

#[async_trait]
impl ChallengeUi for TerminalChallengeUi {
    async fn present(&self, request: ChallengeRequest) -> Option<ChallengeOutcome> {
        let ChallengeRequest {
            scheme,
            mut challenge,
        } = request;

        if let Some(response) = &self.scripted_response {
            let outcome = challenge.verify(response);
            if outcome.is_none() {
                info!(%scheme, "scripted response did not match the challenge");
            }
            return outcome;
        }

        let mut rng = StdRng::from_entropy();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        for attempt in 1..=MAX_ATTEMPTS {
            let prompt = format!(
                "\n{scheme} wants to open.\n{}\n\n    {}\n\n{}\n(leave empty to cancel) > ",
                challenge.instruction(),
                challenge.code(),
                challenge.timing_description(&self.policy),
            );
            if stdout.write_all(prompt.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
                return None;
            }

            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(error) => {
                    warn!(%error, "failed to read challenge answer");
                    return None;
                }
            };
            if line.trim().is_empty() {
                return None;
            }
            if let Some(outcome) = challenge.verify(&line) {
                return Some(outcome);
            }

            info!(%scheme, attempt, "wrong code; regenerating");
            challenge.regenerate(&mut rng);
            if stdout.write_all(b"Incorrect code, try again.\n").await.is_err() {
                return None;
            }
        }
        None
    }
}
