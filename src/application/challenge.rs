use crate::application::scheduler::DelayPolicy;
use crate::domain::models::{Scheme, TimingMode};
use crate::infrastructure::config::Settings;
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Typed-code friction shown before an app is let through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    /// Exact code, fixed grace window.
    FixedCode { code: String },
    /// Exact code, random grace window.
    RandomDelay { code: String },
    /// Any non-empty prefix of the code; grace grows with the typed length.
    TypedLengthDelay { code: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChallengeOutcome {
    pub typed_characters: usize,
}

impl Challenge {
    pub fn generate<R: Rng>(mode: TimingMode, settings: &Settings, rng: &mut R) -> Self {
        match mode {
            TimingMode::Default => Self::FixedCode {
                code: random_code(settings.verification_code_length, rng),
            },
            TimingMode::Random => Self::RandomDelay {
                code: random_code(settings.verification_code_length, rng),
            },
            TimingMode::Dynamic => Self::TypedLengthDelay {
                code: random_code(settings.dynamic_code_length, rng),
            },
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::FixedCode { code } | Self::RandomDelay { code } | Self::TypedLengthDelay { code } => code,
        }
    }

    pub fn timing_mode(&self) -> TimingMode {
        match self {
            Self::FixedCode { .. } => TimingMode::Default,
            Self::RandomDelay { .. } => TimingMode::Random,
            Self::TypedLengthDelay { .. } => TimingMode::Dynamic,
        }
    }

    /// Same variant, fresh code of the same length.
    pub fn regenerate<R: Rng>(&mut self, rng: &mut R) {
        let fresh = random_code(self.code().len(), rng);
        match self {
            Self::FixedCode { code } | Self::RandomDelay { code } | Self::TypedLengthDelay { code } => {
                *code = fresh;
            }
        }
    }

    /// Drops anything that is not a letter or digit and truncates to the code length.
    pub fn sanitize_input(&self, raw: &str) -> String {
        raw.chars()
            .filter(char::is_ascii_alphanumeric)
            .take(self.code().len())
            .collect()
    }

    pub fn verify(&self, raw_input: &str) -> Option<ChallengeOutcome> {
        let input = self.sanitize_input(raw_input);
        let accepted = match self {
            Self::FixedCode { code } | Self::RandomDelay { code } => input == *code,
            Self::TypedLengthDelay { code } => !input.is_empty() && code.starts_with(&input),
        };
        accepted.then_some(ChallengeOutcome {
            typed_characters: input.chars().count(),
        })
    }

    /// Grace override carried by an outcome; only the typed-length variant has one.
    pub fn custom_delay(&self, outcome: &ChallengeOutcome, policy: &DelayPolicy) -> Option<f64> {
        match self {
            Self::TypedLengthDelay { .. } => Some(policy.typed_length_delay(outcome.typed_characters)),
            Self::FixedCode { .. } | Self::RandomDelay { .. } => None,
        }
    }

    pub fn grace_seconds<R: Rng>(&self, outcome: &ChallengeOutcome, policy: &DelayPolicy, rng: &mut R) -> f64 {
        policy.calculate_block_delay(self.timing_mode(), self.custom_delay(outcome, policy), rng)
    }

    pub fn instruction(&self) -> &'static str {
        match self {
            Self::FixedCode { .. } | Self::RandomDelay { .. } => "Enter this code to continue:",
            Self::TypedLengthDelay { .. } => "Enter the beginning of this code:",
        }
    }

    pub fn timing_description(&self, policy: &DelayPolicy) -> String {
        match self {
            Self::FixedCode { .. } => format!(
                "You'll have {} seconds before it's blocked again.",
                policy.fixed_seconds
            ),
            Self::RandomDelay { .. } => format!(
                "You'll have {}-{} seconds (randomly) before it's blocked again.",
                policy.random_min_seconds, policy.random_max_seconds
            ),
            Self::TypedLengthDelay { .. } => format!(
                "Enter any amount - you get {} seconds per character.",
                policy.seconds_per_character
            ),
        }
    }
}

fn random_code<R: Rng>(length: usize, rng: &mut R) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRequest {
    pub scheme: Scheme,
    pub challenge: Challenge,
}

/// Surface that shows a challenge and waits for the user.
#[async_trait]
pub trait ChallengeUi: Send + Sync {
    /// Returns the passing outcome, or `None` when the user walks away.
    /// Implementations regenerate the code after a wrong entry; the variant never changes.
    async fn present(&self, request: ChallengeRequest) -> Option<ChallengeOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn generated_codes_use_configured_lengths_and_alphabet() {
        let settings = Settings::default();
        let mut rng = rng();

        let fixed = Challenge::generate(TimingMode::Default, &settings, &mut rng);
        let dynamic = Challenge::generate(TimingMode::Dynamic, &settings, &mut rng);

        assert_eq!(fixed.code().len(), 8);
        assert_eq!(dynamic.code().len(), 20);
        assert!(fixed.code().chars().all(|ch| ch.is_ascii_alphanumeric()));
        assert_eq!(dynamic.timing_mode(), TimingMode::Dynamic);
    }

    #[test]
    fn exact_variants_require_the_full_code() {
        let challenge = Challenge::FixedCode {
            code: "Ab3dE".to_string(),
        };
        assert_eq!(
            challenge.verify("Ab3dE"),
            Some(ChallengeOutcome { typed_characters: 5 })
        );
        assert_eq!(challenge.verify("Ab3d"), None);
        assert_eq!(challenge.verify("ab3de"), None);
        assert!(challenge.verify(" Ab-3dE ").is_some());
    }

    #[test]
    fn typed_length_variant_accepts_non_empty_prefix() {
        let challenge = Challenge::TypedLengthDelay {
            code: "Qwerty123".to_string(),
        };
        assert_eq!(
            challenge.verify("Qwe"),
            Some(ChallengeOutcome { typed_characters: 3 })
        );
        assert_eq!(challenge.verify(""), None);
        assert_eq!(challenge.verify("!!"), None);
        assert_eq!(challenge.verify("wer"), None);
    }

    #[test]
    fn sanitize_truncates_to_code_length() {
        let challenge = Challenge::RandomDelay {
            code: "abcd".to_string(),
        };
        assert_eq!(challenge.sanitize_input("ab_cdef"), "abcd");
    }

    #[test]
    fn regenerate_keeps_variant_and_length() {
        let mut challenge = Challenge::RandomDelay {
            code: "aaaaaaaaaaaa".to_string(),
        };
        challenge.regenerate(&mut rng());
        assert!(matches!(challenge, Challenge::RandomDelay { .. }));
        assert_eq!(challenge.code().len(), 12);
        assert_ne!(challenge.code(), "aaaaaaaaaaaa");
    }

    #[test]
    fn grace_seconds_follow_the_variant() {
        let policy = DelayPolicy::default();
        let outcome = ChallengeOutcome { typed_characters: 6 };
        let mut rng = rng();

        let fixed = Challenge::FixedCode { code: "x".repeat(6) };
        let random = Challenge::RandomDelay { code: "x".repeat(6) };
        let typed = Challenge::TypedLengthDelay { code: "x".repeat(20) };

        assert_eq!(fixed.grace_seconds(&outcome, &policy, &mut rng), 10.0);
        let random_grace = random.grace_seconds(&outcome, &policy, &mut rng);
        assert!((1.0..=10.0).contains(&random_grace));
        assert_eq!(typed.grace_seconds(&outcome, &policy, &mut rng), 12.0);
        assert_eq!(fixed.custom_delay(&outcome, &policy), None);
    }

    #[test]
    fn descriptions_reflect_policy_numbers() {
        let policy = DelayPolicy::default();
        let typed = Challenge::TypedLengthDelay { code: "x".to_string() };
        assert_eq!(typed.instruction(), "Enter the beginning of this code:");
        assert!(typed.timing_description(&policy).contains("2 seconds per character"));
        let fixed = Challenge::FixedCode { code: "x".to_string() };
        assert!(fixed.timing_description(&policy).contains("10 seconds"));
    }
}
