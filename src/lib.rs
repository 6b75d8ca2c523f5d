pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::challenge::{Challenge, ChallengeOutcome, ChallengeRequest, ChallengeUi};
pub use application::context::{AppContext, Lifecycle};
pub use application::lifecycle::{
    Activation, ActivationOutcome, LifecycleManager, LifecycleSnapshot,
};
pub use application::runtime::{run_until, RunOptions, RunSummary};
pub use domain::models::{AppSelection, AuthorizationStatus, Scheme, TimingMode, Token};
pub use infrastructure::error::InfraError;
