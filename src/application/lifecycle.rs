use crate::application::block_state::{BlockStateStore, ShieldOutcome};
use crate::application::challenge::{Challenge, ChallengeOutcome, ChallengeRequest, ChallengeUi};
use crate::application::scheduler::{
    seconds_to_duration, BlockingActions, DelayPolicy, FiredTimer, MonitorScheduler, NowProvider,
    RestoreReport,
};
use crate::application::token_mapper::TokenMapper;
use crate::domain::models::{
    AppSelection, Configuration, MonitorPhase, Scheme, TimingMode, Token,
};
use crate::infrastructure::config::Settings;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::shield::{AuthorizationCenter, ShieldAdapter};
use crate::infrastructure::state_repository::StateRepository;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// The challenge for this scheme was passed moments ago; let the app straight through.
    Debounced,
    Challenge(ChallengeRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationOutcome {
    Debounced,
    Abandoned,
    /// Challenge passed but no token is known for the scheme.
    Unresolved,
    Monitoring { deadline: DateTime<Utc> },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSnapshot {
    pub scheme: String,
    pub phase: MonitorPhase,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleSnapshot {
    pub configured: bool,
    pub timing_mode: TimingMode,
    pub selected_apps: usize,
    pub mappings: BTreeMap<String, String>,
    pub blocked_tokens: Vec<String>,
    pub monitors: Vec<MonitorSnapshot>,
    pub pending_challenge: Option<String>,
    pub next_deadline: Option<DateTime<Utc>>,
    pub shield_outcome: Option<String>,
}

/// Routes scheduler callbacks to the token behind a scheme.
struct SchemeBlocker<'a, S, A>
where
    S: ShieldAdapter,
    A: AuthorizationCenter,
{
    mapper: &'a mut TokenMapper,
    blocks: &'a mut BlockStateStore<S, A>,
}

impl<S, A> SchemeBlocker<'_, S, A>
where
    S: ShieldAdapter,
    A: AuthorizationCenter,
{
    fn token_for(&mut self, scheme: &Scheme) -> Option<Token> {
        let token = self.mapper.resolve(scheme);
        if token.is_none() {
            debug!(%scheme, "cannot determine token; skipping shield change");
        }
        token
    }
}

impl<S, A> BlockingActions for SchemeBlocker<'_, S, A>
where
    S: ShieldAdapter,
    A: AuthorizationCenter,
{
    fn block_scheme(&mut self, scheme: &Scheme) {
        if let Some(token) = self.token_for(scheme) {
            self.blocks.block(&token);
        }
    }

    fn unblock_scheme(&mut self, scheme: &Scheme) {
        if let Some(token) = self.token_for(scheme) {
            self.blocks.unblock(&token);
        }
    }

    fn unblock_expired_scheme(&mut self, scheme: &Scheme) {
        if let Some(token) = self.token_for(scheme) {
            if self.blocks.unblock(&token) {
                info!(%scheme, %token, "safety unblock after cooldown");
            }
        }
    }
}

/// Single owner of the scheme → block lifecycle for one process.
pub struct LifecycleManager<S, A>
where
    S: ShieldAdapter,
    A: AuthorizationCenter,
{
    repository: StateRepository,
    settings: Settings,
    policy: DelayPolicy,
    mapper: TokenMapper,
    blocks: BlockStateStore<S, A>,
    scheduler: MonitorScheduler,
    configuration: Option<Configuration>,
    now_provider: NowProvider,
    rng: StdRng,
}

impl<S, A> LifecycleManager<S, A>
where
    S: ShieldAdapter,
    A: AuthorizationCenter,
{
    pub fn new(
        repository: StateRepository,
        settings: Settings,
        mut mapper: TokenMapper,
        blocks: BlockStateStore<S, A>,
        scheduler: MonitorScheduler,
    ) -> Self {
        let configuration = repository.load_configuration();
        if let Some(configuration) = &configuration {
            mapper.set_selection(configuration.selection.clone());
        }
        Self {
            repository,
            policy: DelayPolicy::from_settings(&settings),
            settings,
            mapper,
            blocks,
            scheduler,
            configuration,
            now_provider: Arc::new(Utc::now),
            rng: StdRng::from_entropy(),
        }
    }

    /// Replaces the clock for both the orchestrator and its scheduler.
    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.scheduler = self.scheduler.with_now_provider(now_provider.clone());
        self.now_provider = now_provider;
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn apply_settings(&mut self, settings: Settings) {
        self.policy = DelayPolicy::from_settings(&settings);
        self.scheduler.set_cooldown(self.policy.cooldown());
        self.settings = settings;
    }

    /// Entry point for the activation trigger.
    pub fn activate(&mut self, scheme: &Scheme) -> Activation {
        self.mapper.reload();
        self.blocks.refresh();
        let now = (self.now_provider)();
        let token = self.mapper.resolve(scheme);
        match &token {
            Some(token) => {
                self.blocks.unblock(token);
            }
            None => debug!(%scheme, "activation for scheme without a known token"),
        }

        if self.recently_continued(scheme, now) {
            info!(%scheme, "challenge passed moments ago; skipping");
            return Activation::Debounced;
        }

        if let Err(error) = self.repository.save_pending_challenge(Some(scheme)) {
            warn!(%error, %scheme, "failed to persist pending challenge");
        }
        let challenge = Challenge::generate(self.settings.timing_mode, &self.settings, &mut self.rng);
        info!(%scheme, mode = self.settings.timing_mode.as_str(), "challenge surfaced");
        Activation::Challenge(ChallengeRequest {
            scheme: scheme.clone(),
            challenge,
        })
    }

    /// Closes the challenge for `request`. `None` means the user walked away.
    pub fn complete_challenge(
        &mut self,
        request: &ChallengeRequest,
        outcome: Option<ChallengeOutcome>,
    ) -> ActivationOutcome {
        let scheme = &request.scheme;
        if let Err(error) = self.repository.save_pending_challenge(None) {
            warn!(%error, %scheme, "failed to clear pending challenge");
        }

        let Some(outcome) = outcome else {
            info!(%scheme, "challenge abandoned");
            return ActivationOutcome::Abandoned;
        };

        let now = (self.now_provider)();
        if let Err(error) = self.repository.save_continue_timestamp(scheme, now) {
            warn!(%error, %scheme, "failed to persist continue timestamp");
        }

        if self.mapper.resolve(scheme).is_none() {
            info!(%scheme, "challenge passed but no token is known; nothing to monitor");
            return ActivationOutcome::Unresolved;
        }

        let grace_seconds = request
            .challenge
            .grace_seconds(&outcome, &self.policy, &mut self.rng);
        let mut actions = SchemeBlocker {
            mapper: &mut self.mapper,
            blocks: &mut self.blocks,
        };
        let deadline =
            self.scheduler
                .start_monitoring(scheme, seconds_to_duration(grace_seconds), &mut actions);
        ActivationOutcome::Monitoring { deadline }
    }

    pub async fn handle_activation(
        &mut self,
        scheme: &Scheme,
        ui: &dyn ChallengeUi,
    ) -> ActivationOutcome {
        let request = match self.activate(scheme) {
            Activation::Debounced => return ActivationOutcome::Debounced,
            Activation::Challenge(request) => request,
        };
        let outcome = ui.present(request.clone()).await;
        self.complete_challenge(&request, outcome)
    }

    pub fn fire_due(&mut self) -> Vec<FiredTimer> {
        self.mapper.reload();
        self.blocks.refresh();
        let mut actions = SchemeBlocker {
            mapper: &mut self.mapper,
            blocks: &mut self.blocks,
        };
        self.scheduler.fire_due(&mut actions)
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.scheduler.next_deadline()
    }

    /// Picks up whatever the persisted state says, including work recorded by other processes.
    pub fn restore(&mut self) -> RestoreReport {
        self.configuration = self.repository.load_configuration();
        self.mapper.reload();
        self.mapper.set_selection(
            self.configuration
                .as_ref()
                .map(|configuration| configuration.selection.clone())
                .unwrap_or_default(),
        );

        if self.blocks.reconcile() != ShieldOutcome::Applied {
            warn!("shield could not be re-asserted during restore");
        }

        let mut actions = SchemeBlocker {
            mapper: &mut self.mapper,
            blocks: &mut self.blocks,
        };
        let report = self.scheduler.restore(&mut actions);
        info!(
            expired = report.expired.len(),
            rescheduled = report.rescheduled.len(),
            "restored lifecycle state"
        );
        report
    }

    /// Drops every pending timer and lifts every block.
    pub fn unblock_all(&mut self) -> usize {
        let released = self.blocks.blocked_tokens().len();
        self.scheduler.cancel_all();
        self.blocks.clear_all();
        info!(released, "unblocked everything");
        released
    }

    pub fn reset_configuration(&mut self) -> Result<(), InfraError> {
        self.unblock_all();
        self.repository.reset()?;
        self.mapper.forget_all();
        self.configuration = None;
        info!("configuration reset");
        Ok(())
    }

    pub fn configure(&mut self, selection: AppSelection) -> Result<(), InfraError> {
        if selection.is_empty() {
            return Err(InfraError::InvalidInput(
                "select at least one app to monitor".to_string(),
            ));
        }
        let configuration = Configuration {
            selection,
            onboarding_complete: true,
        };
        self.repository.save_configuration(&configuration)?;
        self.mapper.set_selection(configuration.selection.clone());
        info!(apps = configuration.selection.len(), "configuration saved");
        self.configuration = Some(configuration);
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.configuration
            .as_ref()
            .is_some_and(Configuration::is_valid)
    }

    pub fn learn(&mut self, scheme: Scheme, token: Token) {
        info!(%scheme, %token, "explicit mapping override");
        self.mapper.learn(token, scheme);
    }

    pub fn is_scheme_blocked(&self, scheme: &Scheme) -> bool {
        self.mapper
            .all_mappings()
            .get(scheme)
            .is_some_and(|token| self.blocks.is_blocked(token))
    }

    pub fn phase(&self, scheme: &Scheme) -> MonitorPhase {
        self.scheduler.phase(scheme)
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        let mut blocked_tokens = self
            .blocks
            .blocked_tokens()
            .iter()
            .map(|token| token.as_str().to_string())
            .collect::<Vec<_>>();
        blocked_tokens.sort();

        let mut monitors = self
            .scheduler
            .expirations()
            .iter()
            .map(|(scheme, entry)| MonitorSnapshot {
                scheme: scheme.to_string(),
                phase: entry.phase.into(),
                deadline: entry.deadline,
            })
            .collect::<Vec<_>>();
        monitors.sort_by(|left, right| left.deadline.cmp(&right.deadline));

        LifecycleSnapshot {
            configured: self.is_configured(),
            timing_mode: self.settings.timing_mode,
            selected_apps: self.mapper.selection().len(),
            mappings: self
                .mapper
                .all_mappings()
                .iter()
                .map(|(scheme, token)| (scheme.to_string(), token.to_string()))
                .collect(),
            blocked_tokens,
            monitors,
            pending_challenge: self
                .repository
                .load_pending_challenge()
                .map(|scheme| scheme.to_string()),
            next_deadline: self.scheduler.next_deadline(),
            shield_outcome: self
                .blocks
                .last_outcome()
                .map(|outcome| format!("{outcome:?}").to_ascii_lowercase()),
        }
    }

    fn recently_continued(&self, scheme: &Scheme, now: DateTime<Utc>) -> bool {
        let Some(last) = self.repository.load_continue_timestamp(scheme) else {
            return false;
        };
        let elapsed = now - last;
        elapsed >= chrono::Duration::zero()
            && elapsed < seconds_to_duration(self.settings.continue_debounce_seconds)
    }
}
