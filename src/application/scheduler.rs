//! Per-scheme grace/cooldown state machine.
//!
//! `Idle` (no entry) → `Grace` (block cleared, re-block pending) → `Cooldown`
//! (block re-applied, forget pending) → `Idle`. Each transition rewrites only
//! its own scheme's entry, and a due timer is checked against the persisted entry
//! first, so several processes can share one store.

use crate::application::timer_queue::TimerQueue;
use crate::domain::models::{
    ExpirationEntry, ExpirationPhase, ExpirationTable, MonitorPhase, Scheme, TimingMode,
};
use crate::infrastructure::config::{Settings, MAX_DELAY_SECONDS};
use crate::infrastructure::state_repository::StateRepository;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Callbacks the scheduler uses to act on a scheme's token.
pub trait BlockingActions {
    fn block_scheme(&mut self, scheme: &Scheme);
    fn unblock_scheme(&mut self, scheme: &Scheme);
    /// Final safety unblock when a scheme's bookkeeping runs out.
    fn unblock_expired_scheme(&mut self, scheme: &Scheme) {
        self.unblock_scheme(scheme);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    Reblock,
    ClearBookkeeping,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DelayPolicy {
    pub fixed_seconds: f64,
    pub random_min_seconds: f64,
    pub random_max_seconds: f64,
    pub seconds_per_character: f64,
    pub dynamic_fallback_seconds: f64,
    pub cooldown_seconds: f64,
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl DelayPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            fixed_seconds: settings.grace_seconds,
            random_min_seconds: settings.random_grace_seconds.min,
            random_max_seconds: settings.random_grace_seconds.max,
            seconds_per_character: settings.seconds_per_character,
            dynamic_fallback_seconds: settings.dynamic_fallback_seconds,
            cooldown_seconds: settings.cooldown_seconds,
        }
    }

    /// Grace length in seconds. An explicit override always wins over the mode.
    pub fn calculate_block_delay<R: Rng>(
        &self,
        mode: TimingMode,
        custom_delay: Option<f64>,
        rng: &mut R,
    ) -> f64 {
        if let Some(custom_delay) = custom_delay {
            return custom_delay.max(0.0);
        }
        match mode {
            TimingMode::Default => self.fixed_seconds,
            TimingMode::Random => {
                if self.random_max_seconds <= self.random_min_seconds {
                    self.random_min_seconds
                } else {
                    rng.gen_range(self.random_min_seconds..=self.random_max_seconds)
                }
            }
            TimingMode::Dynamic => self.dynamic_fallback_seconds,
        }
    }

    pub fn typed_length_delay(&self, typed_characters: usize) -> f64 {
        typed_characters as f64 * self.seconds_per_character
    }

    pub fn cooldown(&self) -> Duration {
        seconds_to_duration(self.cooldown_seconds)
    }
}

/// Non-finite and negative inputs become zero; anything beyond a year is capped.
pub fn seconds_to_duration(seconds: f64) -> Duration {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Duration::zero();
    }
    Duration::milliseconds((seconds.min(MAX_DELAY_SECONDS) * 1000.0).round() as i64)
}

fn deadline_after(start: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    start.checked_add_signed(delay).unwrap_or_else(|| {
        warn!(%start, delay_ms = delay.num_milliseconds(), "deadline out of range; clamping");
        DateTime::<Utc>::MAX_UTC
    })
}

fn timer_action(phase: ExpirationPhase) -> TimerAction {
    match phase {
        ExpirationPhase::Grace => TimerAction::Reblock,
        ExpirationPhase::Cooldown => TimerAction::ClearBookkeeping,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub expired: Vec<Scheme>,
    pub rescheduled: Vec<Scheme>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredTimer {
    pub scheme: Scheme,
    pub action: TimerAction,
    pub deadline: DateTime<Utc>,
}

pub struct MonitorScheduler {
    repository: StateRepository,
    cooldown: Duration,
    now_provider: NowProvider,
    expirations: ExpirationTable,
    timers: TimerQueue<Scheme, TimerAction>,
}

impl MonitorScheduler {
    pub fn new(repository: StateRepository, cooldown: Duration) -> Self {
        Self {
            repository,
            cooldown,
            now_provider: Arc::new(Utc::now),
            expirations: ExpirationTable::new(),
            timers: TimerQueue::default(),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    /// Applies to cooldowns that start after this call; scheduled clears keep their deadline.
    pub fn set_cooldown(&mut self, cooldown: Duration) {
        self.cooldown = cooldown.max(Duration::zero());
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Opens (or restarts) the grace window for `scheme`; returns the re-block deadline.
    pub fn start_monitoring(
        &mut self,
        scheme: &Scheme,
        delay: Duration,
        actions: &mut dyn BlockingActions,
    ) -> DateTime<Utc> {
        let cancelled = self.timers.cancel(scheme);
        if cancelled > 0 {
            debug!(%scheme, cancelled, "restarting monitoring; cancelled pending timers");
        }

        actions.unblock_scheme(scheme);

        let delay = delay.max(Duration::zero());
        let deadline = deadline_after(self.now(), delay);
        self.timers.schedule(scheme.clone(), deadline, TimerAction::Reblock);
        self.expirations.insert(
            scheme.clone(),
            ExpirationEntry {
                phase: ExpirationPhase::Grace,
                deadline,
            },
        );
        self.persist(scheme);

        info!(%scheme, %deadline, delay_ms = delay.num_milliseconds(), "grace window started");
        deadline
    }

    /// Runs every timer that is due, one at a time, in deadline order.
    ///
    /// A timer whose persisted entry was replaced or removed by another process
    /// is dropped and the persisted entry is scheduled instead.
    pub fn fire_due(&mut self, actions: &mut dyn BlockingActions) -> Vec<FiredTimer> {
        let now = self.now();
        let mut fired = Vec::new();
        while let Some(due) = self.timers.pop_due(now) {
            let persisted = self.repository.load_expiration(&due.key);
            let current = persisted.as_ref().is_some_and(|entry| {
                timer_action(entry.phase) == due.action && entry.deadline == due.deadline
            });
            if !current {
                self.adopt(&due.key, persisted);
                continue;
            }

            match due.action {
                TimerAction::Reblock => {
                    actions.block_scheme(&due.key);
                    let clear_at = deadline_after(due.deadline, self.cooldown);
                    self.timers
                        .schedule(due.key.clone(), clear_at, TimerAction::ClearBookkeeping);
                    self.expirations.insert(
                        due.key.clone(),
                        ExpirationEntry {
                            phase: ExpirationPhase::Cooldown,
                            deadline: clear_at,
                        },
                    );
                    info!(scheme = %due.key, %clear_at, "grace window ended; block re-applied");
                }
                TimerAction::ClearBookkeeping => {
                    actions.unblock_expired_scheme(&due.key);
                    self.expirations.remove(&due.key);
                    info!(scheme = %due.key, "cooldown ended; scheme is idle");
                }
            }
            self.persist(&due.key);
            fired.push(FiredTimer {
                scheme: due.key,
                action: due.action,
                deadline: due.deadline,
            });
        }
        fired
    }

    /// Rebuilds timers from the persisted table. Entries already past their
    /// deadline go straight to idle with a safety unblock.
    pub fn restore(&mut self, actions: &mut dyn BlockingActions) -> RestoreReport {
        let now = self.now();
        self.timers.clear();
        self.expirations = self.repository.load_expirations();

        let mut schemes = self.expirations.keys().cloned().collect::<Vec<_>>();
        schemes.sort();

        let mut report = RestoreReport::default();
        for scheme in schemes {
            let Some(entry) = self.expirations.get(&scheme).cloned() else {
                continue;
            };
            if entry.deadline <= now {
                actions.unblock_expired_scheme(&scheme);
                self.expirations.remove(&scheme);
                self.persist(&scheme);
                info!(%scheme, deadline = %entry.deadline, "expired while not running; scheme is idle");
                report.expired.push(scheme);
                continue;
            }

            let action = timer_action(entry.phase);
            self.timers.schedule(scheme.clone(), entry.deadline, action);
            debug!(%scheme, deadline = %entry.deadline, ?action, "rescheduled timer");
            report.rescheduled.push(scheme);
        }
        report
    }

    /// Drops every pending timer and forgets every scheme.
    pub fn cancel_all(&mut self) {
        self.timers.clear();
        self.expirations.clear();
        if let Err(error) = self.repository.save_expirations(&self.expirations) {
            warn!(%error, "failed to persist expiration table");
        }
    }

    pub fn phase(&self, scheme: &Scheme) -> MonitorPhase {
        self.expirations
            .get(scheme)
            .map_or(MonitorPhase::Idle, |entry| entry.phase.into())
    }

    pub fn expiration(&self, scheme: &Scheme) -> Option<&ExpirationEntry> {
        self.expirations.get(scheme)
    }

    pub fn expirations(&self) -> &ExpirationTable {
        &self.expirations
    }

    pub fn pending_timers(&self, scheme: &Scheme) -> usize {
        self.timers.pending_for(scheme)
    }

    pub fn pending_actions(&self, scheme: &Scheme) -> Vec<(DateTime<Utc>, TimerAction)> {
        self.timers
            .pending_entries(scheme)
            .into_iter()
            .map(|(deadline, action)| (deadline, *action))
            .collect()
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.timers.next_deadline()
    }

    fn adopt(&mut self, scheme: &Scheme, persisted: Option<ExpirationEntry>) {
        self.timers.cancel(scheme);
        match persisted {
            Some(entry) => {
                let action = timer_action(entry.phase);
                info!(%scheme, deadline = %entry.deadline, ?action, "timer superseded by another process; following persisted entry");
                self.timers.schedule(scheme.clone(), entry.deadline, action);
                self.expirations.insert(scheme.clone(), entry);
            }
            None => {
                info!(%scheme, "timer superseded by another process; scheme is idle");
                self.expirations.remove(scheme);
            }
        }
    }

    fn persist(&self, scheme: &Scheme) {
        if let Err(error) = self
            .repository
            .update_expiration(scheme, self.expirations.get(scheme))
        {
            warn!(%scheme, %error, "failed to persist expiration entry");
        }
    }
}
