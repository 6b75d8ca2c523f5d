use crate::domain::models::{AuthorizationStatus, Token};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::shield::{AuthorizationCenter, ShieldAdapter};
use crate::infrastructure::state_repository::StateRepository;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShieldOutcome {
    Applied,
    NotAuthorized,
    Failed,
}

/// Owns the set of shielded tokens and keeps the shield and storage in step with it.
pub struct BlockStateStore<S, A>
where
    S: ShieldAdapter,
    A: AuthorizationCenter,
{
    shield: Arc<S>,
    authorization: Arc<A>,
    repository: StateRepository,
    blocked: HashSet<Token>,
    authorization_requested: bool,
    last_outcome: Option<ShieldOutcome>,
}

impl<S, A> BlockStateStore<S, A>
where
    S: ShieldAdapter,
    A: AuthorizationCenter,
{
    pub fn new(shield: Arc<S>, authorization: Arc<A>, repository: StateRepository) -> Self {
        Self {
            shield,
            authorization,
            repository,
            blocked: HashSet::new(),
            authorization_requested: false,
            last_outcome: None,
        }
    }

    pub fn block(&mut self, token: &Token) -> bool {
        if !self.blocked.insert(token.clone()) {
            debug!(%token, "token already blocked");
            return false;
        }
        info!(%token, blocked = self.blocked.len(), "blocked token");
        self.assert_shield();
        self.persist();
        true
    }

    pub fn unblock(&mut self, token: &Token) -> bool {
        if !self.blocked.remove(token) {
            debug!(%token, "token was not blocked");
            return false;
        }
        info!(%token, blocked = self.blocked.len(), "unblocked token");
        self.assert_shield();
        self.persist();
        true
    }

    pub fn is_blocked(&self, token: &Token) -> bool {
        self.blocked.contains(token)
    }

    pub fn blocked_tokens(&self) -> &HashSet<Token> {
        &self.blocked
    }

    pub fn last_outcome(&self) -> Option<ShieldOutcome> {
        self.last_outcome
    }

    /// Replaces the in-memory set with the persisted one and re-asserts it unconditionally.
    pub fn reconcile(&mut self) -> ShieldOutcome {
        self.blocked = self.repository.load_blocked_tokens();
        info!(blocked = self.blocked.len(), "reconciling shield with persisted block set");
        self.assert_shield()
    }

    /// Adopts the persisted set without touching the shield.
    pub fn refresh(&mut self) {
        let persisted = self.repository.load_blocked_tokens();
        if persisted != self.blocked {
            debug!(before = self.blocked.len(), after = persisted.len(), "block set changed on disk");
            self.blocked = persisted;
        }
    }

    pub fn clear_all(&mut self) {
        self.blocked.clear();
        info!("cleared every blocked token");
        self.assert_shield();
        self.persist();
    }

    fn assert_shield(&mut self) -> ShieldOutcome {
        let outcome = match self.ensure_authorized() {
            Err(error) => {
                warn!(%error, "skipping shield update");
                ShieldOutcome::NotAuthorized
            }
            Ok(()) => {
                let result = if self.blocked.is_empty() {
                    self.shield.clear_all()
                } else {
                    self.shield.set_blocked(&self.blocked)
                };
                match result {
                    Ok(()) => {
                        debug!(blocked = self.blocked.len(), "shield updated");
                        ShieldOutcome::Applied
                    }
                    Err(error) => {
                        warn!(%error, "shield update failed; will retry at next reconcile");
                        ShieldOutcome::Failed
                    }
                }
            }
        };
        self.last_outcome = Some(outcome);
        outcome
    }

    fn ensure_authorized(&mut self) -> Result<(), InfraError> {
        let mut status = self.authorization.status();
        if status == AuthorizationStatus::Undetermined && !self.authorization_requested {
            self.authorization_requested = true;
            status = self.authorization.request();
            info!(status = status.as_str(), "requested shield authorization");
        }
        if status == AuthorizationStatus::Approved {
            Ok(())
        } else {
            Err(InfraError::NotAuthorized(status.as_str().to_string()))
        }
    }

    fn persist(&self) {
        if let Err(error) = self.repository.save_blocked_tokens(&self.blocked) {
            warn!(%error, "failed to persist blocked tokens");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::kv_store::InMemoryKeyValueStore;
    use crate::infrastructure::shield::{RecordingShield, ShieldCall, StaticAuthorization};
    use crate::infrastructure::state_repository::BLOCKED_TOKENS_KEY;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        store: Arc<InMemoryKeyValueStore>,
        shield: Arc<RecordingShield>,
        blocks: BlockStateStore<RecordingShield, StaticAuthorization>,
    }

    fn fixture_with(authorization: StaticAuthorization) -> Fixture {
        let store = Arc::new(InMemoryKeyValueStore::default());
        let shield = Arc::new(RecordingShield::default());
        let blocks = BlockStateStore::new(
            shield.clone(),
            Arc::new(authorization),
            StateRepository::new(store.clone()),
        );
        Fixture { store, shield, blocks }
    }

    fn fixture() -> Fixture {
        fixture_with(StaticAuthorization::approved())
    }

    fn token(value: &str) -> Token {
        Token::new(value).expect("valid token")
    }

    #[test]
    fn block_twice_asserts_and_persists_once() {
        let mut fixture = fixture();

        assert!(fixture.blocks.block(&token("a")));
        assert!(!fixture.blocks.block(&token("a")));

        assert_eq!(fixture.shield.call_count(), 1);
        assert_eq!(fixture.store.write_count(BLOCKED_TOKENS_KEY), 1);
        assert!(fixture.blocks.is_blocked(&token("a")));
    }

    #[test]
    fn unblock_is_idempotent_and_empty_set_clears_the_shield() {
        let mut fixture = fixture();
        fixture.blocks.block(&token("a"));

        assert!(fixture.blocks.unblock(&token("a")));
        assert!(!fixture.blocks.unblock(&token("a")));

        assert_eq!(
            fixture.shield.calls(),
            vec![
                ShieldCall::SetBlocked(HashSet::from([token("a")])),
                ShieldCall::ClearAll
            ]
        );
        assert_eq!(fixture.store.write_count(BLOCKED_TOKENS_KEY), 2);
    }

    #[test]
    fn reconcile_reasserts_persisted_set_unconditionally() {
        let mut fixture = fixture();
        fixture.blocks.block(&token("a"));
        fixture.blocks.block(&token("b"));

        let store: Arc<InMemoryKeyValueStore> = fixture.store.clone();
        let shield = Arc::new(RecordingShield::default());
        let mut restarted = BlockStateStore::new(
            shield.clone(),
            Arc::new(StaticAuthorization::approved()),
            StateRepository::new(store),
        );

        assert_eq!(restarted.reconcile(), ShieldOutcome::Applied);
        assert_eq!(restarted.reconcile(), ShieldOutcome::Applied);
        assert_eq!(shield.enforced(), HashSet::from([token("a"), token("b")]));
        assert_eq!(shield.call_count(), 2);
        assert!(restarted.is_blocked(&token("b")));
    }

    #[test]
    fn refresh_picks_up_blocks_written_elsewhere_without_asserting() {
        let mut fixture = fixture();
        fixture.blocks.block(&token("a"));

        let mut other = BlockStateStore::new(
            Arc::new(RecordingShield::default()),
            Arc::new(StaticAuthorization::approved()),
            StateRepository::new(fixture.store.clone()),
        );
        other.refresh();
        other.unblock(&token("a"));
        other.block(&token("b"));

        fixture.blocks.refresh();
        assert!(!fixture.blocks.is_blocked(&token("a")));
        assert!(fixture.blocks.is_blocked(&token("b")));
        assert_eq!(fixture.shield.call_count(), 1);

        fixture.blocks.block(&token("c"));
        assert_eq!(
            fixture.shield.enforced(),
            HashSet::from([token("b"), token("c")])
        );
    }

    #[test]
    fn denied_authorization_keeps_local_state_and_skips_shield() {
        let mut fixture = fixture_with(StaticAuthorization::new(AuthorizationStatus::Denied));

        assert!(fixture.blocks.block(&token("a")));
        assert_eq!(fixture.shield.call_count(), 0);
        assert_eq!(fixture.blocks.last_outcome(), Some(ShieldOutcome::NotAuthorized));
        assert_eq!(fixture.store.write_count(BLOCKED_TOKENS_KEY), 1);
        assert!(fixture.blocks.is_blocked(&token("a")));
    }

    struct CountingAuthorization {
        requests: AtomicUsize,
    }

    impl AuthorizationCenter for CountingAuthorization {
        fn status(&self) -> AuthorizationStatus {
            AuthorizationStatus::Undetermined
        }

        fn request(&self) -> AuthorizationStatus {
            self.requests.fetch_add(1, Ordering::SeqCst);
            AuthorizationStatus::Denied
        }
    }

    #[test]
    fn authorization_is_requested_at_most_once_per_store() {
        let authorization = Arc::new(CountingAuthorization {
            requests: AtomicUsize::new(0),
        });
        let mut blocks = BlockStateStore::new(
            Arc::new(RecordingShield::default()),
            authorization.clone(),
            StateRepository::new(Arc::new(InMemoryKeyValueStore::default())),
        );

        blocks.block(&token("a"));
        blocks.block(&token("b"));
        blocks.reconcile();

        assert_eq!(authorization.requests.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn undetermined_authorization_is_granted_on_first_request() {
        let mut fixture = fixture_with(StaticAuthorization::new(AuthorizationStatus::Undetermined));
        fixture.blocks.block(&token("a"));
        assert_eq!(fixture.blocks.last_outcome(), Some(ShieldOutcome::Applied));
        assert_eq!(fixture.shield.call_count(), 1);
    }

    #[test]
    fn shield_failure_is_reported_but_state_still_advances() {
        let mut fixture = fixture();
        fixture.shield.set_failing(true);

        assert!(fixture.blocks.block(&token("a")));
        assert_eq!(fixture.blocks.last_outcome(), Some(ShieldOutcome::Failed));
        assert_eq!(fixture.store.write_count(BLOCKED_TOKENS_KEY), 1);

        fixture.shield.set_failing(false);
        assert_eq!(fixture.blocks.reconcile(), ShieldOutcome::Applied);
        assert_eq!(fixture.shield.enforced(), HashSet::from([token("a")]));
    }

    #[test]
    fn clear_all_empties_set_shield_and_storage() {
        let mut fixture = fixture();
        fixture.blocks.block(&token("a"));
        fixture.blocks.clear_all();

        assert!(fixture.blocks.blocked_tokens().is_empty());
        assert_eq!(fixture.shield.calls().last(), Some(&ShieldCall::ClearAll));
        assert!(StateRepository::new(fixture.store.clone())
            .load_blocked_tokens()
            .is_empty());
    }
}
