use crate::domain::models::{AppSelection, Scheme, SchemeTokenMapping, Token};
use crate::infrastructure::state_repository::StateRepository;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

/// Scheme → bundle identifier hints for apps the mapper is willing to guess a token for.
const BUILTIN_CATALOG: [(&str, &str); 9] = [
    ("instagram://", "com.burbn.instagram"),
    ("snapchat://", "com.toyopagroup.picaboo"),
    ("tiktok://", "com.zhiliaoapp.musically"),
    ("youtube://", "com.google.ios.youtube"),
    ("twitter://", "com.atebits.Tweetie2"),
    ("facebook://", "com.facebook.Facebook"),
    ("whatsapp://", "net.whatsapp.WhatsApp"),
    ("spotify://", "com.spotify.client"),
    ("reddit://", "com.reddit.Reddit"),
];

#[derive(Debug, Clone)]
pub struct SchemeCatalog {
    hints: BTreeMap<Scheme, String>,
}

impl SchemeCatalog {
    pub fn builtin() -> Self {
        let hints = BUILTIN_CATALOG
            .iter()
            .filter_map(|(scheme, bundle)| {
                Scheme::parse(scheme)
                    .ok()
                    .map(|scheme| (scheme, (*bundle).to_string()))
            })
            .collect();
        Self { hints }
    }

    /// Built-in hints plus user-supplied ones; entries with an unparsable scheme are skipped.
    pub fn with_extra(extra: &BTreeMap<String, String>) -> Self {
        let mut catalog = Self::builtin();
        for (raw_scheme, bundle) in extra {
            match Scheme::parse(raw_scheme) {
                Ok(scheme) => {
                    catalog.hints.insert(scheme, bundle.clone());
                }
                Err(error) => warn!(scheme = %raw_scheme, %error, "ignoring extra catalog entry"),
            }
        }
        catalog
    }

    pub fn bundle_hint(&self, scheme: &Scheme) -> Option<&str> {
        self.hints.get(scheme).map(String::as_str)
    }

    pub fn contains(&self, scheme: &Scheme) -> bool {
        self.hints.contains_key(scheme)
    }
}

/// Learns and remembers which selected-app token stands for which scheme.
pub struct TokenMapper {
    repository: StateRepository,
    catalog: SchemeCatalog,
    selection: AppSelection,
    learned: SchemeTokenMapping,
}

impl TokenMapper {
    pub fn new(repository: StateRepository, catalog: SchemeCatalog) -> Self {
        let learned = repository.load_mappings();
        Self {
            repository,
            catalog,
            selection: AppSelection::default(),
            learned,
        }
    }

    pub fn reload(&mut self) {
        self.learned = self.repository.load_mappings();
    }

    pub fn set_selection(&mut self, selection: AppSelection) {
        self.selection = selection;
    }

    pub fn selection(&self) -> &AppSelection {
        &self.selection
    }

    pub fn resolve(&mut self, scheme: &Scheme) -> Option<Token> {
        if let Some(token) = self.learned.get(scheme) {
            return Some(token.clone());
        }

        if !self.catalog.contains(scheme) {
            debug!(%scheme, "scheme is not in the catalog; no token");
            return None;
        }

        let claimed = self.learned.values().collect::<HashSet<_>>();
        let Some(token) = self
            .selection
            .tokens()
            .iter()
            .find(|candidate| !claimed.contains(candidate))
            .cloned()
        else {
            debug!(%scheme, "no unclaimed token left in the selection");
            return None;
        };

        info!(
            %scheme,
            %token,
            bundle = self.catalog.bundle_hint(scheme).unwrap_or_default(),
            "learned token for scheme"
        );
        self.learn(token.clone(), scheme.clone());
        Some(token)
    }

    /// Merges into the stored mappings so entries learned by other processes survive.
    pub fn learn(&mut self, token: Token, scheme: Scheme) {
        self.learned.extend(self.repository.load_mappings());
        self.learned.insert(scheme, token);
        if let Err(error) = self.repository.save_mappings(&self.learned) {
            warn!(%error, "failed to persist scheme mappings");
        }
    }

    pub fn all_mappings(&self) -> &SchemeTokenMapping {
        &self.learned
    }

    /// Drops every learned mapping and the selection in memory; storage is reset by the caller.
    pub fn forget_all(&mut self) {
        self.learned.clear();
        self.selection = AppSelection::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::kv_store::InMemoryKeyValueStore;
    use crate::infrastructure::state_repository::MAPPING_KEY;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn scheme(value: &str) -> Scheme {
        Scheme::parse(value).expect("valid scheme")
    }

    fn token(value: &str) -> Token {
        Token::new(value).expect("valid token")
    }

    fn mapper_with(tokens: &[&str]) -> (Arc<InMemoryKeyValueStore>, TokenMapper) {
        let store = Arc::new(InMemoryKeyValueStore::default());
        let mut mapper = TokenMapper::new(StateRepository::new(store.clone()), SchemeCatalog::builtin());
        mapper.set_selection(AppSelection::from_tokens(tokens.iter().map(|raw| token(raw))));
        (store, mapper)
    }

    #[test]
    fn resolve_assigns_first_unclaimed_token_per_catalog_scheme() {
        let (_, mut mapper) = mapper_with(&["tok-a", "tok-b"]);

        assert_eq!(mapper.resolve(&scheme("instagram://")), Some(token("tok-a")));
        assert_eq!(mapper.resolve(&scheme("tiktok://")), Some(token("tok-b")));
        assert_eq!(mapper.resolve(&scheme("reddit://")), None);
        assert_eq!(mapper.all_mappings().len(), 2);
    }

    #[test]
    fn learning_keeps_mappings_written_by_another_mapper() {
        let (store, mut first) = mapper_with(&["tok-a", "tok-b"]);
        let mut second = TokenMapper::new(StateRepository::new(store.clone()), SchemeCatalog::builtin());

        first.resolve(&scheme("instagram://"));
        second.learn(token("tok-b"), scheme("tiktok://"));

        let persisted = StateRepository::new(store).load_mappings();
        assert_eq!(persisted.get(&scheme("instagram://")), Some(&token("tok-a")));
        assert_eq!(persisted.get(&scheme("tiktok://")), Some(&token("tok-b")));
        assert_eq!(second.all_mappings().len(), 2);
    }

    #[test]
    fn unknown_scheme_resolves_to_none_without_learning() {
        let (store, mut mapper) = mapper_with(&["tok-a"]);

        assert_eq!(mapper.resolve(&scheme("mystery://")), None);
        assert_eq!(mapper.resolve(&scheme("mystery://")), None);
        assert!(mapper.all_mappings().is_empty());
        assert_eq!(store.write_count(MAPPING_KEY), 0);
    }

    #[test]
    fn empty_selection_resolves_to_none() {
        let (_, mut mapper) = mapper_with(&[]);
        assert_eq!(mapper.resolve(&scheme("instagram://")), None);
    }

    #[test]
    fn new_mapping_is_written_through_immediately() {
        let (store, mut mapper) = mapper_with(&["tok-a"]);
        mapper.resolve(&scheme("youtube://"));
        assert_eq!(store.write_count(MAPPING_KEY), 1);

        let reloaded = TokenMapper::new(StateRepository::new(store.clone()), SchemeCatalog::builtin());
        assert_eq!(
            reloaded.all_mappings().get(&scheme("youtube://")),
            Some(&token("tok-a"))
        );
    }

    #[test]
    fn learned_mapping_survives_selection_changes() {
        let (_, mut mapper) = mapper_with(&["tok-a"]);
        mapper.resolve(&scheme("instagram://"));

        mapper.set_selection(AppSelection::from_tokens(vec![token("tok-z")]));
        assert_eq!(mapper.resolve(&scheme("instagram://")), Some(token("tok-a")));
    }

    #[test]
    fn explicit_learn_overrides_and_persists() {
        let (store, mut mapper) = mapper_with(&["tok-a"]);
        mapper.learn(token("manual"), scheme("custom://"));

        assert_eq!(mapper.resolve(&scheme("custom://")), Some(token("manual")));
        assert_eq!(store.write_count(MAPPING_KEY), 1);
    }

    #[test]
    fn extra_catalog_entries_extend_the_builtin_list() {
        let extra = BTreeMap::from([
            ("Threads".to_string(), "com.burbn.barcelona".to_string()),
            ("   ".to_string(), "ignored".to_string()),
        ]);
        let catalog = SchemeCatalog::with_extra(&extra);

        assert_eq!(catalog.bundle_hint(&scheme("threads://")), Some("com.burbn.barcelona"));
        assert_eq!(catalog.bundle_hint(&scheme("instagram://")), Some("com.burbn.instagram"));
        assert!(!catalog.contains(&scheme("mystery://")));
    }

    proptest! {
        #[test]
        fn resolving_a_learned_scheme_is_stable(
            catalog_index in 0usize..BUILTIN_CATALOG.len(),
            token_count in 1usize..6
        ) {
            let raw_tokens = (0..token_count).map(|index| format!("tok-{index}")).collect::<Vec<_>>();
            let borrowed = raw_tokens.iter().map(String::as_str).collect::<Vec<_>>();
            let (_, mut mapper) = mapper_with(&borrowed);
            let target = scheme(BUILTIN_CATALOG[catalog_index].0);

            let first = mapper.resolve(&target);
            let second = mapper.resolve(&target);
            prop_assert!(first.is_some());
            prop_assert_eq!(first, second);
        }
    }
}
