//! Single persistence schema for the blocking lifecycle.
//!
//! Every key the app and its trigger handler share lives here. Values are JSON.
//! Anything that fails to decode is treated as "no prior state".

use crate::domain::models::{
    Configuration, ExpirationEntry, ExpirationTable, Scheme, SchemeTokenMapping, Token,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::kv_store::KeyValueStore;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

pub const SCHEMA_VERSION: u32 = 1;

pub const SCHEMA_VERSION_KEY: &str = "schema_version";
pub const CONFIGURATION_KEY: &str = "configuration";
pub const MAPPING_KEY: &str = "scheme_token_mapping";
pub const BLOCKED_TOKENS_KEY: &str = "blocked_tokens";
pub const EXPIRATION_TABLE_KEY: &str = "expiration_table";
pub const PENDING_CHALLENGE_KEY: &str = "pending_challenge_scheme";
const CONTINUE_TIMESTAMP_PREFIX: &str = "continue_timestamp:";

const RESETTABLE_KEYS: [&str; 5] = [
    CONFIGURATION_KEY,
    MAPPING_KEY,
    BLOCKED_TOKENS_KEY,
    EXPIRATION_TABLE_KEY,
    PENDING_CHALLENGE_KEY,
];

#[derive(Clone)]
pub struct StateRepository {
    store: Arc<dyn KeyValueStore>,
}

impl StateRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Stamps the schema version, discarding state written under any other version.
    pub fn ensure_schema(&self) -> Result<(), InfraError> {
        match self.read_json::<u32>(SCHEMA_VERSION_KEY) {
            Some(SCHEMA_VERSION) => Ok(()),
            Some(found) => {
                warn!(found, expected = SCHEMA_VERSION, "discarding state with unsupported schema version");
                for key in RESETTABLE_KEYS {
                    self.store.remove(key)?;
                }
                self.write_json(SCHEMA_VERSION_KEY, &SCHEMA_VERSION)
            }
            None => self.write_json(SCHEMA_VERSION_KEY, &SCHEMA_VERSION),
        }
    }

    pub fn load_configuration(&self) -> Option<Configuration> {
        self.read_json(CONFIGURATION_KEY)
    }

    pub fn save_configuration(&self, configuration: &Configuration) -> Result<(), InfraError> {
        self.write_json(CONFIGURATION_KEY, configuration)
    }

    pub fn load_mappings(&self) -> SchemeTokenMapping {
        self.read_json(MAPPING_KEY).unwrap_or_default()
    }

    pub fn save_mappings(&self, mappings: &SchemeTokenMapping) -> Result<(), InfraError> {
        self.write_json(MAPPING_KEY, mappings)
    }

    pub fn load_blocked_tokens(&self) -> HashSet<Token> {
        self.read_json::<Vec<Token>>(BLOCKED_TOKENS_KEY)
            .map(|tokens| tokens.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn save_blocked_tokens(&self, tokens: &HashSet<Token>) -> Result<(), InfraError> {
        let mut ordered = tokens.iter().collect::<Vec<_>>();
        ordered.sort_by(|left, right| left.as_str().cmp(right.as_str()));
        self.write_json(BLOCKED_TOKENS_KEY, &ordered)
    }

    pub fn load_expirations(&self) -> ExpirationTable {
        self.read_json(EXPIRATION_TABLE_KEY).unwrap_or_default()
    }

    pub fn save_expirations(&self, table: &ExpirationTable) -> Result<(), InfraError> {
        self.write_json(EXPIRATION_TABLE_KEY, table)
    }

    pub fn load_expiration(&self, scheme: &Scheme) -> Option<ExpirationEntry> {
        self.load_expirations().remove(scheme)
    }

    /// Rewrites only `scheme`'s entry, keeping whatever other processes recorded for other schemes.
    pub fn update_expiration(
        &self,
        scheme: &Scheme,
        entry: Option<&ExpirationEntry>,
    ) -> Result<(), InfraError> {
        let mut table = self.load_expirations();
        match entry {
            Some(entry) => {
                table.insert(scheme.clone(), entry.clone());
            }
            None => {
                table.remove(scheme);
            }
        }
        self.save_expirations(&table)
    }

    pub fn load_pending_challenge(&self) -> Option<Scheme> {
        self.read_json(PENDING_CHALLENGE_KEY)
    }

    pub fn save_pending_challenge(&self, scheme: Option<&Scheme>) -> Result<(), InfraError> {
        match scheme {
            Some(scheme) => self.write_json(PENDING_CHALLENGE_KEY, scheme),
            None => self.store.remove(PENDING_CHALLENGE_KEY),
        }
    }

    pub fn load_continue_timestamp(&self, scheme: &Scheme) -> Option<DateTime<Utc>> {
        self.read_json(&continue_timestamp_key(scheme))
    }

    pub fn save_continue_timestamp(&self, scheme: &Scheme, at: DateTime<Utc>) -> Result<(), InfraError> {
        self.write_json(&continue_timestamp_key(scheme), &at)
    }

    /// Wipes configuration, mappings, block set, expirations and the pending challenge.
    pub fn reset(&self) -> Result<(), InfraError> {
        for key in RESETTABLE_KEYS {
            self.store.remove(key)?;
        }
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match self.store.get(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(error) => {
                warn!(key, %error, "failed to read persisted state; treating as absent");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(key, %error, "failed to decode persisted state; treating as absent");
                None
            }
        }
    }

    fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), InfraError> {
        let bytes = serde_json::to_vec(value)?;
        self.store.set(key, &bytes)
    }
}

fn continue_timestamp_key(scheme: &Scheme) -> String {
    format!("{CONTINUE_TIMESTAMP_PREFIX}{}", scheme.as_str())
}
