use crate::domain::models::{AuthorizationStatus, Token};
use crate::infrastructure::error::InfraError;
use chrono::Utc;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Enforcement primitive: whatever tokens were last asserted are blocked.
pub trait ShieldAdapter: Send + Sync {
    fn set_blocked(&self, tokens: &HashSet<Token>) -> Result<(), InfraError>;
    fn clear_all(&self) -> Result<(), InfraError>;
}

pub trait AuthorizationCenter: Send + Sync {
    fn status(&self) -> AuthorizationStatus;
    /// Prompts the user. Only meaningful while the status is undetermined.
    fn request(&self) -> AuthorizationStatus;
}

#[derive(Debug)]
pub struct StaticAuthorization {
    status: Mutex<AuthorizationStatus>,
    grant_on_request: bool,
}

impl StaticAuthorization {
    pub fn new(status: AuthorizationStatus) -> Self {
        Self {
            status: Mutex::new(status),
            grant_on_request: true,
        }
    }

    pub fn approved() -> Self {
        Self::new(AuthorizationStatus::Approved)
    }
}

#[cfg(test)]
impl StaticAuthorization {
    /// Undetermined status whose prompt is refused.
    pub fn refusing() -> Self {
        Self {
            status: Mutex::new(AuthorizationStatus::Undetermined),
            grant_on_request: false,
        }
    }
}

impl AuthorizationCenter for StaticAuthorization {
    fn status(&self) -> AuthorizationStatus {
        self.status
            .lock()
            .map(|status| *status)
            .unwrap_or(AuthorizationStatus::Denied)
    }

    fn request(&self) -> AuthorizationStatus {
        let Ok(mut status) = self.status.lock() else {
            return AuthorizationStatus::Denied;
        };
        if *status == AuthorizationStatus::Undetermined {
            *status = if self.grant_on_request {
                AuthorizationStatus::Approved
            } else {
                AuthorizationStatus::Denied
            };
        }
        *status
    }
}

/// Writes the enforced token set to a JSON file for an external enforcer to pick up.
#[derive(Debug, Clone)]
pub struct JsonFileShield {
    path: PathBuf,
}

impl JsonFileShield {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn read_blocked(&self) -> Result<HashSet<Token>, InfraError> {
        if !self.path.exists() {
            return Ok(HashSet::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        let parsed: serde_json::Value = serde_json::from_str(&raw)?;
        let tokens = parsed
            .get("blockedTokens")
            .cloned()
            .unwrap_or_else(|| serde_json::json!([]));
        let tokens: Vec<Token> = serde_json::from_value(tokens)?;
        Ok(tokens.into_iter().collect())
    }

    fn write(&self, tokens: &HashSet<Token>) -> Result<(), InfraError> {
        let mut ordered = tokens.iter().map(Token::as_str).collect::<Vec<_>>();
        ordered.sort_unstable();
        let payload = serde_json::json!({
            "updatedAt": Utc::now().to_rfc3339(),
            "blockedTokens": ordered,
        });
        let formatted = serde_json::to_string_pretty(&payload)?;
        fs::write(&self.path, format!("{formatted}\n"))
            .map_err(|error| InfraError::Shield(format!("{}: {error}", self.path.display())))
    }
}

impl ShieldAdapter for JsonFileShield {
    fn set_blocked(&self, tokens: &HashSet<Token>) -> Result<(), InfraError> {
        self.write(tokens)
    }

    fn clear_all(&self) -> Result<(), InfraError> {
        self.write(&HashSet::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShieldCall {
    SetBlocked(HashSet<Token>),
    ClearAll,
}

/// In-memory shield that remembers every assertion made against it.
#[derive(Debug, Default)]
pub struct RecordingShield {
    calls: Mutex<Vec<ShieldCall>>,
    failing: Mutex<bool>,
}

impl RecordingShield {
    pub fn calls(&self) -> Vec<ShieldCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }

    /// Tokens currently enforced, i.e. the effect of the last call.
    pub fn enforced(&self) -> HashSet<Token> {
        match self.calls().last() {
            Some(ShieldCall::SetBlocked(tokens)) => tokens.clone(),
            _ => HashSet::new(),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut flag) = self.failing.lock() {
            *flag = failing;
        }
    }

    fn record(&self, call: ShieldCall) -> Result<(), InfraError> {
        let failing = self.failing.lock().map(|flag| *flag).unwrap_or(false);
        if failing {
            return Err(InfraError::Shield("shield unavailable".to_string()));
        }
        let mut calls = self
            .calls
            .lock()
            .map_err(|error| InfraError::Shield(format!("recording shield lock poisoned: {error}")))?;
        calls.push(call);
        Ok(())
    }
}

impl ShieldAdapter for RecordingShield {
    fn set_blocked(&self, tokens: &HashSet<Token>) -> Result<(), InfraError> {
        self.record(ShieldCall::SetBlocked(tokens.clone()))
    }

    fn clear_all(&self) -> Result<(), InfraError> {
        self.record(ShieldCall::ClearAll)
    }
}
