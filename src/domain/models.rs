use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

const SCHEME_SEPARATOR: &str = "://";

/// URL-launch prefix naming a monitored app, e.g. `instagram://`.
///
/// Normalised on construction so that `Instagram`, `instagram` and
/// `instagram://` all address the same entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Scheme(String);

impl Scheme {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        validate_non_empty(trimmed, "scheme")?;
        let lowered = trimmed.to_ascii_lowercase();
        let name = lowered.strip_suffix(SCHEME_SEPARATOR).unwrap_or(&lowered);
        validate_non_empty(name, "scheme name")?;
        if name.chars().any(char::is_whitespace) {
            return Err("scheme must not contain whitespace".to_string());
        }
        Ok(Self(format!("{name}{SCHEME_SEPARATOR}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Scheme {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Scheme> for String {
    fn from(value: Scheme) -> Self {
        value.0
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque platform identifier for an installed application.
///
/// Only equality is meaningful. The textual form is whatever the platform
/// handed out and is never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Token(String);

impl Token {
    pub fn new(raw: impl Into<String>) -> Result<Self, String> {
        let raw = raw.into();
        validate_non_empty(&raw, "token")?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Token {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Token> for String {
    fn from(value: Token) -> Self {
        value.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type SchemeTokenMapping = HashMap<Scheme, Token>;
pub type ExpirationTable = HashMap<Scheme, ExpirationEntry>;

/// Apps the user picked, in picker order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppSelection {
    application_tokens: Vec<Token>,
}

impl AppSelection {
    pub fn from_tokens(tokens: impl IntoIterator<Item = Token>) -> Self {
        let mut seen = HashSet::new();
        let application_tokens = tokens
            .into_iter()
            .filter(|token| seen.insert(token.clone()))
            .collect();
        Self { application_tokens }
    }

    pub fn tokens(&self) -> &[Token] {
        &self.application_tokens
    }

    pub fn is_empty(&self) -> bool {
        self.application_tokens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.application_tokens.len()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Configuration {
    pub selection: AppSelection,
    pub onboarding_complete: bool,
}

impl Configuration {
    pub fn is_valid(&self) -> bool {
        self.onboarding_complete && !self.selection.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimingMode {
    #[default]
    Default,
    Random,
    Dynamic,
}

impl TimingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Random => "random",
            Self::Dynamic => "dynamic",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Default => "Default Mode",
            Self::Random => "Random Mode",
            Self::Dynamic => "Dynamic Mode",
        }
    }
}

impl FromStr for TimingMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "random" => Ok(Self::Random),
            "dynamic" => Ok(Self::Dynamic),
            other => Err(format!(
                "unknown timing mode '{other}' (expected default, random or dynamic)"
            )),
        }
    }
}

impl fmt::Display for TimingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase recorded for a scheme that has a pending deadline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExpirationPhase {
    /// Block cleared; the deadline is when the block is re-applied.
    Grace,
    /// Block re-applied; the deadline is when the scheme is forgotten.
    Cooldown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExpirationEntry {
    pub phase: ExpirationPhase,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MonitorPhase {
    Idle,
    Grace,
    Cooldown,
}

impl From<ExpirationPhase> for MonitorPhase {
    fn from(value: ExpirationPhase) -> Self {
        match value {
            ExpirationPhase::Grace => Self::Grace,
            ExpirationPhase::Cooldown => Self::Cooldown,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    Undetermined,
    Approved,
    Denied,
}

impl AuthorizationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Undetermined => "undetermined",
            Self::Approved => "approved",
            Self::Denied => "denied",
        }
    }
}

impl FromStr for AuthorizationStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "undetermined" => Ok(Self::Undetermined),
            "approved" => Ok(Self::Approved),
            "denied" => Ok(Self::Denied),
            other => Err(format!("unknown authorization status '{other}'")),
        }
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
