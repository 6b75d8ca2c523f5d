use crate::domain::models::TimingMode;
use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

const SETTINGS_JSON: &str = "settings.json";
const SUPPORTED_SCHEMA: u8 = 1;
/// Upper bound for any configured delay, one leap year.
pub const MAX_DELAY_SECONDS: f64 = 366.0 * 86_400.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecondsRange {
    pub min: f64,
    pub max: f64,
}

/// User-tunable behaviour, stored as `config/settings.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub schema: u8,
    pub timing_mode: TimingMode,
    pub verification_code_length: usize,
    pub dynamic_code_length: usize,
    pub grace_seconds: f64,
    pub random_grace_seconds: SecondsRange,
    pub seconds_per_character: f64,
    pub dynamic_fallback_seconds: f64,
    pub cooldown_seconds: f64,
    pub continue_debounce_seconds: f64,
    /// Additional scheme → bundle identifier hints beyond the built-in catalog.
    #[serde(default)]
    pub extra_schemes: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema: SUPPORTED_SCHEMA,
            timing_mode: TimingMode::Default,
            verification_code_length: 8,
            dynamic_code_length: 20,
            grace_seconds: 10.0,
            random_grace_seconds: SecondsRange { min: 1.0, max: 10.0 },
            seconds_per_character: 2.0,
            dynamic_fallback_seconds: 2.0,
            cooldown_seconds: 600.0,
            continue_debounce_seconds: 3.0,
            extra_schemes: BTreeMap::new(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), InfraError> {
        if self.schema != SUPPORTED_SCHEMA {
            return Err(InfraError::InvalidConfig(format!(
                "unsupported schema {} in {SETTINGS_JSON}",
                self.schema
            )));
        }
        if self.verification_code_length == 0 {
            return invalid("verificationCodeLength must be > 0");
        }
        if self.dynamic_code_length == 0 {
            return invalid("dynamicCodeLength must be > 0");
        }
        for (value, field_name) in [
            (self.grace_seconds, "graceSeconds"),
            (self.random_grace_seconds.min, "randomGraceSeconds.min"),
            (self.random_grace_seconds.max, "randomGraceSeconds.max"),
            (self.seconds_per_character, "secondsPerCharacter"),
            (self.dynamic_fallback_seconds, "dynamicFallbackSeconds"),
            (self.cooldown_seconds, "cooldownSeconds"),
            (self.continue_debounce_seconds, "continueDebounceSeconds"),
        ] {
            if !value.is_finite() || value < 0.0 {
                return invalid(&format!("{field_name} must be a non-negative number"));
            }
            if value > MAX_DELAY_SECONDS {
                return invalid(&format!("{field_name} must be at most {MAX_DELAY_SECONDS} seconds"));
            }
        }
        if self.seconds_per_character * self.dynamic_code_length as f64 > MAX_DELAY_SECONDS {
            return invalid("secondsPerCharacter * dynamicCodeLength must be at most one year");
        }
        if self.random_grace_seconds.min > self.random_grace_seconds.max {
            return invalid("randomGraceSeconds.min must be <= randomGraceSeconds.max");
        }
        Ok(())
    }
}

fn invalid(message: &str) -> Result<(), InfraError> {
    Err(InfraError::InvalidConfig(message.to_string()))
}

pub fn ensure_default_settings(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(SETTINGS_JSON);
    if !path.exists() {
        write_settings(config_dir, &Settings::default())?;
    }
    Ok(())
}

pub fn load_settings(config_dir: &Path) -> Result<Settings, InfraError> {
    let path = config_dir.join(SETTINGS_JSON);
    let raw = fs::read_to_string(&path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != u64::from(SUPPORTED_SCHEMA) {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    let settings: Settings = serde_json::from_value(parsed)?;
    settings.validate()?;
    Ok(settings)
}

pub fn save_timing_mode(config_dir: &Path, mode: TimingMode) -> Result<Settings, InfraError> {
    let mut settings = load_settings(config_dir)?;
    settings.timing_mode = mode;
    write_settings(config_dir, &settings)?;
    Ok(settings)
}

pub fn save_verification_code_length(config_dir: &Path, length: usize) -> Result<Settings, InfraError> {
    let mut settings = load_settings(config_dir)?;
    settings.verification_code_length = length;
    settings.validate()?;
    write_settings(config_dir, &settings)?;
    Ok(settings)
}

fn write_settings(config_dir: &Path, settings: &Settings) -> Result<(), InfraError> {
    let formatted = serde_json::to_string_pretty(settings)?;
    fs::write(config_dir.join(SETTINGS_JSON), format!("{formatted}\n"))?;
    Ok(())
}
