//! Vault configuration.
//!
//! Read from the `[vault]` table of a TOML file. Every field has a default,
//! so an empty or missing file yields a working production configuration.
//!
//! ```toml
//! [vault]
//! profile = "production"
//! pin_iterations = 100000
//! session_iterations = 150000
//! fallback_prefix = "securestore/fallback/"
//!
//! [vault.lockout]
//! base_ms = 1000
//! max_lock_ms = 900000
//! max_exponent = 5
//! lock_after_attempts = 2
//! ```
//!
//! The `PINVAULT_PROFILE` environment variable overrides `profile` when the
//! configuration is loaded from disk. In release builds it can only tighten
//! the profile to production.

use std::path::Path;

use pinvault_store::{DEFAULT_FALLBACK_PREFIX, FallbackPolicy};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::lockout::LockoutPolicy;

/// Environment variable that overrides [`VaultConfig::profile`].
pub const PROFILE_ENV: &str = "PINVAULT_PROFILE";

/// Default PIN verifier work factor.
pub const DEFAULT_PIN_ITERATIONS: u32 = 100_000;

/// Default session key work factor.
pub const DEFAULT_SESSION_ITERATIONS: u32 = 150_000;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid vault configuration: {reason}")]
    Invalid { reason: String },
}

/// Build profile. Only development builds may fall back to plaintext
/// storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildProfile {
    Development,
    Production,
}

impl BuildProfile {
    /// Development for debug builds, production otherwise.
    pub fn from_build() -> Self {
        if cfg!(debug_assertions) {
            Self::Development
        } else {
            Self::Production
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }

    pub fn fallback_policy(self) -> FallbackPolicy {
        match self {
            Self::Development => FallbackPolicy::AllowInsecure,
            Self::Production => FallbackPolicy::Deny,
        }
    }
}

impl Default for BuildProfile {
    fn default() -> Self {
        Self::from_build()
    }
}

/// Tunables of the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub profile: BuildProfile,
    pub pin_iterations: u32,
    pub session_iterations: u32,
    pub lockout: LockoutPolicy,
    pub fallback_prefix: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            profile: BuildProfile::default(),
            pin_iterations: DEFAULT_PIN_ITERATIONS,
            session_iterations: DEFAULT_SESSION_ITERATIONS,
            lockout: LockoutPolicy::default(),
            fallback_prefix: DEFAULT_FALLBACK_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    vault: VaultConfig,
}

impl VaultConfig {
    /// Parse the `[vault]` table of a TOML document and validate it.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        file.vault.validate()?;
        Ok(file.vault)
    }

    /// Load from `path`, applying the environment override. A missing file
    /// yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config = Self::from_toml_str(&content)?;
            info!(path = %path.display(), "vault configuration loaded");
            config
        } else {
            debug!(path = %path.display(), "no vault configuration file, using defaults");
            Self::default()
        };

        config.apply_profile_override(std::env::var(PROFILE_ENV).ok().as_deref());
        config.validate()?;
        Ok(config)
    }

    /// Replace the profile with `raw` if it names one.
    ///
    /// Release builds never move from production to development.
    pub fn apply_profile_override(&mut self, raw: Option<&str>) {
        self.override_profile(raw, !cfg!(debug_assertions));
    }

    fn override_profile(&mut self, raw: Option<&str>, release: bool) {
        let Some(raw) = raw else {
            return;
        };
        match BuildProfile::parse(raw) {
            Some(BuildProfile::Development)
                if release && self.profile == BuildProfile::Production =>
            {
                warn!(
                    value = raw,
                    "refusing {PROFILE_ENV} downgrade to development in a release build"
                );
            }
            Some(profile) => {
                info!(?profile, "vault profile overridden from environment");
                self.profile = profile;
            }
            None => warn!(value = raw, "ignoring unrecognized {PROFILE_ENV}"),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pin_iterations == 0 || self.session_iterations == 0 {
            return Err(ConfigError::Invalid {
                reason: "iteration counts must be non-zero".into(),
            });
        }
        if self.pin_iterations == self.session_iterations {
            return Err(ConfigError::Invalid {
                reason: "pin_iterations and session_iterations must differ".into(),
            });
        }
        if self.lockout.max_lock_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: "lockout.max_lock_ms must be non-zero".into(),
            });
        }
        if self.fallback_prefix.is_empty() {
            return Err(ConfigError::Invalid {
                reason: "fallback_prefix must not be empty".into(),
            });
        }
        Ok(())
    }

    pub fn fallback_policy(&self) -> FallbackPolicy {
        self.profile.fallback_policy()
    }
}
