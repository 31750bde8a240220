//! Orchestrator configuration.

use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use strum::{Display, EnumString};

use crate::{
    error::{VaultKitError, VaultKitResult},
    provisioning::DEFAULT_COLLECTION_NAME,
    session::SESSION_TTL_SECONDS,
};

/// Default lifetime of a delegation token.
pub const DELEGATION_TTL_SECONDS: u64 = 60;

const DEFAULT_BUILDER_NAME: &str = "vaultkit";
const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 10;
const DEFAULT_MAX_RETRIES: u32 = 3; // total attempts = 4

/// Deployment presets for the vault service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Environment {
    /// A vault node running on the developer's machine.
    Local,
    /// The shared staging deployment.
    Staging,
    /// The production deployment.
    Production,
}

impl Environment {
    /// Base URL of the vault API for this environment.
    #[must_use]
    pub const fn base_url(self) -> &'static str {
        match self {
            Self::Local => "http://localhost:8080",
            Self::Staging => "https://vault.staging.vaultkit.dev",
            Self::Production => "https://vault.vaultkit.dev",
        }
    }
}

/// Settings for a [`crate::VaultInitializer`] and the transports it drives.
///
/// The builder private key is kept in a [`SecretString`] and never appears in `Debug` output.
#[derive(Debug, Deserialize)]
pub struct VaultConfig {
    /// Base URL of the vault API.
    pub base_url: String,
    /// Hex-encoded Ed25519 secret key of the builder identity (`0x` prefix optional).
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub builder_private_key: Option<SecretString>,
    /// Human readable name the builder registers under.
    #[serde(default = "default_builder_name")]
    pub builder_name: String,
    /// Name of the collection holding user records.
    #[serde(default = "default_collection_name")]
    pub collection_name: String,
    /// How long a persisted session stays valid.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: u64,
    /// Lifetime of each delegation token.
    #[serde(default = "default_delegation_ttl")]
    pub delegation_ttl_seconds: u64,
    /// Per-request timeout for vault calls.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Retries for transient vault failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Permits plain `http://` base URLs. Only meant for local nodes.
    #[serde(default)]
    pub allow_insecure_http: bool,
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(|value| value.map(SecretString::from))
}

fn default_builder_name() -> String {
    DEFAULT_BUILDER_NAME.to_string()
}

fn default_collection_name() -> String {
    DEFAULT_COLLECTION_NAME.to_string()
}

const fn default_session_ttl() -> u64 {
    SESSION_TTL_SECONDS
}

const fn default_delegation_ttl() -> u64 {
    DELEGATION_TTL_SECONDS
}

const fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECONDS
}

const fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl VaultConfig {
    /// Creates a config with defaults for everything but the URL and key.
    #[must_use]
    pub fn new(base_url: impl Into<String>, builder_private_key: Option<SecretString>) -> Self {
        Self {
            base_url: base_url.into(),
            builder_private_key,
            builder_name: default_builder_name(),
            collection_name: default_collection_name(),
            session_ttl_seconds: SESSION_TTL_SECONDS,
            delegation_ttl_seconds: DELEGATION_TTL_SECONDS,
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECONDS,
            max_retries: DEFAULT_MAX_RETRIES,
            allow_insecure_http: false,
        }
    }

    /// Creates a config from a deployment preset.
    #[must_use]
    pub fn from_environment(
        environment: Environment,
        builder_private_key: Option<SecretString>,
    ) -> Self {
        let mut config = Self::new(environment.base_url(), builder_private_key);
        config.allow_insecure_http = environment == Environment::Local;
        config
    }

    /// Parses a JSON config and validates it.
    ///
    /// # Errors
    /// Returns [`VaultKitError::InvalidConfig`] if the JSON is malformed or a value is rejected.
    pub fn from_json(json: &str) -> VaultKitResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| VaultKitError::InvalidConfig {
                attribute: "config".to_string(),
                reason: err.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads the config from `VAULTKIT_*` process environment variables.
    ///
    /// # Errors
    /// See [`VaultConfig::from_env_with`].
    pub fn from_env() -> VaultKitResult<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Reads the config through `lookup`, which maps variable names to values.
    ///
    /// `VAULTKIT_BASE_URL` is required unless `VAULTKIT_ENVIRONMENT` names a preset.
    ///
    /// # Errors
    /// Returns [`VaultKitError::InvalidConfig`] for missing or unparsable values.
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> VaultKitResult<Self> {
        let key = lookup("VAULTKIT_BUILDER_PRIVATE_KEY").map(SecretString::from);
        let mut config = match lookup("VAULTKIT_ENVIRONMENT") {
            Some(name) => {
                let environment: Environment =
                    name.parse().map_err(|_| VaultKitError::InvalidConfig {
                        attribute: "VAULTKIT_ENVIRONMENT".to_string(),
                        reason: format!("unknown environment `{name}`"),
                    })?;
                Self::from_environment(environment, key)
            }
            None => {
                let base_url =
                    lookup("VAULTKIT_BASE_URL").ok_or_else(|| VaultKitError::InvalidConfig {
                        attribute: "VAULTKIT_BASE_URL".to_string(),
                        reason: "not set".to_string(),
                    })?;
                Self::new(base_url, key)
            }
        };

        if let Some(url) = lookup("VAULTKIT_BASE_URL") {
            config.base_url = url;
        }
        if let Some(name) = lookup("VAULTKIT_BUILDER_NAME") {
            config.builder_name = name;
        }
        if let Some(name) = lookup("VAULTKIT_COLLECTION_NAME") {
            config.collection_name = name;
        }
        if let Some(value) = lookup("VAULTKIT_SESSION_TTL_SECONDS") {
            config.session_ttl_seconds = parse_number("VAULTKIT_SESSION_TTL_SECONDS", &value)?;
        }
        if let Some(value) = lookup("VAULTKIT_DELEGATION_TTL_SECONDS") {
            config.delegation_ttl_seconds =
                parse_number("VAULTKIT_DELEGATION_TTL_SECONDS", &value)?;
        }
        if let Some(value) = lookup("VAULTKIT_REQUEST_TIMEOUT_SECONDS") {
            config.request_timeout_seconds =
                parse_number("VAULTKIT_REQUEST_TIMEOUT_SECONDS", &value)?;
        }
        if let Some(value) = lookup("VAULTKIT_MAX_RETRIES") {
            config.max_retries = parse_number("VAULTKIT_MAX_RETRIES", &value)?;
        }
        if let Some(value) = lookup("VAULTKIT_ALLOW_INSECURE_HTTP") {
            config.allow_insecure_http = matches!(value.as_str(), "1" | "true" | "yes");
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges and URL scheme.
    ///
    /// # Errors
    /// Returns [`VaultKitError::InvalidConfig`] naming the first rejected setting.
    pub fn validate(&self) -> VaultKitResult<()> {
        let invalid = |attribute: &str, reason: &str| VaultKitError::InvalidConfig {
            attribute: attribute.to_string(),
            reason: reason.to_string(),
        };

        if self.base_url.trim().is_empty() {
            return Err(invalid("base_url", "must not be empty"));
        }
        if !self.base_url.starts_with("https://") {
            if !self.base_url.starts_with("http://") {
                return Err(invalid("base_url", "must be an http(s) URL"));
            }
            if !self.allow_insecure_http {
                return Err(invalid("base_url", "plain http requires allow_insecure_http"));
            }
        }
        if self.collection_name.trim().is_empty() {
            return Err(invalid("collection_name", "must not be empty"));
        }
        if self.session_ttl_seconds == 0 {
            return Err(invalid("session_ttl_seconds", "must be positive"));
        }
        if self.delegation_ttl_seconds == 0 {
            return Err(invalid("delegation_ttl_seconds", "must be positive"));
        }
        if self.request_timeout_seconds == 0 {
            return Err(invalid("request_timeout_seconds", "must be positive"));
        }
        Ok(())
    }

    /// Per-request timeout as a [`Duration`].
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

fn parse_number<T: std::str::FromStr>(attribute: &str, value: &str) -> VaultKitResult<T> {
    value.trim().parse().map_err(|_| VaultKitError::InvalidConfig {
        attribute: attribute.to_string(),
        reason: format!("`{value}` is not a number"),
    })
}
