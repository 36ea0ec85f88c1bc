use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::models::ServiceId;

const ENV_PREFIX: &str = "TENANT_AUTH";

const OVERRIDE_FIELDS: &[&str] = &[
    "TENANT_ID",
    "CLIENT_ID",
    "CLIENT_SECRET",
    "CERTIFICATE_PATH",
    "CERTIFICATE_PASSWORD",
    "CERTIFICATE_THUMBPRINT",
];

/// Credential material and endpoints for one service
#[derive(Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub certificate_path: Option<PathBuf>,
    #[serde(default)]
    pub certificate_password: Option<String>,
    #[serde(default)]
    pub certificate_thumbprint: Option<String>,
    #[serde(default)]
    pub required_scopes: Vec<String>,
    /// Counts towards overall health
    #[serde(default = "default_true")]
    pub required: bool,
    /// OAuth2 token endpoint; `{tenant}` is substituted
    #[serde(default)]
    pub token_url: Option<String>,
    /// Scope requested in the token call
    #[serde(default)]
    pub scope: Option<String>,
    /// Lightweight endpoint fetched to prove the session works; `{tenant}` is substituted.
    /// Defaults to a per-service read such as the Graph organization endpoint.
    #[serde(default)]
    pub verify_url: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: None,
            certificate_path: None,
            certificate_password: None,
            certificate_thumbprint: None,
            required_scopes: Vec::new(),
            required: true,
            token_url: None,
            scope: None,
            verify_url: None,
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("ServiceConfig")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &redact(&self.client_secret))
            .field("certificate_path", &self.certificate_path)
            .field("certificate_password", &redact(&self.certificate_password))
            .field("certificate_thumbprint", &self.certificate_thumbprint)
            .field("required_scopes", &self.required_scopes)
            .field("required", &self.required)
            .field("token_url", &self.token_url)
            .field("scope", &self.scope)
            .field("verify_url", &self.verify_url)
            .finish()
    }
}

/// `[resilience]` section; unset values fall back to `ResilienceConfig::default()`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceSettings {
    #[serde(default = "default_true")]
    pub retry_enabled: bool,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_delay_secs: Option<u64>,
    #[serde(default)]
    pub jitter: Option<bool>,
    #[serde(default)]
    pub lock_wait_secs: Option<u64>,
    #[serde(default)]
    pub lock_escalated_wait_secs: Option<u64>,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub error_history_limit: Option<usize>,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            retry_enabled: true,
            max_attempts: None,
            base_delay_ms: None,
            max_delay_secs: None,
            jitter: None,
            lock_wait_secs: None,
            lock_escalated_wait_secs: None,
            log_level: None,
            error_history_limit: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Root for relative certificate paths; defaults to the config file's directory
    #[serde(default)]
    pub certificate_root: Option<PathBuf>,
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
    #[serde(default = "default_result_ttl_secs")]
    pub result_ttl_secs: u64,
    #[serde(default)]
    pub resilience: ResilienceSettings,
    #[serde(default)]
    pub services: BTreeMap<ServiceId, ServiceConfig>,
    #[serde(skip)]
    source_dir: Option<PathBuf>,
}

fn default_token_ttl_secs() -> u64 {
    3000
}

fn default_result_ttl_secs() -> u64 {
    300
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            certificate_root: None,
            token_ttl_secs: default_token_ttl_secs(),
            result_ttl_secs: default_result_ttl_secs(),
            resilience: ResilienceSettings::default(),
            services: BTreeMap::new(),
            source_dir: None,
        }
    }
}

impl AuthConfig {
    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = if cfg!(target_os = "linux") {
            // Use XDG config directory on Linux
            dirs::config_dir()
                .context("Failed to get XDG config directory")?
                .join("tenant-auth")
        } else {
            // Use home directory with dot prefix on Windows/Mac
            dirs::home_dir()
                .context("Failed to get home directory")?
                .join(".tenant-auth")
        };

        Ok(config_dir.join("config.toml"))
    }

    /// Load from the default location, or defaults if no file exists yet
    pub fn load_default() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        if !config_path.exists() {
            info!("Config file doesn't exist, using defaults");
            return Ok(Self::default());
        }
        Self::load(&config_path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading config from: {:?}", path);

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config.source_dir = path.parent().map(Path::to_path_buf);

        debug!("Loaded config with {} services", config.services.len());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid config TOML")
    }

    /// Apply `TENANT_AUTH_<SERVICE>_<FIELD>` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> usize {
        self.apply_overrides(std::env::vars())
    }

    /// Apply overrides from any key/value source; returns how many were applied
    pub fn apply_overrides<I>(&mut self, vars: I) -> usize
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut applied = 0;

        for (key, value) in vars {
            let Some(rest) = key.strip_prefix(ENV_PREFIX).and_then(|r| r.strip_prefix('_')) else {
                continue;
            };

            let Some((service, field)) = ServiceId::ALL.iter().find_map(|service| {
                let prefix = format!("{}_", service.as_str().to_uppercase());
                rest.strip_prefix(&prefix).map(|field| (*service, field))
            }) else {
                continue;
            };

            if !OVERRIDE_FIELDS.contains(&field) {
                continue;
            }

            let entry = self.services.entry(service).or_default();
            match field {
                "TENANT_ID" => entry.tenant_id = value,
                "CLIENT_ID" => entry.client_id = value,
                "CLIENT_SECRET" => entry.client_secret = Some(value),
                "CERTIFICATE_PATH" => entry.certificate_path = Some(PathBuf::from(value)),
                "CERTIFICATE_PASSWORD" => entry.certificate_password = Some(value),
                "CERTIFICATE_THUMBPRINT" => entry.certificate_thumbprint = Some(value),
                _ => continue,
            }

            debug!("Applied environment override {}", key);
            applied += 1;
        }

        applied
    }

    pub fn service(&self, service: ServiceId) -> Option<&ServiceConfig> {
        self.services.get(&service)
    }

    /// Services that count towards overall health
    pub fn required_services(&self) -> Vec<ServiceId> {
        self.services
            .iter()
            .filter(|(_, config)| config.required)
            .map(|(service, _)| *service)
            .collect()
    }

    pub fn certificate_root(&self) -> PathBuf {
        self.certificate_root
            .clone()
            .or_else(|| self.source_dir.clone())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }
}
