use serde::Deserialize;
use std::{env, path::Path, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    pub app: AppConfig,
    pub paths: PathsConfig,
    pub telemetry: TelemetryConfig,
    pub google: GoogleConfig,
    pub auth: AuthConfig,
    pub crypto: CryptoConfig,
    pub ai: AiConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AppConfig {
    pub service_name: String,
    pub port: u16,
    pub env: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PathsConfig {
    pub database: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TelemetryConfig {
    pub otlp_endpoint: Option<String>,
    pub export_traces: bool,
}

/// OAuth client credentials for the Gmail connection flow.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AuthConfig {
    pub access_secret: String,
    pub audience: String,
    pub issuer: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CryptoConfig {
    /// 32-byte key, hex encoded, used by the secret box for provider tokens.
    pub encryption_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AiConfig {
    pub provider: String,
    pub model: String,
    pub embedding_model: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct SyncConfig {
    pub full_sync_max_messages: u32,
    pub page_size: u32,
    pub incremental_interval_secs: u64,
    pub token_refresh_interval_secs: u64,
    pub retry_interval_secs: u64,
    pub snooze_interval_secs: u64,
    pub enrichment_interval_secs: u64,
    pub enrichment_batch_size: u32,
    pub watchdog_threshold_secs: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            full_sync_max_messages: 200,
            page_size: 50,
            incremental_interval_secs: 300,
            token_refresh_interval_secs: 120,
            retry_interval_secs: 30,
            snooze_interval_secs: 60,
            enrichment_interval_secs: 600,
            enrichment_batch_size: 50,
            watchdog_threshold_secs: 300,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        source: config::ConfigError,
    },
    #[error("config did not match the expected shape: {0}")]
    Shape(config::ConfigError),
    #[error("config references unset environment variable {0}")]
    UnsetEnv(String),
    #[error("invalid {name} override: {value}")]
    BadOverride { name: &'static str, value: String },
}

impl Config {
    /// Load a TOML file, fold in process-environment overrides, then expand
    /// `env:NAME` markers and `~` in the database path. Secrets are expected
    /// to arrive through markers rather than living in the file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;

        let mut cfg: Config = raw.try_deserialize().map_err(ConfigError::Shape)?;
        cfg.apply_env_overrides()?;
        cfg.resolve_markers()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(value) = env::var("APP_PORT") {
            self.app.port = value.parse().map_err(|_| ConfigError::BadOverride {
                name: "APP_PORT",
                value,
            })?;
        }
        if let Ok(endpoint) = env::var("OTLP_ENDPOINT") {
            self.telemetry.otlp_endpoint = Some(endpoint);
        }
        if let Ok(model) = env::var("AI_MODEL") {
            self.ai.model = model;
        }
        Ok(())
    }

    fn resolve_markers(&mut self) -> Result<(), ConfigError> {
        for slot in [
            &mut self.app.service_name,
            &mut self.app.env,
            &mut self.google.client_id,
            &mut self.google.client_secret,
            &mut self.google.redirect_uri,
            &mut self.auth.access_secret,
            &mut self.auth.audience,
            &mut self.auth.issuer,
            &mut self.crypto.encryption_key,
            &mut self.ai.provider,
            &mut self.ai.model,
            &mut self.ai.embedding_model,
        ] {
            expand_env_marker(slot)?;
        }
        if let Some(endpoint) = self.telemetry.otlp_endpoint.as_mut() {
            expand_env_marker(endpoint)?;
        }

        let mut database = self.paths.database.to_string_lossy().into_owned();
        expand_env_marker(&mut database)?;
        self.paths.database = PathBuf::from(shellexpand::tilde(&database).into_owned());
        Ok(())
    }
}

/// Replaces an `env:NAME` value with the named environment variable.
/// Anything else is left alone.
fn expand_env_marker(value: &mut String) -> Result<(), ConfigError> {
    let Some(name) = value.strip_prefix("env:") else {
        return Ok(());
    };
    *value = env::var(name).map_err(|_| ConfigError::UnsetEnv(name.to_string()))?;
    Ok(())
}
