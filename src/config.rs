// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded from the environment once at startup and passed
//! to every component at construction time. Missing secrets are a fatal
//! startup error; there are no built-in fallback secrets.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Root directory for the database and blob store | `./data` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DOCUMENT_ENCRYPTION_KEY` | AES-256 key, 64 hex characters | Required |
//! | `ADMIN_TOKEN` | Bearer token for `/admin` endpoints | Required |
//! | `APP_BASE_URL` | Base URL used in signing links | `http://localhost:3000` |
//! | `VISION_API_KEY` | Vision backend API key | Optional (verification disabled) |
//! | `VISION_API_BASE_URL` | OpenAI-compatible API base | `https://api.openai.com/v1` |
//! | `VISION_MODEL` | Vision model identifier | `gpt-4o` |
//! | `VISION_TIMEOUT_SECS` | Vision request timeout | `60` |
//! | `WEBHOOK_TIMEOUT_SECS` | Webhook delivery timeout | `5` |
//! | `ENVELOPE_TTL_HOURS` | Envelope lifetime | `168` |
//! | `SIGNING_LINK_TTL_HOURS` | Signing token lifetime | `24` |
//! | `MAX_UPLOAD_BYTES` | Request body limit | `26214400` |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM files enabling HTTPS | Unset |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::path::PathBuf;
use std::time::Duration;

use crate::storage::paths::DATA_ROOT;
use crate::storage::StoragePaths;

/// Environment variable name for the data directory path.
///
/// Holds `envelopes.redb` and the `blobs/` object store.
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
/// 32-byte AES-256-GCM key, hex encoded.
pub const ENCRYPTION_KEY_ENV: &str = "DOCUMENT_ENCRYPTION_KEY";
pub const ADMIN_TOKEN_ENV: &str = "ADMIN_TOKEN";
pub const APP_BASE_URL_ENV: &str = "APP_BASE_URL";
pub const VISION_API_KEY_ENV: &str = "VISION_API_KEY";
pub const VISION_API_BASE_URL_ENV: &str = "VISION_API_BASE_URL";
pub const VISION_MODEL_ENV: &str = "VISION_MODEL";
pub const VISION_TIMEOUT_ENV: &str = "VISION_TIMEOUT_SECS";
pub const WEBHOOK_TIMEOUT_ENV: &str = "WEBHOOK_TIMEOUT_SECS";
pub const ENVELOPE_TTL_ENV: &str = "ENVELOPE_TTL_HOURS";
pub const SIGNING_LINK_TTL_ENV: &str = "SIGNING_LINK_TTL_HOURS";
pub const MAX_UPLOAD_BYTES_ENV: &str = "MAX_UPLOAD_BYTES";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_APP_BASE_URL: &str = "http://localhost:3000";
const DEFAULT_VISION_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_VISION_MODEL: &str = "gpt-4o";
const DEFAULT_VISION_TIMEOUT_SECS: u64 = 60;
const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 5;
const DEFAULT_ENVELOPE_TTL_HOURS: i64 = 168;
const DEFAULT_SIGNING_LINK_TTL_HOURS: i64 = 24;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Minimum accepted length for the admin bearer token.
const MIN_ADMIN_TOKEN_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("required configuration missing: {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Settings for the remote vision backend.
#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

/// Fully resolved service configuration.
#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub encryption_key: [u8; 32],
    pub admin_token: String,
    pub app_base_url: String,
    pub vision: Option<VisionConfig>,
    pub webhook_timeout: Duration,
    pub envelope_ttl: chrono::Duration,
    pub signing_link_ttl: chrono::Duration,
    pub max_upload_bytes: usize,
    pub tls: Option<(PathBuf, PathBuf)>,
    pub log_format: LogFormat,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("data_dir", &self.data_dir)
            .field("encryption_key", &"<redacted>")
            .field("admin_token", &"<redacted>")
            .field("app_base_url", &self.app_base_url)
            .field("vision_enabled", &self.vision.is_some())
            .field("webhook_timeout", &self.webhook_timeout)
            .field("envelope_ttl", &self.envelope_ttl)
            .field("signing_link_ttl", &self.signing_link_ttl)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("tls", &self.tls.is_some())
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let encryption_key = parse_encryption_key(
            &get(ENCRYPTION_KEY_ENV).ok_or(ConfigError::Missing(ENCRYPTION_KEY_ENV))?,
        )?;

        let admin_token = get(ADMIN_TOKEN_ENV).ok_or(ConfigError::Missing(ADMIN_TOKEN_ENV))?;
        if admin_token.len() < MIN_ADMIN_TOKEN_LEN {
            return Err(ConfigError::Invalid {
                name: ADMIN_TOKEN_ENV,
                reason: format!("must be at least {MIN_ADMIN_TOKEN_LEN} characters"),
            });
        }

        let app_base_url = get(APP_BASE_URL_ENV).unwrap_or_else(|| DEFAULT_APP_BASE_URL.into());
        url::Url::parse(&app_base_url).map_err(|e| ConfigError::Invalid {
            name: APP_BASE_URL_ENV,
            reason: e.to_string(),
        })?;

        let vision = match get(VISION_API_KEY_ENV) {
            Some(api_key) => Some(VisionConfig {
                api_key,
                base_url: get(VISION_API_BASE_URL_ENV)
                    .unwrap_or_else(|| DEFAULT_VISION_BASE_URL.into()),
                model: get(VISION_MODEL_ENV).unwrap_or_else(|| DEFAULT_VISION_MODEL.into()),
                timeout: Duration::from_secs(parse_or(
                    get(VISION_TIMEOUT_ENV),
                    VISION_TIMEOUT_ENV,
                    DEFAULT_VISION_TIMEOUT_SECS,
                )?),
            }),
            None => None,
        };

        let tls = match (get(TLS_CERT_PATH_ENV), get(TLS_KEY_PATH_ENV)) {
            (Some(cert), Some(key)) => Some((PathBuf::from(cert), PathBuf::from(key))),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Invalid {
                    name: TLS_CERT_PATH_ENV,
                    reason: "TLS_CERT_PATH and TLS_KEY_PATH must be set together".into(),
                })
            }
        };

        let log_format = match get(LOG_FORMAT_ENV).as_deref() {
            Some("json") => LogFormat::Json,
            Some("pretty") | None => LogFormat::Pretty,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: LOG_FORMAT_ENV,
                    reason: format!("expected 'json' or 'pretty', got '{other}'"),
                })
            }
        };

        Ok(Self {
            host: get(HOST_ENV).unwrap_or_else(|| DEFAULT_HOST.into()),
            port: parse_or(get(PORT_ENV), PORT_ENV, DEFAULT_PORT)?,
            data_dir: PathBuf::from(get(DATA_DIR_ENV).unwrap_or_else(|| DATA_ROOT.into())),
            encryption_key,
            admin_token,
            app_base_url,
            vision,
            webhook_timeout: Duration::from_secs(parse_or(
                get(WEBHOOK_TIMEOUT_ENV),
                WEBHOOK_TIMEOUT_ENV,
                DEFAULT_WEBHOOK_TIMEOUT_SECS,
            )?),
            envelope_ttl: chrono::Duration::hours(parse_or(
                get(ENVELOPE_TTL_ENV),
                ENVELOPE_TTL_ENV,
                DEFAULT_ENVELOPE_TTL_HOURS,
            )?),
            signing_link_ttl: chrono::Duration::hours(parse_or(
                get(SIGNING_LINK_TTL_ENV),
                SIGNING_LINK_TTL_ENV,
                DEFAULT_SIGNING_LINK_TTL_HOURS,
            )?),
            max_upload_bytes: parse_or(
                get(MAX_UPLOAD_BYTES_ENV),
                MAX_UPLOAD_BYTES_ENV,
                DEFAULT_MAX_UPLOAD_BYTES,
            )?,
            tls,
            log_format,
        })
    }

    /// On-disk layout rooted at `DATA_DIR`.
    pub fn storage_paths(&self) -> StoragePaths {
        StoragePaths::new(&self.data_dir)
    }
}

fn parse_encryption_key(raw: &str) -> Result<[u8; 32], ConfigError> {
    let bytes = hex::decode(raw.trim()).map_err(|e| ConfigError::Invalid {
        name: ENCRYPTION_KEY_ENV,
        reason: e.to_string(),
    })?;
    bytes.try_into().map_err(|b: Vec<u8>| ConfigError::Invalid {
        name: ENCRYPTION_KEY_ENV,
        reason: format!("expected 32 bytes, got {}", b.len()),
    })
}

fn parse_or<T>(raw: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::from_lookup(lookup(&[
            (ENCRYPTION_KEY_ENV, KEY_HEX),
            (ADMIN_TOKEN_ENV, "admin-token-0123456789"),
        ]))
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.encryption_key[31], 0x1f);
        assert!(config.vision.is_none());
        assert_eq!(config.webhook_timeout, Duration::from_secs(5));
        assert_eq!(config.signing_link_ttl, chrono::Duration::hours(24));
        assert_eq!(
            config.storage_paths().database_file(),
            PathBuf::from("./data/envelopes.redb")
        );
    }

    #[test]
    fn missing_encryption_key_is_fatal() {
        let result = Config::from_lookup(lookup(&[(ADMIN_TOKEN_ENV, "admin-token-0123456789")]));
        assert!(matches!(result, Err(ConfigError::Missing(ENCRYPTION_KEY_ENV))));
    }

    #[test]
    fn short_encryption_key_is_rejected() {
        let result = Config::from_lookup(lookup(&[
            (ENCRYPTION_KEY_ENV, "0011"),
            (ADMIN_TOKEN_ENV, "admin-token-0123456789"),
        ]));
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn missing_admin_token_is_fatal() {
        let result = Config::from_lookup(lookup(&[(ENCRYPTION_KEY_ENV, KEY_HEX)]));
        assert!(matches!(result, Err(ConfigError::Missing(ADMIN_TOKEN_ENV))));
    }

    #[test]
    fn vision_enabled_by_api_key() {
        let config = Config::from_lookup(lookup(&[
            (ENCRYPTION_KEY_ENV, KEY_HEX),
            (ADMIN_TOKEN_ENV, "admin-token-0123456789"),
            (VISION_API_KEY_ENV, "sk-test"),
            (VISION_TIMEOUT_ENV, "15"),
        ]))
        .unwrap();

        let vision = config.vision.unwrap();
        assert_eq!(vision.model, "gpt-4o");
        assert_eq!(vision.timeout, Duration::from_secs(15));
    }

    #[test]
    fn tls_paths_must_be_paired() {
        let result = Config::from_lookup(lookup(&[
            (ENCRYPTION_KEY_ENV, KEY_HEX),
            (ADMIN_TOKEN_ENV, "admin-token-0123456789"),
            (TLS_CERT_PATH_ENV, "/etc/cert.pem"),
        ]));
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let config = Config::from_lookup(lookup(&[
            (ENCRYPTION_KEY_ENV, KEY_HEX),
            (ADMIN_TOKEN_ENV, "admin-token-0123456789"),
        ]))
        .unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("admin-token-0123456789"));
        assert!(rendered.contains("<redacted>"));
    }
}
