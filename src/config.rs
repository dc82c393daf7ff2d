// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Client settings are loaded from the environment by the binary, or built
//! with [`BunqConfig::new`] when the crate is embedded.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `BUNQ_ENVIRONMENT` | `sandbox` or `production` | `sandbox` |
//! | `BUNQ_BASE_URL` | Override for the API base URL | per environment |
//! | `BUNQ_API_KEY` | Personal API key used for device registration | Required by the binary |
//! | `BUNQ_DEVICE_DESCRIPTION` | Description shown in the bunq app | `bunq-session-client` |
//! | `BUNQ_PERMITTED_IPS` | Comma-separated IPs for the device | `*` |
//! | `BUNQ_USER_AGENT` | `User-Agent` header | `bunq-session-client/<version>` |
//! | `BUNQ_LANGUAGE` | `X-Bunq-Language` header | `en_US` |
//! | `BUNQ_REGION` | `X-Bunq-Region` header | `nl_NL` |
//! | `BUNQ_GEOLOCATION` | `X-Bunq-Geolocation` header | `0 0 0 0 000` |
//! | `BUNQ_HTTP_TIMEOUT_SECS` | HTTP request timeout | `15` |
//! | `BUNQ_DATA_DIR` | Directory for the key file and saved context | `./bunq-data` |
//! | `BUNQ_KEY_ID` | Key id of the client private key | `bunq-client` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::time::Duration;

use url::Url;

use crate::error::{BunqError, BunqResult};
use crate::keys::DEFAULT_KEY_ID;

pub const ENVIRONMENT_ENV: &str = "BUNQ_ENVIRONMENT";
pub const BASE_URL_ENV: &str = "BUNQ_BASE_URL";
pub const API_KEY_ENV: &str = "BUNQ_API_KEY";
pub const DEVICE_DESCRIPTION_ENV: &str = "BUNQ_DEVICE_DESCRIPTION";
pub const PERMITTED_IPS_ENV: &str = "BUNQ_PERMITTED_IPS";
pub const USER_AGENT_ENV: &str = "BUNQ_USER_AGENT";
pub const LANGUAGE_ENV: &str = "BUNQ_LANGUAGE";
pub const REGION_ENV: &str = "BUNQ_REGION";
pub const GEOLOCATION_ENV: &str = "BUNQ_GEOLOCATION";
pub const HTTP_TIMEOUT_ENV: &str = "BUNQ_HTTP_TIMEOUT_SECS";
pub const DATA_DIR_ENV: &str = "BUNQ_DATA_DIR";
pub const KEY_ID_ENV: &str = "BUNQ_KEY_ID";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const SANDBOX_BASE_URL: &str = "https://public-api.sandbox.bunq.com/v1";
pub const PRODUCTION_BASE_URL: &str = "https://api.bunq.com/v1";

const DEFAULT_DEVICE_DESCRIPTION: &str = "bunq-session-client";
const DEFAULT_LANGUAGE: &str = "en_US";
const DEFAULT_REGION: &str = "nl_NL";
const DEFAULT_GEOLOCATION: &str = "0 0 0 0 000";
const DEFAULT_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_DATA_DIR: &str = "./bunq-data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BunqEnvironment {
    Sandbox,
    Production,
}

impl BunqEnvironment {
    pub fn base_url(&self) -> &'static str {
        match self {
            BunqEnvironment::Sandbox => SANDBOX_BASE_URL,
            BunqEnvironment::Production => PRODUCTION_BASE_URL,
        }
    }

    /// Parse from string (case-insensitive).
    pub fn parse(value: &str) -> Option<BunqEnvironment> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Some(BunqEnvironment::Sandbox),
            "production" | "prod" => Some(BunqEnvironment::Production),
            _ => None,
        }
    }
}

/// Settings for one bank client.
#[derive(Debug, Clone)]
pub struct BunqConfig {
    pub environment: BunqEnvironment,
    pub base_url: String,
    pub device_description: String,
    pub permitted_ips: Vec<String>,
    pub user_agent: String,
    pub language: String,
    pub region: String,
    pub geolocation: String,
    pub timeout: Duration,
    pub key_id: String,
}

impl BunqConfig {
    /// Defaults for `environment`.
    pub fn new(environment: BunqEnvironment) -> Self {
        Self {
            environment,
            base_url: environment.base_url().to_string(),
            device_description: DEFAULT_DEVICE_DESCRIPTION.to_string(),
            permitted_ips: vec!["*".to_string()],
            user_agent: default_user_agent(),
            language: DEFAULT_LANGUAGE.to_string(),
            region: DEFAULT_REGION.to_string(),
            geolocation: DEFAULT_GEOLOCATION.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            key_id: DEFAULT_KEY_ID.to_string(),
        }
    }

    /// Use a different base URL (mock servers, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn from_env() -> BunqResult<Self> {
        let environment = match env_optional(ENVIRONMENT_ENV) {
            Some(raw) => BunqEnvironment::parse(&raw).ok_or_else(|| {
                BunqError::Config(format!("{ENVIRONMENT_ENV} must be sandbox or production, got {raw}"))
            })?,
            None => BunqEnvironment::Sandbox,
        };
        let defaults = Self::new(environment);

        let base_url = env_or_default(BASE_URL_ENV, &defaults.base_url);
        let permitted_ips = env_optional(PERMITTED_IPS_ENV)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|ip| !ip.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or(defaults.permitted_ips);
        let timeout = match env_optional(HTTP_TIMEOUT_ENV) {
            Some(raw) => Duration::from_secs(raw.parse().map_err(|_| {
                BunqError::Config(format!("{HTTP_TIMEOUT_ENV} must be a number of seconds, got {raw}"))
            })?),
            None => defaults.timeout,
        };

        let config = Self {
            environment,
            base_url,
            device_description: env_or_default(DEVICE_DESCRIPTION_ENV, &defaults.device_description),
            permitted_ips,
            user_agent: env_or_default(USER_AGENT_ENV, &defaults.user_agent),
            language: env_or_default(LANGUAGE_ENV, &defaults.language),
            region: env_or_default(REGION_ENV, &defaults.region),
            geolocation: env_or_default(GEOLOCATION_ENV, &defaults.geolocation),
            timeout,
            key_id: env_or_default(KEY_ID_ENV, &defaults.key_id),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the base URL parses and is HTTPS (plain HTTP only for loopback).
    pub fn validate(&self) -> BunqResult<()> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| BunqError::Config(format!("invalid base URL {}: {e}", self.base_url)))?;
        let loopback = matches!(url.host_str(), Some("localhost") | Some("127.0.0.1"));
        if url.scheme() != "https" && !loopback {
            return Err(BunqError::Config(format!(
                "base URL must use https: {}",
                self.base_url
            )));
        }
        if self.permitted_ips.is_empty() {
            return Err(BunqError::Config("at least one permitted IP is required".to_string()));
        }
        Ok(())
    }

    /// Absolute URL for an API path such as `/installation`.
    pub fn endpoint_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl Default for BunqConfig {
    fn default() -> Self {
        Self::new(BunqEnvironment::Sandbox)
    }
}

fn default_user_agent() -> String {
    format!("bunq-session-client/{}", env!("CARGO_PKG_VERSION"))
}

/// Read a required variable (trimmed, non-empty).
pub fn env_required(name: &str) -> BunqResult<String> {
    env_optional(name).ok_or_else(|| BunqError::Config(format!("{name} is not set")))
}

pub fn env_optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn env_or_default(name: &str, default: &str) -> String {
    env_optional(name).unwrap_or_else(|| default.to_string())
}
