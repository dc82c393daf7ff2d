// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Error taxonomy for the bunq session client.
//!
//! Bootstrap failures wrap their cause so callers can tell an installation
//! that failed on the network from one that failed on a malformed envelope.
//! `BunqError` is `Clone` because a single bootstrap outcome is delivered to
//! every caller waiting on it.

use reqwest::StatusCode;

use crate::envelope::EnvelopeError;
use crate::session::FailureReason;
use crate::storage::StorageError;

/// Result alias used across the crate.
pub type BunqResult<T> = Result<T, BunqError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BunqError {
    #[error("transport failure on {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    #[error("installation failed: {0}")]
    Installation(#[source] Box<BunqError>),

    #[error("device registration failed: {0}")]
    DeviceRegistration(#[source] Box<BunqError>),

    #[error("session creation failed: {0}")]
    SessionCreation(#[source] Box<BunqError>),

    #[error("server signature on {endpoint} is invalid")]
    SignatureInvalid { endpoint: String },

    #[error("server public key is unknown; installation has not completed")]
    NoServerKey,

    #[error("client key pair has not been generated")]
    NoKeyPair,

    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("malformed response envelope from {endpoint}: {source}")]
    Envelope {
        endpoint: String,
        #[source]
        source: EnvelopeError,
    },

    #[error("device token was revoked by the bank; device registration must be repeated")]
    DeviceTokenRevoked,

    #[error("installation was revoked by the bank; installation must be repeated")]
    InstallationRevoked,

    #[error("authentication denied on {endpoint}: {description}")]
    AuthenticationDenied {
        endpoint: String,
        description: String,
    },

    #[error("{endpoint} returned {status}: {description}")]
    Api {
        endpoint: String,
        status: StatusCode,
        description: String,
    },

    #[error("key store failure: {0}")]
    KeyStore(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BunqError {
    pub(crate) fn transport(endpoint: &str, message: impl std::fmt::Display) -> Self {
        BunqError::Transport {
            endpoint: endpoint.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn envelope(endpoint: &str, source: EnvelopeError) -> Self {
        BunqError::Envelope {
            endpoint: endpoint.to_string(),
            source,
        }
    }

    /// Stable machine-readable code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            BunqError::Transport { .. } => "transport_error",
            BunqError::Installation(_) => "installation_error",
            BunqError::DeviceRegistration(_) => "device_registration_error",
            BunqError::SessionCreation(_) => "session_creation_error",
            BunqError::SignatureInvalid { .. } => "signature_invalid",
            BunqError::NoServerKey => "no_server_key",
            BunqError::NoKeyPair => "no_key_pair",
            BunqError::InvalidKeyFormat(_) => "invalid_key_format",
            BunqError::Envelope { .. } => "envelope_shape_error",
            BunqError::DeviceTokenRevoked => "device_token_revoked",
            BunqError::InstallationRevoked => "installation_revoked",
            BunqError::AuthenticationDenied { .. } => "authentication_denied",
            BunqError::Api { .. } => "api_error",
            BunqError::KeyStore(_) => "key_store_error",
            BunqError::Storage(_) => "storage_error",
            BunqError::Config(_) => "config_error",
            BunqError::Internal(_) => "internal_error",
        }
    }

    /// Unwrap bootstrap wrappers down to the error that caused them.
    pub fn root_cause(&self) -> &BunqError {
        match self {
            BunqError::Installation(inner)
            | BunqError::DeviceRegistration(inner)
            | BunqError::SessionCreation(inner) => inner.root_cause(),
            other => other,
        }
    }

    /// Whether the calling layer may retry this error with backoff.
    ///
    /// Only network-level failures qualify. Integrity, shape and bootstrap
    /// failures are fatal to the call that produced them.
    pub fn is_retryable(&self) -> bool {
        matches!(self.root_cause(), BunqError::Transport { .. })
    }

    /// Whether the bank answered with an authentication-denied response.
    pub fn is_authentication_denied(&self) -> bool {
        matches!(self.root_cause(), BunqError::AuthenticationDenied { .. })
    }
}

impl From<FailureReason> for BunqError {
    fn from(reason: FailureReason) -> Self {
        match reason {
            FailureReason::DeviceTokenRevoked => BunqError::DeviceTokenRevoked,
            FailureReason::InstallationRevoked => BunqError::InstallationRevoked,
        }
    }
}

impl From<StorageError> for BunqError {
    fn from(e: StorageError) -> Self {
        BunqError::Storage(e.to_string())
    }
}
