// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Credentials produced by the bootstrap and the states they put the
//! client in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{SessionUser, UserKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstallationId(pub u64);

/// Result of `POST /installation`.
#[derive(Clone)]
pub struct Installation {
    pub id: InstallationId,
    token: String,
    /// Fingerprint of the client key this installation was made with.
    pub key_fingerprint: String,
}

impl Installation {
    pub(crate) fn new(id: InstallationId, token: String, key_fingerprint: String) -> Self {
        Self {
            id,
            token,
            key_fingerprint,
        }
    }

    pub(crate) fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for Installation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installation")
            .field("id", &self.id)
            .field("token", &"<redacted>")
            .field("key_fingerprint", &self.key_fingerprint)
            .finish()
    }
}

/// Result of `POST /device-server`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceToken {
    pub device_id: u64,
    pub installation_id: InstallationId,
}

/// A live session, bound to the installation and key it was created under.
#[derive(Clone)]
pub struct SessionToken {
    pub id: u64,
    token: String,
    pub created: Option<String>,
    pub obtained_at: DateTime<Utc>,
    pub installation_id: InstallationId,
    pub key_fingerprint: String,
    pub user: Option<SessionUser>,
}

impl SessionToken {
    pub(crate) fn new(
        id: u64,
        token: String,
        created: Option<String>,
        installation: &Installation,
        user: Option<SessionUser>,
    ) -> Self {
        Self {
            id,
            token,
            created,
            obtained_at: Utc::now(),
            installation_id: installation.id,
            key_fingerprint: installation.key_fingerprint.clone(),
            user,
        }
    }

    pub(crate) fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionToken")
            .field("id", &self.id)
            .field("token", &"<redacted>")
            .field("obtained_at", &self.obtained_at)
            .field("installation_id", &self.installation_id)
            .field("user", &self.user.as_ref().map(|u| (u.kind, u.id)))
            .finish()
    }
}

/// Why the bootstrap cannot continue from where it stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// The bank refused the device registration; register it again.
    DeviceTokenRevoked,
    /// The bank refused the installation token; install again.
    InstallationRevoked,
}

/// Observable session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninstalled,
    Installed,
    DeviceRegistered,
    SessionActive,
    SessionExpired,
    Failed(FailureReason),
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Uninstalled => f.write_str("uninstalled"),
            SessionState::Installed => f.write_str("installed"),
            SessionState::DeviceRegistered => f.write_str("device_registered"),
            SessionState::SessionActive => f.write_str("session_active"),
            SessionState::SessionExpired => f.write_str("session_expired"),
            SessionState::Failed(FailureReason::DeviceTokenRevoked) => {
                f.write_str("failed(device_token_revoked)")
            }
            SessionState::Failed(FailureReason::InstallationRevoked) => {
                f.write_str("failed(installation_revoked)")
            }
        }
    }
}

/// The API key the device is registered with.
#[derive(Clone)]
pub struct ApiCredential(String);

impl ApiCredential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub(crate) fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiCredential(<redacted>)")
    }
}

/// Persisted session, as stored inside a [`SessionContext`].
#[derive(Clone, Serialize, Deserialize)]
pub struct SavedSession {
    pub id: u64,
    pub token: String,
    pub created: Option<String>,
    pub obtained_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_kind: Option<UserKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
}

/// Everything needed to resume without repeating the bootstrap.
///
/// The client private key is not part of the context; it stays in the
/// key store and is matched by `key_fingerprint` on restore.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub installation_id: u64,
    pub installation_token: String,
    pub key_fingerprint: String,
    pub server_public_key: String,
    #[serde(default)]
    pub device_id: Option<u64>,
    #[serde(default)]
    pub session: Option<SavedSession>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("installation_id", &self.installation_id)
            .field("installation_token", &"<redacted>")
            .field("key_fingerprint", &self.key_fingerprint)
            .field("device_id", &self.device_id)
            .field("session_id", &self.session.as_ref().map(|s| s.id))
            .finish()
    }
}

impl SavedSession {
    pub(crate) fn from_token(session: &SessionToken) -> Self {
        Self {
            id: session.id,
            token: session.token.clone(),
            created: session.created.clone(),
            obtained_at: session.obtained_at,
            user_kind: session.user.as_ref().map(|u| u.kind),
            user: session.user.as_ref().map(|u| u.raw.clone()),
        }
    }

    pub(crate) fn into_token(self, installation: &Installation) -> SessionToken {
        let user = match (self.user_kind, self.user) {
            (Some(kind), Some(raw)) => Some(SessionUser {
                kind,
                id: raw.get("id").and_then(Value::as_u64),
                display_name: raw
                    .get("display_name")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                raw,
            }),
            _ => None,
        };
        SessionToken {
            id: self.id,
            token: self.token,
            created: self.created,
            obtained_at: self.obtained_at,
            installation_id: installation.id,
            key_fingerprint: installation.key_fingerprint.clone(),
            user,
        }
    }
}
