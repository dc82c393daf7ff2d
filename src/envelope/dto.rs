// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Payloads exchanged with the bootstrap endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::codec::{encode_payload, EnvelopeEntry, EnvelopeError, RawEntry};
use crate::tagged_entry;

/// `{"Id": {"id": ...}}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BunqId {
    pub id: u64,
}
tagged_entry!(BunqId, "Id");

/// `{"Token": {...}}` returned by installation and session creation.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BunqToken {
    pub id: u64,
    pub created: Option<String>,
    pub updated: Option<String>,
    pub token: String,
}
tagged_entry!(BunqToken, "Token");

impl std::fmt::Debug for BunqToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BunqToken")
            .field("id", &self.id)
            .field("created", &self.created)
            .field("updated", &self.updated)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// `{"ServerPublicKey": {"server_public_key": "<PEM>"}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BunqServerPublicKey {
    pub server_public_key: String,
}
tagged_entry!(BunqServerPublicKey, "ServerPublicKey");

/// Kind of user a session was opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserKind {
    Person,
    Company,
    ApiKey,
    PaymentServiceProvider,
}

impl UserKind {
    pub fn tag(&self) -> &'static str {
        match self {
            UserKind::Person => "UserPerson",
            UserKind::Company => "UserCompany",
            UserKind::ApiKey => "UserApiKey",
            UserKind::PaymentServiceProvider => "UserPaymentServiceProvider",
        }
    }

    pub fn from_tag(tag: &str) -> Option<UserKind> {
        match tag {
            "UserPerson" => Some(UserKind::Person),
            "UserCompany" => Some(UserKind::Company),
            "UserApiKey" => Some(UserKind::ApiKey),
            "UserPaymentServiceProvider" => Some(UserKind::PaymentServiceProvider),
            _ => None,
        }
    }
}

/// Third entry of the session-server response: the user the session belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionUser {
    pub kind: UserKind,
    pub id: Option<u64>,
    pub display_name: Option<String>,
    /// Full payload, for callers that need fields beyond id and name.
    pub raw: Value,
}

impl EnvelopeEntry for SessionUser {
    fn decode_entry(entry: RawEntry) -> Result<Self, EnvelopeError> {
        let kind = UserKind::from_tag(&entry.tag).ok_or_else(|| EnvelopeError::UnexpectedTag {
            index: entry.index,
            expected: "UserPerson|UserCompany|UserApiKey|UserPaymentServiceProvider".to_string(),
            actual: entry.tag.clone(),
        })?;
        if !entry.value.is_object() {
            return Err(EnvelopeError::Payload {
                index: entry.index,
                tag: entry.tag,
                message: "user payload must be an object".to_string(),
            });
        }
        let id = entry.value.get("id").and_then(Value::as_u64);
        let display_name = entry
            .value
            .get("display_name")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(SessionUser {
            kind,
            id,
            display_name,
            raw: entry.value,
        })
    }

    fn encode_entry(&self) -> Result<(String, Value), EnvelopeError> {
        encode_payload(self.kind.tag(), &self.raw)
    }
}

/// Body of `POST /installation`.
#[derive(Debug, Clone, Serialize)]
pub struct InstallationRequest<'a> {
    pub client_public_key: &'a str,
}

/// Body of `POST /device-server`.
#[derive(Serialize)]
pub struct DeviceServerRequest<'a> {
    pub description: &'a str,
    pub secret: &'a str,
    pub permitted_ips: &'a [String],
}

/// Body of `POST /session-server`.
#[derive(Serialize)]
pub struct SessionServerRequest<'a> {
    pub secret: &'a str,
}
