// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Test fixtures: shared RSA keys and an in-process bank.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use rand::rngs::OsRng;
use reqwest::{Method, StatusCode};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::{json, Value};
use sha2::Sha256;
use uuid::Uuid;

use crate::client::BankApiClient;
use crate::config::BunqConfig;
use crate::error::{BunqError, BunqResult};
use crate::keys::{InMemoryKeyStore, DEFAULT_KEY_ID, KEY_BITS};
use crate::session::{
    ApiCredential, SessionManager, DEVICE_SERVER_PATH, INSTALLATION_PATH, SESSION_SERVER_PATH,
};
use crate::transport::{
    HttpRequest, HttpResponse, HttpTransport, HEADER_CLIENT_AUTHENTICATION,
    HEADER_CLIENT_SIGNATURE, HEADER_RESPONSE_ID, HEADER_SERVER_SIGNATURE,
};

pub(crate) const BANK_BASE_URL: &str = "https://bank.test/v1";
pub(crate) const API_KEY: &str = "sandbox-api-key";
const USER_PATH: &str = "/user";

fn generate_key() -> RsaPrivateKey {
    RsaPrivateKey::new(&mut OsRng, KEY_BITS).expect("RSA key generation")
}

/// PKCS#8 PEM of the client key shared by all tests.
pub(crate) fn client_key_pem() -> &'static str {
    static PEM: OnceLock<String> = OnceLock::new();
    PEM.get_or_init(|| {
        generate_key()
            .to_pkcs8_pem(LineEnding::LF)
            .expect("encode client key")
            .to_string()
    })
}

fn server_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(generate_key)
}

pub(crate) fn server_public_key_pem() -> &'static str {
    static PEM: OnceLock<String> = OnceLock::new();
    PEM.get_or_init(|| {
        RsaPublicKey::from(server_key())
            .to_public_key_pem(LineEnding::LF)
            .expect("encode server key")
    })
}

/// Client wired to `bank` with the shared client key.
pub(crate) fn client(bank: &MockBank) -> BankApiClient {
    BankApiClient::new(
        BunqConfig::default().with_base_url(BANK_BASE_URL),
        Arc::new(bank.clone()),
        Arc::new(InMemoryKeyStore::with_key(
            DEFAULT_KEY_ID,
            client_key_pem().as_bytes(),
        )),
        ApiCredential::new(API_KEY),
    )
}

pub(crate) fn session_manager(bank: &MockBank) -> SessionManager {
    client(bank).session().clone()
}

/// One request as the bank saw it.
#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub path: String,
    pub signed: bool,
    pub authentication: Option<String>,
}

#[derive(Default)]
struct BankState {
    next_id: u64,
    /// Installation token -> (installation id, client key).
    installations: HashMap<String, (u64, RsaPublicKey)>,
    /// Session token -> installation token.
    sessions: HashMap<String, String>,
    last_installation_id: u64,
    last_device_id: u64,
    requests: Vec<RecordedCall>,
    deny_resource: usize,
    deny_session: usize,
    deny_device: usize,
    fail_transport: HashSet<String>,
    tamper: HashSet<String>,
    unsigned: HashSet<String>,
    malformed_device: bool,
}

impl BankState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn client_key(&self, authentication: Option<&str>) -> Option<&RsaPublicKey> {
        let token = authentication?;
        let installation = self
            .sessions
            .get(token)
            .map(String::as_str)
            .unwrap_or(token);
        self.installations.get(installation).map(|(_, key)| key)
    }
}

/// In-process bank speaking the installation/device/session protocol.
///
/// Verifies client signatures with the key registered at installation,
/// signs every response with the shared server key, and counts calls per
/// path. Failures are scripted through the `deny_*`, `tamper_path`,
/// `strip_signature`, `fail_transport` and `malformed_device_response`
/// controls.
#[derive(Clone, Default)]
pub(crate) struct MockBank {
    state: Arc<Mutex<BankState>>,
    delay: Option<Duration>,
}

impl MockBank {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before answering each request.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, BankState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn calls(&self, path: &str) -> usize {
        self.state()
            .requests
            .iter()
            .filter(|call| call.path == path)
            .count()
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.state().requests.len()
    }

    pub(crate) fn requests(&self) -> Vec<RecordedCall> {
        self.state().requests.clone()
    }

    pub(crate) fn installation_id(&self) -> u64 {
        self.state().last_installation_id
    }

    pub(crate) fn device_id(&self) -> u64 {
        self.state().last_device_id
    }

    /// Answer the next `n` resource calls with 401.
    pub(crate) fn deny_resource(&self, n: usize) {
        self.state().deny_resource = n;
    }

    pub(crate) fn deny_session(&self, n: usize) {
        self.state().deny_session = n;
    }

    pub(crate) fn deny_device(&self, n: usize) {
        self.state().deny_device = n;
    }

    /// Invalidate every issued session token.
    pub(crate) fn expire_sessions(&self) {
        self.state().sessions.clear();
    }

    /// Flip a byte of the next response on `path` after signing it.
    pub(crate) fn tamper_path(&self, path: &str) {
        self.state().tamper.insert(path.to_string());
    }

    /// Send the next response on `path` without a server signature.
    pub(crate) fn strip_signature(&self, path: &str) {
        self.state().unsigned.insert(path.to_string());
    }

    /// Fail the next request on `path` at the network level.
    pub(crate) fn fail_transport(&self, path: &str) {
        self.state().fail_transport.insert(path.to_string());
    }

    /// Answer device registration with two entries instead of one.
    pub(crate) fn malformed_device_response(&self) {
        self.state().malformed_device = true;
    }

    fn handle(&self, state: &mut BankState, path: &str, request: &HttpRequest) -> (StatusCode, Value) {
        let authentication = request.header(HEADER_CLIENT_AUTHENTICATION);

        if path != INSTALLATION_PATH {
            let verified = match (
                state.client_key(authentication),
                request.header(HEADER_CLIENT_SIGNATURE),
            ) {
                (Some(key), Some(signature)) => verify(key, &request.body, signature),
                _ => false,
            };
            if !verified {
                return unauthorized();
            }
        }

        match path {
            INSTALLATION_PATH if request.method == Method::POST => {
                let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
                let Some(key) = body["client_public_key"]
                    .as_str()
                    .and_then(|pem| RsaPublicKey::from_public_key_pem(pem).ok())
                else {
                    return error(StatusCode::BAD_REQUEST, "Invalid client public key.");
                };
                let id = state.next_id();
                let token_id = state.next_id();
                let token = format!("installation-{}", Uuid::new_v4());
                state.installations.insert(token.clone(), (id, key));
                state.last_installation_id = id;
                (
                    StatusCode::OK,
                    json!({"Response": [
                        {"Id": {"id": id}},
                        {"Token": {
                            "id": token_id,
                            "created": "2026-01-01 10:00:00.000000",
                            "updated": "2026-01-01 10:00:00.000000",
                            "token": token
                        }},
                        {"ServerPublicKey": {"server_public_key": server_public_key_pem()}}
                    ]}),
                )
            }
            DEVICE_SERVER_PATH if request.method == Method::POST => {
                if state.deny_device > 0 {
                    state.deny_device -= 1;
                    return unauthorized();
                }
                let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
                if body["secret"].as_str() != Some(API_KEY) {
                    return error(StatusCode::BAD_REQUEST, "Invalid API key.");
                }
                let id = state.next_id();
                state.last_device_id = id;
                if state.malformed_device {
                    return (
                        StatusCode::OK,
                        json!({"Response": [{"Id": {"id": id}}, {"Id": {"id": id}}]}),
                    );
                }
                (StatusCode::OK, json!({"Response": [{"Id": {"id": id}}]}))
            }
            SESSION_SERVER_PATH if request.method == Method::POST => {
                if state.deny_session > 0 {
                    state.deny_session -= 1;
                    return unauthorized();
                }
                let Some(installation) = authentication
                    .filter(|token| state.installations.contains_key(*token))
                    .map(str::to_string)
                else {
                    return unauthorized();
                };
                state.sessions.retain(|_, owner| *owner != installation);
                let id = state.next_id();
                let token = format!("session-{}", Uuid::new_v4());
                state.sessions.insert(token.clone(), installation);
                (
                    StatusCode::OK,
                    json!({"Response": [
                        {"Id": {"id": id}},
                        {"Token": {"id": id, "created": "2026-01-01 10:00:01.000000", "updated": null, "token": token}},
                        {"UserPerson": {"id": 42, "display_name": "Test User"}}
                    ]}),
                )
            }
            USER_PATH if request.method == Method::GET => {
                if state.deny_resource > 0 {
                    state.deny_resource -= 1;
                    return unauthorized();
                }
                if !authentication.is_some_and(|token| state.sessions.contains_key(token)) {
                    return unauthorized();
                }
                (
                    StatusCode::OK,
                    json!({"Response": [{"UserPerson": {"id": 42, "display_name": "Test User"}}]}),
                )
            }
            _ => error(StatusCode::NOT_FOUND, "Route not found."),
        }
    }
}

fn verify(key: &RsaPublicKey, body: &[u8], signature: &str) -> bool {
    let Ok(raw) = Base64::decode_vec(signature) else {
        return false;
    };
    let Ok(signature) = Signature::try_from(raw.as_slice()) else {
        return false;
    };
    VerifyingKey::<Sha256>::new(key.clone())
        .verify(body, &signature)
        .is_ok()
}

fn error(status: StatusCode, description: &str) -> (StatusCode, Value) {
    (
        status,
        json!({"Error": [{
            "error_description": description,
            "error_description_translated": description
        }]}),
    )
}

fn unauthorized() -> (StatusCode, Value) {
    error(StatusCode::UNAUTHORIZED, "Insufficient authorisation.")
}

#[async_trait]
impl HttpTransport for MockBank {
    async fn send(&self, request: HttpRequest) -> BunqResult<HttpResponse> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let path = request
            .url
            .strip_prefix(BANK_BASE_URL)
            .unwrap_or(&request.url)
            .to_string();

        let (status, body, tamper, unsigned) = {
            let mut state = self.state();
            state.requests.push(RecordedCall {
                path: path.clone(),
                signed: request.header(HEADER_CLIENT_SIGNATURE).is_some(),
                authentication: request
                    .header(HEADER_CLIENT_AUTHENTICATION)
                    .map(str::to_string),
            });
            if state.fail_transport.remove(&path) {
                return Err(BunqError::transport(&request.url, "connection reset by peer"));
            }
            let (status, body) = self.handle(&mut state, &path, &request);
            (
                status,
                body,
                state.tamper.remove(&path),
                state.unsigned.remove(&path),
            )
        };

        let mut body = body.to_string().into_bytes();
        let signature = SigningKey::<Sha256>::new(server_key().clone()).sign(&body);
        if tamper {
            let last = body.len() - 2;
            body[last] ^= 0x01;
        }

        let mut headers = vec![(HEADER_RESPONSE_ID.to_string(), Uuid::new_v4().to_string())];
        if !unsigned {
            headers.push((
                HEADER_SERVER_SIGNATURE.to_string(),
                Base64::encode_string(&signature.to_bytes()),
            ));
        }

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
