// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authorized calls against bank resources.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::BunqConfig;
use crate::envelope::{Envelope, EnvelopeShape};
use crate::error::{BunqError, BunqResult};
use crate::exchange::{ApiRequest, ApiResponse, Exchange, Protection};
use crate::keys::{KeyManager, KeyStore};
use crate::session::{ApiCredential, SessionManager, SessionToken};
use crate::signing::RequestSigner;
use crate::transport::HttpTransport;

/// Executes signed resource calls, bootstrapping and refreshing the session
/// as needed.
#[derive(Debug, Clone)]
pub struct BankApiClient {
    session: SessionManager,
}

impl BankApiClient {
    pub fn new(
        config: BunqConfig,
        transport: Arc<dyn HttpTransport>,
        key_store: Arc<dyn KeyStore>,
        credential: ApiCredential,
    ) -> Self {
        let keys = Arc::new(KeyManager::new(key_store, config.key_id.clone()));
        let exchange = Exchange::new(config, transport, RequestSigner::new(keys));
        Self {
            session: SessionManager::new(exchange, credential),
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Send `request` under the active session.
    ///
    /// An authentication-denied answer is taken as session expiry: the
    /// session is refreshed and the request retried once. A second denial is
    /// returned to the caller.
    pub async fn execute(&self, request: ApiRequest) -> BunqResult<ApiResponse> {
        let session = self.session.ensure_session().await?;
        match self.send_authorized(&request, &session).await {
            Err(e) if e.is_authentication_denied() => {
                warn!(endpoint = %request.path, "Request denied; refreshing session once");
                self.session.mark_expired(&session);
            }
            other => return other,
        }

        let refreshed = self.session.ensure_session().await?;
        let result = self.send_authorized(&request, &refreshed).await;
        if let Err(e) = &result {
            if e.is_authentication_denied() {
                warn!(endpoint = %request.path, "Request denied after session refresh");
                self.session.mark_expired(&refreshed);
            }
        }
        result
    }

    /// [`execute`](Self::execute) and decode the body as shape `S`.
    pub async fn execute_decoded<S: EnvelopeShape>(
        &self,
        request: ApiRequest,
    ) -> BunqResult<Envelope<S>> {
        let path = request.path.clone();
        self.execute(request).await?.decode(&path)
    }

    async fn send_authorized(
        &self,
        request: &ApiRequest,
        session: &SessionToken,
    ) -> BunqResult<ApiResponse> {
        let exchange = self.session.exchange();
        match exchange.keys().current_key_pair() {
            Some(key_pair) if key_pair.fingerprint() == session.key_fingerprint => {}
            Some(_) => {
                return Err(BunqError::Internal(
                    "active session was created under a different client key".to_string(),
                ))
            }
            None => return Err(BunqError::NoKeyPair),
        }

        debug!(method = %request.method, endpoint = %request.path, session_id = session.id, "Executing authorized request");
        exchange
            .send(request, Some(session.token()), Protection::Signed)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{BunqId, Many, Untagged};
    use crate::session::{
        FailureReason, SessionState, DEVICE_SERVER_PATH, INSTALLATION_PATH, SESSION_SERVER_PATH,
    };
    use crate::testing::{self, MockBank};
    use serde_json::Value;
    use std::time::Duration;

    const USER_PATH: &str = "/user";

    #[tokio::test]
    async fn first_call_bootstraps_then_reuses_session() {
        let bank = MockBank::new();
        let client = testing::client(&bank);

        let response = client.execute(ApiRequest::get(USER_PATH)).await.unwrap();
        assert!(response.response_id.is_some());
        client.execute(ApiRequest::get(USER_PATH)).await.unwrap();

        assert_eq!(bank.calls(INSTALLATION_PATH), 1);
        assert_eq!(bank.calls(DEVICE_SERVER_PATH), 1);
        assert_eq!(bank.calls(SESSION_SERVER_PATH), 1);
        assert_eq!(bank.calls(USER_PATH), 2);
    }

    #[tokio::test]
    async fn denied_request_refreshes_once_and_retries() {
        let bank = MockBank::new();
        let client = testing::client(&bank);
        client.execute(ApiRequest::get(USER_PATH)).await.unwrap();

        bank.deny_resource(1);
        client.execute(ApiRequest::get(USER_PATH)).await.unwrap();

        assert_eq!(bank.calls(SESSION_SERVER_PATH), 2);
        assert_eq!(bank.calls(USER_PATH), 3);
        assert_eq!(bank.calls(INSTALLATION_PATH), 1);
        assert_eq!(client.session().state(), SessionState::SessionActive);
    }

    #[tokio::test]
    async fn expired_session_on_bank_side_is_refreshed() {
        let bank = MockBank::new();
        let client = testing::client(&bank);
        client.execute(ApiRequest::get(USER_PATH)).await.unwrap();

        bank.expire_sessions();
        client.execute(ApiRequest::get(USER_PATH)).await.unwrap();
        assert_eq!(bank.calls(SESSION_SERVER_PATH), 2);
    }

    #[tokio::test]
    async fn second_denial_surfaces_without_another_retry() {
        let bank = MockBank::new();
        let client = testing::client(&bank);
        client.execute(ApiRequest::get(USER_PATH)).await.unwrap();

        bank.deny_resource(2);
        let err = client.execute(ApiRequest::get(USER_PATH)).await.unwrap_err();
        assert!(matches!(err, BunqError::AuthenticationDenied { ref endpoint, .. } if endpoint == USER_PATH));

        assert_eq!(bank.calls(SESSION_SERVER_PATH), 2);
        assert_eq!(bank.calls(USER_PATH), 3);
        assert_eq!(client.session().state(), SessionState::SessionExpired);
    }

    #[tokio::test]
    async fn refresh_denied_surfaces_device_revocation() {
        let bank = MockBank::new();
        let client = testing::client(&bank);
        client.execute(ApiRequest::get(USER_PATH)).await.unwrap();

        bank.deny_resource(1);
        bank.deny_session(1);
        let err = client.execute(ApiRequest::get(USER_PATH)).await.unwrap_err();
        assert!(matches!(err, BunqError::DeviceTokenRevoked));
        assert_eq!(
            client.session().state(),
            SessionState::Failed(FailureReason::DeviceTokenRevoked)
        );
        assert_eq!(bank.calls(USER_PATH), 2);

        client.execute(ApiRequest::get(USER_PATH)).await.unwrap();
        assert_eq!(bank.calls(INSTALLATION_PATH), 1);
        assert_eq!(bank.calls(DEVICE_SERVER_PATH), 2);
    }

    #[tokio::test]
    async fn tampered_response_is_not_retried() {
        let bank = MockBank::new();
        let client = testing::client(&bank);
        client.execute(ApiRequest::get(USER_PATH)).await.unwrap();

        bank.tamper_path(USER_PATH);
        let err = client.execute(ApiRequest::get(USER_PATH)).await.unwrap_err();
        assert!(matches!(err, BunqError::SignatureInvalid { .. }));
        assert_eq!(bank.calls(USER_PATH), 2);
        assert_eq!(bank.calls(SESSION_SERVER_PATH), 1);
    }

    #[tokio::test]
    async fn unsigned_success_is_rejected_without_retry() {
        let bank = MockBank::new();
        let client = testing::client(&bank);
        client.execute(ApiRequest::get(USER_PATH)).await.unwrap();

        bank.strip_signature(USER_PATH);
        let err = client.execute(ApiRequest::get(USER_PATH)).await.unwrap_err();
        assert!(matches!(err, BunqError::SignatureInvalid { ref endpoint } if endpoint == USER_PATH));
        assert_eq!(bank.calls(USER_PATH), 2);
        assert_eq!(bank.calls(SESSION_SERVER_PATH), 1);
        assert_eq!(client.session().state(), SessionState::SessionActive);
    }

    #[tokio::test]
    async fn unsigned_denial_still_refreshes_once() {
        let bank = MockBank::new();
        let client = testing::client(&bank);
        client.execute(ApiRequest::get(USER_PATH)).await.unwrap();

        bank.deny_resource(1);
        bank.strip_signature(USER_PATH);
        client.execute(ApiRequest::get(USER_PATH)).await.unwrap();

        assert_eq!(bank.calls(SESSION_SERVER_PATH), 2);
        assert_eq!(bank.calls(USER_PATH), 3);
        assert_eq!(client.session().state(), SessionState::SessionActive);
    }

    #[tokio::test]
    async fn api_errors_pass_through_unchanged() {
        let bank = MockBank::new();
        let client = testing::client(&bank);

        let err = client
            .execute(ApiRequest::get("/user/1/missing"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BunqError::Api { status, ref description, .. }
                if status == reqwest::StatusCode::NOT_FOUND && description == "Route not found."
        ));
        assert_eq!(bank.calls(SESSION_SERVER_PATH), 1);
    }

    #[tokio::test]
    async fn execute_decoded_reads_resource_envelope() {
        let bank = MockBank::new();
        let client = testing::client(&bank);

        let envelope = client
            .execute_decoded::<Many<Untagged<Value>>>(ApiRequest::get(USER_PATH))
            .await
            .unwrap();
        let Many(users) = envelope.body;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].tag, "UserPerson");
        assert!(envelope.response_id.is_some());

        let err = client
            .execute_decoded::<Many<BunqId>>(ApiRequest::get(USER_PATH))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "envelope_shape_error");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_calls_bootstrap_once() {
        let bank = MockBank::new().with_delay(Duration::from_millis(10));
        let client = testing::client(&bank);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.execute(ApiRequest::get(USER_PATH)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(bank.calls(INSTALLATION_PATH), 1);
        assert_eq!(bank.calls(DEVICE_SERVER_PATH), 1);
        assert_eq!(bank.calls(SESSION_SERVER_PATH), 1);
        assert_eq!(bank.calls(USER_PATH), 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_denials_refresh_once() {
        let bank = MockBank::new().with_delay(Duration::from_millis(5));
        let client = testing::client(&bank);
        client.execute(ApiRequest::get(USER_PATH)).await.unwrap();

        bank.expire_sessions();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.execute(ApiRequest::get(USER_PATH)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(bank.calls(SESSION_SERVER_PATH), 2);
    }
}
