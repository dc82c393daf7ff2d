// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! One signed request/response round trip with the bank.
//!
//! Shared by the bootstrap steps and by authorized resource calls:
//! attaches the standard headers, signs the body, verifies the server
//! signature, and classifies the status before anything is decoded.

use std::sync::Arc;

use reqwest::{Method, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::BunqConfig;
use crate::envelope::{error_description, Envelope, EnvelopeShape};
use crate::error::{BunqError, BunqResult};
use crate::keys::KeyManager;
use crate::signing::{RequestSigner, Signature};
use crate::transport::{
    HttpRequest, HttpResponse, HttpTransport, HEADER_CLIENT_AUTHENTICATION,
    HEADER_CLIENT_SIGNATURE, HEADER_GEOLOCATION, HEADER_LANGUAGE, HEADER_REGION,
    HEADER_REQUEST_ID, HEADER_RESPONSE_ID, HEADER_SERVER_SIGNATURE,
};

/// A logical API call issued by the application.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base URL, e.g. `/user/42/monetary-account`.
    pub path: String,
    pub body: Vec<u8>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method,
            path: path.into(),
            body,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path, Vec::new())
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path, Vec::new())
    }

    pub fn post_json<T: Serialize + ?Sized>(path: impl Into<String>, body: &T) -> BunqResult<Self> {
        Ok(Self::new(Method::POST, path, to_json(body)?))
    }

    pub fn put_json<T: Serialize + ?Sized>(path: impl Into<String>, body: &T) -> BunqResult<Self> {
        Ok(Self::new(Method::PUT, path, to_json(body)?))
    }
}

pub(crate) fn to_json<T: Serialize + ?Sized>(body: &T) -> BunqResult<Vec<u8>> {
    serde_json::to_vec(body).map_err(|e| BunqError::Internal(format!("serialize body failed: {e}")))
}

/// A successful, verified response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    /// Value of the bank's response id header.
    pub response_id: Option<String>,
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Decode the body as a `{"Response": [...]}` envelope of shape `S`.
    pub fn decode<S: EnvelopeShape>(&self, endpoint: &str) -> BunqResult<Envelope<S>> {
        Envelope::from_slice(&self.body, self.response_id.clone())
            .map_err(|e| BunqError::envelope(endpoint, e))
    }
}

/// How a call is authenticated and protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Protection {
    /// No signature, no verification (installation only).
    Unsigned,
    /// Signed request, verified response.
    Signed,
}

#[derive(Clone)]
pub(crate) struct Exchange {
    config: BunqConfig,
    transport: Arc<dyn HttpTransport>,
    signer: RequestSigner,
}

impl Exchange {
    pub(crate) fn new(
        config: BunqConfig,
        transport: Arc<dyn HttpTransport>,
        signer: RequestSigner,
    ) -> Self {
        Self {
            config,
            transport,
            signer,
        }
    }

    pub(crate) fn config(&self) -> &BunqConfig {
        &self.config
    }

    pub(crate) fn keys(&self) -> &Arc<KeyManager> {
        self.signer.keys()
    }

    pub(crate) async fn send(
        &self,
        request: &ApiRequest,
        authentication: Option<&str>,
        protection: Protection,
    ) -> BunqResult<ApiResponse> {
        let endpoint = request.path.as_str();
        let request_id = Uuid::new_v4().to_string();

        let mut headers = vec![
            ("Cache-Control".to_string(), "no-cache".to_string()),
            ("User-Agent".to_string(), self.config.user_agent.clone()),
            ("Content-Type".to_string(), "application/json".to_string()),
            (HEADER_LANGUAGE.to_string(), self.config.language.clone()),
            (HEADER_REGION.to_string(), self.config.region.clone()),
            (HEADER_GEOLOCATION.to_string(), self.config.geolocation.clone()),
            (HEADER_REQUEST_ID.to_string(), request_id.clone()),
        ];
        if let Some(token) = authentication {
            headers.push((HEADER_CLIENT_AUTHENTICATION.to_string(), token.to_string()));
        }
        if protection == Protection::Signed {
            let signature = self.signer.sign(&request.body)?;
            headers.push((HEADER_CLIENT_SIGNATURE.to_string(), signature.to_string()));
        }

        debug!(
            method = %request.method,
            endpoint = %endpoint,
            request_id = %request_id,
            signed = protection == Protection::Signed,
            "Sending bank request"
        );

        let response = self
            .transport
            .send(HttpRequest {
                method: request.method.clone(),
                url: self.config.endpoint_url(endpoint),
                headers,
                body: request.body.clone(),
            })
            .await
            .map_err(|e| match e {
                // Transports only know the URL; report the API path like every other error.
                BunqError::Transport { message, .. } => BunqError::transport(endpoint, message),
                other => other,
            })?;

        if protection == Protection::Signed {
            self.verify(endpoint, &response)?;
        }

        let response_id = response.header(HEADER_RESPONSE_ID).map(str::to_string);
        debug!(
            endpoint = %endpoint,
            request_id = %request_id,
            response_id = ?response_id,
            status = %response.status,
            "Received bank response"
        );

        classify(endpoint, response, response_id)
    }

    /// Successful responses must carry a valid signature. Error responses
    /// are checked when signed; an unsigned error is still classified by
    /// status so that an auth denial can trigger a refresh.
    fn verify(&self, endpoint: &str, response: &HttpResponse) -> BunqResult<()> {
        match response.header(HEADER_SERVER_SIGNATURE) {
            Some(value) => {
                self.signer
                    .verify(endpoint, &response.body, &Signature::from_base64(value))
            }
            None if response.status.is_success() => {
                warn!(endpoint = %endpoint, "Successful response carries no server signature");
                Err(BunqError::SignatureInvalid {
                    endpoint: endpoint.to_string(),
                })
            }
            None => Ok(()),
        }
    }
}

fn classify(
    endpoint: &str,
    response: HttpResponse,
    response_id: Option<String>,
) -> BunqResult<ApiResponse> {
    let status = response.status;
    if status.is_success() {
        return Ok(ApiResponse {
            status,
            response_id,
            body: response.body,
        });
    }

    let description = error_description(&response.body)
        .unwrap_or_else(|| String::from_utf8_lossy(&response.body).trim().to_string());

    if status == StatusCode::UNAUTHORIZED {
        warn!(endpoint = %endpoint, response_id = ?response_id, "Bank denied authentication");
        return Err(BunqError::AuthenticationDenied {
            endpoint: endpoint.to_string(),
            description,
        });
    }

    Err(BunqError::Api {
        endpoint: endpoint.to_string(),
        status,
        description,
    })
}
