// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session bootstrap state machine.
//!
//! `Uninstalled -> Installed -> DeviceRegistered -> SessionActive`, with
//! `SessionExpired` re-entering session creation and `Failed(reason)` when
//! the bank revokes a credential. One bootstrap runs at a time: it executes
//! on its own task and every caller that arrives meanwhile awaits the same
//! shared outcome, so dropping one caller never cancels it.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Method;
use tracing::{info, warn};

use super::state::{
    ApiCredential, DeviceToken, FailureReason, Installation, InstallationId, SavedSession,
    SessionContext, SessionState, SessionToken,
};
use crate::envelope::{
    BunqId, BunqServerPublicKey, BunqToken, ObjectWrapper, SessionUser, Triple,
};
use crate::envelope::dto::{DeviceServerRequest, InstallationRequest, SessionServerRequest};
use crate::error::{BunqError, BunqResult};
use crate::exchange::{to_json, ApiRequest, Exchange, Protection};
use crate::keys::KeyManager;

pub const INSTALLATION_PATH: &str = "/installation";
pub const DEVICE_SERVER_PATH: &str = "/device-server";
pub const SESSION_SERVER_PATH: &str = "/session-server";

type Bootstrap = Shared<BoxFuture<'static, BunqResult<Arc<SessionToken>>>>;

#[derive(Clone)]
enum Phase {
    Uninstalled,
    Installed(Arc<Installation>),
    DeviceRegistered {
        installation: Arc<Installation>,
        device: DeviceToken,
    },
    Active {
        installation: Arc<Installation>,
        device: DeviceToken,
        session: Arc<SessionToken>,
    },
    Expired {
        installation: Arc<Installation>,
        device: DeviceToken,
    },
    Failed {
        reason: FailureReason,
        installation: Option<Arc<Installation>>,
    },
}

impl Phase {
    fn state(&self) -> SessionState {
        match self {
            Phase::Uninstalled => SessionState::Uninstalled,
            Phase::Installed(_) => SessionState::Installed,
            Phase::DeviceRegistered { .. } => SessionState::DeviceRegistered,
            Phase::Active { .. } => SessionState::SessionActive,
            Phase::Expired { .. } => SessionState::SessionExpired,
            Phase::Failed { reason, .. } => SessionState::Failed(*reason),
        }
    }

    fn session(&self) -> Option<Arc<SessionToken>> {
        match self {
            Phase::Active { session, .. } => Some(Arc::clone(session)),
            _ => None,
        }
    }

    fn installation(&self) -> Option<&Arc<Installation>> {
        match self {
            Phase::Uninstalled => None,
            Phase::Installed(installation)
            | Phase::DeviceRegistered { installation, .. }
            | Phase::Active { installation, .. }
            | Phase::Expired { installation, .. } => Some(installation),
            Phase::Failed { installation, .. } => installation.as_ref(),
        }
    }
}

struct Machine {
    phase: Phase,
    in_flight: Option<Bootstrap>,
    /// Bumped whenever the phase is replaced from outside the bootstrap
    /// (reset, restore); a running bootstrap discards results from an
    /// older generation.
    generation: u64,
}

struct Inner {
    exchange: Exchange,
    credential: ApiCredential,
    machine: Mutex<Machine>,
}

/// What a bootstrap step produced.
enum Step {
    Advance(Phase),
    Fail {
        reason: FailureReason,
        installation: Option<Arc<Installation>>,
    },
    Stop(BunqError),
}

/// Owns the session lifecycle for one installation.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub(crate) fn new(exchange: Exchange, credential: ApiCredential) -> Self {
        Self {
            inner: Arc::new(Inner {
                exchange,
                credential,
                machine: Mutex::new(Machine {
                    phase: Phase::Uninstalled,
                    in_flight: None,
                    generation: 0,
                }),
            }),
        }
    }

    pub(crate) fn exchange(&self) -> &Exchange {
        &self.inner.exchange
    }

    pub fn keys(&self) -> &Arc<KeyManager> {
        self.inner.exchange.keys()
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().phase.state()
    }

    /// Return the active session, running whatever transitions are needed.
    pub async fn ensure_session(&self) -> BunqResult<Arc<SessionToken>> {
        let bootstrap = {
            let mut machine = self.inner.lock();
            if let Phase::Active { session, .. } = &machine.phase {
                return Ok(Arc::clone(session));
            }
            match &machine.in_flight {
                Some(bootstrap) => bootstrap.clone(),
                None => {
                    let bootstrap = self.start_bootstrap();
                    machine.in_flight = Some(bootstrap.clone());
                    bootstrap
                }
            }
        };
        bootstrap.await
    }

    fn start_bootstrap(&self) -> Bootstrap {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move { inner.run_transitions().await });

        let inner = Arc::clone(&self.inner);
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    inner.lock().in_flight = None;
                    Err(BunqError::Internal(format!("session bootstrap task failed: {e}")))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Record that the bank rejected `session`.
    ///
    /// No-op unless `session` is still the active one, so concurrent callers
    /// rejected with the same token trigger a single refresh.
    pub fn mark_expired(&self, session: &Arc<SessionToken>) {
        let mut machine = self.inner.lock();
        let next = match &machine.phase {
            Phase::Active {
                installation,
                device,
                session: current,
            } if Arc::ptr_eq(current, session) => Phase::Expired {
                installation: Arc::clone(installation),
                device: *device,
            },
            _ => return,
        };
        warn!(
            session_id = session.id,
            installation_id = session.installation_id.0,
            "Session rejected by bank; marked expired"
        );
        machine.phase = next;
    }

    /// Drop the active session. Returns whether there was one.
    pub fn logout(&self) -> bool {
        let mut machine = self.inner.lock();
        let next = match &machine.phase {
            Phase::Active {
                installation,
                device,
                ..
            } => Phase::DeviceRegistered {
                installation: Arc::clone(installation),
                device: *device,
            },
            _ => return false,
        };
        machine.phase = next;
        info!("Session dropped on logout");
        true
    }

    /// Rotate the client key pair and start over from `Uninstalled`.
    pub async fn reset_installation(&self) -> BunqResult<()> {
        let keys = Arc::clone(self.keys());
        let key_pair = tokio::task::spawn_blocking(move || keys.rotate_key_pair())
            .await
            .map_err(|e| BunqError::Internal(format!("key rotation task failed: {e}")))??;

        let mut machine = self.inner.lock();
        self.keys().forget_server_public_key();
        machine.generation += 1;
        machine.phase = Phase::Uninstalled;
        info!(fingerprint = %key_pair.fingerprint(), "Installation reset");
        Ok(())
    }

    /// Secret-bearing snapshot for persistence, if an installation exists.
    pub fn snapshot(&self) -> Option<SessionContext> {
        let phase = self.inner.lock().phase.clone();
        let installation = phase.installation()?;
        let server_key = self.keys().current_server_public_key()?;

        let (device_id, session) = match &phase {
            Phase::DeviceRegistered { device, .. } | Phase::Expired { device, .. } => {
                (Some(device.device_id), None)
            }
            Phase::Active {
                device, session, ..
            } => (Some(device.device_id), Some(SavedSession::from_token(session))),
            _ => (None, None),
        };

        Some(SessionContext {
            installation_id: installation.id.0,
            installation_token: installation.token().to_string(),
            key_fingerprint: installation.key_fingerprint.clone(),
            server_public_key: server_key.pem().to_string(),
            device_id,
            session,
        })
    }

    /// Re-seed the state machine from a saved context.
    ///
    /// The key store must hold the client key the context was created with.
    pub async fn restore(&self, context: SessionContext) -> BunqResult<SessionState> {
        let keys = Arc::clone(self.keys());
        let key_pair = tokio::task::spawn_blocking(move || keys.ensure_key_pair())
            .await
            .map_err(|e| BunqError::Internal(format!("key load task failed: {e}")))??;
        if key_pair.fingerprint() != context.key_fingerprint {
            return Err(BunqError::KeyStore(
                "saved session context belongs to a different client key".to_string(),
            ));
        }

        let installation = Arc::new(Installation::new(
            InstallationId(context.installation_id),
            context.installation_token,
            context.key_fingerprint,
        ));
        let phase = match (context.device_id, context.session) {
            (Some(device_id), session) => {
                let device = DeviceToken {
                    device_id,
                    installation_id: installation.id,
                };
                match session {
                    Some(saved) => Phase::Active {
                        session: Arc::new(saved.into_token(&installation)),
                        installation,
                        device,
                    },
                    None => Phase::DeviceRegistered {
                        installation,
                        device,
                    },
                }
            }
            (None, _) => Phase::Installed(installation),
        };

        let mut machine = self.inner.lock();
        self.keys()
            .set_server_public_key(context.server_public_key.as_bytes())?;
        machine.generation += 1;
        machine.phase = phase;
        let state = machine.phase.state();
        info!(state = %state, "Session context restored");
        Ok(state)
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Machine> {
        self.machine.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drive the phase to `Active`. Every exit clears `in_flight` under the
    /// same lock that observes or commits the final phase.
    async fn run_transitions(&self) -> BunqResult<Arc<SessionToken>> {
        loop {
            let (phase, generation) = {
                let mut machine = self.lock();
                if let Some(session) = machine.phase.session() {
                    machine.in_flight = None;
                    return Ok(session);
                }
                (machine.phase.clone(), machine.generation)
            };

            let step = match phase {
                // Handled under the lock above.
                Phase::Active { .. } => continue,
                Phase::Uninstalled
                | Phase::Failed {
                    reason: FailureReason::InstallationRevoked,
                    ..
                }
                | Phase::Failed {
                    installation: None,
                    ..
                } => self.install().await,
                Phase::Installed(installation)
                | Phase::Failed {
                    installation: Some(installation),
                    ..
                } => self.register_device(installation).await,
                Phase::DeviceRegistered {
                    installation,
                    device,
                }
                | Phase::Expired {
                    installation,
                    device,
                } => self.create_session(installation, device).await,
            };

            let mut machine = self.lock();
            if machine.generation != generation {
                // Reset or restore replaced the phase; run again from there.
                continue;
            }
            match step {
                Step::Advance(next) => {
                    info!(from = %machine.phase.state(), to = %next.state(), "Session state transition");
                    machine.phase = next;
                    if let Some(session) = machine.phase.session() {
                        machine.in_flight = None;
                        return Ok(session);
                    }
                }
                Step::Fail {
                    reason,
                    installation,
                } => {
                    // A new installation brings a new server key.
                    if reason == FailureReason::InstallationRevoked {
                        self.exchange.keys().forget_server_public_key();
                    }
                    let phase = Phase::Failed {
                        reason,
                        installation,
                    };
                    warn!(from = %machine.phase.state(), to = %phase.state(), "Bank revoked credential");
                    machine.phase = phase;
                    machine.in_flight = None;
                    return Err(BunqError::from(reason));
                }
                Step::Stop(error) => {
                    machine.in_flight = None;
                    return Err(error);
                }
            }
        }
    }

    async fn install(&self) -> Step {
        match self.try_install().await {
            Ok(installation) => Step::Advance(Phase::Installed(Arc::new(installation))),
            Err(e) => Step::Stop(BunqError::Installation(Box::new(e))),
        }
    }

    async fn try_install(&self) -> BunqResult<Installation> {
        let keys = Arc::clone(self.exchange.keys());
        let key_pair = tokio::task::spawn_blocking(move || keys.ensure_key_pair())
            .await
            .map_err(|e| BunqError::Internal(format!("key load task failed: {e}")))??;

        let body = to_json(&InstallationRequest {
            client_public_key: key_pair.public_key_pem(),
        })?;
        let response = self
            .exchange
            .send(
                &ApiRequest::new(Method::POST, INSTALLATION_PATH, body),
                None,
                Protection::Unsigned,
            )
            .await?;

        let Triple(id, token, server_key) = response
            .decode::<Triple<BunqId, BunqToken, BunqServerPublicKey>>(INSTALLATION_PATH)?
            .body;
        self.exchange
            .keys()
            .set_server_public_key(server_key.server_public_key.as_bytes())?;

        info!(installation_id = id.id, fingerprint = %key_pair.fingerprint(), "Installation created");
        Ok(Installation::new(
            InstallationId(id.id),
            token.token,
            key_pair.fingerprint().to_string(),
        ))
    }

    async fn register_device(&self, installation: Arc<Installation>) -> Step {
        let config = self.exchange.config();
        let body = match to_json(&DeviceServerRequest {
            description: &config.device_description,
            secret: self.credential.secret(),
            permitted_ips: &config.permitted_ips,
        }) {
            Ok(body) => body,
            Err(e) => return Step::Stop(BunqError::DeviceRegistration(Box::new(e))),
        };

        let result = async {
            let response = self
                .exchange
                .send(
                    &ApiRequest::new(Method::POST, DEVICE_SERVER_PATH, body),
                    Some(installation.token()),
                    Protection::Signed,
                )
                .await?;
            let ObjectWrapper(id) = response
                .decode::<ObjectWrapper<BunqId>>(DEVICE_SERVER_PATH)?
                .body;
            Ok::<_, BunqError>(id)
        }
        .await;

        match result {
            Ok(id) => {
                info!(device_id = id.id, installation_id = installation.id.0, "Device registered");
                Step::Advance(Phase::DeviceRegistered {
                    device: DeviceToken {
                        device_id: id.id,
                        installation_id: installation.id,
                    },
                    installation,
                })
            }
            Err(e) if e.is_authentication_denied() => Step::Fail {
                reason: FailureReason::InstallationRevoked,
                installation: None,
            },
            Err(e) => Step::Stop(BunqError::DeviceRegistration(Box::new(e))),
        }
    }

    async fn create_session(&self, installation: Arc<Installation>, device: DeviceToken) -> Step {
        let body = match to_json(&SessionServerRequest {
            secret: self.credential.secret(),
        }) {
            Ok(body) => body,
            Err(e) => return Step::Stop(BunqError::SessionCreation(Box::new(e))),
        };

        let result = async {
            let response = self
                .exchange
                .send(
                    &ApiRequest::new(Method::POST, SESSION_SERVER_PATH, body),
                    Some(installation.token()),
                    Protection::Signed,
                )
                .await?;
            let Triple(id, token, user) = response
                .decode::<Triple<BunqId, BunqToken, SessionUser>>(SESSION_SERVER_PATH)?
                .body;
            Ok::<_, BunqError>((id, token, user))
        }
        .await;

        match result {
            Ok((id, token, user)) => {
                info!(
                    session_id = id.id,
                    installation_id = installation.id.0,
                    user_id = ?user.id,
                    "Session created"
                );
                let session =
                    SessionToken::new(id.id, token.token, token.created, &installation, Some(user));
                Step::Advance(Phase::Active {
                    installation,
                    device,
                    session: Arc::new(session),
                })
            }
            Err(e) if e.is_authentication_denied() => Step::Fail {
                reason: FailureReason::DeviceTokenRevoked,
                installation: Some(installation),
            },
            Err(e) => Step::Stop(BunqError::SessionCreation(Box::new(e))),
        }
    }
}
