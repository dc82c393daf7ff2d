// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Installation, device registration and session lifecycle.

pub mod manager;
pub mod state;

pub use manager::{SessionManager, DEVICE_SERVER_PATH, INSTALLATION_PATH, SESSION_SERVER_PATH};
pub use state::{
    ApiCredential, DeviceToken, FailureReason, Installation, InstallationId, SavedSession,
    SessionContext, SessionState, SessionToken,
};
