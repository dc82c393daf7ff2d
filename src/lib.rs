// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! bunq Session Client - signed session bootstrap for the bunq API
//!
//! Every call to the bank is signed with the client's RSA key and every
//! response is verified against the bank's key. Before any resource call the
//! client walks installation, device registration and session creation, and
//! it refreshes the session once when the bank rejects it.
//!
//! ## Modules
//!
//! - `client` - `BankApiClient::execute` with one refresh-and-retry
//! - `session` - state machine, credentials and persisted context
//! - `keys` - client key pair, server public key, key stores
//! - `signing` - RSA-SHA256 request signing and response verification
//! - `envelope` - the bank's tagged-array JSON codec
//! - `transport` - HTTP seam and the `reqwest` implementation
//! - `storage` - JSON and PEM files on disk
//! - `config` - environment-driven settings

pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
mod exchange;
pub mod keys;
pub mod session;
pub mod signing;
pub mod storage;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::BankApiClient;
pub use config::{BunqConfig, BunqEnvironment};
pub use error::{BunqError, BunqResult};
pub use exchange::{ApiRequest, ApiResponse};
pub use session::{ApiCredential, SessionContext, SessionManager, SessionState};
