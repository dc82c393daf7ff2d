// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Key Management
//!
//! - `manager` - client RSA key pair (2048-bit, generated once per
//!   installation) and the bank's public key
//! - `store` - persistence seam for the private key

pub mod manager;
pub mod store;

pub use manager::{ClientKeyPair, KeyManager, ServerPublicKey, DEFAULT_KEY_ID, KEY_BITS};
pub use store::{FileKeyStore, InMemoryKeyStore, KeyStore};
