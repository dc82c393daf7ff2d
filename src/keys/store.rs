// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Secure key store seam.
//!
//! The platform owns at-rest protection of the private key; this crate only
//! hands it PEM bytes under a key id.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{BunqError, BunqResult};
use crate::storage::{FileStorage, StorageError};

/// Persistence for the client private key.
pub trait KeyStore: Send + Sync {
    fn put(&self, key_id: &str, private_key: &[u8]) -> BunqResult<()>;

    fn get(&self, key_id: &str) -> BunqResult<Option<Vec<u8>>>;
}

/// Process-local key store. Keys are lost when the process exits.
#[derive(Default)]
pub struct InMemoryKeyStore {
    keys: Mutex<HashMap<String, Vec<u8>>>,
    puts: Mutex<usize>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with an existing key.
    pub fn with_key(key_id: &str, private_key: &[u8]) -> Self {
        let store = Self::new();
        store
            .keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key_id.to_string(), private_key.to_vec());
        store
    }

    /// Number of `put` calls served so far.
    pub fn put_count(&self) -> usize {
        *self.puts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyStore for InMemoryKeyStore {
    fn put(&self, key_id: &str, private_key: &[u8]) -> BunqResult<()> {
        self.keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key_id.to_string(), private_key.to_vec());
        *self.puts.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }

    fn get(&self, key_id: &str) -> BunqResult<Option<Vec<u8>>> {
        Ok(self
            .keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key_id)
            .cloned())
    }
}

/// Key store writing PEM files under a [`FileStorage`] root.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    storage: FileStorage,
}

impl FileKeyStore {
    pub fn new(storage: FileStorage) -> Self {
        Self { storage }
    }
}

impl KeyStore for FileKeyStore {
    fn put(&self, key_id: &str, private_key: &[u8]) -> BunqResult<()> {
        let path = self.storage.key_path(key_id)?;
        self.storage
            .write_raw(&path, private_key)
            .map_err(|e| BunqError::KeyStore(format!("failed to write {key_id}: {e}")))
    }

    fn get(&self, key_id: &str) -> BunqResult<Option<Vec<u8>>> {
        let path = self.storage.key_path(key_id)?;
        match self.storage.read_raw(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(BunqError::KeyStore(format!("failed to read {key_id}: {e}"))),
        }
    }
}
