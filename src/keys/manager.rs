// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Client key pair and server public key ownership.

use std::sync::{Arc, Mutex, RwLock};

use base64ct::{Base64, Encoding};
use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs1v15::{SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::store::KeyStore;
use crate::error::{BunqError, BunqResult};

/// Modulus size for generated client keys.
pub const KEY_BITS: usize = 2048;

/// Default key id under which the client private key is stored.
pub const DEFAULT_KEY_ID: &str = "bunq-client";

/// The client's RSA key pair.
///
/// The private half never leaves this type; callers get signatures, the PEM
/// public key, and a fingerprint.
pub struct ClientKeyPair {
    signing_key: SigningKey<Sha256>,
    public_key_pem: String,
    fingerprint: String,
}

impl ClientKeyPair {
    fn generate() -> BunqResult<Self> {
        let private_key = RsaPrivateKey::new(&mut OsRng, KEY_BITS)
            .map_err(|e| BunqError::InvalidKeyFormat(format!("key generation failed: {e}")))?;
        Self::from_private_key(private_key)
    }

    fn from_pem(bytes: &[u8]) -> BunqResult<Self> {
        let (pem, _) = parse_pem(bytes)?;
        let private_key = RsaPrivateKey::from_pkcs8_der(pem.contents())
            .or_else(|_| RsaPrivateKey::from_pkcs1_der(pem.contents()))
            .map_err(|e| BunqError::InvalidKeyFormat(format!("invalid private key: {e}")))?;
        Self::from_private_key(private_key)
    }

    fn from_private_key(private_key: RsaPrivateKey) -> BunqResult<Self> {
        check_strength(private_key.size())?;
        let public_key = RsaPublicKey::from(&private_key);
        let public_key_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| BunqError::InvalidKeyFormat(format!("public key encoding failed: {e}")))?;
        let fingerprint = fingerprint(&public_key)?;
        Ok(Self {
            signing_key: SigningKey::<Sha256>::new(private_key),
            public_key_pem,
            fingerprint,
        })
    }

    fn to_pkcs8_pem(&self) -> BunqResult<Vec<u8>> {
        let private_key: &RsaPrivateKey = self.signing_key.as_ref();
        let pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| BunqError::InvalidKeyFormat(format!("private key encoding failed: {e}")))?;
        Ok(pem.as_bytes().to_vec())
    }

    /// SubjectPublicKeyInfo PEM sent to the bank at installation.
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// Base64 SHA-256 of the DER public key; identifies this key pair.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub(crate) fn signing_key(&self) -> &SigningKey<Sha256> {
        &self.signing_key
    }
}

impl std::fmt::Debug for ClientKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientKeyPair")
            .field("fingerprint", &self.fingerprint)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// The bank's signing key, learned at installation.
#[derive(Debug, Clone)]
pub struct ServerPublicKey {
    key: RsaPublicKey,
    verifying_key: VerifyingKey<Sha256>,
    pem: String,
}

impl ServerPublicKey {
    /// Parse a PEM public key (SubjectPublicKeyInfo or PKCS#1).
    pub fn from_pem(bytes: &[u8]) -> BunqResult<Self> {
        let (parsed, pem) = parse_pem(bytes)?;
        let key = RsaPublicKey::from_public_key_der(parsed.contents())
            .or_else(|_| RsaPublicKey::from_pkcs1_der(parsed.contents()))
            .map_err(|e| BunqError::InvalidKeyFormat(format!("invalid public key: {e}")))?;
        Ok(Self {
            verifying_key: VerifyingKey::<Sha256>::new(key.clone()),
            key,
            pem,
        })
    }

    pub fn pem(&self) -> &str {
        &self.pem
    }

    pub(crate) fn verifying_key(&self) -> &VerifyingKey<Sha256> {
        &self.verifying_key
    }
}

impl PartialEq for ServerPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

/// Parse PEM bytes, returning the block and its normalized text.
fn parse_pem(bytes: &[u8]) -> BunqResult<(pem::Pem, String)> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| BunqError::InvalidKeyFormat(format!("invalid UTF-8: {e}")))?;
    // Keys embedded in JSON sometimes arrive with escaped newlines.
    let text = text.trim().replace("\\n", "\n");
    let parsed =
        pem::parse(&text).map_err(|e| BunqError::InvalidKeyFormat(format!("invalid PEM: {e}")))?;
    Ok((parsed, text))
}

fn check_strength(modulus_bytes: usize) -> BunqResult<()> {
    if modulus_bytes * 8 < KEY_BITS {
        return Err(BunqError::InvalidKeyFormat(format!(
            "RSA modulus of {} bits is below the {KEY_BITS}-bit minimum",
            modulus_bytes * 8
        )));
    }
    Ok(())
}

fn fingerprint(public_key: &RsaPublicKey) -> BunqResult<String> {
    let der = public_key
        .to_public_key_der()
        .map_err(|e| BunqError::InvalidKeyFormat(format!("public key encoding failed: {e}")))?;
    Ok(Base64::encode_string(&Sha256::digest(der.as_bytes())))
}

/// Owns the client key pair and the server public key for one installation.
pub struct KeyManager {
    store: Arc<dyn KeyStore>,
    key_id: String,
    key_pair: Mutex<Option<Arc<ClientKeyPair>>>,
    server_key: RwLock<Option<Arc<ServerPublicKey>>>,
}

impl KeyManager {
    pub fn new(store: Arc<dyn KeyStore>, key_id: impl Into<String>) -> Self {
        Self {
            store,
            key_id: key_id.into(),
            key_pair: Mutex::new(None),
            server_key: RwLock::new(None),
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Return the key pair, loading it from the store or generating it.
    ///
    /// The lock is held across load/generate, so concurrent first callers
    /// all observe the single key that was produced.
    pub fn ensure_key_pair(&self) -> BunqResult<Arc<ClientKeyPair>> {
        let mut slot = self.key_pair.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = slot.as_ref() {
            return Ok(Arc::clone(existing));
        }

        let key_pair = match self.store.get(&self.key_id)? {
            Some(bytes) => {
                let key_pair = ClientKeyPair::from_pem(&bytes)?;
                debug!(key_id = %self.key_id, fingerprint = %key_pair.fingerprint(), "Loaded client key pair");
                key_pair
            }
            None => self.generate_and_store()?,
        };

        let key_pair = Arc::new(key_pair);
        *slot = Some(Arc::clone(&key_pair));
        Ok(key_pair)
    }

    /// Replace the key pair with a freshly generated one.
    ///
    /// Only valid as part of an installation reset: sessions and device
    /// registrations made under the old key become unusable.
    pub fn rotate_key_pair(&self) -> BunqResult<Arc<ClientKeyPair>> {
        let mut slot = self.key_pair.lock().unwrap_or_else(|e| e.into_inner());
        let key_pair = Arc::new(self.generate_and_store()?);
        *slot = Some(Arc::clone(&key_pair));
        Ok(key_pair)
    }

    fn generate_and_store(&self) -> BunqResult<ClientKeyPair> {
        let key_pair = ClientKeyPair::generate()?;
        self.store.put(&self.key_id, &key_pair.to_pkcs8_pem()?)?;
        info!(
            key_id = %self.key_id,
            fingerprint = %key_pair.fingerprint(),
            bits = KEY_BITS,
            "Generated client key pair"
        );
        Ok(key_pair)
    }

    /// The key pair if one has been loaded or generated, without side effects.
    pub fn current_key_pair(&self) -> Option<Arc<ClientKeyPair>> {
        self.key_pair
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Parse and store the bank's public key.
    pub fn set_server_public_key(&self, pem: &[u8]) -> BunqResult<Arc<ServerPublicKey>> {
        let key = Arc::new(ServerPublicKey::from_pem(pem)?);
        *self.server_key.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&key));
        Ok(key)
    }

    pub fn current_server_public_key(&self) -> Option<Arc<ServerPublicKey>> {
        self.server_key
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Drop the server key when the installation it belongs to is discarded.
    pub fn forget_server_public_key(&self) {
        *self.server_key.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("key_id", &self.key_id)
            .field("has_key_pair", &self.current_key_pair().is_some())
            .field("has_server_key", &self.current_server_public_key().is_some())
            .finish()
    }
}
