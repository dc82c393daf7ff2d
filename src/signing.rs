// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Request signing and response verification.
//!
//! Both directions use RSA PKCS#1 v1.5 over a SHA-256 digest of the literal
//! body bytes, transported as base64 in a header. Requests are signed with
//! the client private key; responses are checked against the server public
//! key learned at installation.

use std::sync::Arc;

use base64ct::{Base64, Encoding};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use tracing::warn;

use crate::error::{BunqError, BunqResult};
use crate::keys::KeyManager;

/// Base64-encoded RSA-SHA256 signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(String);

impl Signature {
    /// Wrap a header value as received.
    pub fn from_base64(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct RequestSigner {
    keys: Arc<KeyManager>,
}

impl RequestSigner {
    pub fn new(keys: Arc<KeyManager>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// Sign an outgoing body with the client private key.
    ///
    /// Never generates a key: fails with `NoKeyPair` until the key manager
    /// has loaded or generated one.
    pub fn sign(&self, body: &[u8]) -> BunqResult<Signature> {
        let key_pair = self.keys.current_key_pair().ok_or(BunqError::NoKeyPair)?;
        let signature = key_pair.signing_key().sign(body);
        Ok(Signature(Base64::encode_string(&signature.to_bytes())))
    }

    /// Check a response body against the server's signature.
    pub fn verify(&self, endpoint: &str, body: &[u8], signature: &Signature) -> BunqResult<()> {
        let server_key = self
            .keys
            .current_server_public_key()
            .ok_or(BunqError::NoServerKey)?;

        let invalid = || BunqError::SignatureInvalid {
            endpoint: endpoint.to_string(),
        };

        let raw = Base64::decode_vec(signature.as_str().trim()).map_err(|_| {
            warn!(endpoint = %endpoint, "Server signature is not valid base64");
            invalid()
        })?;
        let signature = rsa::pkcs1v15::Signature::try_from(raw.as_slice()).map_err(|_| invalid())?;

        server_key
            .verifying_key()
            .verify(body, &signature)
            .map_err(|_| {
                warn!(endpoint = %endpoint, "Server signature does not match response body");
                invalid()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{InMemoryKeyStore, DEFAULT_KEY_ID};
    use crate::testing;

    /// A signer holding the client key, and a peer that trusts it as its
    /// "server" key, so one side's signatures verify on the other.
    fn signer_and_peer() -> (RequestSigner, RequestSigner) {
        let client_keys = Arc::new(KeyManager::new(
            Arc::new(InMemoryKeyStore::with_key(
                DEFAULT_KEY_ID,
                testing::client_key_pem().as_bytes(),
            )),
            DEFAULT_KEY_ID,
        ));
        let public_pem = client_keys.ensure_key_pair().unwrap().public_key_pem().to_string();

        let peer_keys = Arc::new(KeyManager::new(
            Arc::new(InMemoryKeyStore::new()),
            DEFAULT_KEY_ID,
        ));
        peer_keys.set_server_public_key(public_pem.as_bytes()).unwrap();

        (RequestSigner::new(client_keys), RequestSigner::new(peer_keys))
    }

    #[test]
    fn signature_verifies_with_swapped_roles() {
        let (signer, peer) = signer_and_peer();
        let bodies: [&[u8]; 3] = [b"", b"{}", br#"{"secret":"abc","permitted_ips":["*"]}"#];
        for body in bodies {
            let signature = signer.sign(body).unwrap();
            peer.verify("/test", body, &signature).unwrap();
        }
    }

    #[test]
    fn mutated_byte_fails_verification() {
        let (signer, peer) = signer_and_peer();
        let body = br#"{"amount":{"value":"10.00","currency":"EUR"}}"#.to_vec();
        let signature = signer.sign(&body).unwrap();

        for position in [0, body.len() / 2, body.len() - 1] {
            let mut tampered = body.clone();
            tampered[position] ^= 0x01;
            let err = peer.verify("/payment", &tampered, &signature).unwrap_err();
            assert!(matches!(err, BunqError::SignatureInvalid { ref endpoint } if endpoint == "/payment"));
        }
    }

    #[test]
    fn malformed_signature_is_invalid() {
        let (_, peer) = signer_and_peer();
        let err = peer
            .verify("/user", b"{}", &Signature::from_base64("%%% not base64 %%%"))
            .unwrap_err();
        assert_eq!(err.error_code(), "signature_invalid");
    }

    #[test]
    fn sign_without_key_pair_fails() {
        let keys = Arc::new(KeyManager::new(Arc::new(InMemoryKeyStore::new()), DEFAULT_KEY_ID));
        let err = RequestSigner::new(keys).sign(b"{}").unwrap_err();
        assert!(matches!(err, BunqError::NoKeyPair));
    }

    #[test]
    fn verify_without_server_key_fails() {
        let (signer, _) = signer_and_peer();
        let signature = signer.sign(b"{}").unwrap();
        let err = signer.verify("/user", b"{}", &signature).unwrap_err();
        assert!(matches!(err, BunqError::NoServerKey));
    }
}
