// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Response Envelope Codec
//!
//! Every bank response wraps its payload as `{"Response": [ {Tag: value}, ... ]}`.
//! Positions are fixed per endpoint, so the codec decodes into explicit arity
//! types instead of a generic object:
//!
//! | Shape | Entries |
//! |-------|---------|
//! | `ObjectWrapper<T>` | exactly 1 |
//! | `Pair<A, B>` | exactly 2, in order |
//! | `Triple<A, B, C>` | exactly 3, in order |
//! | `Many<T>` | any number |
//!
//! Count or tag mismatches are errors; nothing is coerced or truncated.

pub mod codec;
pub mod dto;

pub use codec::{
    decode, encode, encode_payload, error_description, parse_entries, Envelope, EnvelopeEntry,
    EnvelopeError, EnvelopeShape, Many, ObjectWrapper, Pagination, Pair, RawEntry, Triple,
    Untagged,
};
pub use dto::{BunqId, BunqServerPublicKey, BunqToken, SessionUser, UserKind};

#[doc(hidden)]
pub use serde_json::Value as JsonValue;
