// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Tagged-array codec.
//!
//! The bank encodes structured values as JSON arrays of single-key objects:
//!
//! ```text
//! [ {"Id": {"id": 1}}, {"Token": {"token": "..."}}, {"ServerPublicKey": {...}} ]
//! ```
//!
//! Each arity has its own decoder (`ObjectWrapper`, `Pair`, `Triple`, `Many`)
//! so a shape mismatch reports exactly which count or tag was wrong.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

/// Top-level member holding the tagged entries of a successful response.
pub const RESPONSE_MEMBER: &str = "Response";
/// Top-level member holding pagination links on list responses.
pub const PAGINATION_MEMBER: &str = "Pagination";
/// Top-level member holding the entries of an error response.
pub const ERROR_MEMBER: &str = "Error";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("expected {expected} tagged entries, found {actual}")]
    Count { expected: usize, actual: usize },

    #[error("entry {index} is tagged `{actual}`, expected `{expected}`")]
    UnexpectedTag {
        index: usize,
        expected: String,
        actual: String,
    },

    #[error("entry {index} must be an object with exactly one key, found {keys}")]
    NotSingleKey { index: usize, keys: usize },

    #[error("expected {expected}, found {found}")]
    UnexpectedJson {
        expected: &'static str,
        found: &'static str,
    },

    #[error("missing `{0}` member in response body")]
    MissingMember(&'static str),

    #[error("entry {index} (`{tag}`) has an invalid payload: {message}")]
    Payload {
        index: usize,
        tag: String,
        message: String,
    },

    #[error("invalid JSON: {0}")]
    Json(String),
}

impl From<serde_json::Error> for EnvelopeError {
    fn from(e: serde_json::Error) -> Self {
        EnvelopeError::Json(e.to_string())
    }
}

/// One `{"Tag": value}` element of a tagged array, with its position.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntry {
    pub index: usize,
    pub tag: String,
    pub value: Value,
}

impl RawEntry {
    /// Fail unless this entry carries `expected` as its tag.
    pub fn expect_tag(&self, expected: &str) -> Result<(), EnvelopeError> {
        if self.tag == expected {
            Ok(())
        } else {
            Err(EnvelopeError::UnexpectedTag {
                index: self.index,
                expected: expected.to_string(),
                actual: self.tag.clone(),
            })
        }
    }

    /// Deserialize the entry's payload.
    pub fn payload<T: DeserializeOwned>(self) -> Result<T, EnvelopeError> {
        let RawEntry { index, tag, value } = self;
        serde_json::from_value(value).map_err(|e| EnvelopeError::Payload {
            index,
            tag,
            message: e.to_string(),
        })
    }
}

/// A value that occupies one position of a tagged array.
pub trait EnvelopeEntry: Sized {
    fn decode_entry(entry: RawEntry) -> Result<Self, EnvelopeError>;

    fn encode_entry(&self) -> Result<(String, Value), EnvelopeError>;
}

/// Serialize `payload` under `tag`.
pub fn encode_payload<T: Serialize + ?Sized>(
    tag: &str,
    payload: &T,
) -> Result<(String, Value), EnvelopeError> {
    Ok((tag.to_string(), serde_json::to_value(payload)?))
}

/// Bind a payload type to the single tag it must appear under.
///
/// ```rust,ignore
/// tagged_entry!(BunqId, "Id");
/// ```
#[macro_export]
macro_rules! tagged_entry {
    ($ty:ty, $tag:literal) => {
        impl $crate::envelope::EnvelopeEntry for $ty {
            fn decode_entry(
                entry: $crate::envelope::RawEntry,
            ) -> ::std::result::Result<Self, $crate::envelope::EnvelopeError> {
                entry.expect_tag($tag)?;
                entry.payload()
            }

            fn encode_entry(
                &self,
            ) -> ::std::result::Result<
                (::std::string::String, $crate::envelope::JsonValue),
                $crate::envelope::EnvelopeError,
            > {
                $crate::envelope::encode_payload($tag, self)
            }
        }
    };
}

/// Entry decoder that accepts whatever tag the bank sent and keeps it.
#[derive(Debug, Clone, PartialEq)]
pub struct Untagged<T> {
    pub tag: String,
    pub value: T,
}

impl<T: DeserializeOwned + Serialize> EnvelopeEntry for Untagged<T> {
    fn decode_entry(entry: RawEntry) -> Result<Self, EnvelopeError> {
        let tag = entry.tag.clone();
        Ok(Untagged {
            tag,
            value: entry.payload()?,
        })
    }

    fn encode_entry(&self) -> Result<(String, Value), EnvelopeError> {
        encode_payload(&self.tag, &self.value)
    }
}

/// Shape of a whole tagged array.
pub trait EnvelopeShape: Sized {
    fn decode_entries(entries: Vec<RawEntry>) -> Result<Self, EnvelopeError>;

    fn encode_entries(&self) -> Result<Vec<(String, Value)>, EnvelopeError>;
}

/// Exactly one tagged entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectWrapper<T>(pub T);

/// Exactly two tagged entries, in declared order.
#[derive(Debug, Clone, PartialEq)]
pub struct Pair<A, B>(pub A, pub B);

/// Exactly three tagged entries, in declared order.
#[derive(Debug, Clone, PartialEq)]
pub struct Triple<A, B, C>(pub A, pub B, pub C);

/// Any number of entries of the same kind (list endpoints).
#[derive(Debug, Clone, PartialEq)]
pub struct Many<T>(pub Vec<T>);

fn take<const N: usize>(entries: Vec<RawEntry>) -> Result<[RawEntry; N], EnvelopeError> {
    let actual = entries.len();
    entries
        .try_into()
        .map_err(|_| EnvelopeError::Count { expected: N, actual })
}

impl<T: EnvelopeEntry> EnvelopeShape for ObjectWrapper<T> {
    fn decode_entries(entries: Vec<RawEntry>) -> Result<Self, EnvelopeError> {
        let [only] = take::<1>(entries)?;
        Ok(ObjectWrapper(T::decode_entry(only)?))
    }

    fn encode_entries(&self) -> Result<Vec<(String, Value)>, EnvelopeError> {
        Ok(vec![self.0.encode_entry()?])
    }
}

impl<A: EnvelopeEntry, B: EnvelopeEntry> EnvelopeShape for Pair<A, B> {
    fn decode_entries(entries: Vec<RawEntry>) -> Result<Self, EnvelopeError> {
        let [a, b] = take::<2>(entries)?;
        Ok(Pair(A::decode_entry(a)?, B::decode_entry(b)?))
    }

    fn encode_entries(&self) -> Result<Vec<(String, Value)>, EnvelopeError> {
        Ok(vec![self.0.encode_entry()?, self.1.encode_entry()?])
    }
}

impl<A: EnvelopeEntry, B: EnvelopeEntry, C: EnvelopeEntry> EnvelopeShape for Triple<A, B, C> {
    fn decode_entries(entries: Vec<RawEntry>) -> Result<Self, EnvelopeError> {
        let [a, b, c] = take::<3>(entries)?;
        Ok(Triple(
            A::decode_entry(a)?,
            B::decode_entry(b)?,
            C::decode_entry(c)?,
        ))
    }

    fn encode_entries(&self) -> Result<Vec<(String, Value)>, EnvelopeError> {
        Ok(vec![
            self.0.encode_entry()?,
            self.1.encode_entry()?,
            self.2.encode_entry()?,
        ])
    }
}

impl<T: EnvelopeEntry> EnvelopeShape for Many<T> {
    fn decode_entries(entries: Vec<RawEntry>) -> Result<Self, EnvelopeError> {
        entries
            .into_iter()
            .map(T::decode_entry)
            .collect::<Result<Vec<_>, _>>()
            .map(Many)
    }

    fn encode_entries(&self) -> Result<Vec<(String, Value)>, EnvelopeError> {
        self.0.iter().map(EnvelopeEntry::encode_entry).collect()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Split a JSON array into its tagged entries.
pub fn parse_entries(value: Value) -> Result<Vec<RawEntry>, EnvelopeError> {
    let items = match value {
        Value::Array(items) => items,
        other => {
            return Err(EnvelopeError::UnexpectedJson {
                expected: "an array of tagged entries",
                found: json_kind(&other),
            })
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let object = match item {
                Value::Object(object) => object,
                other => {
                    return Err(EnvelopeError::UnexpectedJson {
                        expected: "a single-key object",
                        found: json_kind(&other),
                    })
                }
            };
            let keys = object.len();
            let mut members = object.into_iter();
            match (members.next(), members.next()) {
                (Some((tag, value)), None) => Ok(RawEntry { index, tag, value }),
                _ => Err(EnvelopeError::NotSingleKey { index, keys }),
            }
        })
        .collect()
}

/// Decode a tagged array into the declared shape.
pub fn decode<S: EnvelopeShape>(value: Value) -> Result<S, EnvelopeError> {
    S::decode_entries(parse_entries(value)?)
}

/// Encode a shape back into the tagged-array form.
pub fn encode<S: EnvelopeShape>(shape: &S) -> Result<Value, EnvelopeError> {
    let items = shape
        .encode_entries()?
        .into_iter()
        .map(|(tag, value)| {
            let mut object = Map::with_capacity(1);
            object.insert(tag, value);
            Value::Object(object)
        })
        .collect();
    Ok(Value::Array(items))
}

/// Links returned next to list responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub future_url: Option<String>,
    pub newer_url: Option<String>,
    pub older_url: Option<String>,
}

/// A decoded response body plus its out-of-band metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<S> {
    pub body: S,
    /// Value of the bank's response id header, when present.
    pub response_id: Option<String>,
    pub pagination: Option<Pagination>,
}

impl<S: EnvelopeShape> Envelope<S> {
    /// Decode a `{"Response": [...]}` body.
    pub fn from_slice(bytes: &[u8], response_id: Option<String>) -> Result<Self, EnvelopeError> {
        let mut object = match serde_json::from_slice::<Value>(bytes)? {
            Value::Object(object) => object,
            other => {
                return Err(EnvelopeError::UnexpectedJson {
                    expected: "a response object",
                    found: json_kind(&other),
                })
            }
        };

        let entries = object
            .remove(RESPONSE_MEMBER)
            .ok_or(EnvelopeError::MissingMember(RESPONSE_MEMBER))?;
        let body = decode(entries)?;

        let pagination = match object.remove(PAGINATION_MEMBER) {
            Some(Value::Null) | None => None,
            Some(value) => Some(serde_json::from_value(value)?),
        };

        Ok(Envelope {
            body,
            response_id,
            pagination,
        })
    }

    /// Encode as a `{"Response": [...]}` body.
    pub fn to_value(&self) -> Result<Value, EnvelopeError> {
        let mut object = Map::new();
        object.insert(RESPONSE_MEMBER.to_string(), encode(&self.body)?);
        if let Some(pagination) = &self.pagination {
            object.insert(PAGINATION_MEMBER.to_string(), serde_json::to_value(pagination)?);
        }
        Ok(Value::Object(object))
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEntry {
    error_description: Option<String>,
    error_description_translated: Option<String>,
}

/// Extract the human-readable description from an `{"Error": [...]}` body.
///
/// Returns `None` when the body is not an error envelope.
pub fn error_description(bytes: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    let entries: Vec<ErrorEntry> = serde_json::from_value(value.get(ERROR_MEMBER)?.clone()).ok()?;
    let descriptions: Vec<String> = entries
        .into_iter()
        .filter_map(|e| e.error_description.or(e.error_description_translated))
        .collect();
    if descriptions.is_empty() {
        None
    } else {
        Some(descriptions.join("; "))
    }
}
