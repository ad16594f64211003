//! Opaque change records.
//!
//! A [`Change`] is one unit of mutation produced by the CRDT engine. The
//! sync protocol never looks inside it: it is carried in order and handed
//! back to the engine on the receiving side.
//!
//! Binary codecs carry the raw bytes; human-readable codecs carry URL-safe
//! base64 without padding.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// An encoded change record.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Change(Vec<u8>);

impl Change {
    /// Wrap engine-encoded bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Borrow the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Take the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Size of the encoded change in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the encoded change is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Change([{} bytes])", self.0.len())
    }
}

impl Serialize for Change {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&URL_SAFE_NO_PAD.encode(&self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Change {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_str(ChangeVisitor)
        } else {
            deserializer.deserialize_byte_buf(ChangeVisitor)
        }
    }
}

struct ChangeVisitor;

impl<'de> Visitor<'de> for ChangeVisitor {
    type Value = Change;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("change bytes or a base64 string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Change, E> {
        URL_SAFE_NO_PAD
            .decode(v)
            .map(Change)
            .map_err(|e| E::custom(format!("invalid base64 change: {}", e)))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Change, E> {
        Ok(Change(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Change, E> {
        Ok(Change(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Change, A::Error> {
        let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(b) = seq.next_element::<u8>()? {
            bytes.push(b);
        }
        Ok(Change(bytes))
    }
}
