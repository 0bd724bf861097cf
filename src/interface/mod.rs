//! The interface contract: a user's message-type definitions and their wire
//! codec, consumed via a serialize/deserialize contract.
//!
//! A real deployment supplies its own [`MessageInterface`] (generated from
//! protobuf, a domain schema, etc). This crate ships one concrete
//! implementation, [`json::JsonInterface`], operating over
//! `serde_json::Value`, so the crate is runnable and testable standalone:
//! message registry, `serialize`/`deserialize`, `to_dict`, and the
//! length-prefixed header layout declaration used by the SPEC protocol.

pub mod json;

use serde_json::Value;

/// Byte order for the SPEC length-prefixed framing header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

/// A single field access segment in a path-addressed operation: either a
/// field name or a list index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

impl PathSegment {
    /// Parse a dotted path's remainder (after the leading message name) into
    /// segments. A segment that parses as `usize` is an index; otherwise
    /// it's a field name.
    pub fn parse_path(path: &str) -> Vec<PathSegment> {
        if path.is_empty() {
            return Vec::new();
        }
        path.split('.')
            .map(|seg| match seg.parse::<usize>() {
                Ok(idx) => PathSegment::Index(idx),
                Err(_) => PathSegment::Field(seg.to_string()),
            })
            .collect()
    }
}

/// External collaborator contract for a user-defined message catalog.
///
/// Every method is pure/synchronous: codecs do not perform I/O.
pub trait MessageInterface: Send + Sync {
    /// Decode a nested-map (or already-typed) payload into the named
    /// message's canonical in-memory representation. For the JSON
    /// implementation this is close to the identity function; for a
    /// schema-typed implementation this would construct the concrete type.
    fn decode(&self, message_name: &str, payload: &Value) -> Value;

    /// Produce a zero-initialized instance of the named message, used when
    /// no default payload was configured for it.
    fn zero(&self, message_name: &str) -> Value;

    /// Serialize a decoded message value to wire bytes.
    fn serialize(&self, message_name: &str, value: &Value) -> Vec<u8>;

    /// Parse wire bytes for the control/opaque envelope into an owned
    /// `serde_json::Value` (used for the `{"type", "payload"}` envelope and
    /// for decoding a SPEC-framed buffer into a concrete message + its type
    /// name).
    fn parse(&self, bytes: &[u8]) -> anyhow::Result<Value>;

    /// For a SPEC-framed incoming buffer, return the concrete message's
    /// class/type name so the dispatcher can route it on the signal bus.
    fn message_type_of(&self, bytes: &[u8]) -> anyhow::Result<String>;

    /// Header layout for SPEC length-prefixed framing: `[start, end)` bytes
    /// of the frame hold the declared message length.
    fn message_length_start_end_bytes(&self) -> (usize, usize);

    /// Declared byte order for the SPEC length field.
    fn byte_order(&self) -> ByteOrder;

    /// Convert a decoded message value to a plain nested map, used when a
    /// `get_data` call requests `to_dict`.
    fn to_dict(&self, value: &Value) -> Value {
        value.clone()
    }
}
