//! The decoder-agnostic data model: [`Message`], [`Field`], and [`Value`].
//!
//! Every decoder in this crate (the self-describing wire, SBE, and the compact
//! tagged protocol) produces the same [`Message`] shape so that callers never need
//! to know which encoding produced a given excerpt.

use std::collections::HashMap;

use crate::error::Error;

/// Whether an excerpt carried application data or queue-internal metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// An application-level excerpt.
    Data,
    /// A queue-internal metadata excerpt (roll-cycle headers, index tables, ...).
    Metadata,
}

/// A single decoded excerpt.
///
/// `fields` preserves on-disk order; see the field-name-uniqueness invariant on
/// [`Field`].
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Monotonic index assigned by the container reader. Contiguous across emitted
    /// data excerpts; metadata excerpts are skipped unless explicitly requested.
    pub index: i64,
    /// Absolute byte offset of this excerpt's header in the file.
    pub absolute_offset: u64,
    /// Whether this was a data or metadata excerpt.
    pub kind: MessageKind,
    /// The decoded message class/type name, when available. Empty when the
    /// encoding carries no type name (e.g. an untagged self-describing document).
    pub type_name: String,
    /// Ordered, named fields. Order reflects on-disk order.
    pub fields: Vec<Field>,
    /// Present only when non-strict decoding hit a recoverable error partway
    /// through this message; `fields` still holds everything decoded up to that
    /// point.
    pub decode_error: Option<DecodeErrorInfo>,
}

impl Message {
    /// Looks up the first field with the given name at this level (not recursive).
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A snapshot of a recoverable decode failure attached to a [`Message`] when
/// decoding continued in non-strict mode.
#[derive(Debug)]
pub struct DecodeErrorInfo {
    /// The error that interrupted decoding.
    pub error: Error,
}

impl Clone for DecodeErrorInfo {
    fn clone(&self) -> Self {
        // `Error` does not implement `Clone` (it wraps `std::io::Error`), so we
        // preserve the rendered message instead of the original variant.
        DecodeErrorInfo {
            error: Error::Schema {
                message: self.error.to_string(),
            },
        }
    }
}

impl PartialEq for DecodeErrorInfo {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

/// A single named field within a [`Message`] or nested [`Value::Nested`].
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// The field's name. Unique within its level: a decoder that would otherwise
    /// emit a duplicate suffixes it `#2`, `#3`, ... in order of appearance.
    pub name: String,
    /// The decoded value.
    pub value: Value,
    /// The source-declared type name, when the encoding carries one (e.g. a
    /// self-describing [`crate::typecode::TypeCode::TypePrefix`], or a schema's
    /// declared field type).
    pub declared_type: Option<String>,
}

/// The tagged union of every value shape a decoder can produce.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// An explicit absent value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed 64-bit integer; narrower signed codes are sign-extended.
    Int64(i64),
    /// An unsigned 64-bit integer; narrower unsigned codes are zero-extended.
    UInt64(u64),
    /// A 64-bit float; 32-bit floats are widened.
    Float64(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw binary.
    Bytes(Vec<u8>),
    /// UTC epoch nanoseconds.
    Timestamp(i64),
    /// A 128-bit UUID.
    Uuid(u128),
    /// An ordered list. Insertion order is preserved.
    List(Vec<Value>),
    /// An ordered map. Insertion order is preserved; lookups are linear, matching
    /// the small, field-count-bounded maps this format actually carries.
    Map(Vec<(Value, Value)>),
    /// An ordered set. Insertion order is preserved.
    Set(Vec<Value>),
    /// A nested message, recursively sharing the top-level [`Message`] shape.
    Nested(Box<Message>),
}

/// Accumulates [`Field`]s for one [`Message`] level, enforcing the
/// duplicate-name-suffixing invariant as fields are pushed.
///
/// All three decoders share this so the `#2`, `#3`, ... suffixing behavior stays
/// consistent regardless of which encoding produced the duplicate.
#[derive(Debug, Default)]
pub(crate) struct FieldBuilder {
    fields: Vec<Field>,
    seen: HashMap<String, u32>,
}

impl FieldBuilder {
    pub(crate) fn push(&mut self, name: String, value: Value, declared_type: Option<String>) {
        let count = self.seen.entry(name.clone()).or_insert(0);
        *count += 1;
        let name = if *count == 1 {
            name
        } else {
            format!("{name}#{count}")
        };
        self.fields.push(Field {
            name,
            value,
            declared_type,
        });
    }

    pub(crate) fn len(&self) -> usize {
        self.fields.len()
    }

    pub(crate) fn into_fields(self) -> Vec<Field> {
        self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_are_suffixed_starting_at_2() {
        let mut b = FieldBuilder::default();
        b.push("id".into(), Value::Int64(1), None);
        b.push("id".into(), Value::Int64(2), None);
        b.push("id".into(), Value::Int64(3), None);
        b.push("qty".into(), Value::Int64(10), None);
        let fields = b.into_fields();
        let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["id", "id#2", "id#3", "qty"]);
    }

    #[test]
    fn message_field_lookup_finds_first_match() {
        let msg = Message {
            index: 0,
            absolute_offset: 0,
            kind: MessageKind::Data,
            type_name: "Order".into(),
            fields: vec![Field {
                name: "id".into(),
                value: Value::Int64(7),
                declared_type: None,
            }],
            decode_error: None,
        };
        assert_eq!(msg.field("id").unwrap().value, Value::Int64(7));
        assert!(msg.field("missing").is_none());
    }
}
