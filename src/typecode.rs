//! The closed set of single-byte type codes used by the self-describing wire.
//!
//! Every byte value not covered by [`TypeCode`] is a decode error (see
//! [`crate::wire::WireReader`]) — the decoder never silently advances past an
//! unrecognized code.

use num_enum::TryFromPrimitive;

/// The semantic bucket a [`TypeCode`] falls into. Exposed mainly so tests can assert
/// the table stays exhaustively partitioned as codes are added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCodeCategory {
    /// Codes that introduce or reference an interned field name.
    FieldName,
    /// Fixed-width scalar values.
    Primitive,
    /// Length-prefixed text or binary.
    StringLike,
    /// Epoch-based time values, normalized to UTC nanoseconds.
    Time,
    /// Identifiers: UUIDs and explicit type-name prefixes.
    Identifier,
    /// Start/end markers for nested containers.
    Container,
    /// Padding/reserved-for-future-use codes.
    Alignment,
}

/// A single-byte code identifying the shape of the value (or field-name marker)
/// that follows it in a self-describing wire document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum TypeCode {
    /// An explicit absent value.
    Null = 0x00,
    /// A single padding byte within a document, consumed and ignored.
    Padding = 0x01,
    /// Boolean `true`, no payload.
    BoolTrue = 0x02,
    /// Boolean `false`, no payload.
    BoolFalse = 0x03,
    /// Signed 8-bit integer.
    Int8 = 0x04,
    /// Signed 16-bit integer, little-endian.
    Int16 = 0x05,
    /// Signed 32-bit integer, little-endian.
    Int32 = 0x06,
    /// Signed 64-bit integer, little-endian.
    Int64 = 0x07,
    /// Unsigned 8-bit integer.
    UInt8 = 0x08,
    /// Unsigned 16-bit integer, little-endian.
    UInt16 = 0x09,
    /// Unsigned 32-bit integer, little-endian.
    UInt32 = 0x0A,
    /// Unsigned 64-bit integer, little-endian.
    UInt64 = 0x0B,
    /// IEEE-754 32-bit float, little-endian.
    Float32 = 0x0C,
    /// IEEE-754 64-bit float, little-endian.
    Float64 = 0x0D,
    /// UTF-8 string with a 1-byte length prefix.
    StringLen8 = 0x0E,
    /// UTF-8 string with a 2-byte little-endian length prefix.
    StringLen16 = 0x0F,
    /// UTF-8 string with a stop-bit length prefix.
    StringLenStopBit = 0x10,
    /// Raw binary with a stop-bit length prefix.
    Bytes = 0x11,
    /// Epoch nanoseconds, 8 bytes little-endian, stored as-is.
    TimestampNanos = 0x12,
    /// Epoch milliseconds, 8 bytes little-endian, normalized to nanos.
    TimestampMillis = 0x13,
    /// Epoch microseconds, 8 bytes little-endian, normalized to nanos.
    TimestampMicros = 0x14,
    /// Epoch day number, 4 bytes little-endian, normalized to midnight-UTC nanos.
    Date = 0x15,
    /// Naive epoch milliseconds (no zone), normalized to nanos.
    LocalDateTime = 0x16,
    /// Epoch milliseconds followed by an 8-bit-length-prefixed zone id, normalized
    /// to UTC nanos; the zone id is consumed but not retained in the decoded value.
    ZonedDateTime = 0x17,
    /// Duration in nanoseconds, 8 bytes little-endian.
    Duration = 0x18,
    /// A 128-bit UUID, 16 raw bytes.
    Uuid = 0x19,
    /// An explicit declared-type annotation (stop-bit length + UTF-8 name) that
    /// applies to the single value immediately following it.
    TypePrefix = 0x1A,
    /// Opens a `List` value; elements follow until [`TypeCode::SequenceEnd`].
    SequenceStart = 0x1B,
    /// Closes a `List` value opened by [`TypeCode::SequenceStart`].
    SequenceEnd = 0x1C,
    /// Opens a `Map` value; key/value pairs follow until [`TypeCode::MapEnd`].
    MapStart = 0x1D,
    /// Closes a `Map` value opened by [`TypeCode::MapStart`].
    MapEnd = 0x1E,
    /// Opens a `Set` value; elements follow until [`TypeCode::SetEnd`].
    SetStart = 0x1F,
    /// Closes a `Set` value opened by [`TypeCode::SetStart`].
    SetEnd = 0x20,
    /// A standalone type-name literal (stop-bit length + UTF-8), used to label the
    /// overall message type when it is not introduced via [`TypeCode::EventName`].
    TypeLiteral = 0x21,
    /// Introduces a top-level document and carries its message type name
    /// (stop-bit length + UTF-8) before the field sequence begins.
    EventName = 0x22,
    /// Opens a nested, anonymous field-tree value (a [`crate::value::Value::Nested`]);
    /// terminated by [`TypeCode::ObjectEnd`].
    EventObject = 0x23,
    /// Closes an object opened by [`TypeCode::EventObject`].
    ObjectEnd = 0x24,
    /// A human-readable comment, stop-bit length + UTF-8; consumed and discarded.
    Comment = 0x25,
    /// An out-of-band hint, stop-bit length + UTF-8; consumed and discarded.
    Hint = 0x26,
    /// Introduces a field name via a 1-byte length + ASCII/UTF-8 bytes, and interns
    /// it for later [`TypeCode::FieldNameRef`] use.
    FieldNameShort = 0x27,
    /// Introduces a field name via a stop-bit length + UTF-8 bytes, and interns it
    /// for later [`TypeCode::FieldNameRef`] use.
    FieldNameLong = 0x28,
    /// References a previously interned field name by its stop-bit encoded index.
    FieldNameRef = 0x29,
}

impl TypeCode {
    /// The semantic bucket this code falls into.
    pub fn category(self) -> TypeCodeCategory {
        use TypeCode::*;
        match self {
            FieldNameShort | FieldNameLong | FieldNameRef => TypeCodeCategory::FieldName,
            Null | BoolTrue | BoolFalse | Int8 | Int16 | Int32 | Int64 | UInt8 | UInt16
            | UInt32 | UInt64 | Float32 | Float64 => TypeCodeCategory::Primitive,
            StringLen8 | StringLen16 | StringLenStopBit | Bytes => TypeCodeCategory::StringLike,
            TimestampNanos | TimestampMillis | TimestampMicros | Date | LocalDateTime
            | ZonedDateTime | Duration => TypeCodeCategory::Time,
            Uuid | TypePrefix => TypeCodeCategory::Identifier,
            SequenceStart | SequenceEnd | MapStart | MapEnd | SetStart | SetEnd | TypeLiteral
            | EventName | EventObject | ObjectEnd | Comment | Hint => TypeCodeCategory::Container,
            Padding => TypeCodeCategory::Alignment,
        }
    }

    /// `true` if a document may legally begin with this code in "tagged" framing
    /// (see [`crate::wire::WireReader::read_document`]).
    pub fn starts_tagged_document(self) -> bool {
        matches!(
            self,
            TypeCode::EventName
                | TypeCode::TypeLiteral
                | TypeCode::FieldNameShort
                | TypeCode::FieldNameLong
                | TypeCode::FieldNameRef
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryFrom;

    #[test]
    fn every_assigned_byte_round_trips() {
        for byte in 0x00u8..=0x29 {
            let code = TypeCode::try_from(byte).unwrap_or_else(|_| panic!("0x{byte:02x} should decode"));
            assert_eq!(code as u8, byte);
        }
    }

    #[test]
    fn bytes_past_the_table_are_rejected() {
        for byte in 0x2Au16..=0xFF {
            assert!(TypeCode::try_from(byte as u8).is_err(), "0x{byte:02x} should be unknown");
        }
    }

    #[test]
    fn categories_partition_every_code() {
        for byte in 0x00u8..=0x29 {
            let code = TypeCode::try_from(byte).unwrap();
            // Just exercise the mapping; the match in `category` is exhaustive at
            // compile time so this mainly guards against panics.
            let _ = code.category();
        }
    }
}
