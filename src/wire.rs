//! The self-describing wire decoder.
//!
//! Consumes a closed set of [`TypeCode`] bytes to produce a [`Message`] tree
//! without any external schema. Two framing styles share one reader:
//!
//! - **tagged**: the document (or a nested [`TypeCode::EventObject`]) is a sequence
//!   of `(field name, value)` pairs.
//! - **untagged**: the document is an anonymous sequence of bare values; each
//!   becomes a [`Field`] with an empty name (subject to the usual duplicate-name
//!   suffixing).
//!
//! Which framing applies is decided by the first byte, per
//! [`TypeCode::starts_tagged_document`].

use crate::error::{Error, Location, Result};
use crate::stopbit;
use crate::typecode::TypeCode;
use crate::value::{Field, FieldBuilder, Message, MessageKind, Value};

/// The self-describing wire decoder.
///
/// Stateless across documents apart from the configured depth limit: each call to
/// [`WireReader::read_document`] gets its own cursor and field-name intern table.
#[derive(Debug, Clone, Copy)]
pub struct WireReader {
    max_depth: u32,
}

impl WireReader {
    /// Creates a reader that fails with [`Error::DepthExceeded`] past `max_depth`
    /// levels of nesting.
    pub fn new(max_depth: u32) -> Self {
        Self { max_depth }
    }

    /// Parses a single self-describing document out of `payload`.
    ///
    /// `file_offset` is the absolute byte offset of the excerpt this payload came
    /// from; it is only used to annotate errors and the returned [`Message`]. The
    /// returned message's `index` and `kind` are placeholders (`0` / `Data`) for
    /// callers that invoke this directly; [`crate::dispatch::DecoderDispatcher`]
    /// overwrites them with the container-supplied values.
    ///
    /// # Errors
    /// Returns [`Error::DepthExceeded`], [`Error::UnknownTypeCode`],
    /// [`Error::Truncated`], or [`Error::InvalidUtf8`].
    pub fn read_document(&self, payload: &[u8], file_offset: u64) -> Result<Message> {
        let mut cur = Cursor::new(payload, file_offset);
        let mut names = NameTable::default();

        if cur.is_empty() {
            return Ok(Message {
                index: 0,
                absolute_offset: file_offset,
                kind: MessageKind::Data,
                type_name: String::new(),
                fields: Vec::new(),
                decode_error: None,
            });
        }

        let first = cur.peek_code()?;
        let mut type_name = String::new();
        if matches!(first, TypeCode::EventName | TypeCode::TypeLiteral) {
            cur.read_u8()?;
            let len = cur.read_stopbit_len()?;
            type_name = cur.read_utf8(len)?;
        }

        let tagged = first.starts_tagged_document();
        let mut builder = FieldBuilder::default();
        if tagged {
            while !cur.is_empty() {
                let name = self.read_field_name(&mut cur, &mut names)?;
                let (value, declared_type) = self.read_value(&mut cur, &mut names, 1)?;
                builder.push(name, value, declared_type);
            }
        } else {
            while !cur.is_empty() {
                let (value, declared_type) = self.read_value(&mut cur, &mut names, 1)?;
                builder.push(String::new(), value, declared_type);
            }
        }

        Ok(Message {
            index: 0,
            absolute_offset: file_offset,
            kind: MessageKind::Data,
            type_name,
            fields: builder.into_fields(),
            decode_error: None,
        })
    }

    fn read_field_name(&self, cur: &mut Cursor<'_>, names: &mut NameTable) -> Result<String> {
        let location = cur.location();
        let code = cur.read_code()?;
        match code {
            TypeCode::FieldNameShort => {
                let len = cur.read_u8()? as usize;
                let name = cur.read_utf8(len)?;
                names.intern(name.clone());
                Ok(name)
            }
            TypeCode::FieldNameLong => {
                let len = cur.read_stopbit_len()?;
                let name = cur.read_utf8(len)?;
                names.intern(name.clone());
                Ok(name)
            }
            TypeCode::FieldNameRef => {
                let id = cur.read_stopbit_len()?;
                names
                    .get(id)
                    .map(str::to_owned)
                    .ok_or(Error::UnknownFieldRef {
                        id: id as u32,
                        location,
                    })
            }
            _ => Err(Error::UnknownTypeCode {
                byte: code as u8,
                location,
            }),
        }
    }

    /// Reads one value, transparently skipping any leading `Comment`/`Hint`/
    /// `Padding` annotation codes. Returns the value and an optional declared-type
    /// hint (set by `TypePrefix`, `ZonedDateTime`, and `Duration`).
    fn read_value(
        &self,
        cur: &mut Cursor<'_>,
        names: &mut NameTable,
        depth: u32,
    ) -> Result<(Value, Option<String>)> {
        loop {
            let location = cur.location();
            let code = cur.read_code()?;
            return Ok(match code {
                TypeCode::Comment | TypeCode::Hint => {
                    let len = cur.read_stopbit_len()?;
                    cur.skip(len)?;
                    continue;
                }
                TypeCode::Padding => continue,
                TypeCode::Null => (Value::Null, None),
                TypeCode::BoolTrue => (Value::Bool(true), None),
                TypeCode::BoolFalse => (Value::Bool(false), None),
                TypeCode::Int8 => (Value::Int64(cur.read_u8()? as i8 as i64), None),
                TypeCode::Int16 => (Value::Int64(cur.read_i16()? as i64), None),
                TypeCode::Int32 => (Value::Int64(cur.read_i32()? as i64), None),
                TypeCode::Int64 => (Value::Int64(cur.read_i64()?), None),
                TypeCode::UInt8 => (Value::UInt64(cur.read_u8()? as u64), None),
                TypeCode::UInt16 => (Value::UInt64(cur.read_u16()? as u64), None),
                TypeCode::UInt32 => (Value::UInt64(cur.read_u32()? as u64), None),
                TypeCode::UInt64 => (Value::UInt64(cur.read_u64()?), None),
                TypeCode::Float32 => (Value::Float64(cur.read_f32()? as f64), None),
                TypeCode::Float64 => (Value::Float64(cur.read_f64()?), None),
                TypeCode::StringLen8 => {
                    let len = cur.read_u8()? as usize;
                    (Value::Text(cur.read_utf8(len)?), None)
                }
                TypeCode::StringLen16 => {
                    let len = cur.read_u16()? as usize;
                    (Value::Text(cur.read_utf8(len)?), None)
                }
                TypeCode::StringLenStopBit => {
                    let len = cur.read_stopbit_len()?;
                    (Value::Text(cur.read_utf8(len)?), None)
                }
                TypeCode::Bytes => {
                    let len = cur.read_stopbit_len()?;
                    (Value::Bytes(cur.read_exact(len)?.to_vec()), None)
                }
                TypeCode::TimestampNanos => (Value::Timestamp(cur.read_i64()?), None),
                TypeCode::TimestampMillis => {
                    let millis = cur.read_i64()?;
                    (Value::Timestamp(checked_scale(millis, 1_000_000, location)?), None)
                }
                TypeCode::TimestampMicros => {
                    let micros = cur.read_i64()?;
                    (Value::Timestamp(checked_scale(micros, 1_000, location)?), None)
                }
                TypeCode::Date => {
                    let day = cur.read_i32()? as i64;
                    let nanos = checked_scale(day, 86_400, location)
                        .and_then(|secs| checked_scale(secs, 1_000_000_000, location))?;
                    (Value::Timestamp(nanos), Some("date".to_owned()))
                }
                TypeCode::LocalDateTime => {
                    let millis = cur.read_i64()?;
                    (
                        Value::Timestamp(checked_scale(millis, 1_000_000, location)?),
                        Some("local_date_time".to_owned()),
                    )
                }
                TypeCode::ZonedDateTime => {
                    let millis = cur.read_i64()?;
                    let zone_len = cur.read_u8()? as usize;
                    let _zone = cur.read_utf8(zone_len)?;
                    (
                        Value::Timestamp(checked_scale(millis, 1_000_000, location)?),
                        Some("zoned_date_time".to_owned()),
                    )
                }
                TypeCode::Duration => (Value::Int64(cur.read_i64()?), Some("duration".to_owned())),
                TypeCode::Uuid => {
                    let bytes = cur.read_exact(16)?;
                    let mut array = [0u8; 16];
                    array.copy_from_slice(bytes);
                    (Value::Uuid(u128::from_be_bytes(array)), None)
                }
                TypeCode::TypePrefix => {
                    let len = cur.read_stopbit_len()?;
                    let type_name = cur.read_utf8(len)?;
                    let (value, _) = self.read_value(cur, names, depth)?;
                    (value, Some(type_name))
                }
                TypeCode::SequenceStart => {
                    let next_depth = self.enter_depth(depth, location)?;
                    let mut items = Vec::new();
                    loop {
                        if cur.peek_code()? == TypeCode::SequenceEnd {
                            cur.read_u8()?;
                            break;
                        }
                        items.push(self.read_value(cur, names, next_depth)?.0);
                    }
                    (Value::List(items), None)
                }
                TypeCode::SetStart => {
                    let next_depth = self.enter_depth(depth, location)?;
                    let mut items = Vec::new();
                    loop {
                        if cur.peek_code()? == TypeCode::SetEnd {
                            cur.read_u8()?;
                            break;
                        }
                        items.push(self.read_value(cur, names, next_depth)?.0);
                    }
                    (Value::Set(items), None)
                }
                TypeCode::MapStart => {
                    let next_depth = self.enter_depth(depth, location)?;
                    let mut pairs = Vec::new();
                    loop {
                        if cur.peek_code()? == TypeCode::MapEnd {
                            cur.read_u8()?;
                            break;
                        }
                        let key = self.read_value(cur, names, next_depth)?.0;
                        let value = self.read_value(cur, names, next_depth)?.0;
                        pairs.push((key, value));
                    }
                    (Value::Map(pairs), None)
                }
                TypeCode::EventObject => {
                    let next_depth = self.enter_depth(depth, location)?;
                    let mut builder = FieldBuilder::default();
                    loop {
                        if cur.peek_code()? == TypeCode::ObjectEnd {
                            cur.read_u8()?;
                            break;
                        }
                        let name = self.read_field_name(cur, names)?;
                        let (value, declared_type) = self.read_value(cur, names, next_depth)?;
                        builder.push(name, value, declared_type);
                    }
                    (
                        Value::Nested(Box::new(Message {
                            index: 0,
                            absolute_offset: cur.file_offset,
                            kind: MessageKind::Data,
                            type_name: String::new(),
                            fields: builder.into_fields(),
                            decode_error: None,
                        })),
                        None,
                    )
                }
                // Everything else (end markers, field-name codes, event/type-name
                // markers) is invalid at a value-read position.
                other => {
                    return Err(Error::UnknownTypeCode {
                        byte: other as u8,
                        location,
                    })
                }
            });
        }
    }

    fn enter_depth(&self, depth: u32, location: Location) -> Result<u32> {
        let next = depth + 1;
        if next > self.max_depth {
            return Err(Error::DepthExceeded { location });
        }
        Ok(next)
    }
}

fn checked_scale(value: i64, factor: i64, location: Location) -> Result<i64> {
    value
        .checked_mul(factor)
        .ok_or(Error::TimestampOverflow { location })
}

/// Per-document intern table for field names, referenced by
/// [`TypeCode::FieldNameRef`].
#[derive(Debug, Default)]
struct NameTable {
    names: Vec<String>,
}

impl NameTable {
    fn intern(&mut self, name: String) {
        self.names.push(name);
    }

    fn get(&self, id: usize) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }
}

/// A byte cursor over one excerpt payload, tracking position for error reporting.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    file_offset: u64,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8], file_offset: u64) -> Self {
        Self {
            data,
            pos: 0,
            file_offset,
        }
    }

    fn location(&self) -> Location {
        Location::new(self.file_offset, self.pos as u64)
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn read_exact(&mut self, n: usize) -> Result<&'a [u8]> {
        let location = self.location();
        if self.pos + n > self.data.len() {
            return Err(Error::Truncated {
                location,
                message: format!("expected {n} more bytes, found {}", self.data.len() - self.pos),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.read_exact(n).map(|_| ())
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_exact(1)?[0])
    }

    fn read_code(&mut self) -> Result<TypeCode> {
        let location = self.location();
        let byte = self.read_u8()?;
        TypeCode::try_from(byte).map_err(|_| Error::UnknownTypeCode { byte, location })
    }

    fn peek_code(&self) -> Result<TypeCode> {
        let location = self.location();
        let byte = *self.data.get(self.pos).ok_or(Error::Truncated {
            location,
            message: "expected another type code, found end of payload".to_owned(),
        })?;
        TypeCode::try_from(byte).map_err(|_| Error::UnknownTypeCode { byte, location })
    }

    fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.read_exact(2)?.try_into().unwrap()))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_exact(4)?.try_into().unwrap()))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read_exact(8)?.try_into().unwrap()))
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_exact(2)?.try_into().unwrap()))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_exact(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_exact(8)?.try_into().unwrap()))
    }

    fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.read_exact(4)?.try_into().unwrap()))
    }

    fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.read_exact(8)?.try_into().unwrap()))
    }

    fn read_stopbit_len(&mut self) -> Result<usize> {
        let (value, consumed) = stopbit::decode_u64(&self.data[self.pos..], self.location())?;
        self.pos += consumed;
        Ok(value as usize)
    }

    fn read_utf8(&mut self, len: usize) -> Result<String> {
        let location = self.location();
        let bytes = self.read_exact(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::InvalidUtf8 {
            field_path: None,
            location,
        })
    }
}

/// Canonically re-encodes a previously decoded [`Message`] back into a
/// self-describing document, for the idempotence property: decode → encode →
/// decode must yield a field-equivalent `Message`.
pub fn encode_document(message: &Message) -> Vec<u8> {
    let mut out = Vec::new();
    if !message.type_name.is_empty() {
        out.push(TypeCode::EventName as u8);
        stopbit::encode_u64(message.type_name.len() as u64, &mut out);
        out.extend_from_slice(message.type_name.as_bytes());
    }
    for field in &message.fields {
        encode_field(field, &mut out);
    }
    out
}

fn encode_field(field: &Field, out: &mut Vec<u8>) {
    out.push(TypeCode::FieldNameLong as u8);
    stopbit::encode_u64(field.name.len() as u64, out);
    out.extend_from_slice(field.name.as_bytes());
    encode_value(&field.value, out);
}

fn encode_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(TypeCode::Null as u8),
        Value::Bool(true) => out.push(TypeCode::BoolTrue as u8),
        Value::Bool(false) => out.push(TypeCode::BoolFalse as u8),
        Value::Int64(v) => {
            out.push(TypeCode::Int64 as u8);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::UInt64(v) => {
            out.push(TypeCode::UInt64 as u8);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::Float64(v) => {
            out.push(TypeCode::Float64 as u8);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::Text(s) => {
            out.push(TypeCode::StringLenStopBit as u8);
            stopbit::encode_u64(s.len() as u64, out);
            out.extend_from_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            out.push(TypeCode::Bytes as u8);
            stopbit::encode_u64(b.len() as u64, out);
            out.extend_from_slice(b);
        }
        Value::Timestamp(nanos) => {
            out.push(TypeCode::TimestampNanos as u8);
            out.extend_from_slice(&nanos.to_le_bytes());
        }
        Value::Uuid(v) => {
            out.push(TypeCode::Uuid as u8);
            out.extend_from_slice(&v.to_be_bytes());
        }
        Value::List(items) => {
            out.push(TypeCode::SequenceStart as u8);
            for item in items {
                encode_value(item, out);
            }
            out.push(TypeCode::SequenceEnd as u8);
        }
        Value::Set(items) => {
            out.push(TypeCode::SetStart as u8);
            for item in items {
                encode_value(item, out);
            }
            out.push(TypeCode::SetEnd as u8);
        }
        Value::Map(pairs) => {
            out.push(TypeCode::MapStart as u8);
            for (k, v) in pairs {
                encode_value(k, out);
                encode_value(v, out);
            }
            out.push(TypeCode::MapEnd as u8);
        }
        Value::Nested(msg) => {
            out.push(TypeCode::EventObject as u8);
            for field in &msg.fields {
                encode_field(field, out);
            }
            out.push(TypeCode::ObjectEnd as u8);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(TypeCode::EventName as u8);
        stopbit::encode_u64(5, &mut buf);
        buf.extend_from_slice(b"Order");

        buf.push(TypeCode::FieldNameShort as u8);
        buf.push(2);
        buf.extend_from_slice(b"id");
        buf.push(TypeCode::Int64 as u8);
        buf.extend_from_slice(&1i64.to_le_bytes());

        buf.push(TypeCode::FieldNameShort as u8);
        buf.push(3);
        buf.extend_from_slice(b"qty");
        buf.push(TypeCode::Int64 as u8);
        buf.extend_from_slice(&10i64.to_le_bytes());
        buf
    }

    #[test]
    fn decodes_tagged_document_with_type_name() {
        let reader = WireReader::new(64);
        let msg = reader.read_document(&sample_document(), 0).unwrap();
        assert_eq!(msg.type_name, "Order");
        assert_eq!(msg.fields.len(), 2);
        assert_eq!(msg.fields[0].name, "id");
        assert_eq!(msg.fields[0].value, Value::Int64(1));
        assert_eq!(msg.fields[1].name, "qty");
        assert_eq!(msg.fields[1].value, Value::Int64(10));
    }

    #[test]
    fn field_name_ref_resolves_interned_name() {
        let mut buf = Vec::new();
        buf.push(TypeCode::FieldNameLong as u8);
        stopbit::encode_u64(10, &mut buf);
        buf.extend_from_slice(b"customerId");
        buf.push(TypeCode::Int64 as u8);
        buf.extend_from_slice(&1i64.to_le_bytes());

        buf.push(TypeCode::FieldNameRef as u8);
        stopbit::encode_u64(0, &mut buf);
        buf.push(TypeCode::Int64 as u8);
        buf.extend_from_slice(&2i64.to_le_bytes());

        let reader = WireReader::new(64);
        let msg = reader.read_document(&buf, 0).unwrap();
        assert_eq!(msg.fields[0].name, "customerId");
        assert_eq!(msg.fields[1].name, "customerId#2");
    }

    #[test]
    fn unknown_field_ref_errors() {
        let mut buf = Vec::new();
        buf.push(TypeCode::FieldNameRef as u8);
        stopbit::encode_u64(5, &mut buf);
        buf.push(TypeCode::Null as u8);

        let reader = WireReader::new(64);
        let err = reader.read_document(&buf, 0).unwrap_err();
        assert!(matches!(err, Error::UnknownFieldRef { id: 5, .. }));
    }

    #[test]
    fn unknown_type_code_is_reported_with_position() {
        let buf = vec![0xFFu8];
        let reader = WireReader::new(64);
        let err = reader.read_document(&buf, 100).unwrap_err();
        match err {
            Error::UnknownTypeCode { byte, location } => {
                assert_eq!(byte, 0xFF);
                assert_eq!(location.file_offset, 100);
                assert_eq!(location.payload_offset, 0);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn depth_exceeded_past_limit() {
        // Each level: a field "a" holding a nested EventObject.
        fn nest(levels: u32) -> Vec<u8> {
            let mut buf = Vec::new();
            buf.push(TypeCode::FieldNameShort as u8);
            buf.push(1);
            buf.push(b'a');
            if levels == 0 {
                buf.push(TypeCode::Null as u8);
            } else {
                buf.push(TypeCode::EventObject as u8);
                buf.extend_from_slice(&nest(levels - 1));
                buf.push(TypeCode::ObjectEnd as u8);
            }
            buf
        }

        let reader = WireReader::new(2);
        let buf = nest(2);
        let err = reader.read_document(&buf, 0).unwrap_err();
        assert!(matches!(err, Error::DepthExceeded { .. }));

        let reader = WireReader::new(2);
        let buf = nest(1);
        reader.read_document(&buf, 0).unwrap();
    }

    #[test]
    fn idempotent_round_trip_through_canonical_encode() {
        let reader = WireReader::new(64);
        let msg = reader.read_document(&sample_document(), 0).unwrap();
        let reencoded = encode_document(&msg);
        let msg2 = reader.read_document(&reencoded, 0).unwrap();
        assert_eq!(msg.type_name, msg2.type_name);
        assert_eq!(msg.fields, msg2.fields);
    }

    #[test]
    fn untagged_document_uses_empty_field_names() {
        let mut buf = Vec::new();
        buf.push(TypeCode::Int64 as u8);
        buf.extend_from_slice(&1i64.to_le_bytes());
        buf.push(TypeCode::Int64 as u8);
        buf.extend_from_slice(&2i64.to_le_bytes());

        let reader = WireReader::new(64);
        let msg = reader.read_document(&buf, 0).unwrap();
        assert_eq!(msg.fields[0].name, "");
        assert_eq!(msg.fields[1].name, "#2");
    }

    #[test]
    fn millis_timestamp_normalizes_to_nanos() {
        let mut buf = Vec::new();
        buf.push(TypeCode::TimestampMillis as u8);
        buf.extend_from_slice(&1_000i64.to_le_bytes());
        let reader = WireReader::new(64);
        let msg = reader.read_document(&buf, 0).unwrap();
        assert_eq!(msg.fields[0].value, Value::Timestamp(1_000_000_000));
    }

    #[test]
    fn nested_event_object_round_trips() {
        let mut buf = Vec::new();
        buf.push(TypeCode::FieldNameShort as u8);
        buf.push(5);
        buf.extend_from_slice(b"child");
        buf.push(TypeCode::EventObject as u8);
        buf.push(TypeCode::FieldNameShort as u8);
        buf.push(1);
        buf.extend_from_slice(b"x");
        buf.push(TypeCode::Int64 as u8);
        buf.extend_from_slice(&42i64.to_le_bytes());
        buf.push(TypeCode::ObjectEnd as u8);

        let reader = WireReader::new(64);
        let msg = reader.read_document(&buf, 0).unwrap();
        match &msg.fields[0].value {
            Value::Nested(inner) => {
                assert_eq!(inner.fields[0].name, "x");
                assert_eq!(inner.fields[0].value, Value::Int64(42));
            }
            other => panic!("expected nested message, got {other:?}"),
        }
    }
}
