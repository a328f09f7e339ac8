//! The Simple Binary Encoding (SBE) fixed-layout decoder.
//!
//! Reads primitives in schema-declared order at fixed, native-little-endian
//! widths. Unlike the self-describing wire and the compact tagged protocol, SBE
//! payloads carry no type markers of their own — every byte's meaning comes
//! entirely from the [`SchemaDef`] driving the read.

use crate::error::{Error, Location, Result};
use crate::schema::{SbeHeaderField, SchemaDef, SchemaRegistry};
use crate::value::{FieldBuilder, Message, MessageKind, Value};

/// The SBE fixed-layout decoder.
#[derive(Debug, Clone, Copy)]
pub struct SbeDecoder;

impl SbeDecoder {
    /// Decodes one SBE payload using `schema`, or — when `schema.has_sbe_header`
    /// is set — first consumes the message header and looks up the template from
    /// `registry`.
    ///
    /// # Errors
    /// Returns [`Error::PayloadTooShort`], [`Error::InvalidUtf8`], or
    /// [`Error::UnknownTemplate`].
    pub fn decode(
        &self,
        payload: &[u8],
        schema: &SchemaDef,
        registry: &SchemaRegistry,
        file_offset: u64,
    ) -> Result<Message> {
        let mut cur = Cursor::new(payload, file_offset);
        let (type_name, fields_schema) = if schema.has_sbe_header {
            let template_id = read_header(&mut cur, schema)?;
            let resolved = registry.query_by_template_id(template_id).ok_or(Error::UnknownTemplate {
                template_id,
                location: cur.location(),
            })?;
            (resolved.class_name.clone(), &resolved.fields)
        } else {
            (schema.class_name.clone(), &schema.fields)
        };

        let mut builder = FieldBuilder::default();
        for field in fields_schema {
            let value = read_field(&mut cur, field)?;
            builder.push(field.name.clone(), value, Some(field.type_name.clone()));
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
}

fn read_header(cur: &mut Cursor<'_>, schema: &SchemaDef) -> Result<u16> {
    let mut template_id = None;
    for field in schema.effective_sbe_header_order() {
        let value = cur.read_u16("<sbe-header>")?;
        if matches!(field, SbeHeaderField::TemplateId) {
            template_id = Some(value);
        }
    }
    template_id.ok_or(Error::MalformedHeader {
        location: cur.location(),
        message: "SBE header order does not include a template_id field".to_owned(),
    })
}

fn read_field(cur: &mut Cursor<'_>, field: &crate::schema::SchemaField) -> Result<Value> {
    if let Some(offset) = field.sbe_offset {
        cur.seek(offset as usize, &field.name)?;
    }
    match primitive_kind(&field.type_name) {
        Some(Primitive::Int8) => Ok(Value::Int64(cur.read_i8(&field.name)? as i64)),
        Some(Primitive::Int16) => Ok(Value::Int64(cur.read_i16(&field.name)? as i64)),
        Some(Primitive::Int32) => Ok(Value::Int64(cur.read_i32(&field.name)? as i64)),
        Some(Primitive::Int64) => Ok(Value::Int64(cur.read_i64(&field.name)?)),
        Some(Primitive::UInt8) => Ok(Value::UInt64(cur.read_u8(&field.name)? as u64)),
        Some(Primitive::UInt16) => Ok(Value::UInt64(cur.read_u16(&field.name)? as u64)),
        Some(Primitive::UInt32) => Ok(Value::UInt64(cur.read_u32(&field.name)? as u64)),
        Some(Primitive::UInt64) => Ok(Value::UInt64(cur.read_u64(&field.name)?)),
        Some(Primitive::Float32) => Ok(Value::Float64(cur.read_f32(&field.name)? as f64)),
        Some(Primitive::Float64) => Ok(Value::Float64(cur.read_f64(&field.name)?)),
        Some(Primitive::Bool) => Ok(Value::Bool(cur.read_u8(&field.name)? != 0)),
        Some(Primitive::Uuid) => {
            let bytes = cur.read_exact(16, &field.name)?;
            let mut array = [0u8; 16];
            array.copy_from_slice(bytes);
            Ok(Value::Uuid(u128::from_be_bytes(array)))
        }
        Some(Primitive::Bytes) => {
            let len = read_explicit_or_prefixed_len(cur, field)?;
            Ok(Value::Bytes(cur.read_exact(len, &field.name)?.to_vec()))
        }
        Some(Primitive::Text) | None => {
            let len = read_explicit_or_prefixed_len(cur, field)?;
            let raw = cur.read_exact(len, &field.name)?;
            let text = std::str::from_utf8(raw)
                .map_err(|_| Error::InvalidUtf8 {
                    field_path: Some(field.name.clone()),
                    location: cur.location(),
                })?
                .trim_end_matches('\0')
                .to_owned();
            Ok(Value::Text(text))
        }
    }
}

/// A field with an explicit `sbe_length` is a fixed-width byte array at that width;
/// otherwise a 16-bit length prefix precedes the bytes, per §4.6.
fn read_explicit_or_prefixed_len(cur: &mut Cursor<'_>, field: &crate::schema::SchemaField) -> Result<usize> {
    match field.sbe_length {
        Some(len) => Ok(len as usize),
        None => Ok(cur.read_u16(&field.name)? as usize),
    }
}

enum Primitive {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Bool,
    Uuid,
    Bytes,
    Text,
}

fn primitive_kind(type_name: &str) -> Option<Primitive> {
    match type_name.trim_end_matches("[]") {
        "byte" | "int8" => Some(Primitive::Int8),
        "short" | "int16" => Some(Primitive::Int16),
        "int" | "int32" => Some(Primitive::Int32),
        "long" | "int64" => Some(Primitive::Int64),
        "uint8" => Some(Primitive::UInt8),
        "uint16" | "char" => Some(Primitive::UInt16),
        "uint32" => Some(Primitive::UInt32),
        "uint64" => Some(Primitive::UInt64),
        "float" | "float32" => Some(Primitive::Float32),
        "double" | "float64" => Some(Primitive::Float64),
        "boolean" | "bool" => Some(Primitive::Bool),
        "uuid" => Some(Primitive::Uuid),
        "bytes" | "byte[]" => Some(Primitive::Bytes),
        "string" | "String" | "java.lang.String" => Some(Primitive::Text),
        _ => None,
    }
}

/// A byte cursor specialized for fixed-layout reads, reporting [`Error::PayloadTooShort`]
/// keyed by field name rather than [`Error::Truncated`]'s raw byte count.
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

    fn seek(&mut self, pos: usize, field_name: &str) -> Result<()> {
        if pos > self.data.len() {
            return Err(Error::PayloadTooShort {
                field_name: field_name.to_owned(),
                location: self.location(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    fn read_exact(&mut self, n: usize, field_name: &str) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(Error::PayloadTooShort {
                field_name: field_name.to_owned(),
                location: self.location(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self, field_name: &str) -> Result<u8> {
        Ok(self.read_exact(1, field_name)?[0])
    }

    fn read_i8(&mut self, field_name: &str) -> Result<i8> {
        Ok(self.read_exact(1, field_name)?[0] as i8)
    }

    fn read_i16(&mut self, field_name: &str) -> Result<i16> {
        Ok(i16::from_le_bytes(self.read_exact(2, field_name)?.try_into().unwrap()))
    }

    fn read_u16(&mut self, field_name: &str) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_exact(2, field_name)?.try_into().unwrap()))
    }

    fn read_i32(&mut self, field_name: &str) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_exact(4, field_name)?.try_into().unwrap()))
    }

    fn read_u32(&mut self, field_name: &str) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_exact(4, field_name)?.try_into().unwrap()))
    }

    fn read_i64(&mut self, field_name: &str) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read_exact(8, field_name)?.try_into().unwrap()))
    }

    fn read_u64(&mut self, field_name: &str) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_exact(8, field_name)?.try_into().unwrap()))
    }

    fn read_f32(&mut self, field_name: &str) -> Result<f32> {
        Ok(f32::from_le_bytes(self.read_exact(4, field_name)?.try_into().unwrap()))
    }

    fn read_f64(&mut self, field_name: &str) -> Result<f64> {
        Ok(f64::from_le_bytes(self.read_exact(8, field_name)?.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncodingOverride;
    use crate::schema::SchemaField;

    fn field(name: &str, type_name: &str) -> SchemaField {
        SchemaField {
            name: name.to_owned(),
            type_name: type_name.to_owned(),
            tag_id: None,
            sbe_offset: None,
            sbe_length: None,
        }
    }

    fn schema(fields: Vec<SchemaField>) -> SchemaDef {
        SchemaDef {
            class_name: "ClassX".to_owned(),
            template_id: None,
            encoding: EncodingOverride::Sbe,
            fields,
            has_sbe_header: false,
            sbe_header_order: None,
        }
    }

    #[test]
    fn decodes_fixed_layout_int_int_string() {
        let schema = schema(vec![field("a", "int32"), field("b", "int64"), field("c", "string")]);
        let mut payload = Vec::new();
        payload.extend_from_slice(&42i32.to_le_bytes());
        payload.extend_from_slice(&99i64.to_le_bytes());
        payload.extend_from_slice(&3u16.to_le_bytes());
        payload.extend_from_slice(b"abc");

        let msg = SbeDecoder.decode(&payload, &schema, &SchemaRegistry::new(), 0).unwrap();
        assert_eq!(msg.field("a").unwrap().value, Value::Int64(42));
        assert_eq!(msg.field("b").unwrap().value, Value::Int64(99));
        assert_eq!(msg.field("c").unwrap().value, Value::Text("abc".to_owned()));
    }

    #[test]
    fn truncated_string_is_payload_too_short() {
        let schema = schema(vec![field("a", "int32"), field("c", "string")]);
        let mut payload = Vec::new();
        payload.extend_from_slice(&42i32.to_le_bytes());
        payload.extend_from_slice(&5u16.to_le_bytes());
        payload.extend_from_slice(b"ab"); // declares 5, only 2 present

        let err = SbeDecoder.decode(&payload, &schema, &SchemaRegistry::new(), 0).unwrap_err();
        assert!(matches!(
            err,
            Error::PayloadTooShort { field_name, .. } if field_name == "c"
        ));
    }

    #[test]
    fn sbe_header_selects_template_by_id() {
        let mut registry = SchemaRegistry::new();
        let mut target = schema(vec![field("a", "int32")]);
        target.template_id = Some(7);
        registry.add(target);

        let mut header_schema = schema(vec![]);
        header_schema.has_sbe_header = true;

        let mut payload = Vec::new();
        payload.extend_from_slice(&8u16.to_le_bytes()); // block_length
        payload.extend_from_slice(&7u16.to_le_bytes()); // template_id
        payload.extend_from_slice(&0u16.to_le_bytes()); // schema_id
        payload.extend_from_slice(&0u16.to_le_bytes()); // version
        payload.extend_from_slice(&167_772_167i32.to_le_bytes());

        let msg = SbeDecoder.decode(&payload, &header_schema, &registry, 0).unwrap();
        assert_eq!(msg.type_name, "ClassX");
        assert_eq!(msg.field("a").unwrap().value, Value::Int64(167_772_167));
    }

    #[test]
    fn unknown_template_id_errors() {
        let registry = SchemaRegistry::new();
        let mut header_schema = schema(vec![]);
        header_schema.has_sbe_header = true;

        let mut payload = Vec::new();
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.extend_from_slice(&99u16.to_le_bytes());
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.extend_from_slice(&0u16.to_le_bytes());

        let err = SbeDecoder.decode(&payload, &header_schema, &registry, 0).unwrap_err();
        assert!(matches!(err, Error::UnknownTemplate { template_id: 99, .. }));
    }

    #[test]
    fn explicit_sbe_offset_allows_sparse_layout() {
        let mut a = field("a", "int32");
        a.sbe_offset = Some(4);
        let schema = schema(vec![a]);
        let mut payload = vec![0u8; 4];
        payload.extend_from_slice(&55i32.to_le_bytes());

        let msg = SbeDecoder.decode(&payload, &schema, &SchemaRegistry::new(), 0).unwrap();
        assert_eq!(msg.field("a").unwrap().value, Value::Int64(55));
    }
}
