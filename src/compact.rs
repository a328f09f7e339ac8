//! The compact tagged protocol decoder: a zigzag-varint, field-id-tagged format.
//!
//! Every field is prefixed by a 1-byte `(delta << 4) | type_nibble` header. Unlike
//! SBE, the wire itself carries each value's type; the schema only resolves a field
//! id to a name and, for nested structs, to the class whose schema continues the
//! decode.

use crate::error::{Error, Location, Result};
use crate::schema::{SchemaDef, SchemaRegistry};
use crate::stopbit;
use crate::value::{FieldBuilder, Message, MessageKind, Value};

const TYPE_BOOL_TRUE: u8 = 1;
const TYPE_BOOL_FALSE: u8 = 2;
const TYPE_I8: u8 = 3;
const TYPE_I16: u8 = 4;
const TYPE_I32: u8 = 5;
const TYPE_I64: u8 = 6;
const TYPE_F64: u8 = 7;
const TYPE_STRING: u8 = 8;
const TYPE_BINARY: u8 = 9;
const TYPE_LIST: u8 = 10;
const TYPE_SET: u8 = 11;
const TYPE_MAP: u8 = 12;
const TYPE_STRUCT: u8 = 13;
const TYPE_STOP: u8 = 14;

/// The compact tagged protocol decoder.
#[derive(Debug, Clone, Copy)]
pub struct CompactTaggedDecoder {
    max_depth: u32,
}

impl CompactTaggedDecoder {
    /// Creates a decoder that fails with [`Error::DepthExceeded`] past `max_depth`
    /// levels of nested structs.
    pub fn new(max_depth: u32) -> Self {
        Self { max_depth }
    }

    /// Decodes one top-level document.
    ///
    /// `strict` controls whether an unresolvable field id is fatal
    /// ([`Error::UnknownFieldId`]) or skipped with a `log::warn!` record.
    ///
    /// # Errors
    /// Returns [`Error::MalformedHeader`], [`Error::Truncated`],
    /// [`Error::InvalidUtf8`], [`Error::UnknownFieldId`] (strict mode only), or
    /// [`Error::DepthExceeded`].
    pub fn decode(
        &self,
        payload: &[u8],
        schema: Option<&SchemaDef>,
        registry: &SchemaRegistry,
        strict: bool,
        file_offset: u64,
    ) -> Result<Message> {
        let mut cur = Cursor::new(payload, file_offset);
        let fields = self.decode_struct_body(&mut cur, schema, registry, strict, 1)?;
        Ok(Message {
            index: 0,
            absolute_offset: file_offset,
            kind: MessageKind::Data,
            type_name: schema.map(|s| s.class_name.clone()).unwrap_or_default(),
            fields,
            decode_error: None,
        })
    }

    fn decode_struct_body(
        &self,
        cur: &mut Cursor<'_>,
        schema: Option<&SchemaDef>,
        registry: &SchemaRegistry,
        strict: bool,
        depth: u32,
    ) -> Result<Vec<crate::value::Field>> {
        let mut builder = FieldBuilder::default();
        let mut previous_id: i64 = 0;
        loop {
            let location = cur.location();
            let header = cur.read_u8()?;
            let delta = (header >> 4) & 0x0F;
            let type_nibble = header & 0x0F;

            if type_nibble == TYPE_STOP {
                break;
            }

            let field_id = if delta != 0 {
                previous_id + delta as i64
            } else {
                let (id, consumed) = stopbit::decode_i64(&cur.data[cur.pos..], location)?;
                cur.pos += consumed;
                id
            };
            previous_id = field_id;

            let field_def = schema.and_then(|s| s.field_by_tag(field_id));
            let value = self.decode_value(cur, type_nibble, field_def, registry, strict, depth, location)?;

            match field_def {
                Some(def) => builder.push(def.name.clone(), value, Some(def.type_name.clone())),
                None => {
                    if strict {
                        return Err(Error::UnknownFieldId {
                            field_id,
                            location,
                        });
                    }
                    log::warn!("compact tagged: skipping unknown field id {field_id} at {location}");
                }
            }
        }
        Ok(builder.into_fields())
    }

    fn decode_value(
        &self,
        cur: &mut Cursor<'_>,
        type_nibble: u8,
        field_def: Option<&crate::schema::SchemaField>,
        registry: &SchemaRegistry,
        strict: bool,
        depth: u32,
        location: Location,
    ) -> Result<Value> {
        match type_nibble {
            TYPE_BOOL_TRUE => Ok(Value::Bool(true)),
            TYPE_BOOL_FALSE => Ok(Value::Bool(false)),
            TYPE_I8 => Ok(Value::Int64(cur.read_u8()? as i8 as i64)),
            TYPE_I16 | TYPE_I32 | TYPE_I64 => {
                let (value, consumed) = stopbit::decode_i64(&cur.data[cur.pos..], location)?;
                cur.pos += consumed;
                Ok(Value::Int64(value))
            }
            TYPE_F64 => Ok(Value::Float64(cur.read_f64()?)),
            TYPE_STRING => {
                let len = cur.read_varint_len(location)?;
                Ok(Value::Text(cur.read_utf8(len)?))
            }
            TYPE_BINARY => {
                let len = cur.read_varint_len(location)?;
                Ok(Value::Bytes(cur.read_exact(len)?.to_vec()))
            }
            TYPE_LIST | TYPE_SET => {
                let (size_nibble, elem_type) = cur.read_nibble_pair()?;
                let size = self.read_collection_size(cur, size_nibble, location)?;
                let mut items = Vec::with_capacity(size);
                for _ in 0..size {
                    let item_location = cur.location();
                    items.push(self.decode_value(cur, elem_type, None, registry, strict, depth, item_location)?);
                }
                Ok(if type_nibble == TYPE_LIST {
                    Value::List(items)
                } else {
                    Value::Set(items)
                })
            }
            TYPE_MAP => {
                let (key_type, value_type) = cur.read_nibble_pair()?;
                let size = cur.read_varint_len(location)?;
                let mut pairs = Vec::with_capacity(size);
                for _ in 0..size {
                    let key_loc = cur.location();
                    let key = self.decode_value(cur, key_type, None, registry, strict, depth, key_loc)?;
                    let value_loc = cur.location();
                    let value = self.decode_value(cur, value_type, None, registry, strict, depth, value_loc)?;
                    pairs.push((key, value));
                }
                Ok(Value::Map(pairs))
            }
            TYPE_STRUCT => {
                let next_depth = depth + 1;
                if next_depth > self.max_depth {
                    return Err(Error::DepthExceeded { location });
                }
                let nested_schema = field_def.and_then(|f| registry.query(&f.type_name));
                let nested_name = nested_schema.map(|s| s.class_name.clone()).unwrap_or_default();
                let fields = self.decode_struct_body(cur, nested_schema, registry, strict, next_depth)?;
                Ok(Value::Nested(Box::new(Message {
                    index: 0,
                    absolute_offset: cur.file_offset,
                    kind: MessageKind::Data,
                    type_name: nested_name,
                    fields,
                    decode_error: None,
                })))
            }
            other => Err(Error::MalformedHeader {
                location,
                message: format!("unrecognized compact-tagged type nibble {other}"),
            }),
        }
    }

    fn read_collection_size(&self, cur: &mut Cursor<'_>, size_nibble: u8, location: Location) -> Result<usize> {
        if size_nibble == 0x0F {
            cur.read_varint_len(location)
        } else {
            Ok(size_nibble as usize)
        }
    }
}

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

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_exact(1)?[0])
    }

    fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.read_exact(8)?.try_into().unwrap()))
    }

    fn read_nibble_pair(&mut self) -> Result<(u8, u8)> {
        let byte = self.read_u8()?;
        Ok((byte >> 4, byte & 0x0F))
    }

    fn read_varint_len(&mut self, location: Location) -> Result<usize> {
        let (value, consumed) = stopbit::decode_u64(&self.data[self.pos..], location)?;
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
