//! Chooses a decoder for a raw excerpt payload and normalizes its result.
//!
//! Detection looks only at the payload's own first byte and the configured
//! [`EncodingOverride`]; it never buffers or re-reads bytes already handed to a
//! decoder.

use crate::config::{Config, EncodingOverride};
use crate::error::{Error, Result};
use crate::schema::{SchemaDef, SchemaRegistry};
use crate::typecode::TypeCode;
use crate::value::{DecodeErrorInfo, Message, MessageKind};
use crate::{compact::CompactTaggedDecoder, sbe::SbeDecoder, wire::WireReader};

/// Selects among [`WireReader`], [`SbeDecoder`], and [`CompactTaggedDecoder`] for
/// each payload, and assembles the final [`Message`] with container-supplied
/// `index`/`kind`/`absolute_offset`.
pub struct DecoderDispatcher {
    wire: WireReader,
    sbe: SbeDecoder,
    compact: CompactTaggedDecoder,
    encoding_override: EncodingOverride,
    strict: bool,
}

impl DecoderDispatcher {
    /// Builds a dispatcher from `config`, constructing each inner decoder with the
    /// configured nesting depth.
    pub fn new(config: &Config) -> Self {
        Self {
            wire: WireReader::new(config.max_nesting_depth()),
            sbe: SbeDecoder,
            compact: CompactTaggedDecoder::new(config.max_nesting_depth()),
            encoding_override: config.encoding_override(),
            strict: config.strict(),
        }
    }

    /// Decodes `payload`, choosing a decoder per [`EncodingOverride`] or, when
    /// `Auto`, per the payload's own first byte (see module docs).
    ///
    /// Fixed-layout decoders (SBE, compact tagged) need a schema to drive the read
    /// when detection doesn't land on the self-describing wire; `registry` supplies
    /// it via [`SchemaRegistry::default_schema`] unless the payload's own SBE
    /// header resolves a `template_id` directly.
    ///
    /// In non-strict mode a decode failure does not propagate: it comes back as an
    /// empty [`Message`] carrying [`Message::decode_error`], so iteration over a
    /// file can continue past one bad excerpt. In strict mode the error propagates
    /// to the caller instead.
    ///
    /// # Errors
    /// In strict mode, whichever inner decoder's error fired, or [`Error::Schema`]
    /// if a fixed-layout decode is required but no unambiguous default schema
    /// exists. Never errors in non-strict mode.
    pub fn dispatch(&self, payload: &[u8], registry: &SchemaRegistry, file_offset: u64) -> Result<Message> {
        match self.dispatch_inner(payload, registry, file_offset) {
            Ok(message) => Ok(message),
            Err(error) if !self.strict => Ok(Message {
                index: 0,
                absolute_offset: file_offset,
                kind: MessageKind::Data,
                type_name: String::new(),
                fields: Vec::new(),
                decode_error: Some(DecodeErrorInfo { error }),
            }),
            Err(error) => Err(error),
        }
    }

    fn dispatch_inner(&self, payload: &[u8], registry: &SchemaRegistry, file_offset: u64) -> Result<Message> {
        match self.encoding_override {
            EncodingOverride::SelfDescribing => self.wire.read_document(payload, file_offset),
            EncodingOverride::Sbe => {
                let schema = self.default_schema(registry)?;
                self.sbe.decode(payload, schema, registry, file_offset)
            }
            EncodingOverride::CompactTagged => {
                let schema = self.default_schema(registry)?;
                self.compact.decode(payload, Some(schema), registry, self.strict, file_offset)
            }
            EncodingOverride::Auto => self.dispatch_auto(payload, registry, file_offset),
        }
    }

    fn dispatch_auto(&self, payload: &[u8], registry: &SchemaRegistry, file_offset: u64) -> Result<Message> {
        if starts_self_describing_document(payload) {
            return self.wire.read_document(payload, file_offset);
        }

        let schema = match self.default_schema(registry) {
            Ok(schema) => schema,
            // No usable schema and the payload didn't look self-describing either:
            // fall back to the wire reader, which will surface a precise
            // `UnknownTypeCode` rather than a vague "no schema" error.
            Err(_) => return self.wire.read_document(payload, file_offset),
        };
        match schema.encoding {
            EncodingOverride::CompactTagged => {
                self.compact.decode(payload, Some(schema), registry, self.strict, file_offset)
            }
            _ => self.sbe.decode(payload, schema, registry, file_offset),
        }
    }

    fn default_schema<'a>(&self, registry: &'a SchemaRegistry) -> Result<&'a SchemaDef> {
        registry.default_schema().ok_or_else(|| Error::Schema {
            message: "no unambiguous default schema: register exactly one schema, or select \
                      one explicitly before decoding fixed-layout payloads"
                .to_owned(),
        })
    }
}

fn starts_self_describing_document(payload: &[u8]) -> bool {
    let Some(&first) = payload.first() else {
        return true; // an empty payload decodes to an empty message either way
    };
    match TypeCode::try_from(first) {
        Ok(code) => code.starts_tagged_document() || code == TypeCode::SequenceStart,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::schema::SchemaField;
    use crate::stopbit;
    use crate::value::Value;

    #[test]
    fn auto_detects_self_describing_payload_by_first_byte() {
        let mut payload = vec![TypeCode::FieldNameShort as u8, 2];
        payload.extend_from_slice(b"id");
        payload.push(TypeCode::Int64 as u8);
        payload.extend_from_slice(&7i64.to_le_bytes());

        let dispatcher = DecoderDispatcher::new(&Config::default());
        let msg = dispatcher.dispatch(&payload, &SchemaRegistry::new(), 0).unwrap();
        assert_eq!(msg.field("id").unwrap().value, Value::Int64(7));
    }

    #[test]
    fn auto_falls_back_to_sole_registered_schema_for_sbe() {
        let mut registry = SchemaRegistry::new();
        registry.add(crate::schema::SchemaDef {
            class_name: "Order".to_owned(),
            template_id: None,
            encoding: EncodingOverride::Sbe,
            fields: vec![SchemaField {
                name: "a".to_owned(),
                type_name: "int32".to_owned(),
                tag_id: None,
                sbe_offset: None,
                sbe_length: None,
            }],
            has_sbe_header: false,
            sbe_header_order: None,
        });

        let payload = 42i32.to_le_bytes().to_vec();
        let dispatcher = DecoderDispatcher::new(&Config::default());
        let msg = dispatcher.dispatch(&payload, &registry, 0).unwrap();
        assert_eq!(msg.field("a").unwrap().value, Value::Int64(42));
    }

    #[test]
    fn explicit_override_takes_precedence_over_detection() {
        let mut registry = SchemaRegistry::new();
        registry.add(crate::schema::SchemaDef {
            class_name: "Order".to_owned(),
            template_id: None,
            encoding: EncodingOverride::CompactTagged,
            fields: vec![SchemaField {
                name: "a".to_owned(),
                type_name: "int32".to_owned(),
                tag_id: Some(1),
                sbe_offset: None,
                sbe_length: None,
            }],
            has_sbe_header: false,
            sbe_header_order: None,
        });

        let mut payload = vec![(1u8 << 4) | 5]; // delta=1, type_nibble=5 (i32 zigzag varint)
        stopbit::encode_i64(9, &mut payload);
        payload.push(14); // stop

        let config = ConfigBuilder::default()
            .encoding_override(EncodingOverride::CompactTagged)
            .build()
            .unwrap();
        let dispatcher = DecoderDispatcher::new(&config);
        let msg = dispatcher.dispatch(&payload, &registry, 0).unwrap();
        assert_eq!(msg.field("a").unwrap().value, Value::Int64(9));
    }

    #[test]
    fn ambiguous_schema_without_override_errors() {
        let mut registry = SchemaRegistry::new();
        registry.add(crate::schema::SchemaDef {
            class_name: "A".to_owned(),
            template_id: None,
            encoding: EncodingOverride::Sbe,
            fields: vec![],
            has_sbe_header: false,
            sbe_header_order: None,
        });
        registry.add(crate::schema::SchemaDef {
            class_name: "B".to_owned(),
            template_id: None,
            encoding: EncodingOverride::Sbe,
            fields: vec![],
            has_sbe_header: false,
            sbe_header_order: None,
        });

        let config = ConfigBuilder::default()
            .encoding_override(EncodingOverride::Sbe)
            .strict(true)
            .build()
            .unwrap();
        let dispatcher = DecoderDispatcher::new(&config);
        let err = dispatcher.dispatch(&[0, 0, 0, 0], &registry, 0).unwrap_err();
        assert!(matches!(err, Error::Schema { .. }));
    }

    #[test]
    fn non_strict_decode_failure_attaches_decode_error_instead_of_propagating() {
        let config = Config::default(); // strict: false
        let dispatcher = DecoderDispatcher::new(&config);
        // 0xFF is not a valid TypeCode and there is no default schema to fall back
        // to, so the wire reader's own UnknownTypeCode error is what gets caught.
        let msg = dispatcher.dispatch(&[0xFF], &SchemaRegistry::new(), 0).unwrap();
        assert!(msg.fields.is_empty());
        assert!(matches!(msg.decode_error, Some(_)));
    }
}
