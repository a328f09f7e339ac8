//! Schema extraction and lookup: turns Java-family class definitions — source text
//! or compiled bytecode — into [`SchemaDef`]s the fixed-layout decoders use.

pub mod bytecode;
pub mod parser;

use std::collections::HashMap;
use std::path::Path;

use crate::config::EncodingOverride;
use crate::error::Result;

/// One field declared by a schema, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaField {
    /// The field's name as declared in the source or bytecode.
    pub name: String,
    /// The field's declared type name (`int`, `long`, `java.lang.String`, ...).
    pub type_name: String,
    /// Explicit tag id from `@XField(id=N)`, when present.
    pub tag_id: Option<i64>,
    /// Explicit byte offset from `@SbeField(offset=N)`, when present.
    pub sbe_offset: Option<u32>,
    /// Explicit byte length from `@SbeField(length=M)`, when present.
    pub sbe_length: Option<u32>,
}

/// One field of an SBE message header, in the order it is written on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SbeHeaderField {
    /// The fixed-block byte length of the message body that follows the header.
    BlockLength,
    /// Selects which [`SchemaDef`] decodes the message body.
    TemplateId,
    /// An opaque schema-set identifier.
    SchemaId,
    /// The schema version.
    Version,
}

/// The default SBE header field order, used when a schema marks `has_sbe_header`
/// without an explicit [`SchemaDef::sbe_header_order`].
pub const DEFAULT_SBE_HEADER_ORDER: [SbeHeaderField; 4] = [
    SbeHeaderField::BlockLength,
    SbeHeaderField::TemplateId,
    SbeHeaderField::SchemaId,
    SbeHeaderField::Version,
];

/// A class's full schema: which encoding it uses and its ordered fields.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDef {
    /// The fully-qualified or simple class name this schema describes.
    pub class_name: String,
    /// The SBE `template_id` this class is registered under, when known.
    pub template_id: Option<u16>,
    /// Which encoding this class's instances use.
    pub encoding: EncodingOverride,
    /// Declared fields, in declaration order.
    pub fields: Vec<SchemaField>,
    /// Whether SBE payloads of this class are prefixed by a message header.
    pub has_sbe_header: bool,
    /// Explicit SBE header field order; `None` means
    /// [`DEFAULT_SBE_HEADER_ORDER`] when `has_sbe_header` is set.
    pub sbe_header_order: Option<Vec<SbeHeaderField>>,
}

impl SchemaDef {
    /// The SBE header field order to use, applying the default when
    /// [`SchemaDef::sbe_header_order`] is unset.
    pub fn effective_sbe_header_order(&self) -> Vec<SbeHeaderField> {
        self.sbe_header_order
            .clone()
            .unwrap_or_else(|| DEFAULT_SBE_HEADER_ORDER.to_vec())
    }
}

impl SchemaDef {
    /// Looks up a field by its explicit tag id.
    pub fn field_by_tag(&self, tag_id: i64) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.tag_id == Some(tag_id))
    }
}

/// Holds every [`SchemaDef`] discovered during a load pass, indexed by class name
/// and by SBE template id.
///
/// Mutable while schemas are being added; call [`SchemaRegistry::freeze`] once
/// loading completes to make lookups stable for concurrent readers sharing a
/// `ReaderSession`.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    by_name: HashMap<String, SchemaDef>,
    by_template_id: HashMap<u16, String>,
    frozen: bool,
}

impl SchemaRegistry {
    /// An empty, unfrozen registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a schema. Source-derived schemas always take priority over
    /// bytecode-derived ones for the same class name: call this with source-derived
    /// definitions last, or use [`SchemaRegistry::add_preferring_source`].
    ///
    /// # Panics
    /// Panics if the registry has already been [`frozen`](SchemaRegistry::freeze).
    pub fn add(&mut self, schema: SchemaDef) {
        assert!(!self.frozen, "cannot add schemas to a frozen registry");
        if let Some(template_id) = schema.template_id {
            self.by_template_id.insert(template_id, schema.class_name.clone());
        }
        self.by_name.insert(schema.class_name.clone(), schema);
    }

    /// Adds `schema`, but only if no schema for this class name is already present,
    /// or the existing one did not come from source. Bytecode-derived schemas are
    /// tagged by the caller passing `from_source = false`.
    pub fn add_preferring_source(&mut self, schema: SchemaDef, from_source: bool, sources: &mut HashMap<String, bool>) {
        let existing_from_source = sources.get(&schema.class_name).copied().unwrap_or(false);
        if existing_from_source && !from_source {
            log::debug!(
                "schema {}: keeping source-derived definition, discarding bytecode-derived one",
                schema.class_name
            );
            return;
        }
        sources.insert(schema.class_name.clone(), from_source);
        self.add(schema);
    }

    /// Marks this registry read-only. Subsequent [`SchemaRegistry::add`] calls panic.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Looks up a schema by class name.
    pub fn query(&self, class_name: &str) -> Option<&SchemaDef> {
        self.by_name.get(class_name)
    }

    /// Looks up a schema by its SBE `template_id`.
    pub fn query_by_template_id(&self, template_id: u16) -> Option<&SchemaDef> {
        self.by_template_id
            .get(&template_id)
            .and_then(|name| self.by_name.get(name))
    }

    /// The schema to use for a fixed-layout payload when nothing else identifies its
    /// class: the sole registered schema, if exactly one is registered.
    ///
    /// Returns `None` when the registry is empty or holds more than one schema,
    /// since there is then no way to choose among them without an SBE header
    /// `template_id` or an explicit field/class selection from the caller.
    pub fn default_schema(&self) -> Option<&SchemaDef> {
        if self.by_name.len() == 1 {
            self.by_name.values().next()
        } else {
            None
        }
    }

    /// The number of distinct classes registered.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether no schemas have been registered.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Loads schemas from `path`: a single `.java`/`.kt`/`.scala`/`.class` file, or a
    /// directory scanned recursively for all four.
    ///
    /// Source-derived definitions always win over bytecode-derived ones for the
    /// same class name, regardless of scan order. `encoding_hint`, when given,
    /// overrides the encoding each loaded schema would otherwise detect (from its
    /// source imports, or `SelfDescribingWire` by default for bytecode).
    ///
    /// # Errors
    /// Returns [`Error::Io`](crate::error::Error::Io) on a traversal or read
    /// failure, or [`Error::Schema`](crate::error::Error::Schema) if a source file
    /// or class file fails to parse.
    pub fn load(&mut self, path: impl AsRef<Path>, encoding_hint: Option<EncodingOverride>) -> Result<()> {
        let mut sources: HashMap<String, bool> = HashMap::new();
        for file in collect_files(path.as_ref())? {
            match file.extension().and_then(|ext| ext.to_str()) {
                Some("java") | Some("kt") | Some("scala") => {
                    let text = std::fs::read_to_string(&file)?;
                    for mut schema in parser::parse_source(&text)? {
                        if let Some(hint) = encoding_hint {
                            schema.encoding = hint;
                        }
                        self.add_preferring_source(schema, true, &mut sources);
                    }
                }
                Some("class") => {
                    let bytes = std::fs::read(&file)?;
                    let mut schema = bytecode::parse_class(&bytes)?;
                    if let Some(hint) = encoding_hint {
                        schema.encoding = hint;
                    }
                    self.add_preferring_source(schema, false, &mut sources);
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn collect_files(path: &Path) -> Result<Vec<std::path::PathBuf>> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut out = Vec::new();
    let mut stack = vec![path.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let entry_path = entry.path();
            if entry_path.is_dir() {
                stack.push(entry_path);
            } else {
                out.push(entry_path);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str, template_id: Option<u16>) -> SchemaDef {
        SchemaDef {
            class_name: name.to_owned(),
            template_id,
            encoding: EncodingOverride::Sbe,
            fields: vec![],
            has_sbe_header: false,
            sbe_header_order: None,
        }
    }

    #[test]
    fn query_by_name_and_template_id() {
        let mut reg = SchemaRegistry::new();
        reg.add(sample("com.example.Order", Some(7)));
        assert!(reg.query("com.example.Order").is_some());
        assert_eq!(reg.query_by_template_id(7).unwrap().class_name, "com.example.Order");
        assert!(reg.query_by_template_id(8).is_none());
    }

    #[test]
    fn source_preferred_over_bytecode() {
        let mut reg = SchemaRegistry::new();
        let mut sources = HashMap::new();
        let mut from_bytecode = sample("com.example.Order", Some(1));
        from_bytecode.fields.push(SchemaField {
            name: "stale".into(),
            type_name: "int".into(),
            tag_id: None,
            sbe_offset: None,
            sbe_length: None,
        });
        reg.add_preferring_source(from_bytecode, false, &mut sources);

        let from_source = sample("com.example.Order", Some(1));
        reg.add_preferring_source(from_source.clone(), true, &mut sources);
        assert_eq!(reg.query("com.example.Order").unwrap(), &from_source);

        // A later bytecode definition must not overwrite the source-derived one.
        let mut stale_bytecode = sample("com.example.Order", Some(1));
        stale_bytecode.encoding = EncodingOverride::CompactTagged;
        reg.add_preferring_source(stale_bytecode, false, &mut sources);
        assert_eq!(reg.query("com.example.Order").unwrap(), &from_source);
    }

    #[test]
    #[should_panic(expected = "frozen")]
    fn frozen_registry_rejects_add() {
        let mut reg = SchemaRegistry::new();
        reg.freeze();
        reg.add(sample("x", None));
    }

    #[test]
    fn default_schema_only_when_registry_has_exactly_one() {
        let mut reg = SchemaRegistry::new();
        assert!(reg.default_schema().is_none());
        reg.add(sample("com.example.Order", None));
        assert_eq!(reg.default_schema().unwrap().class_name, "com.example.Order");
        reg.add(sample("com.example.Quote", None));
        assert!(reg.default_schema().is_none());
    }

    #[test]
    fn load_directory_merges_source_and_bytecode_preferring_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Order.java"),
            "public class Order {\n  private long orderId;\n}\n",
        )
        .unwrap();

        let mut reg = SchemaRegistry::new();
        reg.load(dir.path(), None).unwrap();
        assert_eq!(reg.len(), 1);
        let schema = reg.query("Order").unwrap();
        assert_eq!(schema.fields[0].name, "orderId");
    }

    #[test]
    fn load_applies_encoding_hint_override() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Order.java"),
            "public class Order {\n  private long orderId;\n}\n",
        )
        .unwrap();

        let mut reg = SchemaRegistry::new();
        reg.load(dir.path(), Some(EncodingOverride::CompactTagged)).unwrap();
        assert_eq!(reg.query("Order").unwrap().encoding, EncodingOverride::CompactTagged);
    }
}
