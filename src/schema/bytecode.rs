//! Extracts [`SchemaDef`]s from compiled Java `.class` files: constant pool, field
//! table, and the annotation/`InnerClasses` attributes schemas need.
//!
//! Used as the fallback source of schema information when no class definition
//! source text is available; [`crate::schema::SchemaRegistry::add_preferring_source`]
//! always lets a source-derived definition win over one parsed here.

use crate::config::EncodingOverride;
use crate::error::{Error, Location, Result};
use crate::schema::{SchemaDef, SchemaField};

const MAGIC: u32 = 0xCAFE_BABE;

const ACC_STATIC: u16 = 0x0008;
const ACC_TRANSIENT: u16 = 0x0080;
const ACC_SYNTHETIC: u16 = 0x1000;

const CONSTANT_UTF8: u8 = 1;
const CONSTANT_INTEGER: u8 = 3;
const CONSTANT_FLOAT: u8 = 4;
const CONSTANT_LONG: u8 = 5;
const CONSTANT_DOUBLE: u8 = 6;
const CONSTANT_CLASS: u8 = 7;
const CONSTANT_STRING: u8 = 8;
const CONSTANT_FIELDREF: u8 = 9;
const CONSTANT_METHODREF: u8 = 10;
const CONSTANT_INTERFACE_METHODREF: u8 = 11;
const CONSTANT_NAME_AND_TYPE: u8 = 12;
const CONSTANT_METHOD_HANDLE: u8 = 15;
const CONSTANT_METHOD_TYPE: u8 = 16;
const CONSTANT_DYNAMIC: u8 = 17;
const CONSTANT_INVOKE_DYNAMIC: u8 = 18;
const CONSTANT_MODULE: u8 = 19;
const CONSTANT_PACKAGE: u8 = 20;

#[derive(Debug, Clone)]
enum PoolEntry {
    Utf8(String),
    Class { name_index: u16 },
    Integer(i32),
    Other,
    /// Long/Double occupy two pool slots; the slot after one of these is unusable.
    Unusable,
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn u1(&mut self) -> Result<u8> {
        let b = *self.data.get(self.pos).ok_or_else(|| truncated(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    fn u2(&mut self) -> Result<u16> {
        let bytes = self
            .data
            .get(self.pos..self.pos + 2)
            .ok_or_else(|| truncated(self.pos))?;
        self.pos += 2;
        Ok(u16::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn u4(&mut self) -> Result<u32> {
        let bytes = self
            .data
            .get(self.pos..self.pos + 4)
            .ok_or_else(|| truncated(self.pos))?;
        self.pos += 4;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let slice = self
            .data
            .get(self.pos..self.pos + len)
            .ok_or_else(|| truncated(self.pos))?;
        self.pos += len;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> Result<()> {
        self.bytes(len).map(|_| ())
    }
}

fn truncated(pos: usize) -> Error {
    Error::Schema {
        message: format!("class file truncated at byte offset {pos}"),
    }
}

fn bad_magic(location: Location) -> Error {
    Error::UnreadableHeader {
        location,
        message: "not a Java class file (bad magic)".to_owned(),
    }
}

/// A parsed `.class` file's field table and constant pool, prior to schema
/// assembly.
struct ClassFile {
    pool: Vec<PoolEntry>,
    this_class_name: String,
    fields: Vec<FieldInfo>,
}

struct FieldInfo {
    name: String,
    descriptor: String,
    access_flags: u16,
    tag_id: Option<i64>,
    sbe_offset: Option<u32>,
    sbe_length: Option<u32>,
}

fn utf8_at(pool: &[PoolEntry], index: u16) -> Result<&str> {
    match pool.get(index as usize - 1) {
        Some(PoolEntry::Utf8(s)) => Ok(s),
        _ => Err(Error::Schema {
            message: format!("constant pool index {index} is not a Utf8 entry"),
        }),
    }
}

fn class_name_at(pool: &[PoolEntry], index: u16) -> Result<String> {
    match pool.get(index as usize - 1) {
        Some(PoolEntry::Class { name_index }) => Ok(utf8_at(pool, *name_index)?.replace('/', ".")),
        _ => Err(Error::Schema {
            message: format!("constant pool index {index} is not a Class entry"),
        }),
    }
}

fn parse_constant_pool(cursor: &mut Cursor) -> Result<Vec<PoolEntry>> {
    let count = cursor.u2()?;
    let mut pool = Vec::with_capacity(count as usize);
    let mut i = 1u16;
    while i < count {
        let tag = cursor.u1()?;
        let entry = match tag {
            CONSTANT_UTF8 => {
                let len = cursor.u2()?;
                let raw = cursor.bytes(len as usize)?;
                PoolEntry::Utf8(String::from_utf8_lossy(raw).into_owned())
            }
            CONSTANT_CLASS | CONSTANT_METHOD_TYPE | CONSTANT_MODULE | CONSTANT_PACKAGE => {
                let name_index = cursor.u2()?;
                if tag == CONSTANT_CLASS {
                    PoolEntry::Class { name_index }
                } else {
                    PoolEntry::Other
                }
            }
            CONSTANT_STRING => {
                cursor.u2()?;
                PoolEntry::Other
            }
            CONSTANT_FIELDREF
            | CONSTANT_METHODREF
            | CONSTANT_INTERFACE_METHODREF
            | CONSTANT_NAME_AND_TYPE
            | CONSTANT_DYNAMIC
            | CONSTANT_INVOKE_DYNAMIC => {
                cursor.skip(4)?;
                PoolEntry::Other
            }
            CONSTANT_INTEGER => PoolEntry::Integer(cursor.u4()? as i32),
            CONSTANT_FLOAT => {
                cursor.skip(4)?;
                PoolEntry::Other
            }
            CONSTANT_LONG | CONSTANT_DOUBLE => {
                cursor.skip(8)?;
                pool.push(PoolEntry::Other);
                i += 1;
                // Long/Double take two consecutive pool slots; the second is unusable.
                PoolEntry::Unusable
            }
            CONSTANT_METHOD_HANDLE => {
                cursor.skip(3)?;
                PoolEntry::Other
            }
            other => {
                return Err(Error::Schema {
                    message: format!("unrecognized constant pool tag {other}"),
                })
            }
        };
        pool.push(entry);
        i += 1;
    }
    Ok(pool)
}

/// Reads the relevant element-value pairs of one annotation entry, looking only for
/// `int`-valued elements named `id`, `offset`, or `length`. Skips everything else
/// with correct structural accounting so the cursor stays aligned.
fn parse_annotation(cursor: &mut Cursor, pool: &[PoolEntry]) -> Result<(Option<i64>, Option<u32>, Option<u32>)> {
    let type_index = cursor.u2()?;
    let descriptor = utf8_at(pool, type_index)?;
    let is_xfield = descriptor.contains("XField");
    let is_sbe_field = descriptor.contains("SbeField");

    let mut tag_id = None;
    let mut offset = None;
    let mut length = None;

    let pairs = cursor.u2()?;
    for _ in 0..pairs {
        let name_index = cursor.u2()?;
        let name = utf8_at(pool, name_index)?.to_owned();
        let value = parse_element_value(cursor, pool)?;
        if let Some(v) = value {
            if is_xfield && name == "id" {
                tag_id = Some(v as i64);
            } else if is_sbe_field && name == "offset" {
                offset = Some(v as u32);
            } else if is_sbe_field && name == "length" {
                length = Some(v as u32);
            }
        }
    }
    Ok((tag_id, offset, length))
}

/// Parses one `element_value` structure, returning its integer value when the tag
/// is a primitive `int` constant (`'I'`) and skipping every other shape correctly.
fn parse_element_value(cursor: &mut Cursor, pool: &[PoolEntry]) -> Result<Option<i32>> {
    let tag = cursor.u1()?;
    match tag {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' | b'c' => {
            let const_index = cursor.u2()?;
            if tag == b'I' {
                match pool.get(const_index as usize - 1) {
                    Some(PoolEntry::Integer(v)) => Ok(Some(*v)),
                    _ => Ok(None),
                }
            } else {
                Ok(None)
            }
        }
        b'e' => {
            cursor.skip(4)?; // enum_const_value: type_name_index + const_name_index
            Ok(None)
        }
        b'@' => {
            parse_annotation(cursor, pool)?; // nested annotation, values discarded
            Ok(None)
        }
        b'[' => {
            let count = cursor.u2()?;
            for _ in 0..count {
                parse_element_value(cursor, pool)?;
            }
            Ok(None)
        }
        other => Err(Error::Schema {
            message: format!("unrecognized annotation element_value tag {other}"),
        }),
    }
}

fn scan_attributes_for_annotations(
    cursor: &mut Cursor,
    pool: &[PoolEntry],
) -> Result<(Option<i64>, Option<u32>, Option<u32>)> {
    let attr_count = cursor.u2()?;
    let mut result = (None, None, None);
    for _ in 0..attr_count {
        let name_index = cursor.u2()?;
        let attr_len = cursor.u4()?;
        let name = utf8_at(pool, name_index)?.to_owned();
        let attr_start = cursor.pos;
        if name == "RuntimeVisibleAnnotations" || name == "RuntimeInvisibleAnnotations" {
            let num_annotations = cursor.u2()?;
            for _ in 0..num_annotations {
                let (tag, offset, length) = parse_annotation(cursor, pool)?;
                result.0 = result.0.or(tag);
                result.1 = result.1.or(offset);
                result.2 = result.2.or(length);
            }
        }
        // Always reposition by declared length, regardless of whether we parsed this
        // attribute's contents, so unrelated/unknown attributes can't desync us.
        cursor.pos = attr_start + attr_len as usize;
    }
    Ok(result)
}

fn parse_class_file(data: &[u8]) -> Result<ClassFile> {
    let mut cursor = Cursor::new(data);
    let magic = cursor.u4()?;
    if magic != MAGIC {
        return Err(bad_magic(Location::UNKNOWN));
    }
    cursor.skip(4)?; // minor_version, major_version
    let pool = parse_constant_pool(&mut cursor)?;
    cursor.skip(2)?; // access_flags
    let this_class = cursor.u2()?;
    let this_class_name = class_name_at(&pool, this_class)?;
    cursor.skip(2)?; // super_class
    let interfaces_count = cursor.u2()?;
    cursor.skip(2 * interfaces_count as usize)?;

    let fields_count = cursor.u2()?;
    let mut fields = Vec::with_capacity(fields_count as usize);
    for _ in 0..fields_count {
        let access_flags = cursor.u2()?;
        let name_index = cursor.u2()?;
        let descriptor_index = cursor.u2()?;
        let (tag_id, sbe_offset, sbe_length) = scan_attributes_for_annotations(&mut cursor, &pool)?;
        fields.push(FieldInfo {
            name: utf8_at(&pool, name_index)?.to_owned(),
            descriptor: utf8_at(&pool, descriptor_index)?.to_owned(),
            access_flags,
            tag_id,
            sbe_offset,
            sbe_length,
        });
    }

    Ok(ClassFile {
        pool,
        this_class_name,
        fields,
    })
}

/// Converts a JVM field descriptor (`J`, `I`, `Ljava/lang/String;`, `[I`, ...) into a
/// readable type name.
fn descriptor_to_type_name(descriptor: &str) -> String {
    match descriptor.as_bytes().first() {
        Some(b'B') => "byte".to_owned(),
        Some(b'C') => "char".to_owned(),
        Some(b'D') => "double".to_owned(),
        Some(b'F') => "float".to_owned(),
        Some(b'I') => "int".to_owned(),
        Some(b'J') => "long".to_owned(),
        Some(b'S') => "short".to_owned(),
        Some(b'Z') => "boolean".to_owned(),
        Some(b'[') => format!("{}[]", descriptor_to_type_name(&descriptor[1..])),
        Some(b'L') => descriptor
            .trim_start_matches('L')
            .trim_end_matches(';')
            .replace('/', "."),
        _ => descriptor.to_owned(),
    }
}

/// Parses one `.class` file's bytes into a [`SchemaDef`], defaulting its encoding to
/// [`EncodingOverride::Sbe`] when the class exposes `@SbeField` annotations, or
/// [`EncodingOverride::Auto`] otherwise (bytecode alone carries no wire-format
/// marker equivalent to a source file's imports).
///
/// # Errors
/// Returns [`Error::UnreadableHeader`] if the magic number doesn't match, or
/// [`Error::Schema`] if the constant pool or an annotation is malformed.
pub fn parse_class(data: &[u8]) -> Result<SchemaDef> {
    let class_file = parse_class_file(data)?;
    let mut fields = Vec::new();
    let mut any_sbe = false;
    for f in &class_file.fields {
        if f.access_flags & (ACC_STATIC | ACC_TRANSIENT | ACC_SYNTHETIC) != 0 {
            continue;
        }
        any_sbe |= f.sbe_offset.is_some();
        fields.push(SchemaField {
            name: f.name.clone(),
            type_name: descriptor_to_type_name(&f.descriptor),
            tag_id: f.tag_id,
            sbe_offset: f.sbe_offset,
            sbe_length: f.sbe_length,
        });
    }
    let _ = &class_file.pool; // retained for potential InnerClasses resolution by callers
    Ok(SchemaDef {
        class_name: class_file.this_class_name,
        template_id: None,
        encoding: if any_sbe {
            EncodingOverride::Sbe
        } else {
            EncodingOverride::Auto
        },
        fields,
        // Bytecode alone carries no marker equivalent to a source file's
        // `MessageHeader` import; header presence must come from a source-derived
        // schema or be configured explicitly by the caller.
        has_sbe_header: false,
        sbe_header_order: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a minimal synthetic `.class` file with one field and no annotations,
    /// enough to exercise the constant pool / field table plumbing without a real
    /// `javac` toolchain.
    fn build_minimal_class(class_name: &str, field_name: &str, descriptor: &str) -> Vec<u8> {
        let mut pool_entries: Vec<Vec<u8>> = Vec::new();
        let mut utf8 = |s: &str| -> u16 {
            let mut entry = vec![CONSTANT_UTF8];
            entry.extend_from_slice(&(s.len() as u16).to_be_bytes());
            entry.extend_from_slice(s.as_bytes());
            pool_entries.push(entry);
            pool_entries.len() as u16
        };
        let name_utf8 = utf8(class_name);
        let class_index;
        {
            let mut entry = vec![CONSTANT_CLASS];
            entry.extend_from_slice(&name_utf8.to_be_bytes());
            pool_entries.push(entry);
            class_index = pool_entries.len() as u16;
        }
        let object_name_utf8 = utf8("java/lang/Object");
        let object_class_index;
        {
            let mut entry = vec![CONSTANT_CLASS];
            entry.extend_from_slice(&object_name_utf8.to_be_bytes());
            pool_entries.push(entry);
            object_class_index = pool_entries.len() as u16;
        }
        let field_name_index = utf8(field_name);
        let descriptor_index = utf8(descriptor);

        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes()); // minor
        buf.extend_from_slice(&52u16.to_be_bytes()); // major (Java 8)
        buf.extend_from_slice(&((pool_entries.len() + 1) as u16).to_be_bytes());
        for entry in &pool_entries {
            buf.extend_from_slice(entry);
        }
        buf.extend_from_slice(&0u16.to_be_bytes()); // access_flags
        buf.extend_from_slice(&class_index.to_be_bytes());
        buf.extend_from_slice(&object_class_index.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes()); // interfaces_count
        buf.extend_from_slice(&1u16.to_be_bytes()); // fields_count
        buf.extend_from_slice(&0u16.to_be_bytes()); // field access_flags
        buf.extend_from_slice(&field_name_index.to_be_bytes());
        buf.extend_from_slice(&descriptor_index.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes()); // field attributes_count
        buf.extend_from_slice(&0u16.to_be_bytes()); // methods_count
        buf.extend_from_slice(&0u16.to_be_bytes()); // class attributes_count
        buf
    }

    #[test]
    fn parses_minimal_class_with_one_field() {
        let bytes = build_minimal_class("com/example/Order", "orderId", "J");
        let schema = parse_class(&bytes).unwrap();
        assert_eq!(schema.class_name, "com.example.Order");
        assert_eq!(schema.fields.len(), 1);
        assert_eq!(schema.fields[0].name, "orderId");
        assert_eq!(schema.fields[0].type_name, "long");
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = build_minimal_class("com/example/Order", "orderId", "J");
        bytes[0] = 0;
        let err = parse_class(&bytes).unwrap_err();
        assert!(matches!(err, Error::UnreadableHeader { .. }));
    }

    #[test]
    fn descriptor_conversion_covers_primitives_and_arrays() {
        assert_eq!(descriptor_to_type_name("J"), "long");
        assert_eq!(descriptor_to_type_name("I"), "int");
        assert_eq!(descriptor_to_type_name("Ljava/lang/String;"), "java.lang.String");
        assert_eq!(descriptor_to_type_name("[I"), "int[]");
        assert_eq!(descriptor_to_type_name("[Ljava/lang/String;"), "java.lang.String[]");
    }
}
