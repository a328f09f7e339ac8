//! Extracts [`SchemaDef`]s from Java-family class definition source text.
//!
//! This is a line-oriented scanner, not a full parser: it recognizes the subset of
//! declaration syntax schemas actually need (package/import statements, class
//! headers, field declarations and their annotations) and ignores method bodies and
//! everything else.

use std::collections::HashMap;

use regex::Regex;

use crate::config::EncodingOverride;
use crate::error::{Error, Result};
use crate::schema::{SchemaDef, SchemaField, SchemaRegistry};

const COMPACT_TAGGED_MARKER: &str = "CompactTagged";
const SBE_MARKER: &str = "Sbe";

struct Patterns {
    package: Regex,
    import: Regex,
    class_header: Regex,
    field: Regex,
    x_field: Regex,
    sbe_field: Regex,
}

impl Patterns {
    fn new() -> Self {
        Self {
            package: Regex::new(r"^\s*package\s+([\w.]+)\s*;").unwrap(),
            import: Regex::new(r"^\s*import\s+([\w.]+)\s*;").unwrap(),
            class_header: Regex::new(r"\b(?:class|interface|enum)\s+(\w+)").unwrap(),
            field: Regex::new(
                r"^\s*(?:public|private|protected)?\s*(?:static\s+)?(?:final\s+)?([\w.<>\[\]]+)\s+(\w+)\s*[;=]",
            )
            .unwrap(),
            x_field: Regex::new(r"@XField\s*\(\s*id\s*=\s*(-?\d+)\s*\)").unwrap(),
            sbe_field: Regex::new(
                r"@SbeField\s*\(([^)]*)\)",
            )
            .unwrap(),
            // sub-patterns for the SbeField attribute list are matched separately below
        }
    }
}

fn extract_sbe_attr(attrs: &str, key: &str) -> Option<u32> {
    let needle = format!(r"{key}\s*=\s*(\d+)");
    let re = Regex::new(&needle).ok()?;
    re.captures(attrs)?.get(1)?.as_str().parse().ok()
}

/// Parses a single Java-family source file's text, returning one [`SchemaDef`] per
/// top-level or nested class declaration that has at least one field.
///
/// Static, transient, and compiler-synthetic fields (`synthetic`/`bridge` markers in
/// comments or modifiers) are skipped; they carry no wire representation.
///
/// # Errors
/// Returns [`Error::Schema`] if a `@XField`/`@SbeField` annotation is malformed.
pub fn parse_source(text: &str) -> Result<Vec<SchemaDef>> {
    let patterns = Patterns::new();
    let mut imports: Vec<String> = Vec::new();
    let mut schemas = Vec::new();

    // A stack of classes currently open, innermost last; field declarations append
    // to the innermost so an outer class's fields before AND after a nested class
    // declaration both attach to the outer, not just the ones preceding it.
    let mut stack: Vec<(i32, SchemaDef)> = Vec::new();
    let mut pending_tag: Option<i64> = None;
    let mut pending_offset: Option<u32> = None;
    let mut pending_length: Option<u32> = None;
    let mut brace_depth = 0i32;

    for raw_line in text.lines() {
        let line = strip_line_comment(raw_line);

        if let Some(caps) = patterns.import.captures(line) {
            imports.push(caps[1].to_owned());
        }

        if let Some(caps) = patterns.x_field.captures(line) {
            pending_tag = Some(caps[1].parse().map_err(|_| Error::Schema {
                message: format!("malformed @XField id in: {line}"),
            })?);
        }
        if let Some(caps) = patterns.sbe_field.captures(line) {
            let attrs = &caps[1];
            pending_offset = extract_sbe_attr(attrs, "offset");
            pending_length = extract_sbe_attr(attrs, "length");
        }

        if let Some(caps) = patterns.class_header.captures(line) {
            let simple_name = caps[1].to_owned();
            // A nested class is qualified by its enclosing class, so two inner
            // classes sharing a simple name under different outers (`Outer.Inner`,
            // `Other.Inner`) don't collide in the registry.
            let class_name = match stack.last() {
                Some((_, enclosing)) => format!("{}.{simple_name}", enclosing.class_name),
                None => imports
                    .iter()
                    .find(|i| i.ends_with(&format!(".{simple_name}")))
                    .cloned()
                    .unwrap_or(simple_name),
            };
            let encoding = detect_encoding(&imports, line);
            let has_sbe_header = detect_sbe_header(&imports, line);
            stack.push((
                brace_depth,
                SchemaDef {
                    class_name,
                    template_id: None,
                    encoding,
                    fields: Vec::new(),
                    has_sbe_header,
                    sbe_header_order: None,
                },
            ));
        }

        if let Some(caps) = patterns.field.captures(line) {
            let type_name = caps[1].to_owned();
            let name = caps[2].to_owned();
            if !is_skippable_field_decl(line) {
                if let Some((_, schema)) = stack.last_mut() {
                    schema.fields.push(SchemaField {
                        name,
                        type_name,
                        tag_id: pending_tag.take(),
                        sbe_offset: pending_offset.take(),
                        sbe_length: pending_length.take(),
                    });
                }
            }
        }

        for ch in line.chars() {
            match ch {
                '{' => brace_depth += 1,
                '}' => {
                    brace_depth -= 1;
                    if matches!(stack.last(), Some((depth, _)) if *depth == brace_depth) {
                        let (_, finished) = stack.pop().unwrap();
                        if !finished.fields.is_empty() {
                            schemas.push(finished);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    for (_, finished) in stack {
        if !finished.fields.is_empty() {
            schemas.push(finished);
        }
    }

    Ok(schemas)
}

fn is_skippable_field_decl(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("static ")
        || trimmed.contains(" static ")
        || trimmed.contains("transient ")
        || trimmed.contains("synthetic")
}

fn strip_line_comment(line: &str) -> &str {
    match line.find("//") {
        Some(idx) => &line[..idx],
        None => line,
    }
}

const SBE_HEADER_MARKER: &str = "MessageHeader";

/// Whether this class's SBE payloads carry a leading message header, signaled by an
/// import of the SBE message-header type or an `@SbeHeader` annotation on the class.
fn detect_sbe_header(imports: &[String], class_header_line: &str) -> bool {
    imports.iter().any(|i| i.contains(SBE_HEADER_MARKER)) || class_header_line.contains("@SbeHeader")
}

fn detect_encoding(imports: &[String], class_header_line: &str) -> EncodingOverride {
    let haystack = imports.join("\n");
    if haystack.contains(COMPACT_TAGGED_MARKER) || class_header_line.contains(COMPACT_TAGGED_MARKER) {
        EncodingOverride::CompactTagged
    } else if haystack.contains(SBE_MARKER) || class_header_line.contains(SBE_MARKER) {
        EncodingOverride::Sbe
    } else {
        EncodingOverride::SelfDescribing
    }
}

/// Parses every `.java`-like file under `dir` (recursively) and loads the resulting
/// schemas into `registry`, preferring source-derived definitions over any
/// bytecode-derived definitions already present for the same class name.
///
/// # Errors
/// Returns [`Error::Io`] on directory traversal failure, or [`Error::Schema`] if a
/// source file contains a malformed annotation.
pub fn load_directory(
    dir: &std::path::Path,
    registry: &mut SchemaRegistry,
    sources: &mut HashMap<String, bool>,
) -> Result<()> {
    for entry in walk(dir)? {
        let is_source = entry
            .extension()
            .is_some_and(|ext| ext == "java" || ext == "kt" || ext == "scala");
        if !is_source {
            continue;
        }
        let text = std::fs::read_to_string(&entry)?;
        for schema in parse_source(&text)? {
            registry.add_preferring_source(schema, true, sources);
        }
    }
    Ok(())
}

fn walk(dir: &std::path::Path) -> Result<Vec<std::path::PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    Ok(out)
}
