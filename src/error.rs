//! Structured errors returned by every decoding stage in this crate.
//!
//! Every variant carries enough context to answer "where in the file, and where in
//! the payload, did this go wrong" without the caller having to re-derive it from a
//! bare message string.

use std::fmt;

/// The result type returned throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The coarse failure category a given [`Error`] belongs to, per the error taxonomy.
///
/// Corresponds to the exit codes a thin binary wrapping this crate would surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// File missing, unreadable, or the mapping failed.
    Io,
    /// Header signature mismatch, misaligned excerpt, or truncated payload.
    Format,
    /// Unknown type code, invalid UTF-8, depth exceeded, or similar.
    Decode,
    /// Schema parse failure or an unresolvable field/class reference.
    Schema,
    /// An invalid or incompatible configuration option.
    Config,
}

/// Where inside the stream a decode failure occurred.
///
/// `payload_offset` is relative to the start of the excerpt payload being decoded,
/// not the start of the file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Location {
    /// Absolute byte offset of the excerpt header in the file, if known.
    pub file_offset: u64,
    /// Byte offset within the excerpt's payload, if known.
    pub payload_offset: u64,
}

impl Location {
    /// A location with no file context, for errors that occur before any excerpt
    /// has been read (e.g. header validation) or outside of a file (schema parsing).
    pub const UNKNOWN: Location = Location {
        file_offset: 0,
        payload_offset: 0,
    };

    /// Creates a location at `payload_offset` within the excerpt starting at
    /// `file_offset`.
    pub fn new(file_offset: u64, payload_offset: u64) -> Self {
        Self {
            file_offset,
            payload_offset,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "file offset {}, payload offset {}",
            self.file_offset, self.payload_offset
        )
    }
}

/// The error type returned by every fallible operation in this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The file could not be opened, read, or memory-mapped.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The CQ4 file header signature was missing or did not match.
    #[error("unreadable CQ4 header at {location}: {message}")]
    UnreadableHeader {
        /// Where the malformed header was encountered.
        location: Location,
        /// Human-readable explanation.
        message: String,
    },

    /// An excerpt's length field would push the cursor past the end of the file.
    #[error("misaligned excerpt at {location}: {message}")]
    MisalignedExcerpt {
        /// Where the misalignment was detected.
        location: Location,
        /// Human-readable explanation.
        message: String,
    },

    /// A read ran out of bytes before a value could be fully decoded.
    #[error("truncated input at {location}: {message}")]
    Truncated {
        /// Where the truncation was detected.
        location: Location,
        /// Human-readable explanation.
        message: String,
    },

    /// A stop-bit varint consumed more than 10 bytes without terminating.
    #[error("stop-bit varint overflow at {location}")]
    Overflow {
        /// Where the overflowing varint began.
        location: Location,
    },

    /// A self-describing wire byte did not match any known type code.
    #[error("unknown type code 0x{byte:02x} at {location}")]
    UnknownTypeCode {
        /// The unrecognized byte.
        byte: u8,
        /// Where the byte was encountered.
        location: Location,
    },

    /// A field-name reference pointed at an intern-table slot that was never filled.
    #[error("unknown field name reference {id} at {location}")]
    UnknownFieldRef {
        /// The referenced intern id.
        id: u32,
        /// Where the reference was encountered.
        location: Location,
    },

    /// Nesting exceeded the configured `max_nesting_depth`.
    #[error("nesting depth exceeded at {location}")]
    DepthExceeded {
        /// Where the limit was hit.
        location: Location,
    },

    /// A length-prefixed string or identifier was not valid UTF-8.
    #[error("invalid UTF-8 in field `{}` at {location}", field_path.as_deref().unwrap_or("<unknown>"))]
    InvalidUtf8 {
        /// Dotted path to the offending field, when known.
        field_path: Option<String>,
        /// Where the invalid bytes were encountered.
        location: Location,
    },

    /// Normalizing a millis/micros timestamp to epoch nanoseconds overflowed `i64`.
    #[error("timestamp overflow at {location}")]
    TimestampOverflow {
        /// Where the overflowing timestamp was encountered.
        location: Location,
    },

    /// A fixed-layout (SBE) field ran past the end of the payload.
    #[error("payload too short for field `{field_name}` at {location}")]
    PayloadTooShort {
        /// The field whose bytes were unavailable.
        field_name: String,
        /// Where the field was expected to start.
        location: Location,
    },

    /// An SBE message header referenced a `template_id` absent from the registry.
    #[error("unknown SBE template id {template_id} at {location}")]
    UnknownTemplate {
        /// The unresolved template id.
        template_id: u16,
        /// Where the header was encountered.
        location: Location,
    },

    /// A compact-tagged field id has no corresponding entry in the schema.
    ///
    /// This is recoverable: the field is skipped and the condition is logged at
    /// `warn` level rather than raised as a hard error, unless running in strict
    /// mode.
    #[error("unknown compact-tagged field id {field_id} at {location}")]
    UnknownFieldId {
        /// The unresolved field id.
        field_id: i64,
        /// Where the field header was encountered.
        location: Location,
    },

    /// A compact-tagged field header byte was malformed (unrecognized type nibble).
    #[error("malformed compact-tagged header at {location}: {message}")]
    MalformedHeader {
        /// Where the malformed byte was encountered.
        location: Location,
        /// Human-readable explanation.
        message: String,
    },

    /// Schema source or bytecode could not be parsed, or a referenced class is
    /// missing from the registry.
    #[error("schema error: {message}")]
    Schema {
        /// Human-readable explanation.
        message: String,
    },

    /// An invalid or mutually incompatible set of [`crate::config::Config`] options.
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable explanation.
        message: String,
    },

    /// The reader session's memory mapping was already closed.
    #[error("reader session is closed")]
    SessionClosed,
}

impl Error {
    /// Convenience constructor for [`Error::Truncated`] with no location context.
    pub(crate) fn truncated(message: impl Into<String>) -> Self {
        Error::Truncated {
            location: Location::UNKNOWN,
            message: message.into(),
        }
    }

    /// The coarse category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::Io,
            Error::UnreadableHeader { .. }
            | Error::MisalignedExcerpt { .. }
            | Error::Truncated { .. } => ErrorKind::Format,
            Error::Overflow { .. }
            | Error::UnknownTypeCode { .. }
            | Error::UnknownFieldRef { .. }
            | Error::DepthExceeded { .. }
            | Error::InvalidUtf8 { .. }
            | Error::TimestampOverflow { .. }
            | Error::PayloadTooShort { .. }
            | Error::UnknownTemplate { .. }
            | Error::UnknownFieldId { .. }
            | Error::MalformedHeader { .. }
            | Error::SessionClosed => ErrorKind::Decode,
            Error::Schema { .. } => ErrorKind::Schema,
            Error::Config { .. } => ErrorKind::Config,
        }
    }

    /// The exit code a thin binary wrapping this crate should return for this error,
    /// per the core's exit-code table. Successful runs are not represented here.
    pub fn exit_code(&self) -> u8 {
        match self.kind() {
            ErrorKind::Io => 2,
            ErrorKind::Format | ErrorKind::Decode => 3,
            ErrorKind::Schema => 4,
            ErrorKind::Config => 5,
        }
    }

    /// The byte location this error occurred at, if the variant carries one.
    pub fn location(&self) -> Option<Location> {
        match self {
            Error::Io(_) | Error::Schema { .. } | Error::Config { .. } | Error::SessionClosed => {
                None
            }
            Error::UnreadableHeader { location, .. }
            | Error::MisalignedExcerpt { location, .. }
            | Error::Truncated { location, .. }
            | Error::Overflow { location }
            | Error::UnknownTypeCode { location, .. }
            | Error::UnknownFieldRef { location, .. }
            | Error::DepthExceeded { location }
            | Error::InvalidUtf8 { location, .. }
            | Error::TimestampOverflow { location }
            | Error::PayloadTooShort { location, .. }
            | Error::UnknownTemplate { location, .. }
            | Error::UnknownFieldId { location, .. }
            | Error::MalformedHeader { location, .. } => Some(*location),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_taxonomy() {
        assert_eq!(Error::Io(std::io::Error::from(std::io::ErrorKind::NotFound)).exit_code(), 2);
        assert_eq!(
            Error::Truncated {
                location: Location::UNKNOWN,
                message: "eof".into()
            }
            .exit_code(),
            3
        );
        assert_eq!(
            Error::Schema {
                message: "bad".into()
            }
            .exit_code(),
            4
        );
        assert_eq!(
            Error::Config {
                message: "bad".into()
            }
            .exit_code(),
            5
        );
    }

    #[test]
    fn location_present_only_on_positional_variants() {
        assert!(Error::SessionClosed.location().is_none());
        assert_eq!(
            Error::DepthExceeded {
                location: Location::new(8, 2)
            }
            .location(),
            Some(Location::new(8, 2))
        );
    }
}
