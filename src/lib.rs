//! A crate for reading Chronicle Queue (CQ4) data files: container framing,
//! the self-describing "Wire" binary encoding, schema-driven SBE and compact
//! tagged protocol decoding, and Java-class-based schema extraction.

#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(clippy::missing_errors_doc)]

pub mod compact;
pub mod config;
pub mod cq4;
pub mod dispatch;
pub mod error;
pub mod sbe;
pub mod schema;
pub mod session;
pub mod stopbit;
pub mod typecode;
pub mod value;
pub mod wire;

pub use crate::compact::CompactTaggedDecoder;
pub use crate::config::{Config, ConfigBuilder, EncodingOverride};
pub use crate::cq4::{CQ4Reader, Excerpt, QueueInfo, RollCycle};
pub use crate::dispatch::DecoderDispatcher;
pub use crate::error::{Error, ErrorKind, Location, Result};
pub use crate::sbe::SbeDecoder;
pub use crate::schema::{SchemaDef, SchemaField, SchemaRegistry};
pub use crate::session::{open, ReaderSession, ReaderSessionBuilder};
pub use crate::value::{DecodeErrorInfo, Field, Message, MessageKind, Value};
