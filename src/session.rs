//! [`ReaderSession`]: the top-level handle combining a memory-mapped CQ4 file, a
//! schema registry, and configured decoders into a single `Message` iterator.

use std::path::{Path, PathBuf};

use crate::config::{Config, EncodingOverride};
use crate::cq4::{CQ4Reader, QueueInfo};
use crate::dispatch::DecoderDispatcher;
use crate::error::{Error, Result};
use crate::schema::SchemaRegistry;
use crate::value::Message;

/// Opens `path` with a default [`Config`] and an empty [`SchemaRegistry`] (only
/// self-describing wire documents will decode; attach schemas via
/// [`ReaderSession::builder`] to also decode SBE or compact-tagged payloads).
///
/// # Errors
/// Returns [`Error::Io`] or [`Error::UnreadableHeader`]; see [`ReaderSession::open`].
pub fn open(path: impl AsRef<Path>) -> Result<ReaderSession> {
    ReaderSession::open(path)
}

/// A reader session: one memory-mapped CQ4 file, one schema registry, and the
/// decoders configured to interpret its excerpts.
///
/// Not `Sync` across threads sharing mutable iteration state — the concurrency
/// model calls for one session per file handle; share a frozen [`SchemaRegistry`]
/// across independent sessions instead of sharing a session itself.
pub struct ReaderSession {
    reader: Option<CQ4Reader>,
    registry: SchemaRegistry,
    dispatcher: DecoderDispatcher,
    config: Config,
    metadata_info: Option<QueueInfo>,
}

impl ReaderSession {
    /// Opens `path` with a default [`Config`] and an empty [`SchemaRegistry`].
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the file can't be opened or mapped, or
    /// [`Error::UnreadableHeader`] if the header signature doesn't match.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::builder(path).build()
    }

    /// Starts building a session with a non-default [`Config`] and/or a loaded
    /// [`SchemaRegistry`].
    pub fn builder(path: impl AsRef<Path>) -> ReaderSessionBuilder {
        ReaderSessionBuilder {
            path: path.as_ref().to_path_buf(),
            config: Config::default(),
            registry: SchemaRegistry::new(),
            metadata_path: None,
            metadata_is_explicit: false,
        }
    }

    /// The queue-level metadata carried in the file header, enriched by a
    /// companion `.cq4t` metadata file's header when one was found or
    /// explicitly set (see [`ReaderSessionBuilder::metadata_file`]).
    ///
    /// # Errors
    /// Returns [`Error::SessionClosed`] if [`ReaderSession::close`] was already
    /// called.
    pub fn queue_info(&self) -> Result<QueueInfo> {
        let info = self.reader()?.queue_info();
        Ok(self.metadata_info.unwrap_or(info))
    }

    /// Iterates this session's excerpts, decoding each into a [`Message`] via the
    /// configured [`DecoderDispatcher`].
    ///
    /// Container-level errors (a misaligned excerpt, a truncated length) abort
    /// iteration immediately, matching [`CQ4Reader::excerpts`]. Per-message decode
    /// errors are handled per [`Config::strict`]: attached to the message and
    /// continued past in non-strict mode, propagated in strict mode.
    ///
    /// Calling this after [`ReaderSession::close`] yields a single
    /// [`Error::SessionClosed`] item.
    pub fn iter(&self, include_metadata: bool) -> Box<dyn Iterator<Item = Result<Message>> + '_> {
        let reader = match &self.reader {
            Some(reader) => reader,
            None => return Box::new(std::iter::once(Err(Error::SessionClosed))),
        };
        let registry = &self.registry;
        let dispatcher = &self.dispatcher;
        Box::new(reader.excerpts(include_metadata, self.config.strict()).map(move |excerpt| {
            let excerpt = excerpt?;
            let mut message = dispatcher.dispatch(excerpt.payload, registry, excerpt.absolute_offset)?;
            message.index = excerpt.index;
            message.kind = excerpt.kind;
            Ok(message)
        }))
    }

    /// Iterates using [`Config::include_metadata`] as the default.
    pub fn iter_default(&self) -> Box<dyn Iterator<Item = Result<Message>> + '_> {
        self.iter(self.config.include_metadata())
    }

    /// The schema registry backing this session's fixed-layout decoding.
    pub fn schema_registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Drops the memory mapping. Subsequent [`ReaderSession::iter`] or
    /// [`ReaderSession::queue_info`] calls return [`Error::SessionClosed`].
    pub fn close(&mut self) {
        self.reader = None;
    }

    fn reader(&self) -> Result<&CQ4Reader> {
        self.reader.as_ref().ok_or(Error::SessionClosed)
    }
}

/// Builder for [`ReaderSession`], attaching a non-default [`Config`] and/or a
/// pre-loaded [`SchemaRegistry`] before opening the file.
pub struct ReaderSessionBuilder {
    path: PathBuf,
    config: Config,
    registry: SchemaRegistry,
    metadata_path: Option<PathBuf>,
    metadata_is_explicit: bool,
}

impl ReaderSessionBuilder {
    /// Sets the decoding configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Sets the schema registry used to decode fixed-layout payloads.
    pub fn schema_registry(mut self, registry: SchemaRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Loads schemas from `path` (a single file or a directory) into this
    /// builder's registry, as [`SchemaRegistry::load`].
    ///
    /// # Errors
    /// Returns [`Error::Io`] or [`Error::Schema`]; see [`SchemaRegistry::load`].
    pub fn load_schemas(mut self, path: impl AsRef<Path>, encoding_hint: Option<EncodingOverride>) -> Result<Self> {
        self.registry.load(path, encoding_hint)?;
        Ok(self)
    }

    /// Loads a companion CQ4 metadata file (conventionally `.cq4t`) whose header
    /// is used to enrich this session's [`ReaderSession::queue_info`], taking
    /// precedence over the data file's own header for roll cycle, epoch, and
    /// index spacing. The data file's own header still governs excerpt framing.
    ///
    /// Use this when the metadata file does not sit next to the data file under
    /// the same stem; otherwise [`ReaderSessionBuilder::build`] finds it on its
    /// own.
    pub fn metadata_file(mut self, path: impl AsRef<Path>) -> Self {
        self.metadata_path = Some(path.as_ref().to_path_buf());
        self.metadata_is_explicit = true;
        self
    }

    /// Opens the CQ4 file and assembles the session.
    ///
    /// Non-presence of a companion metadata file is never an error: when no
    /// explicit [`ReaderSessionBuilder::metadata_file`] was set, a sibling file
    /// with the same stem and a `.cq4t` extension is tried opportunistically
    /// and silently skipped if it doesn't exist or fails to parse.
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the data file can't be opened or mapped,
    /// [`Error::UnreadableHeader`] if its header signature doesn't match, or
    /// whatever [`ReaderSessionBuilder::metadata_file`] raised if an explicitly
    /// set metadata file is unreadable.
    pub fn build(mut self) -> Result<ReaderSession> {
        self.registry.freeze();
        let dispatcher = DecoderDispatcher::new(&self.config);
        let reader = CQ4Reader::open(&self.path)?;

        let metadata_info = match self.metadata_path.or_else(|| sibling_metadata_path(&self.path)) {
            Some(metadata_path) if self.metadata_is_explicit => {
                Some(CQ4Reader::open(metadata_path)?.queue_info())
            }
            Some(metadata_path) => CQ4Reader::open(metadata_path).ok().map(|r| r.queue_info()),
            None => None,
        };

        Ok(ReaderSession {
            reader: Some(reader),
            registry: self.registry,
            dispatcher,
            config: self.config,
            metadata_info,
        })
    }
}

/// The conventional companion metadata path for a CQ4 data file: same directory
/// and stem, `.cq4t` extension.
fn sibling_metadata_path(data_path: &Path) -> Option<PathBuf> {
    let stem = data_path.file_stem()?;
    Some(data_path.with_file_name(stem).with_extension("cq4t"))
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;
    use crate::cq4::encode_excerpt;
    use crate::cq4::header::encode_header;
    use crate::cq4::RollCycle;
    use crate::typecode::TypeCode;
    use crate::value::{MessageKind, Value};

    fn wire_document(id: i64) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(TypeCode::FieldNameShort as u8);
        buf.push(2);
        buf.extend_from_slice(b"id");
        buf.push(TypeCode::Int64 as u8);
        buf.extend_from_slice(&id.to_le_bytes());
        buf
    }

    fn write_temp_file(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn iterates_self_describing_documents_with_container_indices() {
        let info = QueueInfo {
            start_index: 10,
            roll_cycle: RollCycle::Daily,
            epoch: 0,
            source_id: 1,
        };
        let mut bytes = encode_header(info, 0);
        bytes.extend_from_slice(&encode_excerpt(MessageKind::Data, false, &wire_document(1)));
        bytes.extend_from_slice(&encode_excerpt(MessageKind::Data, false, &wire_document(2)));
        let file = write_temp_file(&bytes);

        let session = ReaderSession::open(file.path()).unwrap();
        assert_eq!(session.queue_info().unwrap().start_index, 10);

        let messages: Vec<_> = session.iter(false).map(Result::unwrap).collect();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].index, 10);
        assert_eq!(messages[0].field("id").unwrap().value, Value::Int64(1));
        assert_eq!(messages[1].index, 11);
    }

    #[test]
    fn close_invalidates_subsequent_access() {
        let info = QueueInfo {
            start_index: 0,
            roll_cycle: RollCycle::Daily,
            epoch: 0,
            source_id: 1,
        };
        let bytes = encode_header(info, 0);
        let file = write_temp_file(&bytes);

        let mut session = ReaderSession::open(file.path()).unwrap();
        session.close();
        assert!(matches!(session.queue_info(), Err(Error::SessionClosed)));
        let mut iter = session.iter(false);
        assert!(matches!(iter.next(), Some(Err(Error::SessionClosed))));
    }

    #[test]
    fn non_strict_decode_error_is_attached_and_iteration_continues() {
        let info = QueueInfo {
            start_index: 0,
            roll_cycle: RollCycle::Daily,
            epoch: 0,
            source_id: 1,
        };
        let mut bytes = encode_header(info, 0);
        bytes.extend_from_slice(&encode_excerpt(MessageKind::Data, false, &[0xFF]));
        bytes.extend_from_slice(&encode_excerpt(MessageKind::Data, false, &wire_document(7)));
        let file = write_temp_file(&bytes);

        let session = ReaderSession::open(file.path()).unwrap();
        let messages: Vec<_> = session.iter(false).map(Result::unwrap).collect();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].decode_error.is_some());
        assert_eq!(messages[1].field("id").unwrap().value, Value::Int64(7));
    }

    #[test]
    fn strict_mode_propagates_decode_error_and_stops_the_session_map() {
        let info = QueueInfo {
            start_index: 0,
            roll_cycle: RollCycle::Daily,
            epoch: 0,
            source_id: 1,
        };
        let mut bytes = encode_header(info, 0);
        bytes.extend_from_slice(&encode_excerpt(MessageKind::Data, false, &[0xFF]));
        let file = write_temp_file(&bytes);

        let config = Config::builder().strict(true).build().unwrap();
        let session = ReaderSession::builder(file.path()).config(config).build().unwrap();
        let mut iter = session.iter(false);
        assert!(iter.next().unwrap().is_err());
    }

    #[test]
    fn opening_a_missing_file_returns_io_error() {
        let err = ReaderSession::open("/no/such/path.cq4").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn explicit_metadata_file_overrides_reported_queue_info() {
        let data_info = QueueInfo {
            start_index: 0,
            roll_cycle: RollCycle::Minutely,
            epoch: 111,
            source_id: 1,
        };
        let data_file = write_temp_file(&encode_header(data_info, 0));

        let metadata_info = QueueInfo {
            start_index: 0,
            roll_cycle: RollCycle::Daily,
            epoch: 222,
            source_id: 1,
        };
        let metadata_file = write_temp_file(&encode_header(metadata_info, 0));

        let session = ReaderSession::builder(data_file.path())
            .metadata_file(metadata_file.path())
            .build()
            .unwrap();
        let info = session.queue_info().unwrap();
        assert_eq!(info.epoch, 222);
        assert_eq!(info.roll_cycle, RollCycle::Daily);
    }

    #[test]
    fn sibling_cq4t_file_is_found_without_explicit_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("queue.cq4");
        let metadata_path = dir.path().join("queue.cq4t");

        let data_info = QueueInfo {
            start_index: 0,
            roll_cycle: RollCycle::Minutely,
            epoch: 1,
            source_id: 1,
        };
        std::fs::write(&data_path, encode_header(data_info, 0)).unwrap();
        let metadata_info = QueueInfo {
            start_index: 0,
            roll_cycle: RollCycle::Hourly,
            epoch: 2,
            source_id: 1,
        };
        std::fs::write(&metadata_path, encode_header(metadata_info, 0)).unwrap();

        let session = ReaderSession::open(&data_path).unwrap();
        assert_eq!(session.queue_info().unwrap().roll_cycle, RollCycle::Hourly);
    }

    #[test]
    fn missing_sibling_metadata_file_is_not_an_error() {
        let info = QueueInfo {
            start_index: 0,
            roll_cycle: RollCycle::Daily,
            epoch: 5,
            source_id: 1,
        };
        let file = write_temp_file(&encode_header(info, 0));
        let session = ReaderSession::open(file.path()).unwrap();
        assert_eq!(session.queue_info().unwrap().epoch, 5);
    }
}
