//! The CQ4 container reader: file header parsing and excerpt iteration.

pub(crate) mod header;

pub use header::{QueueInfo, RollCycle};

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;

use crate::error::{Error, Location, Result};
use crate::value::MessageKind;

use header::Header;

const READY_BIT: u32 = 0x8000_0000;
const METADATA_BIT: u32 = 0x4000_0000;
const PADDING_BIT: u32 = 0x2000_0000;
const LENGTH_MASK: u32 = 0x1FFF_FFFF;

fn align_up4(n: usize) -> usize {
    (n + 3) & !3
}

/// One framed excerpt yielded by [`CQ4Reader::excerpts`].
#[derive(Debug, Clone, Copy)]
pub struct Excerpt<'a> {
    /// Monotonic data-excerpt index (see [`CQ4Reader::excerpts`] for metadata
    /// excerpt semantics).
    pub index: i64,
    /// Absolute byte offset of this excerpt's 4-byte length-and-flag header.
    pub absolute_offset: u64,
    /// Whether this was a data or metadata excerpt.
    pub kind: MessageKind,
    /// The raw payload bytes, excluding the 4-byte header and any alignment
    /// padding.
    pub payload: &'a [u8],
}

/// Parses a CQ4 file's header and iterates its excerpts via memory-mapped access.
pub struct CQ4Reader {
    mmap: Arc<Mmap>,
    header: Header,
}

impl CQ4Reader {
    /// Memory-maps `path` and parses its header.
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the file can't be opened or mapped, or
    /// [`Error::UnreadableHeader`] if the header signature doesn't match.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        // SAFETY: the mapping is read-only and this reader does not assume the
        // backing file is not concurrently modified by another process; any such
        // modification can only corrupt subsequent reads, which surface as
        // ordinary decode errors, not undefined behavior in safe Rust.
        let mmap = unsafe { Mmap::map(&file)? };
        Self::from_mmap(mmap)
    }

    fn from_mmap(mmap: Mmap) -> Result<Self> {
        let header = Header::parse(&mmap)?;
        Ok(Self {
            mmap: Arc::new(mmap),
            header,
        })
    }

    /// The queue-level metadata carried in the header.
    pub fn queue_info(&self) -> QueueInfo {
        self.header.info
    }

    /// Iterates this file's excerpts in strict file order.
    ///
    /// Data excerpts are numbered with a contiguous, strictly-increasing index
    /// starting at [`QueueInfo::start_index`]; padding excerpts never advance that
    /// index. Metadata excerpts are skipped unless `include_metadata` is `true`, in
    /// which case they are yielded carrying the index value the *next* data
    /// excerpt will receive (they do not themselves consume an index).
    ///
    /// The bytes between a payload's end and the next 4-byte alignment boundary
    /// MUST be zero. When `strict` is `true` a non-zero alignment byte yields
    /// [`Error::MisalignedExcerpt`]; when `false` it is tolerated and logged at
    /// `warn` level.
    ///
    /// Iteration stops cleanly, with no error, the moment a not-yet-written excerpt
    /// header is reached.
    pub fn excerpts(&self, include_metadata: bool, strict: bool) -> ExcerptIter<'_> {
        ExcerptIter {
            data: &self.mmap,
            pos: self.header.total_len(),
            next_index: self.header.info.start_index,
            include_metadata,
            strict,
            done: false,
        }
    }
}

/// Iterator over a [`CQ4Reader`]'s excerpts. See [`CQ4Reader::excerpts`].
pub struct ExcerptIter<'a> {
    data: &'a [u8],
    pos: usize,
    next_index: i64,
    include_metadata: bool,
    strict: bool,
    done: bool,
}

impl<'a> Iterator for ExcerptIter<'a> {
    type Item = Result<Excerpt<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if self.pos + 4 > self.data.len() {
                // Producers may not pre-allocate trailing header words; running out
                // of bytes here is a clean end, not a truncation.
                self.done = true;
                return None;
            }
            let word = u32::from_le_bytes(self.data[self.pos..self.pos + 4].try_into().unwrap());
            if word & READY_BIT == 0 {
                self.done = true;
                return None;
            }
            let len = (word & LENGTH_MASK) as usize;
            let header_offset = self.pos as u64;
            let payload_start = self.pos + 4;
            let payload_end = payload_start + len;
            if payload_end > self.data.len() {
                self.done = true;
                return Some(Err(Error::MisalignedExcerpt {
                    location: Location::new(header_offset, 0),
                    message: format!(
                        "excerpt declares {len} payload bytes, which runs past the end of the file"
                    ),
                }));
            }
            let aligned_end = align_up4(payload_end);
            let align_bytes = &self.data[payload_end..aligned_end];
            if align_bytes.iter().any(|&b| b != 0) {
                if self.strict {
                    self.done = true;
                    return Some(Err(Error::MisalignedExcerpt {
                        location: Location::new(header_offset, 0),
                        message: "non-zero alignment padding after excerpt payload".to_owned(),
                    }));
                }
                log::warn!(
                    "non-zero alignment padding after excerpt at file offset {header_offset}; tolerating in non-strict mode"
                );
            }
            self.pos = aligned_end;

            if word & PADDING_BIT != 0 {
                continue;
            }

            let is_metadata = word & METADATA_BIT != 0;
            if is_metadata {
                if !self.include_metadata {
                    continue;
                }
                return Some(Ok(Excerpt {
                    index: self.next_index,
                    absolute_offset: header_offset,
                    kind: MessageKind::Metadata,
                    payload: &self.data[payload_start..payload_end],
                }));
            }

            let index = self.next_index;
            self.next_index += 1;
            return Some(Ok(Excerpt {
                index,
                absolute_offset: header_offset,
                kind: MessageKind::Data,
                payload: &self.data[payload_start..payload_end],
            }));
        }
    }
}

/// Encodes one excerpt's 4-byte header word plus payload plus zero-padding to the
/// next 4-byte boundary. Used by tests and by [`crate::cq4::header::encode_header`]
/// consumers that build synthetic CQ4 files.
#[cfg(test)]
pub(crate) fn encode_excerpt(kind: MessageKind, padding: bool, payload: &[u8]) -> Vec<u8> {
    let mut flags = READY_BIT;
    if matches!(kind, MessageKind::Metadata) {
        flags |= METADATA_BIT;
    }
    if padding {
        flags |= PADDING_BIT;
    }
    let word = flags | (payload.len() as u32 & LENGTH_MASK);
    let mut buf = Vec::with_capacity(4 + align_up4(payload.len()));
    buf.extend_from_slice(&word.to_le_bytes());
    buf.extend_from_slice(payload);
    buf.resize(4 + align_up4(payload.len()), 0);
    buf
}
