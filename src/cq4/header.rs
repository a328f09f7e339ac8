//! The fixed-signature block at the start of every CQ4 data or metadata file.

use crate::error::{Error, Location, Result};

/// 4-byte signature identifying a CQ4 container. Chosen for this implementation;
/// any producer not emitting it is rejected before a single excerpt is inspected.
pub(crate) const MAGIC: [u8; 4] = *b"CQ4H";

/// How a queue's files are rotated. Carried in the header for informational
/// purposes only — the core does not perform cross-roll-cycle concatenation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollCycle {
    /// A new file per minute.
    Minutely,
    /// A new file per hour.
    Hourly,
    /// A new file per day.
    Daily,
    /// A roll cycle code not recognized by this implementation.
    Unknown(u16),
}

impl RollCycle {
    fn from_code(code: u16) -> Self {
        match code {
            0 => RollCycle::Minutely,
            1 => RollCycle::Hourly,
            2 => RollCycle::Daily,
            other => RollCycle::Unknown(other),
        }
    }
}

/// Queue-level metadata parsed from the fixed header block, returned to callers via
/// [`crate::cq4::ReaderSession::queue_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueInfo {
    /// The index the file's first data excerpt is numbered with.
    pub start_index: i64,
    /// How files in this queue are rotated.
    pub roll_cycle: RollCycle,
    /// The epoch (UNIX millis) the roll-cycle numbering is computed from.
    pub epoch: i64,
    /// An opaque producer-assigned source identifier.
    pub source_id: u32,
}

/// The fixed portion of the header: magic, version, roll-cycle metadata, and the
/// count of entries in the (skippable) index-to-offset table that follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub(crate) version: u16,
    pub(crate) info: QueueInfo,
    pub(crate) index_count: u32,
}

/// Byte length of the fixed portion of the header, before the index-to-offset table.
pub(crate) const FIXED_HEADER_LEN: usize = 32;
/// Byte width of one entry in the index-to-offset table.
const INDEX_ENTRY_LEN: usize = 8;

impl Header {
    /// Parses the fixed header block from the start of `data`.
    ///
    /// # Errors
    /// Returns [`Error::UnreadableHeader`] if `data` is shorter than the fixed
    /// header, the magic signature doesn't match, or the declared index table
    /// would run past the end of `data`.
    pub(crate) fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < FIXED_HEADER_LEN {
            return Err(Error::UnreadableHeader {
                location: Location::UNKNOWN,
                message: format!(
                    "file is only {} bytes, shorter than the {FIXED_HEADER_LEN}-byte header",
                    data.len()
                ),
            });
        }
        if data[0..4] != MAGIC {
            return Err(Error::UnreadableHeader {
                location: Location::UNKNOWN,
                message: format!("bad magic signature {:?}, expected {:?}", &data[0..4], MAGIC),
            });
        }
        let version = u16::from_le_bytes(data[4..6].try_into().unwrap());
        let roll_cycle = RollCycle::from_code(u16::from_le_bytes(data[6..8].try_into().unwrap()));
        let epoch = i64::from_le_bytes(data[8..16].try_into().unwrap());
        let start_index = i64::from_le_bytes(data[16..24].try_into().unwrap());
        let source_id = u32::from_le_bytes(data[24..28].try_into().unwrap());
        let index_count = u32::from_le_bytes(data[28..32].try_into().unwrap());

        let table_len = index_count as usize * INDEX_ENTRY_LEN;
        if FIXED_HEADER_LEN + table_len > data.len() {
            return Err(Error::UnreadableHeader {
                location: Location::new(FIXED_HEADER_LEN as u64, 0),
                message: format!(
                    "index table declares {index_count} entries, which runs past the end of the file"
                ),
            });
        }

        Ok(Header {
            version,
            info: QueueInfo {
                start_index,
                roll_cycle,
                epoch,
                source_id,
            },
            index_count,
        })
    }

    /// Total byte length of the header including the (skipped) index-to-offset
    /// table, i.e. the offset the first excerpt begins at.
    pub(crate) fn total_len(&self) -> usize {
        FIXED_HEADER_LEN + self.index_count as usize * INDEX_ENTRY_LEN
    }
}

/// Serializes a header for use in tests and fixtures.
#[cfg(test)]
pub(crate) fn encode_header(info: QueueInfo, index_count: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FIXED_HEADER_LEN + index_count as usize * INDEX_ENTRY_LEN);
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&1u16.to_le_bytes()); // version
    let roll_code: u16 = match info.roll_cycle {
        RollCycle::Minutely => 0,
        RollCycle::Hourly => 1,
        RollCycle::Daily => 2,
        RollCycle::Unknown(code) => code,
    };
    buf.extend_from_slice(&roll_code.to_le_bytes());
    buf.extend_from_slice(&info.epoch.to_le_bytes());
    buf.extend_from_slice(&info.start_index.to_le_bytes());
    buf.extend_from_slice(&info.source_id.to_le_bytes());
    buf.extend_from_slice(&index_count.to_le_bytes());
    buf.resize(buf.len() + index_count as usize * INDEX_ENTRY_LEN, 0);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> QueueInfo {
        QueueInfo {
            start_index: 42,
            roll_cycle: RollCycle::Daily,
            epoch: 1_700_000_000_000,
            source_id: 7,
        }
    }

    #[test]
    fn parses_valid_header() {
        let bytes = encode_header(sample_info(), 0);
        let header = Header::parse(&bytes).unwrap();
        assert_eq!(header.info, sample_info());
        assert_eq!(header.total_len(), FIXED_HEADER_LEN);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = encode_header(sample_info(), 0);
        bytes[0] = b'X';
        let err = Header::parse(&bytes).unwrap_err();
        assert!(matches!(err, Error::UnreadableHeader { .. }));
    }

    #[test]
    fn rejects_truncated_header() {
        let bytes = encode_header(sample_info(), 0);
        let err = Header::parse(&bytes[..10]).unwrap_err();
        assert!(matches!(err, Error::UnreadableHeader { .. }));
    }

    #[test]
    fn rejects_index_table_past_eof() {
        let mut bytes = encode_header(sample_info(), 4);
        bytes.truncate(FIXED_HEADER_LEN + 8); // declared 4 entries, only 1 present
        let err = Header::parse(&bytes).unwrap_err();
        assert!(matches!(err, Error::UnreadableHeader { .. }));
    }

    #[test]
    fn index_table_is_skipped_by_total_len() {
        let bytes = encode_header(sample_info(), 3);
        let header = Header::parse(&bytes).unwrap();
        assert_eq!(header.total_len(), FIXED_HEADER_LEN + 3 * INDEX_ENTRY_LEN);
    }
}
