//! Record reads and the record-section scan
//!
//! Reads locate a frame through the id→offset map, decode it, and verify
//! its checksum. A CRC mismatch quarantines the span: the error is logged
//! once, surfaced to the caller, and the rest of the file stays usable.
//!
//! The cold-start scan walks the record section in file order. Later
//! frames for the same id supersede earlier ones; corrupt spans are
//! skipped by scanning forward for the next decodable frame.

use crate::file::StoreFile;
use crate::format::{FrameError, RecordFrame};
use crate::offsets::OffsetMap;
use entitydb_core::{DbResult, EntityDbError, EntityId};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use tracing::{error, warn};

/// Maximum bytes to scan forward past a corrupt frame before giving up
/// on the remainder of the record section
const MAX_CORRUPTION_SCAN: usize = 1024 * 1024;

/// Quarantined file spans, reported once each
#[derive(Debug, Default)]
pub struct Quarantine {
    spans: Mutex<FxHashSet<u64>>,
}

impl Quarantine {
    /// Create an empty quarantine
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a corrupt span; returns true the first time it is seen
    pub fn insert(&self, offset: u64) -> bool {
        self.spans.lock().insert(offset)
    }

    /// Whether a span is quarantined
    pub fn contains(&self, offset: u64) -> bool {
        self.spans.lock().contains(&offset)
    }

    /// Number of quarantined spans
    pub fn len(&self) -> usize {
        self.spans.lock().len()
    }

    /// True when nothing is quarantined
    pub fn is_empty(&self) -> bool {
        self.spans.lock().is_empty()
    }
}

/// Reads record frames through the offset map
#[derive(Debug)]
pub struct RecordReader {
    file: Arc<StoreFile>,
    offsets: Arc<OffsetMap>,
    quarantine: Arc<Quarantine>,
}

impl RecordReader {
    /// Create a reader over a file and its offset map
    pub fn new(file: Arc<StoreFile>, offsets: Arc<OffsetMap>, quarantine: Arc<Quarantine>) -> Self {
        RecordReader {
            file,
            offsets,
            quarantine,
        }
    }

    /// The offset map
    pub fn offsets(&self) -> &Arc<OffsetMap> {
        &self.offsets
    }

    /// Read the live frame for an entity; `Ok(None)` when the id is unknown
    pub fn read(&self, id: &EntityId) -> DbResult<Option<RecordFrame>> {
        match self.offsets.get(id) {
            Some(offset) => self.read_at(offset).map(Some),
            None => Ok(None),
        }
    }

    /// Read and verify the frame at a known offset
    pub fn read_at(&self, offset: u64) -> DbResult<RecordFrame> {
        if self.quarantine.contains(offset) {
            return Err(EntityDbError::corruption(
                format!("records@{}", offset),
                "span is quarantined",
            ));
        }

        let mut len_bytes = [0u8; 4];
        self.file.read_exact_at(&mut len_bytes, offset)?;
        let body_len = u32::from_le_bytes(len_bytes) as usize;

        let mut frame_bytes = vec![0u8; 4 + body_len];
        self.file.read_exact_at(&mut frame_bytes, offset)?;

        match RecordFrame::decode(&frame_bytes) {
            Ok((frame, _)) => Ok(frame),
            Err(e) => {
                if self.quarantine.insert(offset) {
                    error!(
                        target: "entitydb::reader",
                        offset,
                        error = %e,
                        "record frame failed verification, span quarantined"
                    );
                }
                Err(EntityDbError::corruption(
                    format!("records@{}", offset),
                    e.to_string(),
                ))
            }
        }
    }
}

/// Result of scanning the record section on cold start
#[derive(Debug)]
pub struct RecordScan {
    /// Every decodable frame in file order: `(offset, frame)`
    pub frames: Vec<(u64, RecordFrame)>,
    /// Offsets of corrupt spans that were skipped
    pub quarantined: Vec<u64>,
    /// Where the last decodable frame ended
    pub valid_end: u64,
}

/// Scan the record section `[records_off, records_off + records_len)`
///
/// Frames are returned in file order, which is LSN order by construction;
/// the caller folds them into the offset map and indexes (later frames
/// for an id supersede earlier ones).
pub fn scan_records(file: &StoreFile, records_off: u64, records_len: u64) -> DbResult<RecordScan> {
    // The header's extent can outrun a truncated file; scan what exists
    let available = file
        .len()?
        .saturating_sub(records_off)
        .min(records_len) as usize;
    let mut buffer = vec![0u8; available];
    if available > 0 {
        file.read_exact_at(&mut buffer, records_off)?;
    }

    let mut frames = Vec::new();
    let mut quarantined = Vec::new();
    let mut offset = 0usize;
    let mut valid_end = records_off;

    while offset < buffer.len() {
        match RecordFrame::decode(&buffer[offset..]) {
            Ok((frame, consumed)) => {
                if !frame.tombstone {
                    frames.push((records_off + offset as u64, frame));
                }
                offset += consumed;
                valid_end = records_off + offset as u64;
            }
            Err(FrameError::InsufficientData) => {
                // Partial tail: expected when the header's records_len was
                // flushed ahead of a crash-interrupted append
                break;
            }
            Err(FrameError::ChecksumMismatch { .. }) | Err(FrameError::Malformed(_)) => {
                // Scan forward for the next decodable frame rather than
                // trusting the corrupt length field
                quarantined.push(records_off + offset as u64);
                let scan_end = (offset + MAX_CORRUPTION_SCAN).min(buffer.len());
                let mut found = None;
                for probe in offset + 1..scan_end {
                    if RecordFrame::decode(&buffer[probe..]).is_ok() {
                        found = Some(probe);
                        break;
                    }
                }
                match found {
                    Some(probe) => {
                        warn!(
                            target: "entitydb::recovery",
                            corrupted_offset = records_off + offset as u64,
                            resumed_offset = records_off + probe as u64,
                            skipped_bytes = probe - offset,
                            "skipped corrupt record span"
                        );
                        offset = probe;
                    }
                    None => break,
                }
            }
        }
    }

    Ok(RecordScan {
        frames,
        quarantined,
        valid_end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use entitydb_core::{TagEvent, TagId, Timestamp};
    use tempfile::TempDir;

    fn frame(n: u32) -> RecordFrame {
        RecordFrame::new(
            EntityId::generate(Timestamp::from_nanos(n as i64)),
            vec![TagEvent::add(Timestamp::from_nanos(n as i64), TagId(n))],
            format!("content-{}", n).into_bytes(),
        )
    }

    fn setup() -> (TempDir, Arc<StoreFile>, Arc<OffsetMap>, RecordReader) {
        let dir = TempDir::new().unwrap();
        let file = Arc::new(StoreFile::create(&dir.path().join("e.edb"), 1024, 512).unwrap());
        let offsets = Arc::new(OffsetMap::new());
        let reader = RecordReader::new(file.clone(), offsets.clone(), Arc::new(Quarantine::new()));
        (dir, file, offsets, reader)
    }

    #[test]
    fn test_read_roundtrip() {
        let (_dir, file, offsets, reader) = setup();
        let f = frame(1);
        let off = file.append_record(&f.encode()).unwrap();
        offsets.insert(f.id.clone(), off);

        let got = reader.read(&f.id).unwrap().unwrap();
        assert_eq!(got, f);
        assert!(reader.read(&frame(2).id).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_read_quarantines_and_keeps_rest_usable() {
        let (_dir, file, offsets, reader) = setup();
        let bad = frame(1);
        let good = frame(2);
        let bad_off = file.append_record(&bad.encode()).unwrap();
        let good_off = file.append_record(&good.encode()).unwrap();
        offsets.insert(bad.id.clone(), bad_off);
        offsets.insert(good.id.clone(), good_off);

        // Flip a content byte of the first frame
        let mut bytes = bad.encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        file.write_record_at(&bytes, bad_off).unwrap();

        let err = reader.read(&bad.id).unwrap_err();
        assert!(matches!(err, EntityDbError::Corruption { .. }));
        // Second read reports the same quarantined span
        assert!(reader.read(&bad.id).is_err());
        // The other record is untouched
        assert_eq!(reader.read(&good.id).unwrap().unwrap(), good);
    }

    #[test]
    fn test_scan_in_file_order() {
        let (_dir, file, _offsets, _reader) = setup();
        let frames: Vec<RecordFrame> = (1..=3).map(frame).collect();
        for f in &frames {
            file.append_record(&f.encode()).unwrap();
        }
        let header = file.header();
        let len = file.append_pos() - header.records_off;

        let scan = scan_records(&file, header.records_off, len).unwrap();
        assert_eq!(scan.frames.len(), 3);
        assert!(scan.quarantined.is_empty());
        for (i, (_, f)) in scan.frames.iter().enumerate() {
            assert_eq!(f, &frames[i]);
        }
        assert_eq!(scan.valid_end, header.records_off + len);
    }

    #[test]
    fn test_scan_skips_corrupt_span() {
        let (_dir, file, _offsets, _reader) = setup();
        let a = frame(1);
        let b = frame(2);
        let a_off = file.append_record(&a.encode()).unwrap();
        file.append_record(&b.encode()).unwrap();

        let mut bytes = a.encode();
        bytes[20] ^= 0xFF;
        file.write_record_at(&bytes, a_off).unwrap();

        let header = file.header();
        let len = file.append_pos() - header.records_off;
        let scan = scan_records(&file, header.records_off, len).unwrap();

        assert_eq!(scan.quarantined, vec![a_off]);
        assert_eq!(scan.frames.len(), 1);
        assert_eq!(scan.frames[0].1, b);
    }

    #[test]
    fn test_scan_stops_at_partial_tail() {
        let (_dir, file, _offsets, _reader) = setup();
        let a = frame(1);
        let a_bytes = a.encode();
        file.append_record(&a_bytes).unwrap();
        // Half of a second frame
        let b_bytes = frame(2).encode();
        file.append_record(&b_bytes[..b_bytes.len() / 2]).unwrap();

        let header = file.header();
        let len = file.append_pos() - header.records_off;
        let scan = scan_records(&file, header.records_off, len).unwrap();

        assert_eq!(scan.frames.len(), 1);
        assert_eq!(
            scan.valid_end,
            header.records_off + a_bytes.len() as u64
        );
    }
}
