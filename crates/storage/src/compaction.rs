//! Whole-file compaction
//!
//! Compaction rewrites the unified file: live records (with merged event
//! histories) are written to a temporary sibling, the dictionary lands in
//! its reserved region, the header is stamped, everything is fsynced, and
//! the temp file is renamed over the live one. Readers keep serving from
//! the old mapping until the new one is installed; a crash at any point
//! leaves the original file authoritative (the temp is unlinked on
//! startup).
//!
//! Superseded frames and the old WAL contents do not survive: the new
//! file starts with an empty WAL region.

use crate::file::{compact_temp_path, StoreFile};
use crate::format::{FileHeader, RecordFrame, DEFAULT_DICT_CAPACITY, FLAG_DICT_PRESENT};
use crate::offsets::OffsetMap;
use entitydb_core::{DbResult, EntityDbError};
use fs2::FileExt as _;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt as _;
use std::path::Path;
use tracing::info;

/// Write a compacted file and atomically install it over `live_path`
///
/// `frames` supplies the live records in the order they should land;
/// `dict_bytes` is the encoded dictionary section; `last_clean` stamps the
/// new header (the compacted file is consistent by construction). The
/// dictionary region is sized up when the dictionary has outgrown the
/// default reservation.
///
/// Returns the new file handle and the rebuilt offset map. The caller
/// swaps them in under its coarse lock and drops the old handles.
pub fn write_compacted(
    live_path: &Path,
    wal_capacity: u64,
    dict_bytes: &[u8],
    frames: impl Iterator<Item = RecordFrame>,
    last_clean: u64,
) -> DbResult<(StoreFile, OffsetMap)> {
    let temp = compact_temp_path(live_path);
    // A leftover temp from an earlier crash is dead weight
    let _ = std::fs::remove_file(&temp);

    let file = OpenOptions::new()
        .create_new(true)
        .read(true)
        .write(true)
        .open(&temp)?;
    file.try_lock_exclusive()
        .map_err(|_| EntityDbError::conflict("compaction temp file is locked"))?;

    // Leave headroom so the next generation of interns fits too
    let dict_capacity = DEFAULT_DICT_CAPACITY.max(dict_bytes.len() as u64 * 2);
    let mut header = FileHeader::new(wal_capacity, dict_capacity);
    file.write_all_at(&header.encode(), 0)?;
    file.set_len(header.records_off)?;

    file.write_all_at(dict_bytes, header.dict_off)?;
    header.dict_len = dict_bytes.len() as u64;
    header.flags |= FLAG_DICT_PRESENT;

    let offsets = OffsetMap::new();
    let mut pos = header.records_off;
    let mut record_count = 0usize;
    for frame in frames {
        let bytes = frame.encode();
        file.write_all_at(&bytes, pos)?;
        offsets.insert(frame.id.clone(), pos);
        pos += bytes.len() as u64;
        record_count += 1;
    }
    header.records_len = pos - header.records_off;
    header.wal_len = 0;
    header.last_clean = last_clean;
    file.write_all_at(&header.encode(), 0)?;
    file.sync_all()?;

    std::fs::rename(&temp, live_path)?;
    if let Some(parent) = live_path.parent() {
        if !parent.as_os_str().is_empty() {
            File::open(parent)?.sync_all()?;
        }
    }

    info!(
        target: "entitydb::compaction",
        records = record_count,
        bytes = pos,
        "compaction installed"
    );

    Ok((
        StoreFile::from_parts(live_path.to_path_buf(), file, header, pos),
        offsets,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::TagDictionary;
    use crate::reader::scan_records;
    use entitydb_core::{EntityId, TagEvent, TagId, Timestamp};
    use tempfile::TempDir;

    fn frame(n: u32) -> RecordFrame {
        RecordFrame::new(
            EntityId::generate(Timestamp::from_nanos(n as i64)),
            vec![TagEvent::add(Timestamp::from_nanos(n as i64), TagId(n))],
            vec![n as u8; 8],
        )
    }

    fn dict_bytes() -> Vec<u8> {
        let dict = TagDictionary::new();
        dict.intern("type:doc").unwrap();
        dict.encode()
    }

    #[test]
    fn test_compaction_installs_over_live_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("e.edb");

        // A live file with some junk records that compaction discards
        let live = StoreFile::create(&path, 4096, 512).unwrap();
        live.append_record(b"doomed").unwrap();
        drop(live);

        let frames: Vec<RecordFrame> = (1..=3).map(frame).collect();
        let (file, offsets) =
            write_compacted(&path, 4096, &dict_bytes(), frames.clone().into_iter(), 777).unwrap();

        assert_eq!(offsets.len(), 3);
        let header = file.header();
        assert_eq!(header.last_clean, 777);
        assert!(header.dict_present());
        assert_eq!(header.wal_len, 0);

        // Records are all present and the temp file is gone
        let scan = scan_records(&file, header.records_off, header.records_len).unwrap();
        assert_eq!(scan.frames.len(), 3);
        assert!(!compact_temp_path(&path).exists());

        // Offsets point at the real frames
        for f in &frames {
            let off = offsets.get(&f.id).unwrap();
            assert!(scan.frames.iter().any(|(o, sf)| *o == off && sf == f));
        }
    }

    #[test]
    fn test_compacted_file_reopens_with_dictionary() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("e.edb");
        StoreFile::create(&path, 4096, 512).unwrap();

        let (file, _) =
            write_compacted(&path, 4096, &dict_bytes(), vec![frame(1)].into_iter(), 5).unwrap();
        drop(file);

        let reopened = StoreFile::open(&path).unwrap();
        let header = reopened.header();
        assert_eq!(header.last_clean, 5);

        let section = reopened.read_dict_section().unwrap().unwrap();
        let dict = TagDictionary::decode(&section).unwrap();
        assert_eq!(dict.lookup_id("type:doc"), Some(TagId(1)));

        let scan = scan_records(&reopened, header.records_off, header.records_len).unwrap();
        assert_eq!(scan.frames.len(), 1);
    }

    #[test]
    fn test_stale_temp_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("e.edb");
        StoreFile::create(&path, 4096, 512).unwrap();
        std::fs::write(compact_temp_path(&path), b"stale garbage").unwrap();

        let (_file, offsets) =
            write_compacted(&path, 4096, &dict_bytes(), vec![frame(9)].into_iter(), 1).unwrap();
        assert_eq!(offsets.len(), 1);
    }
}
