//! Unified file handle
//!
//! One file per deployment. Reads are positioned (`read_at`) and take no
//! lock; appends to the WAL and record regions serialize through a small
//! state mutex. The header is rewritten only at clean shutdown and
//! compaction; between flushes the real extents live in memory and crash
//! recovery rediscovers them by scanning.

use crate::format::{FileHeader, FrameError, HEADER_SIZE};
use entitydb_core::{DbResult, EntityDbError};
use fs2::FileExt as _;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt as _;
use std::path::{Path, PathBuf};

/// Suffix of the temporary file written during compaction
pub const COMPACT_SUFFIX: &str = ".compact";

#[derive(Debug)]
struct FileState {
    header: FileHeader,
    /// Next record append position
    append_pos: u64,
    /// WAL bytes in use (live extent, not the header's stale copy)
    wal_used: u64,
}

/// Handle to the unified file
#[derive(Debug)]
pub struct StoreFile {
    path: PathBuf,
    file: File,
    state: Mutex<FileState>,
}

impl StoreFile {
    /// Create a fresh unified file
    ///
    /// Fails with `Conflict` if the path exists. The WAL and dictionary
    /// regions are zero-filled by extending the file to `records_off`.
    pub fn create(path: &Path, wal_capacity: u64, dict_capacity: u64) -> DbResult<Self> {
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    EntityDbError::conflict(format!("file already exists: {}", path.display()))
                }
                _ => e.into(),
            })?;
        file.try_lock_exclusive()
            .map_err(|_| EntityDbError::conflict("unified file is locked by another process"))?;

        let header = FileHeader::new(wal_capacity, dict_capacity);
        file.write_all_at(&header.encode(), 0)?;
        file.set_len(header.records_off)?;
        file.sync_all()?;

        Ok(StoreFile {
            path: path.to_path_buf(),
            file,
            state: Mutex::new(FileState {
                append_pos: header.records_off,
                wal_used: 0,
                header,
            }),
        })
    }

    /// Open an existing unified file and validate its header
    pub fn open(path: &Path) -> DbResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        file.try_lock_exclusive()
            .map_err(|_| EntityDbError::conflict("unified file is locked by another process"))?;

        let mut header_bytes = vec![0u8; HEADER_SIZE];
        file.read_exact_at(&mut header_bytes, 0).map_err(|e| {
            EntityDbError::corruption("header", format!("unreadable header: {}", e))
        })?;
        let header = FileHeader::decode(&header_bytes).map_err(|e| match e {
            FrameError::ChecksumMismatch { .. } => {
                EntityDbError::corruption("header", e.to_string())
            }
            other => EntityDbError::corruption("header", other.to_string()),
        })?;

        Ok(StoreFile {
            path: path.to_path_buf(),
            file,
            state: Mutex::new(FileState {
                append_pos: header.records_off + header.records_len,
                wal_used: header.wal_len,
                header,
            }),
        })
    }

    /// Wrap an already-written file (used by compaction before the rename)
    pub(crate) fn from_parts(
        path: PathBuf,
        file: File,
        header: FileHeader,
        append_pos: u64,
    ) -> Self {
        StoreFile {
            path,
            file,
            state: Mutex::new(FileState {
                append_pos,
                wal_used: 0,
                header,
            }),
        }
    }

    /// The file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A copy of the current in-memory header
    pub fn header(&self) -> FileHeader {
        self.state.lock().header
    }

    /// Current end of the record section
    pub fn append_pos(&self) -> u64 {
        self.state.lock().append_pos
    }

    /// Current WAL bytes in use
    pub fn wal_used(&self) -> u64 {
        self.state.lock().wal_used
    }

    /// Record recovery results: where the WAL and record section really end
    pub fn set_extents(&self, wal_used: u64, append_pos: u64) {
        let mut state = self.state.lock();
        state.wal_used = wal_used;
        state.append_pos = append_pos;
    }

    /// Current file length on disk
    pub fn len(&self) -> DbResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Positioned read
    pub fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> DbResult<()> {
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    /// Append a record frame; returns the offset it was written at
    pub fn append_record(&self, bytes: &[u8]) -> DbResult<u64> {
        let mut state = self.state.lock();
        let offset = state.append_pos;
        self.file.write_all_at(bytes, offset)?;
        state.append_pos += bytes.len() as u64;
        Ok(offset)
    }

    /// Overwrite a record frame during replay (same bytes, same position)
    pub fn write_record_at(&self, bytes: &[u8], offset: u64) -> DbResult<()> {
        self.file.write_all_at(bytes, offset)?;
        let mut state = self.state.lock();
        state.append_pos = state.append_pos.max(offset + bytes.len() as u64);
        Ok(())
    }

    /// Append a WAL frame; returns the offset it was written at
    ///
    /// Fails with `Backpressure` when the frame would overflow the
    /// reserved WAL region; the caller must compact.
    pub fn append_wal(&self, bytes: &[u8]) -> DbResult<u64> {
        let mut state = self.state.lock();
        let capacity = state.header.wal_capacity();
        if state.wal_used + bytes.len() as u64 > capacity {
            return Err(EntityDbError::backpressure("wal region full"));
        }
        let offset = state.header.wal_off + state.wal_used;
        self.file.write_all_at(bytes, offset)?;
        state.wal_used += bytes.len() as u64;
        Ok(offset)
    }

    /// fsync file data
    pub fn sync(&self) -> DbResult<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Rewrite the header from live state and fsync everything
    ///
    /// `last_clean` is the clean-shutdown stamp (0 keeps the file marked
    /// dirty). The dictionary fields are left untouched: the dictionary
    /// region is written only by compaction, which builds its own header.
    pub fn flush_header(&self, last_clean: u64) -> DbResult<()> {
        let mut state = self.state.lock();
        state.header.wal_len = state.wal_used;
        state.header.records_len = state.append_pos - state.header.records_off;
        state.header.last_clean = last_clean;
        self.file.write_all_at(&state.header.encode(), 0)?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Mark the file dirty (clears `last_clean`) before the first mutation
    ///
    /// Called once on the first write after open, so a crash at any later
    /// point forces WAL replay on the next open.
    pub fn mark_dirty(&self) -> DbResult<()> {
        let mut state = self.state.lock();
        if state.header.last_clean == 0 {
            return Ok(());
        }
        state.header.last_clean = 0;
        self.file.write_all_at(&state.header.encode(), 0)?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Read the dictionary section named by the header
    pub fn read_dict_section(&self) -> DbResult<Option<Vec<u8>>> {
        let header = self.header();
        if !header.dict_present() {
            return Ok(None);
        }
        let mut buf = vec![0u8; header.dict_len as usize];
        self.read_exact_at(&mut buf, header.dict_off)?;
        Ok(Some(buf))
    }
}

/// Unlink a leftover compaction temp file, if any
///
/// Called on startup: a temp file means a crash mid-compaction, and the
/// original file is still authoritative.
pub fn remove_stale_compact_temp(path: &Path) -> DbResult<bool> {
    let temp = compact_temp_path(path);
    match std::fs::remove_file(&temp) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Path of the compaction temp file for a given unified file
pub fn compact_temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(COMPACT_SUFFIX);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_path(dir: &TempDir) -> PathBuf {
        dir.path().join("entities.edb")
    }

    #[test]
    fn test_create_then_open() {
        let dir = TempDir::new().unwrap();
        let path = temp_path(&dir);

        let f = StoreFile::create(&path, 1024, 512).unwrap();
        let header = f.header();
        assert_eq!(header.wal_capacity(), 1024);
        assert_eq!(header.dict_capacity(), 512);
        assert_eq!(f.append_pos(), header.records_off);
        drop(f);

        let f = StoreFile::open(&path).unwrap();
        assert_eq!(f.header(), header);
    }

    #[test]
    fn test_create_refuses_existing() {
        let dir = TempDir::new().unwrap();
        let path = temp_path(&dir);
        let _f = StoreFile::create(&path, 1024, 512).unwrap();
        drop(_f);
        let err = StoreFile::create(&path, 1024, 512).unwrap_err();
        assert!(matches!(err, EntityDbError::Conflict { .. }));
    }

    #[test]
    fn test_record_append_and_read() {
        let dir = TempDir::new().unwrap();
        let f = StoreFile::create(&temp_path(&dir), 1024, 512).unwrap();

        let off1 = f.append_record(b"first").unwrap();
        let off2 = f.append_record(b"second").unwrap();
        assert_eq!(off2, off1 + 5);

        let mut buf = [0u8; 6];
        f.read_exact_at(&mut buf, off2).unwrap();
        assert_eq!(&buf, b"second");
    }

    #[test]
    fn test_wal_append_respects_capacity() {
        let dir = TempDir::new().unwrap();
        let f = StoreFile::create(&temp_path(&dir), 16, 512).unwrap();

        f.append_wal(&[1u8; 10]).unwrap();
        let err = f.append_wal(&[2u8; 10]).unwrap_err();
        assert!(matches!(err, EntityDbError::Backpressure { .. }));
    }

    #[test]
    fn test_flush_header_persists_extents() {
        let dir = TempDir::new().unwrap();
        let path = temp_path(&dir);
        let f = StoreFile::create(&path, 1024, 512).unwrap();
        f.append_wal(&[7u8; 20]).unwrap();
        f.append_record(b"record bytes").unwrap();
        f.flush_header(42).unwrap();
        drop(f);

        let f = StoreFile::open(&path).unwrap();
        let header = f.header();
        assert_eq!(header.wal_len, 20);
        assert_eq!(header.records_len, 12);
        assert_eq!(header.last_clean, 42);
    }

    #[test]
    fn test_mark_dirty_clears_last_clean() {
        let dir = TempDir::new().unwrap();
        let path = temp_path(&dir);
        let f = StoreFile::create(&path, 1024, 512).unwrap();
        f.flush_header(99).unwrap();
        f.mark_dirty().unwrap();
        drop(f);

        let f = StoreFile::open(&path).unwrap();
        assert_eq!(f.header().last_clean, 0);
    }

    #[test]
    fn test_stale_temp_removal() {
        let dir = TempDir::new().unwrap();
        let path = temp_path(&dir);
        assert!(!remove_stale_compact_temp(&path).unwrap());
        std::fs::write(compact_temp_path(&path), b"junk").unwrap();
        assert!(remove_stale_compact_temp(&path).unwrap());
        assert!(!compact_temp_path(&path).exists());
    }
}
