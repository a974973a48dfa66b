//! Commit journal.
//!
//! Every committed transaction is appended as one checksummed frame. A frame
//! is the unit of durability: on open, frames are replayed in order and a
//! torn or corrupt trailing frame (a crash mid-commit) is discarded whole, so
//! a batch is either fully applied or not at all.

use crate::error::{Result, StoreError};
use crate::types::{Record, RecordId, Sequence, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Magic bytes for journal file.
const WAL_MAGIC: &[u8; 4] = b"RJL\0";

/// Current journal format version.
const WAL_VERSION: u8 = 1;

/// Header size (magic + version).
const HEADER_LEN: u64 = 5;

/// Frames larger than this are treated as corruption.
const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// A single journaled mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WalOperation {
    /// Insert or replace a record (full image after the change).
    Put(Record),
    /// Remove a record.
    Delete(RecordId),
}

/// One committed transaction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalEntry {
    /// Commit sequence this entry produces.
    pub sequence: Sequence,
    /// Next identity the store may hand out after this commit.
    pub next_id: u64,
    /// True if this entry is a full image that replaces all prior state.
    pub checkpoint: bool,
    /// Mutations, in the order they were made.
    pub operations: Vec<WalOperation>,
    /// When the entry was written.
    pub timestamp: Timestamp,
}

struct WalWriter {
    writer: BufWriter<File>,
    /// Offset just past the last complete frame.
    size: u64,
    /// Set when a failed append could not be cut back. Nothing more is
    /// written until a rewrite replaces the file.
    poisoned: bool,
}

/// Append-only commit journal.
pub struct WriteAheadLog {
    /// Path to the journal file.
    path: PathBuf,
    /// Write handle plus committed size.
    state: Mutex<WalWriter>,
    /// fsync after every frame.
    sync_on_commit: bool,
}

/// Outcome of reading one frame.
enum Frame {
    Entry(WalEntry, u64),
    End,
    Torn(String),
}

impl WriteAheadLog {
    /// Open or create a journal, returning it with every intact entry.
    pub fn open(path: impl AsRef<Path>, sync_on_commit: bool) -> Result<(Self, Vec<WalEntry>)> {
        let path = path.as_ref().to_path_buf();

        let (entries, size) = if path.exists() {
            Self::replay(&path)?
        } else {
            Self::write_header(&path)?;
            (Vec::new(), HEADER_LEN)
        };

        let file = OpenOptions::new().write(true).open(&path)?;
        let mut writer = BufWriter::new(file);
        writer.seek(SeekFrom::Start(size))?;

        Ok((
            Self {
                path,
                state: Mutex::new(WalWriter {
                    writer,
                    size,
                    poisoned: false,
                }),
                sync_on_commit,
            },
            entries,
        ))
    }

    /// Append one committed entry.
    ///
    /// On failure the file is cut back to the last complete frame so the
    /// journal never carries a half-written batch. If that cut fails too,
    /// the journal refuses every later append.
    pub fn append(&self, entry: &WalEntry) -> Result<()> {
        let encoded = rmp_serde::to_vec(entry)?;
        let mut state = self.state.lock();
        if state.poisoned {
            return Err(StoreError::Corruption(format!(
                "journal {} is unusable after a failed append",
                self.path.display()
            )));
        }
        let start = state.size;

        match Self::write_frame(&mut state.writer, &encoded, self.sync_on_commit) {
            Ok(written) => {
                state.size = start + written;
                debug!(sequence = entry.sequence.0, bytes = written, "journal frame appended");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "journal append failed, truncating to last frame");
                if let Err(cut) = self.cut_back(&mut state, start) {
                    warn!(error = %cut, "journal truncation failed, refusing further appends");
                    state.poisoned = true;
                }
                Err(e)
            }
        }
    }

    /// Drop everything past `start` and park a fresh writer there.
    fn cut_back(&self, state: &mut WalWriter, start: u64) -> io::Result<()> {
        let file = OpenOptions::new().write(true).open(&self.path)?;
        // Dropping the old writer flushes whatever it still buffers, and that
        // must land before the cut.
        drop(std::mem::replace(&mut state.writer, BufWriter::new(file)));
        state.writer.get_ref().set_len(start)?;
        state.writer.seek(SeekFrom::Start(start))?;
        state.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Replace the whole journal with a single checkpoint entry.
    ///
    /// Written to a temp file and renamed into place, so a crash leaves
    /// either the old journal or the new one.
    pub fn rewrite(&self, checkpoint: &WalEntry) -> Result<()> {
        let encoded = rmp_serde::to_vec(checkpoint)?;
        let mut state = self.state.lock();

        let tmp_path = self.path.with_extension("wal.tmp");
        Self::write_header(&tmp_path)?;
        let written = {
            let file = OpenOptions::new().write(true).open(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            writer.seek(SeekFrom::Start(HEADER_LEN))?;
            Self::write_frame(&mut writer, &encoded, true)?
        };
        fs::rename(&tmp_path, &self.path)?;

        let file = OpenOptions::new().write(true).open(&self.path)?;
        let mut writer = BufWriter::new(file);
        let size = HEADER_LEN + written;
        writer.seek(SeekFrom::Start(size))?;
        *state = WalWriter {
            writer,
            size,
            poisoned: false,
        };

        debug!(sequence = checkpoint.sequence.0, bytes = size, "journal rewritten");
        Ok(())
    }

    /// Size of the journal in bytes.
    pub fn size(&self) -> u64 {
        self.state.lock().size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_header(path: &Path) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(WAL_MAGIC)?;
        file.write_all(&[WAL_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    /// Read every intact frame and cut off a torn tail.
    fn replay(path: &Path) -> Result<(Vec<WalEntry>, u64)> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != WAL_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid journal magic".into()));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != WAL_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported journal version: {}",
                version[0]
            )));
        }

        let mut entries: Vec<WalEntry> = Vec::new();
        let mut good = HEADER_LEN;

        loop {
            match Self::read_frame(&mut reader)? {
                Frame::Entry(entry, len) => {
                    if let Some(prev) = entries.last() {
                        if entry.sequence <= prev.sequence {
                            return Err(StoreError::Corruption(format!(
                                "journal sequence went backwards: {:?} after {:?}",
                                entry.sequence, prev.sequence
                            )));
                        }
                    }
                    good += len;
                    entries.push(entry);
                }
                Frame::End => break,
                Frame::Torn(reason) => {
                    warn!(
                        offset = good,
                        dropped_bytes = file_len - good,
                        %reason,
                        "discarding torn journal tail"
                    );
                    break;
                }
            }
        }

        if good < file_len {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(good)?;
            file.sync_all()?;
        }

        debug!(entries = entries.len(), bytes = good, "journal replayed");
        Ok((entries, good))
    }

    fn write_frame(writer: &mut BufWriter<File>, encoded: &[u8], sync: bool) -> Result<u64> {
        let len = encoded.len() as u32;
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(encoded)?;

        let checksum = crc32fast::hash(encoded);
        writer.write_all(&checksum.to_le_bytes())?;
        writer.flush()?;

        if sync {
            writer.get_ref().sync_all()?;
        }

        Ok(4 + encoded.len() as u64 + 4)
    }

    fn read_frame(reader: &mut BufReader<File>) -> Result<Frame> {
        let mut len_bytes = [0u8; 4];
        match read_fully(reader, &mut len_bytes)? {
            0 => return Ok(Frame::End),
            4 => {}
            _ => return Ok(Frame::Torn("partial frame length".into())),
        }
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > MAX_FRAME_LEN {
            return Ok(Frame::Torn(format!("frame length {} too large", len)));
        }

        let mut encoded = vec![0u8; len];
        if read_fully(reader, &mut encoded)? != len {
            return Ok(Frame::Torn("partial frame body".into()));
        }

        let mut checksum_bytes = [0u8; 4];
        if read_fully(reader, &mut checksum_bytes)? != 4 {
            return Ok(Frame::Torn("missing frame checksum".into()));
        }
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&encoded);
        if stored_checksum != computed_checksum {
            let err = StoreError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            };
            return Ok(Frame::Torn(err.to_string()));
        }

        match rmp_serde::from_slice::<WalEntry>(&encoded) {
            Ok(entry) => Ok(Frame::Entry(entry, 4 + len as u64 + 4)),
            Err(e) => Ok(Frame::Torn(format!("undecodable frame: {}", e))),
        }
    }
}

/// Read until `buf` is full or EOF. Returns the number of bytes read.
fn read_fully(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fields;
    use tempfile::TempDir;

    fn entry(seq: u64, name: &str) -> WalEntry {
        WalEntry {
            sequence: Sequence(seq),
            next_id: seq + 1,
            checkpoint: false,
            operations: vec![WalOperation::Put(Record {
                id: RecordId(seq),
                kind: "Employee".into(),
                fields: fields([("name", name)]),
            })],
            timestamp: Timestamp::now(),
        }
    }

    #[test]
    fn test_wal_basic() {
        let dir = TempDir::new().unwrap();
        let (wal, entries) = WriteAheadLog::open(dir.path().join("test.wal"), true).unwrap();
        assert!(entries.is_empty());
        assert_eq!(wal.size(), HEADER_LEN);

        wal.append(&entry(1, "Ann")).unwrap();
        wal.append(&entry(2, "Bob")).unwrap();
        drop(wal);

        let (_wal, entries) = WriteAheadLog::open(dir.path().join("test.wal"), true).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].sequence, Sequence(2));
    }

    #[test]
    fn test_wal_discards_torn_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");

        let intact_size = {
            let (wal, _) = WriteAheadLog::open(&path, true).unwrap();
            wal.append(&entry(1, "Ann")).unwrap();
            wal.size()
        };

        // Simulate a crash halfway through the second frame.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&100u32.to_le_bytes()).unwrap();
            file.write_all(b"partial").unwrap();
        }

        let (wal, entries) = WriteAheadLog::open(&path, true).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(wal.size(), intact_size);
        assert_eq!(fs::metadata(&path).unwrap().len(), intact_size);

        // Appends land cleanly after the cut.
        wal.append(&entry(2, "Bob")).unwrap();
        drop(wal);
        let (_, entries) = WriteAheadLog::open(&path, true).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_wal_discards_checksum_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");

        {
            let (wal, _) = WriteAheadLog::open(&path, true).unwrap();
            wal.append(&entry(1, "Ann")).unwrap();
            wal.append(&entry(2, "Bob")).unwrap();
        }

        // Flip the last checksum byte.
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let (_, entries) = WriteAheadLog::open(&path, true).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sequence, Sequence(1));
    }

    #[test]
    fn test_wal_rejects_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");
        fs::write(&path, b"nope!").unwrap();

        let result = WriteAheadLog::open(&path, true);
        assert!(matches!(result, Err(StoreError::InvalidFormat(_))));
    }

    #[test]
    fn test_wal_rewrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");

        let (wal, _) = WriteAheadLog::open(&path, false).unwrap();
        for seq in 1..=5 {
            wal.append(&entry(seq, "x")).unwrap();
        }
        let before = wal.size();

        let mut checkpoint = entry(5, "x");
        checkpoint.checkpoint = true;
        wal.rewrite(&checkpoint).unwrap();
        assert!(wal.size() < before);

        wal.append(&entry(6, "y")).unwrap();
        drop(wal);

        let (_, entries) = WriteAheadLog::open(&path, false).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].checkpoint);
        assert_eq!(entries[1].sequence, Sequence(6));
    }

    #[test]
    fn test_wal_cut_back_drops_partial_frame() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");

        let (wal, _) = WriteAheadLog::open(&path, true).unwrap();
        wal.append(&entry(1, "Ann")).unwrap();
        let intact_size = wal.size();
        {
            let mut state = wal.state.lock();
            state.writer.write_all(&[0x40, 0, 0, 0, 0xAB]).unwrap();
            state.writer.flush().unwrap();
            wal.cut_back(&mut state, intact_size).unwrap();
        }
        assert_eq!(fs::metadata(&path).unwrap().len(), intact_size);

        wal.append(&entry(2, "Bob")).unwrap();
        drop(wal);

        let (_, entries) = WriteAheadLog::open(&path, true).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].sequence, Sequence(2));
    }

    #[test]
    fn test_wal_refuses_appends_once_poisoned() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");

        let (wal, _) = WriteAheadLog::open(&path, true).unwrap();
        wal.append(&entry(1, "Ann")).unwrap();
        let size = wal.size();
        wal.state.lock().poisoned = true;

        let result = wal.append(&entry(2, "Bob"));
        assert!(matches!(result, Err(StoreError::Corruption(_))));
        assert_eq!(wal.size(), size);
        assert_eq!(fs::metadata(&path).unwrap().len(), size);

        // A rewrite replaces the file and lifts the refusal.
        let mut checkpoint = entry(1, "Ann");
        checkpoint.checkpoint = true;
        wal.rewrite(&checkpoint).unwrap();
        wal.append(&entry(2, "Bob")).unwrap();
        drop(wal);

        let (_, entries) = WriteAheadLog::open(&path, true).unwrap();
        assert_eq!(entries.len(), 2);
    }
}
