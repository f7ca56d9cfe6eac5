use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use cre_types::PendingWrite;

use crate::backend::JournalBackend;
use crate::config::SyncMode;
use crate::error::{JournalError, JournalResult};
use crate::record::JournalRecord;

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

/// File extension of journal segments.
const EXTENSION: &str = "journal";

/// Crash-recoverable journal segment on disk.
///
/// On-disk format, one frame per record:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized JournalRecord)]
/// ```
/// On load the file is read front-to-back; frames failing the CRC check are
/// skipped and a torn tail ends the scan.
pub struct FileJournal {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    sync_mode: SyncMode,
}

impl FileJournal {
    /// Open (or create) the segment at `path`.
    pub fn open(path: &Path, sync_mode: SyncMode) -> JournalResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|_| JournalError::InvalidPath(parent.to_path_buf()))?;
        }
        let file = open_append(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
            sync_mode,
        })
    }

    /// Open the segment for `namespace` (normally a user id) under `dir`.
    pub fn open_namespace(dir: &Path, namespace: &str, sync_mode: SyncMode) -> JournalResult<Self> {
        let path = dir.join(format!("{}.{EXTENSION}", namespace_stem(namespace)));
        Self::open(&path, sync_mode)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sync(&self, writer: &mut BufWriter<File>) -> io::Result<()> {
        writer.flush()?;
        if matches!(self.sync_mode, SyncMode::EveryWrite) {
            writer.get_ref().sync_all()?;
        }
        Ok(())
    }
}

impl JournalBackend for FileJournal {
    fn load(&self) -> JournalResult<Vec<JournalRecord>> {
        let mut file = BufReader::new(File::open(&self.path)?);
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let mut records = Vec::new();
        let mut offset = 0usize;
        while offset + HEADER_SIZE <= buf.len() {
            let length = u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]]) as usize;
            let expected_crc = u32::from_le_bytes([buf[offset + 4], buf[offset + 5], buf[offset + 6], buf[offset + 7]]);
            let start = offset + HEADER_SIZE;

            if length == 0 || start + length > buf.len() {
                warn!(offset, length, file_len = buf.len(), "torn journal tail; stopping load");
                break;
            }

            let payload = &buf[start..start + length];
            let actual_crc = crc32fast::hash(payload);
            if actual_crc != expected_crc {
                warn!(offset, expected = expected_crc, actual = actual_crc, "CRC mismatch; skipping journal record");
            } else {
                match bincode::deserialize::<JournalRecord>(payload) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(offset, error = %e, "undecodable journal record; skipping"),
                }
            }
            offset = start + length;
        }

        debug!(path = %self.path.display(), records = records.len(), "journal loaded");
        Ok(records)
    }

    fn append(&self, record: &JournalRecord) -> JournalResult<()> {
        let frame = frame(record)?;
        let mut writer = self.writer.lock().expect("journal mutex poisoned");
        writer.write_all(&frame)?;
        self.sync(&mut writer)?;
        debug!(len = frame.len(), "journal append");
        Ok(())
    }

    fn rewrite(&self, pending: &[PendingWrite]) -> JournalResult<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut writer = self.writer.lock().expect("journal mutex poisoned");

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        for write in pending {
            tmp.write_all(&frame(&JournalRecord::Append(write.clone()))?)?;
        }
        tmp.flush()?;
        if matches!(self.sync_mode, SyncMode::EveryWrite) {
            tmp.as_file().sync_all()?;
        }
        tmp.persist(&self.path).map_err(|e| JournalError::Io(e.error))?;

        *writer = BufWriter::new(open_append(&self.path)?);
        debug!(path = %self.path.display(), pending = pending.len(), "journal rewritten");
        Ok(())
    }
}

impl std::fmt::Debug for FileJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileJournal").field("path", &self.path).finish()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).read(true).append(true).open(path)
}

fn frame(record: &JournalRecord) -> JournalResult<Vec<u8>> {
    let payload = bincode::serialize(record)?;
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Map a namespace to a file stem. Lowercase ASCII letters, digits, `-`
/// and `_` are kept; every other byte becomes `%XX`, so distinct namespaces
/// never share a file, even on case-insensitive file systems.
pub(crate) fn namespace_stem(namespace: &str) -> String {
    if namespace.is_empty() {
        return "%".into();
    }
    let mut stem = String::with_capacity(namespace.len());
    for b in namespace.bytes() {
        if b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'-' | b'_') {
            stem.push(char::from(b));
        } else {
            stem.push_str(&format!("%{b:02X}"));
        }
    }
    stem
}
