//! `FileInfo` (CRINFO): per-file content descriptor and its on-disk format
//! (§3, §4.3).

use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::Utc;

use crate::error::{FsErrorKind, FsResult, FsResultExt};
use crate::{block_count_for_size, MAX_BLOCK_SIZE};

/// Length of the raw MD5 content hash, shared with the wire crate's block
/// codec since a `FileInfo`'s hash is what every `Block::filehash` refers to.
pub const FILEHASH_LEN: usize = ctp_wire::block::FILEHASH_LEN;

const MAGIC: &str = "CRINFO";

/// Per-file content descriptor: content hash, size, timestamp, block count.
#[derive(Clone, Debug)]
pub struct FileInfo {
    filename: String,
    filehash: [u8; FILEHASH_LEN],
    filesize: u64,
    timestamp: f64,
    block_count: u32,
}

impl FileInfo {
    /// Construct a `FileInfo` directly, deriving `block_count` from
    /// `filesize`. Used by both `from_file` and `from_crinfo`.
    pub fn new(filename: String, filehash: [u8; FILEHASH_LEN], filesize: u64, timestamp: f64) -> FileInfo {
        let block_count = block_count_for_size(filesize);
        FileInfo {
            filename,
            filehash,
            filesize,
            timestamp,
            block_count,
        }
    }

    /// Build a `FileInfo` by reading and hashing the whole file at `path`,
    /// recording the current UTC timestamp (§4.3).
    pub fn from_file(filename: &str, path: &Path) -> FsResult<FileInfo> {
        let contents = fs::read(path)?;
        let digest = md5::compute(&contents);
        let filesize = contents.len() as u64;
        let timestamp = now_unix_seconds();

        Ok(FileInfo::new(filename.to_string(), digest.0, filesize, timestamp))
    }

    /// Parse an on-disk CRINFO descriptor (§3):
    /// `CRINFO <filesize> <timestamp>\r\n<16-byte filehash>`.
    pub fn from_crinfo(filename: &str, bytes: &[u8]) -> FsResult<FileInfo> {
        let sep = find_crlf(bytes).ok_or_else(|| {
            FsErrorKind::InvalidDescriptor(filename.into(), "missing header terminator".into())
        })?;

        let header_line = std::str::from_utf8(&bytes[..sep]).map_err(|_| {
            FsErrorKind::InvalidDescriptor(filename.into(), "header is not valid UTF-8".into())
        })?;

        let mut parts = header_line.split_whitespace();
        let magic = parts
            .next()
            .ok_or_else(|| FsErrorKind::InvalidDescriptor(filename.into(), "empty header".into()))?;
        if magic != MAGIC {
            bail!(FsErrorKind::InvalidDescriptor(filename.into(), format!("bad magic {:?}", magic)));
        }

        let filesize: u64 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| FsErrorKind::InvalidDescriptor(filename.into(), "bad filesize field".into()))?;
        let timestamp: f64 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| FsErrorKind::InvalidDescriptor(filename.into(), "bad timestamp field".into()))?;

        let hash_bytes = &bytes[sep + 2..];
        if hash_bytes.len() != FILEHASH_LEN {
            bail!(FsErrorKind::InvalidDescriptor(
                filename.into(),
                format!("filehash must be {} bytes, got {}", FILEHASH_LEN, hash_bytes.len())
            ));
        }
        let mut filehash = [0u8; FILEHASH_LEN];
        filehash.copy_from_slice(hash_bytes);

        Ok(FileInfo::new(filename.to_string(), filehash, filesize, timestamp))
    }

    /// Serialize to the on-disk CRINFO format.
    pub fn to_crinfo_bytes(&self) -> Vec<u8> {
        let mut buf = format!("{} {} {}\r\n", MAGIC, self.filesize, self.timestamp).into_bytes();
        buf.extend_from_slice(&self.filehash);
        buf
    }

    /// Write the descriptor to `path`, truncating any existing file. No
    /// crash-safety guarantee beyond this open-truncate-write (§4.3).
    pub fn write(&self, path: &Path) -> FsResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut f = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .chain_err(|| FsErrorKind::FileError(self.filename.clone(), "opening CRINFO for write".into()))?;
        f.write_all(&self.to_crinfo_bytes())
            .chain_err(|| FsErrorKind::FileError(self.filename.clone(), "writing CRINFO".into()))?;
        f.sync_all()
            .chain_err(|| FsErrorKind::FileError(self.filename.clone(), "fsync CRINFO".into()))?;
        Ok(())
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn filehash(&self) -> &[u8; FILEHASH_LEN] {
        &self.filehash
    }

    pub fn filesize(&self) -> u64 {
        self.filesize
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    /// Two `FileInfo`s are equal iff their `filehash` matches.
    pub fn is_equal(&self, other: &FileInfo) -> bool {
        self.filehash == other.filehash
    }

    /// Two `FileInfo`s are synced iff both `filehash` and `timestamp` match.
    pub fn is_synced(&self, other: &FileInfo) -> bool {
        self.is_equal(other) && self.timestamp == other.timestamp
    }

    /// Two `FileInfo`s are strictly equal iff every field matches.
    pub fn is_strictly_equal(&self, other: &FileInfo) -> bool {
        self.filename == other.filename && self.is_synced(other) && self.filesize == other.filesize
    }
}

fn find_crlf(bytes: &[u8]) -> Option<usize> {
    bytes.windows(2).position(|w| w == b"\r\n")
}

fn now_unix_seconds() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + now.timestamp_subsec_nanos() as f64 / 1_000_000_000.0
}

/// Little helper kept alongside `FileInfo` since both block-size helpers in
/// `lib.rs` and this module need the constant; re-exported for convenience.
pub fn max_block_size() -> usize {
    MAX_BLOCK_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_crinfo_roundtrip() {
        let info = FileInfo::new("a.txt".into(), [9u8; FILEHASH_LEN], 4000, 12345.5);
        let bytes = info.to_crinfo_bytes();

        let parsed = FileInfo::from_crinfo("a.txt", &bytes).unwrap();
        assert!(info.is_strictly_equal(&parsed));
        assert_eq!(parsed.block_count(), 4);
    }

    #[test]
    fn positive_block_count_exact_multiple() {
        let size = (MAX_BLOCK_SIZE * 3) as u64;
        let info = FileInfo::new("b.bin".into(), [0u8; FILEHASH_LEN], size, 0.0);
        assert_eq!(info.block_count(), 3);
    }

    #[test]
    fn negative_bad_magic() {
        let bytes = b"NOTCRINFO 4 1.0\r\n0123456789012345".to_vec();
        assert!(FileInfo::from_crinfo("x", &bytes).is_err());
    }

    #[test]
    fn negative_bad_hash_length() {
        let bytes = b"CRINFO 4 1.0\r\nshort".to_vec();
        assert!(FileInfo::from_crinfo("x", &bytes).is_err());
    }

    #[test]
    fn equality_semantics() {
        let a = FileInfo::new("f".into(), [1u8; FILEHASH_LEN], 10, 1.0);
        let b = FileInfo::new("f".into(), [1u8; FILEHASH_LEN], 10, 2.0);
        let c = FileInfo::new("f".into(), [2u8; FILEHASH_LEN], 10, 1.0);

        assert!(a.is_equal(&b));
        assert!(!a.is_synced(&b));
        assert!(!a.is_equal(&c));
    }
}
