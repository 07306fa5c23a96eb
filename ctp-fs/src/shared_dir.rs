//! `SharedDirectory`: the in-memory view of a directory full of shared
//! files, backed by `<root>/<filename>` (or `<root>/<filename>.crtemp` while
//! partial) and `<root>/crinfo/<filename>.crinfo` (§4.3, §4.4).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{FsErrorKind, FsResult, FsResultExt};
use crate::file::File;
use crate::fileinfo::FileInfo;
use crate::partial;

const CRINFO_DIR: &str = "crinfo";
const CRTEMP_SUFFIX: &str = ".crtemp";
const CRINFO_SUFFIX: &str = ".crinfo";

/// A directory of shared files, kept in sync with an in-memory
/// `filename -> File` map.
pub struct SharedDirectory {
    root: PathBuf,
    files: HashMap<String, File>,
}

impl SharedDirectory {
    /// Open (without yet scanning) the shared directory rooted at `root`,
    /// creating it and its `crinfo/` subdirectory if missing.
    pub fn open(root: impl Into<PathBuf>) -> FsResult<SharedDirectory> {
        let root = root.into();
        fs::create_dir_all(root.join(CRINFO_DIR))?;
        Ok(SharedDirectory {
            root,
            files: HashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rescan the directory, loading every `.crinfo` descriptor found and
    /// pairing it with whatever content is on disk: a complete file, a
    /// `.crtemp` partial, or neither (a bare descriptor with no data yet).
    pub fn refresh(&mut self) -> FsResult<()> {
        self.files.clear();

        let crinfo_dir = self.root.join(CRINFO_DIR);
        for entry in WalkDir::new(&crinfo_dir).min_depth(1).max_depth(1) {
            let entry = entry.chain_err(|| FsErrorKind::FileError("crinfo".into(), "walking crinfo directory".into()))?;
            let path = entry.path();
            let filename = match filename_from_crinfo_path(path) {
                Some(f) => f,
                None => continue,
            };

            let bytes = fs::read(path)?;
            let info = FileInfo::from_crinfo(&filename, &bytes)?;

            let file = self.load_content(&info)?;
            self.files.insert(filename, file);
        }

        Ok(())
    }

    fn load_content(&self, info: &FileInfo) -> FsResult<File> {
        let full_path = self.root.join(info.filename());
        if full_path.is_file() {
            let data = fs::read(&full_path)?;
            return Ok(File::new_complete(info.clone(), &data));
        }

        let temp_path = self.crtemp_path(info.filename());
        if temp_path.is_file() {
            let data = fs::read(&temp_path)?;
            return partial::decode(info, &data);
        }

        Ok(File::new_empty(info.clone()))
    }

    fn crinfo_path(&self, filename: &str) -> PathBuf {
        self.root.join(CRINFO_DIR).join(format!("{}{}", filename, CRINFO_SUFFIX))
    }

    fn crtemp_path(&self, filename: &str) -> PathBuf {
        self.root.join(format!("{}{}", filename, CRTEMP_SUFFIX))
    }

    fn full_path(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    /// Register a brand-new, fully missing file (e.g. on first learning of
    /// it from a peer's manifest), writing its descriptor to disk.
    pub fn add_fileinfo(&mut self, info: FileInfo) -> FsResult<()> {
        info.write(&self.crinfo_path(info.filename()))?;
        let file = File::new_empty(info.clone());
        self.files.insert(info.filename().to_string(), file);
        Ok(())
    }

    /// Insert or replace a file wholesale (e.g. a freshly hashed local
    /// file picked up by `refresh`), writing its descriptor to disk.
    pub fn add_file(&mut self, file: File) -> FsResult<()> {
        file.info().write(&self.crinfo_path(file.info().filename()))?;
        self.files.insert(file.info().filename().to_string(), file);
        Ok(())
    }

    /// Remove a file from the in-memory map and disk (content, partial, and
    /// descriptor), ignoring already-absent pieces.
    pub fn delete_file(&mut self, filename: &str) -> FsResult<()> {
        self.files.remove(filename);
        for path in [self.full_path(filename), self.crtemp_path(filename), self.crinfo_path(filename)] {
            if path.exists() {
                fs::remove_file(&path)
                    .chain_err(|| FsErrorKind::FileError(filename.to_string(), "deleting file".into()))?;
            }
        }
        Ok(())
    }

    pub fn get(&self, filename: &str) -> Option<&File> {
        self.files.get(filename)
    }

    pub fn get_mut(&mut self, filename: &str) -> Option<&mut File> {
        self.files.get_mut(filename)
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.files.contains_key(filename)
    }

    /// Every tracked filename, unordered; callers that need the manifest's
    /// sorted order should use `ctp_fs::manifest::encode` directly.
    pub fn filenames(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Flush a file's current state to disk: the full content if complete,
    /// otherwise the `.crtemp` partial encoding, plus its descriptor either
    /// way. Called once a download finishes or after each newly received
    /// block, matching how the original peer persists progress as blocks
    /// arrive rather than only at the end (§4.4).
    pub fn persist_file(&self, filename: &str) -> FsResult<()> {
        let file = self
            .files
            .get(filename)
            .ok_or_else(|| FsErrorKind::FileError(filename.to_string(), "not tracked".into()))?;

        file.info().write(&self.crinfo_path(filename))?;

        if file.is_complete() {
            let temp_path = self.crtemp_path(filename);
            fs::write(self.full_path(filename), file.into_bytes())
                .chain_err(|| FsErrorKind::FileError(filename.to_string(), "writing completed file".into()))?;
            if temp_path.exists() {
                fs::remove_file(&temp_path)
                    .chain_err(|| FsErrorKind::FileError(filename.to_string(), "removing stale .crtemp".into()))?;
            }
        } else {
            let encoded = partial::encode(file);
            fs::write(self.crtemp_path(filename), encoded)
                .chain_err(|| FsErrorKind::FileError(filename.to_string(), "writing .crtemp".into()))?;
        }

        Ok(())
    }
}

fn filename_from_crinfo_path(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    name.strip_suffix(CRINFO_SUFFIX).map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileinfo::FILEHASH_LEN;
    use ctp_wire::Block;

    #[test]
    fn positive_add_and_persist_complete_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut shared = SharedDirectory::open(dir.path()).unwrap();

        let info = FileInfo::new("hello.txt".into(), [1u8; FILEHASH_LEN], 5, 1.0);
        let file = File::new_complete(info, b"hello");
        shared.add_file(file).unwrap();
        shared.persist_file("hello.txt").unwrap();

        assert!(dir.path().join("hello.txt").is_file());
        assert!(dir.path().join("crinfo/hello.txt.crinfo").is_file());
        assert!(!dir.path().join("hello.txt.crtemp").exists());
    }

    #[test]
    fn positive_refresh_finds_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut shared = SharedDirectory::open(dir.path()).unwrap();

        let info = FileInfo::new("big.bin".into(), [2u8; FILEHASH_LEN], 10, 1.0);
        shared.add_fileinfo(info.clone()).unwrap();
        let block = Block::new([2u8; FILEHASH_LEN], 0, vec![9u8; 10]);
        shared.get_mut("big.bin").unwrap().put_block(&block);
        shared.persist_file("big.bin").unwrap();

        let mut reloaded = SharedDirectory::open(dir.path()).unwrap();
        reloaded.refresh().unwrap();
        assert!(reloaded.get("big.bin").unwrap().is_complete());
    }

    #[test]
    fn positive_delete_file_removes_all_traces() {
        let dir = tempfile::tempdir().unwrap();
        let mut shared = SharedDirectory::open(dir.path()).unwrap();
        let info = FileInfo::new("gone.txt".into(), [3u8; FILEHASH_LEN], 3, 1.0);
        shared.add_file(File::new_complete(info, b"abc")).unwrap();
        shared.persist_file("gone.txt").unwrap();

        shared.delete_file("gone.txt").unwrap();
        assert!(!shared.contains("gone.txt"));
        assert!(!dir.path().join("gone.txt").exists());
        assert!(!dir.path().join("crinfo/gone.txt.crinfo").exists());
    }
}
