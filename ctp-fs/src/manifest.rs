//! The manifest: a sorted list of every filename a peer or server shares,
//! itself addressed as an ordinary `File` so it can be synced with the same
//! BLOCK_REQUEST/BLOCK_RESPONSE machinery as any other content (§3, §4.5).

use crate::file::File;
use crate::fileinfo::FileInfo;

/// Reserved filename every cluster member uses for its manifest.
pub const MANIFEST_FILENAME: &str = "CRMANIFEST";

/// Encode a sorted filename list as the manifest's file contents: one
/// filename per line, `\n`-terminated, sorted so that two directories with
/// the same contents always produce byte-identical manifests (and thus the
/// same `filehash`).
pub fn encode(filenames: &[String]) -> Vec<u8> {
    let mut sorted = filenames.to_vec();
    sorted.sort();

    let mut out = Vec::new();
    for name in &sorted {
        out.extend_from_slice(name.as_bytes());
        out.push(b'\n');
    }
    out
}

/// Parse manifest file contents back into a filename list.
pub fn decode(data: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(data)
        .lines()
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Build the manifest's `File`, hashing its own encoded contents just like
/// any other shared file. `timestamp` should be the caller's current time.
pub fn build_file(filenames: &[String], timestamp: f64) -> File {
    let data = encode(filenames);
    let digest = md5::compute(&data);
    let info = FileInfo::new(
        MANIFEST_FILENAME.to_string(),
        digest.0,
        data.len() as u64,
        timestamp,
    );
    File::new_complete(info, &data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_sorted_roundtrip() {
        let names = vec!["b.txt".to_string(), "a.txt".to_string(), "c.bin".to_string()];
        let encoded = encode(&names);
        let decoded = decode(&encoded);
        assert_eq!(decoded, vec!["a.txt", "b.txt", "c.bin"]);
    }

    #[test]
    fn positive_build_file_is_complete() {
        let names = vec!["only.txt".to_string()];
        let file = manifest_build(&names);
        assert!(file.is_complete());
        assert_eq!(decode(&file.into_bytes()), names);
    }

    fn manifest_build(names: &[String]) -> File {
        build_file(names, 42.0)
    }

    #[test]
    fn positive_empty_manifest() {
        let file = build_file(&[], 1.0);
        assert!(file.is_complete());
        assert!(decode(&file.into_bytes()).is_empty());
    }
}
