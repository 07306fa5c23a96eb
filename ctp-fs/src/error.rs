//! Error types for the file model and shared directory (§7).

use std::io;
use std::path::PathBuf;

error_chain! {
    types {
        FsError, FsErrorKind, FsResultExt, FsResult;
    }

    foreign_links {
        Io(io::Error);
    }

    errors {
        /// A CRINFO/CRTEMP file on disk was malformed.
        InvalidDescriptor(path: PathBuf, reason: String) {
            description("malformed descriptor or partial-file encoding")
            display("invalid descriptor/partial file at {:?}: {}", path, reason)
        }
        /// A filesystem operation on a shared-directory entry failed for a
        /// reason other than plain I/O (e.g. a `.crtemp` with no matching
        /// `.crinfo`).
        FileError(name: String, reason: String) {
            description("operation on a shared-directory entry failed")
            display("file error for {:?}: {}", name, reason)
        }
    }
}
