//! The content-addressed file model: block decomposition, on-disk
//! descriptors (CRINFO), partial downloads (CRTEMP), the manifest, and the
//! in-memory `SharedDirectory` that ties them to a directory on disk.

#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate log;

extern crate byteorder;
extern crate chrono;
extern crate ctp_wire;
extern crate md5;
extern crate walkdir;

pub mod error;
pub mod fileinfo;
pub mod file;
pub mod manifest;
pub mod partial;
pub mod shared_dir;

pub use error::{FsError, FsErrorKind, FsResult};
pub use file::File;
pub use fileinfo::FileInfo;
pub use shared_dir::SharedDirectory;

/// Maximum number of content bytes carried in a single block, derived from
/// the wire crate's body budget minus the 25-byte block header (§3).
pub const MAX_BLOCK_SIZE: usize = ctp_wire::MAX_BODY - ctp_wire::block::BLOCK_HEADER_LEN;

/// Compute the number of blocks a file of `filesize` bytes decomposes into.
pub fn block_count_for_size(filesize: u64) -> u32 {
    if filesize == 0 {
        return 1;
    }
    ((filesize + MAX_BLOCK_SIZE as u64 - 1) / MAX_BLOCK_SIZE as u64) as u32
}

/// Expected length in bytes of block `block_id` of a file with `filesize`
/// and `block_count` blocks. Every block is `MAX_BLOCK_SIZE` except the
/// last, which holds the remainder.
pub fn block_len(filesize: u64, block_count: u32, block_id: u32) -> usize {
    if block_id + 1 == block_count {
        let full_blocks = (block_count - 1) as u64 * MAX_BLOCK_SIZE as u64;
        (filesize - full_blocks) as usize
    } else {
        MAX_BLOCK_SIZE
    }
}
