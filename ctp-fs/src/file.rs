//! `File`: a `FileInfo` descriptor paired with its block storage, complete
//! or partial (§3, §4.3, §4.4).

use ctp_wire::Block;

use crate::fileinfo::FileInfo;
use crate::{block_count_for_size, block_len};

/// A file tracked by a `SharedDirectory`: its descriptor plus one slot per
/// block. A slot holds `Some(data)` once that block has been written, and
/// `None` while it is still missing. A `File` with no `None` slots is
/// complete; one with at least one is a partial download backed by a
/// `.crtemp` file on disk (§4.4).
#[derive(Clone, Debug)]
pub struct File {
    info: FileInfo,
    blocks: Vec<Option<Vec<u8>>>,
}

impl File {
    /// A brand new, fully missing file: every block slot starts empty.
    pub fn new_empty(info: FileInfo) -> File {
        let count = info.block_count() as usize;
        File {
            info,
            blocks: vec![None; count],
        }
    }

    /// A fully present file built from a flat byte buffer, chopped into
    /// `MAX_BLOCK_SIZE`-sized blocks per `block_len`.
    pub fn new_complete(info: FileInfo, data: &[u8]) -> File {
        let count = info.block_count();
        let mut blocks = Vec::with_capacity(count as usize);
        let mut offset = 0usize;
        for id in 0..count {
            let len = block_len(info.filesize(), count, id);
            blocks.push(Some(data[offset..offset + len].to_vec()));
            offset += len;
        }
        File { info, blocks }
    }

    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    pub fn block_count(&self) -> u32 {
        self.blocks.len() as u32
    }

    /// True once every block slot is filled.
    pub fn is_complete(&self) -> bool {
        self.blocks.iter().all(Option::is_some)
    }

    /// Ids of every still-missing block, in ascending order.
    pub fn missing_block_ids(&self) -> Vec<u32> {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.is_none())
            .map(|(i, _)| i as u32)
            .collect()
    }

    /// Fetch block `id` as a wire `Block`, or `None` if the id is out of
    /// range or not yet downloaded.
    pub fn get_block(&self, id: u32) -> Option<Block> {
        let data = self.blocks.get(id as usize)?.as_ref()?;
        Some(Block::new(*self.info.filehash(), id, data.clone()))
    }

    /// Store `block`'s data at its own `block_id`, growing the slot table if
    /// this descriptor predates a resize (should not happen in practice
    /// since `block_count` is derived from `filesize`, but guards against
    /// a stale `FileInfo`). Returns `false` if `block_id` is out of range.
    pub fn put_block(&mut self, block: &Block) -> bool {
        let id = block.block_id() as usize;
        if id >= self.blocks.len() {
            return false;
        }
        self.blocks[id] = Some(block.data().to_vec());
        true
    }

    /// Concatenate every block into the full file contents. Panics if
    /// called on an incomplete file; callers must check `is_complete`
    /// first, mirroring the invariant that only finished downloads are
    /// written out as the real file (§4.4).
    pub fn into_bytes(&self) -> Vec<u8> {
        assert!(self.is_complete(), "into_bytes called on a partial file");
        let mut out = Vec::with_capacity(self.info.filesize() as usize);
        for b in &self.blocks {
            out.extend_from_slice(b.as_ref().unwrap());
        }
        out
    }

    /// Rebuild a `File`'s slot table to match a new `FileInfo`'s block
    /// count, discarding all downloaded data. Used when a peer learns of a
    /// newer version of a file it only partially has (§4.9).
    pub fn reset_for(info: FileInfo) -> File {
        File::new_empty(info)
    }
}

/// Sanity check that a `FileInfo`'s declared `block_count` matches the
/// derived value for its `filesize`, used when validating descriptors read
/// from disk or over the wire.
pub fn block_count_consistent(info: &FileInfo) -> bool {
    info.block_count() == block_count_for_size(info.filesize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileinfo::FILEHASH_LEN;

    fn info(size: u64) -> FileInfo {
        FileInfo::new("f.bin".into(), [3u8; FILEHASH_LEN], size, 1.0)
    }

    #[test]
    fn positive_complete_roundtrip() {
        let data = vec![7u8; 10];
        let file = File::new_complete(info(10), &data);
        assert!(file.is_complete());
        assert_eq!(file.into_bytes(), data);
    }

    #[test]
    fn positive_partial_fill() {
        let mut file = File::new_empty(info(10));
        assert!(!file.is_complete());
        assert_eq!(file.missing_block_ids(), vec![0]);

        let block = Block::new([3u8; FILEHASH_LEN], 0, vec![1, 2, 3]);
        assert!(file.put_block(&block));
        assert!(file.is_complete());
        assert!(file.missing_block_ids().is_empty());
    }

    #[test]
    fn negative_put_block_out_of_range() {
        let mut file = File::new_empty(info(10));
        let block = Block::new([3u8; FILEHASH_LEN], 5, vec![1]);
        assert!(!file.put_block(&block));
    }

    #[test]
    fn positive_block_count_consistency() {
        assert!(block_count_consistent(&info(10)));
    }
}
