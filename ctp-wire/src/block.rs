//! Messaging primitives for block request/response bodies (§3, §4.2).
//!
//! Hand-parsed with fixed-width slicing rather than a parser-combinator
//! library: the layout is a fixed 25-byte header, not a grammar, the same
//! way `bip_utracker`'s `CompactPeersV4`/`CompactPeersV6` are decoded by
//! plain chunking instead of `nom`.

use byteorder::{BigEndian, ByteOrder};

/// Length of a `filehash`.
pub const FILEHASH_LEN: usize = 16;

/// Separator between `block_id` and `data` in the wire encoding.
const SEPARATOR: &[u8; 4] = b"\r\n\r\n";

/// Size of the fixed block header: 16-byte hash + 1-byte space + 4-byte id + 4-byte separator.
pub const BLOCK_HEADER_LEN: usize = FILEHASH_LEN + 1 + 4 + SEPARATOR.len();

/// A fixed-maximum-size slice of a file, identified by `(filehash, block_id)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    filehash: [u8; FILEHASH_LEN],
    block_id: u32,
    data: Vec<u8>,
}

impl Block {
    /// Create a new `Block`.
    pub fn new(filehash: [u8; FILEHASH_LEN], block_id: u32, data: Vec<u8>) -> Block {
        Block {
            filehash,
            block_id,
            data,
        }
    }

    pub fn filehash(&self) -> &[u8; FILEHASH_LEN] {
        &self.filehash
    }

    pub fn block_id(&self) -> u32 {
        self.block_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// True if this block carries content (a non-"miss" response).
    pub fn downloaded(&self) -> bool {
        !self.data.is_empty()
    }

    /// Pack this block as `filehash || ' ' || block_id(BE) || "\r\n\r\n" || data`.
    pub fn pack(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(BLOCK_HEADER_LEN + self.data.len());
        buf.extend_from_slice(&self.filehash);
        buf.push(b' ');

        let mut id_bytes = [0u8; 4];
        BigEndian::write_u32(&mut id_bytes, self.block_id);
        buf.extend_from_slice(&id_bytes);

        buf.extend_from_slice(SEPARATOR);
        buf.extend_from_slice(&self.data);

        buf
    }

    /// Unpack a block, returning `None` if the structure is malformed
    /// (too short, or missing the double-CRLF separator at the expected
    /// offset).
    pub fn unpack(packet: &[u8]) -> Option<Block> {
        if packet.len() < BLOCK_HEADER_LEN {
            return None;
        }

        let mut filehash = [0u8; FILEHASH_LEN];
        filehash.copy_from_slice(&packet[0..FILEHASH_LEN]);

        if packet[FILEHASH_LEN] != b' ' {
            return None;
        }

        let id_start = FILEHASH_LEN + 1;
        let id_end = id_start + 4;
        let block_id = BigEndian::read_u32(&packet[id_start..id_end]);

        let sep_start = id_end;
        let sep_end = sep_start + SEPARATOR.len();
        if &packet[sep_start..sep_end] != SEPARATOR {
            return None;
        }

        let data = packet[sep_end..].to_vec();

        Some(Block::new(filehash, block_id, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_roundtrip() {
        let block = Block::new([0x5Au8; FILEHASH_LEN], 7, b"xyz".to_vec());
        let packed = block.pack();

        assert_eq!(packed.len(), BLOCK_HEADER_LEN + 3);
        assert_eq!(Block::unpack(&packed), Some(block));
    }

    #[test]
    fn positive_roundtrip_miss() {
        let block = Block::new([0u8; FILEHASH_LEN], 0, Vec::new());
        assert!(!block.downloaded());

        let packed = block.pack();
        let unpacked = Block::unpack(&packed).unwrap();
        assert!(!unpacked.downloaded());
        assert_eq!(unpacked, block);
    }

    #[test]
    fn negative_unpack_too_short() {
        assert_eq!(Block::unpack(&[0u8; BLOCK_HEADER_LEN - 1]), None);
    }

    #[test]
    fn negative_unpack_bad_separator() {
        let mut packed = Block::new([1u8; FILEHASH_LEN], 1, b"ok".to_vec()).pack();
        let sep_offset = FILEHASH_LEN + 1 + 4;
        packed[sep_offset] = b'X';

        assert_eq!(Block::unpack(&packed), None);
    }

    #[test]
    fn negative_unpack_missing_space() {
        let mut packed = Block::new([2u8; FILEHASH_LEN], 2, b"ok".to_vec()).pack();
        packed[FILEHASH_LEN] = b'!';

        assert_eq!(Block::unpack(&packed), None);
    }
}
