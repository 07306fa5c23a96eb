//! CRTEMP: the on-disk encoding of a partially downloaded `File` (§3, §4.4).
//!
//! Layout: `CRTEMP <block_count>\r\n`, then one 4-byte big-endian offset per
//! block (the byte offset of that block's data within the data region that
//! follows, or the sentinel `MISSING_OFFSET` if the block hasn't been
//! downloaded yet), each followed by a literal `\r\n`, then a blank line
//! (`\r\n`) marking the end of the offset table, then the concatenated data
//! of every present block in ascending block-id order.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{FsErrorKind, FsResult};
use crate::file::File;
use crate::fileinfo::FileInfo;
use crate::block_len;

const MAGIC: &str = "CRTEMP";

/// Offset value marking a block that has not been downloaded.
pub const MISSING_OFFSET: u32 = u32::MAX;

/// Serialize `file`'s current download state to the CRTEMP wire format.
pub fn encode(file: &File) -> Vec<u8> {
    let block_count = file.block_count();
    let mut header = format!("{} {}\r\n", MAGIC, block_count).into_bytes();

    let mut offsets = Vec::with_capacity(block_count as usize);
    let mut data = Vec::new();
    for id in 0..block_count {
        match file.get_block(id) {
            Some(block) => {
                offsets.push(data.len() as u32);
                data.extend_from_slice(block.data());
            }
            None => offsets.push(MISSING_OFFSET),
        }
    }

    for offset in &offsets {
        let mut buf = [0u8; 4];
        BigEndian::write_u32(&mut buf, *offset);
        header.extend_from_slice(&buf);
        header.extend_from_slice(b"\r\n");
    }
    header.extend_from_slice(b"\r\n");
    header.extend_from_slice(&data);
    header
}

/// Parse a CRTEMP buffer against the `info` that describes the file it is a
/// partial copy of. `info.block_count()` must match the encoded table, or
/// this returns `InvalidDescriptor`: a `.crtemp` is only ever read alongside
/// the `.crinfo` that created it (§4.4).
pub fn decode(info: &FileInfo, bytes: &[u8]) -> FsResult<File> {
    let name = info.filename();
    let header_end = find_crlf(bytes).ok_or_else(|| {
        FsErrorKind::InvalidDescriptor(name.into(), "missing CRTEMP header terminator".into())
    })?;
    let header = std::str::from_utf8(&bytes[..header_end])
        .map_err(|_| FsErrorKind::InvalidDescriptor(name.into(), "header is not valid UTF-8".into()))?;

    let mut parts = header.split_whitespace();
    let magic = parts
        .next()
        .ok_or_else(|| FsErrorKind::InvalidDescriptor(name.into(), "empty CRTEMP header".into()))?;
    if magic != MAGIC {
        bail!(FsErrorKind::InvalidDescriptor(name.into(), format!("bad magic {:?}", magic)));
    }
    let block_count: u32 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| FsErrorKind::InvalidDescriptor(name.into(), "bad block_count field".into()))?;
    if block_count != info.block_count() {
        bail!(FsErrorKind::InvalidDescriptor(
            name.into(),
            format!(
                "CRTEMP block_count {} does not match descriptor's {}",
                block_count,
                info.block_count()
            )
        ));
    }

    let mut cursor = header_end + 2;
    let mut offsets = Vec::with_capacity(block_count as usize);
    for _ in 0..block_count {
        if cursor + 6 > bytes.len() {
            bail!(FsErrorKind::InvalidDescriptor(name.into(), "truncated offset table".into()));
        }
        let offset = BigEndian::read_u32(&bytes[cursor..cursor + 4]);
        if &bytes[cursor + 4..cursor + 6] != b"\r\n" {
            bail!(FsErrorKind::InvalidDescriptor(name.into(), "offset entry missing CRLF".into()));
        }
        offsets.push(offset);
        cursor += 6;
    }

    if cursor + 2 > bytes.len() || &bytes[cursor..cursor + 2] != b"\r\n" {
        bail!(FsErrorKind::InvalidDescriptor(name.into(), "missing blank line after offset table".into()));
    }
    cursor += 2;

    let data = &bytes[cursor..];
    let mut file = File::new_empty(info.clone());
    for (id, offset) in offsets.into_iter().enumerate() {
        if offset == MISSING_OFFSET {
            continue;
        }
        let id = id as u32;
        let len = block_len(info.filesize(), block_count, id);
        let start = offset as usize;
        let end = start + len;
        if end > data.len() {
            bail!(FsErrorKind::InvalidDescriptor(name.into(), format!("block {} offset out of range", id)));
        }
        let block = ctp_wire::Block::new(*info.filehash(), id, data[start..end].to_vec());
        file.put_block(&block);
    }

    Ok(file)
}

fn find_crlf(bytes: &[u8]) -> Option<usize> {
    bytes.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileinfo::FILEHASH_LEN;
    use ctp_wire::Block;

    fn info(size: u64) -> FileInfo {
        FileInfo::new("p.bin".into(), [4u8; FILEHASH_LEN], size, 1.0)
    }

    #[test]
    fn positive_roundtrip_partial() {
        let meta = info(crate::MAX_BLOCK_SIZE as u64 + 10);
        let mut file = File::new_empty(meta.clone());
        let block0 = Block::new([4u8; FILEHASH_LEN], 0, vec![9u8; crate::MAX_BLOCK_SIZE]);
        file.put_block(&block0);

        let encoded = encode(&file);
        let decoded = decode(&meta, &encoded).unwrap();

        assert!(!decoded.is_complete());
        assert_eq!(decoded.missing_block_ids(), vec![1]);
        assert_eq!(decoded.get_block(0).unwrap().data(), block0.data());
    }

    #[test]
    fn positive_roundtrip_complete() {
        let meta = info(5);
        let data = vec![1, 2, 3, 4, 5];
        let file = File::new_complete(meta.clone(), &data);

        let encoded = encode(&file);
        let decoded = decode(&meta, &encoded).unwrap();
        assert!(decoded.is_complete());
        assert_eq!(decoded.into_bytes(), data);
    }

    #[test]
    fn negative_block_count_mismatch() {
        let meta = info(5);
        let other = FileInfo::new("p.bin".into(), [4u8; FILEHASH_LEN], 5000, 1.0);
        let file = File::new_empty(meta);
        let encoded = encode(&file);
        assert!(decode(&other, &encoded).is_err());
    }

    #[test]
    fn negative_truncated_offset_table() {
        let meta = info(5);
        let mut encoded = encode(&File::new_empty(meta.clone()));
        encoded.truncate(encoded.len() - 4);
        assert!(decode(&meta, &encoded).is_err());
    }
}
