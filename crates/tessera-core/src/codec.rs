//! Binary wire format for persisted nodes
//!
//! A node index serializes as: a one-byte type header, the offset and step as
//! variable-length masked integers, a masked count followed by that many
//! child-count integers, and a masked count followed by that many
//! length-prefixed child entries. For path nodes the entries are child
//! digests; for leaf nodes they are raw data-policy payload bytes. A
//! zero-length entry is an absent child.
//!
//! A hash bucket payload serializes as its own type header followed by a
//! masked count of key-index entries, each a length-prefixed key and a
//! length-prefixed version-tree root digest.
//!
//! The layout is bit-exact: a node's digest is the hash of exactly these
//! bytes, so any drift here changes every root digest.

use crate::{Result, TreeError};
use bytes::Bytes;
use tessera_store::NodeDigest;

/// Type header of a serialized node index
pub const NODE_INDEX_HEADER: u8 = 0x01;

/// Type header of a serialized hash bucket payload
pub const BUCKET_HEADER: u8 = 0x02;

/// Append `value` as a masked variable-length integer (7 bits per byte,
/// high bit set on all but the last byte)
pub fn put_uvarint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Read a masked variable-length integer from `buf` starting at `*pos`,
/// advancing `*pos` past it
pub fn get_uvarint(buf: &[u8], pos: &mut usize) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *buf
            .get(*pos)
            .ok_or_else(|| TreeError::Decode("truncated varint".into()))?;
        *pos += 1;
        if shift >= 64 {
            return Err(TreeError::Decode("varint overflows u64".into()));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    put_uvarint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn get_bytes(buf: &[u8], pos: &mut usize) -> Result<Bytes> {
    let len = get_uvarint(buf, pos)? as usize;
    let end = pos
        .checked_add(len)
        .filter(|&end| end <= buf.len())
        .ok_or_else(|| TreeError::Decode("truncated byte entry".into()))?;
    let bytes = Bytes::copy_from_slice(&buf[*pos..end]);
    *pos = end;
    Ok(bytes)
}

/// Serialized shape of one tree node
///
/// `offset` is the smallest id covered by the node, `step` the id span
/// delegated to each child; the node covers `[offset, offset + step * D)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeIndex {
    pub offset: u64,
    pub step: u64,
    /// Logical item count under each child slot
    pub counts: Vec<u64>,
    /// Child digests (path nodes) or raw payload bytes (leaf nodes);
    /// empty bytes mark an absent child
    pub entries: Vec<Bytes>,
}

impl NodeIndex {
    /// Encode to canonical bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = Vec::with_capacity(64 + self.entries.iter().map(|e| e.len() + 2).sum::<usize>());
        buf.push(NODE_INDEX_HEADER);
        put_uvarint(&mut buf, self.offset);
        put_uvarint(&mut buf, self.step);
        put_uvarint(&mut buf, self.counts.len() as u64);
        for &count in &self.counts {
            put_uvarint(&mut buf, count);
        }
        put_uvarint(&mut buf, self.entries.len() as u64);
        for entry in &self.entries {
            put_bytes(&mut buf, entry);
        }
        Bytes::from(buf)
    }

    /// Decode from canonical bytes, validating the slot count against the
    /// configured degree
    pub fn from_bytes(buf: &[u8], degree_width: u64) -> Result<Self> {
        let mut pos = 0usize;
        let header = *buf
            .get(pos)
            .ok_or_else(|| TreeError::Decode("empty node bytes".into()))?;
        pos += 1;
        if header != NODE_INDEX_HEADER {
            return Err(TreeError::Decode(format!(
                "unexpected node header {header:#04x}"
            )));
        }

        let offset = get_uvarint(buf, &mut pos)?;
        let step = get_uvarint(buf, &mut pos)?;
        if step == 0 || step & (step - 1) != 0 {
            return Err(TreeError::Decode(format!("invalid step {step}")));
        }

        let count_len = get_uvarint(buf, &mut pos)?;
        if count_len != degree_width {
            return Err(TreeError::Decode(format!(
                "node has {count_len} slots, tree degree is {degree_width}"
            )));
        }
        let mut counts = Vec::with_capacity(count_len as usize);
        for _ in 0..count_len {
            counts.push(get_uvarint(buf, &mut pos)?);
        }

        let entry_len = get_uvarint(buf, &mut pos)?;
        if entry_len != degree_width {
            return Err(TreeError::Decode(format!(
                "node has {entry_len} entries, tree degree is {degree_width}"
            )));
        }
        let mut entries = Vec::with_capacity(entry_len as usize);
        for _ in 0..entry_len {
            entries.push(get_bytes(buf, &mut pos)?);
        }

        if pos != buf.len() {
            return Err(TreeError::Decode("trailing bytes after node".into()));
        }

        Ok(Self {
            offset,
            step,
            counts,
            entries,
        })
    }
}

/// Encode a hash bucket payload: ordered (key, version-tree root digest)
/// pairs
pub fn encode_bucket(entries: &[(Bytes, NodeDigest)]) -> Bytes {
    let mut buf = Vec::with_capacity(
        8 + entries
            .iter()
            .map(|(key, _)| key.len() + 40)
            .sum::<usize>(),
    );
    buf.push(BUCKET_HEADER);
    put_uvarint(&mut buf, entries.len() as u64);
    for (key, digest) in entries {
        put_bytes(&mut buf, key);
        put_bytes(&mut buf, digest.as_bytes());
    }
    Bytes::from(buf)
}

/// Decode a hash bucket payload
pub fn decode_bucket(buf: &[u8]) -> Result<Vec<(Bytes, NodeDigest)>> {
    let mut pos = 0usize;
    let header = *buf
        .get(pos)
        .ok_or_else(|| TreeError::Decode("empty bucket bytes".into()))?;
    pos += 1;
    if header != BUCKET_HEADER {
        return Err(TreeError::Decode(format!(
            "unexpected bucket header {header:#04x}"
        )));
    }

    let len = get_uvarint(buf, &mut pos)?;
    let mut entries = Vec::with_capacity(len as usize);
    for _ in 0..len {
        let key = get_bytes(buf, &mut pos)?;
        let digest_bytes = get_bytes(buf, &mut pos)?;
        let digest = NodeDigest::from_slice(&digest_bytes)
            .map_err(|e| TreeError::Decode(e.to_string()))?;
        entries.push((key, digest));
    }

    if pos != buf.len() {
        return Err(TreeError::Decode("trailing bytes after bucket".into()));
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_store::HashAlgorithm;

    #[test]
    fn test_uvarint_roundtrip() {
        for value in [0u64, 1, 127, 128, 300, u64::from(u32::MAX), 1 << 60, u64::MAX] {
            let mut buf = Vec::new();
            put_uvarint(&mut buf, value);
            let mut pos = 0;
            assert_eq!(get_uvarint(&buf, &mut pos).unwrap(), value);
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn test_uvarint_truncated() {
        let mut buf = Vec::new();
        put_uvarint(&mut buf, 1 << 40);
        buf.truncate(2);
        let mut pos = 0;
        assert!(get_uvarint(&buf, &mut pos).is_err());
    }

    #[test]
    fn test_node_index_roundtrip() {
        let node = NodeIndex {
            offset: 4096,
            step: 256,
            counts: vec![3, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 7],
            entries: (0..16)
                .map(|i| {
                    if i == 0 || i == 2 || i == 15 {
                        Bytes::from(vec![i as u8; 32])
                    } else {
                        Bytes::new()
                    }
                })
                .collect(),
        };
        let bytes = node.to_bytes();
        assert_eq!(bytes[0], NODE_INDEX_HEADER);
        let decoded = NodeIndex::from_bytes(&bytes, 16).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn test_node_index_rejects_degree_mismatch() {
        let node = NodeIndex {
            offset: 0,
            step: 1,
            counts: vec![0; 4],
            entries: vec![Bytes::new(); 4],
        };
        let bytes = node.to_bytes();
        assert!(NodeIndex::from_bytes(&bytes, 16).is_err());
        assert!(NodeIndex::from_bytes(&bytes, 4).is_ok());
    }

    #[test]
    fn test_node_index_rejects_trailing_bytes() {
        let node = NodeIndex {
            offset: 0,
            step: 1,
            counts: vec![0; 2],
            entries: vec![Bytes::new(); 2],
        };
        let mut bytes = node.to_bytes().to_vec();
        bytes.push(0);
        assert!(NodeIndex::from_bytes(&bytes, 2).is_err());
    }

    #[test]
    fn test_identical_nodes_hash_identically() {
        let make = || NodeIndex {
            offset: 16,
            step: 1,
            counts: vec![1, 1],
            entries: vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")],
        };
        let algorithm = HashAlgorithm::Blake3;
        assert_eq!(
            algorithm.digest(&make().to_bytes()),
            algorithm.digest(&make().to_bytes())
        );
    }

    #[test]
    fn test_bucket_roundtrip() {
        let digest_a = HashAlgorithm::Blake3.digest(b"tree a");
        let digest_b = HashAlgorithm::Blake3.digest(b"tree b");
        let entries = vec![
            (Bytes::from_static(b"alice"), digest_a),
            (Bytes::from_static(b"bob"), digest_b),
        ];
        let bytes = encode_bucket(&entries);
        assert_eq!(bytes[0], BUCKET_HEADER);
        assert_eq!(decode_bucket(&bytes).unwrap(), entries);
    }

    #[test]
    fn test_bucket_rejects_node_header() {
        let node = NodeIndex {
            offset: 0,
            step: 1,
            counts: vec![0; 2],
            entries: vec![Bytes::new(); 2],
        };
        assert!(decode_bucket(&node.to_bytes()).is_err());
    }
}
