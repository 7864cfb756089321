//! Data root and chunk proofs
//!
//! Transaction data is split into chunks of at most 256 KiB, hashed into a
//! binary SHA-256 merkle tree, and every chunk is posted together with the
//! path from the root down to its leaf. Offsets are committed as 32-byte
//! big-endian notes.

use std::io::{self, Read};

use sha2::{Digest, Sha256};

/// Largest chunk the store accepts
pub const MAX_CHUNK_SIZE: u64 = 256 * 1024;

/// A trailing chunk smaller than this is rebalanced with its predecessor
pub const MIN_CHUNK_SIZE: u64 = 32 * 1024;

const NOTE_SIZE: usize = 32;

type Hash = [u8; 32];

/// A leaf of the data tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub data_hash: Hash,
    pub min_byte_range: u64,
    pub max_byte_range: u64,
}

impl Chunk {
    pub fn len(&self) -> u64 {
        self.max_byte_range - self.min_byte_range
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Merkle path for one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proof {
    /// Last byte index covered by the chunk
    pub offset: u64,
    pub proof: Vec<u8>,
}

/// Chunk boundaries, data root and proofs for a blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkLayout {
    pub data_size: u64,
    pub data_root: Hash,
    pub chunks: Vec<Chunk>,
    pub proofs: Vec<Proof>,
}

impl ChunkLayout {
    /// Compute the layout by streaming `size` bytes from a reader.
    pub fn from_reader<R: Read>(mut reader: R, size: u64) -> io::Result<Self> {
        let mut buf = vec![0u8; MAX_CHUNK_SIZE as usize];
        let mut chunks = Vec::new();

        for (min, max) in chunk_ranges(size) {
            let len = (max - min) as usize;
            reader.read_exact(&mut buf[..len])?;
            chunks.push(Chunk {
                data_hash: sha(&buf[..len]),
                min_byte_range: min,
                max_byte_range: max,
            });
        }

        Ok(Self::from_chunks(size, chunks))
    }

    /// Compute the layout of an in-memory blob.
    pub fn from_bytes(data: &[u8]) -> Self {
        let chunks = chunk_ranges(data.len() as u64)
            .into_iter()
            .map(|(min, max)| Chunk {
                data_hash: sha(&data[min as usize..max as usize]),
                min_byte_range: min,
                max_byte_range: max,
            })
            .collect();
        Self::from_chunks(data.len() as u64, chunks)
    }

    fn from_chunks(data_size: u64, mut chunks: Vec<Chunk>) -> Self {
        let leaves = chunks
            .iter()
            .map(|chunk| Node::Leaf {
                id: hash_parts(&[sha(&chunk.data_hash), sha(&note(chunk.max_byte_range))]),
                data_hash: chunk.data_hash,
                max_byte_range: chunk.max_byte_range,
            })
            .collect();

        let Some(root) = build_layers(leaves) else {
            return Self {
                data_size,
                data_root: [0u8; 32],
                chunks,
                proofs: Vec::new(),
            };
        };

        let mut proofs = Vec::with_capacity(chunks.len());
        resolve_proofs(&root, Vec::new(), &mut proofs);

        // The empty trailing chunk is part of the root but never transmitted
        if chunks.last().is_some_and(Chunk::is_empty) {
            chunks.pop();
            proofs.pop();
        }

        Self {
            data_size,
            data_root: root.id(),
            chunks,
            proofs,
        }
    }
}

/// Split `size` bytes into chunk byte ranges.
///
/// Always returns at least one range; the last one may be empty when `size`
/// is a multiple of the maximum chunk size.
pub fn chunk_ranges(size: u64) -> Vec<(u64, u64)> {
    let mut ranges = Vec::new();
    let mut cursor = 0;
    let mut rest = size;

    while rest >= MAX_CHUNK_SIZE {
        let mut chunk_size = MAX_CHUNK_SIZE;
        let next = rest - MAX_CHUNK_SIZE;
        if next > 0 && next < MIN_CHUNK_SIZE {
            chunk_size = rest.div_ceil(2);
        }
        ranges.push((cursor, cursor + chunk_size));
        cursor += chunk_size;
        rest -= chunk_size;
    }

    ranges.push((cursor, cursor + rest));
    ranges
}

enum Node {
    Leaf {
        id: Hash,
        data_hash: Hash,
        max_byte_range: u64,
    },
    Branch {
        id: Hash,
        byte_range: u64,
        max_byte_range: u64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn id(&self) -> Hash {
        match self {
            Node::Leaf { id, .. } | Node::Branch { id, .. } => *id,
        }
    }

    fn max_byte_range(&self) -> u64 {
        match self {
            Node::Leaf { max_byte_range, .. } | Node::Branch { max_byte_range, .. } => {
                *max_byte_range
            }
        }
    }
}

fn build_layers(mut nodes: Vec<Node>) -> Option<Node> {
    while nodes.len() > 1 {
        let mut next = Vec::with_capacity(nodes.len().div_ceil(2));
        let mut iter = nodes.into_iter();
        while let Some(left) = iter.next() {
            match iter.next() {
                Some(right) => next.push(hash_branch(left, right)),
                None => next.push(left),
            }
        }
        nodes = next;
    }
    nodes.pop()
}

fn hash_branch(left: Node, right: Node) -> Node {
    let byte_range = left.max_byte_range();
    let id = hash_parts(&[sha(&left.id()), sha(&right.id()), sha(&note(byte_range))]);
    Node::Branch {
        id,
        byte_range,
        max_byte_range: right.max_byte_range(),
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn resolve_proofs(node: &Node, partial: Vec<u8>, out: &mut Vec<Proof>) {
    match node {
        Node::Leaf {
            data_hash,
            max_byte_range,
            ..
        } => {
            let mut proof = partial;
            proof.extend_from_slice(data_hash);
            proof.extend_from_slice(&note(*max_byte_range));
            out.push(Proof {
                offset: max_byte_range.saturating_sub(1),
                proof,
            });
        }
        Node::Branch {
            byte_range,
            left,
            right,
            ..
        } => {
            let mut proof = partial;
            proof.extend_from_slice(&left.id());
            proof.extend_from_slice(&right.id());
            proof.extend_from_slice(&note(*byte_range));
            resolve_proofs(left, proof.clone(), out);
            resolve_proofs(right, proof, out);
        }
    }
}

fn sha(data: &[u8]) -> Hash {
    Sha256::digest(data).into()
}

fn hash_parts(parts: &[Hash]) -> Hash {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

fn note(value: u64) -> [u8; NOTE_SIZE] {
    let mut buf = [0u8; NOTE_SIZE];
    buf[NOTE_SIZE - 8..].copy_from_slice(&value.to_be_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    const KIB: u64 = 1024;

    #[test]
    fn test_small_blob_is_one_chunk() {
        assert_eq!(chunk_ranges(10), vec![(0, 10)]);
    }

    #[test]
    fn test_exact_multiple_has_empty_tail() {
        assert_eq!(
            chunk_ranges(2 * MAX_CHUNK_SIZE),
            vec![
                (0, MAX_CHUNK_SIZE),
                (MAX_CHUNK_SIZE, 2 * MAX_CHUNK_SIZE),
                (2 * MAX_CHUNK_SIZE, 2 * MAX_CHUNK_SIZE)
            ]
        );
    }

    #[test]
    fn test_small_tail_is_rebalanced() {
        // 256 KiB + 10 KiB: the tail would be under the minimum, so split evenly
        let size = MAX_CHUNK_SIZE + 10 * KIB;
        let ranges = chunk_ranges(size);
        assert_eq!(ranges, vec![(0, 133 * KIB), (133 * KIB, size)]);
        assert!(ranges.iter().all(|(a, b)| b - a >= MIN_CHUNK_SIZE));
    }

    #[test]
    fn test_ranges_cover_data() {
        for size in [0, 1, MAX_CHUNK_SIZE - 1, 3 * MAX_CHUNK_SIZE + 5, 5 * MAX_CHUNK_SIZE] {
            let ranges = chunk_ranges(size);
            assert_eq!(ranges.first().unwrap().0, 0);
            assert_eq!(ranges.last().unwrap().1, size);
            for pair in ranges.windows(2) {
                assert_eq!(pair[0].1, pair[1].0);
                assert!(pair[0].1 - pair[0].0 <= MAX_CHUNK_SIZE);
            }
        }
    }

    #[test]
    fn test_single_chunk_root_is_leaf() {
        let data = b"hello ledger";
        let layout = ChunkLayout::from_bytes(data);

        let expected = hash_parts(&[sha(&sha(data)), sha(&note(data.len() as u64))]);

        assert_eq!(layout.data_root, expected);
        assert_eq!(layout.chunks.len(), 1);
        assert_eq!(layout.proofs[0].offset, data.len() as u64 - 1);
        // leaf proof: data hash + note
        assert_eq!(layout.proofs[0].proof.len(), 32 + NOTE_SIZE);
    }

    #[test]
    fn test_reader_matches_bytes() {
        let data: Vec<u8> = (0..(3 * MAX_CHUNK_SIZE + 777)).map(|i| (i % 251) as u8).collect();
        let streamed = ChunkLayout::from_reader(data.as_slice(), data.len() as u64).unwrap();
        assert_eq!(streamed, ChunkLayout::from_bytes(&data));
        assert_eq!(streamed.chunks.len(), 4);
        assert_eq!(streamed.proofs.len(), 4);
    }

    #[test]
    fn test_empty_tail_is_dropped() {
        let data = vec![7u8; (2 * MAX_CHUNK_SIZE) as usize];
        let layout = ChunkLayout::from_bytes(&data);
        assert_eq!(layout.chunks.len(), 2);
        assert_eq!(layout.proofs.len(), 2);
        assert_eq!(layout.proofs[1].offset, 2 * MAX_CHUNK_SIZE - 1);
    }

    #[test]
    fn test_any_byte_changes_root() {
        let mut data = vec![1u8; (MAX_CHUNK_SIZE + 40 * KIB) as usize];
        let before = ChunkLayout::from_bytes(&data).data_root;
        let last = data.len() - 1;
        data[last] ^= 0xff;
        assert_ne!(before, ChunkLayout::from_bytes(&data).data_root);
    }

    #[test]
    fn test_short_reader_fails() {
        let result = ChunkLayout::from_reader(&b"abc"[..], 10);
        assert!(result.is_err());
    }
}
