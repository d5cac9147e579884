//! Binary snapshot format.
//!
//! Layout: magic `b"SPDR"`, a version byte, the embedding dimension,
//! the HNSW tuning parameters (including the RNG seed, so a reload
//! replays the same level-assignment sequence), a length-prefixed node
//! table, a length-prefixed edge table, a length-prefixed centroid
//! table, and a trailing CRC32 over everything before it. HNSW
//! neighbor lists are never persisted — `SpiderDB::load` rebuilds them
//! by re-inserting every node in ascending id order.

use crate::error::{Error, Result};
use crate::store::NodeSnapshot;
use std::io::Write;
use std::path::Path;

const MAGIC: &[u8; 4] = b"SPDR";
const FORMAT_VERSION: u8 = 1;
const CLUSTER_SENTINEL: i64 = -1;

/// Everything needed to reconstruct a running engine.
pub struct Snapshot {
    /// Embedding dimension, `None` if nothing has ever been inserted.
    pub dimension: Option<u32>,
    /// `M` the index was built with.
    pub m: u32,
    /// `ef_construction` the index was built with.
    pub ef_construction: u32,
    /// Default `ef_search`.
    pub ef_search: u32,
    /// Soft capacity cap.
    pub max_capacity: u64,
    /// HNSW level-assignment RNG seed.
    pub rng_seed: u64,
    /// Live node records.
    pub nodes: Vec<NodeSnapshot>,
    /// Graph edges.
    pub edges: Vec<(u64, u64)>,
    /// Cluster centroids, in cluster-id order.
    pub centroids: Vec<Vec<f32>>,
}

/// Serializes a snapshot to bytes.
#[must_use]
pub fn encode(snapshot: &Snapshot) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);
    buf.push(FORMAT_VERSION);
    buf.extend_from_slice(&snapshot.dimension.unwrap_or(0).to_le_bytes());
    buf.push(u8::from(snapshot.dimension.is_some()));
    buf.extend_from_slice(&snapshot.m.to_le_bytes());
    buf.extend_from_slice(&snapshot.ef_construction.to_le_bytes());
    buf.extend_from_slice(&snapshot.ef_search.to_le_bytes());
    buf.extend_from_slice(&snapshot.max_capacity.to_le_bytes());
    buf.extend_from_slice(&snapshot.rng_seed.to_le_bytes());

    buf.extend_from_slice(&(snapshot.nodes.len() as u64).to_le_bytes());
    for node in &snapshot.nodes {
        buf.extend_from_slice(&node.id.to_le_bytes());
        buf.push(node.significance);
        buf.extend_from_slice(&node.access_count.to_le_bytes());
        buf.extend_from_slice(&node.last_access.to_le_bytes());
        buf.extend_from_slice(&node.creation_time.to_le_bytes());
        let cluster_id = node.cluster_id.map_or(CLUSTER_SENTINEL, i64::from);
        buf.extend_from_slice(&cluster_id.to_le_bytes());
        buf.extend_from_slice(&(node.content.len() as u64).to_le_bytes());
        buf.extend_from_slice(&node.content);
        for component in &node.embedding {
            buf.extend_from_slice(&component.to_le_bytes());
        }
    }

    buf.extend_from_slice(&(snapshot.edges.len() as u64).to_le_bytes());
    for (a, b) in &snapshot.edges {
        buf.extend_from_slice(&a.to_le_bytes());
        buf.extend_from_slice(&b.to_le_bytes());
    }

    buf.extend_from_slice(&(snapshot.centroids.len() as u32).to_le_bytes());
    for centroid in &snapshot.centroids {
        for component in centroid {
            buf.extend_from_slice(&component.to_le_bytes());
        }
    }

    let checksum = crc32(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
    buf
}

/// Parses bytes produced by [`encode`].
///
/// # Errors
///
/// Returns [`Error::Corrupt`] if the magic, checksum, or any
/// length-prefixed section doesn't validate.
pub fn decode(bytes: &[u8]) -> Result<Snapshot> {
    let mut cur = Cursor::new(bytes);

    let magic = cur.take(4)?;
    if magic != MAGIC {
        return Err(Error::Corrupt("bad magic".to_string()));
    }

    let version = cur.u8()?;
    if version != FORMAT_VERSION {
        return Err(Error::Corrupt(format!("unsupported version {version}")));
    }

    if bytes.len() < 4 {
        return Err(Error::Corrupt("truncated".to_string()));
    }
    let stored_checksum_offset = bytes.len() - 4;
    let expected = crc32(&bytes[..stored_checksum_offset]);
    let actual = u32::from_le_bytes(
        bytes[stored_checksum_offset..]
            .try_into()
            .map_err(|_| Error::Corrupt("truncated checksum".to_string()))?,
    );
    if expected != actual {
        return Err(Error::Corrupt(format!(
            "checksum mismatch: expected {expected}, got {actual}"
        )));
    }

    let dim_raw = cur.u32()?;
    let dim_present = cur.u8()? != 0;
    let dimension = dim_present.then_some(dim_raw);
    let m = cur.u32()?;
    let ef_construction = cur.u32()?;
    let ef_search = cur.u32()?;
    let max_capacity = cur.u64()?;
    let rng_seed = cur.u64()?;

    let node_count = cur.u64()? as usize;
    let mut nodes = Vec::with_capacity(node_count);
    for _ in 0..node_count {
        let id = cur.u64()?;
        let significance = cur.u8()?;
        let access_count = cur.u64()?;
        let last_access = cur.u64()?;
        let creation_time = cur.u64()?;
        let cluster_raw = cur.i64()?;
        let cluster_id = if cluster_raw < 0 {
            None
        } else {
            Some(cluster_raw as u32)
        };
        let content_len = cur.u64()? as usize;
        let content = cur.take(content_len)?.to_vec();
        let dim = dimension.unwrap_or(0) as usize;
        let mut embedding = Vec::with_capacity(dim);
        for _ in 0..dim {
            embedding.push(cur.f32()?);
        }
        nodes.push(NodeSnapshot {
            id,
            content,
            embedding,
            significance,
            access_count,
            last_access,
            creation_time,
            cluster_id,
        });
    }

    let edge_count = cur.u64()? as usize;
    let mut edges = Vec::with_capacity(edge_count);
    for _ in 0..edge_count {
        let a = cur.u64()?;
        let b = cur.u64()?;
        edges.push((a, b));
    }

    let centroid_count = cur.u32()? as usize;
    let dim = dimension.unwrap_or(0) as usize;
    let mut centroids = Vec::with_capacity(centroid_count);
    for _ in 0..centroid_count {
        let mut centroid = Vec::with_capacity(dim);
        for _ in 0..dim {
            centroid.push(cur.f32()?);
        }
        centroids.push(centroid);
    }

    Ok(Snapshot {
        dimension,
        m,
        ef_construction,
        ef_search,
        max_capacity,
        rng_seed,
        nodes,
        edges,
        centroids,
    })
}

/// Writes a snapshot to `path` atomically: encode, write to a sibling
/// temp file, `fsync`, then rename over the destination.
///
/// # Errors
///
/// Returns [`Error::Io`] on any filesystem failure.
pub fn save_to_file(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let bytes = encode(snapshot);
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "snapshot saved");
    Ok(())
}

/// Reads and decodes a snapshot from `path`.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file can't be read, or
/// [`Error::Corrupt`] if it doesn't parse.
pub fn load_from_file(path: &Path) -> Result<Snapshot> {
    let bytes = std::fs::read(path)?;
    decode(&bytes)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(Error::Corrupt("unexpected end of snapshot".to_string()));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }
}

const CRC32_POLY: u32 = 0xEDB8_8320;

const fn crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u32;
        let mut j = 0;
        while j < 8 {
            c = if c & 1 != 0 { CRC32_POLY ^ (c >> 1) } else { c >> 1 };
            j += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

const CRC32_TABLE: [u32; 256] = crc32_table();

/// IEEE 802.3 CRC-32 over `data`.
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        let idx = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = CRC32_TABLE[idx] ^ (crc >> 8);
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> Snapshot {
        Snapshot {
            dimension: Some(2),
            m: 16,
            ef_construction: 200,
            ef_search: 50,
            max_capacity: 1000,
            rng_seed: 0x1234_5678_9abc_def0,
            nodes: vec![NodeSnapshot {
                id: 0,
                content: b"hello".to_vec(),
                embedding: vec![1.0, 0.5],
                significance: 42,
                access_count: 3,
                last_access: 1000,
                creation_time: 500,
                cluster_id: Some(2),
            }],
            edges: vec![(0, 1)],
            centroids: vec![vec![0.1, 0.2], vec![0.3, 0.4]],
        }
    }

    #[test]
    fn crc32_matches_known_vector() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let snapshot = sample_snapshot();
        let bytes = encode(&snapshot);
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded.dimension, Some(2));
        assert_eq!(decoded.rng_seed, snapshot.rng_seed);
        assert_eq!(decoded.nodes.len(), 1);
        assert_eq!(decoded.nodes[0].content, b"hello");
        assert_eq!(decoded.nodes[0].cluster_id, Some(2));
        assert_eq!(decoded.edges, vec![(0, 1)]);
        assert_eq!(decoded.centroids.len(), 2);
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = encode(&sample_snapshot());
        bytes[0] = b'X';
        assert!(matches!(decode(&bytes), Err(Error::Corrupt(_))));
    }

    #[test]
    fn tampered_body_fails_checksum() {
        let mut bytes = encode(&sample_snapshot());
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        assert!(matches!(decode(&bytes), Err(Error::Corrupt(_))));
    }

    #[test]
    fn save_and_load_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.spdr");
        let snapshot = sample_snapshot();
        save_to_file(&path, &snapshot).unwrap();
        let loaded = load_from_file(&path).unwrap();
        assert_eq!(loaded.nodes[0].content, snapshot.nodes[0].content);
    }
}
