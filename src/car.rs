//! CARv1 archives
//!
//! Layout:
//!
//! ```text
//! varint(len) | dag-cbor header { roots: [cid, ...], version: 1 }
//! varint(len) | cid bytes | block bytes
//! varint(len) | cid bytes | block bytes
//! ...
//! ```
//!
//! Uploads are sent as one or more archives that all name the same root.
//! Retrieved archives are indexed without hashing; each block is verified
//! against its identifier when it is read.

use crate::cid::ContentId;
use crate::error::{ClientError, Result};
use crate::wire;
use bytes::Bytes;
use serde::Serialize;
use serde_cbor::tags::Tagged;
use serde_cbor::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Range;
use tracing::debug;

/// CBOR tag for IPLD links
const CID_TAG: u64 = 42;

/// A content-addressed block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub cid: ContentId,
    pub data: Bytes,
}

impl Block {
    pub fn new(cid: ContentId, data: impl Into<Bytes>) -> Self {
        Self {
            cid,
            data: data.into(),
        }
    }

    /// Length of this block's CAR section, including the length prefix
    pub fn section_len(&self) -> usize {
        let body = self.cid.to_bytes().len() + self.data.len();
        wire::varint_len(body as u64) + body
    }
}

// ==================== Writing ====================

/// CARv1 header; fields serialize in dag-cbor key order
#[derive(Serialize)]
struct CarHeader {
    roots: Vec<Tagged<Value>>,
    version: u64,
}

fn encode_header(roots: &[ContentId]) -> Result<Vec<u8>> {
    let header = CarHeader {
        roots: roots
            .iter()
            .map(|root| {
                // dag-cbor links carry a leading multibase identity byte
                let mut bytes = vec![0x00];
                bytes.extend_from_slice(&root.to_bytes());
                Tagged::new(Some(CID_TAG), Value::Bytes(bytes))
            })
            .collect(),
        version: 1,
    };
    Ok(serde_cbor::to_vec(&header)?)
}

fn write_header(out: &mut Vec<u8>, roots: &[ContentId]) -> Result<()> {
    let header = encode_header(roots)?;
    wire::put_varint(out, header.len() as u64);
    out.extend_from_slice(&header);
    Ok(())
}

fn write_block(out: &mut Vec<u8>, block: &Block) {
    let cid_bytes = block.cid.to_bytes();
    wire::put_varint(out, (cid_bytes.len() + block.data.len()) as u64);
    out.extend_from_slice(&cid_bytes);
    out.extend_from_slice(&block.data);
}

/// Encode blocks as a single archive
pub fn encode_car(roots: &[ContentId], blocks: &[Block]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_header(&mut out, roots)?;
    for block in blocks {
        write_block(&mut out, block);
    }
    Ok(out)
}

/// Encode blocks as archives of at most `max_size` bytes, each naming `root`
///
/// A block larger than `max_size` on its own still gets an archive of its own.
pub fn split_car(root: ContentId, blocks: &[Block], max_size: usize) -> Result<Vec<Vec<u8>>> {
    let mut header = Vec::new();
    write_header(&mut header, &[root])?;

    let mut cars = Vec::new();
    let mut current = header.clone();
    let mut current_blocks = 0usize;

    for block in blocks {
        if current_blocks > 0 && current.len() + block.section_len() > max_size {
            cars.push(std::mem::replace(&mut current, header.clone()));
            current_blocks = 0;
        }
        write_block(&mut current, block);
        current_blocks += 1;
    }
    if current_blocks > 0 || cars.is_empty() {
        cars.push(current);
    }

    debug!(root = %root, blocks = blocks.len(), archives = cars.len(), "Split CAR");
    Ok(cars)
}

// ==================== Reading ====================

fn header_field<'a>(map: &'a BTreeMap<Value, Value>, key: &str) -> Option<&'a Value> {
    map.get(&Value::Text(key.to_string()))
}

fn decode_root(value: &Value) -> Result<ContentId> {
    let Value::Tag(CID_TAG, inner) = value else {
        return Err(ClientError::decode("CAR root is not a tagged CID"));
    };
    let Value::Bytes(raw) = inner.as_ref() else {
        return Err(ClientError::decode("CAR root CID is not a byte string"));
    };
    match raw.split_first() {
        Some((0x00, cid_bytes)) => ContentId::from_bytes(cid_bytes),
        _ => Err(ClientError::decode("CAR root CID lacks multibase identity prefix")),
    }
}

fn decode_header(bytes: &[u8]) -> Result<Vec<ContentId>> {
    let value: Value = serde_cbor::from_slice(bytes)
        .map_err(|e| ClientError::decode(format!("invalid CAR header: {}", e)))?;
    let Value::Map(map) = value else {
        return Err(ClientError::decode("CAR header is not a map"));
    };

    match header_field(&map, "version") {
        Some(Value::Integer(1)) => {}
        Some(Value::Integer(v)) => {
            return Err(ClientError::decode(format!("unsupported CAR version {}", v)))
        }
        Some(_) => return Err(ClientError::decode("CAR version is not an integer")),
        None => return Err(ClientError::decode("CAR header has no version")),
    }

    match header_field(&map, "roots") {
        Some(Value::Array(items)) => items.iter().map(decode_root).collect(),
        Some(_) => Err(ClientError::decode("CAR roots is not an array")),
        None => Err(ClientError::decode("CAR header has no roots")),
    }
}

/// Indexed view over a CARv1 archive held in memory
#[derive(Clone)]
pub struct CarReader {
    roots: Vec<ContentId>,
    data: Bytes,
    index: HashMap<ContentId, Range<usize>>,
    order: Vec<ContentId>,
}

impl fmt::Debug for CarReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CarReader")
            .field("roots", &self.roots)
            .field("blocks", &self.order.len())
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl CarReader {
    /// Parse the header and index every block section
    pub fn parse(data: impl Into<Bytes>) -> Result<Self> {
        let data: Bytes = data.into();
        let (header_len, used) = wire::read_varint(&data)?;
        let header_end = usize::try_from(header_len)
            .ok()
            .and_then(|len| used.checked_add(len))
            .filter(|end| *end <= data.len())
            .ok_or_else(|| ClientError::decode("CAR header length exceeds archive"))?;
        let roots = decode_header(&data[used..header_end])?;

        let mut index = HashMap::new();
        let mut order = Vec::new();
        let mut pos = header_end;
        while pos < data.len() {
            let (section_len, used) = wire::read_varint(&data[pos..])?;
            let start = pos + used;
            let end = usize::try_from(section_len)
                .ok()
                .and_then(|len| start.checked_add(len))
                .filter(|end| *end <= data.len())
                .ok_or_else(|| ClientError::decode("CAR section length exceeds archive"))?;
            let (cid, cid_len) = ContentId::read_prefix(&data[start..end])
                .map_err(|e| ClientError::decode(format!("bad CID in CAR section: {}", e)))?;
            if !index.contains_key(&cid) {
                index.insert(cid, start + cid_len..end);
                order.push(cid);
            }
            pos = end;
        }

        debug!(roots = roots.len(), blocks = order.len(), bytes = data.len(), "Indexed CAR");
        Ok(Self {
            roots,
            data,
            index,
            order,
        })
    }

    pub fn roots(&self) -> &[ContentId] {
        &self.roots
    }

    /// Number of distinct blocks
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Verified bytes of a block
    pub fn block(&self, cid: &ContentId) -> Result<Bytes> {
        let range = self.index.get(cid).ok_or_else(|| ClientError::Integrity {
            cid: cid.to_string(),
            reason: "block missing from archive".to_string(),
        })?;
        let bytes = self.data.slice(range.clone());
        cid.verify(&bytes)?;
        Ok(bytes)
    }

    /// Every block in archive order, verified
    pub fn blocks(&self) -> impl Iterator<Item = Result<Block>> + '_ {
        self.order
            .iter()
            .map(move |cid| self.block(cid).map(|data| Block::new(*cid, data)))
    }

    /// Total archive size in bytes
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn sample_car() -> Vec<u8> {
        let blocks: Vec<Block> = (0..3u8)
            .map(|i| {
                let data = vec![i; 40];
                Block::new(ContentId::raw(&data), data)
            })
            .collect();
        encode_car(&[blocks[0].cid], &blocks).unwrap()
    }

    proptest! {
        /// Arbitrary bytes never panic the reader.
        #[test]
        fn parse_arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
            if let Ok(reader) = CarReader::parse(bytes) {
                let _ = reader.blocks().count();
            }
        }

        /// Corrupting any single byte of a valid archive is reported, never a panic.
        #[test]
        fn parse_corrupted_archive(index in any::<prop::sample::Index>(), flip in 1..=255u8) {
            let mut car = sample_car();
            let at = index.index(car.len());
            car[at] ^= flip;
            if let Ok(reader) = CarReader::parse(car) {
                let _ = reader.blocks().count();
            }
        }

        /// Split archives always carry every block exactly once.
        #[test]
        fn split_preserves_blocks(
            sizes in prop::collection::vec(1..400usize, 1..20),
            max_size in 64..2000usize,
        ) {
            let blocks: Vec<Block> = sizes
                .iter()
                .enumerate()
                .map(|(i, size)| {
                    let data = vec![i as u8; *size];
                    Block::new(ContentId::raw(&data), data)
                })
                .collect();
            let root = blocks[0].cid;

            let mut seen = Vec::new();
            for car in split_car(root, &blocks, max_size).unwrap() {
                let reader = CarReader::parse(car).unwrap();
                prop_assert_eq!(reader.roots(), &[root][..]);
                for block in reader.blocks() {
                    seen.push(block.unwrap());
                }
            }
            prop_assert_eq!(seen, blocks);
        }
    }
}
