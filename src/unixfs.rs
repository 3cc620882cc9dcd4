//! dag-pb nodes and UnixFS metadata
//!
//! A dag-pb node is a protobuf `PBNode { Data = 1; repeated Links = 2 }`,
//! each link `PBLink { Hash = 1; Name = 2; Tsize = 3 }`. The canonical
//! encoding writes links before data. The `Data` bytes of a UnixFS node hold
//! a second protobuf describing whether the node is a file or directory.

use crate::cid::ContentId;
use crate::error::{ClientError, Result};
use crate::wire::{self, FieldValue, ProtoReader};
use prost::Message;

/// A named, sized reference from a dag-pb node to another block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PbLink {
    pub cid: ContentId,
    pub name: Option<String>,
    /// Cumulative size of the referenced DAG
    pub tsize: Option<u64>,
}

/// Decoded dag-pb node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PbNode {
    pub links: Vec<PbLink>,
    pub data: Option<Vec<u8>>,
}

impl PbNode {
    /// Encode in canonical dag-pb form
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for link in &self.links {
            let mut link_buf = Vec::new();
            wire::put_bytes_field(&mut link_buf, 1, &link.cid.to_bytes());
            if let Some(ref name) = link.name {
                wire::put_bytes_field(&mut link_buf, 2, name.as_bytes());
            }
            if let Some(tsize) = link.tsize {
                wire::put_uint_field(&mut link_buf, 3, tsize);
            }
            wire::put_bytes_field(&mut buf, 2, &link_buf);
        }
        if let Some(ref data) = self.data {
            wire::put_bytes_field(&mut buf, 1, data);
        }
        buf
    }

    /// Decode dag-pb bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut node = PbNode::default();
        let mut reader = ProtoReader::new(bytes);
        while let Some((field, value)) = reader.next_field()? {
            match (field, value) {
                (1, FieldValue::Bytes(data)) => {
                    if node.data.is_some() {
                        return Err(ClientError::decode("dag-pb node has duplicate Data"));
                    }
                    node.data = Some(data.to_vec());
                }
                (2, FieldValue::Bytes(link)) => node.links.push(decode_link(link)?),
                (field, _) => {
                    return Err(ClientError::decode(format!(
                        "unexpected dag-pb node field {}",
                        field
                    )))
                }
            }
        }
        Ok(node)
    }

    /// Sum of link cumulative sizes
    pub fn links_size(&self) -> u64 {
        self.links.iter().filter_map(|l| l.tsize).sum()
    }
}

fn decode_link(bytes: &[u8]) -> Result<PbLink> {
    let mut cid = None;
    let mut name = None;
    let mut tsize = None;
    let mut reader = ProtoReader::new(bytes);
    while let Some((field, value)) = reader.next_field()? {
        match (field, value) {
            (1, FieldValue::Bytes(hash)) => cid = Some(ContentId::from_bytes(hash)?),
            (2, FieldValue::Bytes(raw)) => {
                let s = std::str::from_utf8(raw)
                    .map_err(|_| ClientError::decode("dag-pb link name is not UTF-8"))?;
                name = Some(s.to_string());
            }
            (3, FieldValue::Varint(v)) => tsize = Some(v),
            (field, _) => {
                return Err(ClientError::decode(format!(
                    "unexpected dag-pb link field {}",
                    field
                )))
            }
        }
    }
    let cid = cid.ok_or_else(|| ClientError::decode("dag-pb link without Hash"))?;
    Ok(PbLink { cid, name, tsize })
}

/// UnixFS node type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum DataType {
    Raw = 0,
    Directory = 1,
    File = 2,
    Metadata = 3,
    Symlink = 4,
    HamtShard = 5,
}

/// UnixFS `Data` message
///
/// Fields are written in tag order, which is also the canonical UnixFS
/// order. `hashType`, `fanout`, `mode` and `mtime` are skipped on read.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct UnixFsData {
    #[prost(enumeration = "DataType", optional, tag = "1")]
    pub kind: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub data: Option<Vec<u8>>,
    #[prost(uint64, optional, tag = "3")]
    pub filesize: Option<u64>,
    #[prost(uint64, repeated, packed = "false", tag = "4")]
    pub blocksizes: Vec<u64>,
}

impl UnixFsData {
    fn with_type(data_type: DataType) -> Self {
        Self {
            kind: Some(data_type as i32),
            ..Default::default()
        }
    }

    pub fn directory() -> Self {
        Self::with_type(DataType::Directory)
    }

    pub fn file(filesize: u64, blocksizes: Vec<u64>) -> Self {
        Self {
            filesize: Some(filesize),
            blocksizes,
            ..Self::with_type(DataType::File)
        }
    }

    /// Node type, rejecting missing or unknown codes
    pub fn data_type(&self) -> Result<DataType> {
        let code = self
            .kind
            .ok_or_else(|| ClientError::decode("UnixFS data without Type"))?;
        DataType::try_from(code)
            .map_err(|_| ClientError::decode(format!("unknown UnixFS type {}", code)))
    }

    /// Logical file size: `filesize` if present, else inline data plus blocksizes
    pub fn file_size(&self) -> u64 {
        self.filesize.unwrap_or_else(|| {
            self.data.as_ref().map_or(0, |d| d.len() as u64) + self.blocksizes.iter().sum::<u64>()
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Decode and check the node type
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let data = <Self as Message>::decode(bytes)
            .map_err(|e| ClientError::decode(format!("invalid UnixFS data: {}", e)))?;
        data.data_type()?;
        Ok(data)
    }
}

/// Build the dag-pb bytes of a directory node from already-sorted links
pub fn directory_node(links: Vec<PbLink>) -> PbNode {
    PbNode {
        links,
        data: Some(UnixFsData::directory().to_bytes()),
    }
}
