//! Virtual filesystem over a retrieved archive
//!
//! A [`VirtualFile`] is either a regular file or a directory. It owns the
//! archive it was decoded from, and children are decoded only when they are
//! listed, walked or read. Every block is hash-verified as it is decoded.

use crate::car::CarReader;
use crate::cid::ContentId;
use crate::error::{ClientError, Result};
use crate::unixfs::{DataType, PbLink, PbNode, UnixFsData};
use bytes::{Buf, Bytes};
use serde::Serialize;
use std::io::{self, Read};
use std::sync::Arc;

/// Metadata of a file or directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stat {
    pub is_dir: bool,
    /// File bytes, or the cumulative DAG size of a directory
    pub size: u64,
}

/// An immediate child of a directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub cid: ContentId,
}

/// One node visited by [`Walk`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalkEntry {
    /// `/` for the root, `/a/b` below it
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub cid: ContentId,
}

/// A regular file
#[derive(Debug, Clone)]
pub struct FileNode {
    name: String,
    cid: ContentId,
    size: u64,
    car: Arc<CarReader>,
}

/// A directory and its encoded links
#[derive(Debug, Clone)]
pub struct DirectoryNode {
    name: String,
    cid: ContentId,
    links: Vec<PbLink>,
    car: Arc<CarReader>,
}

impl DirectoryNode {
    fn size(&self) -> u64 {
        self.links.iter().filter_map(|l| l.tsize).sum()
    }

    fn child(&self, link: &PbLink) -> Result<VirtualFile> {
        decode_node(&self.car, link.cid, child_name(link)?)
    }
}

/// Retrieved content: a file or a directory
#[derive(Debug, Clone)]
pub enum VirtualFile {
    File(FileNode),
    Directory(DirectoryNode),
}

impl VirtualFile {
    /// Decode `root` from an archive that declares it
    pub fn from_car(car: CarReader, root: ContentId) -> Result<Self> {
        if !car.roots().contains(&root) {
            return Err(ClientError::Integrity {
                cid: root.to_string(),
                reason: "archive does not declare this root".to_string(),
            });
        }
        decode_node(&Arc::new(car), root, root.to_string())
    }

    pub fn name(&self) -> &str {
        match self {
            VirtualFile::File(f) => &f.name,
            VirtualFile::Directory(d) => &d.name,
        }
    }

    pub fn cid(&self) -> ContentId {
        match self {
            VirtualFile::File(f) => f.cid,
            VirtualFile::Directory(d) => d.cid,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, VirtualFile::Directory(_))
    }

    pub fn stat(&self) -> Stat {
        match self {
            VirtualFile::File(f) => Stat {
                is_dir: false,
                size: f.size,
            },
            VirtualFile::Directory(d) => Stat {
                is_dir: true,
                size: d.size(),
            },
        }
    }

    /// Immediate children in encoded order; `limit = 0` means all of them
    pub fn list_children(&self, limit: usize) -> Result<Vec<DirEntry>> {
        let dir = self.as_directory()?;
        let take = if limit == 0 { dir.links.len() } else { limit };
        dir.links
            .iter()
            .take(take)
            .map(|link| {
                let child = dir.child(link)?;
                let stat = child.stat();
                Ok(DirEntry {
                    name: child.name().to_string(),
                    is_dir: stat.is_dir,
                    size: stat.size,
                    cid: child.cid(),
                })
            })
            .collect()
    }

    /// Descend by a `/`-separated path of child names
    pub fn open(&self, path: &str) -> Result<VirtualFile> {
        let mut current = self.clone();
        for segment in path.split('/').filter(|s| !s.is_empty() && *s != ".") {
            let dir = current.as_directory()?;
            let link = dir
                .links
                .iter()
                .find(|l| l.name.as_deref() == Some(segment))
                .ok_or_else(|| ClientError::NotFound(format!("{} in {}", segment, dir.cid)))?;
            let next = dir.child(link)?;
            current = next;
        }
        Ok(current)
    }

    /// Pre-order traversal, root first
    pub fn walk(self) -> Walk {
        let car = match &self {
            VirtualFile::File(f) => Arc::clone(&f.car),
            VirtualFile::Directory(d) => Arc::clone(&d.car),
        };
        Walk {
            car,
            root: Some(self),
            stack: Vec::new(),
            failed: false,
        }
    }

    /// Stream the content of a file, one verified leaf at a time
    pub fn chunks(&self) -> Result<FileChunks> {
        let file = self.as_file()?;
        Ok(FileChunks {
            car: Arc::clone(&file.car),
            pending: vec![file.cid],
            failed: false,
        })
    }

    pub fn reader(&self) -> Result<FileReader> {
        Ok(FileReader {
            chunks: self.chunks()?,
            current: Bytes::new(),
        })
    }

    /// Whole content of a file
    pub fn read_all(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for chunk in self.chunks()? {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    /// Release the archive backing this value
    pub fn close(self) {}

    fn as_directory(&self) -> Result<&DirectoryNode> {
        match self {
            VirtualFile::Directory(d) => Ok(d),
            VirtualFile::File(f) => Err(ClientError::NotADirectory(f.name.clone())),
        }
    }

    fn as_file(&self) -> Result<&FileNode> {
        match self {
            VirtualFile::File(f) => Ok(f),
            VirtualFile::Directory(d) => Err(ClientError::InvalidInput(format!(
                "{} is a directory",
                d.name
            ))),
        }
    }
}

fn child_name(link: &PbLink) -> Result<String> {
    match link.name.as_deref() {
        Some(name) if !name.is_empty() && name != "." && name != ".." && !name.contains('/') => {
            Ok(name.to_string())
        }
        other => Err(ClientError::decode(format!(
            "invalid directory entry name {:?} for {}",
            other, link.cid
        ))),
    }
}

fn decode_node(car: &Arc<CarReader>, cid: ContentId, name: String) -> Result<VirtualFile> {
    let bytes = car.block(&cid)?;
    if cid.is_raw() {
        return Ok(VirtualFile::File(FileNode {
            name,
            cid,
            size: bytes.len() as u64,
            car: Arc::clone(car),
        }));
    }
    if !cid.is_dag_pb() {
        return Err(ClientError::decode(format!(
            "unsupported codec 0x{:x} for {}",
            cid.codec(),
            cid
        )));
    }

    let node = PbNode::decode(&bytes)?;
    let data = node
        .data
        .as_deref()
        .ok_or_else(|| ClientError::decode(format!("dag-pb node {} has no UnixFS data", cid)))?;
    let fs = UnixFsData::parse(data)?;
    match fs.data_type()? {
        DataType::File | DataType::Raw => Ok(VirtualFile::File(FileNode {
            name,
            cid,
            size: fs.file_size(),
            car: Arc::clone(car),
        })),
        DataType::Directory => Ok(VirtualFile::Directory(DirectoryNode {
            name,
            cid,
            links: node.links,
            car: Arc::clone(car),
        })),
        DataType::HamtShard => Err(ClientError::decode(format!(
            "{} is a HAMT-sharded directory, which is not supported",
            cid
        ))),
        other => Err(ClientError::decode(format!(
            "unsupported UnixFS type {:?} for {}",
            other, cid
        ))),
    }
}

/// Lazy pre-order traversal; see [`VirtualFile::walk`]
///
/// Yields one error and then ends if a node fails to decode or verify.
#[derive(Debug)]
pub struct Walk {
    car: Arc<CarReader>,
    root: Option<VirtualFile>,
    /// (path, cid) pairs, next to visit on top
    stack: Vec<(String, ContentId)>,
    failed: bool,
}

impl Walk {
    fn visit(&mut self, path: String, node: VirtualFile) -> Result<WalkEntry> {
        if let VirtualFile::Directory(dir) = &node {
            for link in dir.links.iter().rev() {
                let name = child_name(link)?;
                let child_path = if path == "/" {
                    format!("/{}", name)
                } else {
                    format!("{}/{}", path, name)
                };
                self.stack.push((child_path, link.cid));
            }
        }
        let stat = node.stat();
        Ok(WalkEntry {
            path,
            is_dir: stat.is_dir,
            size: stat.size,
            cid: node.cid(),
        })
    }
}

impl Iterator for Walk {
    type Item = Result<WalkEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let result = if let Some(root) = self.root.take() {
            self.visit("/".to_string(), root)
        } else {
            let (path, cid) = self.stack.pop()?;
            let name = path.rsplit('/').next().unwrap_or_default().to_string();
            decode_node(&self.car, cid, name).and_then(|node| self.visit(path, node))
        };
        if result.is_err() {
            self.failed = true;
            self.stack.clear();
        }
        Some(result)
    }
}

impl std::iter::FusedIterator for Walk {}

/// Verified leaf contents of a file, in order
#[derive(Debug)]
pub struct FileChunks {
    car: Arc<CarReader>,
    /// Blocks still to visit, next on top
    pending: Vec<ContentId>,
    failed: bool,
}

impl FileChunks {
    fn expand(&mut self, cid: ContentId) -> Result<Option<Bytes>> {
        let bytes = self.car.block(&cid)?;
        if cid.is_raw() {
            return Ok(Some(bytes));
        }
        if !cid.is_dag_pb() {
            return Err(ClientError::decode(format!(
                "unsupported codec 0x{:x} in file {}",
                cid.codec(),
                cid
            )));
        }
        let node = PbNode::decode(&bytes)?;
        let fs = match node.data.as_deref() {
            Some(data) => UnixFsData::parse(data)?,
            None => return Err(ClientError::decode(format!("file node {} has no UnixFS data", cid))),
        };
        let data_type = fs.data_type()?;
        if !matches!(data_type, DataType::File | DataType::Raw) {
            return Err(ClientError::decode(format!(
                "{:?} node {} inside a file",
                data_type, cid
            )));
        }
        self.pending.extend(node.links.iter().rev().map(|l| l.cid));
        Ok(fs.data.filter(|d| !d.is_empty()).map(Bytes::from))
    }
}

impl Iterator for FileChunks {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        while let Some(cid) = self.pending.pop() {
            match self.expand(cid) {
                Ok(Some(bytes)) if !bytes.is_empty() => return Some(Ok(bytes)),
                Ok(_) => continue,
                Err(e) => {
                    self.failed = true;
                    self.pending.clear();
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

impl std::iter::FusedIterator for FileChunks {}

/// [`Read`] adapter over [`FileChunks`]
#[derive(Debug)]
pub struct FileReader {
    chunks: FileChunks,
    current: Bytes,
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.current.is_empty() {
            match self.chunks.next() {
                Some(Ok(bytes)) => self.current = bytes,
                Some(Err(e)) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.advance(n);
        Ok(n)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::car::encode_car;
    use crate::pack::{NamedFile, Packer};
    use proptest::prelude::*;

    proptest! {
        /// Packed content reads back byte for byte.
        #[test]
        fn read_back_packed_content(
            data in prop::collection::vec(any::<u8>(), 0..2048),
            chunk_size in 1..64usize,
            max_links in 2..8usize,
            wrap in any::<bool>(),
        ) {
            let packer = Packer::new(chunk_size, max_links).unwrap();
            let dag = packer
                .pack(vec![NamedFile::from_bytes("data.bin", data.clone())], wrap)
                .unwrap();
            let car = CarReader::parse(encode_car(&[dag.root], &dag.blocks).unwrap()).unwrap();
            let root = VirtualFile::from_car(car, dag.root).unwrap();

            let file = if wrap { root.open("data.bin").unwrap() } else { root };
            prop_assert_eq!(file.stat().size, data.len() as u64);
            prop_assert_eq!(file.read_all().unwrap(), data.clone());

            let mut streamed = Vec::new();
            std::io::Read::read_to_end(&mut file.reader().unwrap(), &mut streamed).unwrap();
            prop_assert_eq!(streamed, data);
        }
    }
}
