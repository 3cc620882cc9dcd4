//! Importer: turns named byte streams into a content-addressed DAG
//!
//! Files are cut into fixed-size chunks, each stored as a raw leaf. A file
//! that fits in one chunk is that leaf. Larger files get a balanced tree of
//! dag-pb nodes, at most `max_links` children each. Directories are dag-pb
//! nodes with one named link per child, sorted by name bytes.

use crate::car::Block;
use crate::cid::ContentId;
use crate::error::{ClientError, Result};
use crate::unixfs::{directory_node, PbLink, PbNode, UnixFsData};
use std::collections::btree_map::Entry as MapEntry;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Default leaf chunk size (256 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 262_144;

/// Default maximum links per file node
pub const DEFAULT_MAX_LINKS: usize = 174;

/// A file to upload: a `/`-separated path and its content
pub struct NamedFile {
    pub path: String,
    reader: Box<dyn Read + Send>,
}

impl NamedFile {
    pub fn new(path: impl Into<String>, reader: impl Read + Send + 'static) -> Self {
        Self {
            path: path.into(),
            reader: Box::new(reader),
        }
    }

    pub fn from_bytes(path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(path, io::Cursor::new(bytes.into()))
    }

    /// A local file, opened when packing first reads from it
    pub fn from_path(path: impl Into<String>, local: impl Into<PathBuf>) -> Self {
        Self::new(
            path,
            LazyFile {
                path: local.into(),
                file: None,
            },
        )
    }
}

impl fmt::Debug for NamedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedFile").field("path", &self.path).finish()
    }
}

struct LazyFile {
    path: PathBuf,
    file: Option<File>,
}

impl Read for LazyFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.file.is_none() {
            self.file = Some(File::open(&self.path)?);
        }
        match self.file.as_mut() {
            Some(file) => file.read(buf),
            None => Ok(0),
        }
    }
}

/// Collect the files under a local path
///
/// Names are relative to the parent of `path`, so uploading `photos/` yields
/// `photos/a.jpg`, `photos/2024/b.jpg`. Dot-files and dot-directories are
/// skipped unless `include_hidden` is set.
pub fn files_from_path(path: impl AsRef<Path>, include_hidden: bool) -> Result<Vec<NamedFile>> {
    let root = path.as_ref().canonicalize()?;
    let base = root.parent().unwrap_or(&root).to_path_buf();

    let mut files = Vec::new();
    let walker = WalkDir::new(&root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| include_hidden || e.depth() == 0 || !is_hidden(e));

    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(&base)
            .map_err(|_| ClientError::InvalidInput(entry.path().display().to_string()))?;
        let name = relative
            .components()
            .map(|c| {
                c.as_os_str().to_str().ok_or_else(|| {
                    ClientError::InvalidInput(format!(
                        "path is not valid UTF-8: {}",
                        entry.path().display()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?
            .join("/");
        files.push(NamedFile::from_path(name, entry.path()));
    }

    debug!(path = %root.display(), files = files.len(), "Collected local files");
    Ok(files)
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

/// Split a path into validated segments
pub fn normalize_path(path: &str) -> Result<Vec<String>> {
    let trimmed = path.trim_start_matches('/');
    let mut segments = Vec::new();
    for segment in trimmed.split('/') {
        match segment {
            "." => continue,
            "" => {
                return Err(ClientError::InvalidInput(format!(
                    "empty name in path {:?}",
                    path
                )))
            }
            ".." => {
                return Err(ClientError::InvalidInput(format!(
                    "parent reference in path {:?}",
                    path
                )))
            }
            name => segments.push(name.to_string()),
        }
    }
    if segments.is_empty() {
        return Err(ClientError::InvalidInput(format!("path {:?} names no file", path)));
    }
    Ok(segments)
}

/// Result of packing: every block, and the root that names them
#[derive(Debug, Clone)]
pub struct PackedDag {
    pub root: ContentId,
    /// Unique blocks, children before parents
    pub blocks: Vec<Block>,
    /// Cumulative size of the root DAG
    pub size: u64,
}

enum Entry {
    File(Box<dyn Read + Send>),
    Dir(BTreeMap<String, Entry>),
}

#[derive(Debug, Clone, Copy)]
struct Packed {
    cid: ContentId,
    /// Cumulative encoded size of the sub-DAG
    tsize: u64,
    /// Logical file bytes (zero for directories)
    filesize: u64,
}

/// Chunking and layout parameters
#[derive(Debug, Clone, Copy)]
pub struct Packer {
    chunk_size: usize,
    max_links: usize,
}

impl Default for Packer {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_links: DEFAULT_MAX_LINKS,
        }
    }
}

impl Packer {
    pub fn new(chunk_size: usize, max_links: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(ClientError::Config("chunk_size must be positive".to_string()));
        }
        if max_links < 2 {
            return Err(ClientError::Config("max_links must be at least 2".to_string()));
        }
        Ok(Self {
            chunk_size,
            max_links,
        })
    }

    /// Pack files into a DAG
    ///
    /// With `wrap_with_directory` the top-level entries sit in an unnamed root
    /// directory; otherwise there must be exactly one top-level entry and it
    /// becomes the root.
    pub fn pack(&self, files: Vec<NamedFile>, wrap_with_directory: bool) -> Result<PackedDag> {
        if files.is_empty() {
            return Err(ClientError::InvalidInput("no files to upload".to_string()));
        }

        let file_count = files.len();
        let mut tree = BTreeMap::new();
        for file in files {
            let segments = normalize_path(&file.path)?;
            insert(&mut tree, &segments, file.reader, &file.path)?;
        }

        let mut builder = Builder {
            packer: self,
            blocks: Vec::new(),
            seen: HashSet::new(),
        };

        let root = if wrap_with_directory {
            builder.directory(tree)?
        } else {
            if tree.len() != 1 {
                return Err(ClientError::InvalidInput(format!(
                    "{} top-level entries cannot be uploaded without a wrapping directory",
                    tree.len()
                )));
            }
            match tree.into_iter().next() {
                Some((_, entry)) => builder.entry(entry)?,
                None => return Err(ClientError::InvalidInput("no files to upload".to_string())),
            }
        };

        info!(
            cid = %root.cid,
            files = file_count,
            blocks = builder.blocks.len(),
            size = root.tsize,
            "Packed upload"
        );
        Ok(PackedDag {
            root: root.cid,
            blocks: builder.blocks,
            size: root.tsize,
        })
    }
}

fn insert(
    tree: &mut BTreeMap<String, Entry>,
    segments: &[String],
    reader: Box<dyn Read + Send>,
    path: &str,
) -> Result<()> {
    let conflict = || ClientError::InvalidInput(format!("conflicting entries at path {:?}", path));

    let (name, parents) = segments
        .split_last()
        .ok_or_else(|| ClientError::InvalidInput(format!("path {:?} names no file", path)))?;

    let mut dir = tree;
    for segment in parents {
        let entry = dir
            .entry(segment.clone())
            .or_insert_with(|| Entry::Dir(BTreeMap::new()));
        dir = match entry {
            Entry::Dir(children) => children,
            Entry::File(_) => return Err(conflict()),
        };
    }

    match dir.entry(name.clone()) {
        MapEntry::Vacant(slot) => {
            slot.insert(Entry::File(reader));
            Ok(())
        }
        MapEntry::Occupied(_) => Err(conflict()),
    }
}

struct Builder<'a> {
    packer: &'a Packer,
    blocks: Vec<Block>,
    seen: HashSet<ContentId>,
}

impl Builder<'_> {
    fn add(&mut self, cid: ContentId, data: Vec<u8>) {
        if self.seen.insert(cid) {
            self.blocks.push(Block::new(cid, data));
        }
    }

    fn entry(&mut self, entry: Entry) -> Result<Packed> {
        match entry {
            Entry::File(reader) => self.file(reader),
            Entry::Dir(children) => self.directory(children),
        }
    }

    fn file(&mut self, mut reader: Box<dyn Read + Send>) -> Result<Packed> {
        let chunk_size = self.packer.chunk_size;
        let mut level = Vec::new();
        loop {
            let mut chunk = Vec::with_capacity(chunk_size);
            reader
                .by_ref()
                .take(chunk_size as u64)
                .read_to_end(&mut chunk)?;
            if chunk.is_empty() && !level.is_empty() {
                break;
            }
            let last = chunk.len() < chunk_size;
            let len = chunk.len() as u64;
            let cid = ContentId::raw(&chunk);
            self.add(cid, chunk);
            level.push(Packed {
                cid,
                tsize: len,
                filesize: len,
            });
            if last {
                break;
            }
        }

        let leaves = level.len();
        while level.len() > 1 {
            level = level
                .chunks(self.packer.max_links)
                .map(|group| self.file_node(group))
                .collect();
        }
        let packed = level
            .pop()
            .ok_or_else(|| ClientError::InvalidInput("file produced no chunks".to_string()))?;
        debug!(cid = %packed.cid, leaves, bytes = packed.filesize, "Packed file");
        Ok(packed)
    }

    fn file_node(&mut self, children: &[Packed]) -> Packed {
        let filesize = children.iter().map(|c| c.filesize).sum();
        let data = UnixFsData::file(filesize, children.iter().map(|c| c.filesize).collect());
        let node = PbNode {
            links: children
                .iter()
                .map(|c| PbLink {
                    cid: c.cid,
                    name: Some(String::new()),
                    tsize: Some(c.tsize),
                })
                .collect(),
            data: Some(data.to_bytes()),
        };
        self.node(node, filesize)
    }

    fn directory(&mut self, children: BTreeMap<String, Entry>) -> Result<Packed> {
        let mut links = Vec::with_capacity(children.len());
        for (name, entry) in children {
            let child = self.entry(entry)?;
            links.push(PbLink {
                cid: child.cid,
                name: Some(name),
                tsize: Some(child.tsize),
            });
        }
        Ok(self.node(directory_node(links), 0))
    }

    fn node(&mut self, node: PbNode, filesize: u64) -> Packed {
        let bytes = node.encode();
        let tsize = bytes.len() as u64 + node.links_size();
        let cid = ContentId::dag_pb(&bytes);
        self.add(cid, bytes);
        Packed {
            cid,
            tsize,
            filesize,
        }
    }
}
