//! Rust client for content-addressed storage services
//!
//! Uploads local files as CAR archives, queries pin and deal status, and
//! retrieves content as a hash-verified virtual filesystem.
//!
//! # Example
//!
//! ```rust,no_run
//! use content_store_client::{ClientConfig, ContentId, StoreClient, VirtualFile};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = StoreClient::new(ClientConfig::from_env()?)?;
//!
//! let cid: ContentId = "bafybeiczsscdsbs7ffqz55asqdf3smv6klcw3gofszvwlyarci47bgf354".parse()?;
//! match client.get(&cid).await? {
//!     VirtualFile::Directory(_) => println!("directory"),
//!     VirtualFile::File(_) => println!("file"),
//! }
//!
//! let root = client.get(&cid).await?;
//! for entry in root.walk() {
//!     let entry = entry?;
//!     println!("{} ({} bytes)", entry.path, entry.size);
//! }
//! # Ok(())
//! # }
//! ```

pub mod car;
pub mod cid;
pub mod client;
pub mod config;
pub mod error;
pub mod pack;
pub mod types;
pub mod unixfs;
pub mod vfs;
mod wire;

// Re-export main types
pub use crate::cid::ContentId;
pub use client::StoreClient;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use pack::{files_from_path, NamedFile, PackedDag, Packer};
pub use types::*;
pub use vfs::{DirEntry, Stat, VirtualFile, Walk, WalkEntry};
