//! Content identifiers
//!
//! `ContentId` wraps a [`cid::Cid`] and adds the checks this client relies on:
//! digest lengths are validated for known hash functions, and block bytes can
//! be verified against the identifier that names them.
//!
//! Accepted text forms are the multibase strings produced by the service
//! (`bafy...`/`bafk...` for CIDv1, `Qm...` for CIDv0).

use crate::error::{ClientError, Result};
use cid::{Cid, Version};
use multihash_codetable::{Code, MultihashDigest};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Multicodec for raw leaf blocks
pub const RAW: u64 = 0x55;

/// Multicodec for dag-pb nodes
pub const DAG_PB: u64 = 0x70;

/// Multihash code for sha2-256
pub const SHA2_256: u64 = 0x12;

/// Multihash code for sha2-512
pub const SHA2_512: u64 = 0x13;

/// Self-describing, hash-derived identifier of a block of content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId(Cid);

impl ContentId {
    /// Parse a textual identifier
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(malformed(input, "empty identifier"));
        }
        let cid = Cid::from_str(input).map_err(|e| malformed(input, e))?;
        Self::validated(cid, input)
    }

    /// Parse an identifier from its binary form
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let cid = Cid::try_from(bytes).map_err(|e| malformed(&hex::encode(bytes), e))?;
        Self::validated(cid, &hex::encode(bytes))
    }

    /// Parse the identifier at the start of `bytes`, returning it and its encoded length
    pub fn read_prefix(bytes: &[u8]) -> Result<(Self, usize)> {
        let mut cursor = std::io::Cursor::new(bytes);
        let cid = Cid::read_bytes(&mut cursor)
            .map_err(|e| malformed(&hex::encode(&bytes[..bytes.len().min(40)]), e))?;
        let used = cursor.position() as usize;
        Ok((Self::validated(cid, &hex::encode(&bytes[..used]))?, used))
    }

    /// Compute the CIDv1 sha2-256 identifier of a block with the given codec
    pub fn for_block(codec: u64, data: &[u8]) -> Self {
        let hash = Code::Sha2_256.digest(data);
        ContentId(Cid::new_v1(codec, hash))
    }

    /// Identifier of a raw leaf block
    pub fn raw(data: &[u8]) -> Self {
        Self::for_block(RAW, data)
    }

    /// Identifier of a dag-pb node
    pub fn dag_pb(data: &[u8]) -> Self {
        Self::for_block(DAG_PB, data)
    }

    /// CID version (0 or 1)
    pub fn version(&self) -> u64 {
        match self.0.version() {
            Version::V0 => 0,
            Version::V1 => 1,
        }
    }

    /// Multicodec of the content this identifier names
    pub fn codec(&self) -> u64 {
        self.0.codec()
    }

    /// Multihash function code
    pub fn hash_code(&self) -> u64 {
        self.0.hash().code()
    }

    /// Raw digest bytes
    pub fn digest(&self) -> &[u8] {
        self.0.hash().digest()
    }

    /// Whether this names a raw leaf block
    pub fn is_raw(&self) -> bool {
        self.codec() == RAW
    }

    /// Whether this names a dag-pb node
    pub fn is_dag_pb(&self) -> bool {
        self.codec() == DAG_PB
    }

    /// Binary form, as embedded in dag-pb links and CAR sections
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes()
    }

    /// Underlying [`Cid`]
    pub fn as_cid(&self) -> &Cid {
        &self.0
    }

    /// Check that `data` hashes to this identifier
    pub fn verify(&self, data: &[u8]) -> Result<()> {
        let code = Code::try_from(self.hash_code()).map_err(|_| ClientError::Integrity {
            cid: self.to_string(),
            reason: format!("unsupported hash function 0x{:x}", self.hash_code()),
        })?;
        let computed = code.digest(data);
        if computed.digest() != self.digest() {
            return Err(ClientError::Integrity {
                cid: self.to_string(),
                reason: format!(
                    "digest mismatch: expected {}, got {}",
                    hex::encode(self.digest()),
                    hex::encode(computed.digest())
                ),
            });
        }
        Ok(())
    }

    fn validated(cid: Cid, input: &str) -> Result<Self> {
        let hash = cid.hash();
        let expected = match hash.code() {
            SHA2_256 => Some(32),
            SHA2_512 => Some(64),
            _ => None,
        };
        if let Some(expected) = expected {
            if hash.digest().len() != expected {
                return Err(malformed(
                    input,
                    format!(
                        "digest length {} does not match hash function (expected {})",
                        hash.digest().len(),
                        expected
                    ),
                ));
            }
        }
        if hash.digest().is_empty() {
            return Err(malformed(input, "empty digest"));
        }
        Ok(ContentId(cid))
    }
}

fn malformed(input: &str, reason: impl fmt::Display) -> ClientError {
    ClientError::MalformedIdentifier {
        input: input.to_string(),
        reason: reason.to_string(),
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for ContentId {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<ContentId> for Cid {
    fn from(id: ContentId) -> Self {
        id.0
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ContentId::parse(&s).map_err(serde::de::Error::custom)
    }
}
