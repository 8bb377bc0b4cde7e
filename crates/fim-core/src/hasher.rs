//! Streaming SHA-256 content digests.
//!
//! Files are read in bounded chunks so peak memory does not depend on the
//! size of the monitored file. A file that cannot be opened or read is not an
//! error here: it is reported as missing and the caller decides what that
//! means.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Default read size, small enough for constrained devices.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

pub const DIGEST_LEN: usize = 32;

/// A 256-bit content digest. Displays as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DigestParseError {
    #[error("invalid hex digest: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("digest must be 32 bytes, got {0}")]
    Length(usize),
}

impl FromStr for Digest {
    type Err = DigestParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s)?;
        let bytes: [u8; DIGEST_LEN] = raw
            .as_slice()
            .try_into()
            .map_err(|_| DigestParseError::Length(raw.len()))?;
        Ok(Self(bytes))
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> Self {
        d.to_hex()
    }
}

impl TryFrom<String> for Digest {
    type Error = DigestParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Digest an in-memory buffer.
pub fn digest_bytes(data: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Digest(hasher.finalize().into())
}

/// Digest the file at `path`, or `None` when it cannot be opened or read.
pub fn digest_file(path: &Path) -> Option<Digest> {
    digest_file_chunked(path, DEFAULT_CHUNK_SIZE)
}

/// Same as [`digest_file`] with an explicit read size.
pub fn digest_file_chunked(path: &Path, chunk_size: usize) -> Option<Digest> {
    match hash_stream(path, chunk_size.max(1)) {
        Ok(digest) => Some(digest),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "digest unavailable");
            None
        }
    }
}

fn hash_stream(path: &Path, chunk_size: usize) -> io::Result<Digest> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; chunk_size];
    loop {
        let n = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..n]);
    }
    Ok(Digest(hasher.finalize().into()))
}
