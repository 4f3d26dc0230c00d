//! Short content digests used as blob storage keys.
//!
//! A digest is the SHA-1 of the content folded down to [`DIGEST_LEN`] bytes
//! (each hash byte is added, wrapping, into position `i % DIGEST_LEN`) and
//! then mapped through a 62-symbol alphanumeric alphabet. The result is short
//! and URL-safe, but not collision-free: [`crate::blob::BlobStore`] resolves
//! collisions by re-hashing with a salt.
//!
//! The module also hosts the SHA-1 hex hash applied to client addresses
//! before they are recorded for view deduplication.

use serde::{Deserialize, Serialize};
use sha1::{Digest as _, Sha1};
use std::fmt;

/// Number of symbols in a digest.
pub const DIGEST_LEN: usize = 10;

const ALPHABET: &[u8; 62] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// A content-derived storage key: exactly [`DIGEST_LEN`] alphanumeric symbols.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Parse a digest received from outside (URL segment, database column).
    ///
    /// Returns `None` unless the input is exactly [`DIGEST_LEN`] ASCII
    /// alphanumerics.
    pub fn parse(s: &str) -> Option<Self> {
        if is_valid(s) {
            Some(Self(s.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The two-symbol fan-out directory name.
    pub fn prefix(&self) -> &str {
        &self.0[..2]
    }

    /// The file name within the fan-out directory.
    pub fn rest(&self) -> &str {
        &self.0[2..]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Whether `s` has the shape of a digest.
pub fn is_valid(s: &str) -> bool {
    s.len() == DIGEST_LEN && s.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Fold arbitrary bytes into a digest.
///
/// Exposed so tests (and alternative hash functions) can produce digests
/// from chosen inputs.
pub fn fold(bytes: &[u8]) -> Digest {
    let mut folded = [0u8; DIGEST_LEN];
    for (i, b) in bytes.iter().enumerate() {
        folded[i % DIGEST_LEN] = folded[i % DIGEST_LEN].wrapping_add(*b);
    }
    let symbols = folded
        .iter()
        .map(|v| ALPHABET[(*v as usize) % ALPHABET.len()] as char)
        .collect();
    Digest(symbols)
}

/// Digest of `data` followed by `salt`.
///
/// An empty salt gives the plain content digest; the blob store appends salt
/// bytes only after a collision.
pub fn content_digest(data: &[u8], salt: &[u8]) -> Digest {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.update(salt);
    fold(&hasher.finalize())
}

/// Lowercase hex SHA-1 of a client address.
pub fn ip_hash(ip: &str) -> String {
    format!("{:x}", Sha1::digest(ip.as_bytes()))
}

/// Pick the client address for view accounting.
///
/// A non-empty `X-Real-IP` value from the fronting proxy wins. Otherwise the
/// port is stripped from the socket address (`"1.2.3.4:5678"` → `"1.2.3.4"`).
pub fn client_ip<'a>(real_ip: Option<&'a str>, remote_addr: &'a str) -> &'a str {
    match real_ip {
        Some(ip) if !ip.is_empty() => ip,
        _ => match remote_addr.rfind(':') {
            Some(i) => &remote_addr[..i],
            None => remote_addr,
        },
    }
}
