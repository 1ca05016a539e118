//! Content fingerprints: 64 KiB partial hash and whole-file full hash, both
//! 128-bit (strength equivalent to BLAKE2b-128 truncation, spec §3).

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use blake2::Blake2bVar;
use blake2::digest::{Update, VariableOutput};

use crate::core::errors::{DsError, Result};

/// Size of the partial-hash prefix (spec §3/§4.5).
pub const PARTIAL_HASH_BYTES: usize = 64 * 1024;

/// Streaming read buffer size for the full-hash pass (spec §4.5).
const FULL_HASH_BUFFER: usize = 1024 * 1024;

/// A 128-bit content digest, hex-formatted for storage and export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest128(pub [u8; 16]);

impl Digest128 {
    #[must_use]
    pub fn to_hex(self) -> String {
        use std::fmt::Write;
        let mut s = String::with_capacity(32);
        for b in self.0 {
            let _ = write!(s, "{b:02x}");
        }
        s
    }
}

impl std::fmt::Display for Digest128 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

fn hasher() -> Blake2bVar {
    Blake2bVar::new(16).expect("16-byte output is within BLAKE2b's valid range")
}

fn finalize(mut h: Blake2bVar) -> Digest128 {
    let mut out = [0u8; 16];
    h.finalize_variable(&mut out)
        .expect("16-byte buffer matches the configured output size");
    Digest128(out)
}

/// Hash the first `PARTIAL_HASH_BYTES` of `path`. Files shorter than that
/// are hashed in full (matching the quick pass's intent of a fast, cheap
/// discriminator, not a guaranteed-length prefix).
pub fn partial_hash(path: &Path) -> Result<Digest128> {
    let mut file = File::open(path).map_err(|e| classify_io_error(path, e))?;
    let mut buf = vec![0u8; PARTIAL_HASH_BYTES];
    let mut total = 0usize;
    loop {
        let n = file
            .read(&mut buf[total..])
            .map_err(|e| classify_io_error(path, e))?;
        if n == 0 {
            break;
        }
        total += n;
        if total == buf.len() {
            break;
        }
    }
    let mut h = hasher();
    Update::update(&mut h, &buf[..total]);
    Ok(finalize(h))
}

/// Hash an in-memory byte slice directly (used for the folder-duplicate
/// manifest hash, spec §4.8, rather than a file's own content).
#[must_use]
pub fn hash_bytes(data: &[u8]) -> Digest128 {
    let mut h = hasher();
    Update::update(&mut h, data);
    finalize(h)
}

/// Hash the entire content of `path`, streaming through a 1 MiB buffer.
pub fn full_hash(path: &Path) -> Result<Digest128> {
    let mut file = File::open(path).map_err(|e| classify_io_error(path, e))?;
    let mut buf = vec![0u8; FULL_HASH_BUFFER];
    let mut h = hasher();
    loop {
        let n = file.read(&mut buf).map_err(|e| classify_io_error(path, e))?;
        if n == 0 {
            break;
        }
        Update::update(&mut h, &buf[..n]);
    }
    Ok(finalize(h))
}

/// Classify a file-open/read error per spec §4.5's `locked` / `missing` /
/// `permission` / `io` taxonomy.
pub fn classify_io_error(path: &Path, err: io::Error) -> DsError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => DsError::PermissionDenied {
            path: path.to_path_buf(),
        },
        io::ErrorKind::WouldBlock => DsError::Locked {
            path: path.to_path_buf(),
        },
        _ => {
            if is_locked_errno(&err) {
                DsError::Locked {
                    path: path.to_path_buf(),
                }
            } else {
                DsError::io(path, err)
            }
        }
    }
}

#[cfg(unix)]
fn is_locked_errno(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::ETXTBSY) | Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK)
    )
}

#[cfg(not(unix))]
fn is_locked_errno(_err: &io::Error) -> bool {
    false
}
