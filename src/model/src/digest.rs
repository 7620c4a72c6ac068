//! SHA-256 content digests.
//!
//! Weight files can be many gigabytes, so file hashing always streams in
//! fixed-size chunks instead of reading the whole file.

use std::io::{Read, Write};
use std::path::Path;

use cog_core::error::{CogError, Result};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

/// Read buffer size for streaming hashes.
const CHUNK_SIZE: usize = 1024 * 1024;

/// Prefix `hex` with the algorithm name.
pub fn prefixed(hex: &str) -> String {
    format!("sha256:{}", hex)
}

/// Compute the `sha256:`-prefixed digest of raw bytes.
pub fn sha256_bytes(data: &[u8]) -> String {
    prefixed(&hex::encode(Sha256::digest(data)))
}

/// Stream `reader` into `sink` in fixed-size chunks, returning the digest
/// and byte count of everything read.
///
/// The token is checked between chunks; a cancelled copy returns
/// [`CogError::Cancelled`] rather than a partial digest. `path` only
/// labels errors.
pub fn copy_hashed<R: Read, W: Write>(
    cancel: &CancellationToken,
    path: &Path,
    reader: &mut R,
    sink: &mut W,
) -> Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut size = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Err(CogError::Cancelled(format!("hashing {}", path.display())));
        }
        let n = reader.read(&mut buf).map_err(|e| {
            CogError::context(format!("failed to read {}", path.display()), e.into())
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        sink.write_all(&buf[..n]).map_err(|e| {
            CogError::context(format!("failed to write data from {}", path.display()), e.into())
        })?;
        size += n as u64;
    }
    Ok((prefixed(&hex::encode(hasher.finalize())), size))
}

/// Compute the digest and size of a file on a blocking task.
pub async fn sha256_file_cancellable(
    cancel: &CancellationToken,
    path: &Path,
) -> Result<(String, u64)> {
    let cancel = cancel.clone();
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&path).map_err(|e| {
            CogError::context(format!("failed to open {} for hashing", path.display()), e.into())
        })?;
        copy_hashed(&cancel, &path, &mut file, &mut std::io::sink())
    })
    .await
    .map_err(|e| CogError::Other(format!("hashing task failed: {}", e)))?
}

/// Writer adapter that hashes and counts everything passing through it.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Return the inner writer, the digest and the byte count.
    pub fn finish(self) -> (W, String, u64) {
        let digest = prefixed(&hex::encode(self.hasher.finalize()));
        (self.inner, digest, self.written)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
