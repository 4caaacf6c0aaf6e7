//! Streaming file hashes for post-write verification

use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use xxhash_rust::xxh3::Xxh3;

use crate::config::HashAlgo;
use crate::error::Result;

const HASH_BUF: usize = 64 * 1024;

/// Hash a file's content with the configured algorithm
///
/// Returns `None` for [`HashAlgo::None`], letting hash verification degrade
/// to a size check.
///
/// # Errors
/// Propagates read failures.
pub fn hash_file(path: &Path, algo: HashAlgo) -> Result<Option<String>> {
    match algo {
        HashAlgo::None => Ok(None),
        HashAlgo::Xxh3 => {
            let mut hasher = Xxh3::new();
            stream_into(path, |chunk| hasher.update(chunk))?;
            Ok(Some(format!("{:016x}", hasher.digest())))
        }
        HashAlgo::Sha1 => {
            let mut hasher = Sha1::new();
            stream_into(path, |chunk| hasher.update(chunk))?;
            Ok(Some(format!("{:x}", hasher.finalize())))
        }
    }
}

fn stream_into(path: &Path, mut consume: impl FnMut(&[u8])) -> Result<()> {
    let mut reader = BufReader::with_capacity(HASH_BUF, File::open(path)?);
    let mut buf = [0u8; HASH_BUF];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        consume(&buf[..n]);
    }
}

/// Byte-by-byte comparison of two files
///
/// # Errors
/// Propagates read failures on either side.
pub fn files_identical(a: &Path, b: &Path) -> Result<bool> {
    let mut reader_a = BufReader::with_capacity(HASH_BUF, File::open(a)?);
    let mut reader_b = BufReader::with_capacity(HASH_BUF, File::open(b)?);
    let mut buf_a = [0u8; HASH_BUF];
    let mut buf_b = [0u8; HASH_BUF];
    loop {
        let n_a = read_full(&mut reader_a, &mut buf_a)?;
        let n_b = read_full(&mut reader_b, &mut buf_b)?;
        if n_a != n_b || buf_a[..n_a] != buf_b[..n_b] {
            return Ok(false);
        }
        if n_a == 0 {
            return Ok(true);
        }
    }
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
