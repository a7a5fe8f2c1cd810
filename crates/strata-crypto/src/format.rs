//! `CTRCH` chunked ciphertext container
//!
//! Layout (all integers big-endian):
//! ```text
//! [5 bytes:  magic "CTRCH"]
//! [16 bytes: base_nonce]
//! [8 bytes:  chunk_size]
//! repeated:
//!   [8 bytes: ciphertext_length][ciphertext_length bytes: ciphertext]
//! ```

use std::io::{ErrorKind, Read, Write};

use strata_core::{StrataError, StrataResult};

use crate::NONCE_SIZE;

pub const MAGIC: &[u8; 5] = b"CTRCH";

/// Header length in bytes: magic + base nonce + chunk size
pub const HEADER_LEN: usize = MAGIC.len() + NONCE_SIZE + 8;

/// Decoded container header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub base_nonce: [u8; NONCE_SIZE],
    pub chunk_size: u64,
}

pub fn write_header<W: Write>(w: &mut W, header: &Header) -> std::io::Result<()> {
    w.write_all(MAGIC)?;
    w.write_all(&header.base_nonce)?;
    w.write_all(&header.chunk_size.to_be_bytes())
}

pub fn write_frame<W: Write>(w: &mut W, ciphertext: &[u8]) -> std::io::Result<()> {
    w.write_all(&(ciphertext.len() as u64).to_be_bytes())?;
    w.write_all(ciphertext)
}

/// Read and validate the header. A wrong magic is a format error.
pub fn read_header<R: Read>(r: &mut R) -> StrataResult<Header> {
    let mut magic = [0u8; 5];
    read_exact_or_format(r, &mut magic, "header magic")?;
    if &magic != MAGIC {
        return Err(StrataError::Format("not a CTRCH chunked file".into()));
    }

    let mut base_nonce = [0u8; NONCE_SIZE];
    read_exact_or_format(r, &mut base_nonce, "base nonce")?;

    let mut size = [0u8; 8];
    read_exact_or_format(r, &mut size, "chunk size")?;

    Ok(Header {
        base_nonce,
        chunk_size: u64::from_be_bytes(size),
    })
}

/// Read every length-prefixed frame until a clean end of file.
///
/// `max_frame` caps a single frame's declared length so a corrupted length
/// prefix cannot request an absurd allocation.
pub fn read_frames<R: Read>(r: &mut R, max_frame: u64) -> StrataResult<Vec<Vec<u8>>> {
    let mut frames = Vec::new();
    loop {
        let Some(len) = read_frame_len(r)? else {
            break;
        };
        if len > max_frame {
            return Err(StrataError::Format(format!(
                "chunk {} declares {len} bytes (limit {max_frame})",
                frames.len()
            )));
        }
        let mut buf = vec![0u8; len as usize];
        read_exact_or_format(r, &mut buf, "chunk body")?;
        frames.push(buf);
    }
    Ok(frames)
}

/// `None` on a clean EOF at a frame boundary; an EOF inside the prefix is
/// truncation.
fn read_frame_len<R: Read>(r: &mut R) -> StrataResult<Option<u64>> {
    let mut prefix = [0u8; 8];
    let mut filled = 0;
    while filled < prefix.len() {
        match r.read(&mut prefix[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(StrataError::Format(
                    "truncated chunk length prefix".into(),
                ))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Some(u64::from_be_bytes(prefix)))
}

fn read_exact_or_format<R: Read>(r: &mut R, buf: &mut [u8], what: &str) -> StrataResult<()> {
    r.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => StrataError::Format(format!("truncated {what}")),
        _ => StrataError::Io(e),
    })
}
