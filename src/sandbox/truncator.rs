//! Bounded reads from sandbox-produced files.
//!
//! A submission's stdout is an adversarial input: nothing stops it from
//! writing gigabytes. Every read of a sandbox file goes through here so a
//! single oversized file can't blow up the grading worker's memory. Binary
//! only — there is no text-mode variant, since the files being read are
//! arbitrary submission output, not necessarily valid UTF-8 until the
//! caller decides to decode them.

use std::io::{Read, Seek, SeekFrom};

const TRUNCATION_NOTICE: &[u8] = b"\n...(truncated)";

/// Read up to `max_bytes` from `reader`, appending a truncation notice if
/// the underlying content is longer. Returns the bytes actually read (never
/// more than `max_bytes` + the notice).
pub fn read_truncated<R: Read + Seek>(mut reader: R, max_bytes: u64) -> std::io::Result<Vec<u8>> {
    let total_len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;

    if total_len <= max_bytes {
        let mut buf = Vec::with_capacity(total_len as usize);
        reader.read_to_end(&mut buf)?;
        return Ok(buf);
    }

    let mut buf = vec![0u8; max_bytes as usize];
    reader.read_exact(&mut buf)?;
    buf.extend_from_slice(TRUNCATION_NOTICE);
    Ok(buf)
}
