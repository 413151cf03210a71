// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Framed hot-stream content files.
//!
//! A hot stream is an append-only capture (sensor feed, transcript ticks)
//! sealed into a shard alongside ordinary sources. The format is a fixed
//! 8-byte magic followed by length-prefixed frames:
//!
//! ```text
//! magic  "AXMSTRM1"
//! frame  seq: u32 LE | len: u32 LE | payload[len] | crc32: u32 LE
//! ```
//!
//! The checksum covers `seq || len || payload`. Frames are numbered from
//! zero without gaps; a gap, checksum mismatch, short read, or bad magic is
//! a buffer discontinuity.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use crate::error::{CoreError, CoreResult, ErrorCode, VerifyIssue};

pub const STREAM_MAGIC: &[u8; 8] = b"AXMSTRM1";

/// Per-frame payload cap. Anything larger is treated as corruption rather
/// than a legitimate frame.
pub const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

fn frame_checksum(seq: u32, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&seq.to_le_bytes());
    hasher.update(&(payload.len() as u32).to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// Write a hot-stream file from ordered payloads.
pub fn write_stream<'a>(
    path: &Path,
    payloads: impl IntoIterator<Item = &'a [u8]>,
) -> CoreResult<()> {
    let mut file = File::create(path).map_err(|e| CoreError::io(path, e))?;
    file.write_all(STREAM_MAGIC).map_err(|e| CoreError::io(path, e))?;
    for (seq, payload) in payloads.into_iter().enumerate() {
        let seq = u32::try_from(seq)
            .map_err(|_| CoreError::LimitExceeded("hot-stream frame count overflow".into()))?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::LimitExceeded("hot-stream frame too large".into()))?;
        if len > MAX_FRAME_BYTES {
            return Err(CoreError::LimitExceeded("hot-stream frame too large".into()));
        }
        file.write_all(&seq.to_le_bytes()).map_err(|e| CoreError::io(path, e))?;
        file.write_all(&len.to_le_bytes()).map_err(|e| CoreError::io(path, e))?;
        file.write_all(payload).map_err(|e| CoreError::io(path, e))?;
        file.write_all(&frame_checksum(seq, payload).to_le_bytes())
            .map_err(|e| CoreError::io(path, e))?;
    }
    Ok(())
}

fn discontinuity(rel: &str, frame: impl std::fmt::Display, message: String) -> VerifyIssue {
    VerifyIssue::new(
        ErrorCode::BufferDiscontinuity,
        format!("{rel}:frame={frame}"),
        message,
    )
}

fn read_fully(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
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

/// Validate one hot-stream file. Returns the single defect found, if any;
/// once the frame sequence is broken nothing after the break can be
/// trusted, so scanning stops at the first discontinuity.
pub fn validate_stream(path: &Path, rel: &str) -> Option<VerifyIssue> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => return Some(discontinuity(rel, "-", format!("stream unreadable: {e}"))),
    };
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 8];
    match reader.read_exact(&mut magic) {
        Ok(()) if &magic == STREAM_MAGIC => {}
        Ok(()) => {
            return Some(discontinuity(rel, "-", "bad stream magic".to_string()));
        }
        Err(e) => {
            return Some(discontinuity(rel, "-", format!("truncated stream header: {e}")));
        }
    }

    let mut expected_seq: u32 = 0;
    loop {
        let mut header = [0u8; 8];
        match read_fully(&mut reader, &mut header) {
            // Clean end of stream: the previous frame was the last one.
            Ok(0) => return None,
            Ok(n) if n == header.len() => {}
            Ok(n) => {
                return Some(discontinuity(
                    rel,
                    expected_seq,
                    format!("truncated frame header: {n} of {} bytes", header.len()),
                ));
            }
            Err(e) => {
                return Some(discontinuity(
                    rel,
                    expected_seq,
                    format!("truncated frame header: {e}"),
                ));
            }
        }
        let seq = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if seq != expected_seq {
            return Some(discontinuity(
                rel,
                expected_seq,
                format!("sequence gap: expected frame {expected_seq}, found {seq}"),
            ));
        }
        if len > MAX_FRAME_BYTES {
            return Some(discontinuity(
                rel,
                seq,
                format!("frame length {len} exceeds cap {MAX_FRAME_BYTES}"),
            ));
        }

        let mut payload = vec![0u8; len as usize];
        if let Err(e) = reader.read_exact(&mut payload) {
            return Some(discontinuity(rel, seq, format!("truncated payload: {e}")));
        }
        let mut crc_bytes = [0u8; 4];
        if let Err(e) = reader.read_exact(&mut crc_bytes) {
            return Some(discontinuity(rel, seq, format!("truncated checksum: {e}")));
        }
        let crc = u32::from_le_bytes(crc_bytes);
        if crc != frame_checksum(seq, &payload) {
            return Some(discontinuity(rel, seq, "frame checksum mismatch".to_string()));
        }

        expected_seq = match expected_seq.checked_add(1) {
            Some(n) => n,
            None => return Some(discontinuity(rel, seq, "frame counter overflow".to_string())),
        };
    }
}
