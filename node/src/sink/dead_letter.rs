// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Dead Letter File for batches the store refused
//!
//! Append-only. Each batch is one frame:
//! - `[len: u32 LE][crc32: u32 LE][json array of events]`
//! - fsync after every frame
//!
//! A torn final frame (crash mid-write) is ignored on read and cut off when
//! the writer reopens the file; a failed append is rolled back to the previous
//! length. A CRC mismatch in a complete frame is reported as corruption.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crc32fast::Hasher;
use witness_core::AuditEvent;

use super::{SinkError, SinkResult};

const FRAME_HEADER_LEN: usize = 8;

pub struct DeadLetterWriter {
    path: PathBuf,
    file: Mutex<File>,
}

impl DeadLetterWriter {
    /// Open or create the dead letter file at `path`, dropping a torn tail.
    pub fn open<P: AsRef<Path>>(path: P) -> SinkResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        let (_, complete) = frames(&data)?;
        if complete < data.len() {
            tracing::warn!(
                path = %path.display(),
                torn_bytes = data.len() - complete,
                "truncating partial frame at the end of the dead letter file"
            );
            file.set_len(complete as u64)?;
            file.sync_data()?;
        }

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one batch as a single frame and fsync.
    pub fn append(&self, events: &[AuditEvent]) -> SinkResult<()> {
        let payload = serde_json::to_vec(events)?;
        let len = u32::try_from(payload.len())
            .map_err(|_| SinkError::Corrupted("batch too large for one frame".to_string()))?;

        let mut hasher = Hasher::new();
        hasher.update(&payload);
        let crc = hasher.finalize();

        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&crc.to_le_bytes());
        frame.extend_from_slice(&payload);

        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let start = file.metadata()?.len();
        if let Err(e) = write_frame(&mut file, &frame) {
            if let Err(rollback) = file.set_len(start) {
                tracing::error!(error = %rollback, "failed to roll back partial dead letter frame");
            }
            return Err(e.into());
        }
        Ok(())
    }
}

fn write_frame(file: &mut File, frame: &[u8]) -> std::io::Result<()> {
    file.write_all(frame)?;
    file.sync_data()
}

/// Read every complete batch from a dead letter file.
pub fn read_dead_letters<P: AsRef<Path>>(path: P) -> SinkResult<Vec<Vec<AuditEvent>>> {
    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;

    let (payloads, complete) = frames(&data)?;
    if complete < data.len() {
        tracing::warn!(offset = complete, "dead letter file ends with a partial frame, ignoring it");
    }
    payloads
        .into_iter()
        .map(|payload| serde_json::from_slice(payload).map_err(SinkError::from))
        .collect()
}

/// Checked payloads of every complete frame, and the length they cover.
fn frames(data: &[u8]) -> SinkResult<(Vec<&[u8]>, usize)> {
    let mut payloads = Vec::new();
    let mut offset = 0;
    while offset + FRAME_HEADER_LEN <= data.len() {
        let len = u32::from_le_bytes(read_u32(data, offset)) as usize;
        let expected = u32::from_le_bytes(read_u32(data, offset + 4));
        let start = offset + FRAME_HEADER_LEN;
        let end = start + len;
        if end > data.len() {
            break;
        }

        let payload = &data[start..end];
        let mut hasher = Hasher::new();
        hasher.update(payload);
        let found = hasher.finalize();
        if found != expected {
            return Err(SinkError::Corrupted(format!(
                "checksum mismatch at offset {}: expected {:08x}, found {:08x}",
                offset, expected, found
            )));
        }

        payloads.push(payload);
        offset = end;
    }
    Ok((payloads, offset))
}

fn read_u32(data: &[u8], at: usize) -> [u8; 4] {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[at..at + 4]);
    bytes
}
