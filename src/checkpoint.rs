//! Torn-write-safe coordinate checkpoint file, and the backward
//! tail-scanner used to reconstruct the last X/Y/Z/E seen before a given
//! file offset during crash recovery.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};

/// Size of each alternating slot. Large enough for any realistic
/// checkpoint record with generous padding; small enough that writing a
/// slot is effectively instantaneous.
const SLOT_SIZE: u64 = 4096;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("record too large to fit in a checkpoint slot")]
    RecordTooLarge,
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CheckpointRecord {
    pub file_position: u64,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub z: Option<f64>,
    #[serde(default)]
    pub e: Option<f64>,
    #[serde(default)]
    pub fan_speed: Option<String>,
}

pub struct CheckpointStore {
    path: PathBuf,
    next_slot: AtomicU8,
}

impl CheckpointStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), next_slot: AtomicU8::new(0) }
    }

    /// Writes `record` into one of the two slots, alternating on every
    /// call. A crash mid-write can only corrupt the slot being written;
    /// the other slot (and therefore `load`) is unaffected.
    pub async fn save(&self, record: &CheckpointRecord) -> Result<(), CheckpointError> {
        let json = serde_json::to_string(record)?;
        if json.len() + 1 >= SLOT_SIZE as usize {
            return Err(CheckpointError::RecordTooLarge);
        }
        let mut buf = vec![b' '; SLOT_SIZE as usize];
        buf[..json.len()].copy_from_slice(json.as_bytes());
        buf[json.len()] = b'\n';

        let slot = self.next_slot.fetch_xor(1, Ordering::SeqCst);
        let offset = slot as u64 * SLOT_SIZE;

        if let Some(parent) = self.path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.path)
            .await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(&buf).await?;
        if let Err(e) = file.sync_data().await {
            tracing::warn!("checkpoint sync_data failed (continuing): {}", e);
        }
        Ok(())
    }

    /// Reads both slots and returns whichever parses and has the larger
    /// `file_position`; `None` if neither slot parses (fresh file, or both
    /// corrupt).
    pub async fn load(&self) -> Option<CheckpointRecord> {
        let mut file = match OpenOptions::new().read(true).open(&self.path).await {
            Ok(f) => f,
            Err(_) => return None,
        };
        let slot0 = Self::read_slot(&mut file, 0).await;
        let slot1 = Self::read_slot(&mut file, SLOT_SIZE).await;
        match (slot0, slot1) {
            (Some(a), Some(b)) => Some(if a.file_position >= b.file_position { a } else { b }),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// Deletes the checkpoint file so a stale record can't be picked up by
    /// a later `load()`. Called on print completion, cancellation, and the
    /// dispatch-error path; a missing file is not an error.
    pub async fn remove(&self) -> Result<(), CheckpointError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CheckpointError::Io(e)),
        }
    }

    async fn read_slot(file: &mut tokio::fs::File, offset: u64) -> Option<CheckpointRecord> {
        if file.seek(SeekFrom::Start(offset)).await.is_err() {
            return None;
        }
        let mut buf = vec![0u8; SLOT_SIZE as usize];
        let n = file.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.truncate(n);
        let nl = buf.iter().position(|&b| b == b'\n')?;
        let text = std::str::from_utf8(&buf[..nl]).ok()?;
        serde_json::from_str(text).ok()
    }

    /// Walks `path` backward from `offset`, reconstructing the last
    /// complete X/Y/Z/E parameters seen on a `G0`/`G1`/`;` line before
    /// that offset. Runs on a blocking thread since it's pure synchronous
    /// I/O.
    pub async fn get_xyze(
        path: &Path,
        offset: u64,
    ) -> Result<(Option<f64>, Option<f64>, Option<f64>, Option<f64>), CheckpointError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || tail_scan_xyze(&path, offset))
            .await
            .map_err(|e| CheckpointError::Io(std::io::Error::other(e)))?
    }
}

const SCAN_CHUNK: usize = 4096;

fn tail_scan_xyze(
    path: &Path,
    offset: u64,
) -> Result<(Option<f64>, Option<f64>, Option<f64>, Option<f64>), CheckpointError> {
    use std::io::{Read, Seek, SeekFrom as StdSeekFrom};

    let mut file = std::fs::File::open(path)?;
    let mut pos = offset;
    // Bytes of the current (partially-read) line, in forward order, built
    // up as we walk backward chunk by chunk.
    let mut pending: Vec<u8> = Vec::new();

    let mut x = None;
    let mut y = None;
    let mut z = None;
    let mut e = None;

    while pos > 0 && (x.is_none() || y.is_none() || z.is_none() || e.is_none()) {
        let chunk_len = SCAN_CHUNK.min(pos as usize) as u64;
        let chunk_start = pos - chunk_len;
        file.seek(StdSeekFrom::Start(chunk_start))?;
        let mut chunk = vec![0u8; chunk_len as usize];
        file.read_exact(&mut chunk)?;
        pos = chunk_start;

        // Prepend this chunk to whatever partial line we were carrying.
        chunk.extend_from_slice(&pending);
        pending.clear();

        // Split on '\n', working from the end of the buffer backward.
        // The first "line" we encounter (rightmost) is a continuation of
        // whatever we were carrying from the previous (later) chunk.
        let mut lines: Vec<&[u8]> = chunk.split(|&b| b == b'\n').collect();
        // The very first slice (leftmost, index 0) may be an incomplete
        // line continuing into the previous (earlier) chunk; carry it
        // forward unless we've hit the start of the file.
        let carry = if pos > 0 { lines.remove(0) } else { &[][..] };

        for line in lines.iter().rev() {
            if x.is_some() && y.is_some() && z.is_some() && e.is_some() {
                break;
            }
            scan_line_for_xyze(line, &mut x, &mut y, &mut z, &mut e);
        }
        pending = carry.to_vec();
    }
    if !pending.is_empty() && (x.is_none() || y.is_none() || z.is_none() || e.is_none()) {
        scan_line_for_xyze(&pending, &mut x, &mut y, &mut z, &mut e);
    }

    Ok((x, y, z, e))
}

fn scan_line_for_xyze(
    raw: &[u8],
    x: &mut Option<f64>,
    y: &mut Option<f64>,
    z: &mut Option<f64>,
    e: &mut Option<f64>,
) {
    let Ok(line) = std::str::from_utf8(raw) else { return };
    let line = line.trim();
    if !(line.starts_with("G0") || line.starts_with("G1") || line.starts_with(';')) {
        return;
    }
    for part in line.split_whitespace().skip(1) {
        if part.len() < 2 {
            continue;
        }
        let (tag, rest) = part.split_at(1);
        let Ok(value) = rest.parse::<f64>() else { continue };
        match tag.to_ascii_uppercase().as_str() {
            "X" if x.is_none() => *x = Some(value),
            "Y" if y.is_none() => *y = Some(value),
            "Z" if z.is_none() => *z = Some(value),
            "E" if e.is_none() => *e = Some(value),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path().join("coord.save"));
        let rec = CheckpointRecord { file_position: 100, x: Some(1.0), y: Some(2.0), z: Some(3.0), e: Some(4.0), fan_speed: None };
        store.save(&rec).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, rec);
    }

    #[tokio::test]
    async fn load_picks_highest_file_position_across_slots() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path().join("coord.save"));
        store.save(&CheckpointRecord { file_position: 10, ..Default::default() }).await.unwrap();
        store.save(&CheckpointRecord { file_position: 20, ..Default::default() }).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.file_position, 20);
    }

    #[tokio::test]
    async fn load_on_missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path().join("nope.save"));
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn remove_clears_a_saved_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path().join("coord.save"));
        store.save(&CheckpointRecord { file_position: 10, ..Default::default() }).await.unwrap();
        assert!(store.load().await.is_some());
        store.remove().await.unwrap();
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn remove_on_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path().join("nope.save"));
        store.remove().await.unwrap();
    }

    #[tokio::test]
    async fn get_xyze_walks_backward_across_chunk_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.gcode");
        let mut body = String::new();
        body.push_str("G1 X1 Y1 Z1 E1\n");
        // pad past one scan chunk so the scanner must cross a boundary
        body.push_str(&"; padding\n".repeat(1000));
        let marker_offset_start = body.len();
        body.push_str("G1 X9.5 Y8.5 Z7.5 E6.5\n");
        let offset = body.len() as u64;
        tokio::fs::write(&path, &body).await.unwrap();

        let (x, y, z, e) = CheckpointStore::get_xyze(&path, offset).await.unwrap();
        assert_eq!(x, Some(9.5));
        assert_eq!(y, Some(8.5));
        assert_eq!(z, Some(7.5));
        assert_eq!(e, Some(6.5));
        assert!(marker_offset_start > 0);
    }
}
