//! The cooperative virtual-sdcard work loop: file selection, the line
//! pump, layer-change interception, periodic checkpointing and crash
//! recovery.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::sync::{Mutex, RwLock};

use crate::checkpoint::{CheckpointRecord, CheckpointStore};
use crate::dispatcher::GcodeDispatcher;
use crate::file_manager::FileManager;
use crate::print_stats::{PrintFileSidecar, PrintStats};
use crate::timelapse::{TimelapseCoordinator, ToolheadSnapshot};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("virtual sd is busy")]
    Busy,
    #[error("no gcode file has been selected")]
    NoFileSelected,
    #[error("virtual sd job is not running")]
    NotRunning,
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

const READ_BUF_SIZE: usize = 8192;
/// Checkpointing only starts once this many `G1` lines have been
/// dispatched, then fires every `CHECKPOINT_EVERY_COMMANDS`th command.
const MIN_G1_BEFORE_CHECKPOINT: u32 = 20;
const CHECKPOINT_EVERY_COMMANDS: u32 = 9;
/// The filename-save sidecar is refreshed once, the moment the 19th `G1`
/// is dispatched, and from then on every `SIDECAR_EVERY_COMMANDS`th command.
const SIDECAR_AT_G1: u32 = 19;
const SIDECAR_EVERY_COMMANDS: u32 = 29;
const DISPATCHER_RETRY: std::time::Duration = std::time::Duration::from_millis(100);
const PAUSE_SPIN: std::time::Duration = std::time::Duration::from_millis(1);
const DELAYED_RESET: std::time::Duration = std::time::Duration::from_secs(5);
/// No flow-rate (`M221`) tracking in this crate's flat g-code dispatcher;
/// filament accounting always uses a unity extrude factor.
const DEFAULT_EXTRUDE_FACTOR: f64 = 1.0;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutorStatus {
    pub file_path: Option<String>,
    pub file_position: u64,
    pub file_size: u64,
    pub progress: f64,
    pub is_active: bool,
}

struct Job {
    path: PathBuf,
    file: File,
    size: u64,
}

/// Last X/Y/Z/E/fan seen while dispatching file lines, used to populate
/// checkpoint records without querying the motion subsystem directly.
#[derive(Default, Clone)]
struct LastSeen {
    x: Option<f64>,
    y: Option<f64>,
    z: Option<f64>,
    e: Option<f64>,
    fan_speed: Option<String>,
}

struct Shared {
    running: AtomicBool,
    pause_requested: AtomicBool,
    in_dispatch: AtomicBool,
    jump_hint: AtomicU64,
    has_jump_hint: AtomicBool,
    /// Count of `G1` lines dispatched since the job started; the park
    /// excursion only runs once enough extrusion moves have happened to be
    /// worth a full retract/travel/return.
    g1_dispatched: AtomicU32,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            running: AtomicBool::new(false),
            pause_requested: AtomicBool::new(false),
            in_dispatch: AtomicBool::new(false),
            jump_hint: AtomicU64::new(0),
            has_jump_hint: AtomicBool::new(false),
            g1_dispatched: AtomicU32::new(0),
        }
    }
}

/// Cheap to clone: all mutable state lives behind `Arc`.
#[derive(Clone)]
pub struct VirtualSdExecutor {
    sd_root: PathBuf,
    total_time_path: PathBuf,
    print_file_name_path: PathBuf,
    shared: Arc<Shared>,
    job: Arc<Mutex<Option<Job>>>,
    status: Arc<RwLock<ExecutorStatus>>,
    dispatcher: GcodeDispatcher,
    print_stats: Arc<Mutex<PrintStats>>,
    checkpoint: Arc<CheckpointStore>,
    timelapse: Arc<TimelapseCoordinator>,
    file_manager: FileManager,
    last_seen: Arc<Mutex<LastSeen>>,
}

impl VirtualSdExecutor {
    pub fn new(
        sd_root: impl Into<PathBuf>,
        dispatcher: GcodeDispatcher,
        print_stats: Arc<Mutex<PrintStats>>,
        checkpoint: Arc<CheckpointStore>,
        timelapse: Arc<TimelapseCoordinator>,
    ) -> Self {
        Self::with_total_time_path(
            sd_root,
            "printer1_totaltime",
            "1_print_file_name.save",
            dispatcher,
            print_stats,
            checkpoint,
            timelapse,
        )
    }

    /// Same as `new`, but lets the caller point the persisted lifetime
    /// total-print-time counter and the filename-save sidecar at the real
    /// `config::VirtualSdConfig` paths instead of the fallbacks used by
    /// tests that don't exercise them.
    pub fn with_total_time_path(
        sd_root: impl Into<PathBuf>,
        total_time_path: impl Into<PathBuf>,
        print_file_name_path: impl Into<PathBuf>,
        dispatcher: GcodeDispatcher,
        print_stats: Arc<Mutex<PrintStats>>,
        checkpoint: Arc<CheckpointStore>,
        timelapse: Arc<TimelapseCoordinator>,
    ) -> Self {
        Self {
            sd_root: sd_root.into(),
            total_time_path: total_time_path.into(),
            print_file_name_path: print_file_name_path.into(),
            shared: Arc::new(Shared::default()),
            job: Arc::new(Mutex::new(None)),
            status: Arc::new(RwLock::new(ExecutorStatus::default())),
            dispatcher,
            print_stats,
            checkpoint,
            timelapse,
            file_manager: FileManager::new(),
            last_seen: Arc::new(Mutex::new(LastSeen::default())),
        }
    }

    /// Folds the just-finished print's duration (in whole minutes, rounded
    /// up) into the persisted lifetime total-print-time counter. Only ever
    /// raises the on-disk value, matching `LifetimeCounter`'s monotonicity
    /// invariant; a print that contributed zero minutes leaves the file
    /// untouched.
    async fn persist_lifetime_total(&self) {
        let print_duration = self.print_stats.lock().await.get_status(Instant::now()).print_duration;
        if print_duration <= 0.0 {
            return;
        }
        let minutes_added = (print_duration / 60.0).ceil();
        let current = PrintStats::get_last_total_print_time(&self.total_time_path).await;
        let candidate = current + minutes_added;
        if let Err(e) = PrintStats::set_total_print_time(&self.total_time_path, current, candidate).await {
            tracing::warn!("failed to persist lifetime total print time: {}", e);
        }
    }

    /// Clears both the coordinate checkpoint and its filename-save sidecar.
    /// Called everywhere a print stops being resumable (completion,
    /// cancellation, reset, and a fatal dispatch error) so a later,
    /// unrelated print never inherits a stale crash-recovery record.
    async fn clear_recovery_state(&self) {
        if let Err(e) = self.checkpoint.remove().await {
            tracing::warn!("checkpoint remove failed: {}", e);
        }
        if let Err(e) = PrintStats::remove_sidecar(&self.print_file_name_path).await {
            tracing::warn!("print-file sidecar remove failed: {}", e);
        }
    }

    /// Resolves `filename` against the SD root, case-sensitive first and
    /// falling back to a case-insensitive scan (mirrors M23's historical
    /// leniency).
    async fn resolve(&self, filename: &str) -> Result<PathBuf, ExecutorError> {
        let direct = self.sd_root.join(filename);
        if tokio::fs::metadata(&direct).await.is_ok() {
            return Ok(direct);
        }
        let entries = self
            .file_manager
            .list_files(self.sd_root.to_string_lossy().as_ref())
            .await
            .map_err(|e| ExecutorError::Io(std::io::Error::other(e.to_string())))?;
        for entry in entries {
            if !entry.is_directory && entry.name.eq_ignore_ascii_case(filename) {
                return Ok(self.sd_root.join(entry.name));
            }
        }
        Err(ExecutorError::FileNotFound(filename.to_string()))
    }

    pub async fn load(&self, filename: &str) -> Result<(), ExecutorError> {
        if self.shared.running.load(Ordering::SeqCst) {
            return Err(ExecutorError::Busy);
        }
        let path = self.resolve(filename).await?;
        let file = File::open(&path).await?;
        let size = file.metadata().await?.len();
        {
            let mut job = self.job.lock().await;
            *job = Some(Job { path: path.clone(), file, size });
        }
        self.shared.has_jump_hint.store(false, Ordering::SeqCst);
        {
            let mut status = self.status.write().await;
            status.file_path = Some(path.to_string_lossy().to_string());
            status.file_position = 0;
            status.file_size = size;
            status.progress = 0.0;
            status.is_active = false;
        }
        self.print_stats
            .lock()
            .await
            .set_current_file(Some(path.to_string_lossy().to_string()), true);
        tracing::info!("virtual sd loaded {}", path.display());
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), ExecutorError> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(ExecutorError::Busy);
        }
        if self.job.lock().await.is_none() {
            self.shared.running.store(false, Ordering::SeqCst);
            return Err(ExecutorError::NoFileSelected);
        }
        self.shared.pause_requested.store(false, Ordering::SeqCst);
        {
            let mut status = self.status.write().await;
            status.is_active = true;
        }
        let exec = self.clone();
        tokio::spawn(async move {
            exec.pump_loop().await;
        });
        Ok(())
    }

    /// Sets the pause request flag, then waits for either the loop to
    /// park or, if a line dispatch is already in flight, returns without
    /// waiting for it to finish (the loop parks right after).
    pub async fn pause(&self) -> Result<(), ExecutorError> {
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(ExecutorError::NotRunning);
        }
        self.shared.pause_requested.store(true, Ordering::SeqCst);
        loop {
            if !self.shared.running.load(Ordering::SeqCst) {
                break;
            }
            if self.shared.in_dispatch.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(PAUSE_SPIN).await;
        }
        Ok(())
    }

    /// A clone of the shared print-stats handle, for status endpoints and
    /// the command router that don't otherwise have a reference to it.
    pub fn print_stats_handle(&self) -> Arc<Mutex<PrintStats>> {
        self.print_stats.clone()
    }

    /// Whether a file-sourced line is currently mid-dispatch. Used to guard
    /// `SDCARD_RESET_FILE`, which the original system refuses while
    /// sourced from the file itself.
    pub fn is_in_dispatch(&self) -> bool {
        self.shared.in_dispatch.load(Ordering::SeqCst)
    }

    /// `SDCARD_RESET_FILE` — tears down the current job like `cancel`, but
    /// without notifying Print Stats of a cancellation (the job selection
    /// is simply being cleared, not an in-progress print being abandoned).
    pub async fn reset(&self) -> Result<(), ExecutorError> {
        self.shared.pause_requested.store(false, Ordering::SeqCst);
        self.shared.running.store(false, Ordering::SeqCst);
        {
            let mut job = self.job.lock().await;
            *job = None;
        }
        {
            let mut status = self.status.write().await;
            *status = ExecutorStatus::default();
        }
        self.clear_recovery_state().await;
        Ok(())
    }

    pub async fn cancel(&self) -> Result<(), ExecutorError> {
        self.shared.pause_requested.store(false, Ordering::SeqCst);
        self.shared.running.store(false, Ordering::SeqCst);
        {
            let mut job = self.job.lock().await;
            *job = None;
        }
        {
            let mut status = self.status.write().await;
            *status = ExecutorStatus::default();
        }
        self.print_stats.lock().await.note_cancel(Instant::now());
        self.clear_recovery_state().await;
        Ok(())
    }

    pub async fn set_file_position(&self, offset: u64) {
        self.shared.jump_hint.store(offset, Ordering::SeqCst);
        self.shared.has_jump_hint.store(true, Ordering::SeqCst);
    }

    pub async fn get_file_position(&self) -> u64 {
        self.status.read().await.file_position
    }

    pub async fn status(&self) -> ExecutorStatus {
        self.status.read().await.clone()
    }

    async fn pump_loop(&self) {
        tracing::info!("virtual sd pump loop starting");
        let recovered = PrintStats::load_sidecar(&self.print_file_name_path).await;
        self.print_stats.lock().await.note_start(Instant::now(), recovered.as_ref());
        let mut buf = vec![0u8; READ_BUF_SIZE];
        let mut carry: Vec<u8> = Vec::new();
        let mut total_dispatched: u32 = 0;

        'outer: loop {
            if self.shared.has_jump_hint.swap(false, Ordering::SeqCst) {
                let offset = self.shared.jump_hint.load(Ordering::SeqCst);
                let mut job = self.job.lock().await;
                if let Some(job) = job.as_mut() {
                    if job.file.seek(SeekFrom::Start(offset)).await.is_ok() {
                        let mut status = self.status.write().await;
                        status.file_position = offset;
                    }
                }
            }

            let n = {
                let mut job_guard = self.job.lock().await;
                let Some(job) = job_guard.as_mut() else { break 'outer };
                match job.file.read(&mut buf).await {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::error!("virtual sd read error: {}", e);
                        self.print_stats.lock().await.note_error(Instant::now(), e.to_string());
                        break 'outer;
                    }
                }
            };

            if n == 0 && carry.is_empty() {
                self.on_complete().await;
                break 'outer;
            }

            let mut chunk = carry.clone();
            chunk.extend_from_slice(&buf[..n]);
            carry.clear();

            let ends_with_newline = chunk.last() == Some(&b'\n');
            let mut segments: Vec<Vec<u8>> = chunk.split(|&b| b == b'\n').map(|s| s.to_vec()).collect();
            if !ends_with_newline {
                if let Some(last) = segments.pop() {
                    carry = last;
                }
            } else {
                segments.pop(); // trailing empty segment after the final newline
            }
            if n == 0 && !carry.is_empty() {
                // EOF with an unterminated trailing line: treat it as complete.
                segments.push(std::mem::take(&mut carry));
            }

            for raw_line in segments {
                let Ok(line) = String::from_utf8(raw_line) else { continue };
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }

                if self.timelapse.is_layer_marker(&line) {
                    let toolhead = self.toolhead_snapshot().await;
                    let g1_dispatched = self.shared.g1_dispatched.load(Ordering::SeqCst);
                    self.timelapse.on_layer_change(&self.dispatcher, toolhead, g1_dispatched).await;
                    self.save_checkpoint().await;
                }

                self.update_last_seen(&line).await;

                let upper_prefix: String = line.chars().take(2).collect::<String>().to_uppercase();
                let is_g1 = upper_prefix == "G1";

                loop {
                    match self.dispatcher.try_lock() {
                        Ok(mut guard) => {
                            self.shared.in_dispatch.store(true, Ordering::SeqCst);
                            if let Err(e) = guard.process_command(&line).await {
                                self.shared.in_dispatch.store(false, Ordering::SeqCst);
                                tracing::error!("virtual sd dispatch error on '{}': {}", line, e);
                                self.print_stats.lock().await.note_error(Instant::now(), e.to_string());
                                self.shared.running.store(false, Ordering::SeqCst);
                                self.clear_recovery_state().await;
                                return;
                            }
                            self.shared.in_dispatch.store(false, Ordering::SeqCst);
                            break;
                        }
                        Err(_) => {
                            tokio::time::sleep(DISPATCHER_RETRY).await;
                            continue;
                        }
                    }
                }

                if is_g1 {
                    self.shared.g1_dispatched.fetch_add(1, Ordering::SeqCst);
                    if let Some(e) = parse_param(&line, 'E') {
                        self.print_stats.lock().await.update_filament_usage(e, DEFAULT_EXTRUDE_FACTOR);
                    }
                }

                total_dispatched += 1;
                let g1_count = self.shared.g1_dispatched.load(Ordering::SeqCst);
                if g1_count >= MIN_G1_BEFORE_CHECKPOINT && total_dispatched % CHECKPOINT_EVERY_COMMANDS == 0 {
                    self.save_checkpoint().await;
                }
                if g1_count == SIDECAR_AT_G1 || total_dispatched % SIDECAR_EVERY_COMMANDS == 0 {
                    self.refresh_sidecar().await;
                }

                if self.shared.pause_requested.swap(false, Ordering::SeqCst) {
                    self.shared.running.store(false, Ordering::SeqCst);
                    {
                        let mut status = self.status.write().await;
                        status.is_active = false;
                    }
                    self.print_stats.lock().await.note_pause(Instant::now());
                    tracing::info!("virtual sd paused");
                    return;
                }
            }

            // update file_position/progress snapshot after each read
            {
                let job_guard = self.job.lock().await;
                if let Some(job) = job_guard.as_ref() {
                    let pos = match job.file.stream_position().await {
                        Ok(p) => p,
                        Err(_) => 0,
                    };
                    drop(job_guard);
                    let mut status = self.status.write().await;
                    status.file_position = pos;
                    status.file_size = status.file_size.max(pos);
                    if status.file_size > 0 {
                        status.progress = pos as f64 / status.file_size as f64;
                    }
                }
            }

            tokio::task::yield_now().await;
        }
    }

    async fn update_last_seen(&self, line: &str) {
        let trimmed = line.trim();
        let upper4: String = trimmed.chars().take(4).collect::<String>().to_uppercase();
        if upper4.starts_with("M106") {
            self.last_seen.lock().await.fan_speed = Some(trimmed.to_string());
            return;
        }
        let upper3: String = trimmed.chars().take(3).collect::<String>().to_uppercase();
        if !(upper3.starts_with("G0") || upper3.starts_with("G1") || upper3.starts_with("G92")) {
            return;
        }
        let mut seen = self.last_seen.lock().await;
        for part in trimmed.split_whitespace().skip(1) {
            if part.len() < 2 {
                continue;
            }
            let (tag, rest) = part.split_at(1);
            let Ok(value) = rest.parse::<f64>() else { continue };
            match tag.to_ascii_uppercase().as_str() {
                "X" => seen.x = Some(value),
                "Y" => seen.y = Some(value),
                "Z" => seen.z = Some(value),
                "E" => seen.e = Some(value),
                _ => {}
            }
        }
    }

    /// The toolhead position/extruder the pump loop has observed so far,
    /// handed to the time-lapse park excursion without querying the motion
    /// subsystem directly.
    async fn toolhead_snapshot(&self) -> ToolheadSnapshot {
        let seen = self.last_seen.lock().await;
        ToolheadSnapshot {
            x: seen.x.unwrap_or(0.0),
            y: seen.y.unwrap_or(0.0),
            z: seen.z.unwrap_or(0.0),
            e: seen.e.unwrap_or(0.0),
        }
    }

    /// Refreshes the `print_file_name.save` sidecar with the current
    /// filename/fan/filament/duration snapshot (spec step 7: "refresh the
    /// filename-save file with current fan/filament/duration").
    async fn refresh_sidecar(&self) {
        let fan_speed = self.last_seen.lock().await.fan_speed.clone();
        let filename = self.status.read().await.file_path.clone();
        let status = self.print_stats.lock().await.get_status(Instant::now());
        let sidecar = PrintFileSidecar {
            filename,
            fan_speed,
            filament_used: status.filament_used,
            last_print_duration: status.print_duration,
        };
        if let Err(e) = PrintStats::save_sidecar(&self.print_file_name_path, &sidecar).await {
            tracing::warn!("print-file sidecar save failed: {}", e);
        }
    }

    async fn save_checkpoint(&self) {
        let seen = self.last_seen.lock().await.clone();
        let file_position = self.status.read().await.file_position;
        let record = CheckpointRecord {
            file_position,
            x: seen.x,
            y: seen.y,
            z: seen.z,
            e: seen.e,
            fan_speed: seen.fan_speed,
        };
        if let Err(e) = self.checkpoint.save(&record).await {
            tracing::warn!("checkpoint save failed: {}", e);
        }
    }

    async fn on_complete(&self) {
        tracing::info!("virtual sd print complete");
        self.print_stats.lock().await.note_complete(Instant::now());
        self.persist_lifetime_total().await;
        self.clear_recovery_state().await;
        self.shared.running.store(false, Ordering::SeqCst);
        {
            let mut status = self.status.write().await;
            status.is_active = false;
            status.progress = 1.0;
        }
        let job_name = self.status.read().await.file_path.clone().unwrap_or_default();
        let timelapse = self.timelapse.clone();
        // REDESIGN: scheduled as a tokio timer task, not a dedicated OS
        // thread, per the redesign note in SPEC_FULL.md.
        tokio::spawn(async move {
            tokio::time::sleep(DELAYED_RESET).await;
            timelapse.on_print_complete(&job_name).await;
        });
    }

    /// Crash recovery: if a checkpoint exists, re-derive the last X/Y/Z/E
    /// and re-scan the same byte range for temperature commands, then
    /// leave the job positioned at the checkpointed offset without
    /// auto-resuming.
    pub async fn recover_from_checkpoint(&self, dispatcher: &GcodeDispatcher) -> Result<bool, ExecutorError> {
        let Some(record) = self.checkpoint.load().await else { return Ok(false) };
        let job_path = {
            let job = self.job.lock().await;
            job.as_ref().map(|j| j.path.clone())
        };
        let Some(path) = job_path else { return Ok(false) };

        let (x, y, z, e) = crate::checkpoint::CheckpointStore::get_xyze(&path, record.file_position)
            .await
            .map_err(|e| ExecutorError::Io(std::io::Error::other(e.to_string())))?;
        let (x, y, z, e) = (
            record.x.or(x).unwrap_or(0.0),
            record.y.or(y).unwrap_or(0.0),
            record.z.or(z).unwrap_or(0.0),
            record.e.or(e).unwrap_or(0.0),
        );
        let set_position = format!("G92 X{x} Y{y} Z{z} E{e}");
        let temps = self.rescan_temperatures(&path, record.file_position).await;
        let mut script = vec![set_position];
        script.extend(temps);
        if let Err(err) = dispatcher.run_script(&script).await {
            tracing::warn!("crash recovery script failed: {}", err);
        }
        self.set_file_position(record.file_position).await;
        {
            let mut status = self.status.write().await;
            status.file_position = record.file_position;
        }
        tracing::info!("virtual sd recovered checkpoint at offset {}", record.file_position);
        Ok(true)
    }

    async fn rescan_temperatures(&self, path: &Path, offset: u64) -> Vec<String> {
        // Reuses the same backward byte-walk technique as get_xyze but
        // looks for heater commands instead of motion parameters.
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || scan_temperature_commands(&path, offset))
            .await
            .unwrap_or_default()
    }
}

/// Pulls the value of a single letter parameter (e.g. `E` out of `G1 X1 E2.5`)
/// out of a raw g-code line, ignoring the command word itself.
fn parse_param(line: &str, tag: char) -> Option<f64> {
    line.trim().split_whitespace().skip(1).find_map(|part| {
        if part.len() < 2 {
            return None;
        }
        let (t, rest) = part.split_at(1);
        if t.chars().next()?.to_ascii_uppercase() != tag.to_ascii_uppercase() {
            return None;
        }
        rest.parse::<f64>().ok()
    })
}

fn scan_temperature_commands(path: &Path, offset: u64) -> Vec<String> {
    use std::io::{Read, Seek, SeekFrom as StdSeekFrom};
    let Ok(mut file) = std::fs::File::open(path) else { return Vec::new() };
    let mut pos = offset;
    let mut hotend = None;
    let mut bed = None;
    let mut pending: Vec<u8> = Vec::new();
    const CHUNK: usize = 4096;
    while pos > 0 && (hotend.is_none() || bed.is_none()) {
        let len = CHUNK.min(pos as usize) as u64;
        let start = pos - len;
        if file.seek(StdSeekFrom::Start(start)).is_err() {
            break;
        }
        let mut buf = vec![0u8; len as usize];
        if file.read_exact(&mut buf).is_err() {
            break;
        }
        pos = start;
        buf.extend_from_slice(&pending);
        pending.clear();
        let mut lines: Vec<&[u8]> = buf.split(|&b| b == b'\n').collect();
        let carry = if pos > 0 { lines.remove(0) } else { &[][..] };
        for line in lines.iter().rev() {
            let Ok(text) = std::str::from_utf8(line) else { continue };
            let text = text.trim();
            if hotend.is_none() && (text.starts_with("M104") || text.starts_with("M109")) {
                hotend = Some(text.to_string());
            } else if bed.is_none() && (text.starts_with("M140") || text.starts_with("M190")) {
                bed = Some(text.to_string());
            }
        }
        pending = carry.to_vec();
    }
    [hotend, bed].into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::gcode::GCodeProcessor;
    use crate::hardware::HardwareManager;
    use crate::motion::MotionController;
    use crate::printer::PrinterState;
    use tokio::sync::RwLock as TokioRwLock;

    async fn make_executor(dir: &std::path::Path) -> VirtualSdExecutor {
        let state = Arc::new(TokioRwLock::new(PrinterState::default()));
        let config = Config::default();
        let hw = HardwareManager::new(config.clone());
        let motion = Arc::new(TokioRwLock::new(MotionController::new(state.clone(), hw, &config)));
        let processor = GCodeProcessor::new(state, motion);
        let dispatcher = GcodeDispatcher::new(processor);
        let stats = Arc::new(Mutex::new(PrintStats::new()));
        let checkpoint = Arc::new(CheckpointStore::open(dir.join("coord.save")));
        let timelapse = Arc::new(TimelapseCoordinator::disabled());
        VirtualSdExecutor::with_total_time_path(
            dir,
            dir.join("totaltime"),
            dir.join("print_file_name.save"),
            dispatcher,
            stats,
            checkpoint,
            timelapse,
        )
    }

    #[tokio::test]
    async fn load_then_resume_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("job.gcode"), "G1 X1 Y1\nG1 X2 Y2\n").await.unwrap();
        let exec = make_executor(dir.path()).await;
        exec.load("job.gcode").await.unwrap();
        exec.resume().await.unwrap();
        for _ in 0..200 {
            if !exec.status().await.is_active {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let status = exec.status().await;
        assert!(!status.is_active);
        assert!(status.progress >= 0.99);
        assert!(!dir.path().join("coord.save").exists());
    }

    #[tokio::test]
    async fn completion_persists_lifetime_total_print_time() {
        let dir = tempfile::tempdir().unwrap();
        // A handful of dwell commands so the print has nonzero measurable duration.
        let body = "G4 P50\n".repeat(5);
        tokio::fs::write(dir.path().join("job.gcode"), &body).await.unwrap();
        let exec = make_executor(dir.path()).await;
        exec.load("job.gcode").await.unwrap();
        exec.resume().await.unwrap();
        for _ in 0..400 {
            if !exec.status().await.is_active {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(!exec.status().await.is_active);
        let persisted = PrintStats::get_last_total_print_time(&dir.path().join("totaltime")).await;
        assert!(persisted >= 1.0, "expected at least one minute credited, got {persisted}");
    }

    #[tokio::test]
    async fn resume_without_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let exec = make_executor(dir.path()).await;
        assert!(matches!(exec.resume().await, Err(ExecutorError::NoFileSelected)));
    }

    #[tokio::test]
    async fn second_load_while_running_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("job.gcode"), "G4 P1000\nG1 X1\n".repeat(50)).await.unwrap();
        let exec = make_executor(dir.path()).await;
        exec.load("job.gcode").await.unwrap();
        exec.resume().await.unwrap();
        assert!(matches!(exec.load("job.gcode").await, Err(ExecutorError::Busy)));
        let _ = exec.cancel().await;
    }

    #[tokio::test]
    async fn pause_after_first_line_parks_job() {
        let dir = tempfile::tempdir().unwrap();
        let body = "G1 X1 Y1\n".repeat(5000);
        tokio::fs::write(dir.path().join("job.gcode"), &body).await.unwrap();
        let exec = make_executor(dir.path()).await;
        exec.load("job.gcode").await.unwrap();
        exec.resume().await.unwrap();
        exec.pause().await.unwrap();
        let status = exec.status().await;
        assert!(!status.is_active);
    }

    #[tokio::test]
    async fn checkpoint_and_sidecar_appear_after_twenty_g1_lines() {
        let dir = tempfile::tempdir().unwrap();
        // 30 G1 lines, each followed by a short dwell so the pump loop is
        // guaranteed to still be mid-file by the time we poll for the
        // checkpoint that should appear once the 20th G1 has dispatched.
        let body = "G1 X1 Y1 E1\nG4 P20\n".repeat(30);
        tokio::fs::write(dir.path().join("job.gcode"), &body).await.unwrap();
        let exec = make_executor(dir.path()).await;
        exec.load("job.gcode").await.unwrap();
        exec.resume().await.unwrap();

        let checkpoint_path = dir.path().join("coord.save");
        let sidecar_path = dir.path().join("print_file_name.save");
        let mut saw_checkpoint = false;
        let mut saw_sidecar = false;
        for _ in 0..400 {
            if checkpoint_path.exists() {
                saw_checkpoint = true;
            }
            if sidecar_path.exists() {
                saw_sidecar = true;
            }
            if !exec.status().await.is_active {
                break;
            }
            if saw_checkpoint && saw_sidecar {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(saw_checkpoint, "expected a checkpoint file after 20 G1 dispatches");
        assert!(saw_sidecar, "expected a filename-save sidecar after the 19th G1 dispatch");
        let _ = exec.cancel().await;
    }
}
