//! Pause-aware print duration and filament accounting, plus a persisted
//! monotone lifetime total-print-time counter per printer index.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrintStatsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid lifetime counter value in {0}")]
    InvalidLifetimeValue(PathBuf),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Companion sidecar to the checkpoint file: filename, fan command,
/// filament_used, last_print_duration. Read back by `note_start` to resume
/// the duration baseline and filament tally across a crash, and removed
/// whenever the checkpoint itself is removed so a later, unrelated print
/// never inherits a stale print's figures.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrintFileSidecar {
    pub filename: Option<String>,
    pub fan_speed: Option<String>,
    pub filament_used: f64,
    pub last_print_duration: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PrintState {
    Standby,
    Printing,
    Paused,
    Complete,
    Cancelled,
    Error,
}

impl PrintState {
    fn is_terminal(self) -> bool {
        matches!(self, PrintState::Complete | PrintState::Cancelled | PrintState::Error)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PrintStatsStatus {
    pub state: PrintState,
    pub filename: Option<String>,
    pub print_duration: f64,
    pub total_duration: f64,
    pub filament_used: f64,
    pub message: Option<String>,
}

pub struct PrintStats {
    filename: Option<String>,
    state: PrintState,
    print_start: Option<Instant>,
    last_pause: Option<Instant>,
    pause_duration: f64,
    filament_used: f64,
    total_duration: f64,
    init_duration: f64,
    message: Option<String>,
    last_known_e: f64,
}

impl Default for PrintStats {
    fn default() -> Self {
        Self {
            filename: None,
            state: PrintState::Standby,
            print_start: None,
            last_pause: None,
            pause_duration: 0.0,
            filament_used: 0.0,
            total_duration: 0.0,
            init_duration: 0.0,
            message: None,
            last_known_e: 0.0,
        }
    }
}

impl PrintStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_current_file(&mut self, filename: Option<String>, reset_total: bool) {
        self.filename = filename;
        if reset_total {
            self.pause_duration = 0.0;
            self.filament_used = 0.0;
            self.last_known_e = 0.0;
        }
    }

    /// Enters the printing state. Crash-recovery safe: re-entering
    /// `Printing` without an intervening pause/cancel leaves `print_start`
    /// untouched so the duration baseline doesn't jump.
    ///
    /// `recovered`, when given, is the parsed `print_file_name.save`
    /// sidecar for the job being started: `filament_used` is restored and
    /// `print_start` is backdated by `last_print_duration` so the duration
    /// baseline survives a process restart mid-print. Only takes effect on
    /// a genuinely fresh start (`print_start.is_none()`); a plain
    /// resume-after-pause within the same run ignores it.
    pub fn note_start(&mut self, now: Instant, recovered: Option<&PrintFileSidecar>) {
        if self.state == PrintState::Printing {
            return;
        }
        if self.state == PrintState::Paused {
            if let Some(paused_at) = self.last_pause.take() {
                self.pause_duration += now.duration_since(paused_at).as_secs_f64();
            }
        }
        self.state = PrintState::Printing;
        if self.print_start.is_none() {
            match recovered {
                Some(info) => {
                    self.filament_used = info.filament_used;
                    self.print_start = Some(
                        now.checked_sub(Duration::from_secs_f64(info.last_print_duration.max(0.0)))
                            .unwrap_or(now),
                    );
                }
                None => self.print_start = Some(now),
            }
        }
    }

    /// Refuses to downgrade an `Error` state; idempotent if already paused.
    pub fn note_pause(&mut self, now: Instant) {
        if self.state == PrintState::Error {
            return;
        }
        if self.state == PrintState::Paused {
            return;
        }
        self.last_pause = Some(now);
        self.state = PrintState::Paused;
    }

    pub fn note_complete(&mut self, now: Instant) {
        self.finish(now, PrintState::Complete);
    }

    pub fn note_error(&mut self, now: Instant, message: String) {
        self.message = Some(message);
        self.finish(now, PrintState::Error);
    }

    pub fn note_cancel(&mut self, now: Instant) {
        self.finish(now, PrintState::Cancelled);
    }

    fn finish(&mut self, now: Instant, state: PrintState) {
        if self.state.is_terminal() {
            return;
        }
        self.total_duration = self.live_print_duration(now);
        if self.filament_used.abs() < f64::EPSILON {
            self.init_duration = self.total_duration;
        }
        self.state = state;
    }

    pub fn update_filament_usage(&mut self, e_position: f64, extrude_factor: f64) {
        let delta = e_position - self.last_known_e;
        if delta > 0.0 {
            self.filament_used += delta * extrude_factor;
        }
        self.last_known_e = e_position;
    }

    fn live_print_duration(&self, now: Instant) -> f64 {
        let Some(start) = self.print_start else { return 0.0 };
        let mut elapsed = now.duration_since(start).as_secs_f64() - self.pause_duration;
        if self.state == PrintState::Paused {
            if let Some(paused_at) = self.last_pause {
                elapsed -= now.duration_since(paused_at).as_secs_f64();
            }
        }
        elapsed.max(0.0)
    }

    pub fn get_status(&self, now: Instant) -> PrintStatsStatus {
        let print_duration = if self.state.is_terminal() {
            self.total_duration
        } else {
            self.live_print_duration(now)
        };
        PrintStatsStatus {
            state: self.state,
            filename: self.filename.clone(),
            print_duration,
            total_duration: self.total_duration,
            filament_used: self.filament_used,
            message: self.message.clone(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub async fn get_last_total_print_time(path: &Path) -> f64 {
        match tokio::fs::read_to_string(path).await {
            Ok(s) => s.trim().parse::<f64>().unwrap_or(0.0),
            Err(_) => 0.0,
        }
    }

    /// Only ever raises the persisted value; `current_high_water` is the
    /// caller's in-memory high-water mark, not a fresh read of the file.
    pub async fn set_total_print_time(
        path: &Path,
        current_high_water: f64,
        candidate_minutes: f64,
    ) -> Result<f64, PrintStatsError> {
        if candidate_minutes <= current_high_water {
            return Ok(current_high_water);
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, format!("{:.4}", candidate_minutes)).await?;
        Ok(candidate_minutes)
    }

    /// Reads the `print_file_name.save` sidecar. A missing or unparseable
    /// file is not an error — it just means there's nothing to recover.
    pub async fn load_sidecar(path: &Path) -> Option<PrintFileSidecar> {
        let text = tokio::fs::read_to_string(path).await.ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Overwrites the `print_file_name.save` sidecar with the current
    /// filename/fan/filament/duration snapshot. Unlike the checkpoint
    /// file, this isn't torn-write-safe — it's refreshed far less often and
    /// a lost update just means recovery falls back to an earlier snapshot.
    pub async fn save_sidecar(path: &Path, sidecar: &PrintFileSidecar) -> Result<(), PrintStatsError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string(sidecar)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// Deletes the sidecar file; a missing file is not an error. Called
    /// wherever the checkpoint file is also removed, so a later unrelated
    /// print never reads a stale prior print's figures.
    pub async fn remove_sidecar(path: &Path) -> Result<(), PrintStatsError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PrintStatsError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_then_resume_accumulates_pause_duration() {
        let mut stats = PrintStats::new();
        let t0 = Instant::now();
        stats.note_start(t0, None);
        let t1 = t0 + Duration::from_secs(10);
        stats.note_pause(t1);
        let t2 = t1 + Duration::from_secs(5);
        stats.note_start(t2, None);
        let t3 = t2 + Duration::from_secs(10);
        let status = stats.get_status(t3);
        // 10s printing + 10s printing = 20s, minus the 5s paused in between.
        assert!((status.print_duration - 20.0).abs() < 0.01);
    }

    #[test]
    fn error_state_is_sticky_against_pause() {
        let mut stats = PrintStats::new();
        let t0 = Instant::now();
        stats.note_start(t0, None);
        stats.note_error(t0 + Duration::from_secs(1), "jam".to_string());
        stats.note_pause(t0 + Duration::from_secs(2));
        assert_eq!(stats.get_status(t0 + Duration::from_secs(3)).state as u8, PrintState::Error as u8);
    }

    #[test]
    fn filament_usage_only_accumulates_forward() {
        let mut stats = PrintStats::new();
        stats.update_filament_usage(10.0, 1.0);
        stats.update_filament_usage(15.0, 1.0);
        stats.update_filament_usage(12.0, 1.0); // retraction, should not subtract
        assert_eq!(stats.filament_used, 5.0);
    }

    #[tokio::test]
    async fn lifetime_counter_never_decreases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("printer1_totaltime");
        let hw = PrintStats::set_total_print_time(&path, 0.0, 100.0).await.unwrap();
        assert_eq!(hw, 100.0);
        let hw2 = PrintStats::set_total_print_time(&path, hw, 50.0).await.unwrap();
        assert_eq!(hw2, 100.0);
        let on_disk = PrintStats::get_last_total_print_time(&path).await;
        assert_eq!(on_disk, 100.0);
    }

    #[test]
    fn note_start_with_recovered_sidecar_backdates_print_start() {
        let mut stats = PrintStats::new();
        let t0 = Instant::now();
        let recovered = PrintFileSidecar {
            filename: Some("job.gcode".to_string()),
            fan_speed: None,
            filament_used: 12.5,
            last_print_duration: 30.0,
        };
        stats.note_start(t0, Some(&recovered));
        assert_eq!(stats.filament_used, 12.5);
        // print_duration should already read ~30s even though note_start
        // was just called "now".
        let status = stats.get_status(t0);
        assert!((status.print_duration - 30.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn sidecar_round_trips_and_removal_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1_print_file_name.save");
        let sidecar = PrintFileSidecar {
            filename: Some("job.gcode".to_string()),
            fan_speed: Some("M106 S255".to_string()),
            filament_used: 4.2,
            last_print_duration: 90.0,
        };
        PrintStats::save_sidecar(&path, &sidecar).await.unwrap();
        let loaded = PrintStats::load_sidecar(&path).await.unwrap();
        assert_eq!(loaded.filament_used, 4.2);
        assert_eq!(loaded.fan_speed.as_deref(), Some("M106 S255"));
        PrintStats::remove_sidecar(&path).await.unwrap();
        assert!(PrintStats::load_sidecar(&path).await.is_none());
        PrintStats::remove_sidecar(&path).await.unwrap();
    }
}
