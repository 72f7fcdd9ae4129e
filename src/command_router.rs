//! The G-code command surface described in the system's external interface
//! table: M20/M21/M23/M24/M25/M26/M27/M28/M29/M30, `SDCARD_PRINT_FILE`,
//! `SDCARD_RESET_FILE`, `PAUSE`/`RESUME`/`CLEAR_PAUSE`/`CANCEL_PRINT`/`M600`.
//!
//! Every command reaching the printer from the web API or a webhook passes
//! through here first; anything not named above falls through to the
//! dispatcher unchanged. File-sourced lines dispatched by the virtual-sdcard
//! pump loop bypass this router entirely (they're motion/temperature
//! commands, never sdcard control commands).

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::dispatcher::GcodeDispatcher;
use crate::errors::CoreError;
use crate::file_manager::FileManager;
use crate::pause_resume::PauseResumeController;
use crate::print_stats::PrintStatsStatus;
use crate::virtual_sd::{ExecutorStatus, VirtualSdExecutor};

/// The composed status object handed to HTTP/JSON consumers: the executor's
/// file/progress view, print stats' duration/filament view, and the
/// pause/resume controller's `is_paused` flag.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PrinterStatus {
    pub executor: ExecutorStatus,
    pub print_stats: PrintStatsStatus,
    pub is_paused: bool,
}

#[derive(Clone)]
pub struct CommandRouter {
    dispatcher: GcodeDispatcher,
    executor: VirtualSdExecutor,
    pause_resume: Arc<Mutex<PauseResumeController>>,
    file_manager: FileManager,
    sd_root: String,
    crash_recovery_enabled: bool,
}

impl CommandRouter {
    pub fn new(
        dispatcher: GcodeDispatcher,
        executor: VirtualSdExecutor,
        pause_resume: Arc<Mutex<PauseResumeController>>,
        sd_root: impl Into<String>,
        crash_recovery_enabled: bool,
    ) -> Self {
        Self {
            dispatcher,
            executor,
            pause_resume,
            file_manager: FileManager::new(),
            sd_root: sd_root.into(),
            crash_recovery_enabled,
        }
    }

    pub fn executor(&self) -> &VirtualSdExecutor {
        &self.executor
    }

    pub async fn status(&self) -> PrinterStatus {
        let print_stats = self.executor.print_stats_handle();
        PrinterStatus {
            executor: self.executor.status().await,
            print_stats: print_stats.lock().await.get_status(std::time::Instant::now()),
            is_paused: self.pause_resume.lock().await.is_paused(),
        }
    }

    /// Dispatches one externally-sourced command line. Returns an optional
    /// human-readable response line for commands that produce one (`M20`,
    /// `M21`, `M27`); `None` for commands whose effect is the state change
    /// alone.
    pub async fn handle(&self, line: &str) -> Result<Option<String>, CoreError> {
        let trimmed = line.trim();
        let upper = trimmed.to_uppercase();
        let first_word = upper.split_whitespace().next().unwrap_or("");

        match first_word {
            "M20" => Ok(Some(self.list_files().await?)),
            "M21" => Ok(Some("SD card ok".to_string())),
            "M23" => {
                let name = extract_filename(trimmed).ok_or(CoreError::FilenameExtractFailed)?;
                self.executor.load(&name).await?;
                self.maybe_recover().await;
                Ok(None)
            }
            "M24" => {
                self.executor.resume().await?;
                Ok(None)
            }
            "M25" => {
                self.executor.pause().await?;
                Ok(None)
            }
            "M26" => {
                let offset = extract_param(trimmed, 'S').ok_or(CoreError::FilenameExtractFailed)?;
                self.executor.set_file_position(offset as u64).await;
                Ok(None)
            }
            "M27" => Ok(Some(self.report_progress().await)),
            "M28" | "M29" | "M30" => Err(CoreError::Internal("SD write not supported".to_string())),
            "SDCARD_PRINT_FILE" => {
                let name = extract_kv(trimmed, "FILENAME").ok_or(CoreError::FilenameExtractFailed)?;
                self.executor.load(&name).await?;
                self.maybe_recover().await;
                self.executor.resume().await?;
                Ok(None)
            }
            "SDCARD_RESET_FILE" => {
                if self.executor.is_in_dispatch() {
                    return Err(CoreError::ResetFromSd);
                }
                self.executor.reset().await?;
                Ok(None)
            }
            "PAUSE" => {
                self.pause_resume.lock().await.cmd_pause(&self.dispatcher, Some(&self.executor)).await?;
                Ok(None)
            }
            "RESUME" => {
                let velocity = extract_kv(trimmed, "VELOCITY").and_then(|v| v.parse::<f64>().ok());
                self.pause_resume
                    .lock()
                    .await
                    .cmd_resume(&self.dispatcher, Some(&self.executor), velocity)
                    .await?;
                Ok(None)
            }
            "CLEAR_PAUSE" => {
                self.pause_resume.lock().await.cmd_clear_pause();
                Ok(None)
            }
            "CANCEL_PRINT" => {
                self.pause_resume.lock().await.cmd_cancel_print(Some(&self.executor)).await?;
                Ok(None)
            }
            "M600" => {
                let x = extract_kv(trimmed, "X").and_then(|v| v.parse().ok()).unwrap_or(crate::pause_resume::M600_DEFAULT_X);
                let y = extract_kv(trimmed, "Y").and_then(|v| v.parse().ok()).unwrap_or(crate::pause_resume::M600_DEFAULT_Y);
                let z = extract_kv(trimmed, "Z").and_then(|v| v.parse().ok()).unwrap_or(crate::pause_resume::M600_DEFAULT_Z);
                let e = extract_kv(trimmed, "E").and_then(|v| v.parse().ok()).unwrap_or(crate::pause_resume::M600_DEFAULT_E);
                self.pause_resume
                    .lock()
                    .await
                    .cmd_m600(&self.dispatcher, Some(&self.executor), x, y, z, e)
                    .await?;
                Ok(None)
            }
            _ => {
                self.dispatcher.dispatch(trimmed, false).await.map_err(|e| CoreError::Dispatch(e.to_string()))?;
                Ok(None)
            }
        }
    }

    /// Replays the coordinate checkpoint against the freshly-loaded file,
    /// when crash recovery is armed (`print_switch.txt`). A missing or
    /// mismatched checkpoint is not an error; the print simply starts from
    /// the beginning.
    async fn maybe_recover(&self) {
        if !self.crash_recovery_enabled {
            return;
        }
        match self.executor.recover_from_checkpoint(&self.dispatcher).await {
            Ok(true) => tracing::info!("resumed from checkpoint"),
            Ok(false) => {}
            Err(e) => tracing::warn!("checkpoint recovery failed: {}", e),
        }
    }

    async fn list_files(&self) -> Result<String, CoreError> {
        let entries = self
            .file_manager
            .list_files(&self.sd_root)
            .await
            .map_err(|e| CoreError::OpenFailed(e.to_string()))?;
        let mut out = String::from("Begin file list\n");
        for entry in entries.iter().filter(|e| !e.is_directory) {
            out.push_str(&format!("{} {}\n", entry.name, entry.size));
        }
        out.push_str("End file list");
        Ok(out)
    }

    async fn report_progress(&self) -> String {
        let status = self.executor.status().await;
        if status.is_active {
            format!("SD printing byte {}/{}", status.file_position, status.file_size)
        } else {
            "Not SD printing.".to_string()
        }
    }
}

/// Parses `M23 <name>`, stripping a trailing `*checksum` if present.
fn extract_filename(line: &str) -> Option<String> {
    let rest = line.splitn(2, char::is_whitespace).nth(1)?.trim();
    let name = rest.split('*').next().unwrap_or(rest).trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Parses a `<TAG><value>` parameter (no `=`), e.g. `S1024` out of `M26 S1024`.
fn extract_param(line: &str, tag: char) -> Option<f64> {
    for part in line.split_whitespace().skip(1) {
        if part.starts_with(tag) || part.starts_with(tag.to_ascii_lowercase()) {
            return part[1..].parse().ok();
        }
    }
    None
}

/// Parses a `KEY=value` parameter out of a macro-style command line,
/// case-insensitively on the key.
fn extract_kv(line: &str, key: &str) -> Option<String> {
    for part in line.split_whitespace().skip(1) {
        if let Some((k, v)) = part.split_once('=') {
            if k.eq_ignore_ascii_case(key) {
                return Some(v.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::gcode::GCodeProcessor;
    use crate::hardware::HardwareManager;
    use crate::motion::MotionController;
    use crate::printer::PrinterState;
    use crate::checkpoint::CheckpointStore;
    use crate::timelapse::TimelapseCoordinator;

    async fn make_router(dir: &std::path::Path) -> CommandRouter {
        let state = Arc::new(tokio::sync::RwLock::new(PrinterState::default()));
        let config = Config::default();
        let hw = HardwareManager::new(config.clone());
        let motion = Arc::new(tokio::sync::RwLock::new(MotionController::new(state.clone(), hw, &config)));
        let processor = GCodeProcessor::new(state, motion);
        let dispatcher = GcodeDispatcher::new(processor);
        let stats = Arc::new(Mutex::new(crate::print_stats::PrintStats::new()));
        let checkpoint = Arc::new(CheckpointStore::open(dir.join("coord.save")));
        let timelapse = Arc::new(TimelapseCoordinator::disabled());
        let executor = VirtualSdExecutor::new(dir, dispatcher.clone(), stats, checkpoint, timelapse);
        let pause_resume = Arc::new(Mutex::new(PauseResumeController::new(crate::pause_resume::DEFAULT_RECOVER_VELOCITY)));
        CommandRouter::new(dispatcher, executor, pause_resume, dir.to_string_lossy().to_string(), false)
    }

    #[tokio::test]
    async fn m21_reports_ok() {
        let dir = tempfile::tempdir().unwrap();
        let router = make_router(dir.path()).await;
        assert_eq!(router.handle("M21").await.unwrap(), Some("SD card ok".to_string()));
    }

    #[tokio::test]
    async fn m20_lists_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.gcode"), "G1 X1\n").await.unwrap();
        let router = make_router(dir.path()).await;
        let listing = router.handle("M20").await.unwrap().unwrap();
        assert!(listing.starts_with("Begin file list"));
        assert!(listing.contains("a.gcode"));
        assert!(listing.ends_with("End file list"));
    }

    #[tokio::test]
    async fn m23_then_m24_runs_file_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("job.gcode"), "G1 X1\nG1 X2\n").await.unwrap();
        let router = make_router(dir.path()).await;
        router.handle("M23 job.gcode").await.unwrap();
        router.handle("M24").await.unwrap();
        for _ in 0..200 {
            if !router.executor().status().await.is_active {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(router.executor().status().await.progress >= 0.99);
    }

    #[tokio::test]
    async fn m27_reports_not_printing_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let router = make_router(dir.path()).await;
        assert_eq!(router.handle("M27").await.unwrap(), Some("Not SD printing.".to_string()));
    }

    #[tokio::test]
    async fn m28_rejects_with_write_not_supported() {
        let dir = tempfile::tempdir().unwrap();
        let router = make_router(dir.path()).await;
        let err = router.handle("M28 job.gcode").await.unwrap_err();
        assert!(err.to_string().contains("SD write not supported"));
    }

    #[tokio::test]
    async fn sdcard_print_file_selects_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("job.gcode"), "G1 X1\n").await.unwrap();
        let router = make_router(dir.path()).await;
        router.handle("SDCARD_PRINT_FILE FILENAME=job.gcode").await.unwrap();
        for _ in 0..200 {
            if !router.executor().status().await.is_active {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(router.executor().status().await.progress >= 0.99);
    }

    #[tokio::test]
    async fn pause_then_resume_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let router = make_router(dir.path()).await;
        router.handle("PAUSE").await.unwrap();
        assert!(matches!(router.handle("PAUSE").await, Err(CoreError::AlreadyPaused)));
        router.handle("RESUME").await.unwrap();
        assert!(matches!(router.handle("RESUME").await, Err(CoreError::ResumeWithoutPause)));
    }
}
