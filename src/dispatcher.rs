//! Serializes access to the G-code processor so that externally issued
//! commands (web API, PAUSE/RESUME macros) and file-sourced lines from the
//! virtual-sdcard pump never interleave mid-line.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard, TryLockError};

use crate::gcode::{GCodeError, GCodeProcessor};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("gcode error: {0}")]
    GCode(#[from] GCodeError),
}

/// Shared handle to the dispatcher; cheap to clone and hand to every
/// component that needs to run G-code (the executor, the pause/resume
/// controller, the web API, the time-lapse coordinator).
#[derive(Clone)]
pub struct GcodeDispatcher {
    inner: Arc<Mutex<GCodeProcessor>>,
}

impl GcodeDispatcher {
    pub fn new(processor: GCodeProcessor) -> Self {
        Self { inner: Arc::new(Mutex::new(processor)) }
    }

    /// Non-blocking attempt to acquire exclusive access, mirroring the
    /// mutex `.test()` check the pump loop performs before dispatching a
    /// file-sourced line.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, GCodeProcessor>, TryLockError> {
        self.inner.try_lock()
    }

    /// Dispatches a single line, tagged by source. `cmd_from_sd` is
    /// currently informational (surfaced via tracing); the G-code
    /// processor itself does not branch on it, but callers rely on it to
    /// know that file-position bookkeeping is in effect.
    pub async fn dispatch(&self, line: &str, cmd_from_sd: bool) -> Result<(), DispatchError> {
        let mut guard = self.inner.lock().await;
        tracing::trace!(cmd_from_sd, "dispatching {}", line);
        guard.process_command(line).await?;
        Ok(())
    }

    /// Runs a short fixed sequence of lines (a macro script) through the
    /// dispatcher as a single externally-issued unit, e.g. `SAVE_GCODE_STATE`
    /// or a time-lapse excursion. Acquires the lock once for the whole
    /// script so the sequence can't be split by a concurrent file line.
    pub async fn run_script(&self, lines: &[String]) -> Result<(), DispatchError> {
        let mut guard = self.inner.lock().await;
        for line in lines {
            guard.process_command(line).await?;
        }
        Ok(())
    }
}
