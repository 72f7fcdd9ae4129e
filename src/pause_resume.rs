//! The PAUSE/RESUME/CLEAR_PAUSE/CANCEL_PRINT/M600 state machine mediating
//! between user commands and the virtual-sdcard executor.

use thiserror::Error;

use crate::dispatcher::{DispatchError, GcodeDispatcher};
use crate::virtual_sd::VirtualSdExecutor;

#[derive(Debug, Error)]
pub enum PauseResumeError {
    #[error("print already paused (key211)")]
    AlreadyPaused,
    #[error("print is not paused, resume aborted (key16)")]
    NotPaused,
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PauseResumeStatus {
    pub is_paused: bool,
}

/// `pause_command_sent` tracks whether a PAUSE has been issued and not yet
/// cleared; `is_paused` tracks whether the toolhead has actually parked
/// (the PAUSE gcode has executed). `is_paused` implies `pause_command_sent`,
/// but the reverse need not hold while an SD pause is still spinning down.
pub struct PauseResumeController {
    is_paused: bool,
    pause_command_sent: bool,
    sd_paused: bool,
    recover_velocity: f64,
}

impl PauseResumeController {
    pub fn new(recover_velocity: f64) -> Self {
        Self { is_paused: false, pause_command_sent: false, sd_paused: false, recover_velocity }
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    pub fn pause_command_sent(&self) -> bool {
        self.pause_command_sent
    }

    pub fn status(&self) -> PauseResumeStatus {
        PauseResumeStatus { is_paused: self.is_paused }
    }

    async fn is_sd_active(executor: Option<&VirtualSdExecutor>) -> bool {
        match executor {
            Some(exec) => exec.status().await.is_active,
            None => false,
        }
    }

    /// Idempotent: does nothing if a pause has already been sent. Notifies
    /// the executor if the virtual-sd job is actively printing; otherwise
    /// just records that a pause was requested externally.
    async fn send_pause_command(&mut self, executor: Option<&VirtualSdExecutor>) {
        if self.pause_command_sent {
            return;
        }
        if Self::is_sd_active(executor).await {
            self.sd_paused = true;
            if let Some(exec) = executor {
                if let Err(e) = exec.pause().await {
                    tracing::warn!("pause_resume: executor pause failed: {}", e);
                }
            }
        } else {
            self.sd_paused = false;
            tracing::info!("action:paused");
        }
        self.pause_command_sent = true;
    }

    async fn send_resume_command(&mut self, executor: Option<&VirtualSdExecutor>) {
        if self.sd_paused {
            if let Some(exec) = executor {
                if let Err(e) = exec.resume().await {
                    tracing::warn!("pause_resume: executor resume failed: {}", e);
                }
            }
            self.sd_paused = false;
        } else {
            tracing::info!("action:resumed");
        }
        self.pause_command_sent = false;
    }

    /// `PAUSE` — errors `AlreadyPaused` (key211) if already paused, else
    /// requests the pause, saves gcode state, and marks `is_paused`.
    pub async fn cmd_pause(
        &mut self,
        dispatcher: &GcodeDispatcher,
        executor: Option<&VirtualSdExecutor>,
    ) -> Result<(), PauseResumeError> {
        if self.is_paused {
            return Err(PauseResumeError::AlreadyPaused);
        }
        self.send_pause_command(executor).await;
        dispatcher.run_script(&["SAVE_GCODE_STATE STATE=PAUSE_STATE".to_string()]).await?;
        self.is_paused = true;
        Ok(())
    }

    /// `RESUME [VELOCITY=<mm/s>]` — errors `NotPaused` (key16) unless
    /// currently paused; restores gcode state at the recover (or supplied)
    /// velocity and un-parks the executor.
    pub async fn cmd_resume(
        &mut self,
        dispatcher: &GcodeDispatcher,
        executor: Option<&VirtualSdExecutor>,
        velocity: Option<f64>,
    ) -> Result<(), PauseResumeError> {
        if !self.is_paused {
            return Err(PauseResumeError::NotPaused);
        }
        let v = velocity.unwrap_or(self.recover_velocity);
        dispatcher
            .run_script(&[format!("RESTORE_GCODE_STATE STATE=PAUSE_STATE MOVE=1 MOVE_SPEED={v:.4}")])
            .await?;
        self.send_resume_command(executor).await;
        self.is_paused = false;
        Ok(())
    }

    /// `CLEAR_PAUSE` — unconditionally clears both flags without resuming
    /// the print.
    pub fn cmd_clear_pause(&mut self) {
        self.is_paused = false;
        self.pause_command_sent = false;
    }

    /// `CANCEL_PRINT` — cancels the executor's job only when one exists and
    /// is relevant (active or sd-paused), matching the original's
    /// unconditional `v_sd.cancel_print_state = False` but guarded for the
    /// no-virtual-sd case rather than blindly dereferencing it (see
    /// DESIGN.md's Open Question resolution).
    pub async fn cmd_cancel_print(&mut self, executor: Option<&VirtualSdExecutor>) -> Result<(), PauseResumeError> {
        if let Some(exec) = executor {
            if exec.status().await.is_active || self.sd_paused {
                if let Err(e) = exec.cancel().await {
                    tracing::warn!("pause_resume: executor cancel failed: {}", e);
                }
            } else {
                tracing::info!("action:cancel");
            }
        } else {
            tracing::info!("action:cancel");
        }
        self.cmd_clear_pause();
        Ok(())
    }

    /// `M600 [X] [Y] [Z] [E]` — filament-change sequence: saves state, then
    /// retracts/lifts/travels/purges/resets E0, leaving the print paused.
    pub async fn cmd_m600(
        &mut self,
        dispatcher: &GcodeDispatcher,
        executor: Option<&VirtualSdExecutor>,
        x: f64,
        y: f64,
        z: f64,
        e: f64,
    ) -> Result<(), PauseResumeError> {
        if self.is_paused {
            return Err(PauseResumeError::AlreadyPaused);
        }
        self.send_pause_command(executor).await;
        let script = vec![
            "SAVE_GCODE_STATE NAME=M600_state".to_string(),
            "SAVE_GCODE_STATE STATE=PAUSE_STATE".to_string(),
            "G91".to_string(),
            "G1 E-5 F4000".to_string(),
            format!("G1 Z{z}"),
            "G90".to_string(),
            format!("G1 X{x} Y{y} F3000"),
            "G0 E10 F6000".to_string(),
            format!("G0 E{e} F6000"),
            "G92 E0".to_string(),
        ];
        dispatcher.run_script(&script).await?;
        self.is_paused = true;
        Ok(())
    }
}

/// Default `M600` parameters per the command surface table: `X=0 Y=0 Z=10 E=-20`.
pub const M600_DEFAULT_X: f64 = 0.0;
pub const M600_DEFAULT_Y: f64 = 0.0;
pub const M600_DEFAULT_Z: f64 = 10.0;
pub const M600_DEFAULT_E: f64 = -20.0;

/// Default `RESUME` velocity when `VELOCITY=` is not supplied.
pub const DEFAULT_RECOVER_VELOCITY: f64 = 50.0;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::gcode::GCodeProcessor;
    use crate::hardware::HardwareManager;
    use crate::motion::MotionController;
    use crate::printer::PrinterState;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    fn make_dispatcher() -> GcodeDispatcher {
        let config = Config::default();
        let state = Arc::new(RwLock::new(PrinterState::default()));
        let hw = HardwareManager::new(config.clone());
        let motion = Arc::new(RwLock::new(MotionController::new(state.clone(), hw, &config)));
        GcodeDispatcher::new(GCodeProcessor::new(state, motion))
    }

    #[tokio::test]
    async fn pause_then_pause_again_errors() {
        let dispatcher = make_dispatcher();
        let mut ctrl = PauseResumeController::new(DEFAULT_RECOVER_VELOCITY);
        ctrl.cmd_pause(&dispatcher, None).await.unwrap();
        assert!(ctrl.is_paused());
        assert!(matches!(ctrl.cmd_pause(&dispatcher, None).await, Err(PauseResumeError::AlreadyPaused)));
    }

    #[tokio::test]
    async fn resume_without_pause_errors() {
        let dispatcher = make_dispatcher();
        let mut ctrl = PauseResumeController::new(DEFAULT_RECOVER_VELOCITY);
        assert!(matches!(ctrl.cmd_resume(&dispatcher, None, None).await, Err(PauseResumeError::NotPaused)));
    }

    #[tokio::test]
    async fn pause_then_resume_clears_state() {
        let dispatcher = make_dispatcher();
        let mut ctrl = PauseResumeController::new(DEFAULT_RECOVER_VELOCITY);
        ctrl.cmd_pause(&dispatcher, None).await.unwrap();
        ctrl.cmd_resume(&dispatcher, None, None).await.unwrap();
        assert!(!ctrl.is_paused());
        assert!(!ctrl.pause_command_sent());
    }

    #[tokio::test]
    async fn clear_pause_resets_without_resuming() {
        let dispatcher = make_dispatcher();
        let mut ctrl = PauseResumeController::new(DEFAULT_RECOVER_VELOCITY);
        ctrl.cmd_pause(&dispatcher, None).await.unwrap();
        ctrl.cmd_clear_pause();
        assert!(!ctrl.is_paused());
        assert!(!ctrl.pause_command_sent());
    }

    #[tokio::test]
    async fn m600_from_paused_is_rejected() {
        let dispatcher = make_dispatcher();
        let mut ctrl = PauseResumeController::new(DEFAULT_RECOVER_VELOCITY);
        ctrl.cmd_pause(&dispatcher, None).await.unwrap();
        let result = ctrl
            .cmd_m600(&dispatcher, None, M600_DEFAULT_X, M600_DEFAULT_Y, M600_DEFAULT_Z, M600_DEFAULT_E)
            .await;
        assert!(matches!(result, Err(PauseResumeError::AlreadyPaused)));
    }

    #[tokio::test]
    async fn m600_from_printing_pauses() {
        let dispatcher = make_dispatcher();
        let mut ctrl = PauseResumeController::new(DEFAULT_RECOVER_VELOCITY);
        ctrl.cmd_m600(&dispatcher, None, M600_DEFAULT_X, M600_DEFAULT_Y, M600_DEFAULT_Z, M600_DEFAULT_E)
            .await
            .unwrap();
        assert!(ctrl.is_paused());
    }

    #[tokio::test]
    async fn cancel_print_without_executor_clears_flags() {
        let dispatcher = make_dispatcher();
        let mut ctrl = PauseResumeController::new(DEFAULT_RECOVER_VELOCITY);
        ctrl.cmd_pause(&dispatcher, None).await.unwrap();
        ctrl.cmd_cancel_print(None).await.unwrap();
        assert!(!ctrl.is_paused());
        assert!(!ctrl.pause_command_sent());
    }
}
