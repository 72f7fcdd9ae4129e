//! Crate-wide error envelope.
//!
//! Web API responses and G-code command failures both render as
//! `{"code":"keyNNN","msg":"...","values":[...]}` so that any client
//! talking to either surface sees the same shape. The `keyNNN` codes are
//! fixed for machine consumption; see the glossary for the full table.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorEnvelope {
    pub code: String,
    pub msg: String,
    #[serde(default)]
    pub values: Vec<String>,
}

impl ErrorEnvelope {
    pub fn new(code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self { code: code.into(), msg: msg.into(), values: Vec::new() }
    }

    pub fn with_values(mut self, values: Vec<String>) -> Self {
        self.values = values;
        self
    }
}

/// Errors that can surface from the printer lifecycle, the dispatcher, and
/// the virtual-sdcard subsystem, carrying the key code the original system
/// this crate controls would have used for the same condition.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("print is not paused, resume aborted (key16)")]
    ResumeWithoutPause,

    #[error("duplicate canbus_uuid (key29)")]
    DuplicateCanbusUuid,

    #[error("unknown canbus_uuid {0} (key30)")]
    UnknownCanbusUuid(String),

    #[error("unable to extract filename (key120)")]
    FilenameExtractFailed,

    #[error("unable to open file: {0} (key121)")]
    OpenFailed(String),

    #[error("unknown object {0} (key122)")]
    UnknownObject(String),

    #[error("duplicate object {0} (key123)")]
    DuplicateObject(String),

    #[error("unknown module {0} (key124)")]
    UnknownModule(String),

    #[error("SDCARD_RESET_FILE cannot be run from the sdcard (key131)")]
    ResetFromSd,

    #[error("print already paused (key211)")]
    AlreadyPaused,

    #[error("SD busy (key217)")]
    SdBusy,

    #[error("config header error: {0} (key336)")]
    ConfigHeader(String),

    #[error("config parse error: {0} (key337)")]
    ConfigParse(String),

    /// Generic transport/MCU-layer error, wrapped under `key0` unless the
    /// inner message is already a JSON envelope.
    #[error("{0} (key0)")]
    Mcu(String),

    #[error("dispatch error: {0}")]
    Dispatch(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

impl CoreError {
    /// The stable `keyNNN` code a client can match on. Errors with no
    /// assigned code in the glossary render as `key0` (the generic
    /// transport-error bucket the original system falls back to).
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::ResumeWithoutPause => "key16",
            CoreError::DuplicateCanbusUuid => "key29",
            CoreError::UnknownCanbusUuid(_) => "key30",
            CoreError::FilenameExtractFailed => "key120",
            CoreError::OpenFailed(_) => "key121",
            CoreError::UnknownObject(_) => "key122",
            CoreError::DuplicateObject(_) => "key123",
            CoreError::UnknownModule(_) => "key124",
            CoreError::ResetFromSd => "key131",
            CoreError::AlreadyPaused => "key211",
            CoreError::SdBusy => "key217",
            CoreError::ConfigHeader(_) => "key336",
            CoreError::ConfigParse(_) => "key337",
            CoreError::Mcu(_) | CoreError::Dispatch(_) | CoreError::Io(_) | CoreError::Internal(_) => "key0",
        }
    }

    pub fn values(&self) -> Vec<String> {
        match self {
            CoreError::UnknownCanbusUuid(uuid) => vec![uuid.clone()],
            CoreError::UnknownObject(name) | CoreError::DuplicateObject(name) | CoreError::UnknownModule(name) => {
                vec![name.clone()]
            }
            _ => Vec::new(),
        }
    }

    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope::new(self.code(), self.to_string()).with_values(self.values())
    }
}

impl From<crate::virtual_sd::ExecutorError> for CoreError {
    fn from(e: crate::virtual_sd::ExecutorError) -> Self {
        use crate::virtual_sd::ExecutorError as E;
        match e {
            E::Busy => CoreError::SdBusy,
            E::NoFileSelected => CoreError::FilenameExtractFailed,
            E::NotRunning => CoreError::Internal("virtual sd job is not running".to_string()),
            E::FileNotFound(name) => CoreError::OpenFailed(name),
            E::Io(err) => CoreError::OpenFailed(err.to_string()),
        }
    }
}

impl From<crate::pause_resume::PauseResumeError> for CoreError {
    fn from(e: crate::pause_resume::PauseResumeError) -> Self {
        use crate::pause_resume::PauseResumeError as E;
        match e {
            E::AlreadyPaused => CoreError::AlreadyPaused,
            E::NotPaused => CoreError::ResumeWithoutPause,
            E::Dispatch(err) => CoreError::Dispatch(err.to_string()),
        }
    }
}

impl From<crate::checkpoint::CheckpointError> for CoreError {
    fn from(e: crate::checkpoint::CheckpointError) -> Self {
        CoreError::Internal(e.to_string())
    }
}

impl From<crate::print_stats::PrintStatsError> for CoreError {
    fn from(e: crate::print_stats::PrintStatsError) -> Self {
        CoreError::Internal(e.to_string())
    }
}

impl From<crate::lifecycle::LifecycleError> for CoreError {
    fn from(e: crate::lifecycle::LifecycleError) -> Self {
        use crate::lifecycle::LifecycleError as E;
        match e {
            E::ConnectFailed(msg) => CoreError::ConfigHeader(msg),
            E::ConnectPhaseFailed => CoreError::ConfigParse("connect phase failed".to_string()),
            E::Io(err) => CoreError::Io(err),
        }
    }
}

impl From<crate::timelapse::TimelapseError> for CoreError {
    fn from(e: crate::timelapse::TimelapseError) -> Self {
        CoreError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_stable_code() {
        let err = CoreError::UnknownCanbusUuid("abc-123".to_string());
        let env = err.to_envelope();
        assert_eq!(env.code, "key30");
        assert_eq!(env.values, vec!["abc-123".to_string()]);
    }

    #[test]
    fn sd_busy_has_no_values() {
        let env = CoreError::SdBusy.to_envelope();
        assert_eq!(env.code, "key217");
        assert!(env.values.is_empty());
    }

    #[test]
    fn executor_busy_maps_to_sd_busy_key() {
        let err: CoreError = crate::virtual_sd::ExecutorError::Busy.into();
        assert_eq!(err.code(), "key217");
    }

    #[test]
    fn pause_resume_not_paused_maps_to_key16() {
        let err: CoreError = crate::pause_resume::PauseResumeError::NotPaused.into();
        assert_eq!(err.code(), "key16");
    }
}
