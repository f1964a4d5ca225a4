//! Failure taxonomy surfaced by the command engine

use crate::hid::protocol::CommandCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a command could not be completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum FailureReason {
    /// No device present, or the device is not in the state the command needs
    #[error("device not connected")]
    DeviceNotConnected,
    /// The transport rejected the outbound frame
    #[error("failed to send command")]
    FailedToSendCommand,
    /// An expected response never arrived or could not be aligned
    #[error("failed to read result")]
    FailedToReadResult,
    /// An output frame was submitted outside of API mode
    #[error("API mode required")]
    NeedApiMode,
}

/// Caller-facing command families reported with a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandFamily {
    RequestIoStatus,
    LoadScript,
    ApiFrame,
    RequestSettings,
    SaveSettings,
    EnterApiMode,
    ExitApiMode,
    UnloadScript,
    ChangeSlot,
    TurnOffController,
    GetDeviceInfo,
}

impl From<CommandCode> for CommandFamily {
    fn from(code: CommandCode) -> Self {
        match code {
            CommandCode::RequestIoStatus => CommandFamily::RequestIoStatus,
            CommandCode::RunScript => CommandFamily::LoadScript,
            CommandCode::ApiMode | CommandCode::ApiModeContinuation => CommandFamily::ApiFrame,
            CommandCode::GetSettings => CommandFamily::RequestSettings,
            CommandCode::SetSettings => CommandFamily::SaveSettings,
            CommandCode::EnterApiMode => CommandFamily::EnterApiMode,
            CommandCode::ExitApiMode => CommandFamily::ExitApiMode,
            CommandCode::UnloadScript => CommandFamily::UnloadScript,
            CommandCode::ChangeSlotStep1 | CommandCode::ChangeSlotStep2 => CommandFamily::ChangeSlot,
            CommandCode::TurnOffController => CommandFamily::TurnOffController,
            CommandCode::GetFirmware | CommandCode::GetSerial => CommandFamily::GetDeviceInfo,
        }
    }
}

impl std::fmt::Display for CommandFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CommandFamily::RequestIoStatus => "request I/O status",
            CommandFamily::LoadScript => "load script",
            CommandFamily::ApiFrame => "API frame",
            CommandFamily::RequestSettings => "request settings",
            CommandFamily::SaveSettings => "save settings",
            CommandFamily::EnterApiMode => "enter API mode",
            CommandFamily::ExitApiMode => "exit API mode",
            CommandFamily::UnloadScript => "unload script",
            CommandFamily::ChangeSlot => "change slot",
            CommandFamily::TurnOffController => "turn off controller",
            CommandFamily::GetDeviceInfo => "get device info",
        };
        f.write_str(name)
    }
}

/// A failed command, as delivered to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{command} failed: {reason}")]
pub struct CommandFailure {
    pub reason: FailureReason,
    pub command: CommandFamily,
}

impl CommandFailure {
    pub fn new(reason: FailureReason, command: impl Into<CommandFamily>) -> Self {
        Self {
            reason,
            command: command.into(),
        }
    }
}

/// Error returned synchronously by the public command surface
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Precondition unmet; the same failure was published to subscribers
    #[error(transparent)]
    Rejected(#[from] CommandFailure),
    /// Script bytecode outside the accepted size range
    #[error("script must be between 2 and 4096 bytes (got {0})")]
    ScriptLength(u64),
    /// Script file could not be read
    #[error("failed to read script file")]
    ScriptFile(#[source] std::io::Error),
}
