//! Queued command objects
//!
//! Builders for every command the public surface can queue, plus frame
//! encoding for the dispatcher.

use super::protocol::{CommandCode, OutFrame, SCRIPT_FRAGMENT_SIZE};

/// Smallest accepted script upload
pub const MIN_SCRIPT_SIZE: usize = 2;

/// Largest accepted script upload
pub const MAX_SCRIPT_SIZE: usize = 4096;

/// A pending device transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub code: CommandCode,
    pub payload: Option<Vec<u8>>,
    /// Declared size of the logical upload this frame belongs to
    pub total_size: Option<u16>,
    pub is_continuation: bool,
    /// Whether this frame ends its logical payload
    pub is_final: bool,
    /// Number of response reports to read after the write
    pub expected_reads: usize,
    /// Set once the command has been re-queued after a misaligned response
    pub retried: bool,
}

impl Command {
    /// A payload-less command that expects no response
    pub fn new(code: CommandCode) -> Self {
        Self {
            code,
            payload: None,
            total_size: None,
            is_continuation: false,
            is_final: true,
            expected_reads: 0,
            retried: false,
        }
    }

    pub fn with_reads(mut self, expected_reads: usize) -> Self {
        self.expected_reads = expected_reads;
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Size written to bytes 2-3
    pub fn declared_size(&self) -> u16 {
        match (self.total_size, &self.payload) {
            (Some(size), _) => size,
            (None, Some(payload)) => payload.len().min(u16::MAX as usize) as u16,
            (None, None) => 0,
        }
    }

    /// Serialize into a 65-byte outbound report
    pub fn encode(&self) -> OutFrame {
        let mut frame = OutFrame::with_command(self.code);
        frame.set_declared_size(self.declared_size());
        frame.set_final(self.is_final);
        if let Some(ref payload) = self.payload {
            frame.set_payload(payload);
        }
        frame
    }
}

/// Poll live I/O state; answered by an input and an output report
pub fn build_request_io_status() -> Command {
    Command::new(CommandCode::RequestIoStatus).with_reads(2)
}

pub fn build_get_settings() -> Command {
    Command::new(CommandCode::GetSettings).with_reads(1)
}

pub fn build_set_settings(block: [u8; 11]) -> Command {
    Command::new(CommandCode::SetSettings).with_payload(block.to_vec())
}

pub fn build_enter_api_mode() -> Command {
    Command::new(CommandCode::EnterApiMode)
}

pub fn build_exit_api_mode() -> Command {
    Command::new(CommandCode::ExitApiMode)
}

pub fn build_unload_script() -> Command {
    Command::new(CommandCode::UnloadScript)
}

pub fn build_turn_off_controller() -> Command {
    Command::new(CommandCode::TurnOffController)
}

/// Select + confirm, queued back to back
pub fn build_change_slot() -> [Command; 2] {
    [
        Command::new(CommandCode::ChangeSlotStep1),
        Command::new(CommandCode::ChangeSlotStep2),
    ]
}

pub fn build_get_firmware() -> Command {
    Command::new(CommandCode::GetFirmware).with_reads(1)
}

pub fn build_get_serial() -> Command {
    Command::new(CommandCode::GetSerial).with_reads(1)
}

/// Output frame on the primary or secondary code; both report back twice
pub fn build_api_frame(payload: Vec<u8>, primary: bool) -> Command {
    let code = if primary {
        CommandCode::ApiMode
    } else {
        CommandCode::ApiModeContinuation
    };
    Command::new(code).with_payload(payload).with_reads(2)
}

/// Split a script into fragments sharing one declared size.
///
/// The caller validates the length; every fragment after the first is a
/// continuation and only the last one is final.
pub fn build_script_upload(bytecode: &[u8]) -> Vec<Command> {
    let total = bytecode.len().min(u16::MAX as usize) as u16;
    let chunks: Vec<&[u8]> = bytecode.chunks(SCRIPT_FRAGMENT_SIZE).collect();
    let last_idx = chunks.len().saturating_sub(1);

    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| Command {
            code: CommandCode::RunScript,
            payload: Some(chunk.to_vec()),
            total_size: Some(total),
            is_continuation: i > 0,
            is_final: i == last_idx,
            expected_reads: 0,
            retried: false,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_command_is_final() {
        let frame = build_enter_api_mode().encode();
        assert_eq!(frame.command(), Some(CommandCode::EnterApiMode));
        assert_eq!(frame.declared_size(), 0);
        assert!(frame.is_final());
        assert!(frame.payload().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_single_byte_payload() {
        let frame = Command::new(CommandCode::SetSettings)
            .with_payload(vec![0x42])
            .encode();
        assert_eq!(frame.declared_size(), 1);
        assert!(frame.is_final());
        assert_eq!(frame.payload()[0], 0x42);
        assert_eq!(frame.payload()[1], 0);
    }

    #[test]
    fn test_full_fragment_payload() {
        let script = vec![7u8; 60];
        let fragments = build_script_upload(&script);
        assert_eq!(fragments.len(), 1);
        let frame = fragments[0].encode();
        assert_eq!(frame.declared_size(), 60);
        assert!(frame.is_final());
        assert!(!fragments[0].is_continuation);
        assert!(frame.payload().iter().all(|&b| b == 7));
    }

    #[test]
    fn test_max_script_fragments() {
        let script: Vec<u8> = (0..MAX_SCRIPT_SIZE).map(|i| i as u8).collect();
        let fragments = build_script_upload(&script);
        assert_eq!(fragments.len(), 69);

        for (i, cmd) in fragments.iter().enumerate() {
            let frame = cmd.encode();
            assert_eq!(frame.command(), Some(CommandCode::RunScript));
            assert_eq!(frame.declared_size(), 4096);
            assert_eq!(frame.is_final(), i == 68);
            assert_eq!(cmd.is_continuation, i > 0);
        }

        let last = fragments.last().unwrap();
        assert_eq!(last.payload.as_ref().unwrap().len(), 4096 - 68 * 60);
    }

    #[test]
    fn test_script_130_bytes() {
        let fragments = build_script_upload(&[1u8; 130]);
        let sizes: Vec<usize> = fragments
            .iter()
            .map(|c| c.payload.as_ref().unwrap().len())
            .collect();
        assert_eq!(sizes, vec![60, 60, 10]);
        assert!(fragments.iter().all(|c| c.declared_size() == 130));
        assert!(!fragments[0].is_continuation);
        assert!(fragments[1].is_continuation && fragments[2].is_continuation);
    }

    #[test]
    fn test_read_counts() {
        assert_eq!(build_request_io_status().expected_reads, 2);
        assert_eq!(build_get_settings().expected_reads, 1);
        assert_eq!(build_get_firmware().expected_reads, 1);
        assert_eq!(build_get_serial().expected_reads, 1);
        assert_eq!(build_api_frame(vec![0; 52], true).expected_reads, 2);
        assert_eq!(build_unload_script().expected_reads, 0);
    }

    #[test]
    fn test_api_frame_codes() {
        assert_eq!(build_api_frame(vec![], true).code, CommandCode::ApiMode);
        assert_eq!(
            build_api_frame(vec![], false).code,
            CommandCode::ApiModeContinuation
        );
    }

    #[test]
    fn test_change_slot_order() {
        let [select, confirm] = build_change_slot();
        assert_eq!(select.code, CommandCode::ChangeSlotStep1);
        assert_eq!(confirm.code, CommandCode::ChangeSlotStep2);
    }
}
