//! HID protocol definitions for the remapping appliance
//!
//! Outbound reports are a fixed 65 bytes:
//! - Byte 0: report ID (always 0)
//! - Byte 1: command code
//! - Bytes 2-3: declared payload size, little-endian
//! - Byte 4: final-fragment flag
//! - Bytes 5-64: payload, zero padded
//!
//! Inbound reports echo a code in byte 0, a declared length in bytes 1-2
//! and a success flag in byte 3. The rest is family specific.

/// Outbound frame size in bytes (report ID included)
pub const FRAME_SIZE: usize = 65;

/// Header size (report ID + code + size + final flag)
pub const HEADER_SIZE: usize = 5;

/// Maximum payload per outbound frame
pub const MAX_PAYLOAD_SIZE: usize = FRAME_SIZE - HEADER_SIZE;

/// Script uploads are split into fragments of this many bytes
pub const SCRIPT_FRAGMENT_SIZE: usize = 60;

/// Inbound report size requested from the transport
pub const REPORT_SIZE: usize = 64;

/// Response code of an input-side status report
pub const INPUT_REPORT_CODE: u8 = 0x01;

/// Response code of an output-side status report
pub const OUTPUT_REPORT_CODE: u8 = 0x02;

/// Declared length of a settings response
pub const SETTINGS_REPORT_LEN: u8 = 11;

/// Declared length of an input-side status report
pub const INPUT_REPORT_LEN: u8 = 46;

/// Declared length of an output-side status report
pub const OUTPUT_REPORT_LEN: u8 = 36;

/// Vendor commands understood by the appliance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandCode {
    /// Poll live I/O state (answered by an input and an output report)
    RequestIoStatus = 0x02,
    /// Upload one fragment of a compiled script
    RunScript = 0x03,
    /// Apply an output frame (primary code)
    ApiMode = 0x04,
    /// Apply an output frame sent inside the minimum frame interval
    ApiModeContinuation = 0x84,
    /// Read the 11-byte settings block
    GetSettings = 0x05,
    /// Write the 11-byte settings block
    SetSettings = 0x06,
    EnterApiMode = 0x07,
    ExitApiMode = 0x08,
    UnloadScript = 0x09,
    /// Select the next slot
    ChangeSlotStep1 = 0x0A,
    /// Confirm the slot change
    ChangeSlotStep2 = 0x0B,
    TurnOffController = 0x0C,
    GetFirmware = 0xF0,
    GetSerial = 0xF1,
}

impl CommandCode {
    /// Convert command to byte value
    pub fn as_byte(&self) -> u8 {
        *self as u8
    }

    /// Parse command from byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x02 => Some(CommandCode::RequestIoStatus),
            0x03 => Some(CommandCode::RunScript),
            0x04 => Some(CommandCode::ApiMode),
            0x84 => Some(CommandCode::ApiModeContinuation),
            0x05 => Some(CommandCode::GetSettings),
            0x06 => Some(CommandCode::SetSettings),
            0x07 => Some(CommandCode::EnterApiMode),
            0x08 => Some(CommandCode::ExitApiMode),
            0x09 => Some(CommandCode::UnloadScript),
            0x0A => Some(CommandCode::ChangeSlotStep1),
            0x0B => Some(CommandCode::ChangeSlotStep2),
            0x0C => Some(CommandCode::TurnOffController),
            0xF0 => Some(CommandCode::GetFirmware),
            0xF1 => Some(CommandCode::GetSerial),
            _ => None,
        }
    }

    /// Whether responses to this command must echo its code in byte 0.
    ///
    /// Status polls and output frames are answered with status reports that
    /// carry their own codes, so they are exempt.
    pub fn requires_alignment(&self) -> bool {
        !matches!(
            self,
            CommandCode::ApiMode | CommandCode::ApiModeContinuation | CommandCode::RequestIoStatus
        )
    }
}

/// A 65-byte outbound HID report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutFrame {
    data: [u8; FRAME_SIZE],
}

impl Default for OutFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl OutFrame {
    /// Create a new empty frame
    pub fn new() -> Self {
        Self {
            data: [0u8; FRAME_SIZE],
        }
    }

    /// Create a frame with the command byte set
    pub fn with_command(command: CommandCode) -> Self {
        let mut frame = Self::new();
        frame.data[1] = command.as_byte();
        frame
    }

    /// Get the raw command byte
    pub fn command_byte(&self) -> u8 {
        self.data[1]
    }

    /// Get the command as enum
    pub fn command(&self) -> Option<CommandCode> {
        CommandCode::from_byte(self.data[1])
    }

    /// Declared payload size (bytes 2-3)
    pub fn declared_size(&self) -> u16 {
        u16::from_le_bytes([self.data[2], self.data[3]])
    }

    pub fn set_declared_size(&mut self, size: u16) {
        self.data[2..4].copy_from_slice(&size.to_le_bytes());
    }

    /// Whether this is the final (or only) fragment of a payload
    pub fn is_final(&self) -> bool {
        self.data[4] == 1
    }

    pub fn set_final(&mut self, is_final: bool) {
        self.data[4] = u8::from(is_final);
    }

    /// Get the payload slice (bytes 5-64)
    pub fn payload(&self) -> &[u8] {
        &self.data[HEADER_SIZE..]
    }

    /// Set payload from bytes, truncating if necessary
    pub fn set_payload(&mut self, payload: &[u8]) {
        let len = payload.len().min(MAX_PAYLOAD_SIZE);
        self.data[HEADER_SIZE..HEADER_SIZE + len].copy_from_slice(&payload[..len]);
        self.data[HEADER_SIZE + len..].fill(0);
    }

    /// Get raw frame data for sending
    pub fn as_bytes(&self) -> &[u8; FRAME_SIZE] {
        &self.data
    }

    /// Create frame from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut frame = Self::new();
        let len = bytes.len().min(FRAME_SIZE);
        frame.data[..len].copy_from_slice(&bytes[..len]);
        frame
    }
}

/// An inbound report classified by its header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Firmware identity: raw version bytes and the operational-mode selector
    Firmware { major_raw: u8, minor_raw: u8, mode: u8 },
    /// Serial identity: the raw byte the hub revision is derived from
    Serial { revision_raw: u8 },
    /// Settings block
    Settings([u8; 11]),
    /// Live input state (full report kept for the status decoder)
    InputStatus(Vec<u8>),
    /// Live output state (full report kept for the status decoder)
    OutputStatus(Vec<u8>),
}

impl Response {
    /// Classify a report by (code, declared length, success flag).
    ///
    /// Returns `None` for reports that are not understood or too short.
    pub fn parse(report: &[u8]) -> Option<Self> {
        let code = *report.first()?;
        let len = *report.get(1)?;
        let len_hi = *report.get(2)?;
        let success = *report.get(3)? == 1;
        if !success {
            return None;
        }

        match code {
            c if c == CommandCode::GetFirmware.as_byte() && report.len() > 7 => Some(Response::Firmware {
                major_raw: report[6],
                minor_raw: report[4],
                mode: report[7],
            }),
            c if c == CommandCode::GetSerial.as_byte() && report.len() > 29 => Some(Response::Serial {
                revision_raw: report[29],
            }),
            c if c == CommandCode::GetSettings.as_byte()
                && len == SETTINGS_REPORT_LEN
                && len_hi == 0
                && report.len() >= 15 =>
            {
                let mut block = [0u8; 11];
                block.copy_from_slice(&report[4..15]);
                Some(Response::Settings(block))
            }
            INPUT_REPORT_CODE if len == INPUT_REPORT_LEN && len_hi == 0 && report.len() >= 50 => {
                Some(Response::InputStatus(report.to_vec()))
            }
            OUTPUT_REPORT_CODE if len == OUTPUT_REPORT_LEN && len_hi == 0 && report.len() >= 39 => {
                Some(Response::OutputStatus(report.to_vec()))
            }
            _ => None,
        }
    }
}

/// Firmware and serial bytes are scaled by 1.6 and rounded up
pub fn scale_version(raw: u8) -> u8 {
    (f64::from(raw) / 1.6).ceil() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_creation() {
        let frame = OutFrame::new();
        assert_eq!(frame.as_bytes().len(), FRAME_SIZE);
        assert!(frame.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_frame_with_command() {
        let frame = OutFrame::with_command(CommandCode::GetFirmware);
        assert_eq!(frame.command(), Some(CommandCode::GetFirmware));
        assert_eq!(frame.as_bytes()[0], 0x00);
        assert_eq!(frame.as_bytes()[1], 0xF0);
    }

    #[test]
    fn test_frame_payload_padding() {
        let mut frame = OutFrame::with_command(CommandCode::RunScript);
        frame.set_payload(&[0xAA; MAX_PAYLOAD_SIZE]);
        frame.set_payload(&[1, 2, 3]);
        assert_eq!(&frame.payload()[..3], &[1, 2, 3]);
        assert!(frame.payload()[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_declared_size_little_endian() {
        let mut frame = OutFrame::with_command(CommandCode::RunScript);
        frame.set_declared_size(4096);
        assert_eq!(frame.as_bytes()[2], 0x00);
        assert_eq!(frame.as_bytes()[3], 0x10);
        assert_eq!(frame.declared_size(), 4096);
    }

    #[test]
    fn test_command_roundtrip() {
        for code in [
            CommandCode::RequestIoStatus,
            CommandCode::ApiMode,
            CommandCode::ApiModeContinuation,
            CommandCode::ChangeSlotStep2,
            CommandCode::GetSerial,
        ] {
            assert_eq!(CommandCode::from_byte(code.as_byte()), Some(code));
        }
        assert_eq!(CommandCode::from_byte(0x01), None);
        assert_eq!(CommandCode::from_byte(0xFF), None);
    }

    #[test]
    fn test_alignment_exemptions() {
        assert!(!CommandCode::ApiMode.requires_alignment());
        assert!(!CommandCode::ApiModeContinuation.requires_alignment());
        assert!(!CommandCode::RequestIoStatus.requires_alignment());
        assert!(CommandCode::GetSettings.requires_alignment());
        assert!(CommandCode::GetFirmware.requires_alignment());
    }

    #[test]
    fn test_parse_firmware() {
        let mut report = [0u8; REPORT_SIZE];
        report[0] = 0xF0;
        report[3] = 1;
        report[4] = 8;
        report[6] = 16;
        report[7] = 1;
        assert_eq!(
            Response::parse(&report),
            Some(Response::Firmware {
                major_raw: 16,
                minor_raw: 8,
                mode: 1
            })
        );
    }

    #[test]
    fn test_parse_requires_success_flag() {
        let mut report = [0u8; REPORT_SIZE];
        report[0] = 0xF0;
        report[3] = 0;
        assert_eq!(Response::parse(&report), None);
    }

    #[test]
    fn test_parse_settings_requires_length() {
        let mut report = [0u8; REPORT_SIZE];
        report[0] = 0x05;
        report[1] = 10;
        report[3] = 1;
        assert_eq!(Response::parse(&report), None);

        report[1] = 11;
        report[4] = 3;
        report[14] = 60;
        match Response::parse(&report) {
            Some(Response::Settings(block)) => {
                assert_eq!(block[0], 3);
                assert_eq!(block[10], 60);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_short_report_ignored() {
        assert_eq!(Response::parse(&[0xF1, 0, 0, 1, 0]), None);
        assert_eq!(Response::parse(&[]), None);
    }

    #[test]
    fn test_scale_version() {
        assert_eq!(scale_version(16), 10);
        assert_eq!(scale_version(0), 0);
        assert_eq!(scale_version(1), 1);
        assert_eq!(scale_version(255), 160);
    }
}
