//! FLIP command envelope decoding.
//!
//! A non-empty `DFU_DNLOAD` payload opens with a 6-byte envelope: one
//! group byte followed by an opcode and up to four parameter bytes.
//! Decoding is pure; everything stateful about a command (retention
//! across transfers, dispatch) belongs to the
//! [`FlipBootloader`](crate::FlipBootloader).

/// FLIP command groups, as carried in the first envelope byte.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandGroup {
    /// Program a memory from host data.
    Download = 1,
    /// Read a memory back to the host, or blank-check it.
    Upload = 3,
    /// Non-streaming actions: erase a whole target, start the application.
    Exec = 4,
    /// Read one byte of bootloader or device identity data.
    Read = 5,
    /// Select the current 64KB page bank.
    Select = 6,
}

impl CommandGroup {
    fn from_byte(value: u8) -> Option<Self> {
        match value {
            1 => Some(CommandGroup::Download),
            3 => Some(CommandGroup::Upload),
            4 => Some(CommandGroup::Exec),
            5 => Some(CommandGroup::Read),
            6 => Some(CommandGroup::Select),
            _ => None,
        }
    }
}

/// One decoded FLIP command: a group and its five payload bytes.
///
/// Immutable once decoded. The bootloader keeps the last decoded command
/// around because the protocol is two-phase: upload streaming and
/// blank-check results are resolved by a later `DFU_UPLOAD` request that
/// does not carry the command again.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlipCommand {
    /// Command group.
    pub group: CommandGroup,
    /// Opcode and parameter bytes.
    pub data: [u8; 5],
}

impl FlipCommand {
    /// Decodes an envelope. Returns `None` for an unrecognized group byte.
    pub fn decode(group: u8, data: [u8; 5]) -> Option<Self> {
        CommandGroup::from_byte(group).map(|group| FlipCommand { group, data })
    }

    /// The opcode byte (first payload byte).
    pub fn opcode(&self) -> u8 {
        self.data[0]
    }

    /// The address window carried in payload bytes 1..=4.
    pub fn window(&self) -> AddressWindow {
        AddressWindow::from_payload(&self.data)
    }

    /// Whether this is one of the blank-check upload commands.
    pub fn is_blank_check(&self) -> bool {
        self.group == CommandGroup::Upload && matches!(self.data[0], 0x01 | 0x03 | 0x11)
    }

    /// Whether execution is deferred until the follow-up `DFU_UPLOAD`
    /// request.
    ///
    /// Commands that stream data to the host must run while that request's
    /// IN data stage is open: the display-data uploads and the identity
    /// reads. Everything else (downloads, blank checks, exec, select)
    /// runs as soon as the envelope arrives.
    pub fn runs_on_upload(&self) -> bool {
        match self.group {
            CommandGroup::Upload => !self.is_blank_check(),
            CommandGroup::Read => true,
            _ => false,
        }
    }
}

/// An address window decoded from a command payload.
///
/// `start` and `end` are big-endian 16-bit fields at payload bytes 1–2
/// and 3–4. Downloads treat `end` as the last address written;
/// uploads and blank checks stop short of it. Both readings are the
/// source protocol's, kept as-is.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AddressWindow {
    /// First address of the window.
    pub start: u32,
    /// Closing address of the window.
    pub end: u32,
}

impl AddressWindow {
    fn from_payload(data: &[u8; 5]) -> Self {
        AddressWindow {
            start: u32::from(u16::from_be_bytes([data[1], data[2]])),
            end: u32::from(u16::from_be_bytes([data[3], data[4]])),
        }
    }

    /// Extends both ends with a 64KB page bank, forming the effective
    /// 24-bit window for targets larger than 64KB.
    pub fn banked(self, bank: u8) -> Self {
        let base = u32::from(bank) << 16;
        AddressWindow {
            start: base | self.start,
            end: base | self.end,
        }
    }
}
