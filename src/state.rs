//! DFU class state and status registers.

/// DFU device states, as reported in `DFU_GETSTATUS` and `DFU_GETSTATE`.
///
/// The full DFU 1.1a state space; this bootloader exercises the subset
/// `DfuIdle`, `DfuDnloadSync`, `DfuDnBusy`, `DfuDnloadIdle`,
/// `DfuManifestSync`, `DfuUploadIdle` and `DfuError`.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DFUState {
    /// Device is running its normal application.
    AppIdle = 0,
    /// Device has received `DFU_DETACH` and is waiting for a USB reset.
    AppDetach = 1,
    /// Device is in DFU mode, waiting for requests.
    DfuIdle = 2,
    /// A block was received; waiting for the host to poll `DFU_GETSTATUS`.
    DfuDnloadSync = 3,
    /// Device is programming a received block.
    DfuDnBusy = 4,
    /// Device is in a download, expecting more `DFU_DNLOAD` traffic.
    DfuDnloadIdle = 5,
    /// The final block was accepted; waiting for `DFU_GETSTATUS` to enter
    /// the manifestation phase.
    DfuManifestSync = 6,
    /// Device is in the manifestation phase.
    DfuManifest = 7,
    /// Device is waiting for a reset after manifestation.
    DfuManifestWaitReset = 8,
    /// Device is in an upload, expecting more `DFU_UPLOAD` traffic.
    DfuUploadIdle = 9,
    /// An error occurred. Awaiting `DFU_CLRSTATUS`.
    DfuError = 10,
}

/// DFU status codes, as reported in the first byte of `DFU_GETSTATUS`.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DFUStatusCode {
    /// No error condition is present.
    Ok = 0x00,
    /// File is not targeted for use by this device.
    ErrTarget = 0x01,
    /// File fails a vendor-specific verification test.
    ErrFile = 0x02,
    /// Device is unable to write memory.
    ErrWrite = 0x03,
    /// Memory erase failed.
    ErrErase = 0x04,
    /// Memory erase check failed.
    ErrCheckErased = 0x05,
    /// Program memory function failed.
    ErrProg = 0x06,
    /// Programmed memory failed verification.
    ErrVerify = 0x07,
    /// Received address is out of range.
    ErrAddress = 0x08,
    /// Received `DFU_DNLOAD` with `wLength = 0`, but the device does not
    /// think it has all of the data yet.
    ErrNotdone = 0x09,
    /// Device firmware is corrupt.
    ErrFirmware = 0x0A,
    /// Vendor-specific error.
    ErrVendor = 0x0B,
    /// Unexpected USB reset.
    ErrUsbr = 0x0C,
    /// Unexpected power-on reset.
    ErrPOR = 0x0D,
    /// Something went wrong, but the device does not know what it was.
    ErrUnknown = 0x0E,
    /// Device stalled an unexpected request.
    ErrStalledPkt = 0x0F,
}

/// The class state and status register pair.
///
/// One instance lives for the whole bootloader session, owned by the
/// [`FlipBootloader`](crate::FlipBootloader). Only the transition
/// functions below mutate it.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DFUStatus {
    state: DFUState,
    status: DFUStatusCode,
}

impl DFUStatus {
    /// Reset defaults: `DfuIdle` / `Ok`.
    pub fn new() -> Self {
        DFUStatus {
            state: DFUState::DfuIdle,
            status: DFUStatusCode::Ok,
        }
    }

    /// Current state.
    pub fn state(&self) -> DFUState {
        self.state
    }

    /// Current status code.
    pub fn status(&self) -> DFUStatusCode {
        self.status
    }

    /// Moves to `state`, leaving the status code untouched.
    pub fn enter(&mut self, state: DFUState) {
        self.state = state;
    }

    /// Records a failure: state `DfuError` with the given status code.
    pub fn fail(&mut self, status: DFUStatusCode) {
        self.state = DFUState::DfuError;
        self.status = status;
    }

    /// Gate for commands that open a streamed transfer.
    ///
    /// Such a command is legal only from `DfuIdle`. From any other state
    /// it is refused and the state becomes `DfuError`; the status code is
    /// not changed.
    pub fn begin_transfer(&mut self) -> bool {
        if self.state == DFUState::DfuIdle {
            true
        } else {
            self.state = DFUState::DfuError;
            false
        }
    }

    /// Advances the state on a `DFU_GETSTATUS` poll.
    ///
    /// `DfuDnloadSync` acknowledges into `DfuDnloadIdle`, and a finished
    /// upload or manifestation returns to `DfuIdle`. Every other state is
    /// a fixed point of this function.
    pub fn poll_transition(&mut self) {
        match self.state {
            DFUState::DfuDnloadSync => self.state = DFUState::DfuDnloadIdle,
            DFUState::DfuUploadIdle => self.state = DFUState::DfuIdle,
            DFUState::DfuManifestSync => self.state = DFUState::DfuIdle,
            _ => {}
        }
    }

    /// Unconditional reset to `DfuIdle` / `Ok`.
    ///
    /// `DFU_CLRSTATUS` and `DFU_ABORT` both land here; they are
    /// equivalent in this protocol.
    pub fn clear(&mut self) {
        self.state = DFUState::DfuIdle;
        self.status = DFUStatusCode::Ok;
    }
}

impl Default for DFUStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl From<DFUStatus> for [u8; 6] {
    fn from(dfu: DFUStatus) -> Self {
        [
            // bStatus
            dfu.status as u8,
            // bwPollTimeout, always zero
            0,
            0,
            0,
            // bState
            dfu.state as u8,
            // iString
            0,
        ]
    }
}
