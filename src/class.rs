//! The bootloader protocol engine.
//!
//! [`FlipBootloader`] owns the DFU class registers and the session state
//! the FLIP command set needs (last decoded command, 64KB page bank,
//! pending blank-check result, application entry pointer), and drives
//! the control endpoint and the three memory targets from a single
//! entry point, [`handle_control_request`](FlipBootloader::handle_control_request).

use usb_device::control::{Recipient, Request, RequestType};

use crate::command::{AddressWindow, CommandGroup, FlipCommand};
use crate::io::{EndpointIO, SystemIO};
use crate::mem::MemoryTarget;
use crate::state::{DFUState, DFUStatus, DFUStatusCode};

const DFU_DETACH: u8 = 0x00;
const DFU_DNLOAD: u8 = 0x01;
const DFU_UPLOAD: u8 = 0x02;
const DFU_GETSTATUS: u8 = 0x03;
const DFU_CLRSTATUS: u8 = 0x04;
const DFU_GETSTATE: u8 = 0x05;
const DFU_ABORT: u8 = 0x06;

/// The FLIP/DFU bootloader session.
///
/// Generic over the control endpoint, the three memory targets (internal
/// flash, internal EEPROM, external dataflash) and the system hooks.
/// Everything lives for the whole bootloader session and is dropped the
/// moment control passes to the application.
pub struct FlipBootloader<IO, FL, EE, DF, SYS>
where
    IO: EndpointIO,
    FL: MemoryTarget,
    EE: MemoryTarget,
    DF: MemoryTarget,
    SYS: SystemIO,
{
    io: IO,
    flash: FL,
    eeprom: EE,
    dataflash: DF,
    system: SYS,
    status: DFUStatus,
    command: Option<FlipCommand>,
    page_bank: u8,
    blank_fault: Option<u16>,
    app_start: u16,
}

impl<IO, FL, EE, DF, SYS> FlipBootloader<IO, FL, EE, DF, SYS>
where
    IO: EndpointIO,
    FL: MemoryTarget,
    EE: MemoryTarget,
    DF: MemoryTarget,
    SYS: SystemIO,
{
    /// Creates a session with reset defaults: `DfuIdle`/`Ok`, bank 0,
    /// application entry at 0x0000.
    pub fn new(io: IO, flash: FL, eeprom: EE, dataflash: DF, system: SYS) -> Self {
        FlipBootloader {
            io,
            flash,
            eeprom,
            dataflash,
            system,
            status: DFUStatus::new(),
            command: None,
            page_bank: 0,
            blank_fault: None,
            app_start: 0x0000,
        }
    }

    /// Current DFU state.
    pub fn dfu_state(&self) -> DFUState {
        self.status.state()
    }

    /// Current DFU status code.
    pub fn dfu_status(&self) -> DFUStatusCode {
        self.status.status()
    }

    /// Current 64KB page bank.
    pub fn page_bank(&self) -> u8 {
        self.page_bank
    }

    /// Current application entry pointer.
    pub fn application_start(&self) -> u16 {
        self.app_start
    }

    /// Borrow the flash target.
    pub fn flash(&self) -> &FL {
        &self.flash
    }

    /// Borrow the EEPROM target.
    pub fn eeprom(&self) -> &EE {
        &self.eeprom
    }

    /// Borrow the dataflash target.
    pub fn dataflash(&self) -> &DF {
        &self.dataflash
    }

    /// Borrow the system hooks.
    pub fn system(&self) -> &SYS {
        &self.system
    }

    /// Handles one class control request addressed to the DFU interface.
    ///
    /// Call this from the USB stack's control-request hook with the
    /// parsed SETUP packet. The data stage of the transfer is exchanged
    /// through the [`EndpointIO`] the session owns; for streamed
    /// downloads and uploads this call does not return until the
    /// command's whole address window has been moved.
    pub fn handle_control_request(&mut self, req: &Request) {
        if req.request_type != RequestType::Class || req.recipient != Recipient::Interface {
            return;
        }

        self.io.clear_setup();

        #[cfg(feature = "defmt")]
        defmt::trace!("dfu request {=u8}, length {=u16}", req.request, req.length);

        match req.request {
            DFU_DETACH => {}
            DFU_DNLOAD => self.dnload(req),
            DFU_UPLOAD => self.upload(),
            DFU_GETSTATUS => self.get_status(),
            DFU_GETSTATE => self.get_state(),
            // Clear-status and abort are the same unconditional reset.
            DFU_CLRSTATUS | DFU_ABORT => self.status.clear(),
            _ => {}
        }

        self.io.clear_status_stage();
    }

    fn dnload(&mut self, req: &Request) {
        if req.length == 0 {
            // An empty download closes the session: tear down and hand
            // control to the application. Does not return.
            #[cfg(feature = "defmt")]
            defmt::info!("session closed, starting application at {=u16:#x}", self.app_start);

            self.system.exit_to_application(self.app_start);
        }

        // The envelope rides in the first OUT packet: one group byte and
        // up to five payload bytes, the rest padding.
        self.io.wait_out_received();
        let group = self.io.read_byte();
        let mut data = [0u8; 5];
        let count = usize::from(req.length - 1).min(5);
        for byte in data.iter_mut().take(count) {
            *byte = self.io.read_byte();
        }
        self.io.clear_out();

        match FlipCommand::decode(group, data) {
            Some(cmd) => {
                #[cfg(feature = "defmt")]
                defmt::debug!("flip command {}", cmd);

                self.command = Some(cmd);
                if !cmd.runs_on_upload() {
                    self.dispatch(cmd);
                }
            }
            None => {
                // Unknown group: record it so the next status poll sees
                // the failure instead of the host waiting forever.
                self.status.fail(DFUStatusCode::ErrUnknown);
            }
        }
    }

    fn upload(&mut self) {
        match self.command {
            Some(cmd) if cmd.is_blank_check() => {
                // The scan already ran during the download request; this
                // is the host collecting the first non-blank address.
                let address = self.blank_fault.take().unwrap_or(0);
                self.io.wait_in_ready();
                self.io.write_word_le(address);
                self.io.clear_in();
            }
            Some(cmd) => self.dispatch(cmd),
            None => {
                self.status.fail(DFUStatusCode::ErrUnknown);
                self.io.wait_in_ready();
                self.io.clear_in();
            }
        }
    }

    fn dispatch(&mut self, cmd: FlipCommand) {
        match cmd.group {
            CommandGroup::Download => self.download(&cmd),
            CommandGroup::Upload => self.upload_or_check(&cmd),
            CommandGroup::Exec => self.exec(&cmd),
            CommandGroup::Read => self.read_info(&cmd),
            CommandGroup::Select => self.select(&cmd),
        }
    }

    fn download(&mut self, cmd: &FlipCommand) {
        match cmd.opcode() {
            0x00 => {
                if self.status.begin_transfer() {
                    stream_download(&mut self.io, &mut self.flash, &mut self.status, cmd.window());
                }
            }
            0x01 => {
                if self.status.begin_transfer() {
                    stream_download(&mut self.io, &mut self.eeprom, &mut self.status, cmd.window());
                }
            }
            0x10 => {
                if self.status.begin_transfer() {
                    let window = cmd.window().banked(self.page_bank);
                    stream_download(&mut self.io, &mut self.dataflash, &mut self.status, window);
                }
            }
            _ => self.status.fail(DFUStatusCode::ErrUnknown),
        }
    }

    fn upload_or_check(&mut self, cmd: &FlipCommand) {
        match cmd.opcode() {
            0x00 => {
                if self.status.begin_transfer() {
                    stream_upload(&mut self.io, &mut self.flash, &mut self.status, cmd.window());
                }
            }
            0x01 => {
                let fault = blank_check(&mut self.flash, &mut self.status, cmd.window());
                self.record_fault(fault);
            }
            0x02 => {
                if self.status.begin_transfer() {
                    stream_upload(&mut self.io, &mut self.eeprom, &mut self.status, cmd.window());
                }
            }
            0x03 => {
                let fault = blank_check(&mut self.eeprom, &mut self.status, cmd.window());
                self.record_fault(fault);
            }
            0x10 => {
                if self.status.begin_transfer() {
                    let window = cmd.window().banked(self.page_bank);
                    stream_upload(&mut self.io, &mut self.dataflash, &mut self.status, window);
                }
            }
            0x11 => {
                let window = cmd.window().banked(self.page_bank);
                let fault = blank_check(&mut self.dataflash, &mut self.status, window);
                self.record_fault(fault);
            }
            _ => self.status.fail(DFUStatusCode::ErrUnknown),
        }
    }

    fn record_fault(&mut self, fault: Option<u32>) {
        if let Some(address) = fault {
            #[cfg(feature = "defmt")]
            defmt::debug!("blank check failed at {=u32:#x}", address);

            self.blank_fault = Some(address as u16);
        }
    }

    fn exec(&mut self, cmd: &FlipCommand) {
        match (cmd.data[0], cmd.data[1]) {
            (0x00, 0xFF) => self.flash.erase_all(),
            (0x01, 0xFF) => self.eeprom.erase_all(),
            (0x10, 0xFF) => self.dataflash.erase_all(),
            // The part resets into the application once the host stops
            // talking to us.
            (0x03, 0x00) => self.system.arm_watchdog(),
            // Only the pointer changes here; the jump happens on the
            // empty download that closes the session.
            (0x03, 0x01) => {
                self.app_start = u16::from_be_bytes([cmd.data[3], cmd.data[4]]);
            }
            _ => self.status.fail(DFUStatusCode::ErrUnknown),
        }
    }

    fn read_info(&mut self, cmd: &FlipCommand) {
        let value = match (cmd.data[0], cmd.data[1]) {
            (0x00, 0x00) => Some(SYS::BOOTLOADER_VERSION),
            (0x00, 0x01) => Some(SYS::BOOTLOADER_ID1),
            (0x00, 0x02) => Some(SYS::BOOTLOADER_ID2),
            (0x01, 0x30) => Some(SYS::MANUFACTURER_CODE),
            (0x01, 0x31) => Some(SYS::FAMILY_CODE),
            (0x01, 0x60) => Some(SYS::PRODUCT_NAME),
            (0x01, 0x61) => Some(SYS::PRODUCT_REVISION),
            _ => None,
        };

        self.io.wait_in_ready();
        match value {
            Some(value) => self.io.write_byte(value),
            None => self.status.fail(DFUStatusCode::ErrUnknown),
        }
        self.io.clear_in();
    }

    fn select(&mut self, cmd: &FlipCommand) {
        if cmd.data[0] == 0x03 && cmd.data[1] == 0x00 {
            self.page_bank = cmd.data[2];
        } else {
            self.status.fail(DFUStatusCode::ErrUnknown);
        }
    }

    fn get_status(&mut self) {
        // The poll itself advances the state; the reply carries the
        // post-transition value.
        self.status.poll_transition();

        self.io.wait_in_ready();
        let reply: [u8; 6] = self.status.into();
        for byte in reply {
            self.io.write_byte(byte);
        }
        self.io.clear_in();
    }

    fn get_state(&mut self) {
        self.io.wait_in_ready();
        self.io.write_byte(self.status.state() as u8);
        self.io.clear_in();
    }
}

/// Streams OUT packets into `mem` until the window is exhausted.
///
/// The page cursor erases each page on entry and commits it after the
/// last grain inside it: at the next boundary for full pages, or when
/// the window closes for the final, possibly partial, one. Each packet
/// is acked whether or not it finished the window.
fn stream_download<IO: EndpointIO, M: MemoryTarget>(
    io: &mut IO,
    mem: &mut M,
    dfu: &mut DFUStatus,
    window: AddressWindow,
) {
    let mut cursor = window.start;
    let mut grain = [0u8; 2];
    mem.open_write(cursor);

    while dfu.state() != DFUState::DfuManifestSync {
        io.wait_out_received();
        dfu.enter(DFUState::DfuDnBusy);

        let mut used = 0;
        while used < IO::PACKET_SIZE {
            if M::PAGE_SIZE > 1 && cursor % M::PAGE_SIZE == 0 {
                mem.erase_page(cursor);
                if cursor != window.start {
                    mem.commit_page(cursor - M::GRAIN);
                }
            }

            let data = &mut grain[..M::GRAIN as usize];
            if M::GRAIN == 2 {
                data.copy_from_slice(&io.read_word_le().to_le_bytes());
            } else {
                data[0] = io.read_byte();
            }
            mem.write(cursor, data);
            cursor += M::GRAIN;
            used += M::GRAIN as usize;

            if cursor > window.end {
                if M::PAGE_SIZE > 1 {
                    mem.commit_page(cursor - M::GRAIN);
                }
                mem.close_write();
                dfu.enter(DFUState::DfuManifestSync);
                break;
            }
        }

        io.clear_out();
        if dfu.state() == DFUState::DfuDnBusy {
            dfu.enter(DFUState::DfuDnloadSync);
        }
    }
}

/// Streams `mem` into IN packets until the cursor reaches the window end.
///
/// Packets are always sent full; whatever lies past the window end pads
/// the last one and is discarded by the host.
fn stream_upload<IO: EndpointIO, M: MemoryTarget>(
    io: &mut IO,
    mem: &mut M,
    dfu: &mut DFUStatus,
    window: AddressWindow,
) {
    dfu.enter(DFUState::DfuUploadIdle);
    let mut cursor = window.start;
    mem.open_read(cursor);

    while cursor < window.end {
        io.wait_in_ready();

        let mut used = 0;
        while used < IO::PACKET_SIZE {
            if M::GRAIN == 2 {
                io.write_word_le(mem.read_word(cursor));
            } else {
                io.write_byte(mem.read_byte(cursor));
            }
            cursor += M::GRAIN;
            used += M::GRAIN as usize;
        }

        io.clear_in();
    }

    mem.close_read();
}

/// Scans the window for the first cell that is not erased (0xFF).
///
/// Runs synchronously, short-circuiting on the first violation: state
/// becomes `DfuError` with `ErrCheckErased` and the offending address is
/// returned. A fully blank window changes nothing and returns `None`.
fn blank_check<M: MemoryTarget>(
    mem: &mut M,
    dfu: &mut DFUStatus,
    window: AddressWindow,
) -> Option<u32> {
    let mut fault = None;
    mem.open_read(window.start);

    for address in window.start..window.end {
        if mem.read_byte(address) != 0xFF {
            fault = Some(address);
            break;
        }
    }

    mem.close_read();
    if fault.is_some() {
        dfu.fail(DFUStatusCode::ErrCheckErased);
    }
    fault
}
