#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use usb_device::control::{Recipient, Request, RequestType};
use usb_device::UsbDirection;

use usbd_dfu_flip::*;

// Requests
pub const DFU_DETACH: u8 = 0;
pub const DFU_DNLOAD: u8 = 1;
pub const DFU_UPLOAD: u8 = 2;
pub const DFU_GETSTATUS: u8 = 3;
pub const DFU_CLRSTATUS: u8 = 4;
pub const DFU_GETSTATE: u8 = 5;
pub const DFU_ABORT: u8 = 6;

// FLIP groups
pub const GROUP_DOWNLOAD: u8 = 1;
pub const GROUP_UPLOAD: u8 = 3;
pub const GROUP_EXEC: u8 = 4;
pub const GROUP_READ: u8 = 5;
pub const GROUP_SELECT: u8 = 6;

// States
pub const DFU_IDLE: u8 = 2;
pub const DFU_DNLOAD_SYNC: u8 = 3;
pub const DFU_DN_BUSY: u8 = 4;
pub const DFU_DNLOAD_IDLE: u8 = 5;
pub const DFU_MANIFEST_SYNC: u8 = 6;
pub const DFU_UPLOAD_IDLE: u8 = 9;
pub const DFU_ERROR: u8 = 10;

// Status codes
pub const STATUS_OK: u8 = 0x00;
pub const STATUS_ERR_CHECK_ERASED: u8 = 0x05;
pub const STATUS_ERR_UNKNOWN: u8 = 0x0E;

pub const PACKET: usize = 32;

/// Builds the expected 6-byte GETSTATUS reply.
pub fn status(code: u8, state: u8) -> [u8; 6] {
    [code, 0, 0, 0, state, 0]
}

//
// Control endpoint
//

/// Endpoint state shared between the test and the session under test.
#[derive(Default)]
pub struct EpState {
    /// OUT packets the "host" has queued for the device.
    pub out_packets: VecDeque<Vec<u8>>,
    pub out_pos: usize,
    /// IN packets the device has completed.
    pub sent: Vec<Vec<u8>>,
    pub pending_in: Vec<u8>,
    pub setup_clears: usize,
    pub status_stage_clears: usize,
}

pub struct TestEndpoint {
    state: Rc<RefCell<EpState>>,
}

impl TestEndpoint {
    pub fn new() -> (Self, Rc<RefCell<EpState>>) {
        let state = Rc::new(RefCell::new(EpState::default()));
        (
            TestEndpoint {
                state: state.clone(),
            },
            state,
        )
    }
}

impl EndpointIO for TestEndpoint {
    const PACKET_SIZE: usize = PACKET;

    fn clear_setup(&mut self) {
        self.state.borrow_mut().setup_clears += 1;
    }

    fn wait_out_received(&mut self) {
        assert!(
            !self.state.borrow().out_packets.is_empty(),
            "waiting for an OUT packet the host never sent"
        );
    }

    fn read_byte(&mut self) -> u8 {
        let mut st = self.state.borrow_mut();
        let pos = st.out_pos;
        let value = {
            let packet = st.out_packets.front().expect("no OUT packet to read");
            assert!(pos < packet.len(), "read past the end of an OUT packet");
            packet[pos]
        };
        st.out_pos = pos + 1;
        value
    }

    fn read_word_le(&mut self) -> u16 {
        let lo = self.read_byte();
        let hi = self.read_byte();
        u16::from_le_bytes([lo, hi])
    }

    fn clear_out(&mut self) {
        let mut st = self.state.borrow_mut();
        st.out_packets.pop_front().expect("no OUT packet to ack");
        st.out_pos = 0;
    }

    fn wait_in_ready(&mut self) {}

    fn write_byte(&mut self, value: u8) {
        self.state.borrow_mut().pending_in.push(value);
    }

    fn write_word_le(&mut self, value: u16) {
        let bytes = value.to_le_bytes();
        self.write_byte(bytes[0]);
        self.write_byte(bytes[1]);
    }

    fn clear_in(&mut self) {
        let mut st = self.state.borrow_mut();
        let packet = std::mem::take(&mut st.pending_in);
        st.sent.push(packet);
    }

    fn clear_status_stage(&mut self) {
        self.state.borrow_mut().status_stage_clears += 1;
    }
}

//
// Memories
//

pub const FLASH_PAGE: u32 = 128;
pub const FLASH_BOOT_START: u32 = 0xF000;
pub const FLASH_SIZE: usize = 0x1_0000;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FlashOp {
    Erase(u32),
    Commit(u32),
    EnableRww,
}

/// Internal flash emulation: page buffer semantics, operation log.
pub struct TestFlash {
    pub memory: Vec<u8>,
    pub page_buffer: [u8; FLASH_PAGE as usize],
    pub ops: Vec<FlashOp>,
}

impl TestFlash {
    pub fn new() -> Self {
        TestFlash {
            memory: vec![0xFF; FLASH_SIZE],
            page_buffer: [0xFF; FLASH_PAGE as usize],
            ops: Vec::new(),
        }
    }

    pub fn erases(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, FlashOp::Erase(_)))
            .count()
    }

    pub fn commits(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, FlashOp::Commit(_)))
            .count()
    }
}

impl FlashIO for TestFlash {
    const PAGE_SIZE: u32 = FLASH_PAGE;
    const BOOT_START: u32 = FLASH_BOOT_START;

    fn erase_page(&mut self, address: u32) {
        let base = (address & !(FLASH_PAGE - 1)) as usize;
        self.memory[base..base + FLASH_PAGE as usize].fill(0xFF);
        self.ops.push(FlashOp::Erase(base as u32));
    }

    fn fill_word(&mut self, address: u32, word: u16) {
        let offset = (address % FLASH_PAGE) as usize;
        self.page_buffer[offset..offset + 2].copy_from_slice(&word.to_le_bytes());
    }

    fn write_page(&mut self, address: u32) {
        let base = (address & !(FLASH_PAGE - 1)) as usize;
        self.memory[base..base + FLASH_PAGE as usize].copy_from_slice(&self.page_buffer);
        self.ops.push(FlashOp::Commit(base as u32));
        // The temporary page buffer auto-erases after a commit.
        self.page_buffer = [0xFF; FLASH_PAGE as usize];
    }

    fn enable_rww(&mut self) {
        self.ops.push(FlashOp::EnableRww);
    }

    fn read_byte(&mut self, address: u32) -> u8 {
        self.memory[address as usize]
    }

    fn read_word(&mut self, address: u32) -> u16 {
        u16::from_le_bytes([
            self.memory[address as usize],
            self.memory[address as usize + 1],
        ])
    }
}

pub const EEPROM_SIZE: usize = 512;

/// EEPROM emulation, pattern-filled so erased and untouched cells differ.
pub struct TestEeprom {
    pub memory: [u8; EEPROM_SIZE],
    pub writes: usize,
}

impl TestEeprom {
    pub fn new() -> Self {
        let mut memory = [0u8; EEPROM_SIZE];
        for (i, cell) in memory.iter_mut().enumerate() {
            *cell = i as u8;
        }
        TestEeprom { memory, writes: 0 }
    }

    pub fn blank() -> Self {
        TestEeprom {
            memory: [0xFF; EEPROM_SIZE],
            writes: 0,
        }
    }
}

impl EepromIO for TestEeprom {
    const SIZE: u16 = EEPROM_SIZE as u16;

    fn write_byte(&mut self, address: u16, value: u8) {
        self.memory[address as usize] = value;
        self.writes += 1;
    }

    fn read_byte(&mut self, address: u16) -> u8 {
        self.memory[address as usize]
    }
}

pub const DF_PAGE: u32 = 64;
pub const DF_SIZE: usize = 0x2_0000;

/// Serial dataflash emulation: buffer-then-flush programming, sequential
/// continuous reads, select/deselect accounting.
pub struct TestDataflash {
    pub memory: Vec<u8>,
    pub buffer: [u8; DF_PAGE as usize],
    pub flushes: Vec<u32>,
    pub selects: usize,
    pub deselects: usize,
    pub chip_erased: bool,
    write_offset: u32,
    writing: bool,
    read_pos: usize,
    reading: bool,
}

impl TestDataflash {
    pub fn new() -> Self {
        TestDataflash {
            memory: vec![0xFF; DF_SIZE],
            buffer: [0xFF; DF_PAGE as usize],
            flushes: Vec::new(),
            selects: 0,
            deselects: 0,
            chip_erased: false,
            write_offset: 0,
            writing: false,
            read_pos: 0,
            reading: false,
        }
    }
}

impl DataflashIO for TestDataflash {
    const PAGE_SIZE: u32 = DF_PAGE;

    fn select(&mut self) {
        self.selects += 1;
    }

    fn deselect(&mut self) {
        self.deselects += 1;
        self.writing = false;
        self.reading = false;
    }

    fn begin_page_write(&mut self, page: u32, offset: u32) {
        // The page argument only matters at flush time; the buffer write
        // position is the offset.
        let _ = page;
        self.write_offset = offset;
        self.writing = true;
    }

    fn write_byte(&mut self, value: u8) {
        assert!(self.writing, "dataflash write outside a buffer session");
        self.buffer[self.write_offset as usize] = value;
        self.write_offset = (self.write_offset + 1) % DF_PAGE;
    }

    fn flush_page(&mut self, page: u32) {
        let base = (page * DF_PAGE) as usize;
        self.memory[base..base + DF_PAGE as usize].copy_from_slice(&self.buffer);
        self.flushes.push(page);
        self.writing = false;
    }

    fn begin_read(&mut self, page: u32, offset: u32) {
        self.read_pos = (page * DF_PAGE + offset) as usize;
        self.reading = true;
    }

    fn read_byte(&mut self) -> u8 {
        assert!(self.reading, "dataflash read outside a read session");
        let value = self.memory[self.read_pos];
        self.read_pos += 1;
        value
    }

    fn chip_erase(&mut self) {
        self.memory.fill(0xFF);
        self.chip_erased = true;
    }
}

/// Watchdog and application-jump hooks.
pub struct TestSystem {
    pub watchdog_armed: bool,
}

impl TestSystem {
    pub fn new() -> Self {
        TestSystem {
            watchdog_armed: false,
        }
    }
}

impl SystemIO for TestSystem {
    const MANUFACTURER_CODE: u8 = 0x1E;
    const FAMILY_CODE: u8 = 0x94;
    const PRODUCT_NAME: u8 = 0x13;
    const PRODUCT_REVISION: u8 = 0x14;

    fn arm_watchdog(&mut self) {
        self.watchdog_armed = true;
    }

    fn exit_to_application(&mut self, entry: u16) -> ! {
        // Emulate the jump out of the bootloader.
        panic!("application start at {:#06x}", entry);
    }
}

//
// Session factory and host-side helpers
//

pub type TestBoot = FlipBootloader<
    TestEndpoint,
    FlashTarget<TestFlash>,
    EepromTarget<TestEeprom>,
    DataflashTarget<TestDataflash>,
    TestSystem,
>;

pub fn boot() -> (TestBoot, Rc<RefCell<EpState>>) {
    boot_with(TestFlash::new(), TestEeprom::new(), TestDataflash::new())
}

pub fn boot_with(
    flash: TestFlash,
    eeprom: TestEeprom,
    dataflash: TestDataflash,
) -> (TestBoot, Rc<RefCell<EpState>>) {
    let (ep, handle) = TestEndpoint::new();
    let dfu = FlipBootloader::new(
        ep,
        FlashTarget::new(flash),
        EepromTarget::new(eeprom),
        DataflashTarget::new(dataflash),
        TestSystem::new(),
    );
    (dfu, handle)
}

pub fn class_out(request: u8, length: u16) -> Request {
    Request {
        direction: UsbDirection::Out,
        request_type: RequestType::Class,
        recipient: Recipient::Interface,
        request,
        value: 0,
        index: 0,
        length,
    }
}

pub fn class_in(request: u8, length: u16) -> Request {
    Request {
        direction: UsbDirection::In,
        request_type: RequestType::Class,
        recipient: Recipient::Interface,
        request,
        value: 0,
        index: 0,
        length,
    }
}

/// Queues one OUT data packet, padded to the packet size.
pub fn queue_packet(ep: &Rc<RefCell<EpState>>, data: &[u8]) {
    assert!(data.len() <= PACKET);
    let mut packet = data.to_vec();
    packet.resize(PACKET, 0);
    ep.borrow_mut().out_packets.push_back(packet);
}

/// Drains the IN packets captured so far.
pub fn take_sent(ep: &Rc<RefCell<EpState>>) -> Vec<Vec<u8>> {
    std::mem::take(&mut ep.borrow_mut().sent)
}

/// Builds a 5-byte FLIP payload: opcode plus a big-endian window.
pub fn window_payload(opcode: u8, start: u16, end: u16) -> [u8; 5] {
    let s = start.to_be_bytes();
    let e = end.to_be_bytes();
    [opcode, s[0], s[1], e[0], e[1]]
}

/// Submits one FLIP command envelope via DFU_DNLOAD.
pub fn dnload_command(dfu: &mut TestBoot, ep: &Rc<RefCell<EpState>>, group: u8, data: [u8; 5]) {
    let mut envelope = vec![group];
    envelope.extend_from_slice(&data);
    queue_packet(ep, &envelope);
    dfu.handle_control_request(&class_out(DFU_DNLOAD, 6));
}

/// Submits a download command followed by its data packets in one
/// control transfer.
pub fn download(
    dfu: &mut TestBoot,
    ep: &Rc<RefCell<EpState>>,
    opcode: u8,
    start: u16,
    end: u16,
    bytes: &[u8],
) {
    let mut envelope = vec![GROUP_DOWNLOAD];
    envelope.extend_from_slice(&window_payload(opcode, start, end));
    queue_packet(ep, &envelope);
    for chunk in bytes.chunks(PACKET) {
        queue_packet(ep, chunk);
    }
    dfu.handle_control_request(&class_out(DFU_DNLOAD, 6 + bytes.len() as u16));
}

/// Issues DFU_UPLOAD and returns the concatenated IN data.
pub fn upload(dfu: &mut TestBoot, ep: &Rc<RefCell<EpState>>, length: u16) -> Vec<u8> {
    take_sent(ep);
    dfu.handle_control_request(&class_in(DFU_UPLOAD, length));
    take_sent(ep).concat()
}

/// Issues DFU_GETSTATUS and returns the 6-byte reply.
pub fn get_status(dfu: &mut TestBoot, ep: &Rc<RefCell<EpState>>) -> [u8; 6] {
    dfu.handle_control_request(&class_in(DFU_GETSTATUS, 6));
    let reply = ep.borrow_mut().sent.pop().expect("no status reply");
    reply.try_into().expect("status reply is 6 bytes")
}

/// Issues DFU_GETSTATE and returns the raw reply.
pub fn get_state(dfu: &mut TestBoot, ep: &Rc<RefCell<EpState>>) -> Vec<u8> {
    dfu.handle_control_request(&class_in(DFU_GETSTATE, 1));
    ep.borrow_mut().sent.pop().expect("no state reply")
}
