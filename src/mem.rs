//! Memory targets: one streamed-write/read discipline, three memories.
//!
//! The transfer loops in [`class`](crate::class) are target-agnostic.
//! Everything that differs between the internal flash, the internal
//! EEPROM and the external dataflash (page sizes, write granularity,
//! how a page is opened, filled and committed) is captured by
//! [`MemoryTarget`] and the three implementations here, each of which
//! drives the raw device primitives from [`io`](crate::io).

use crate::io::{DataflashIO, EepromIO, FlashIO};

/// A memory address space driven by the streamed transfer loops.
///
/// The write half follows a page cursor: the loop opens the stream once,
/// erases each page as the cursor enters it, commits each page as the
/// cursor leaves it (and the final, possibly partial, page when the
/// window closes), and closes the stream at the end. Targets with
/// `PAGE_SIZE` of 1 are byte-addressable; the loop skips the page hooks
/// entirely and the defaults below let such targets leave them out.
pub trait MemoryTarget {
    /// Erase/program page size in bytes. `1` means no page bookkeeping.
    const PAGE_SIZE: u32;

    /// Bytes moved per transfer step: 2 for word-programmed memories,
    /// 1 otherwise.
    const GRAIN: u32 = 1;

    /// Called once before the first byte of a streamed write.
    fn open_write(&mut self, _address: u32) {}

    /// Erase the page the cursor just entered.
    fn erase_page(&mut self, _address: u32) {}

    /// Write one grain. `data` holds `GRAIN` bytes, least significant
    /// first.
    fn write(&mut self, address: u32, data: &[u8]);

    /// Commit the page containing `address`; the cursor has left it.
    fn commit_page(&mut self, _address: u32) {}

    /// Called once after the last commit of a streamed write.
    fn close_write(&mut self) {}

    /// Called once before the first byte of a streamed read or scan.
    fn open_read(&mut self, _address: u32) {}

    /// Read one byte.
    fn read_byte(&mut self, address: u32) -> u8;

    /// Read one word, least significant byte first.
    fn read_word(&mut self, address: u32) -> u16 {
        u16::from_le_bytes([self.read_byte(address), self.read_byte(address + 1)])
    }

    /// Called once after a streamed read or scan.
    fn close_read(&mut self) {}

    /// Erase the whole target.
    fn erase_all(&mut self);
}

/// Internal program memory, word-programmed through the page buffer.
pub struct FlashTarget<F: FlashIO> {
    io: F,
}

impl<F: FlashIO> FlashTarget<F> {
    /// Wraps the self-programming primitives.
    pub fn new(io: F) -> Self {
        FlashTarget { io }
    }

    /// Borrow the underlying primitives.
    pub fn io(&self) -> &F {
        &self.io
    }
}

impl<F: FlashIO> MemoryTarget for FlashTarget<F> {
    const PAGE_SIZE: u32 = F::PAGE_SIZE;
    const GRAIN: u32 = 2;

    fn erase_page(&mut self, address: u32) {
        self.io.erase_page(address);
        // Erasing locks out the RWW section; unlock it right away so
        // code can keep executing while the page streams in.
        self.io.enable_rww();
    }

    fn write(&mut self, address: u32, data: &[u8]) {
        self.io
            .fill_word(address, u16::from_le_bytes([data[0], data[1]]));
    }

    fn commit_page(&mut self, address: u32) {
        self.io.write_page(address);
        // Writing locks it out as well.
        self.io.enable_rww();
    }

    fn read_byte(&mut self, address: u32) -> u8 {
        self.io.read_byte(address)
    }

    fn read_word(&mut self, address: u32) -> u16 {
        self.io.read_word(address)
    }

    fn erase_all(&mut self) {
        let mut address = 0;
        while address < F::BOOT_START {
            self.io.erase_page(address);
            address += F::PAGE_SIZE;
        }
        self.io.enable_rww();
    }
}

/// Internal EEPROM, byte-addressable with no paging.
pub struct EepromTarget<E: EepromIO> {
    io: E,
}

impl<E: EepromIO> EepromTarget<E> {
    /// Wraps the EEPROM cell primitives.
    pub fn new(io: E) -> Self {
        EepromTarget { io }
    }

    /// Borrow the underlying primitives.
    pub fn io(&self) -> &E {
        &self.io
    }
}

impl<E: EepromIO> MemoryTarget for EepromTarget<E> {
    const PAGE_SIZE: u32 = 1;

    fn write(&mut self, address: u32, data: &[u8]) {
        self.io.write_byte(address as u16, data[0]);
    }

    fn read_byte(&mut self, address: u32) -> u8 {
        self.io.read_byte(address as u16)
    }

    fn erase_all(&mut self) {
        for address in 0..E::SIZE {
            self.io.write_byte(address, 0xFF);
        }
    }
}

/// External serial dataflash, programmed through the device's page
/// buffer.
///
/// Bytes stream into the buffer at the cursor's intra-page offset; a
/// commit moves the buffer into the main array with the erase folded in.
/// The buffer-write session ends with each flush, so the next write
/// reopens it at whatever page the cursor is in by then.
pub struct DataflashTarget<D: DataflashIO> {
    io: D,
    writing: bool,
}

impl<D: DataflashIO> DataflashTarget<D> {
    /// Wraps the dataflash bus primitives.
    pub fn new(io: D) -> Self {
        DataflashTarget { io, writing: false }
    }

    /// Borrow the underlying primitives.
    pub fn io(&self) -> &D {
        &self.io
    }
}

impl<D: DataflashIO> MemoryTarget for DataflashTarget<D> {
    const PAGE_SIZE: u32 = D::PAGE_SIZE;

    fn open_write(&mut self, address: u32) {
        self.io.select();
        self.io
            .begin_page_write(address / D::PAGE_SIZE, address % D::PAGE_SIZE);
        self.writing = true;
    }

    fn write(&mut self, address: u32, data: &[u8]) {
        if !self.writing {
            self.io
                .begin_page_write(address / D::PAGE_SIZE, address % D::PAGE_SIZE);
            self.writing = true;
        }
        for byte in data {
            self.io.write_byte(*byte);
        }
    }

    fn commit_page(&mut self, address: u32) {
        self.io.flush_page(address / D::PAGE_SIZE);
        self.writing = false;
    }

    fn close_write(&mut self) {
        self.io.deselect();
        self.writing = false;
    }

    fn open_read(&mut self, address: u32) {
        self.io.select();
        self.io
            .begin_read(address / D::PAGE_SIZE, address % D::PAGE_SIZE);
    }

    fn read_byte(&mut self, _address: u32) -> u8 {
        self.io.read_byte()
    }

    fn close_read(&mut self) {
        self.io.deselect();
    }

    fn erase_all(&mut self) {
        self.io.select();
        self.io.chip_erase();
        self.io.deselect();
    }
}
