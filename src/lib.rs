#![no_std]
#![warn(missing_docs)]
//!
//! Implements the FLIP vendor flavour of the USB DFU bootloader protocol
//! for a `usb-device` device.
//!
//! ## About
//!
//! Parts that ship with a USB bootloader in a reserved flash section talk
//! to host flashing tools over the standard DFU control requests, with
//! the actual operations carried as 6-byte vendor ("FLIP") command
//! envelopes inside `DFU_DNLOAD` payloads. This crate implements that
//! protocol: the DFU class state machine, the command decoder, and the
//! streamed transfer discipline that programs, reads back and
//! blank-checks three different memories through one uniform interface.
//!
//! The memories are the internal program flash (word-programmed through
//! a page buffer), the internal EEPROM (byte-addressable) and an
//! external SPI dataflash (programmed through the device's own page
//! buffer). Addresses above 64KB are reached by selecting a page bank
//! that extends the 16-bit window fields carried in the commands.
//!
//! This library is a protocol implementation only. Endpoint register
//! access, the raw flash/EEPROM/dataflash cell primitives and the
//! watchdog/application-jump hooks are not part of the library and are
//! provided by its user through the capability traits in [`io`].
//!
//! ### Supported operations
//!
//! * Program flash, EEPROM or dataflash over a streamed address window
//! * Read any of the three memories back to the host
//! * Blank-check a window and report the first non-blank address
//! * Erase one whole target, or start the application (watchdog reset or
//!   direct jump)
//! * Read bootloader and device identity bytes
//! * Select the 64KB page bank for large targets
//!
//! ### Limitations
//!
//! * One control data packet is `EndpointIO::PACKET_SIZE` bytes (32 by
//!   default); the host is expected to pad packets to that size.
//! * Streamed transfers block inside
//!   [`handle_control_request`](crate::class::FlipBootloader::handle_control_request)
//!   until the window is exhausted. Nothing else needs the CPU while an
//!   update session runs, so the busy-waits are deliberate.
//! * `iString` in `DFU_GETSTATUS` is always `0`.
//!
//! ## Example
//!
//! The boilerplate below stubs the hardware out; each trait is
//! implemented by board support code driving real registers.
//!
//! ```no_run
//! use usbd_dfu_flip::*;
//!
//! struct Ep0;
//! impl EndpointIO for Ep0 {
//!     const PACKET_SIZE: usize = 32;
//!     fn clear_setup(&mut self) { todo!() }
//!     fn wait_out_received(&mut self) { todo!() }
//!     fn read_byte(&mut self) -> u8 { todo!() }
//!     fn read_word_le(&mut self) -> u16 { todo!() }
//!     fn clear_out(&mut self) { todo!() }
//!     fn wait_in_ready(&mut self) { todo!() }
//!     fn write_byte(&mut self, _: u8) { todo!() }
//!     fn write_word_le(&mut self, _: u16) { todo!() }
//!     fn clear_in(&mut self) { todo!() }
//!     fn clear_status_stage(&mut self) { todo!() }
//! }
//!
//! struct Spm;
//! impl FlashIO for Spm {
//!     const PAGE_SIZE: u32 = 128;
//!     const BOOT_START: u32 = 0xF000;
//!     fn erase_page(&mut self, _: u32) { todo!() }
//!     fn fill_word(&mut self, _: u32, _: u16) { todo!() }
//!     fn write_page(&mut self, _: u32) { todo!() }
//!     fn enable_rww(&mut self) { todo!() }
//!     fn read_byte(&mut self, _: u32) -> u8 { todo!() }
//!     fn read_word(&mut self, _: u32) -> u16 { todo!() }
//! }
//!
//! struct Cells;
//! impl EepromIO for Cells {
//!     fn write_byte(&mut self, _: u16, _: u8) { todo!() }
//!     fn read_byte(&mut self, _: u16) -> u8 { todo!() }
//! }
//!
//! struct At45;
//! impl DataflashIO for At45 {
//!     const PAGE_SIZE: u32 = 264;
//!     fn select(&mut self) { todo!() }
//!     fn deselect(&mut self) { todo!() }
//!     fn begin_page_write(&mut self, _: u32, _: u32) { todo!() }
//!     fn write_byte(&mut self, _: u8) { todo!() }
//!     fn flush_page(&mut self, _: u32) { todo!() }
//!     fn begin_read(&mut self, _: u32, _: u32) { todo!() }
//!     fn read_byte(&mut self) -> u8 { todo!() }
//!     fn chip_erase(&mut self) { todo!() }
//! }
//!
//! struct Board;
//! impl SystemIO for Board {
//!     const MANUFACTURER_CODE: u8 = 0x1E;
//!     const FAMILY_CODE: u8 = 0x94;
//!     const PRODUCT_NAME: u8 = 0x13;
//!     const PRODUCT_REVISION: u8 = 0x14;
//!     fn arm_watchdog(&mut self) { todo!() }
//!     fn exit_to_application(&mut self, _: u16) -> ! { todo!() }
//! }
//!
//! let mut dfu = FlipBootloader::new(
//!     Ep0,
//!     FlashTarget::new(Spm),
//!     EepromTarget::new(Cells),
//!     DataflashTarget::new(At45),
//!     Board,
//! );
//!
//! // Hand every class request addressed to the DFU interface over,
//! // straight from the USB stack's control-request hook:
//! //
//! //     dfu.handle_control_request(&request);
//! # let _ = &mut dfu;
//! ```
//!

pub mod class;
pub mod command;
pub mod io;
pub mod mem;
pub mod state;

#[doc(inline)]
pub use crate::class::FlipBootloader;
#[doc(inline)]
pub use crate::command::{AddressWindow, CommandGroup, FlipCommand};
#[doc(inline)]
pub use crate::io::{DataflashIO, EepromIO, EndpointIO, FlashIO, SystemIO};
#[doc(inline)]
pub use crate::mem::{DataflashTarget, EepromTarget, FlashTarget, MemoryTarget};
#[doc(inline)]
pub use crate::state::{DFUState, DFUStatus, DFUStatusCode};
