//! Capability traits for the hardware the bootloader drives.
//!
//! The protocol core is hardware-agnostic: everything it needs from the
//! control endpoint, the three memories, and the rest of the part is
//! expressed here and implemented by board support code. All operations
//! block until the hardware has finished. The bootloader is the only
//! thing running, so a tight wait on a ready flag is the correct
//! suspension primitive and nothing here returns before completion.

/// Control-endpoint primitives used to move packets during a request.
///
/// This is the endpoint-level view of EP0: the USB stack decodes the SETUP
/// packet and hands the request to [`FlipBootloader`](crate::FlipBootloader),
/// which then exchanges the OUT/IN data packets of the transfer itself
/// through this trait.
pub trait EndpointIO {
    /// Size in bytes of one control data packet.
    ///
    /// Must match the endpoint 0 bank size the descriptors advertise.
    const PACKET_SIZE: usize = 32;

    /// Acknowledge the SETUP packet of the current request.
    fn clear_setup(&mut self);

    /// Block until the next OUT data packet has been received.
    fn wait_out_received(&mut self);

    /// Read the next byte from the received OUT packet.
    fn read_byte(&mut self) -> u8;

    /// Read the next two bytes from the received OUT packet, little-endian.
    fn read_word_le(&mut self) -> u16;

    /// Release the OUT bank, discarding any unread bytes, and ready it for
    /// the next packet.
    fn clear_out(&mut self);

    /// Block until the IN bank may be filled.
    fn wait_in_ready(&mut self);

    /// Append one byte to the IN bank.
    fn write_byte(&mut self, value: u8);

    /// Append two bytes to the IN bank, little-endian.
    fn write_word_le(&mut self, value: u16);

    /// Send the IN bank to the host.
    fn clear_in(&mut self);

    /// Complete the status stage of the current control transfer.
    fn clear_status_stage(&mut self);
}

/// Self-programming primitives of the internal program memory.
///
/// Programming goes through the part's page buffer: words are loaded with
/// [`fill_word`](FlashIO::fill_word) and hit the array only on
/// [`write_page`](FlashIO::write_page). Erase and write lock the
/// read-while-write section until [`enable_rww`](FlashIO::enable_rww) is
/// called.
pub trait FlashIO {
    /// Erase/program page size in bytes.
    const PAGE_SIZE: u32;

    /// First address of the bootloader section. Erase-all stops here.
    const BOOT_START: u32;

    /// Erase the page containing `address` and wait for completion.
    fn erase_page(&mut self, address: u32);

    /// Load one word into the page buffer at `address`.
    fn fill_word(&mut self, address: u32, word: u16);

    /// Program the page buffer into the page containing `address` and wait
    /// for completion.
    fn write_page(&mut self, address: u32);

    /// Re-enable the read-while-write section.
    fn enable_rww(&mut self);

    /// Read one byte of program memory.
    fn read_byte(&mut self, address: u32) -> u8;

    /// Read one word of program memory.
    fn read_word(&mut self, address: u32) -> u16;
}

/// Byte-addressable internal EEPROM.
pub trait EepromIO {
    /// Capacity in bytes.
    const SIZE: u16 = 512;

    /// Write one byte and wait until the cell has settled.
    fn write_byte(&mut self, address: u16, value: u8);

    /// Read one byte.
    fn read_byte(&mut self, address: u16) -> u8;
}

/// SPI-attached serial dataflash with an internal page buffer.
///
/// The device cannot program single bytes: writes are staged into its
/// buffer and moved to the main array one page at a time, with the erase
/// folded into the transfer. Command framing (opcodes, chip-select
/// pulsing, busy polling) stays with the implementation; each operation
/// here returns only once the device has finished it.
pub trait DataflashIO {
    /// Main-memory page size in bytes.
    const PAGE_SIZE: u32;

    /// Assert chip select.
    fn select(&mut self);

    /// Release chip select.
    fn deselect(&mut self);

    /// Open the internal buffer for writing at `offset` within `page`.
    fn begin_page_write(&mut self, page: u32, offset: u32);

    /// Stream one byte into the open buffer-write session.
    fn write_byte(&mut self, value: u8);

    /// Program the buffer into `page`, erasing it first, and wait until
    /// the device is idle again. Ends the buffer-write session.
    fn flush_page(&mut self, page: u32);

    /// Start a continuous array read at `offset` within `page`.
    fn begin_read(&mut self, page: u32, offset: u32);

    /// Clock one byte out of the open read session.
    fn read_byte(&mut self) -> u8;

    /// Issue the global chip-erase command sequence and wait until the
    /// device is idle again.
    fn chip_erase(&mut self);
}

/// Reset control and identity data of the part the bootloader runs on.
pub trait SystemIO {
    /// Bootloader version byte, major nibble then minor nibble.
    const BOOTLOADER_VERSION: u8 = 0x20;

    /// First bootloader identifier byte.
    const BOOTLOADER_ID1: u8 = 0xDC;

    /// Second bootloader identifier byte.
    const BOOTLOADER_ID2: u8 = 0xFB;

    /// Manufacturer code reported by the Read command.
    const MANUFACTURER_CODE: u8;

    /// Device family code reported by the Read command.
    const FAMILY_CODE: u8;

    /// Product name code reported by the Read command.
    const PRODUCT_NAME: u8;

    /// Product revision code reported by the Read command.
    const PRODUCT_REVISION: u8;

    /// Arm a short watchdog timeout. The part resets and vectors into the
    /// application once the host closes the session.
    fn arm_watchdog(&mut self);

    /// Tear down USB and the memory transports, restore the interrupt
    /// vectors, and jump to the application at `entry`.
    fn exit_to_application(&mut self, entry: u16) -> !;
}
