//! Disk Transfer Address (DTA) implementation.
//!
//! The DTA is the guest-owned buffer that Fsfirst/Fsnext fill in. Its first
//! 21 bytes are reserved for the filesystem; we keep our cursor index and a
//! magic marker there so Fsnext can tell our searches from native ones.
//!
//! Layout (44 bytes):
//! - Bytes 0-1: Cursor table index (reserved area)
//! - Bytes 2-5: Magic marker (reserved area)
//! - Bytes 6-19: Search pattern (reserved area)
//! - Byte 20: Search attributes (reserved area)
//! - Byte 21: File attributes
//! - Bytes 22-23: Time stamp
//! - Bytes 24-25: Date stamp
//! - Bytes 26-29: File size
//! - Bytes 30-43: File name (NUL-terminated)

/// Marker written into the reserved area of DTAs populated by the host drive.
pub const DTA_MAGIC: u32 = 0x1298_3476;

/// Size of a DTA in bytes.
pub const DTA_SIZE: usize = 44;

/// Room for a NUL-terminated 8.3 name.
pub const DTA_NAME_LEN: usize = 14;

const OFF_INDEX: usize = 0;
const OFF_MAGIC: usize = 2;
const OFF_ATTRIB: usize = 21;
const OFF_TIME: usize = 22;
const OFF_DATE: usize = 24;
const OFF_SIZE: usize = 26;
const OFF_NAME: usize = 30;

/// Disk Transfer Address - view into a copy of guest memory.
pub struct Dta<'a> {
    mem: &'a mut [u8],
}

impl<'a> Dta<'a> {
    /// Create DTA from memory slice (must be at least 44 bytes).
    pub fn new(memory: &'a mut [u8]) -> Self {
        debug_assert!(memory.len() >= DTA_SIZE);
        Self { mem: memory }
    }

    fn word(&self, off: usize) -> u16 {
        u16::from_be_bytes([self.mem[off], self.mem[off + 1]])
    }

    fn set_word(&mut self, off: usize, v: u16) {
        self.mem[off..off + 2].copy_from_slice(&v.to_be_bytes());
    }

    fn long(&self, off: usize) -> u32 {
        u32::from_be_bytes([
            self.mem[off],
            self.mem[off + 1],
            self.mem[off + 2],
            self.mem[off + 3],
        ])
    }

    fn set_long(&mut self, off: usize, v: u32) {
        self.mem[off..off + 4].copy_from_slice(&v.to_be_bytes());
    }

    /// Cursor table index stored by Fsfirst.
    pub fn index(&self) -> u16 {
        self.word(OFF_INDEX)
    }

    pub fn set_index(&mut self, index: u16) {
        self.set_word(OFF_INDEX, index);
    }

    pub fn magic(&self) -> u32 {
        self.long(OFF_MAGIC)
    }

    pub fn set_magic(&mut self, magic: u32) {
        self.set_long(OFF_MAGIC, magic);
    }

    /// True if this DTA was last populated by the host drive.
    pub fn is_ours(&self) -> bool {
        self.magic() == DTA_MAGIC
    }

    /// Tag the DTA as ours, pointing at cursor table slot `index`.
    pub fn claim(&mut self, index: u16) {
        self.set_index(index);
        self.set_magic(DTA_MAGIC);
    }

    pub fn attrib(&self) -> u8 {
        self.mem[OFF_ATTRIB]
    }

    pub fn set_attrib(&mut self, attrib: u8) {
        self.mem[OFF_ATTRIB] = attrib;
    }

    pub fn time(&self) -> u16 {
        self.word(OFF_TIME)
    }

    pub fn set_time(&mut self, time: u16) {
        self.set_word(OFF_TIME, time);
    }

    pub fn date(&self) -> u16 {
        self.word(OFF_DATE)
    }

    pub fn set_date(&mut self, date: u16) {
        self.set_word(OFF_DATE, date);
    }

    pub fn size(&self) -> u32 {
        self.long(OFF_SIZE)
    }

    pub fn set_size(&mut self, size: u32) {
        self.set_long(OFF_SIZE, size);
    }

    /// File name (up to the NUL).
    pub fn name(&self) -> Vec<u8> {
        self.mem[OFF_NAME..OFF_NAME + DTA_NAME_LEN]
            .iter()
            .copied()
            .take_while(|&b| b != 0)
            .collect()
    }

    /// Set file name; truncated to 13 bytes and NUL-padded.
    pub fn set_name(&mut self, name: &[u8]) {
        let field = &mut self.mem[OFF_NAME..OFF_NAME + DTA_NAME_LEN];
        field.fill(0);
        let len = name.len().min(DTA_NAME_LEN - 1);
        field[..len].copy_from_slice(&name[..len]);
    }
}
