//! Guest memory access.
//!
//! The CPU core owns emulated RAM; this crate only needs typed big-endian
//! access to it. `GuestMemory` is that seam. `StRam` is a flat implementation
//! used by the call harness and tests.

/// Guest address bus width mask (68000: 24 address lines).
pub const ADDRESS_MASK: u32 = 0x00FF_FFFF;

/// Typed, bounds-checked access to guest RAM.
///
/// Reads outside RAM return zero and writes outside RAM are dropped, as on a
/// bus with nothing mapped. Callers that must not silently lose data check
/// `validate_range` first.
pub trait GuestMemory {
    /// Return true if `len` bytes starting at `addr` are backed by RAM.
    fn validate_range(&self, addr: u32, len: u32) -> bool;

    /// Borrow a range of guest RAM. Returns None if the range is not valid.
    fn slice(&self, addr: u32, len: u32) -> Option<&[u8]>;

    /// Mutably borrow a range of guest RAM. Returns None if the range is not valid.
    fn slice_mut(&mut self, addr: u32, len: u32) -> Option<&mut [u8]>;

    fn read_u8(&self, addr: u32) -> u8 {
        self.slice(addr, 1).map(|b| b[0]).unwrap_or(0)
    }

    fn read_u16(&self, addr: u32) -> u16 {
        self.slice(addr, 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .unwrap_or(0)
    }

    fn read_u32(&self, addr: u32) -> u32 {
        self.slice(addr, 4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            .unwrap_or(0)
    }

    fn write_u8(&mut self, addr: u32, value: u8) {
        if let Some(b) = self.slice_mut(addr, 1) {
            b[0] = value;
        }
    }

    fn write_u16(&mut self, addr: u32, value: u16) {
        if let Some(b) = self.slice_mut(addr, 2) {
            b.copy_from_slice(&value.to_be_bytes());
        }
    }

    fn write_u32(&mut self, addr: u32, value: u32) {
        if let Some(b) = self.slice_mut(addr, 4) {
            b.copy_from_slice(&value.to_be_bytes());
        }
    }

    /// Copy guest bytes into `buf`. Returns false (and leaves `buf` untouched)
    /// if the range is not valid.
    fn read_bytes(&self, addr: u32, buf: &mut [u8]) -> bool {
        match self.slice(addr, buf.len() as u32) {
            Some(src) => {
                buf.copy_from_slice(src);
                true
            }
            None => false,
        }
    }

    /// Copy `data` into guest RAM. Returns false if the range is not valid.
    fn write_bytes(&mut self, addr: u32, data: &[u8]) -> bool {
        match self.slice_mut(addr, data.len() as u32) {
            Some(dst) => {
                dst.copy_from_slice(data);
                true
            }
            None => false,
        }
    }

    /// Read a NUL-terminated string of at most `max_len` bytes (terminator
    /// excluded). Returns None if no terminator is found in range.
    fn read_cstring(&self, addr: u32, max_len: u32) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        for i in 0..=max_len {
            let a = addr.checked_add(i)?;
            if !self.validate_range(a, 1) {
                return None;
            }
            match self.read_u8(a) {
                0 => return Some(out),
                b => out.push(b),
            }
        }
        None
    }

    /// Write `data` followed by a NUL terminator.
    fn write_cstring(&mut self, addr: u32, data: &[u8]) -> bool {
        if !self.validate_range(addr, data.len() as u32 + 1) {
            return false;
        }
        self.write_bytes(addr, data) && self.write_bytes(addr + data.len() as u32, &[0])
    }
}

/// Flat guest RAM starting at address 0.
#[derive(Clone)]
pub struct StRam {
    bytes: Vec<u8>,
}

impl StRam {
    /// Create zeroed RAM of `size` bytes (clamped to the 24-bit address space).
    pub fn new(size: usize) -> Self {
        let size = size.min(ADDRESS_MASK as usize + 1);
        Self {
            bytes: vec![0; size],
        }
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn range(&self, addr: u32, len: u32) -> Option<std::ops::Range<usize>> {
        let start = (addr & ADDRESS_MASK) as usize;
        let end = start.checked_add(len as usize)?;
        if end <= self.bytes.len() {
            Some(start..end)
        } else {
            None
        }
    }
}

impl GuestMemory for StRam {
    fn validate_range(&self, addr: u32, len: u32) -> bool {
        self.range(addr, len).is_some()
    }

    fn slice(&self, addr: u32, len: u32) -> Option<&[u8]> {
        let r = self.range(addr, len)?;
        Some(&self.bytes[r])
    }

    fn slice_mut(&mut self, addr: u32, len: u32) -> Option<&mut [u8]> {
        let r = self.range(addr, len)?;
        Some(&mut self.bytes[r])
    }
}
