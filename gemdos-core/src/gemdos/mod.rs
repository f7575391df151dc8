//! GEMDOS call interception ABI.
//!
//! Call numbers, guest constants, and the plumbing that turns a trapped
//! `TRAP #1` into a parameter block address.

pub mod dta;

pub use dta::Dta;

use crate::memory::GuestMemory;

/// GEMDOS function numbers serviced (or observed) by the host drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum GemdosCall {
    /// 0x0E: Set current drive
    Dsetdrv = 0x0E,
    /// 0x1A: Set disk transfer address
    Fsetdta = 0x1A,
    /// 0x36: Get free disk space
    Dfree = 0x36,
    /// 0x39: Create directory
    Dcreate = 0x39,
    /// 0x3A: Delete directory
    Ddelete = 0x3A,
    /// 0x3B: Set current directory
    Dsetpath = 0x3B,
    /// 0x3C: Create file
    Fcreate = 0x3C,
    /// 0x3D: Open file
    Fopen = 0x3D,
    /// 0x3E: Close file
    Fclose = 0x3E,
    /// 0x3F: Read file
    Fread = 0x3F,
    /// 0x40: Write file
    Fwrite = 0x40,
    /// 0x41: Delete file
    Fdelete = 0x41,
    /// 0x42: Seek
    Fseek = 0x42,
    /// 0x43: Get/set file attributes
    Fattrib = 0x43,
    /// 0x47: Get current directory
    Dgetpath = 0x47,
    /// 0x4B: Load/execute program
    Pexec = 0x4B,
    /// 0x4E: Search first
    Fsfirst = 0x4E,
    /// 0x4F: Search next
    Fsnext = 0x4F,
    /// 0x56: Rename
    Frename = 0x56,
    /// 0x57: Get/set file date and time
    Fdatime = 0x57,
}

impl TryFrom<u16> for GemdosCall {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0E => Ok(Self::Dsetdrv),
            0x1A => Ok(Self::Fsetdta),
            0x36 => Ok(Self::Dfree),
            0x39 => Ok(Self::Dcreate),
            0x3A => Ok(Self::Ddelete),
            0x3B => Ok(Self::Dsetpath),
            0x3C => Ok(Self::Fcreate),
            0x3D => Ok(Self::Fopen),
            0x3E => Ok(Self::Fclose),
            0x3F => Ok(Self::Fread),
            0x40 => Ok(Self::Fwrite),
            0x41 => Ok(Self::Fdelete),
            0x42 => Ok(Self::Fseek),
            0x43 => Ok(Self::Fattrib),
            0x47 => Ok(Self::Dgetpath),
            0x4B => Ok(Self::Pexec),
            0x4E => Ok(Self::Fsfirst),
            0x4F => Ok(Self::Fsnext),
            0x56 => Ok(Self::Frename),
            0x57 => Ok(Self::Fdatime),
            _ => Err(value),
        }
    }
}

/// File attribute bits.
pub mod attrib {
    pub const READONLY: u8 = 0x01;
    pub const HIDDEN: u8 = 0x02;
    pub const SYSTEM: u8 = 0x04;
    pub const VOLUME_LABEL: u8 = 0x08;
    pub const SUBDIRECTORY: u8 = 0x10;
    pub const ARCHIVE: u8 = 0x20;
}

/// Guest memory addresses and sizes.
pub mod addr {
    /// GEMDOS (TRAP #1) exception vector.
    pub const GEMDOS_VECTOR: u32 = 0x0084;
    /// Offset of the DTA pointer inside a basepage.
    pub const BASEPAGE_DTA: u32 = 32;
    /// TOS 1.00 location of the current-process pointer.
    pub const TOS100_ACT_PD: u32 = 0x602C;
    /// Spanish TOS 1.00 location of the current-process pointer.
    pub const TOS100_ES_ACT_PD: u32 = 0x873C;
    /// Offset in the TOS header of the current-process pointer address (TOS > 1.00).
    pub const TOS_HEADER_ACT_PD: u32 = 0x28;
    /// Offset in the TOS header of the country/palmode word.
    pub const TOS_HEADER_COUNTRY: u32 = 28;
    /// Longest guest path accepted from a call argument.
    pub const MAX_GUEST_PATH: u32 = 255;
}

/// Status register bits consulted or set by the trap glue.
pub mod sr {
    pub const SUPERVISOR: u16 = 0x2000;
    pub const NEGATIVE: u16 = 0x0008;
    pub const ZERO: u16 = 0x0004;
    pub const OVERFLOW: u16 = 0x0002;
}

/// Size in bytes of a GEMDOS word argument.
pub const SIZE_WORD: u32 = 2;
/// Size in bytes of a GEMDOS long argument.
pub const SIZE_LONG: u32 = 4;

/// Outcome of one intercepted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// Fully serviced; the value goes to D0 and the native handler is skipped.
    Handled(i32),
    /// Not ours; the native handler runs unmodified.
    NotHandled,
    /// Program load from the emulated drive: branch through the native
    /// trampoline before returning to the native loader.
    HandledWithRedirect,
}

impl CallOutcome {
    /// Condition codes the trap glue branches on (N = run native, Z = done,
    /// V = go through the Pexec trampoline).
    pub fn condition_codes(self) -> u16 {
        match self {
            CallOutcome::NotHandled => sr::NEGATIVE,
            CallOutcome::Handled(_) => sr::NEGATIVE | sr::ZERO,
            CallOutcome::HandledWithRedirect => sr::NEGATIVE | sr::OVERFLOW,
        }
    }

    /// D0 value for handled calls.
    pub fn result(self) -> Option<i32> {
        match self {
            CallOutcome::Handled(d0) => Some(d0),
            _ => None,
        }
    }
}

/// CPU state at the moment of the trap, as provided by the CPU glue.
#[derive(Debug, Clone, Copy)]
pub struct TrapFrame {
    /// Supervisor stack pointer (points at the saved SR).
    pub a7: u32,
    /// User stack pointer.
    pub usp: u32,
    /// CPU model level (0 = 68000, 1 = 68010, ...).
    pub cpu_level: u8,
}

impl TrapFrame {
    /// Resolve where the caller pushed its arguments.
    ///
    /// The saved SR tells whether the caller ran in user mode (arguments on
    /// the user stack) or supervisor mode (arguments above the exception
    /// frame, which carries an extra format word on 68010+).
    pub fn params_base<M: GuestMemory>(&self, mem: &M) -> u32 {
        let saved_sr = mem.read_u16(self.a7);
        if saved_sr & sr::SUPERVISOR == 0 {
            self.usp
        } else {
            let mut base = self.a7 + SIZE_WORD + SIZE_LONG;
            if self.cpu_level > 0 {
                base += SIZE_WORD;
            }
            base
        }
    }
}

/// Call-parameter fetcher over a trapped call's argument block.
///
/// Offsets are relative to the call-number word; the first argument is at
/// offset 2.
#[derive(Debug, Clone, Copy)]
pub struct CallParams {
    base: u32,
}

impl CallParams {
    pub fn new(base: u32) -> Self {
        Self { base }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// The call number itself.
    pub fn opcode<M: GuestMemory>(&self, mem: &M) -> u16 {
        mem.read_u16(self.base)
    }

    pub fn word<M: GuestMemory>(&self, mem: &M, offset: u32) -> u16 {
        mem.read_u16(self.base.wrapping_add(offset))
    }

    pub fn long<M: GuestMemory>(&self, mem: &M, offset: u32) -> u32 {
        mem.read_u32(self.base.wrapping_add(offset))
    }

    /// Fetch a pointer argument and read the NUL-terminated guest string it
    /// points to.
    pub fn string<M: GuestMemory>(&self, mem: &M, offset: u32) -> Option<String> {
        let ptr = self.long(mem, offset);
        let bytes = mem.read_cstring(ptr, addr::MAX_GUEST_PATH)?;
        Some(guest_to_string(&bytes))
    }
}

/// Decode guest 8-bit text. ASCII passes through; other bytes map to the
/// Latin-1 code point with the same value.
pub fn guest_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Encode text for the guest, replacing anything outside Latin-1 with '_'.
pub fn string_to_guest(s: &str) -> Vec<u8> {
    s.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'_'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::StRam;

    #[test]
    fn test_call_numbers() {
        assert_eq!(GemdosCall::try_from(0x3D), Ok(GemdosCall::Fopen));
        assert_eq!(GemdosCall::try_from(0x4F), Ok(GemdosCall::Fsnext));
        assert_eq!(GemdosCall::try_from(0x01), Err(0x01));
        assert_eq!(GemdosCall::Fdatime as u16, 0x57);
    }

    #[test]
    fn test_params_base_user_mode() {
        let mut ram = StRam::new(0x1000);
        ram.write_u16(0x800, 0x0300);
        let frame = TrapFrame {
            a7: 0x800,
            usp: 0x400,
            cpu_level: 0,
        };
        assert_eq!(frame.params_base(&ram), 0x400);
    }

    #[test]
    fn test_params_base_supervisor_mode() {
        let mut ram = StRam::new(0x1000);
        ram.write_u16(0x800, 0x2300);
        let mut frame = TrapFrame {
            a7: 0x800,
            usp: 0x400,
            cpu_level: 0,
        };
        assert_eq!(frame.params_base(&ram), 0x806);

        frame.cpu_level = 2;
        assert_eq!(frame.params_base(&ram), 0x808);
    }

    #[test]
    fn test_call_params() {
        let mut ram = StRam::new(0x100);
        ram.write_u16(0x10, 0x3D);
        ram.write_u32(0x12, 0x40);
        ram.write_u16(0x16, 2);
        ram.write_cstring(0x40, b"C:\\TEST.TXT");

        let params = CallParams::new(0x10);
        assert_eq!(params.opcode(&ram), 0x3D);
        assert_eq!(params.word(&ram, 6), 2);
        assert_eq!(params.string(&ram, 2).as_deref(), Some("C:\\TEST.TXT"));
    }

    #[test]
    fn test_condition_codes() {
        assert_eq!(CallOutcome::NotHandled.condition_codes(), sr::NEGATIVE);
        assert_ne!(CallOutcome::Handled(0).condition_codes() & sr::ZERO, 0);
        assert_ne!(
            CallOutcome::HandledWithRedirect.condition_codes() & sr::OVERFLOW,
            0
        );
        assert_eq!(CallOutcome::Handled(-33).result(), Some(-33));
        assert_eq!(CallOutcome::NotHandled.result(), None);
    }

    #[test]
    fn test_latin1_round_trip() {
        let bytes = [b'A', 0xE9, b'.', b'T'];
        let s = guest_to_string(&bytes);
        assert_eq!(s, "A\u{e9}.T");
        assert_eq!(string_to_guest(&s), bytes.to_vec());
        assert_eq!(string_to_guest("\u{263A}"), vec![b'_']);
    }
}
