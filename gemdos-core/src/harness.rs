//! Guest-side call harness.
//!
//! Stands in for a booted machine: a flat RAM with a TOS header, a running
//! process whose basepage carries the DTA, and a scratch parameter block. Each
//! method pushes a GEMDOS call the way a program would and traps it through
//! [`GemdosEmulator::handle_trap`].

use crate::config::GemdosConfig;
use crate::emulator::GemdosEmulator;
use crate::error::GemdosResult;
use crate::gemdos::dta::DTA_SIZE;
use crate::gemdos::{addr, guest_to_string, string_to_guest, CallOutcome, GemdosCall, TrapFrame};
use crate::memory::{GuestMemory, StRam};

/// Guest RAM layout used by the harness.
pub mod layout {
    pub const RAM_SIZE: usize = 0x0100_0000;
    pub const TOS_BASE: u32 = 0x00E0_0000;
    pub const TOS_VERSION: u16 = 0x0206;
    pub const NATIVE_GEMDOS: u32 = 0x00E0_1000;
    pub const ACT_PD: u32 = 0x4000;
    pub const BASEPAGE: u32 = 0x5000;
    pub const DTA: u32 = 0x5100;
    pub const PARAMS: u32 = 0x6000;
    pub const SUPER_STACK: u32 = 0x7000;
    pub const STRING_A: u32 = 0x8000;
    pub const STRING_B: u32 = 0x8200;
    pub const BUFFER: u32 = 0x10000;
    pub const BUFFER_SIZE: u32 = 0x10000;
}

/// One stacked argument.
#[derive(Debug, Clone, Copy)]
pub enum Arg {
    Word(u16),
    Long(u32),
}

/// A booted guest driving a [`GemdosEmulator`].
pub struct GuestHarness {
    emulator: GemdosEmulator,
    ram: StRam,
}

impl GuestHarness {
    /// Build the guest, create the emulator and boot it.
    pub fn new(config: GemdosConfig) -> GemdosResult<Self> {
        let mut ram = StRam::new(layout::RAM_SIZE);
        ram.write_u32(addr::GEMDOS_VECTOR, layout::NATIVE_GEMDOS);
        ram.write_u32(layout::TOS_BASE + addr::TOS_HEADER_ACT_PD, layout::ACT_PD);
        ram.write_u32(layout::ACT_PD, layout::BASEPAGE);
        ram.write_u32(layout::BASEPAGE + addr::BASEPAGE_DTA, layout::DTA);
        // User mode SR in the exception frame
        ram.write_u16(layout::SUPER_STACK, 0x0300);

        let mut harness = Self {
            emulator: GemdosEmulator::new(config)?,
            ram,
        };
        harness.boot();
        Ok(harness)
    }

    /// Re-run the boot hook, as the machine does after a reset.
    pub fn boot(&mut self) {
        self.emulator
            .boot(&mut self.ram, layout::TOS_BASE, layout::TOS_VERSION);
    }

    pub fn emulator(&self) -> &GemdosEmulator {
        &self.emulator
    }

    pub fn emulator_mut(&mut self) -> &mut GemdosEmulator {
        &mut self.emulator
    }

    pub fn ram(&self) -> &StRam {
        &self.ram
    }

    pub fn ram_mut(&mut self) -> &mut StRam {
        &mut self.ram
    }

    /// Push a call and its arguments and trap it.
    pub fn raw_call(&mut self, opcode: u16, args: &[Arg]) -> CallOutcome {
        let mut at = layout::PARAMS;
        self.ram.write_u16(at, opcode);
        at += 2;
        for arg in args {
            match *arg {
                Arg::Word(w) => {
                    self.ram.write_u16(at, w);
                    at += 2;
                }
                Arg::Long(l) => {
                    self.ram.write_u32(at, l);
                    at += 4;
                }
            }
        }
        let frame = TrapFrame {
            a7: layout::SUPER_STACK,
            usp: layout::PARAMS,
            cpu_level: 0,
        };
        self.emulator.handle_trap(&mut self.ram, frame)
    }

    fn call(&mut self, call: GemdosCall, args: &[Arg]) -> CallOutcome {
        self.raw_call(call as u16, args)
    }

    fn put_string(&mut self, at: u32, s: &str) -> u32 {
        self.ram.write_cstring(at, &string_to_guest(s));
        at
    }

    /// Point the running process's basepage at another DTA.
    pub fn set_process_dta(&mut self, dta: u32) {
        self.ram.write_u32(layout::BASEPAGE + addr::BASEPAGE_DTA, dta);
    }

    /// The DTA the running process currently uses.
    pub fn process_dta(&self) -> u32 {
        self.ram.read_u32(layout::BASEPAGE + addr::BASEPAGE_DTA)
    }

    /// Raw bytes of the process DTA.
    pub fn dta_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0; DTA_SIZE];
        self.ram.read_bytes(self.process_dta(), &mut buf);
        buf
    }

    /// Name field of the process DTA.
    pub fn dta_name(&self) -> String {
        let bytes = self.dta_bytes();
        let name: Vec<u8> = bytes[30..].iter().copied().take_while(|&b| b != 0).collect();
        guest_to_string(&name)
    }

    pub fn dta_attrib(&self) -> u8 {
        self.dta_bytes()[21]
    }

    pub fn dta_size(&self) -> u32 {
        self.ram.read_u32(self.process_dta() + 26)
    }

    pub fn fsetdta(&mut self, dta: u32) -> CallOutcome {
        self.call(GemdosCall::Fsetdta, &[Arg::Long(dta)])
    }

    pub fn dsetdrv(&mut self, drive: u16) -> CallOutcome {
        self.call(GemdosCall::Dsetdrv, &[Arg::Word(drive)])
    }

    pub fn fsfirst(&mut self, name: &str, attr: u16) -> CallOutcome {
        let p = self.put_string(layout::STRING_A, name);
        self.call(GemdosCall::Fsfirst, &[Arg::Long(p), Arg::Word(attr)])
    }

    pub fn fsnext(&mut self) -> CallOutcome {
        self.call(GemdosCall::Fsnext, &[])
    }

    pub fn fopen(&mut self, name: &str, mode: u16) -> CallOutcome {
        let p = self.put_string(layout::STRING_A, name);
        self.call(GemdosCall::Fopen, &[Arg::Long(p), Arg::Word(mode)])
    }

    pub fn fcreate(&mut self, name: &str, attr: u16) -> CallOutcome {
        let p = self.put_string(layout::STRING_A, name);
        self.call(GemdosCall::Fcreate, &[Arg::Long(p), Arg::Word(attr)])
    }

    pub fn fclose(&mut self, handle: u16) -> CallOutcome {
        self.call(GemdosCall::Fclose, &[Arg::Word(handle)])
    }

    /// Read into the scratch buffer and return what landed there.
    pub fn fread(&mut self, handle: u16, count: u32) -> (CallOutcome, Vec<u8>) {
        let count = count.min(layout::BUFFER_SIZE);
        let outcome = self.call(
            GemdosCall::Fread,
            &[Arg::Word(handle), Arg::Long(count), Arg::Long(layout::BUFFER)],
        );
        let len = match outcome {
            CallOutcome::Handled(n) if n > 0 => n as usize,
            _ => 0,
        };
        let mut data = vec![0; len];
        self.ram.read_bytes(layout::BUFFER, &mut data);
        (outcome, data)
    }

    pub fn fwrite(&mut self, handle: u16, data: &[u8]) -> CallOutcome {
        self.ram.write_bytes(layout::BUFFER, data);
        self.call(
            GemdosCall::Fwrite,
            &[
                Arg::Word(handle),
                Arg::Long(data.len() as u32),
                Arg::Long(layout::BUFFER),
            ],
        )
    }

    pub fn fseek(&mut self, offset: i32, handle: u16, whence: u16) -> CallOutcome {
        self.call(
            GemdosCall::Fseek,
            &[Arg::Long(offset as u32), Arg::Word(handle), Arg::Word(whence)],
        )
    }

    pub fn fdelete(&mut self, name: &str) -> CallOutcome {
        let p = self.put_string(layout::STRING_A, name);
        self.call(GemdosCall::Fdelete, &[Arg::Long(p)])
    }

    pub fn frename(&mut self, old: &str, new: &str) -> CallOutcome {
        let a = self.put_string(layout::STRING_A, old);
        let b = self.put_string(layout::STRING_B, new);
        self.call(
            GemdosCall::Frename,
            &[Arg::Word(0), Arg::Long(a), Arg::Long(b)],
        )
    }

    pub fn fattrib(&mut self, name: &str, set: bool, attr: u16) -> CallOutcome {
        let p = self.put_string(layout::STRING_A, name);
        self.call(
            GemdosCall::Fattrib,
            &[Arg::Long(p), Arg::Word(set as u16), Arg::Word(attr)],
        )
    }

    pub fn dcreate(&mut self, name: &str) -> CallOutcome {
        let p = self.put_string(layout::STRING_A, name);
        self.call(GemdosCall::Dcreate, &[Arg::Long(p)])
    }

    pub fn ddelete(&mut self, name: &str) -> CallOutcome {
        let p = self.put_string(layout::STRING_A, name);
        self.call(GemdosCall::Ddelete, &[Arg::Long(p)])
    }

    pub fn dsetpath(&mut self, name: &str) -> CallOutcome {
        let p = self.put_string(layout::STRING_A, name);
        self.call(GemdosCall::Dsetpath, &[Arg::Long(p)])
    }

    /// Current directory of `drive` (0 = current, 1 = A).
    pub fn dgetpath(&mut self, drive: u16) -> (CallOutcome, String) {
        self.ram.write_u8(layout::BUFFER, 0);
        let outcome = self.call(
            GemdosCall::Dgetpath,
            &[Arg::Long(layout::BUFFER), Arg::Word(drive)],
        );
        let bytes = self
            .ram
            .read_cstring(layout::BUFFER, addr::MAX_GUEST_PATH)
            .unwrap_or_default();
        (outcome, guest_to_string(&bytes))
    }

    /// Free space of `drive` (0 = current, 1 = A) as the four DISKINFO longs.
    pub fn dfree(&mut self, drive: u16) -> (CallOutcome, [u32; 4]) {
        let outcome = self.call(
            GemdosCall::Dfree,
            &[Arg::Long(layout::BUFFER), Arg::Word(drive)],
        );
        let mut info = [0u32; 4];
        for (i, value) in info.iter_mut().enumerate() {
            *value = self.ram.read_u32(layout::BUFFER + i as u32 * 4);
        }
        (outcome, info)
    }

    pub fn pexec(&mut self, mode: u16, name: &str) -> CallOutcome {
        let p = self.put_string(layout::STRING_A, name);
        self.call(
            GemdosCall::Pexec,
            &[Arg::Word(mode), Arg::Long(p), Arg::Long(0), Arg::Long(0)],
        )
    }

    /// Fdatime get: returns the {time, date} pair on success.
    pub fn fdatime_get(&mut self, handle: u16) -> (CallOutcome, (u16, u16)) {
        let outcome = self.call(
            GemdosCall::Fdatime,
            &[Arg::Long(layout::BUFFER), Arg::Word(handle), Arg::Word(0)],
        );
        let stamp = (
            self.ram.read_u16(layout::BUFFER),
            self.ram.read_u16(layout::BUFFER + 2),
        );
        (outcome, stamp)
    }

    pub fn fdatime_set(&mut self, handle: u16, time: u16, date: u16) -> CallOutcome {
        self.ram.write_u16(layout::BUFFER, time);
        self.ram.write_u16(layout::BUFFER + 2, date);
        self.call(
            GemdosCall::Fdatime,
            &[Arg::Long(layout::BUFFER), Arg::Word(handle), Arg::Word(1)],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_resolves_process_dta() {
        let dir = tempfile::tempdir().unwrap();
        let harness = GuestHarness::new(GemdosConfig::with_drive('C', dir.path())).unwrap();
        assert!(harness.emulator().booted());
        assert_eq!(harness.emulator().act_pd(), layout::ACT_PD);
        assert_eq!(harness.process_dta(), layout::DTA);
    }

    #[test]
    fn test_supervisor_mode_call() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("X.TXT"), b"x").unwrap();
        let mut harness = GuestHarness::new(GemdosConfig::with_drive('C', dir.path())).unwrap();

        // Arguments above a 68000 exception frame
        let sp = 0x9000;
        harness.ram_mut().write_u16(sp, 0x2300);
        harness.ram_mut().write_u16(sp + 6, GemdosCall::Fopen as u16);
        harness.ram_mut().write_u32(sp + 8, sp + 0x100);
        harness.ram_mut().write_u16(sp + 12, 0);
        harness.ram_mut().write_cstring(sp + 0x100, b"C:\\X.TXT");

        let frame = TrapFrame {
            a7: sp,
            usp: 0,
            cpu_level: 0,
        };
        let GuestHarness { emulator, ram } = &mut harness;
        assert_eq!(emulator.handle_trap(ram, frame), CallOutcome::Handled(64));
    }
}
