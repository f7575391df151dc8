//! GEMDOS host drive - services trapped GEMDOS calls from host directories.
//!
//! The CPU glue calls [`GemdosEmulator::handle_trap`] every time the guest
//! executes `TRAP #1` while the interception vector is installed. The result
//! tells the glue whether to skip, run, or detour around the native handler.

use std::fs;

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};

use crate::config::GemdosConfig;
use crate::error::{code, GemdosError, GemdosResult};
use crate::fs::path::{split_drive, FinalComponent, HostPath};
use crate::fs::search::DirEntry;
use crate::fs::stamp::{self, DosStamp};
use crate::fs::{CreateMode, HandleTable, HostDrive, OpenMode, SearchTable};
use crate::fs::to_8_3;
use crate::gemdos::dta::DTA_SIZE;
use crate::gemdos::{
    addr, attrib, string_to_guest, CallOutcome, CallParams, Dta, GemdosCall, TrapFrame,
    SIZE_LONG, SIZE_WORD,
};
use crate::memory::{GuestMemory, ADDRESS_MASK};

use CallOutcome::{Handled, HandledWithRedirect, NotHandled};

/// Number of drive letters.
pub const MAX_DRIVES: usize = 26;

/// State kept across a save-state.
///
/// Open files are not part of it: host files may have changed in between,
/// so restoring closes every handle instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GemdosSnapshot {
    pub search_index: u16,
    pub booted: bool,
    pub dta_address: u32,
    pub current_drive: u16,
}

impl GemdosSnapshot {
    pub fn to_json(&self) -> GemdosResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> GemdosResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn drive_index(letter: char) -> GemdosResult<usize> {
    let upper = letter.to_ascii_uppercase();
    if upper.is_ascii_uppercase() {
        Ok((upper as u8 - b'A') as usize)
    } else {
        Err(GemdosError::InvalidDrive(letter))
    }
}

/// The emulated drive a guest path lives on: its explicit `X:` prefix, or
/// the current drive. None if that drive is not mounted.
fn owning_drive<'a>(
    drives: &'a [Option<HostDrive>],
    current: u16,
    guest: &str,
) -> Option<&'a HostDrive> {
    let (drive, _) = split_drive(guest);
    drives
        .get(drive.unwrap_or(current) as usize)
        .and_then(|d| d.as_ref())
}

fn owning_drive_mut<'a>(
    drives: &'a mut [Option<HostDrive>],
    current: u16,
    guest: &str,
) -> Option<&'a mut HostDrive> {
    let (drive, _) = split_drive(guest);
    drives
        .get_mut(drive.unwrap_or(current) as usize)
        .and_then(|d| d.as_mut())
}

/// Read a non-empty path argument.
fn path_arg<M: GuestMemory>(mem: &M, params: CallParams, offset: u32) -> Option<String> {
    params.string(mem, offset).filter(|s| !s.is_empty())
}

/// Fold a handler result into a guest result code.
fn finish(call: GemdosCall, result: GemdosResult<i32>) -> CallOutcome {
    match result {
        Ok(d0) => Handled(d0),
        Err(err) => {
            match err {
                GemdosError::Io(_) => warn!("{:?}: {}", call, err),
                _ => debug!("{:?}: {}", call, err),
            }
            Handled(err.code())
        }
    }
}

fn fill_dta(dta: &mut Dta, entry: &DirEntry) {
    dta.set_name(&string_to_guest(&entry.guest_name));
    dta.set_attrib(entry.attrib);
    dta.set_size(entry.size);
    dta.set_time(entry.stamp.time);
    dta.set_date(entry.stamp.date);
}

/// Split an Fsfirst argument into the directory to list and the mask.
fn search_target(drive: &HostDrive, guest: &str) -> GemdosResult<(HostPath, String)> {
    let (_, rest) = split_drive(guest);
    let trailing = rest.is_empty() || rest.ends_with(['\\', '/']);
    if trailing {
        return Ok((drive.resolve(guest, FinalComponent::Directory)?, "*.*".to_string()));
    }
    let resolved = drive.resolve(guest, FinalComponent::Verbatim)?;
    match resolved.file_name() {
        Some(mask) => {
            let mask = mask.to_string();
            Ok((resolved.parent(), mask))
        }
        None => Ok((resolved, "*.*".to_string())),
    }
}

/// GEMDOS interception state for one emulated machine.
pub struct GemdosEmulator {
    config: GemdosConfig,
    /// Drives (A-Z); only mounted letters are serviced.
    drives: [Option<HostDrive>; MAX_DRIVES],
    handles: HandleTable,
    searches: SearchTable,
    /// Current drive as last set through Dsetdrv (0 = A).
    current_drive: u16,
    /// DTA registered through Fsetdta.
    dta: u32,
    /// Set once `boot()` has run.
    booted: bool,
    /// Address of the current-process pointer, resolved at boot.
    act_pd: u32,
}

impl GemdosEmulator {
    /// Create the emulator and mount every configured drive.
    pub fn new(config: GemdosConfig) -> GemdosResult<Self> {
        config.validate()?;
        let mut emu = Self {
            drives: std::array::from_fn(|_| None),
            handles: HandleTable::new(),
            searches: SearchTable::new(),
            current_drive: 0,
            dta: 0,
            booted: false,
            act_pd: 0,
            config,
        };
        for drive in emu.config.drives.clone() {
            emu.mount(drive.letter, &drive.path)?;
        }
        emu.current_drive = drive_index(emu.config.boot_drive())? as u16;
        Ok(emu)
    }

    /// Mount a host directory on a drive letter, replacing what was there.
    pub fn mount(&mut self, letter: char, root: &std::path::Path) -> GemdosResult<()> {
        let idx = drive_index(letter)?;
        if self.drives[idx].is_some() {
            self.unmount(letter)?;
        }
        let drive = HostDrive::new(letter, root)?;
        info!("Hard drive emulation, {}: <-> {}", drive.letter(), root.display());
        self.drives[idx] = Some(drive);
        Ok(())
    }

    /// Unmount a drive, force-closing the files open on it.
    pub fn unmount(&mut self, letter: char) -> GemdosResult<()> {
        let idx = drive_index(letter)?;
        if self.drives[idx].take().is_some() {
            let closed = self.handles.close_drive(idx as u16);
            info!("Unmounted {}: ({} open files closed)", letter.to_ascii_uppercase(), closed);
        }
        Ok(())
    }

    /// Get a mounted drive.
    pub fn drive(&self, letter: char) -> Option<&HostDrive> {
        let idx = drive_index(letter).ok()?;
        self.drives[idx].as_ref()
    }

    /// True if any drive is mounted.
    pub fn is_active(&self) -> bool {
        self.drives.iter().any(|d| d.is_some())
    }

    pub fn config(&self) -> &GemdosConfig {
        &self.config
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    pub fn searches(&self) -> &SearchTable {
        &self.searches
    }

    pub fn current_drive(&self) -> u16 {
        self.current_drive
    }

    pub fn dta_address(&self) -> u32 {
        self.dta
    }

    pub fn booted(&self) -> bool {
        self.booted
    }

    pub fn act_pd(&self) -> u32 {
        self.act_pd
    }

    /// Native trampoline the glue branches to on `HandledWithRedirect`.
    pub fn pexec_trampoline(&self) -> u32 {
        self.config.cartridge.pexec_trampoline
    }

    /// Close all files, forget all searches and restore drive defaults.
    pub fn reset(&mut self) {
        self.handles.close_all();
        self.searches.clear();
        self.booted = false;
        self.current_drive = drive_index(self.config.boot_drive()).unwrap_or(0) as u16;
        self.dta = 0;
        for drive in self.drives.iter_mut().flatten() {
            drive.reset_cwd();
        }
        debug!("GEMDOS reset, current drive {}", self.current_drive);
    }

    /// Install the interception vector.
    ///
    /// Called once per guest boot with the TOS ROM base and version. Resolves
    /// where TOS keeps the current-process pointer, saves the native GEMDOS
    /// vector for chaining and points the vector at our handler.
    pub fn boot<M: GuestMemory>(&mut self, mem: &mut M, tos_address: u32, tos_version: u16) {
        self.booted = true;
        if !self.is_active() {
            return;
        }

        self.act_pd = if tos_version == 0x0100 {
            // TOS 1.00 has no pointer in its header; Spanish TOS differs.
            if mem.read_u16(tos_address + addr::TOS_HEADER_COUNTRY) >> 1 == 4 {
                addr::TOS100_ES_ACT_PD
            } else {
                addr::TOS100_ACT_PD
            }
        } else {
            mem.read_u32(tos_address + addr::TOS_HEADER_ACT_PD)
        } & ADDRESS_MASK;

        let cart = self.config.cartridge;
        if !mem.validate_range(cart.old_gemdos_vector, SIZE_LONG)
            || !mem.validate_range(addr::GEMDOS_VECTOR, SIZE_LONG)
        {
            warn!("GEMDOS boot: vector area not in RAM, interception not installed");
            return;
        }
        let native = mem.read_u32(addr::GEMDOS_VECTOR);
        mem.write_u32(cart.old_gemdos_vector, native);
        mem.write_u32(addr::GEMDOS_VECTOR, cart.gemdos_handler);
        debug!(
            "GEMDOS boot: act_pd={:#08X}, native vector {:#08X} saved",
            self.act_pd, native
        );
    }

    pub fn snapshot_save(&self) -> GemdosSnapshot {
        GemdosSnapshot {
            search_index: self.searches.next_index() as u16,
            booted: self.booted,
            dta_address: self.dta,
            current_drive: self.current_drive,
        }
    }

    /// Restore saved state. Every open handle is closed.
    pub fn snapshot_restore(&mut self, snapshot: &GemdosSnapshot) {
        self.searches.set_next_index(snapshot.search_index as usize);
        self.booted = snapshot.booted;
        self.dta = snapshot.dta_address & ADDRESS_MASK;
        self.current_drive = snapshot.current_drive;
        self.handles.close_all();
    }

    /// Service a trapped `TRAP #1`.
    pub fn handle_trap<M: GuestMemory>(&mut self, mem: &mut M, frame: TrapFrame) -> CallOutcome {
        let base = frame.params_base(mem);
        self.handle_call(mem, base)
    }

    /// Service a GEMDOS call whose parameter block starts at `params_base`.
    pub fn handle_call<M: GuestMemory>(&mut self, mem: &mut M, params_base: u32) -> CallOutcome {
        let params = CallParams::new(params_base & ADDRESS_MASK);
        let opcode = params.opcode(mem);

        let call = match GemdosCall::try_from(opcode) {
            Ok(call) => call,
            Err(_) => return NotHandled,
        };
        trace!("GEMDOS {:#04X} ({:?}) params at {:#08X}", opcode, call, params.base());

        self.dispatch(call, mem, params)
    }

    fn dispatch<M: GuestMemory>(
        &mut self,
        call: GemdosCall,
        mem: &mut M,
        params: CallParams,
    ) -> CallOutcome {
        use GemdosCall::*;

        match call {
            Dsetdrv => self.gemdos_dsetdrv(mem, params),
            Fsetdta => self.gemdos_fsetdta(mem, params),
            Dfree => self.gemdos_dfree(mem, params),
            Dcreate => self.gemdos_dcreate(mem, params),
            Ddelete => self.gemdos_ddelete(mem, params),
            Dsetpath => self.gemdos_dsetpath(mem, params),
            Fcreate => self.gemdos_fcreate(mem, params),
            Fopen => self.gemdos_fopen(mem, params),
            Fclose => self.gemdos_fclose(mem, params),
            Fread => self.gemdos_fread(mem, params),
            Fwrite => self.gemdos_fwrite(mem, params),
            Fdelete => self.gemdos_fdelete(mem, params),
            Fseek => self.gemdos_fseek(mem, params),
            Fattrib => self.gemdos_fattrib(mem, params),
            Dgetpath => self.gemdos_dgetpath(mem, params),
            Pexec => self.gemdos_pexec(mem, params),
            Fsfirst => self.gemdos_fsfirst(mem, params),
            Fsnext => self.gemdos_fsnext(mem, params),
            Frename => self.gemdos_frename(mem, params),
            Fdatime => self.gemdos_fdatime(mem, params),
        }
    }

    /// DTA of the running process, falling back to the last Fsetdta.
    fn current_dta<M: GuestMemory>(&self, mem: &M) -> u32 {
        if self.act_pd != 0 {
            let basepage = mem.read_u32(self.act_pd) & ADDRESS_MASK;
            if basepage != 0 {
                return mem.read_u32(basepage + addr::BASEPAGE_DTA) & ADDRESS_MASK;
            }
        }
        self.dta
    }

    /// Drive argument of Dfree/Dgetpath: 0 is the current drive, else 1 = A.
    fn drive_arg(&self, drive: u16) -> Option<&HostDrive> {
        let idx = match drive {
            0 => self.current_drive,
            n => n - 1,
        };
        self.drives.get(idx as usize).and_then(|d| d.as_ref())
    }

    /// Guest handle argument: None if it belongs to the native GEMDOS.
    fn handle_arg<M: GuestMemory>(mem: &M, params: CallParams, offset: u32) -> Option<u16> {
        let handle = params.word(mem, offset);
        HandleTable::owns(handle).then_some(handle)
    }

    /// GEMDOS 0x0E: Set current drive. Observed, then passed on.
    fn gemdos_dsetdrv<M: GuestMemory>(&mut self, mem: &mut M, params: CallParams) -> CallOutcome {
        self.current_drive = params.word(mem, SIZE_WORD);
        NotHandled
    }

    /// GEMDOS 0x1A: Set DTA. Observed, then passed on.
    fn gemdos_fsetdta<M: GuestMemory>(&mut self, mem: &mut M, params: CallParams) -> CallOutcome {
        self.dta = params.long(mem, SIZE_WORD) & ADDRESS_MASK;
        NotHandled
    }

    /// GEMDOS 0x36: Free disk space.
    fn gemdos_dfree<M: GuestMemory>(&mut self, mem: &mut M, params: CallParams) -> CallOutcome {
        let buf = params.long(mem, SIZE_WORD);
        let drive = params.word(mem, SIZE_WORD + SIZE_LONG);
        let Some(drive) = self.drive_arg(drive) else {
            return NotHandled;
        };
        if !mem.validate_range(buf, 4 * SIZE_LONG) {
            return NotHandled;
        }

        let info = drive.disk_info();
        for (i, value) in info.to_longs().iter().enumerate() {
            mem.write_u32(buf + i as u32 * SIZE_LONG, *value);
        }
        Handled(code::E_OK)
    }

    /// GEMDOS 0x39: Create directory.
    fn gemdos_dcreate<M: GuestMemory>(&mut self, mem: &mut M, params: CallParams) -> CallOutcome {
        let Some(name) = path_arg(mem, params, SIZE_WORD) else {
            return NotHandled;
        };
        let Some(drive) = owning_drive(&self.drives, self.current_drive, &name) else {
            return NotHandled;
        };

        let result = drive.host_path(&name, FinalComponent::Any).and_then(|path| {
            fs::create_dir(&path).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => GemdosError::PathNotFound(name.clone()),
                _ => GemdosError::AccessDenied,
            })?;
            Ok(code::E_OK)
        });
        finish(GemdosCall::Dcreate, result)
    }

    /// GEMDOS 0x3A: Delete directory.
    fn gemdos_ddelete<M: GuestMemory>(&mut self, mem: &mut M, params: CallParams) -> CallOutcome {
        let Some(name) = path_arg(mem, params, SIZE_WORD) else {
            return NotHandled;
        };
        let Some(drive) = owning_drive(&self.drives, self.current_drive, &name) else {
            return NotHandled;
        };

        let result = drive
            .host_path(&name, FinalComponent::Directory)
            .and_then(|path| {
                fs::remove_dir(&path).map_err(|e| match e.kind() {
                    std::io::ErrorKind::NotFound => GemdosError::PathNotFound(name.clone()),
                    _ => GemdosError::AccessDenied,
                })?;
                Ok(code::E_OK)
            });
        finish(GemdosCall::Ddelete, result)
    }

    /// GEMDOS 0x3B: Set current directory.
    fn gemdos_dsetpath<M: GuestMemory>(&mut self, mem: &mut M, params: CallParams) -> CallOutcome {
        let Some(name) = path_arg(mem, params, SIZE_WORD) else {
            return NotHandled;
        };
        let Some(drive) = owning_drive_mut(&mut self.drives, self.current_drive, &name) else {
            return NotHandled;
        };

        let result = drive.set_cwd(&name).map(|_| code::E_OK);
        finish(GemdosCall::Dsetpath, result)
    }

    /// GEMDOS 0x3C: Create file.
    fn gemdos_fcreate<M: GuestMemory>(&mut self, mem: &mut M, params: CallParams) -> CallOutcome {
        let Some(name) = path_arg(mem, params, SIZE_WORD) else {
            return NotHandled;
        };
        let attr = params.word(mem, SIZE_WORD + SIZE_LONG);
        let Some(drive) = owning_drive(&self.drives, self.current_drive, &name) else {
            return NotHandled;
        };

        let result = drive.host_path(&name, FinalComponent::Any).and_then(|path| {
            self.handles
                .create(&path, CreateMode::from_attrib(attr), drive.number())
                .map(i32::from)
        });
        finish(GemdosCall::Fcreate, result)
    }

    /// GEMDOS 0x3D: Open file.
    fn gemdos_fopen<M: GuestMemory>(&mut self, mem: &mut M, params: CallParams) -> CallOutcome {
        let Some(name) = path_arg(mem, params, SIZE_WORD) else {
            return NotHandled;
        };
        let mode = params.word(mem, SIZE_WORD + SIZE_LONG);
        let Some(drive) = owning_drive(&self.drives, self.current_drive, &name) else {
            return NotHandled;
        };

        let result = drive.host_path(&name, FinalComponent::Any).and_then(|path| {
            self.handles
                .open(&path, OpenMode::from_guest(mode), drive.number())
                .map(i32::from)
        });
        finish(GemdosCall::Fopen, result)
    }

    /// GEMDOS 0x3E: Close file.
    fn gemdos_fclose<M: GuestMemory>(&mut self, mem: &mut M, params: CallParams) -> CallOutcome {
        let Some(handle) = Self::handle_arg(mem, params, SIZE_WORD) else {
            return NotHandled;
        };
        finish(GemdosCall::Fclose, self.handles.close(handle).map(|_| code::E_OK))
    }

    /// GEMDOS 0x3F: Read file.
    fn gemdos_fread<M: GuestMemory>(&mut self, mem: &mut M, params: CallParams) -> CallOutcome {
        let Some(handle) = Self::handle_arg(mem, params, SIZE_WORD) else {
            return NotHandled;
        };
        let count = params.long(mem, 2 * SIZE_WORD);
        let buf = params.long(mem, 2 * SIZE_WORD + SIZE_LONG);

        let remaining = match self.handles.remaining(handle) {
            Ok(n) => n,
            Err(err) => return finish(GemdosCall::Fread, Err(err)),
        };
        let len = remaining.min(count as u64) as u32;
        if len == 0 {
            return Handled(0);
        }
        let Some(dest) = mem.slice_mut(buf, len) else {
            return NotHandled;
        };

        let result = self.handles.read(handle, dest).map(|n| n as i32);
        finish(GemdosCall::Fread, result)
    }

    /// GEMDOS 0x40: Write file.
    fn gemdos_fwrite<M: GuestMemory>(&mut self, mem: &mut M, params: CallParams) -> CallOutcome {
        let Some(handle) = Self::handle_arg(mem, params, SIZE_WORD) else {
            return NotHandled;
        };
        let count = params.long(mem, 2 * SIZE_WORD);
        let buf = params.long(mem, 2 * SIZE_WORD + SIZE_LONG);

        if !self.handles.is_open(handle) {
            return finish(GemdosCall::Fwrite, Err(GemdosError::InvalidHandle(handle)));
        }
        let Some(src) = mem.slice(buf, count) else {
            return NotHandled;
        };

        let result = self.handles.write(handle, src).map(|n| n as i32);
        finish(GemdosCall::Fwrite, result)
    }

    /// GEMDOS 0x41: Delete file.
    fn gemdos_fdelete<M: GuestMemory>(&mut self, mem: &mut M, params: CallParams) -> CallOutcome {
        let Some(name) = path_arg(mem, params, SIZE_WORD) else {
            return NotHandled;
        };
        let Some(drive) = owning_drive(&self.drives, self.current_drive, &name) else {
            return NotHandled;
        };

        let result = drive.host_path(&name, FinalComponent::Any).and_then(|path| {
            if path.is_dir() {
                return Err(GemdosError::FileNotFound(name.clone()));
            }
            fs::remove_file(&path).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => GemdosError::FileNotFound(name.clone()),
                _ => GemdosError::AccessDenied,
            })?;
            Ok(code::E_OK)
        });
        finish(GemdosCall::Fdelete, result)
    }

    /// GEMDOS 0x42: Seek.
    fn gemdos_fseek<M: GuestMemory>(&mut self, mem: &mut M, params: CallParams) -> CallOutcome {
        let offset = params.long(mem, SIZE_WORD) as i32;
        let Some(handle) = Self::handle_arg(mem, params, SIZE_WORD + SIZE_LONG) else {
            return NotHandled;
        };
        let whence = params.word(mem, 2 * SIZE_WORD + SIZE_LONG);

        let result = self.handles.seek(handle, offset, whence).map(|pos| pos as i32);
        finish(GemdosCall::Fseek, result)
    }

    /// GEMDOS 0x43: Get or set file attributes.
    fn gemdos_fattrib<M: GuestMemory>(&mut self, mem: &mut M, params: CallParams) -> CallOutcome {
        let Some(name) = path_arg(mem, params, SIZE_WORD) else {
            return NotHandled;
        };
        let set = params.word(mem, SIZE_WORD + SIZE_LONG) != 0;
        let wanted = params.word(mem, 2 * SIZE_WORD + SIZE_LONG) as u8;
        let Some(drive) = owning_drive(&self.drives, self.current_drive, &name) else {
            return NotHandled;
        };

        let result = drive.host_path(&name, FinalComponent::Any).and_then(|path| {
            let meta =
                fs::metadata(&path).map_err(|_| GemdosError::FileNotFound(name.clone()))?;
            let current = stamp::attributes(&meta);
            if !set {
                return Ok(current as i32);
            }

            // Only the read-only bit maps onto the host; archive is accepted
            // and dropped.
            let changeable = attrib::READONLY | attrib::ARCHIVE;
            if (current ^ wanted) & !changeable != 0 {
                return Err(GemdosError::AccessDenied);
            }
            let mut perms = meta.permissions();
            perms.set_readonly(wanted & attrib::READONLY != 0);
            fs::set_permissions(&path, perms).map_err(|_| GemdosError::AccessDenied)?;
            let meta = fs::metadata(&path)?;
            Ok(stamp::attributes(&meta) as i32)
        });
        finish(GemdosCall::Fattrib, result)
    }

    /// GEMDOS 0x47: Get current directory.
    fn gemdos_dgetpath<M: GuestMemory>(&mut self, mem: &mut M, params: CallParams) -> CallOutcome {
        let buf = params.long(mem, SIZE_WORD);
        let drive = params.word(mem, SIZE_WORD + SIZE_LONG);
        let Some(drive) = self.drive_arg(drive) else {
            return NotHandled;
        };

        let mut path = String::new();
        for segment in drive.cwd().segments() {
            path.push('\\');
            path.push_str(&to_8_3(segment));
        }
        if !mem.write_cstring(buf, &string_to_guest(&path)) {
            return NotHandled;
        }
        Handled(code::E_OK)
    }

    /// GEMDOS 0x4B: Pexec. Loads from an emulated drive go through the
    /// cartridge trampoline; everything else is native.
    fn gemdos_pexec<M: GuestMemory>(&mut self, mem: &mut M, params: CallParams) -> CallOutcome {
        let mode = params.word(mem, SIZE_WORD);
        if mode != 0 && mode != 3 {
            return NotHandled;
        }
        let Some(name) = path_arg(mem, params, 2 * SIZE_WORD) else {
            return NotHandled;
        };
        if owning_drive(&self.drives, self.current_drive, &name).is_none() {
            return NotHandled;
        }
        debug!("Pexec({}, {}) redirected", mode, name);
        HandledWithRedirect
    }

    /// GEMDOS 0x4E: Search first.
    fn gemdos_fsfirst<M: GuestMemory>(&mut self, mem: &mut M, params: CallParams) -> CallOutcome {
        let Some(name) = path_arg(mem, params, SIZE_WORD) else {
            return NotHandled;
        };
        let attr = params.word(mem, SIZE_WORD + SIZE_LONG) as u8;
        let Some(drive) = owning_drive(&self.drives, self.current_drive, &name) else {
            return NotHandled;
        };

        let dta_addr = self.current_dta(mem);
        let Some(dta_mem) = mem.slice_mut(dta_addr, DTA_SIZE as u32) else {
            warn!("Fsfirst: DTA {:#08X} outside RAM", dta_addr);
            return NotHandled;
        };
        let mut dta = Dta::new(dta_mem);

        if attr == attrib::VOLUME_LABEL {
            let claim = self.searches.claim(drive.root().to_path_buf(), Vec::new());
            dta.claim(claim.index as u16);
            dta.set_name(&string_to_guest(&self.config.volume_label));
            dta.set_attrib(attrib::VOLUME_LABEL);
            dta.set_size(0);
            dta.set_time(0);
            dta.set_date(0);
            return Handled(code::E_OK);
        }

        // The slot is tagged before listing so a failed search cannot be
        // continued with a stale index.
        let index = self.searches.next_index();
        dta.claim(index as u16);

        let started = search_target(drive, &name).and_then(|(dir, mask)| {
            self.searches.start(&dir.to_host(drive.root()), &mask, attr)
        });
        let claim = match started {
            Ok(claim) => claim,
            Err(err) => {
                self.searches.release(index);
                return finish(GemdosCall::Fsfirst, Err(err));
            }
        };
        if claim.evicted {
            debug!("Fsfirst reused search slot {}", claim.index);
        }

        let result = self.searches.advance(claim.index).map(|entry| {
            fill_dta(&mut dta, entry);
            code::E_OK
        });
        finish(GemdosCall::Fsfirst, result)
    }

    /// GEMDOS 0x4F: Search next. Only DTAs tagged by Fsfirst are ours.
    fn gemdos_fsnext<M: GuestMemory>(&mut self, mem: &mut M, _params: CallParams) -> CallOutcome {
        let dta_addr = self.current_dta(mem);
        let Some(dta_mem) = mem.slice_mut(dta_addr, DTA_SIZE as u32) else {
            return NotHandled;
        };
        let mut dta = Dta::new(dta_mem);
        if !dta.is_ours() {
            return NotHandled;
        }

        let result = self.searches.advance(dta.index() as usize).map(|entry| {
            fill_dta(&mut dta, entry);
            code::E_OK
        });
        finish(GemdosCall::Fsnext, result)
    }

    /// GEMDOS 0x56: Rename. Both names must be on emulated drives.
    fn gemdos_frename<M: GuestMemory>(&mut self, mem: &mut M, params: CallParams) -> CallOutcome {
        let Some(old_name) = path_arg(mem, params, 2 * SIZE_WORD) else {
            return NotHandled;
        };
        let Some(new_name) = path_arg(mem, params, 2 * SIZE_WORD + SIZE_LONG) else {
            return NotHandled;
        };
        let (Some(old_drive), Some(new_drive)) = (
            owning_drive(&self.drives, self.current_drive, &old_name),
            owning_drive(&self.drives, self.current_drive, &new_name),
        ) else {
            return NotHandled;
        };

        let result = old_drive
            .host_path(&old_name, FinalComponent::Any)
            .and_then(|old| {
                let new = new_drive.host_path(&new_name, FinalComponent::Any)?;
                if fs::symlink_metadata(&old).is_err() {
                    return Err(GemdosError::FileNotFound(old_name.clone()));
                }
                fs::rename(&old, &new).map_err(|_| GemdosError::AccessDenied)?;
                Ok(code::E_OK)
            });
        finish(GemdosCall::Frename, result)
    }

    /// GEMDOS 0x57: Get or set a file's date and time.
    fn gemdos_fdatime<M: GuestMemory>(&mut self, mem: &mut M, params: CallParams) -> CallOutcome {
        let buf = params.long(mem, SIZE_WORD);
        let Some(handle) = Self::handle_arg(mem, params, SIZE_WORD + SIZE_LONG) else {
            return NotHandled;
        };
        let set = params.word(mem, 2 * SIZE_WORD + SIZE_LONG) != 0;
        if !mem.validate_range(buf, 2 * SIZE_WORD) {
            return NotHandled;
        }

        if set {
            let stamp = DosStamp {
                time: mem.read_u16(buf),
                date: mem.read_u16(buf + SIZE_WORD),
            };
            return match self.handles.set_stamp(handle, stamp) {
                Err(err @ GemdosError::InvalidHandle(_)) => finish(GemdosCall::Fdatime, Err(err)),
                Err(err) => {
                    debug!("Fdatime: host kept its timestamp ({})", err);
                    Handled(code::E_OK)
                }
                Ok(()) => Handled(code::E_OK),
            };
        }

        let result = self.handles.stamp(handle).map(|stamp| {
            mem.write_u16(buf, stamp.time);
            mem.write_u16(buf + SIZE_WORD, stamp.date);
            code::E_OK
        });
        finish(GemdosCall::Fdatime, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::StRam;

    fn emulator_with_drive() -> (tempfile::TempDir, GemdosEmulator) {
        let dir = tempfile::tempdir().unwrap();
        let emu = GemdosEmulator::new(GemdosConfig::with_drive('C', dir.path())).unwrap();
        (dir, emu)
    }

    fn call(ram: &mut StRam, opcode: u16, args: &[u8]) -> u32 {
        ram.write_u16(0x1000, opcode);
        ram.write_bytes(0x1002, args);
        0x1000
    }

    #[test]
    fn test_emulator_creation() {
        let (_dir, emu) = emulator_with_drive();
        assert!(emu.is_active());
        assert_eq!(emu.current_drive(), 2);
        assert!(emu.drive('c').is_some());
        assert!(emu.drive('D').is_none());
        assert!(!emu.booted());
    }

    #[test]
    fn test_unknown_call_not_handled() {
        let (_dir, mut emu) = emulator_with_drive();
        let mut ram = StRam::new(0x10000);
        let base = call(&mut ram, 0x09, &[]);
        assert_eq!(emu.handle_call(&mut ram, base), NotHandled);
    }

    #[test]
    fn test_dsetdrv_observed() {
        let (_dir, mut emu) = emulator_with_drive();
        let mut ram = StRam::new(0x10000);
        let base = call(&mut ram, 0x0E, &[0, 3]);
        assert_eq!(emu.handle_call(&mut ram, base), NotHandled);
        assert_eq!(emu.current_drive(), 3);
    }

    #[test]
    fn test_native_handles_pass_through() {
        let (_dir, mut emu) = emulator_with_drive();
        let mut ram = StRam::new(0x10000);

        let base = call(&mut ram, 0x3E, &[0, 6]);
        assert_eq!(emu.handle_call(&mut ram, base), NotHandled);

        let base = call(&mut ram, 0x3E, &[0, 70]);
        assert_eq!(emu.handle_call(&mut ram, base), Handled(code::EIHNDL));
    }

    #[test]
    fn test_boot_installs_vector() {
        let (_dir, mut emu) = emulator_with_drive();
        let mut ram = StRam::new(0x0100_0000);
        let tos = 0x00E0_0000;
        ram.write_u32(addr::GEMDOS_VECTOR, 0x00E0_1234);
        ram.write_u32(tos + addr::TOS_HEADER_ACT_PD, 0x0000_4000);

        emu.boot(&mut ram, tos, 0x0206);
        assert!(emu.booted());
        assert_eq!(emu.act_pd(), 0x4000);
        assert_eq!(ram.read_u32(0x00FA_001C), 0x00E0_1234);
        assert_eq!(ram.read_u32(addr::GEMDOS_VECTOR), 0x00FA_0030);
    }

    #[test]
    fn test_boot_tos100_act_pd() {
        let (_dir, mut emu) = emulator_with_drive();
        let mut ram = StRam::new(0x0100_0000);
        let tos = 0x00FC_0000;

        emu.boot(&mut ram, tos, 0x0100);
        assert_eq!(emu.act_pd(), addr::TOS100_ACT_PD);

        ram.write_u16(tos + addr::TOS_HEADER_COUNTRY, 4 << 1);
        emu.boot(&mut ram, tos, 0x0100);
        assert_eq!(emu.act_pd(), addr::TOS100_ES_ACT_PD);
    }

    #[test]
    fn test_boot_without_drives_leaves_vector() {
        let mut emu = GemdosEmulator::new(GemdosConfig::default()).unwrap();
        let mut ram = StRam::new(0x0100_0000);
        ram.write_u32(addr::GEMDOS_VECTOR, 0x00E0_1234);

        emu.boot(&mut ram, 0x00E0_0000, 0x0206);
        assert!(emu.booted());
        assert_eq!(ram.read_u32(addr::GEMDOS_VECTOR), 0x00E0_1234);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let (_dir, mut emu) = emulator_with_drive();
        let mut ram = StRam::new(0x10000);
        let base = call(&mut ram, 0x1A, &[0, 0, 0x20, 0x00]);
        emu.handle_call(&mut ram, base);

        let snap = emu.snapshot_save();
        assert_eq!(snap.dta_address, 0x2000);
        let json = snap.to_json().unwrap();
        assert!(json.contains("\"dtaAddress\":8192"));

        let mut other = GemdosEmulator::new(emu.config().clone()).unwrap();
        other.snapshot_restore(&GemdosSnapshot::from_json(&json).unwrap());
        assert_eq!(other.snapshot_save(), snap);
    }

    #[test]
    fn test_unmount_closes_files() {
        let (dir, mut emu) = emulator_with_drive();
        std::fs::write(dir.path().join("A.TXT"), b"a").unwrap();
        let mut ram = StRam::new(0x10000);
        ram.write_cstring(0x3000, b"C:\\A.TXT");
        let base = call(&mut ram, 0x3D, &[0, 0, 0x30, 0x00, 0, 0]);
        assert_eq!(emu.handle_call(&mut ram, base), Handled(64));
        assert_eq!(emu.handles().in_use_count(), 1);

        emu.unmount('C').unwrap();
        assert_eq!(emu.handles().in_use_count(), 0);
        assert!(!emu.is_active());
        assert_eq!(emu.handle_call(&mut ram, base), NotHandled);
    }
}
