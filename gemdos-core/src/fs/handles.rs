//! File handle table.
//!
//! Open host files live in a fixed number of slots. The guest sees
//! `slot + BASE_FILEHANDLE`, which keeps our handles clear of the small
//! numbers the native GEMDOS hands out for its own files and devices.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;

use super::stamp::{self, DosStamp};
use crate::error::{GemdosError, GemdosResult};

/// Number of files that can be open on emulated drives at once.
pub const MAX_FILE_HANDLES: usize = 32;

/// Guest handle of slot 0.
pub const BASE_FILEHANDLE: u16 = 64;

/// Host errors that mean the handle or path does not allow the access.
fn access_error(e: io::Error) -> GemdosError {
    match e.raw_os_error() {
        Some(libc::EBADF) | Some(libc::EISDIR) | Some(libc::EACCES) | Some(libc::EPERM) => {
            GemdosError::AccessDenied
        }
        _ => GemdosError::from(e),
    }
}

/// Access requested by Fopen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl OpenMode {
    /// Decode the guest mode word. Only the low two bits count; the unused
    /// value 3 opens read-only.
    pub fn from_guest(mode: u16) -> Self {
        match mode & 3 {
            1 => OpenMode::WriteOnly,
            2 => OpenMode::ReadWrite,
            _ => OpenMode::ReadOnly,
        }
    }

    fn options(self) -> OpenOptions {
        let mut opts = OpenOptions::new();
        match self {
            OpenMode::ReadOnly => opts.read(true),
            OpenMode::WriteOnly => opts.write(true),
            OpenMode::ReadWrite => opts.read(true).write(true),
        };
        opts
    }
}

/// How Fcreate opens the file it creates or truncates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Attribute bit 0 clear: create or truncate, readable and writable.
    ReadWriteTruncate,
    /// Attribute bit 0 set (read-only file): create or truncate, write-only.
    WriteOnly,
}

impl CreateMode {
    pub fn from_attrib(attrib: u16) -> Self {
        if attrib & 1 != 0 {
            CreateMode::WriteOnly
        } else {
            CreateMode::ReadWriteTruncate
        }
    }

    fn options(self) -> OpenOptions {
        let mut opts = OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        if self == CreateMode::ReadWriteTruncate {
            opts.read(true);
        }
        opts
    }
}

/// One open host file.
#[derive(Debug)]
struct HandleEntry {
    file: File,
    path: PathBuf,
    /// Drive ordinal the file was opened on.
    drive: u16,
}

/// Fixed-size table of open host files.
pub struct HandleTable {
    slots: Vec<Option<HandleEntry>>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_FILE_HANDLES);
        slots.resize_with(MAX_FILE_HANDLES, || None);
        Self { slots }
    }

    /// True if the guest handle falls inside the range this table hands out,
    /// whether or not it is currently open.
    pub fn owns(handle: u16) -> bool {
        (BASE_FILEHANDLE..BASE_FILEHANDLE + MAX_FILE_HANDLES as u16).contains(&handle)
    }

    pub fn in_use_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_open(&self, handle: u16) -> bool {
        self.entry(handle).is_ok()
    }

    fn free_slot(&self) -> GemdosResult<usize> {
        self.slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(GemdosError::NoHandles)
    }

    fn insert(&mut self, slot: usize, file: File, path: &Path, drive: u16) -> u16 {
        self.slots[slot] = Some(HandleEntry {
            file,
            path: path.to_path_buf(),
            drive,
        });
        let handle = BASE_FILEHANDLE + slot as u16;
        debug!("handle {} -> {}", handle, path.display());
        handle
    }

    fn entry(&self, handle: u16) -> GemdosResult<&HandleEntry> {
        handle
            .checked_sub(BASE_FILEHANDLE)
            .and_then(|slot| self.slots.get(slot as usize))
            .and_then(|s| s.as_ref())
            .ok_or(GemdosError::InvalidHandle(handle))
    }

    fn entry_mut(&mut self, handle: u16) -> GemdosResult<&mut HandleEntry> {
        handle
            .checked_sub(BASE_FILEHANDLE)
            .and_then(|slot| self.slots.get_mut(slot as usize))
            .and_then(|s| s.as_mut())
            .ok_or(GemdosError::InvalidHandle(handle))
    }

    /// Open an existing host file. A slot is only taken if the open succeeds.
    /// Directories are not files: opening one is `FileNotFound`.
    pub fn open(&mut self, path: &Path, mode: OpenMode, drive: u16) -> GemdosResult<u16> {
        let slot = self.free_slot()?;
        let not_found = || GemdosError::FileNotFound(path.display().to_string());
        let file = mode.options().open(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound || e.raw_os_error() == Some(libc::EISDIR) {
                not_found()
            } else {
                access_error(e)
            }
        })?;
        if file.metadata()?.is_dir() {
            return Err(not_found());
        }
        Ok(self.insert(slot, file, path, drive))
    }

    /// Create or truncate a host file. An existing directory in the way is
    /// `AccessDenied`.
    pub fn create(&mut self, path: &Path, mode: CreateMode, drive: u16) -> GemdosResult<u16> {
        let slot = self.free_slot()?;
        let file = mode.options().open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => GemdosError::PathNotFound(path.display().to_string()),
            _ => access_error(e),
        })?;
        Ok(self.insert(slot, file, path, drive))
    }

    /// Flush and close. A second close of the same handle is `InvalidHandle`.
    pub fn close(&mut self, handle: u16) -> GemdosResult<()> {
        self.entry(handle)?;
        let slot = (handle - BASE_FILEHANDLE) as usize;
        if let Some(mut entry) = self.slots[slot].take() {
            debug!("close {} ({})", handle, entry.path.display());
            entry.file.flush()?;
        }
        Ok(())
    }

    /// Read up to `buf.len()` bytes at the current position. At end of file
    /// this returns 0. Reading through a handle opened write-only is
    /// `AccessDenied`.
    pub fn read(&mut self, handle: u16, buf: &mut [u8]) -> GemdosResult<usize> {
        let entry = self.entry_mut(handle)?;
        let pos = entry.file.stream_position()?;
        let len = entry.file.metadata()?.len();
        let remaining = len.saturating_sub(pos).min(buf.len() as u64) as usize;

        let mut done = 0;
        while done < remaining {
            match entry.file.read(&mut buf[done..remaining]).map_err(access_error)? {
                0 => break,
                n => done += n,
            }
        }
        Ok(done)
    }

    /// Write at the current position. Writing through a handle opened
    /// read-only is `AccessDenied`.
    pub fn write(&mut self, handle: u16, data: &[u8]) -> GemdosResult<usize> {
        let entry = self.entry_mut(handle)?;
        entry.file.write_all(data).map_err(access_error)?;
        Ok(data.len())
    }

    /// Bytes between the current position and the end of the file.
    pub fn remaining(&mut self, handle: u16) -> GemdosResult<u64> {
        let entry = self.entry_mut(handle)?;
        let pos = entry.file.stream_position()?;
        Ok(entry.file.metadata()?.len().saturating_sub(pos))
    }

    /// Move the file position. `whence` is 0 (start), 1 (current) or 2 (end).
    /// Returns the new absolute position; positions before the start or past
    /// the end are `Range`.
    pub fn seek(&mut self, handle: u16, offset: i32, whence: u16) -> GemdosResult<u32> {
        let entry = self.entry_mut(handle)?;
        let len = entry.file.metadata()?.len() as i64;
        let base = match whence {
            0 => 0,
            1 => entry.file.stream_position()? as i64,
            2 => len,
            _ => return Err(GemdosError::InvalidFunction),
        };
        let target = base + offset as i64;
        if target < 0 || target > len {
            return Err(GemdosError::Range);
        }
        let pos = entry.file.seek(SeekFrom::Start(target as u64))?;
        Ok(pos.min(u32::MAX as u64) as u32)
    }

    /// Host path a handle was opened with.
    pub fn path(&self, handle: u16) -> GemdosResult<&Path> {
        Ok(&self.entry(handle)?.path)
    }

    /// Modification stamp of the open file.
    pub fn stamp(&self, handle: u16) -> GemdosResult<DosStamp> {
        let entry = self.entry(handle)?;
        Ok(stamp::modified_stamp(&entry.file.metadata()?))
    }

    /// Set the modification time of the open file.
    pub fn set_stamp(&mut self, handle: u16, stamp: DosStamp) -> GemdosResult<()> {
        let entry = self.entry_mut(handle)?;
        let time = stamp.to_system_time().ok_or(GemdosError::Range)?;
        entry.file.set_modified(time)?;
        Ok(())
    }

    /// Close every handle opened on `drive`. Returns how many were closed.
    pub fn close_drive(&mut self, drive: u16) -> usize {
        let mut closed = 0;
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|e| e.drive == drive) {
                if let Some(mut entry) = slot.take() {
                    let _ = entry.file.flush();
                    closed += 1;
                }
            }
        }
        closed
    }

    /// Force-close everything.
    pub fn close_all(&mut self) {
        for slot in &mut self.slots {
            if let Some(mut entry) = slot.take() {
                let _ = entry.file.flush();
            }
        }
    }
}
