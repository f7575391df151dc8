//! A host directory mounted as a guest drive.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use super::path::{self, FinalComponent, HostPath};
use crate::error::{GemdosError, GemdosResult};

/// Guest sector size reported by Dfree.
pub const BYTES_PER_SECTOR: u32 = 512;

/// Guest sectors per cluster reported by Dfree.
pub const SECTORS_PER_CLUSTER: u32 = 2;

/// Capacity as the guest's Dfree sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskInfo {
    pub free_clusters: u32,
    pub total_clusters: u32,
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
}

impl DiskInfo {
    /// Fixed answer used when the host cannot be asked: 10 MiB free of 50 MiB.
    pub fn fallback() -> Self {
        Self::from_bytes(10 * 1024 * 1024, 50 * 1024 * 1024)
    }

    /// Convert byte counts to clusters, clamped to what a signed 32-bit
    /// guest value can hold.
    pub fn from_bytes(free: u64, total: u64) -> Self {
        let cluster = (BYTES_PER_SECTOR * SECTORS_PER_CLUSTER) as u64;
        let clamp = |bytes: u64| (bytes / cluster).min(i32::MAX as u64) as u32;
        Self {
            free_clusters: clamp(free),
            total_clusters: clamp(total),
            bytes_per_sector: BYTES_PER_SECTOR,
            sectors_per_cluster: SECTORS_PER_CLUSTER,
        }
    }

    /// The four longs of a guest DISKINFO block, in order.
    pub fn to_longs(&self) -> [u32; 4] {
        [
            self.free_clusters,
            self.total_clusters,
            self.bytes_per_sector,
            self.sectors_per_cluster,
        ]
    }
}

fn host_capacity(root: &Path) -> Option<(u64, u64)> {
    let c_path = CString::new(root.as_os_str().as_bytes()).ok()?;
    // SAFETY: statvfs only writes into the struct we own; the path is NUL-terminated.
    let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
    if unsafe { libc::statvfs(c_path.as_ptr(), &mut st) } != 0 {
        return None;
    }
    let frsize = st.f_frsize as u64;
    Some((st.f_bavail as u64 * frsize, st.f_blocks as u64 * frsize))
}

/// One emulated drive: a letter, a host root and a current directory.
#[derive(Debug, Clone)]
pub struct HostDrive {
    letter: char,
    root: PathBuf,
    cwd: HostPath,
}

impl HostDrive {
    /// Mount `root` as drive `letter`. The root must be an existing directory.
    pub fn new(letter: char, root: impl Into<PathBuf>) -> GemdosResult<Self> {
        let letter = letter.to_ascii_uppercase();
        if !letter.is_ascii_uppercase() {
            return Err(GemdosError::InvalidDrive(letter));
        }
        let root = root.into();
        if !root.is_dir() {
            return Err(GemdosError::PathNotFound(root.display().to_string()));
        }
        Ok(Self {
            letter,
            root,
            cwd: HostPath::root(),
        })
    }

    pub fn letter(&self) -> char {
        self.letter
    }

    /// Drive ordinal (A = 0).
    pub fn number(&self) -> u16 {
        (self.letter as u8 - b'A') as u16
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cwd(&self) -> &HostPath {
        &self.cwd
    }

    /// Translate a guest path on this drive.
    pub fn resolve(&self, guest: &str, last: FinalComponent) -> GemdosResult<HostPath> {
        path::resolve(&self.root, &self.cwd, guest, last)
    }

    /// Translate a guest path straight to a host location.
    pub fn host_path(&self, guest: &str, last: FinalComponent) -> GemdosResult<PathBuf> {
        Ok(self.resolve(guest, last)?.to_host(&self.root))
    }

    /// Change the current directory. The target must exist.
    pub fn set_cwd(&mut self, guest: &str) -> GemdosResult<()> {
        let target = self.resolve(guest, FinalComponent::Directory)?;
        if !target.to_host(&self.root).is_dir() {
            return Err(GemdosError::PathNotFound(guest.to_string()));
        }
        self.cwd = target;
        Ok(())
    }

    pub fn reset_cwd(&mut self) {
        self.cwd = HostPath::root();
    }

    /// Free and total space of the filesystem holding the root.
    pub fn disk_info(&self) -> DiskInfo {
        match host_capacity(&self.root) {
            Some((free, total)) => DiskInfo::from_bytes(free, total),
            None => DiskInfo::fallback(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_new_validates() {
        let dir = tempfile::tempdir().unwrap();
        let drive = HostDrive::new('c', dir.path()).unwrap();
        assert_eq!(drive.letter(), 'C');
        assert_eq!(drive.number(), 2);

        assert!(HostDrive::new('1', dir.path()).is_err());
        assert!(HostDrive::new('D', dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_cwd() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Auto").join("sub")).unwrap();
        let mut drive = HostDrive::new('C', dir.path()).unwrap();

        drive.set_cwd("\\AUTO").unwrap();
        assert_eq!(drive.cwd().to_guest(), "\\Auto");
        drive.set_cwd("SUB").unwrap();
        assert_eq!(drive.cwd().to_guest(), "\\Auto\\sub");

        assert!(drive.set_cwd("NOWHERE").is_err());
        assert_eq!(drive.cwd().to_guest(), "\\Auto\\sub");

        drive.reset_cwd();
        assert!(drive.cwd().is_root());
    }

    #[test]
    fn test_disk_info() {
        let fallback = DiskInfo::fallback();
        assert_eq!(fallback.free_clusters, 10 * 1024);
        assert_eq!(fallback.total_clusters, 50 * 1024);
        assert_eq!(fallback.to_longs()[2..], [512, 2]);

        let huge = DiskInfo::from_bytes(u64::MAX, u64::MAX);
        assert_eq!(huge.total_clusters, i32::MAX as u32);

        let dir = tempfile::tempdir().unwrap();
        let info = HostDrive::new('C', dir.path()).unwrap().disk_info();
        assert!(info.free_clusters <= info.total_clusters);
        assert_eq!(info.bytes_per_sector, BYTES_PER_SECTOR);
    }
}
