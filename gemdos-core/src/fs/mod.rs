//! Host filesystem side of the emulated drive.
//!
//! - `path`: guest path translation
//! - `drive`: a mounted host directory
//! - `search`: Fsfirst/Fsnext cursor table
//! - `handles`: open file table
//! - `stamp`: metadata conversion

pub mod drive;
pub mod handles;
pub mod path;
pub mod search;
pub mod stamp;

pub use drive::{DiskInfo, HostDrive};
pub use handles::{CreateMode, HandleTable, OpenMode, BASE_FILEHANDLE, MAX_FILE_HANDLES};
pub use path::{to_8_3, FinalComponent, HostPath};
pub use search::{matches_mask, DirEntry, SearchTable, SlotClaim, MAX_SEARCHES};
pub use stamp::DosStamp;
