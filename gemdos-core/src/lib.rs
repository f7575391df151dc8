//! GEMDOS Host Drive Core
//!
//! This crate lets an Atari ST emulator serve GEMDOS drives from host
//! directories:
//! - GEMDOS (TRAP #1) call interception and dispatch
//! - Guest path translation onto case-sensitive host filesystems
//! - Fsfirst/Fsnext search cursors and the open file table
//!
//! # Architecture
//!
//! The CPU core owns RAM and the trap; this crate owns everything else:
//! - `GuestMemory` trait: big-endian access to guest RAM
//! - `HostDrive`: one host directory mounted on a drive letter
//! - `GemdosEmulator`: services a trapped call and reports a `CallOutcome`
//! - `GuestHarness`: a minimal booted guest for driving calls from Rust

pub mod config;
pub mod emulator;
pub mod error;
pub mod fs;
pub mod gemdos;
pub mod harness;
pub mod memory;

pub use config::{load_config, load_config_from_path, DriveConfig, GemdosConfig};
pub use emulator::{GemdosEmulator, GemdosSnapshot};
pub use error::{GemdosError, GemdosResult};
pub use fs::{to_8_3, DiskInfo, HostDrive};
pub use gemdos::{CallOutcome, GemdosCall, TrapFrame};
pub use harness::GuestHarness;
pub use memory::{GuestMemory, StRam};
