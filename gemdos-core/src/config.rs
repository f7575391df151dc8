//! Host drive configuration.
//!
//! Configuration is a JSON document; every field is optional.
//!
//! ```json
//! {
//!   "drives": [{ "letter": "C", "path": "/home/st/hd" }],
//!   "bootDrive": "C",
//!   "volumeLabel": "EMULATED.001",
//!   "cartridge": { "gemdosHandler": 16384048 }
//! }
//! ```

use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GemdosError, GemdosResult};

/// Default synthetic volume label.
pub const DEFAULT_VOLUME_LABEL: &str = "EMULATED.001";

/// A host directory to mount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveConfig {
    pub letter: char,
    pub path: PathBuf,
}

/// Guest addresses inside the cartridge ROM used when installing the
/// interception vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CartridgeLayout {
    /// Address the GEMDOS vector is pointed at.
    pub gemdos_handler: u32,
    /// Long where the native GEMDOS vector is saved for chaining.
    pub old_gemdos_vector: u32,
    /// Native trampoline used for redirected program loads.
    pub pexec_trampoline: u32,
}

impl Default for CartridgeLayout {
    fn default() -> Self {
        Self {
            gemdos_handler: 0x00FA_0030,
            old_gemdos_vector: 0x00FA_001C,
            pexec_trampoline: 0x00FA_1000,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GemdosConfig {
    pub drives: Vec<DriveConfig>,
    /// Drive made current on reset; defaults to C: when any drive is mounted.
    pub boot_drive: Option<char>,
    pub volume_label: String,
    pub cartridge: CartridgeLayout,
}

impl Default for GemdosConfig {
    fn default() -> Self {
        Self {
            drives: Vec::new(),
            boot_drive: None,
            volume_label: DEFAULT_VOLUME_LABEL.to_string(),
            cartridge: CartridgeLayout::default(),
        }
    }
}

impl GemdosConfig {
    /// Configuration mounting a single host directory.
    pub fn with_drive(letter: char, path: impl Into<PathBuf>) -> Self {
        Self {
            drives: vec![DriveConfig {
                letter: letter.to_ascii_uppercase(),
                path: path.into(),
            }],
            ..Self::default()
        }
    }

    /// Boot drive letter after applying the default.
    pub fn boot_drive(&self) -> char {
        match self.boot_drive {
            Some(letter) => letter.to_ascii_uppercase(),
            None if !self.drives.is_empty() => 'C',
            None => 'A',
        }
    }

    /// Reject duplicate or non-letter drives.
    pub fn validate(&self) -> GemdosResult<()> {
        let mut seen = [false; 26];
        for drive in &self.drives {
            let letter = drive.letter.to_ascii_uppercase();
            if !letter.is_ascii_uppercase() {
                return Err(GemdosError::InvalidDrive(drive.letter));
            }
            let idx = (letter as u8 - b'A') as usize;
            if seen[idx] {
                return Err(GemdosError::InvalidDrive(letter));
            }
            seen[idx] = true;
        }
        if !self.boot_drive().is_ascii_uppercase() {
            return Err(GemdosError::InvalidDrive(self.boot_drive()));
        }
        Ok(())
    }
}

/// Parse configuration from a reader.
pub fn load_config<R: Read>(reader: R) -> GemdosResult<GemdosConfig> {
    let config: GemdosConfig = serde_json::from_reader(reader)?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from a file path.
pub fn load_config_from_path(path: &Path) -> GemdosResult<GemdosConfig> {
    let file = std::fs::File::open(path)?;
    load_config(std::io::BufReader::new(file))
}
