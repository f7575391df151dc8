//! Directory search state for Fsfirst/Fsnext.
//!
//! Each Fsfirst lists one host directory once, filters and sorts it, and
//! parks the result in a slot of a fixed-size circular table. Fsnext only
//! walks that snapshot; host changes made after Fsfirst are not seen.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use super::path::{list_dir_sorted, mask_matcher, to_8_3};
use super::stamp::{self, DosStamp};
use crate::error::{GemdosError, GemdosResult};
use crate::gemdos::attrib;

/// Number of concurrently remembered searches. Must be a power of two: the
/// slot index handed to the guest is masked with `MAX_SEARCHES - 1`.
pub const MAX_SEARCHES: usize = 256;

/// One directory entry as it will be reported to the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Real host name.
    pub host_name: String,
    /// Upper-case 8.3 name reported in the DTA.
    pub guest_name: String,
    pub attrib: u8,
    pub size: u32,
    pub stamp: DosStamp,
}

impl DirEntry {
    /// Stat `name` inside `dir`. Returns None if it vanished.
    pub fn from_host(dir: &Path, name: &str) -> Option<Self> {
        let meta = fs::metadata(dir.join(name)).ok()?;
        Some(Self {
            host_name: name.to_string(),
            guest_name: to_8_3(name),
            attrib: stamp::attributes(&meta),
            size: stamp::guest_size(&meta),
            stamp: stamp::modified_stamp(&meta),
        })
    }
}

/// Match a host name against a guest search mask.
///
/// Mask and name are compared dot-separated segment by segment, so `*`
/// and `?` never cross a `.`: `*` matches `README` but not `FOO.C`.
/// Comparison ignores case. `*.*` matches everything. Names starting with
/// `.` never match.
pub fn matches_mask(mask: &str, name: &str) -> bool {
    if name.starts_with('.') {
        return false;
    }
    if mask == "*.*" || mask.eq_ignore_ascii_case(name) {
        return true;
    }

    let masks: Vec<&str> = mask.split('.').collect();
    let parts: Vec<&str> = name.split('.').collect();
    if masks.len() != parts.len() {
        return false;
    }
    masks
        .iter()
        .zip(&parts)
        .all(|(m, part)| mask_matcher(m).is_some_and(|g| g.is_match(part)))
}

/// One search in progress.
#[derive(Debug, Default)]
pub struct SearchCursor {
    in_use: bool,
    entries: Vec<DirEntry>,
    position: usize,
    dir: PathBuf,
}

impl SearchCursor {
    pub fn in_use(&self) -> bool {
        self.in_use
    }

    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Host directory this search listed.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_exhausted(&self) -> bool {
        self.position >= self.entries.len()
    }

    fn clear(&mut self) {
        *self = SearchCursor::default();
    }
}

/// Result of claiming a slot for a new search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotClaim {
    pub index: usize,
    /// True if a live search was overwritten to make room.
    pub evicted: bool,
}

/// Fixed-size circular table of searches.
pub struct SearchTable {
    slots: Vec<SearchCursor>,
    next: usize,
}

impl Default for SearchTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_SEARCHES);
        slots.resize_with(MAX_SEARCHES, SearchCursor::default);
        Self { slots, next: 0 }
    }

    /// Slot the next search will occupy.
    pub fn next_index(&self) -> usize {
        self.next
    }

    /// Move the circular index (save-state restore).
    pub fn set_next_index(&mut self, index: usize) {
        self.next = index & (MAX_SEARCHES - 1);
    }

    pub fn cursor(&self, index: usize) -> Option<&SearchCursor> {
        self.slots.get(index & (MAX_SEARCHES - 1))
    }

    pub fn in_use_count(&self) -> usize {
        self.slots.iter().filter(|s| s.in_use).count()
    }

    /// Claim the next slot, overwriting whatever it held, and advance the
    /// circular index.
    pub fn claim(&mut self, dir: PathBuf, entries: Vec<DirEntry>) -> SlotClaim {
        let index = self.next;
        let slot = &mut self.slots[index];
        let evicted = slot.in_use;
        if evicted {
            debug!("search slot {} evicted ({})", index, slot.dir.display());
        }
        *slot = SearchCursor {
            in_use: true,
            entries,
            position: 0,
            dir,
        };
        self.next = (index + 1) & (MAX_SEARCHES - 1);
        SlotClaim { index, evicted }
    }

    /// Free a slot so it can no longer be advanced.
    pub fn release(&mut self, index: usize) {
        self.slots[index & (MAX_SEARCHES - 1)].clear();
    }

    /// Return the next entry of a search. Exhausted or unused slots keep
    /// answering `NoMoreFiles`.
    pub fn advance(&mut self, index: usize) -> GemdosResult<&DirEntry> {
        let slot = &mut self.slots[index & (MAX_SEARCHES - 1)];
        if !slot.in_use || slot.is_exhausted() {
            return Err(GemdosError::NoMoreFiles);
        }
        let pos = slot.position;
        slot.position += 1;
        Ok(&slot.entries[pos])
    }

    /// Drop every search and rewind the circular index.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.clear();
        }
        self.next = 0;
    }

    /// List `dir`, keep entries matching `mask` and `attr`, and start a search
    /// over them.
    ///
    /// Fails with `PathNotFound` if the directory cannot be listed and with
    /// `FileNotFound` if nothing matches; no slot is left claimed on failure.
    pub fn start(&mut self, dir: &Path, mask: &str, attr: u8) -> GemdosResult<SlotClaim> {
        let names = list_dir_sorted(dir)
            .map_err(|_| GemdosError::PathNotFound(dir.display().to_string()))?;

        let entries: Vec<DirEntry> = names
            .iter()
            .filter(|name| matches_mask(mask, name))
            .filter_map(|name| DirEntry::from_host(dir, name))
            .filter(|e| e.attrib & attrib::SUBDIRECTORY == 0 || attr & attrib::SUBDIRECTORY != 0)
            .collect();

        if entries.is_empty() {
            return Err(GemdosError::FileNotFound(mask.to_string()));
        }

        debug!(
            "search {} in {}: {} entries",
            mask,
            dir.display(),
            entries.len()
        );
        Ok(self.claim(dir.to_path_buf(), entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn entry(name: &str) -> DirEntry {
        DirEntry {
            host_name: name.to_string(),
            guest_name: to_8_3(name),
            attrib: 0,
            size: 0,
            stamp: DosStamp::default(),
        }
    }

    #[test]
    fn test_mask_all() {
        assert!(matches_mask("*.*", "FOO.C"));
        assert!(matches_mask("*.*", "README"));
        assert!(!matches_mask("*.*", ".hidden"));
        assert!(!matches_mask("*", ".."));
    }

    #[test]
    fn test_mask_wildcards() {
        assert!(matches_mask("*.TXT", "bar.txt"));
        assert!(!matches_mask("*.TXT", "bar.txt.bak"));
        assert!(matches_mask("F??.C", "foo.c"));
        assert!(!matches_mask("F??.C", "fo.c"));
        assert!(matches_mask("A*B*C", "AxxBxxC"));
        assert!(matches_mask("DESKTOP.INF", "desktop.inf"));
        assert!(!matches_mask("DESKTOP.INF", "newdesk.inf"));
        assert!(matches_mask("[A]*.TXT", "[a]b.txt"));
    }

    #[test]
    fn test_mask_star_stops_at_dot() {
        assert!(matches_mask("*", "README"));
        assert!(!matches_mask("*", "FOO.C"));
        assert!(matches_mask("*.C", "FOO.C"));
        assert!(!matches_mask("*.C", "A.B.C"));
        assert!(!matches_mask("FOO*", "FOO.C"));
        assert!(!matches_mask("F?O", "F.O"));
    }

    #[test]
    fn test_claim_wraps_and_evicts() {
        let mut table = SearchTable::new();
        for i in 0..MAX_SEARCHES {
            let claim = table.claim(PathBuf::from("/"), vec![entry("A")]);
            assert_eq!(claim.index, i);
            assert!(!claim.evicted);
        }
        assert_eq!(table.next_index(), 0);

        let claim = table.claim(PathBuf::from("/"), vec![entry("B")]);
        assert_eq!(claim, SlotClaim { index: 0, evicted: true });
        assert_eq!(table.cursor(0).unwrap().entries()[0].host_name, "B");
    }

    #[test]
    fn test_advance_is_idempotent_after_exhaustion() {
        let mut table = SearchTable::new();
        let claim = table.claim(PathBuf::from("/"), vec![entry("ONE"), entry("TWO")]);

        assert_eq!(table.advance(claim.index).unwrap().host_name, "ONE");
        assert_eq!(table.advance(claim.index).unwrap().host_name, "TWO");
        for _ in 0..3 {
            assert!(matches!(
                table.advance(claim.index),
                Err(GemdosError::NoMoreFiles)
            ));
            let cursor = table.cursor(claim.index).unwrap();
            assert_eq!(cursor.position(), cursor.entries().len());
        }
    }

    #[test]
    fn test_released_slot_cannot_advance() {
        let mut table = SearchTable::new();
        let claim = table.claim(PathBuf::from("/"), vec![entry("ONE")]);
        table.release(claim.index);
        assert!(!table.cursor(claim.index).unwrap().in_use());
        assert!(matches!(
            table.advance(claim.index),
            Err(GemdosError::NoMoreFiles)
        ));
    }

    #[test]
    fn test_start_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("FOO.C")).unwrap();
        File::create(dir.path().join("BAR.TXT")).unwrap();
        File::create(dir.path().join(".hidden")).unwrap();
        fs::create_dir(dir.path().join("SUB")).unwrap();

        let mut table = SearchTable::new();
        let claim = table.start(dir.path(), "*.*", 0).unwrap();
        let names: Vec<_> = table
            .cursor(claim.index)
            .unwrap()
            .entries()
            .iter()
            .map(|e| e.guest_name.clone())
            .collect();
        assert_eq!(names, vec!["BAR.TXT", "FOO.C"]);

        let with_dirs = table.start(dir.path(), "*.*", attrib::SUBDIRECTORY).unwrap();
        assert_eq!(table.cursor(with_dirs.index).unwrap().entries().len(), 3);
    }

    #[test]
    fn test_start_failures_leave_no_slot() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("FOO.C")).unwrap();

        let mut table = SearchTable::new();
        assert!(matches!(
            table.start(dir.path(), "*.TXT", 0),
            Err(GemdosError::FileNotFound(_))
        ));
        assert!(matches!(
            table.start(&dir.path().join("missing"), "*.*", 0),
            Err(GemdosError::PathNotFound(_))
        ));
        assert_eq!(table.in_use_count(), 0);
        assert_eq!(table.next_index(), 0);
    }
}
