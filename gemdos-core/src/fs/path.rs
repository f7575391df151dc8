//! Guest path to host path translation.
//!
//! Guest paths use `\` separators, optional `X:` drive prefixes and
//! case-insensitive 8.3 names. Host directories may be case-sensitive and
//! hold long names. Translation walks the guest components and substitutes
//! the real host name of each one that exists.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};
use log::debug;

use crate::error::{GemdosError, GemdosResult};

/// Longest host path (in bytes, relative to the drive root) we will build.
pub const MAX_HOST_PATH: usize = 4096;

/// Guest short names have at most 8 characters before the extension.
pub const SHORT_NAME_LEN: usize = 8;

/// Short name extension length.
pub const SHORT_EXT_LEN: usize = 3;

/// A location under a drive root, as an ordered list of host component names.
///
/// The empty list is the root. Components are validated on entry: `.` is
/// dropped, `..` pops and may not climb above the root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostPath {
    segments: Vec<String>,
}

impl HostPath {
    /// The drive root.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last component, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(|s| s.as_str())
    }

    /// The containing directory.
    pub fn parent(&self) -> HostPath {
        let mut p = self.clone();
        p.segments.pop();
        p
    }

    fn byte_len(&self) -> usize {
        self.segments.iter().map(|s| s.len() + 1).sum()
    }

    /// Append one component.
    pub fn push(&mut self, segment: &str) -> GemdosResult<()> {
        match segment {
            "" | "." => Ok(()),
            ".." => {
                if self.segments.pop().is_none() {
                    return Err(GemdosError::PathNotFound("..".to_string()));
                }
                Ok(())
            }
            _ => {
                if segment.contains('\0') {
                    return Err(GemdosError::PathNotFound(segment.to_string()));
                }
                if self.byte_len() + segment.len() + 1 > MAX_HOST_PATH {
                    return Err(GemdosError::Range);
                }
                self.segments.push(segment.to_string());
                Ok(())
            }
        }
    }

    /// Replace the last component.
    fn set_last(&mut self, segment: String) {
        if let Some(last) = self.segments.last_mut() {
            *last = segment;
        }
    }

    /// Host filesystem location of this path under `root`.
    pub fn to_host(&self, root: &Path) -> PathBuf {
        let mut out = root.to_path_buf();
        for s in &self.segments {
            out.push(s);
        }
        out
    }

    /// Guest representation: `\A\B`, or the empty string for the root.
    pub fn to_guest(&self) -> String {
        let mut out = String::new();
        for s in &self.segments {
            out.push('\\');
            out.push_str(s);
        }
        out
    }
}

/// How the final component of a guest path is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalComponent {
    /// Substitute a matching host name of any type.
    Any,
    /// Substitute only a matching host directory.
    Directory,
    /// Leave the final component untouched (search masks).
    Verbatim,
}

/// Split off an `X:` drive prefix. Returns the drive ordinal (A=0) and the rest.
pub fn split_drive(guest: &str) -> (Option<u16>, &str) {
    let bytes = guest.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        let drive = (bytes[0].to_ascii_uppercase() - b'A') as u16;
        (Some(drive), &guest[2..])
    } else {
        (None, guest)
    }
}

/// True if the component carries search wildcards.
pub fn has_wildcards(name: &str) -> bool {
    name.contains('*') || name.contains('?')
}

/// Translate a guest path into a location under the drive root.
///
/// `cwd` is the drive's current directory, used when the path is not
/// absolute. Every component but the last must name an existing directory
/// if it is to be case-corrected; missing components are kept verbatim so
/// that create-style calls get a deterministic target.
pub fn resolve(
    root: &Path,
    cwd: &HostPath,
    guest: &str,
    last: FinalComponent,
) -> GemdosResult<HostPath> {
    let (_, rest) = split_drive(guest);

    let mut path = if rest.starts_with('\\') || rest.starts_with('/') {
        HostPath::root()
    } else {
        cwd.clone()
    };

    let components: Vec<&str> = rest
        .split(['\\', '/'])
        .filter(|c| !c.is_empty())
        .collect();

    for (i, component) in components.iter().enumerate() {
        let is_last = i + 1 == components.len();
        path.push(component)?;
        if matches!(*component, "." | "..") {
            continue;
        }

        let want_dir = !is_last || last == FinalComponent::Directory;
        if is_last && (last == FinalComponent::Verbatim || has_wildcards(component)) {
            continue;
        }

        let dir = path.parent().to_host(root);
        if let Some(real) = find_host_name(&dir, component, want_dir) {
            if real != *component {
                debug!("{} -> {} in {}", component, real, dir.display());
            }
            path.set_last(real);
        }
    }

    Ok(path)
}

/// Look for the host entry in `dir` that the guest name `wanted` refers to.
///
/// An exact byte match wins. Otherwise the first entry in sorted listing
/// order matching case-insensitively wins, then the first whose short-name
/// form matches (long host names seen through 8.3 eyes).
pub fn find_host_name(dir: &Path, wanted: &str, want_dir: bool) -> Option<String> {
    let exact = dir.join(wanted);
    if is_acceptable(&exact, want_dir) {
        return Some(wanted.to_string());
    }

    let entries = list_dir_sorted(dir).ok()?;

    if let Some(matcher) = name_matcher(wanted) {
        let ci = entries
            .iter()
            .filter(|name| matcher.is_match(name.as_str()))
            .find(|name| is_acceptable(&dir.join(name), want_dir));
        if let Some(name) = ci {
            return Some(name.clone());
        }
    }

    entries
        .iter()
        .filter(|name| short_name_matches(wanted, name))
        .find(|name| is_acceptable(&dir.join(name), want_dir))
        .cloned()
}

/// Case-insensitive matcher for one literal guest name component.
pub fn name_matcher(name: &str) -> Option<GlobMatcher> {
    build_matcher(&glob_pattern(name, false))
}

/// Case-insensitive matcher for one dot-free segment of a search mask. `*`
/// and `?` keep their wildcard meaning.
pub fn mask_matcher(segment: &str) -> Option<GlobMatcher> {
    build_matcher(&glob_pattern(segment, true))
}

fn build_matcher(glob: &str) -> Option<GlobMatcher> {
    GlobBuilder::new(glob)
        .case_insensitive(true)
        .literal_separator(true)
        .backslash_escape(false)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|e| debug!("bad name pattern {:?}: {}", glob, e))
        .ok()
}

/// Bracket every glob metacharacter so it matches itself.
fn glob_pattern(name: &str, wildcards: bool) -> String {
    let mut glob = String::with_capacity(name.len() + 8);
    for c in name.chars() {
        match c {
            '*' | '?' if wildcards => glob.push(c),
            '*' | '?' | '[' | ']' | '{' | '}' => {
                glob.push('[');
                glob.push(c);
                glob.push(']');
            }
            c => glob.push(c),
        }
    }
    glob
}

fn is_acceptable(path: &Path, want_dir: bool) -> bool {
    // fs::metadata follows symlinks, so a link to a directory counts as one
    match fs::metadata(path) {
        Ok(meta) => !want_dir || meta.is_dir(),
        Err(_) => false,
    }
}

/// Directory listing as UTF-8 names, sorted byte-wise. Names the host cannot
/// represent as UTF-8 are skipped.
pub fn list_dir_sorted(dir: &Path) -> io::Result<Vec<String>> {
    let mut names: Vec<String> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort();
    Ok(names)
}

fn split_ext(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos + 1..]),
        _ => (name, ""),
    }
}

/// True if the guest name is a full-length short name that the host name
/// truncates to: `LONGFILE.TXT` matches `longfilename.txt`.
pub fn short_name_matches(guest: &str, host: &str) -> bool {
    let (g_base, g_ext) = split_ext(guest);
    if g_base.chars().count() < SHORT_NAME_LEN {
        return false;
    }
    let (h_base, h_ext) = split_ext(host);
    let h_base_short: String = h_base.chars().take(g_base.chars().count()).collect();
    let h_ext_short: String = h_ext.chars().take(SHORT_EXT_LEN).collect();

    h_base_short.eq_ignore_ascii_case(g_base) && h_ext_short.eq_ignore_ascii_case(g_ext)
}

/// Convert a host filename to the upper-case 8.3 form the guest sees.
///
/// - Uppercases everything
/// - Truncates name to 8 chars, extension to 3 chars
///
/// # Examples
/// ```
/// use gemdos_core::to_8_3;
/// assert_eq!(to_8_3("hello.txt"), "HELLO.TXT");
/// assert_eq!(to_8_3("VeryLongName.extension"), "VERYLONG.EXT");
/// assert_eq!(to_8_3("noext"), "NOEXT");
/// ```
pub fn to_8_3(filename: &str) -> String {
    let upper = filename.to_uppercase();
    let (name, ext) = split_ext(&upper);

    let short_name: String = name.chars().take(SHORT_NAME_LEN).collect();
    let short_ext: String = ext.chars().take(SHORT_EXT_LEN).collect();

    if short_ext.is_empty() {
        short_name
    } else {
        format!("{}.{}", short_name, short_ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn resolve_any(root: &Path, guest: &str) -> HostPath {
        resolve(root, &HostPath::root(), guest, FinalComponent::Any).unwrap()
    }

    #[test]
    fn test_to_8_3_basic() {
        assert_eq!(to_8_3("hello.txt"), "HELLO.TXT");
        assert_eq!(to_8_3("HELLO.TXT"), "HELLO.TXT");
    }

    #[test]
    fn test_to_8_3_truncation() {
        assert_eq!(to_8_3("verylongname.extension"), "VERYLONG.EXT");
    }

    #[test]
    fn test_to_8_3_dotfile_keeps_name() {
        assert_eq!(to_8_3(".profile"), ".PROFILE");
    }

    #[test]
    fn test_split_drive() {
        assert_eq!(split_drive("C:\\AUTO"), (Some(2), "\\AUTO"));
        assert_eq!(split_drive("d:foo"), (Some(3), "foo"));
        assert_eq!(split_drive("\\AUTO"), (None, "\\AUTO"));
        assert_eq!(split_drive(""), (None, ""));
    }

    #[test]
    fn test_host_path_push() {
        let mut p = HostPath::root();
        p.push("AUTO").unwrap();
        p.push(".").unwrap();
        p.push("SUB").unwrap();
        assert_eq!(p.to_guest(), "\\AUTO\\SUB");
        p.push("..").unwrap();
        assert_eq!(p.to_guest(), "\\AUTO");
        p.push("..").unwrap();
        assert!(p.is_root());
    }

    #[test]
    fn test_host_path_rejects_escape() {
        let mut p = HostPath::root();
        let err = p.push("..").unwrap_err();
        assert_eq!(err.code(), crate::error::code::EPTHNF);
    }

    #[test]
    fn test_host_path_length_limit() {
        let mut p = HostPath::root();
        let long = "X".repeat(1000);
        for _ in 0..4 {
            p.push(&long).unwrap();
        }
        assert!(matches!(p.push(&long), Err(GemdosError::Range)));
    }

    #[test]
    fn test_resolve_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("README.TXT")).unwrap();

        let p = resolve_any(dir.path(), "readme.txt");
        assert_eq!(p.to_host(dir.path()), dir.path().join("README.TXT"));
    }

    #[test]
    fn test_resolve_glob_metacharacters_are_literal() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("Data[1]")).unwrap();
        File::create(dir.path().join("Data[1]").join("set{a}.dat")).unwrap();
        fs::create_dir(dir.path().join("Docs")).unwrap();

        let p = resolve_any(dir.path(), "\\DATA[1]\\SET{A}.DAT");
        assert_eq!(
            p.to_host(dir.path()),
            dir.path().join("Data[1]").join("set{a}.dat")
        );

        // A star inside a directory component is not a wildcard
        let p = resolve_any(dir.path(), "\\D*\\X");
        assert_eq!(p.segments()[0], "D*");
    }

    #[test]
    fn test_name_and_mask_matchers() {
        assert!(name_matcher("readme.txt").unwrap().is_match("README.TXT"));
        assert!(!name_matcher("D?CS").unwrap().is_match("DOCS"));
        assert!(name_matcher("D?CS").unwrap().is_match("d?cs"));
        assert!(mask_matcher("F*").unwrap().is_match("foo"));
        assert!(mask_matcher("F?O").unwrap().is_match("fOo"));
        assert!(!mask_matcher("F?O").unwrap().is_match("fo"));
    }

    #[test]
    fn test_resolve_directories_and_drive() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Auto").join("lib")).unwrap();
        File::create(dir.path().join("Auto").join("lib").join("Prog.Prg")).unwrap();

        let p = resolve_any(dir.path(), "C:\\AUTO\\LIB\\PROG.PRG");
        assert_eq!(
            p.to_host(dir.path()),
            dir.path().join("Auto").join("lib").join("Prog.Prg")
        );
    }

    #[test]
    fn test_resolve_missing_final_component_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("data")).unwrap();

        let p = resolve_any(dir.path(), "\\DATA\\NEW.TXT");
        assert_eq!(p.to_host(dir.path()), dir.path().join("data").join("NEW.TXT"));
    }

    #[test]
    fn test_resolve_forward_slashes_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        File::create(dir.path().join("src").join("main.c")).unwrap();

        let p = resolve_any(dir.path(), "/src/main.c");
        assert_eq!(p.to_host(dir.path()), dir.path().join("src").join("main.c"));
    }

    #[test]
    fn test_resolve_relative_to_cwd() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("games")).unwrap();
        File::create(dir.path().join("games").join("Tetris.prg")).unwrap();

        let mut cwd = HostPath::root();
        cwd.push("games").unwrap();
        let p = resolve(dir.path(), &cwd, "TETRIS.PRG", FinalComponent::Any).unwrap();
        assert_eq!(
            p.to_host(dir.path()),
            dir.path().join("games").join("Tetris.prg")
        );

        let up = resolve(dir.path(), &cwd, "..\\X", FinalComponent::Any).unwrap();
        assert_eq!(up.to_guest(), "\\X");
    }

    #[test]
    fn test_resolve_rejects_escape_from_root() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve(
            dir.path(),
            &HostPath::root(),
            "\\..\\etc\\passwd",
            FinalComponent::Any,
        )
        .unwrap_err();
        assert_eq!(err.code(), crate::error::code::EPTHNF);
    }

    #[test]
    fn test_resolve_long_host_name() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("longfilename.text")).unwrap();

        let p = resolve_any(dir.path(), "LONGFILE.TEX");
        assert_eq!(p.file_name(), Some("longfilename.text"));

        // Short guest names need a full match
        let q = resolve_any(dir.path(), "LONG.TEX");
        assert_eq!(q.file_name(), Some("LONG.TEX"));
    }

    #[test]
    fn test_resolve_case_collision_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("A.TXT")).unwrap();
        File::create(dir.path().join("a.txt")).unwrap();
        let names = list_dir_sorted(dir.path()).unwrap();
        if names.len() < 2 {
            // Case-insensitive host filesystem: nothing to disambiguate
            return;
        }

        let first = resolve_any(dir.path(), "A.Txt");
        for _ in 0..5 {
            assert_eq!(resolve_any(dir.path(), "A.Txt"), first);
        }
        assert_eq!(first.file_name(), Some("A.TXT"));
    }

    #[test]
    fn test_resolve_wildcard_kept_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("Docs")).unwrap();

        let p = resolve_any(dir.path(), "\\DOCS\\*.*");
        assert_eq!(p.to_host(dir.path()), dir.path().join("Docs").join("*.*"));
    }

    #[test]
    fn test_resolve_directory_only() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("thing")).unwrap();

        let p = resolve(
            dir.path(),
            &HostPath::root(),
            "THING",
            FinalComponent::Directory,
        )
        .unwrap();
        // A plain file is not a directory match
        assert_eq!(p.file_name(), Some("THING"));
    }
}
