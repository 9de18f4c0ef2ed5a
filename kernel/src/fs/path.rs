//! File System Path Utilities
//!
//! Splits `/`-separated paths into components and encodes each one in the
//! on-disk 8.3 form: 8 name bytes and 3 extension bytes, space-padded and
//! upper-cased.
//!
//! # Path Formats
//! - `/docs/readme.txt` - absolute, starts at the root directory
//! - `docs/readme.txt` - relative to the current working directory
//! - `""` or `/` - the current directory or the root itself

use core::fmt;

use alloc::string::String;
use alloc::vec::Vec;

use super::error::{FsError, FsResult};

/// Maximum path length in bytes
pub const MAX_PATH: usize = 256;

/// Path separator character
pub const PATH_SEPARATOR: char = '/';

/// Name part length of an 8.3 name
pub const NAME_LEN: usize = 8;

/// Extension part length of an 8.3 name
pub const EXT_LEN: usize = 3;

/// A path component in on-disk 8.3 form
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShortName([u8; NAME_LEN + EXT_LEN]);

impl ShortName {
    /// The `.` entry
    pub const DOT: ShortName = ShortName(*b".          ");
    /// The `..` entry
    pub const DOTDOT: ShortName = ShortName(*b"..         ");

    /// Wrap a raw 11-byte name field
    pub const fn from_raw(raw: [u8; NAME_LEN + EXT_LEN]) -> Self {
        ShortName(raw)
    }

    /// Encode one path component
    ///
    /// The component must not contain a separator. Lowercase letters are
    /// folded to uppercase; anything over 8 name or 3 extension bytes,
    /// a reserved character, or a leading dot (other than `.`/`..`) is
    /// rejected with `InvalidName`.
    pub fn parse(component: &str) -> FsResult<Self> {
        let bytes = component.as_bytes();
        match bytes {
            b"" => return Err(FsError::InvalidName),
            b"." => return Ok(Self::DOT),
            b".." => return Ok(Self::DOTDOT),
            [b'.', ..] => return Err(FsError::InvalidName),
            _ => {}
        }

        let mut raw = [b' '; NAME_LEN + EXT_LEN];
        let dot = bytes.iter().position(|&b| b == b'.').unwrap_or(bytes.len());
        let (name, ext) = (&bytes[..dot], bytes.get(dot + 1..).unwrap_or(&[]));

        if name.len() > NAME_LEN || ext.len() > EXT_LEN {
            return Err(FsError::InvalidName);
        }

        for (i, &b) in name.iter().enumerate() {
            if is_reserved_char(b) {
                return Err(FsError::InvalidName);
            }
            raw[i] = b.to_ascii_uppercase();
        }

        for (i, &b) in ext.iter().enumerate() {
            if !b.is_ascii_alphanumeric() {
                return Err(FsError::InvalidName);
            }
            raw[NAME_LEN + i] = b.to_ascii_uppercase();
        }

        Ok(ShortName(raw))
    }

    /// Raw 11-byte name field
    pub fn as_bytes(&self) -> &[u8; NAME_LEN + EXT_LEN] {
        &self.0
    }
}

impl fmt::Display for ShortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn trim(part: &[u8]) -> &[u8] {
            let len = part.iter().rposition(|&b| b != b' ').map_or(0, |p| p + 1);
            &part[..len]
        }
        let name = trim(&self.0[..NAME_LEN]);
        let ext = trim(&self.0[NAME_LEN..]);

        for &b in name {
            write!(f, "{}", b as char)?;
        }
        if !ext.is_empty() {
            write!(f, ".")?;
            for &b in ext {
                write!(f, "{}", b as char)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ShortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShortName(\"{}\")", self)
    }
}

/// Characters that may not appear in the name part of an 8.3 name
fn is_reserved_char(c: u8) -> bool {
    matches!(c,
        0x00..=0x1F | 0x7F |
        b'"' | b'*' |
        b'+'..=b'/' |
        b':'..=b'?' |
        b'['..=b']' |
        b'|'..=b'~')
}

/// Iterator over the encoded components of a path
///
/// Yields `Some(Ok(name))` per component, `Some(Err(InvalidName))` for a
/// component that cannot be encoded, and `None` once the path is consumed.
/// Empty components from repeated slashes are skipped.
pub struct Components<'a> {
    rest: &'a str,
}

impl<'a> Components<'a> {
    /// The unconsumed tail of the path
    pub fn rest(&self) -> &'a str {
        self.rest
    }
}

impl<'a> Iterator for Components<'a> {
    type Item = FsResult<ShortName>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rest = self.rest.trim_start_matches(PATH_SEPARATOR);
        if self.rest.is_empty() {
            return None;
        }

        let end = self.rest.find(PATH_SEPARATOR).unwrap_or(self.rest.len());
        let (component, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(ShortName::parse(component))
    }
}

/// Split a path into encoded components; a leading `/` is not a component
pub fn components(path: &str) -> Components<'_> {
    Components { rest: path }
}

/// Check if path is absolute
pub fn is_absolute(path: &str) -> bool {
    path.starts_with(PATH_SEPARATOR)
}

/// Join a relative path onto a directory path
pub fn join(dir: &str, relative: &str) -> String {
    let mut joined = String::with_capacity(dir.len() + relative.len() + 1);
    joined.push_str(dir);
    if !joined.ends_with(PATH_SEPARATOR) {
        joined.push(PATH_SEPARATOR);
    }
    joined.push_str(relative);
    joined
}

/// Collapse `.`, `..` and repeated separators of an absolute path
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split(PATH_SEPARATOR) {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }

    let mut normalized = String::with_capacity(path.len() + 1);
    for part in &parts {
        normalized.push(PATH_SEPARATOR);
        normalized.push_str(part);
    }
    if normalized.is_empty() {
        normalized.push(PATH_SEPARATOR);
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;
    use alloc::vec::Vec;

    #[test]
    fn test_short_name_encoding() {
        assert_eq!(ShortName::parse("hello.txt").unwrap().as_bytes(), b"HELLO   TXT");
        assert_eq!(ShortName::parse("README").unwrap().as_bytes(), b"README     ");
        assert_eq!(ShortName::parse("a.c").unwrap().as_bytes(), b"A       C  ");
        assert_eq!(ShortName::parse("abcdefgh.xyz").unwrap().as_bytes(), b"ABCDEFGHXYZ");
        assert_eq!(ShortName::parse("trail.").unwrap().as_bytes(), b"TRAIL      ");
        assert_eq!(ShortName::parse("my_file!").unwrap().as_bytes(), b"MY_FILE!   ");
    }

    #[test]
    fn test_dot_entries() {
        assert_eq!(ShortName::parse(".").unwrap(), ShortName::DOT);
        assert_eq!(ShortName::parse("..").unwrap(), ShortName::DOTDOT);
        assert_ne!(ShortName::DOT, ShortName::DOTDOT);
        assert_eq!(ShortName::parse(".hidden"), Err(FsError::InvalidName));
        assert_eq!(ShortName::parse("..."), Err(FsError::InvalidName));
    }

    #[test]
    fn test_invalid_names() {
        for bad in ["toolongname", "name.long", "a*b", "a+b", "a,b", "q?", "x:y",
                    "br[a]ce", "pi|pe", "til~de", "quo\"te", "a.b.c", "ext.t_t", ""] {
            assert_eq!(ShortName::parse(bad), Err(FsError::InvalidName), "{}", bad);
        }
    }

    #[test]
    fn test_display_round_trip() {
        let name = ShortName::parse("notes.md").unwrap();
        assert_eq!(format!("{}", name), "NOTES.MD");
        assert_eq!(format!("{}", ShortName::parse("docs").unwrap()), "DOCS");
    }

    #[test]
    fn test_components() {
        let names: Vec<_> = components("/docs//notes.md/").collect();
        assert_eq!(names.len(), 2);
        assert_eq!(names[0].unwrap().as_bytes(), b"DOCS       ");
        assert_eq!(names[1].unwrap().as_bytes(), b"NOTES   MD ");

        assert!(components("").next().is_none());
        assert!(components("/").next().is_none());

        let mut it = components("ok/bad*name/more");
        assert!(it.next().unwrap().is_ok());
        assert_eq!(it.next().unwrap(), Err(FsError::InvalidName));
        assert_eq!(it.rest(), "/more");
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/", "a.txt"), "/a.txt");
        assert_eq!(join("/docs", "a.txt"), "/docs/a.txt");
        assert!(is_absolute("/x"));
        assert!(!is_absolute("x"));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("/docs/./sub/"), "/docs/sub");
        assert_eq!(normalize("/docs/sub/../x.txt"), "/docs/x.txt");
        assert_eq!(normalize("/../.."), "/");
    }
}
