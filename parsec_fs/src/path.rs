//! Absolute, normalized paths inside a manifest tree.

use std::fmt;

use crate::error::PathError;

/// A normalized absolute path.
///
/// Parsing collapses repeated separators, skips `.` and resolves `..`.
/// Climbing above the root is an error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FsPath {
    parts: Vec<String>,
}

impl FsPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(raw: &str) -> Result<Self, PathError> {
        if raw.is_empty() {
            return Err(PathError::Invalid("empty path".into()));
        }
        if !raw.starts_with('/') {
            return Err(PathError::Invalid(format!("{raw}: path must be absolute")));
        }
        let mut parts: Vec<String> = Vec::new();
        for part in raw.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    if parts.pop().is_none() {
                        return Err(PathError::Invalid(format!("{raw}: climbs above root")));
                    }
                }
                name => parts.push(name.to_string()),
            }
        }
        Ok(Self { parts })
    }

    pub fn is_root(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn name(&self) -> Option<&str> {
        self.parts.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<FsPath> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            parts: self.parts[..self.parts.len() - 1].to_vec(),
        })
    }

    pub fn join(&self, name: &str) -> FsPath {
        let mut parts = self.parts.clone();
        parts.push(name.to_string());
        Self { parts }
    }

    /// `true` if `self` equals `ancestor` or lies below it.
    pub fn starts_with(&self, ancestor: &FsPath) -> bool {
        self.parts.starts_with(&ancestor.parts)
    }
}

impl fmt::Display for FsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.parts.is_empty() {
            return f.write_str("/");
        }
        for part in &self.parts {
            write!(f, "/{part}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_separators_and_dots() {
        let path = FsPath::parse("//a/./b//c/../d/").unwrap();
        assert_eq!(path.to_string(), "/a/b/d");
        assert_eq!(path.name(), Some("d"));
        assert_eq!(path.parent().unwrap().to_string(), "/a/b");
        assert!(FsPath::parse("/").unwrap().is_root());
        assert!(FsPath::parse("/a/..").unwrap().is_root());
    }

    #[test]
    fn rejects_invalid_paths() {
        assert!(matches!(FsPath::parse(""), Err(PathError::Invalid(_))));
        assert!(matches!(FsPath::parse("a/b"), Err(PathError::Invalid(_))));
        assert!(matches!(FsPath::parse("/a/../.."), Err(PathError::Invalid(_))));
    }

    #[test]
    fn ancestry() {
        let a = FsPath::parse("/a").unwrap();
        let ab = FsPath::parse("/a/b").unwrap();
        let abc = FsPath::parse("/abc").unwrap();
        assert!(ab.starts_with(&a));
        assert!(a.starts_with(&a));
        assert!(!abc.starts_with(&a));
        assert!(ab.starts_with(&FsPath::root()));
    }
}
