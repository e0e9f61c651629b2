//! Virtual paths and their mapping onto physical record names.
//!
//! Nothing of a virtual path ever reaches the medium: a node is
//! stored under the hex encoding of a keyed hash of its canonical path,
//! and its three record kinds share that id:
//!
//! ```text
//! <root>/<id>.node         metadata header + sealed blob
//! <root>/<id>.data         chunk records
//! <root>/<id>.parity<N>    XOR parity of chunk group N
//! ```
use std::fmt;
use std::str::FromStr;

use crate::crypto::kdf::MasterKey;
use crate::error::{ErrorKind, Result, StoreError};

/// Ordered sequence of non-empty names. The empty sequence is the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VirtualPath {
    segments: Vec<String>,
}

/// Checks that `name` can be stored as a single path segment.
pub fn validate_segment(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "empty path segment"
    } else if name == "." || name == ".." {
        "relative path segments are not supported"
    } else if name.contains('/') || name.contains('\0') {
        "path segment contains '/' or NUL"
    } else if name.len() > u16::MAX as usize {
        "path segment is too long"
    } else {
        return Ok(());
    };
    Err(StoreError::new(
        ErrorKind::BadArgs,
        format!("{reason}: {name:?}"),
    ))
}

impl VirtualPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses `"/a/b/c"`. The leading slash is optional, a single trailing
    /// slash is ignored, `""` and `"/"` are the root.
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.strip_prefix('/').unwrap_or(s);
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        Self::from_segments(trimmed.split('/'))
    }

    pub fn from_segments<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments = segments
            .into_iter()
            .map(Into::into)
            .collect::<Vec<String>>();
        for segment in &segments {
            validate_segment(segment)?;
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// The last segment, `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// The containing directory, `None` for the root.
    pub fn parent(&self) -> Option<VirtualPath> {
        let (_, init) = self.segments.split_last()?;
        Some(Self {
            segments: init.to_vec(),
        })
    }

    pub fn join(&self, name: &str) -> Result<VirtualPath> {
        validate_segment(name)?;
        let mut segments = self.segments.clone();
        segments.push(name.to_owned());
        Ok(Self { segments })
    }

    /// `"/"` for the root, `"/a/b/c"` otherwise.
    pub fn canonical(&self) -> String {
        if self.is_root() {
            return "/".to_owned();
        }
        self.segments.iter().fold(String::new(), |mut acc, s| {
            acc.push('/');
            acc.push_str(s);
            acc
        })
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl FromStr for VirtualPath {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Hex encoded keyed hash naming a node on the medium.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhysicalId(String);

impl PhysicalId {
    pub fn new(master: &MasterKey, path: &VirtualPath) -> Self {
        Self(hex::encode(master.name_digest(path)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhysicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Names of every physical record a node owns under the store root.
#[derive(Debug, Clone)]
pub struct NodeFiles {
    prefix: String,
}

impl NodeFiles {
    pub const NODE_SUFFIX: &'static str = ".node";
    pub const TMP_SUFFIX: &'static str = ".node.tmp";

    pub fn new(root: &str, id: &PhysicalId) -> Self {
        Self {
            prefix: format!("{root}/{id}"),
        }
    }

    pub fn node(&self) -> String {
        format!("{}{}", self.prefix, Self::NODE_SUFFIX)
    }

    pub fn node_tmp(&self) -> String {
        format!("{}{}", self.prefix, Self::TMP_SUFFIX)
    }

    pub fn data(&self) -> String {
        format!("{}.data", self.prefix)
    }

    pub fn parity(&self, group: u32) -> String {
        format!("{}.parity{group}", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_canonical() {
        assert!(VirtualPath::parse("/").unwrap().is_root());
        assert!(VirtualPath::parse("").unwrap().is_root());
        let p = VirtualPath::parse("/a/b/c").unwrap();
        assert_eq!(p.segments(), ["a", "b", "c"]);
        assert_eq!(p.canonical(), "/a/b/c");
        assert_eq!(VirtualPath::parse("a/b/c/").unwrap(), p);
        assert_eq!(VirtualPath::root().canonical(), "/");
    }

    #[test]
    fn test_rejects_bad_segments() {
        for bad in ["/a//b", "/a/../b", "/./a", "a///"] {
            let err = VirtualPath::parse(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::BadArgs, "{bad}");
        }
        assert!(VirtualPath::from_segments(["a\0"]).is_err());
        assert!(VirtualPath::from_segments(["a/b"]).is_err());
        assert!(VirtualPath::root().join(&"x".repeat(70_000)).is_err());
    }

    #[test]
    fn test_parent_name_join() {
        let p = VirtualPath::parse("/a/f.txt").unwrap();
        assert_eq!(p.name(), Some("f.txt"));
        assert_eq!(p.parent().unwrap().canonical(), "/a");
        assert_eq!(p.parent().unwrap().parent(), Some(VirtualPath::root()));
        assert_eq!(VirtualPath::root().parent(), None);
        assert_eq!(VirtualPath::root().join("a").unwrap().join("f.txt").unwrap(), p);
    }

    #[test]
    fn test_physical_ids_are_unlinkable() {
        let master = MasterKey::derive("pw", "secure", 10);
        let a = VirtualPath::parse("/secret-name").unwrap();
        let b = VirtualPath::parse("/secret-name2").unwrap();
        let id_a = PhysicalId::new(&master, &a);
        assert_ne!(id_a, PhysicalId::new(&master, &b));
        assert_eq!(id_a.as_str().len(), 64);
        assert!(!id_a.as_str().contains("secret"));
        let files = NodeFiles::new("secure", &id_a);
        assert_eq!(files.node(), format!("secure/{id_a}.node"));
        assert_eq!(files.parity(3), format!("secure/{id_a}.parity3"));
    }
}
