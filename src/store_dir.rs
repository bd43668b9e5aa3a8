use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use log::trace;

use crate::content_address::FileIngestionMethod;
use crate::hash::{self, Algorithm, Hash};
use crate::io::{StateParse, StatePrint};
use crate::path::{ParseStorePathError, ReadStorePathError, StorePath, StorePathSet};

struct DisplayStorePath<'a> {
    store_dir: &'a StoreDir,
    path: &'a StorePath,
}

impl<'a> fmt::Display for DisplayStorePath<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.store_dir, self.path)
    }
}

/// Store root directory.
///
/// A [`StorePath`] is only a hash and a name; rendering it as a full
/// path, parsing full paths back, and constructing new input-addressed
/// paths all need the root in hand.
///
/// ```
/// use drvstore::StoreDir;
/// let store_dir = StoreDir::new("/nix/store").unwrap();
/// let path = store_dir.parse_path("/nix/store/55xkmqns51sw7nrgykp5vnz36w4fr3cw-nix-2.1.3").unwrap();
/// assert_eq!("55xkmqns51sw7nrgykp5vnz36w4fr3cw-nix-2.1.3", path.to_string());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreDir(Arc<String>);

impl StoreDir {
    /// Create a new StoreDir from the given absolute path.
    pub fn new<P: Into<PathBuf>>(path: P) -> Result<StoreDir, ParseStorePathError> {
        let path = path.into();
        let path_s = path
            .to_str()
            .ok_or_else(|| ParseStorePathError::BadStorePath(path.to_string_lossy().into_owned()))?;
        if !path_s.starts_with('/') || path_s.ends_with('/') {
            return Err(ParseStorePathError::BadStorePath(path_s.into()));
        }
        Ok(StoreDir(Arc::new(path_s.to_string())))
    }

    pub fn to_str(&self) -> &str {
        self.0.as_ref()
    }

    /// Returns an object that implements [`Display`] for printing a
    /// [`StorePath`] complete with the store root.
    ///
    /// [`Display`]: fmt::Display
    pub fn display_path<'a>(&'a self, path: &'a StorePath) -> impl fmt::Display + 'a {
        DisplayStorePath {
            store_dir: self,
            path,
        }
    }

    pub fn print_path(&self, path: &StorePath) -> String {
        self.display_path(path).to_string()
    }

    /// Parses a full path string below this store root to a [`StorePath`].
    pub fn parse_path(&self, s: &str) -> Result<StorePath, ParseStorePathError> {
        let base_name = s
            .strip_prefix(self.to_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| ParseStorePathError::NotInStore(s.into()))?;
        if base_name.contains('/') {
            return Err(ParseStorePathError::BadStorePath(s.into()));
        }
        StorePath::new_from_base_name(base_name)
    }

    fn make_type(
        &self,
        mut path_type: String,
        references: &StorePathSet,
        has_self_reference: bool,
    ) -> String {
        for reference in references {
            path_type.push(':');
            path_type.push_str(&self.print_path(reference));
        }
        if has_self_reference {
            path_type.push_str(":self");
        }
        path_type
    }

    pub fn make_store_path_str(
        &self,
        path_type: &str,
        hash: &str,
        name: &str,
    ) -> Result<StorePath, ParseStorePathError> {
        let s = format!("{}:{}:{}:{}", path_type, hash, self, name);
        StorePath::from_hash(&hash::digest(Algorithm::SHA256, &s), name)
    }

    pub fn make_store_path(
        &self,
        path_type: &str,
        hash: &Hash,
        name: &str,
    ) -> Result<StorePath, ParseStorePathError> {
        self.make_store_path_str(path_type, &format!("{:x}", hash), name)
    }

    pub fn make_fixed_output_path(
        &self,
        method: FileIngestionMethod,
        hash: &Hash,
        name: &str,
        references: &StorePathSet,
        has_self_reference: bool,
    ) -> Result<StorePath, ParseStorePathError> {
        if let (Algorithm::SHA256, FileIngestionMethod::Recursive) = (hash.algorithm(), method) {
            self.make_store_path(
                &self.make_type("source".into(), references, has_self_reference),
                hash,
                name,
            )
        } else {
            assert!(references.is_empty());
            let hash = hash::digest(
                Algorithm::SHA256,
                format!("fixed:out:{:#}{:x}:", method, hash),
            );
            trace!("fixed output hash {:x}", hash);
            self.make_store_path("output:out", &hash, name)
        }
    }

    /// Path of a text object, e.g. a derivation file. The references
    /// are folded into the path type.
    pub fn make_text_path(
        &self,
        name: &str,
        hash: &Hash,
        references: &StorePathSet,
    ) -> Result<StorePath, ParseStorePathError> {
        assert_eq!(hash.algorithm(), Algorithm::SHA256);
        let path_type = self.make_type("text".into(), references, false);
        self.make_store_path(&path_type, hash, name)
    }

    /// Path of the output `id` of a derivation whose modulo-hash is
    /// `hash`; `name` is the already-joined output path name.
    pub fn make_output_path(
        &self,
        id: &str,
        hash: &Hash,
        name: &str,
    ) -> Result<StorePath, ParseStorePathError> {
        self.make_store_path(&format!("output:{}", id), hash, name)
    }
}

impl Default for StoreDir {
    fn default() -> Self {
        StoreDir::new("/nix/store").unwrap()
    }
}

impl StateParse<StorePath> for StoreDir {
    type Err = ReadStorePathError;

    fn parse(&self, s: &str) -> Result<StorePath, Self::Err> {
        Ok(self.parse_path(s)?)
    }
}

impl StatePrint<StorePath> for StoreDir {
    fn print(&self, path: &StorePath) -> String {
        self.print_path(path)
    }
}

impl AsRef<str> for StoreDir {
    fn as_ref(&self) -> &str {
        self.to_str()
    }
}

impl fmt::Display for StoreDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_str())
    }
}
