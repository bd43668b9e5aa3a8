use std::collections::BTreeSet;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::base32;
use crate::hash;

pub type StorePathSet = BTreeSet<StorePath>;

/// Extension of derivation files in the store.
pub const DRV_EXTENSION: &str = ".drv";

pub const STORE_PATH_HASH_BYTES: usize = 20;
pub const STORE_PATH_HASH_CHARS: usize = 32;

#[derive(Error, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub enum ParseStorePathError {
    #[error("path '{0}' is not a store path")]
    BadStorePath(String),
    #[error("path '{0}' is not in the store")]
    NotInStore(String),
    #[error("invalid base32 '{1}' in store path")]
    BadBase32(#[source] base32::BadBase32, String),
    #[error("store path name is empty")]
    StorePathNameEmpty,
    #[error("store path name is longer than 211 characters")]
    StorePathNameTooLong,
    #[error("store path name '{0}' contains forbidden character")]
    BadStorePathName(String),
}

#[derive(Error, Debug)]
pub enum ReadStorePathError {
    #[error("{0}")]
    BadStorePath(#[from] ParseStorePathError),
    #[error("io error reading store path {0}")]
    IO(#[from] std::io::Error),
}

/// A store object reference: the truncated digest that prefixes the
/// basename plus the human-readable name. The rendering is
/// `<base32-hash>-<name>`; the store root it sits under is carried
/// separately by [`StoreDir`].
///
/// [`StoreDir`]: crate::StoreDir
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorePath {
    pub hash: StorePathHash,
    pub name: StorePathName,
}

impl StorePath {
    pub fn new_from_base_name(base_name: &str) -> Result<Self, ParseStorePathError> {
        if base_name.len() < STORE_PATH_HASH_CHARS + 1
            || base_name.as_bytes()[STORE_PATH_HASH_CHARS] != b'-'
        {
            return Err(ParseStorePathError::BadStorePath(base_name.into()));
        }
        Ok(StorePath {
            hash: StorePathHash::new(&base_name[0..STORE_PATH_HASH_CHARS])?,
            name: StorePathName::new(&base_name[STORE_PATH_HASH_CHARS + 1..])?,
        })
    }

    pub fn from_parts(
        hash: [u8; STORE_PATH_HASH_BYTES],
        name: &str,
    ) -> Result<Self, ParseStorePathError> {
        Ok(StorePath {
            hash: StorePathHash(hash),
            name: StorePathName::new(name)?,
        })
    }

    pub fn from_hash(hash: &hash::Hash, name: &str) -> Result<Self, ParseStorePathError> {
        Ok(StorePath {
            hash: StorePathHash::new_from_hash(hash),
            name: StorePathName::new(name)?,
        })
    }

    pub fn is_derivation(&self) -> bool {
        self.name.ends_with(DRV_EXTENSION)
    }

    /// The derivation name, with the `.drv` suffix stripped. Must only
    /// be called on paths for which [`is_derivation`] holds.
    ///
    /// [`is_derivation`]: #method.is_derivation
    pub fn name_from_drv(&self) -> String {
        let name_with_suffix = self.name.name();
        assert!(name_with_suffix.ends_with(DRV_EXTENSION));
        name_with_suffix[..name_with_suffix.len() - DRV_EXTENSION.len()].to_owned()
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.hash, self.name)
    }
}

impl FromStr for StorePath {
    type Err = ParseStorePathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StorePath::new_from_base_name(s)
    }
}

impl TryFrom<String> for StorePath {
    type Error = ParseStorePathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        StorePath::new_from_base_name(&value)
    }
}

impl From<StorePath> for String {
    fn from(path: StorePath) -> Self {
        path.to_string()
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct StorePathHash([u8; STORE_PATH_HASH_BYTES]);

impl StorePathHash {
    pub fn new(s: &str) -> Result<Self, ParseStorePathError> {
        assert_eq!(s.len(), STORE_PATH_HASH_CHARS);
        let v = base32::decode(s).map_err(|e| ParseStorePathError::BadBase32(e, s.into()))?;
        let mut bytes = [0u8; STORE_PATH_HASH_BYTES];
        bytes.copy_from_slice(&v[0..STORE_PATH_HASH_BYTES]);
        Ok(Self(bytes))
    }

    /// Compress a full digest down to the store-path width by folding
    /// it with xor.
    pub fn new_from_hash(hash: &hash::Hash) -> Self {
        let mut bytes = [0u8; STORE_PATH_HASH_BYTES];
        for (i, b) in hash.as_ref().iter().enumerate() {
            bytes[i % STORE_PATH_HASH_BYTES] ^= b;
        }
        StorePathHash(bytes)
    }

    pub fn hash(&self) -> &[u8; STORE_PATH_HASH_BYTES] {
        &self.0
    }
}

impl AsRef<[u8]> for StorePathHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Deref for StorePathHash {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for StorePathHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = [0u8; STORE_PATH_HASH_CHARS];
        base32::encode_into(&self.0, &mut buf);
        f.write_str(std::str::from_utf8(&buf).unwrap())
    }
}

impl fmt::Debug for StorePathHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Ord for StorePathHash {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Store paths are ordered by their base32 rendering, and the
        // encoder emits bytes in reverse order.
        self.0.iter().rev().cmp(other.0.iter().rev())
    }
}

impl PartialOrd for StorePathHash {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct StorePathName(String);

impl StorePathName {
    pub fn new(s: &str) -> Result<Self, ParseStorePathError> {
        if s.is_empty() {
            return Err(ParseStorePathError::StorePathNameEmpty);
        }
        if s.len() > 211 {
            return Err(ParseStorePathError::StorePathNameTooLong);
        }
        if s.starts_with('.')
            || !s.chars().all(|c| {
                c.is_ascii_alphanumeric()
                    || c == '+'
                    || c == '-'
                    || c == '.'
                    || c == '_'
                    || c == '?'
                    || c == '='
            })
        {
            return Err(ParseStorePathError::BadStorePathName(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorePathName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorePathName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for StorePathName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(any(test, feature = "test"))]
pub mod proptest {
    use super::*;
    use ::proptest::prelude::*;

    pub fn arb_output_name() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9+\\-_?=][a-zA-Z0-9+\\-_?=.]{0,13}"
    }

    pub fn arb_drv_name() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9+\\-_?=][a-zA-Z0-9+\\-_?=.]{0,28}"
    }

    impl Arbitrary for StorePathHash {
        type Parameters = ();
        type Strategy = BoxedStrategy<StorePathHash>;

        fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
            any::<[u8; STORE_PATH_HASH_BYTES]>()
                .prop_map(StorePathHash)
                .boxed()
        }
    }

    pub fn arb_store_path_name(extension: Option<&'static str>) -> impl Strategy<Value = StorePathName> {
        arb_drv_name().prop_map(move |mut s| {
            if let Some(ext) = extension {
                s.push('.');
                s.push_str(ext);
            }
            StorePathName::new(&s).unwrap()
        })
    }

    impl Arbitrary for StorePathName {
        type Parameters = ();
        type Strategy = BoxedStrategy<StorePathName>;

        fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
            arb_store_path_name(None).boxed()
        }
    }

    pub fn arb_store_path(extension: Option<&'static str>) -> impl Strategy<Value = StorePath> {
        (any::<StorePathHash>(), arb_store_path_name(extension))
            .prop_map(|(hash, name)| StorePath { hash, name })
    }

    pub fn arb_drv_store_path() -> impl Strategy<Value = StorePath> {
        arb_store_path(Some("drv"))
    }

    impl Arbitrary for StorePath {
        type Parameters = ();
        type Strategy = BoxedStrategy<StorePath>;
        fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
            arb_store_path(None).boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::proptest::arbitrary::any;
    use ::proptest::{prop_assert_eq, proptest};
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse() {
        let s = "x7fwirmcacmyq5z1csxs44ilmm6zs0iq-busybox-1.35.0";
        let p = StorePath::new_from_base_name(s).unwrap();
        assert_eq!(p.name.name(), "busybox-1.35.0");
        assert_eq!(p.to_string(), s);
        assert!(!p.is_derivation());
        let p2 = StorePath::from_parts(*p.hash.hash(), "busybox-1.35.0").unwrap();
        assert_eq!(p, p2);
    }

    #[test]
    fn test_parse_drv() {
        let s = "x7fwirmcacmyq5z1csxs44ilmm6zs0iq-busybox-1.35.0.drv";
        let p: StorePath = s.parse().unwrap();
        assert!(p.is_derivation());
        assert_eq!(p.name_from_drv(), "busybox-1.35.0");
    }

    #[test]
    fn test_from_hash() {
        let hash = hash::Hash::parse_any_prefixed(
            "sha256:1b8m03r63zqhnjf7l5wnldhh7c134ap5vpj0850ymkq1iyzicy5s",
        )
        .unwrap();
        let p = StorePath::from_hash(&hash, "konsole-18.12.3").unwrap();
        assert_eq!(
            p.to_string(),
            "ldhh7c134ap5swsm86rqnc0i7cinqvrc-konsole-18.12.3"
        );
    }

    #[test]
    fn test_no_name() {
        let s = "x7fwirmcacmyq5z1csxs44ilmm6zs0iq-";
        assert_matches!(
            StorePath::new_from_base_name(s),
            Err(ParseStorePathError::StorePathNameEmpty)
        );
    }

    #[test]
    fn test_no_dash() {
        let s = "x7fwirmcacmyq5z1csxs44ilmm6zs0iq";
        assert_matches!(
            StorePath::new_from_base_name(s),
            Err(ParseStorePathError::BadStorePath(_))
        );
    }

    #[test]
    fn test_invalid_hash() {
        let s = "e7fwirmcacmyq5z1csxs44ilmm6zs0iq-busybox";
        assert_matches!(
            StorePath::new_from_base_name(s),
            Err(ParseStorePathError::BadBase32(_, _))
        );
    }

    #[test]
    fn test_bad_name() {
        let s = "x7fwirmcacmyq5z1csxs44ilmm6zs0iq-foo bar";
        assert_matches!(
            StorePath::new_from_base_name(s),
            Err(ParseStorePathError::BadStorePathName(_))
        );
        let s = "x7fwirmcacmyq5z1csxs44ilmm6zs0iq-.hidden";
        assert_matches!(
            StorePath::new_from_base_name(s),
            Err(ParseStorePathError::BadStorePathName(_))
        );
    }

    #[test]
    fn test_too_long_name() {
        let s = format!("x7fwirmcacmyq5z1csxs44ilmm6zs0iq-{}", "x".repeat(212));
        assert_matches!(
            StorePath::new_from_base_name(&s),
            Err(ParseStorePathError::StorePathNameTooLong)
        );
    }

    #[test]
    fn test_order_matches_rendering() {
        let a: StorePath = "x7fwirmcacmyq5z1csxs44ilmm6zs0iq-a".parse().unwrap();
        let b: StorePath = "ldhh7c134ap5swsm86rqnc0i7cinqvrc-a".parse().unwrap();
        assert_eq!(a.cmp(&b), a.to_string().cmp(&b.to_string()));
        assert_eq!(b.cmp(&a), b.to_string().cmp(&a.to_string()));
    }

    #[test]
    fn test_serde() {
        let s = "\"x7fwirmcacmyq5z1csxs44ilmm6zs0iq-busybox-1.35.0\"";
        let p: StorePath = serde_json::from_str(s).unwrap();
        assert_eq!(p.name.name(), "busybox-1.35.0");
        assert_eq!(serde_json::to_string(&p).unwrap(), s);
    }

    proptest! {
        #[test]
        fn proptest_string_roundtrip(path in any::<StorePath>()) {
            let s = path.to_string();
            let parsed = StorePath::new_from_base_name(&s).unwrap();
            prop_assert_eq!(path, parsed);
        }

        #[test]
        fn proptest_order_matches_rendering(a in any::<StorePath>(), b in any::<StorePath>()) {
            prop_assert_eq!(a.cmp(&b), a.to_string().cmp(&b.to_string()));
        }
    }
}
