use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::hash::{self, Hash, ParseHashError};

/// How file system objects are digested into a content hash: over the
/// raw bytes of a single file, or over the canonical serialization of
/// a whole tree.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub enum FileIngestionMethod {
    Flat,
    Recursive,
}

impl fmt::Display for FileIngestionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use FileIngestionMethod::*;
        if f.alternate() {
            if let Recursive = self {
                write!(f, "r:")?;
            }
        } else {
            match self {
                Recursive => write!(f, "recursive")?,
                Flat => write!(f, "flat")?,
            }
        }
        Ok(())
    }
}

#[derive(Error, Debug, PartialEq, Clone)]
pub enum ParseFixedOutputHashError {
    #[error("fixed output hash was invalid: {0}")]
    InvalidHash(
        #[from]
        #[source]
        ParseHashError,
    ),
    #[error("fixed output hash '{0}' lacks a hash algorithm")]
    MissingAlgorithm(String),
}

/// Pair of a declared hash and how the file system was ingested.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct FixedOutputHash {
    pub method: FileIngestionMethod,
    pub hash: Hash,
}

impl FixedOutputHash {
    /// The `[r:]<algo>` tag used in serialized derivation outputs.
    pub fn method_algo(&self) -> impl fmt::Display + '_ {
        MethodAlgo(self)
    }

    /// Parse the `[r:]<algo>:<hash>` form.
    pub fn parse(s: &str) -> Result<FixedOutputHash, ParseFixedOutputHashError> {
        let (method, rest) = if let Some(rest) = s.strip_prefix("r:") {
            (FileIngestionMethod::Recursive, rest)
        } else {
            (FileIngestionMethod::Flat, s)
        };
        if let Some((algo, hash_s)) = hash::split_prefix(rest, ':') {
            let algorithm = algo
                .parse()
                .map_err(|e: hash::UnknownAlgorithm| ParseHashError::Algorithm(e))?;
            let hash = Hash::parse_non_sri_unprefixed(hash_s, algorithm)?;
            Ok(FixedOutputHash { method, hash })
        } else {
            Err(ParseFixedOutputHashError::MissingAlgorithm(s.to_string()))
        }
    }
}

struct MethodAlgo<'a>(&'a FixedOutputHash);
impl<'a> fmt::Display for MethodAlgo<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}{}", self.0.method, self.0.hash.algorithm())
    }
}

impl fmt::Display for FixedOutputHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            write!(f, "{:#}{}", self.method, self.hash.algorithm())
        } else {
            write!(f, "{:#}{:x}", self.method, self.hash)
        }
    }
}

impl FromStr for FixedOutputHash {
    type Err = ParseFixedOutputHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(any(test, feature = "test"))]
pub mod proptest {
    use super::*;
    use ::proptest::prelude::*;

    impl Arbitrary for FileIngestionMethod {
        type Parameters = ();
        type Strategy = BoxedStrategy<FileIngestionMethod>;

        fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
            prop_oneof![
                Just(FileIngestionMethod::Flat),
                Just(FileIngestionMethod::Recursive)
            ]
            .boxed()
        }
    }

    impl Arbitrary for FixedOutputHash {
        type Parameters = ();
        type Strategy = BoxedStrategy<FixedOutputHash>;

        fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
            (any::<FileIngestionMethod>(), any::<Hash>())
                .prop_map(|(method, hash)| FixedOutputHash { method, hash })
                .boxed()
        }
    }
}
