use std::fmt;
use std::str::FromStr;

use derive_more::Display;
use hex::FromHexError;
use ring::digest;
use thiserror::Error;

use crate::base32;

const MD5_SIZE: usize = 128 / 8;
const SHA1_SIZE: usize = 160 / 8;
const SHA256_SIZE: usize = 256 / 8;
const SHA512_SIZE: usize = 512 / 8;
const MAX_SIZE: usize = SHA512_SIZE;

/// A digest algorithm accepted in derivations. SHA-256 is canonical;
/// the others only occur in legacy fixed-output declarations.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, Display)]
pub enum Algorithm {
    #[display(fmt = "md5")]
    MD5,
    #[display(fmt = "sha1")]
    SHA1,
    #[display(fmt = "sha256")]
    SHA256,
    #[display(fmt = "sha512")]
    SHA512,
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::SHA256
    }
}

impl Algorithm {
    #[inline]
    pub fn size(&self) -> usize {
        match self {
            Algorithm::MD5 => MD5_SIZE,
            Algorithm::SHA1 => SHA1_SIZE,
            Algorithm::SHA256 => SHA256_SIZE,
            Algorithm::SHA512 => SHA512_SIZE,
        }
    }

    #[inline]
    pub fn base16_len(&self) -> usize {
        self.size() * 2
    }

    #[inline]
    pub fn base32_len(&self) -> usize {
        base32::encode_len(self.size())
    }

    #[inline]
    pub fn base64_len(&self) -> usize {
        ((4 * self.size() / 3) + 3) & !3
    }

    fn digest_algorithm(&self) -> &'static digest::Algorithm {
        match self {
            Algorithm::SHA1 => &digest::SHA1_FOR_LEGACY_USE_ONLY,
            Algorithm::SHA256 => &digest::SHA256,
            Algorithm::SHA512 => &digest::SHA512,
            a => panic!("unsupported digest algorithm {:?}", a),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
#[error("unsupported digest algorithm {0}")]
pub struct UnknownAlgorithm(String);

impl FromStr for Algorithm {
    type Err = UnknownAlgorithm;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("sha256") {
            Ok(Algorithm::SHA256)
        } else if s.eq_ignore_ascii_case("sha512") {
            Ok(Algorithm::SHA512)
        } else if s.eq_ignore_ascii_case("sha1") {
            Ok(Algorithm::SHA1)
        } else if s.eq_ignore_ascii_case("md5") {
            Ok(Algorithm::MD5)
        } else {
            Err(UnknownAlgorithm(s.to_owned()))
        }
    }
}

#[derive(Error, Debug, PartialEq, Clone)]
pub enum ParseHashError {
    #[error("{0}")]
    Algorithm(
        #[from]
        #[source]
        UnknownAlgorithm,
    ),
    #[error("hash '{0}' is not SRI")]
    NotSRI(String),
    #[error("hash '{0}' does not include a type")]
    MissingTypePrefix(String),
    #[error("hash '{hash}' should have type '{expected}'")]
    TypeMismatch {
        expected: Algorithm,
        actual: Algorithm,
        hash: String,
    },
    #[error("hash '{0}' does not include a type, nor is the type otherwise known from context")]
    MissingType(String),
    #[error("invalid base-16 hash '{0}'")]
    BadBase16Hash(String, #[source] FromHexError),
    #[error("invalid base-32 hash '{0}'")]
    BadBase32Hash(String, #[source] base32::BadBase32),
    #[error("invalid base-64 hash '{0}'")]
    BadBase64Hash(String, #[source] base64::DecodeError),
    #[error("invalid SRI hash '{0}'")]
    BadSRIHash(String),
    #[error("hash '{1}' has wrong length for hash type '{0}'")]
    WrongHashLength(Algorithm, String),
}

pub fn split_prefix<'a>(s: &'a str, sep: char) -> Option<(&'a str, &'a str)> {
    let mut it = s.splitn(2, sep);
    let prefix = it.next().unwrap();
    it.next().map(|rest| (prefix, rest))
}

fn parse_prefix(s: &str) -> Result<Option<(Algorithm, bool, &str)>, UnknownAlgorithm> {
    if let Some((prefix, rest)) = split_prefix(s, ':') {
        Ok(Some((prefix.parse()?, false, rest)))
    } else if let Some((prefix, rest)) = split_prefix(s, '-') {
        Ok(Some((prefix.parse()?, true, rest)))
    } else {
        Ok(None)
    }
}

/// A digest tagged with its algorithm. Only the first
/// `algorithm.size()` bytes of the buffer are significant.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct Hash {
    algorithm: Algorithm,
    data: [u8; MAX_SIZE],
}

impl Hash {
    pub fn new(algorithm: Algorithm, hash: &[u8]) -> Hash {
        let mut data = [0u8; MAX_SIZE];
        data[0..algorithm.size()].copy_from_slice(hash);
        Hash { algorithm, data }
    }

    fn from_encoding(rest: &str, a: Algorithm, is_sri: bool) -> Result<Hash, ParseHashError> {
        if !is_sri && rest.len() == a.base16_len() {
            let mut data = [0u8; MAX_SIZE];
            hex::decode_to_slice(rest, &mut data[0..a.size()])
                .map_err(|err| ParseHashError::BadBase16Hash(rest.to_string(), err))?;
            Ok(Hash { algorithm: a, data })
        } else if !is_sri && rest.len() == a.base32_len() {
            let data = base32::decode(rest)
                .map_err(|err| ParseHashError::BadBase32Hash(rest.to_string(), err))?;
            Ok(Hash::new(a, &data))
        } else if is_sri || rest.len() == a.base64_len() {
            let data = base64::decode(rest)
                .map_err(|err| ParseHashError::BadBase64Hash(rest.to_string(), err))?;
            if data.len() != a.size() {
                if is_sri {
                    Err(ParseHashError::BadSRIHash(rest.to_string()))
                } else {
                    Err(ParseHashError::BadBase64Hash(
                        rest.to_string(),
                        base64::DecodeError::InvalidLength,
                    ))
                }
            } else {
                Ok(Hash::new(a, &data))
            }
        } else {
            Err(ParseHashError::WrongHashLength(a, rest.to_string()))
        }
    }

    /// Parse a hash in the form `[<type>:]<base16|base32|base64>` or the
    /// SRI form `<type>-<base64>`. When no prefix is present the type
    /// must be known from context.
    pub fn parse_any(s: &str, algorithm: Option<Algorithm>) -> Result<Hash, ParseHashError> {
        if let Some((a, is_sri, rest)) = parse_prefix(s)? {
            if let Some(expected) = algorithm {
                if expected != a {
                    return Err(ParseHashError::TypeMismatch {
                        expected,
                        actual: a,
                        hash: s.to_string(),
                    });
                }
            }
            Hash::from_encoding(rest, a, is_sri)
        } else if let Some(a) = algorithm {
            Hash::from_encoding(s, a, false)
        } else {
            Err(ParseHashError::MissingType(s.to_string()))
        }
    }

    /// Like [`parse_any`] but the type prefix is mandatory.
    ///
    /// [`parse_any`]: #method.parse_any
    pub fn parse_any_prefixed(s: &str) -> Result<Hash, ParseHashError> {
        if let Some((a, is_sri, rest)) = parse_prefix(s)? {
            Hash::from_encoding(rest, a, is_sri)
        } else {
            Err(ParseHashError::MissingTypePrefix(s.to_string()))
        }
    }

    /// Parse a Subresource Integrity expression, `<type>-<base64>`.
    pub fn parse_sri(s: &str) -> Result<Hash, ParseHashError> {
        if let Some((prefix, rest)) = split_prefix(s, '-') {
            let a: Algorithm = prefix.parse()?;
            Hash::from_encoding(rest, a, true)
        } else {
            Err(ParseHashError::NotSRI(s.to_owned()))
        }
    }

    /// Parse a bare hash with no prefix indicating the type. The type is
    /// passed in to disambiguate.
    pub fn parse_non_sri_unprefixed(s: &str, algorithm: Algorithm) -> Result<Hash, ParseHashError> {
        Hash::from_encoding(s, algorithm, false)
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn data(&self) -> &[u8] {
        &self.data[0..self.algorithm.size()]
    }

    pub fn encode_base16(&self) -> String {
        format!("{:#x}", self)
    }

    pub fn encode_base32(&self) -> String {
        base32::encode(self.as_ref())
    }

    pub fn encode_base64(&self) -> String {
        base64::encode(self.as_ref())
    }

    pub fn to_sri(&self) -> impl fmt::Display + '_ {
        SRIHash(self)
    }
}

impl std::ops::Deref for Hash {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        self.data()
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        self.data()
    }
}

impl fmt::LowerHex for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !f.alternate() {
            write!(f, "{}:", self.algorithm())?;
        }
        for val in self.as_ref() {
            write!(f, "{:02x}", val)?;
        }
        Ok(())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !f.alternate() {
            write!(f, "{}:", self.algorithm())?;
        }
        f.write_str(&base32::encode(self.as_ref()))
    }
}

impl FromStr for Hash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hash::parse_any_prefixed(s)
    }
}

struct SRIHash<'a>(&'a Hash);
impl<'a> fmt::Display for SRIHash<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.0.algorithm(), base64::encode(self.0.as_ref()))
    }
}

pub fn digest<B: AsRef<[u8]>>(algorithm: Algorithm, data: B) -> Hash {
    match algorithm {
        #[cfg(feature = "md5")]
        Algorithm::MD5 => Hash::new(Algorithm::MD5, md5::compute(data).as_ref()),
        _ => Hash::new(
            algorithm,
            digest::digest(algorithm.digest_algorithm(), data.as_ref()).as_ref(),
        ),
    }
}

enum InnerContext {
    #[cfg(feature = "md5")]
    MD5(md5::Context),
    Ring(digest::Context),
}

/// Streaming counterpart of [`digest`].
pub struct Context(Algorithm, InnerContext);

impl Context {
    pub fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            #[cfg(feature = "md5")]
            Algorithm::MD5 => Context(algorithm, InnerContext::MD5(md5::Context::new())),
            _ => Context(
                algorithm,
                InnerContext::Ring(digest::Context::new(algorithm.digest_algorithm())),
            ),
        }
    }

    pub fn update<D: AsRef<[u8]>>(&mut self, data: D) {
        match &mut self.1 {
            #[cfg(feature = "md5")]
            InnerContext::MD5(ctx) => ctx.consume(data.as_ref()),
            InnerContext::Ring(ctx) => ctx.update(data.as_ref()),
        }
    }

    pub fn finish(self) -> Hash {
        match self.1 {
            #[cfg(feature = "md5")]
            InnerContext::MD5(ctx) => Hash::new(self.0, ctx.compute().as_ref()),
            InnerContext::Ring(ctx) => {
                let digest = ctx.finish();
                Hash::new(self.0, digest.as_ref())
            }
        }
    }
}

#[cfg(any(test, feature = "test"))]
pub mod proptest {
    use super::*;
    use ::proptest::prelude::*;

    impl Arbitrary for Algorithm {
        type Parameters = ();
        type Strategy = BoxedStrategy<Algorithm>;
        fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
            prop_oneof![
                #[cfg(feature = "md5")]
                1 => Just(Algorithm::MD5),
                2 => Just(Algorithm::SHA1),
                5 => Just(Algorithm::SHA256),
                2 => Just(Algorithm::SHA512)
            ]
            .boxed()
        }
    }

    impl Arbitrary for Hash {
        type Parameters = Algorithm;
        type Strategy = BoxedStrategy<Hash>;

        fn arbitrary_with(algorithm: Self::Parameters) -> Self::Strategy {
            any_hash(algorithm).boxed()
        }
    }

    prop_compose! {
        fn any_hash(algorithm: Algorithm)
                   (data in any::<Vec<u8>>()) -> Hash
        {
            digest(algorithm, data)
        }
    }
}
