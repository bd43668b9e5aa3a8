use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::content_address::{FileIngestionMethod, FixedOutputHash};
use crate::error::Error;
use crate::hash::{self, Hash};
use crate::io::{AsyncSink, AsyncSource};
use crate::path::{ParseStorePathError, ReadStorePathError, StorePath, StorePathSet, DRV_EXTENSION};
use crate::store_api::{RepairFlag, Store};
use crate::store_dir::StoreDir;
use crate::StringSet;

mod aterm;
mod hash_modulo;
mod placeholder;
mod resolve;

pub use aterm::parse_derivation;
pub use hash_modulo::{
    hash_derivation_modulo, static_output_hashes, CaOutputHashes, DrvHash, DrvHashKind,
    DrvHashModulo, DrvHashes, UnresolvedDrvHash,
};
pub use placeholder::{downstream_placeholder, hash_placeholder};

#[derive(Error, Debug, PartialEq, Clone)]
pub enum ParseDerivationError {
    #[error("bad store path in derivation: {0}")]
    BadStorePath(
        #[from]
        #[source]
        ParseStorePathError,
    ),
    #[error("bad path '{0}' in derivation")]
    BadPath(String),
    #[error("bad hash in derivation: {0}")]
    BadHash(
        #[from]
        #[source]
        hash::ParseHashError,
    ),
    #[error("unknown output shape in derivation: {0}")]
    UnknownOutputShape(String),
    #[error("expected {expected} at offset {offset} in derivation")]
    UnexpectedToken { offset: usize, expected: String },
    #[error("dangling escape at offset {0} in derivation")]
    DanglingEscape(usize),
    #[error("unknown escape '\\{found}' at offset {offset} in derivation")]
    UnknownEscape { offset: usize, found: char },
    #[error("duplicate output name '{name}' at offset {offset} in derivation")]
    DuplicateOutput { offset: usize, name: String },
    #[error("output fields at offset {offset} are not in canonical form")]
    NonCanonicalOutput { offset: usize },
    #[error("misordered entry '{entry}' at offset {offset} in derivation")]
    Misordered { offset: usize, entry: String },
    #[error("derivation is not valid UTF-8")]
    NotUtf8,
}

impl From<hash::UnknownAlgorithm> for ParseDerivationError {
    fn from(v: hash::UnknownAlgorithm) -> ParseDerivationError {
        ParseDerivationError::BadHash(hash::ParseHashError::Algorithm(v))
    }
}

#[derive(Error, Debug)]
pub enum ReadDerivationError {
    #[error("{0}")]
    BadDerivation(
        #[from]
        #[source]
        ParseDerivationError,
    ),
    #[error("io error reading derivation {0}")]
    IO(
        #[from]
        #[source]
        std::io::Error,
    ),
}

impl From<ReadStorePathError> for ReadDerivationError {
    fn from(v: ReadStorePathError) -> ReadDerivationError {
        use ReadStorePathError::*;
        match v {
            BadStorePath(e) => {
                ReadDerivationError::BadDerivation(ParseDerivationError::BadStorePath(e))
            }
            IO(io) => ReadDerivationError::IO(io),
        }
    }
}

#[derive(Error, Debug)]
pub enum WriteDerivationError {
    #[error("{0}")]
    BadStorePath(
        #[from]
        #[source]
        ParseStorePathError,
    ),
    #[error("io error writing derivation {0}")]
    IO(
        #[from]
        #[source]
        std::io::Error,
    ),
}

fn validate_path(s: &str) -> Result<(), ParseDerivationError> {
    if s.is_empty() || !s.starts_with('/') {
        Err(ParseDerivationError::BadPath(s.into()))
    } else {
        Ok(())
    }
}

/// The name used for the store path of one output: `<drv-name>` for the
/// primary output `out`, otherwise `<drv-name>-<output-name>`.
pub fn output_path_name(drv_name: &str, output_name: &str) -> String {
    if output_name != "out" {
        format!("{}-{}", drv_name, output_name)
    } else {
        drv_name.to_owned()
    }
}

/// True iff `file_name` names a derivation file.
pub fn is_derivation(file_name: &str) -> bool {
    file_name.ends_with(DRV_EXTENSION)
}

/// True when `output` is selected by a (possibly empty, meaning "all")
/// set of wanted output names.
pub fn want_output(output: &str, wanted: &StringSet) -> bool {
    wanted.is_empty() || wanted.contains(output)
}

/// How the store path of one output is determined.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub enum DerivationOutput {
    /// The traditional input-addressed output whose path was computed
    /// from the derivation's own modulo-hash.
    InputAddressed(StorePath),
    /// Fixed output whose path is content addressed by the declared
    /// hash, known before building.
    CAFixed(FixedOutputHash),
    /// Floating output, content addressed by whatever the output ends
    /// up being, so unknown until the build succeeds.
    CAFloating {
        method: FileIngestionMethod,
        hash_type: hash::Algorithm,
    },
    /// Input-addressed output whose path can't be computed yet because
    /// some ancestor is a floating content-addressed derivation.
    Deferred,
}

impl DerivationOutput {
    pub fn parse_output(
        store_dir: &StoreDir,
        path_s: String,
        hash_algo: String,
        hash: String,
    ) -> Result<DerivationOutput, ParseDerivationError> {
        if !hash_algo.is_empty() {
            let (method, algo) = if let Some(rest) = hash_algo.strip_prefix("r:") {
                (FileIngestionMethod::Recursive, rest)
            } else {
                (FileIngestionMethod::Flat, &hash_algo[..])
            };
            let algorithm = algo.parse::<hash::Algorithm>()?;
            if !hash.is_empty() {
                validate_path(&path_s)?;
                let hash = Hash::parse_non_sri_unprefixed(&hash, algorithm)?;
                Ok(DerivationOutput::CAFixed(FixedOutputHash { method, hash }))
            } else {
                if !path_s.is_empty() {
                    return Err(ParseDerivationError::UnknownOutputShape(path_s));
                }
                Ok(DerivationOutput::CAFloating {
                    method,
                    hash_type: algorithm,
                })
            }
        } else if path_s.is_empty() {
            Ok(DerivationOutput::Deferred)
        } else {
            validate_path(&path_s)?;
            let path = store_dir.parse_path(&path_s)?;
            Ok(DerivationOutput::InputAddressed(path))
        }
    }

    pub async fn read_output<R>(
        mut source: R,
        store_dir: &StoreDir,
    ) -> Result<DerivationOutput, ReadDerivationError>
    where
        R: AsyncRead + Send + Unpin,
    {
        let path_s = source.read_string().await?;
        let hash_algo = source.read_string().await?;
        let hash = source.read_string().await?;
        Ok(Self::parse_output(store_dir, path_s, hash_algo, hash)?)
    }

    pub async fn write_output<W>(
        &self,
        mut sink: W,
        store_dir: &StoreDir,
        drv_name: &str,
        output_name: &str,
    ) -> Result<(), WriteDerivationError>
    where
        W: AsyncWrite + Send + Unpin,
    {
        match self {
            DerivationOutput::InputAddressed(path) => {
                sink.write_printed(store_dir, path).await?;
                sink.write_str("").await?;
                sink.write_str("").await?;
            }
            DerivationOutput::CAFixed(dof) => {
                let path = store_dir.make_fixed_output_path(
                    dof.method,
                    &dof.hash,
                    &output_path_name(drv_name, output_name),
                    &StorePathSet::new(),
                    false,
                )?;
                sink.write_printed(store_dir, &path).await?;
                sink.write_str(&dof.method_algo().to_string()).await?;
                sink.write_str(&format!("{:#x}", dof.hash)).await?;
            }
            DerivationOutput::CAFloating { method, hash_type } => {
                sink.write_str("").await?;
                sink.write_str(&format!("{:#}{}", method, hash_type)).await?;
                sink.write_str("").await?;
            }
            DerivationOutput::Deferred => {
                sink.write_str("").await?;
                sink.write_str("").await?;
                sink.write_str("").await?;
            }
        }
        Ok(())
    }

    /// The store path this output will occupy, when it can be computed
    /// at all. Make sure the right derivation name is passed; when in
    /// doubt go through [`BasicDerivation::outputs_and_opt_paths`].
    pub fn path(
        &self,
        store_dir: &StoreDir,
        drv_name: &str,
        output_name: &str,
    ) -> Result<Option<StorePath>, ParseStorePathError> {
        match self {
            DerivationOutput::InputAddressed(path) => Ok(Some(path.clone())),
            DerivationOutput::CAFixed(dof) => Ok(Some(store_dir.make_fixed_output_path(
                dof.method,
                &dof.hash,
                &output_path_name(drv_name, output_name),
                &StorePathSet::new(),
                false,
            )?)),
            DerivationOutput::CAFloating { .. } => Ok(None),
            DerivationOutput::Deferred => Ok(None),
        }
    }
}

pub type DerivationOutputs = BTreeMap<String, DerivationOutput>;

/// Outputs together with the (optional) store path each would be
/// written into.
pub type DerivationOutputsAndOptPaths = BTreeMap<String, (DerivationOutput, Option<StorePath>)>;

/// For inputs that are sub-derivations, exactly which output names are
/// consumed.
pub type DerivationInputs = BTreeMap<StorePath, StringSet>;

/// The class every output of one derivation belongs to. Outputs of a
/// single derivation never mix classes.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub enum DerivationType {
    InputAddressed,
    DeferredInputAddressed,
    CAFixed,
    CAFloating,
}

impl DerivationType {
    /// Are output paths computed from the realized content rather than
    /// from the derivation itself?
    pub fn is_ca(&self) -> bool {
        match self {
            DerivationType::InputAddressed => false,
            DerivationType::DeferredInputAddressed => false,
            DerivationType::CAFixed => true,
            DerivationType::CAFloating => true,
        }
    }

    /// Is the output content pinned a-priori via a declared hash?
    pub fn is_fixed(&self) -> bool {
        match self {
            DerivationType::CAFixed => true,
            _ => false,
        }
    }

    /// Fixed-output builds are allowed to access non-deterministic
    /// resources such as the network; whether they actually get
    /// sandboxed is decided elsewhere.
    pub fn is_impure(&self) -> bool {
        match self {
            DerivationType::CAFixed => true,
            _ => false,
        }
    }

    /// Does the derivation know its own output paths? Only false when a
    /// floating content-addressed derivation is involved in the closure.
    pub fn has_known_output_paths(&self) -> bool {
        match self {
            DerivationType::InputAddressed => true,
            DerivationType::DeferredInputAddressed => false,
            DerivationType::CAFixed => true,
            DerivationType::CAFloating => false,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub enum InvalidDerivationShape {
    #[error("derivation must have at least one output")]
    NoOutputs,
    #[error("only one fixed output is allowed")]
    MultipleFixedOutputs,
    #[error("single fixed output must be named \"out\", not '{0}'")]
    BadFixedOutputName(String),
    #[error("all floating outputs must use the same hash algorithm")]
    MixedFloatingAlgorithms,
    #[error("can't mix derivation output types")]
    MixedOutputs,
}

/// A derivation whose inputs have all been resolved to plain store
/// paths.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub struct BasicDerivation {
    pub outputs: DerivationOutputs,
    /// Inputs that are sources.
    pub input_srcs: StorePathSet,
    pub platform: String,
    pub builder: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub name: String,
}

impl BasicDerivation {
    pub fn is_builtin(&self) -> bool {
        self.builder.starts_with("builtin:")
    }

    pub fn output_names(&self) -> StringSet {
        self.outputs.keys().cloned().collect()
    }

    /// Classify the outputs, rejecting inconsistent mixtures.
    pub fn derivation_type(&self) -> Result<DerivationType, InvalidDerivationShape> {
        let mut input_addressed = 0usize;
        let mut deferred = 0usize;
        let mut floating = 0usize;
        let mut fixed_names = Vec::new();
        let mut floating_hash_type = None;
        for (name, output) in self.outputs.iter() {
            match output {
                DerivationOutput::InputAddressed(_) => input_addressed += 1,
                DerivationOutput::CAFixed(_) => fixed_names.push(name),
                DerivationOutput::CAFloating { hash_type, .. } => {
                    floating += 1;
                    match floating_hash_type {
                        None => floating_hash_type = Some(*hash_type),
                        Some(first) if first != *hash_type => {
                            return Err(InvalidDerivationShape::MixedFloatingAlgorithms)
                        }
                        Some(_) => {}
                    }
                }
                DerivationOutput::Deferred => deferred += 1,
            }
        }
        match (input_addressed, fixed_names.len(), floating, deferred) {
            (0, 0, 0, 0) => Err(InvalidDerivationShape::NoOutputs),
            (_, 0, 0, 0) => Ok(DerivationType::InputAddressed),
            (0, 1, 0, 0) if fixed_names[0] == "out" => Ok(DerivationType::CAFixed),
            (0, 1, 0, 0) => Err(InvalidDerivationShape::BadFixedOutputName(
                fixed_names[0].clone(),
            )),
            (0, _, 0, 0) => Err(InvalidDerivationShape::MultipleFixedOutputs),
            (0, 0, _, 0) => Ok(DerivationType::CAFloating),
            (0, 0, 0, _) => Ok(DerivationType::DeferredInputAddressed),
            _ => Err(InvalidDerivationShape::MixedOutputs),
        }
    }

    pub fn outputs_and_opt_paths(
        &self,
        store_dir: &StoreDir,
    ) -> Result<DerivationOutputsAndOptPaths, ParseStorePathError> {
        let mut res = DerivationOutputsAndOptPaths::new();
        for (output_name, drv_output) in self.outputs.iter() {
            res.insert(
                output_name.clone(),
                (
                    drv_output.clone(),
                    drv_output.path(store_dir, &self.name, output_name)?,
                ),
            );
        }
        Ok(res)
    }

    pub async fn read_drv<R>(
        mut source: R,
        store_dir: &StoreDir,
        name: &str,
    ) -> Result<BasicDerivation, ReadDerivationError>
    where
        R: AsyncRead + Send + Unpin,
    {
        let name = name.to_owned();
        let nr = source.read_usize().await?;
        let mut outputs = DerivationOutputs::new();
        for _n in 0..nr {
            let output_name = source.read_string().await?;
            let output = DerivationOutput::read_output(&mut source, store_dir).await?;
            outputs.insert(output_name, output);
        }
        let input_srcs = source.read_parsed_coll(store_dir).await?;
        let platform = source.read_string().await?;
        let builder = source.read_string().await?;
        let args = source.read_string_coll().await?;

        let nr = source.read_usize().await?;
        let mut env = BTreeMap::new();
        for _n in 0..nr {
            let key = source.read_string().await?;
            let value = source.read_string().await?;
            env.insert(key, value);
        }
        Ok(BasicDerivation {
            outputs,
            input_srcs,
            platform,
            builder,
            args,
            env,
            name,
        })
    }

    pub async fn write_drv<W>(
        &self,
        mut sink: W,
        store_dir: &StoreDir,
    ) -> Result<(), WriteDerivationError>
    where
        W: AsyncWrite + Send + Unpin,
    {
        sink.write_usize(self.outputs.len()).await?;
        for (output_name, output) in self.outputs.iter() {
            sink.write_str(output_name).await?;
            output
                .write_output(&mut sink, store_dir, &self.name, output_name)
                .await?;
        }
        sink.write_printed_coll(store_dir, &self.input_srcs).await?;
        sink.write_str(&self.platform).await?;
        sink.write_str(&self.builder).await?;
        sink.write_string_coll(&self.args).await?;

        sink.write_usize(self.env.len()).await?;
        for (key, value) in self.env.iter() {
            sink.write_str(key).await?;
            sink.write_str(value).await?;
        }
        Ok(())
    }
}

/// A derivation as written to the store: a [`BasicDerivation`] plus the
/// sub-derivations it consumes outputs of.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub struct Derivation {
    pub basic: BasicDerivation,
    /// Inputs that are sub-derivations.
    pub input_drvs: DerivationInputs,
}

impl Deref for Derivation {
    type Target = BasicDerivation;

    fn deref(&self) -> &BasicDerivation {
        &self.basic
    }
}

impl DerefMut for Derivation {
    fn deref_mut(&mut self) -> &mut BasicDerivation {
        &mut self.basic
    }
}

impl From<BasicDerivation> for Derivation {
    fn from(basic: BasicDerivation) -> Self {
        Derivation {
            basic,
            input_drvs: DerivationInputs::new(),
        }
    }
}

/// Write a derivation to the store and return its path. With
/// `read_only` the path is computed but nothing is persisted.
pub async fn write_derivation<S>(
    store: &mut S,
    drv: &Derivation,
    repair: RepairFlag,
    read_only: bool,
) -> Result<StorePath, Error>
where
    S: Store + Send,
{
    let mut references = drv.input_srcs.clone();
    references.extend(drv.input_drvs.keys().cloned());
    // The outputs of a derivation are not references: they can be
    // missing and need not be held during garbage collection.
    let suffix = format!("{}{}", drv.name, DRV_EXTENSION);
    let contents = drv.unparse(&store.store_dir(), false, None)?;
    if read_only {
        let hash = hash::digest(hash::Algorithm::SHA256, &contents);
        Ok(store.store_dir().make_text_path(&suffix, &hash, &references)?)
    } else {
        store
            .write_file(&suffix, contents.as_bytes(), &references, repair)
            .await
    }
}

/// Read a derivation back from the store.
pub async fn read_derivation<S>(store: &mut S, drv_path: &StorePath) -> Result<Derivation, Error>
where
    S: Store + Send,
{
    let name = drv_path.name_from_drv();
    let bytes = store.read_file(drv_path).await?;
    let s = String::from_utf8(bytes)
        .map_err(|_| ReadDerivationError::BadDerivation(ParseDerivationError::NotUtf8))?;
    Ok(parse_derivation(&store.store_dir(), &s, name)
        .map_err(ReadDerivationError::BadDerivation)?)
}

#[cfg(any(test, feature = "test"))]
pub mod proptest {
    use super::*;
    use crate::path::proptest::{arb_drv_name, arb_drv_store_path, arb_output_name};
    use ::proptest::collection::{btree_map, btree_set};
    use ::proptest::prelude::*;

    pub fn arb_derivation_output() -> impl Strategy<Value = DerivationOutput> {
        use DerivationOutput::*;
        prop_oneof![
            any::<StorePath>().prop_map(InputAddressed),
            any::<FixedOutputHash>().prop_map(CAFixed),
            (any::<FileIngestionMethod>(), any::<hash::Algorithm>())
                .prop_map(|(method, hash_type)| CAFloating { method, hash_type }),
            Just(Deferred)
        ]
    }

    impl Arbitrary for DerivationOutput {
        type Parameters = ();
        type Strategy = BoxedStrategy<DerivationOutput>;

        fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
            arb_derivation_output().boxed()
        }
    }

    /// Output maps that pass the classifier: one consistent family per
    /// generated value.
    pub fn arb_derivation_outputs() -> impl Strategy<Value = DerivationOutputs> {
        use DerivationOutput::*;
        let input = btree_map(
            arb_output_name(),
            any::<StorePath>().prop_map(InputAddressed),
            1..4,
        )
        .boxed();
        let fixed = any::<FixedOutputHash>()
            .prop_map(|foh| {
                let mut ret = DerivationOutputs::new();
                ret.insert("out".to_string(), CAFixed(foh));
                ret
            })
            .boxed();
        let floating = (any::<hash::Algorithm>())
            .prop_flat_map(|hash_type| {
                btree_map(
                    arb_output_name(),
                    any::<FileIngestionMethod>()
                        .prop_map(move |method| CAFloating { method, hash_type }),
                    1..4,
                )
            })
            .boxed();
        let deferred = btree_map(arb_output_name(), Just(Deferred), 1..4).boxed();
        prop_oneof![input, fixed, floating, deferred]
    }

    prop_compose! {
        pub fn arb_basic_derivation()
        (
            outputs in arb_derivation_outputs(),
            input_srcs in btree_set(any::<StorePath>(), 0..4),
            platform in "[a-z0-9_-]{1,20}",
            builder in any::<String>(),
            args in ::proptest::collection::vec(any::<String>(), 0..4),
            env in btree_map(any::<String>(), any::<String>(), 0..4),
            name in arb_drv_name()
        ) -> BasicDerivation
        {
            BasicDerivation {
                outputs, input_srcs, platform, builder, args, env, name,
            }
        }
    }

    impl Arbitrary for BasicDerivation {
        type Parameters = ();
        type Strategy = BoxedStrategy<BasicDerivation>;

        fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
            arb_basic_derivation().boxed()
        }
    }

    prop_compose! {
        pub fn arb_derivation()
        (
            basic in arb_basic_derivation(),
            input_drvs in btree_map(arb_drv_store_path(), btree_set(arb_output_name(), 1..3), 0..3)
        ) -> Derivation
        {
            Derivation { basic, input_drvs }
        }
    }

    impl Arbitrary for Derivation {
        type Parameters = ();
        type Strategy = BoxedStrategy<Derivation>;

        fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
            arb_derivation().boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Algorithm;
    use crate::string_set;
    use ::proptest::prelude::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn store_dir() -> StoreDir {
        StoreDir::default()
    }

    #[test]
    fn test_parse_output_input_addressed() {
        let store_dir = store_dir();
        let path_s = "/nix/store/x7fwirmcacmyq5z1csxs44ilmm6zs0iq-konsole-18.12.3".to_owned();
        let path = store_dir.parse_path(&path_s).unwrap();
        let p = DerivationOutput::parse_output(&store_dir, path_s, "".into(), "".into());
        assert_eq!(p, Ok(DerivationOutput::InputAddressed(path)));
    }

    #[test]
    fn test_parse_output_ca_fixed() {
        let store_dir = store_dir();
        let path_s = "/nix/store/x7fwirmcacmyq5z1csxs44ilmm6zs0iq-konsole-18.12.3".to_owned();
        let hex = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad".to_owned();
        let h = Hash::parse_non_sri_unprefixed(&hex, Algorithm::SHA256).unwrap();
        let p = DerivationOutput::parse_output(&store_dir, path_s, "r:sha256".into(), hex);
        assert_eq!(
            p,
            Ok(DerivationOutput::CAFixed(FixedOutputHash {
                method: FileIngestionMethod::Recursive,
                hash: h
            }))
        );
    }

    #[test]
    fn test_parse_output_ca_floating() {
        let store_dir = store_dir();
        let p = DerivationOutput::parse_output(&store_dir, "".into(), "sha256".into(), "".into());
        assert_eq!(
            p,
            Ok(DerivationOutput::CAFloating {
                method: FileIngestionMethod::Flat,
                hash_type: Algorithm::SHA256
            })
        );
    }

    #[test]
    fn test_parse_output_ca_floating_with_path() {
        let store_dir = store_dir();
        let p = DerivationOutput::parse_output(
            &store_dir,
            "/nix/store/x7fwirmcacmyq5z1csxs44ilmm6zs0iq-x".into(),
            "sha256".into(),
            "".into(),
        );
        assert_eq!(
            p,
            Err(ParseDerivationError::UnknownOutputShape(
                "/nix/store/x7fwirmcacmyq5z1csxs44ilmm6zs0iq-x".into()
            ))
        );
    }

    #[test]
    fn test_parse_output_deferred() {
        let store_dir = store_dir();
        let p = DerivationOutput::parse_output(&store_dir, "".into(), "".into(), "".into());
        assert_eq!(p, Ok(DerivationOutput::Deferred));
    }

    #[rstest]
    #[case::deferred(DerivationOutput::Deferred, "konsole-18.12.3", "out", None)]
    #[case::input(
        DerivationOutput::InputAddressed("x7fwirmcacmyq5z1csxs44ilmm6zs0iq-konsole-18.12.3".parse().unwrap()),
        "konsole-18.12.3",
        "out",
        Some("x7fwirmcacmyq5z1csxs44ilmm6zs0iq-konsole-18.12.3")
    )]
    #[case::fixed_flat(
        DerivationOutput::CAFixed("sha256:248d6a61d20638b8e5c026930c3e6039a33ce45964ff2167f6ecedd419db06c1".parse().unwrap()),
        "konsole-18.12.3",
        "out",
        Some("g9ngnw4w5vr9y3xkb7k2awl3mp95abrb-konsole-18.12.3")
    )]
    #[case::fixed_recursive(
        DerivationOutput::CAFixed("r:sha256:248d6a61d20638b8e5c026930c3e6039a33ce45964ff2167f6ecedd419db06c1".parse().unwrap()),
        "konsole-18.12.3",
        "out",
        Some("1w01xxn8f7s9s4n65ry6rwd7x9awf04s-konsole-18.12.3")
    )]
    #[case::fixed_sha1(
        DerivationOutput::CAFixed("r:sha1:84983e441c3bd26ebaae4aa1f95129e5e54670f1".parse().unwrap()),
        "konsole-18.12.3",
        "out",
        Some("ag0y7g6rci9zsdz9nxcq5l1qllx3r99x-konsole-18.12.3")
    )]
    #[case::floating(
        DerivationOutput::CAFloating { method: FileIngestionMethod::Flat, hash_type: Algorithm::SHA256 },
        "konsole-18.12.3",
        "out",
        None
    )]
    fn test_output_path(
        #[case] output: DerivationOutput,
        #[case] drv_name: &str,
        #[case] output_name: &str,
        #[case] expected: Option<&str>,
    ) {
        let store_dir = store_dir();
        let expected = expected.map(|s| s.parse().unwrap());
        assert_eq!(
            output.path(&store_dir, drv_name, output_name).unwrap(),
            expected
        );
    }

    #[test]
    fn test_output_path_name() {
        assert_eq!(output_path_name("hello", "out"), "hello");
        assert_eq!(output_path_name("hello", "dev"), "hello-dev");
    }

    #[test]
    fn test_is_derivation_file_name() {
        assert!(is_derivation("hello.drv"));
        assert!(!is_derivation("hello"));
        assert!(!is_derivation("hello.drv.bak"));
    }

    #[test]
    fn test_want_output() {
        assert!(want_output("out", &StringSet::new()));
        assert!(want_output("out", &string_set!["out", "dev"]));
        assert!(!want_output("doc", &string_set!["out", "dev"]));
    }

    fn input_addressed_drv() -> BasicDerivation {
        let mut outputs = DerivationOutputs::new();
        outputs.insert(
            "out".to_string(),
            DerivationOutput::InputAddressed(
                "x7fwirmcacmyq5z1csxs44ilmm6zs0iq-hello".parse().unwrap(),
            ),
        );
        BasicDerivation {
            outputs,
            input_srcs: StorePathSet::new(),
            platform: "x86_64-linux".to_string(),
            builder: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), "true".to_string()],
            env: BTreeMap::new(),
            name: "hello".to_string(),
        }
    }

    #[test]
    fn test_type_input_addressed() {
        let drv = input_addressed_drv();
        assert_eq!(drv.derivation_type(), Ok(DerivationType::InputAddressed));
    }

    #[test]
    fn test_type_fixed() {
        let mut drv = input_addressed_drv();
        drv.outputs.clear();
        drv.outputs.insert(
            "out".to_string(),
            DerivationOutput::CAFixed(
                "sha256:248d6a61d20638b8e5c026930c3e6039a33ce45964ff2167f6ecedd419db06c1"
                    .parse()
                    .unwrap(),
            ),
        );
        assert_eq!(drv.derivation_type(), Ok(DerivationType::CAFixed));
    }

    #[test]
    fn test_type_fixed_not_out() {
        let mut drv = input_addressed_drv();
        drv.outputs.clear();
        drv.outputs.insert(
            "dev".to_string(),
            DerivationOutput::CAFixed(
                "sha256:248d6a61d20638b8e5c026930c3e6039a33ce45964ff2167f6ecedd419db06c1"
                    .parse()
                    .unwrap(),
            ),
        );
        assert_eq!(
            drv.derivation_type(),
            Err(InvalidDerivationShape::BadFixedOutputName("dev".into()))
        );
    }

    #[test]
    fn test_type_no_outputs() {
        let mut drv = input_addressed_drv();
        drv.outputs.clear();
        assert_eq!(
            drv.derivation_type(),
            Err(InvalidDerivationShape::NoOutputs)
        );
    }

    #[test]
    fn test_type_mixed() {
        let mut drv = input_addressed_drv();
        drv.outputs
            .insert("extra".to_string(), DerivationOutput::Deferred);
        assert_eq!(
            drv.derivation_type(),
            Err(InvalidDerivationShape::MixedOutputs)
        );
    }

    #[test]
    fn test_type_mixed_floating_algorithms() {
        let mut drv = input_addressed_drv();
        drv.outputs.clear();
        drv.outputs.insert(
            "out".to_string(),
            DerivationOutput::CAFloating {
                method: FileIngestionMethod::Recursive,
                hash_type: Algorithm::SHA256,
            },
        );
        drv.outputs.insert(
            "dev".to_string(),
            DerivationOutput::CAFloating {
                method: FileIngestionMethod::Recursive,
                hash_type: Algorithm::SHA1,
            },
        );
        assert_eq!(
            drv.derivation_type(),
            Err(InvalidDerivationShape::MixedFloatingAlgorithms)
        );
    }

    #[rstest]
    #[case::input_addressed(DerivationType::InputAddressed, false, false, false, true)]
    #[case::deferred(DerivationType::DeferredInputAddressed, false, false, false, false)]
    #[case::fixed(DerivationType::CAFixed, true, true, true, true)]
    #[case::floating(DerivationType::CAFloating, true, false, false, false)]
    fn test_type_predicates(
        #[case] t: DerivationType,
        #[case] is_ca: bool,
        #[case] is_fixed: bool,
        #[case] is_impure: bool,
        #[case] has_known_output_paths: bool,
    ) {
        assert_eq!(t.is_ca(), is_ca);
        assert_eq!(t.is_fixed(), is_fixed);
        assert_eq!(t.is_impure(), is_impure);
        assert_eq!(t.has_known_output_paths(), has_known_output_paths);
    }

    #[test]
    fn test_is_builtin() {
        let mut drv = input_addressed_drv();
        assert!(!drv.is_builtin());
        drv.builder = "builtin:fetchurl".to_string();
        assert!(drv.is_builtin());
    }

    #[test]
    fn test_outputs_and_opt_paths() {
        let store_dir = store_dir();
        let drv = input_addressed_drv();
        let res = drv.outputs_and_opt_paths(&store_dir).unwrap();
        assert_eq!(res.len(), 1);
        let (output, path) = &res["out"];
        assert_eq!(output, &drv.outputs["out"]);
        assert_eq!(
            path.as_ref().map(|p| p.to_string()),
            Some("x7fwirmcacmyq5z1csxs44ilmm6zs0iq-hello".to_string())
        );
    }

    #[tokio::test]
    async fn test_wire_roundtrip() {
        let store_dir = store_dir();
        let mut drv = input_addressed_drv();
        drv.env
            .insert("PATH".to_string(), "/path-with\nnewline".to_string());
        drv.input_srcs
            .insert("ldhh7c134ap5swsm86rqnc0i7cinqvrc-src".parse().unwrap());
        let mut buf = Vec::new();
        drv.write_drv(&mut buf, &store_dir).await.unwrap();
        let parsed = BasicDerivation::read_drv(&buf[..], &store_dir, "hello")
            .await
            .unwrap();
        assert_eq!(parsed, drv);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn proptest_wire_roundtrip(drv in any::<BasicDerivation>()) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let store_dir = StoreDir::default();
                let mut buf = Vec::new();
                drv.write_drv(&mut buf, &store_dir).await.unwrap();
                let parsed = BasicDerivation::read_drv(&buf[..], &store_dir, &drv.name)
                    .await
                    .unwrap();
                assert_eq!(parsed, drv);
            });
        }
    }

    use crate::memory_store::MemoryStore;
    use crate::store_api::StoreDirProvider;

    #[tokio::test]
    async fn test_write_read_derivation() {
        let mut store = MemoryStore::new();
        let drv = Derivation::from(input_addressed_drv());
        let drv_path = write_derivation(&mut store, &drv, RepairFlag::NoRepair, false)
            .await
            .unwrap();
        assert_eq!(drv_path.name.name(), "hello.drv");
        assert!(drv_path.is_derivation());
        let read_back = read_derivation(&mut store, &drv_path).await.unwrap();
        assert_eq!(read_back, drv);
    }

    #[tokio::test]
    async fn test_write_derivation_read_only() {
        let mut store = MemoryStore::new();
        let drv = Derivation::from(input_addressed_drv());
        let computed = write_derivation(&mut store, &drv, RepairFlag::NoRepair, true)
            .await
            .unwrap();
        // Nothing was persisted.
        assert!(read_derivation(&mut store, &computed).await.is_err());
        let written = write_derivation(&mut store, &drv, RepairFlag::NoRepair, false)
            .await
            .unwrap();
        assert_eq!(computed, written);
    }

    #[tokio::test]
    async fn test_write_derivation_references_inputs() {
        let mut store = MemoryStore::new();
        let mut drv = Derivation::from(input_addressed_drv());
        let plain = write_derivation(&mut store, &drv, RepairFlag::NoRepair, true)
            .await
            .unwrap();
        drv.basic
            .input_srcs
            .insert("ldhh7c134ap5swsm86rqnc0i7cinqvrc-src".parse().unwrap());
        let with_src = write_derivation(&mut store, &drv, RepairFlag::NoRepair, true)
            .await
            .unwrap();
        assert_ne!(plain, with_src);
    }

    #[tokio::test]
    async fn test_fixed_output_stability() {
        // Changing the builder of a fixed-output derivation moves its
        // .drv file but not its output path.
        let mut store = MemoryStore::new();
        let store_dir = store.store_dir();
        let fixed = DerivationOutput::CAFixed(
            "sha256:248d6a61d20638b8e5c026930c3e6039a33ce45964ff2167f6ecedd419db06c1"
                .parse()
                .unwrap(),
        );
        let mut d1 = input_addressed_drv();
        d1.outputs.clear();
        d1.outputs.insert("out".to_string(), fixed.clone());
        d1.name = "src".to_string();
        let mut d2 = d1.clone();
        d2.builder = "/bin/other-fetcher".to_string();

        assert_eq!(
            d1.outputs_and_opt_paths(&store_dir).unwrap(),
            d2.outputs_and_opt_paths(&store_dir).unwrap()
        );
        let p1 = write_derivation(
            &mut store,
            &Derivation::from(d1),
            RepairFlag::NoRepair,
            false,
        )
        .await
        .unwrap();
        let p2 = write_derivation(
            &mut store,
            &Derivation::from(d2),
            RepairFlag::NoRepair,
            false,
        )
        .await
        .unwrap();
        assert_ne!(p1, p2);
    }
}
