//! Derivation hashing with the details of fixed-output sub-derivations
//! expunged.
//!
//! A fixed-output derivation pins its output content up front, so
//! changes to how that content is obtained (a mirror URL, a different
//! fetcher) must not propagate upwards through the dependency graph and
//! change output paths everywhere. To that end each input derivation is
//! replaced, before hashing, by its own modulo-hash: for fixed-output
//! inputs that is a hash derived purely from the declared content
//! address, for everything else it is the recursively-computed
//! derivation hash.

use std::collections::BTreeMap;
use std::ops::BitOrAssign;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt};
use log::trace;
use thiserror::Error;

use crate::error::Error;
use crate::hash::{self, Algorithm, Hash};
use crate::path::StorePath;
use crate::store_api::Store;
use crate::string_set;
use crate::StringSet;

use super::{read_derivation, Derivation, DerivationOutput, DerivationType};

/// Per-output hashes of a fixed-output derivation; these are known
/// up-front since the outputs are pinned.
pub type CaOutputHashes = BTreeMap<String, Hash>;

/// Whether a derivation hash can be used to compute output paths now,
/// or must wait until all floating ancestors have been realized.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub enum DrvHashKind {
    /// Statically determined; directly usable for output paths.
    Regular,
    /// Some ancestor is a floating content-addressed derivation.
    Deferred,
}

/// `Deferred` absorbs `Regular`; `Regular` is the identity.
impl BitOrAssign for DrvHashKind {
    fn bitor_assign(&mut self, other: DrvHashKind) {
        if let DrvHashKind::Deferred = other {
            *self = other;
        }
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct DrvHash {
    pub hash: Hash,
    pub kind: DrvHashKind,
}

/// Result of [`hash_derivation_modulo`]: one derivation hash for
/// regular derivations, per-output hashes for fixed-output ones.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub enum DrvHashModulo {
    DrvHash(DrvHash),
    CaOutputHashes(CaOutputHashes),
}

#[derive(Error, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub enum UnresolvedDrvHash {
    #[error("derivation hash is deferred on a floating content-addressed ancestor")]
    Deferred,
    #[error("fixed-output derivation has per-output hashes, not a derivation hash")]
    FixedOutput,
}

impl DrvHashModulo {
    /// The contained hash, but only when it is directly usable for
    /// output path computation.
    pub fn require_regular(&self) -> Result<&Hash, UnresolvedDrvHash> {
        match self {
            DrvHashModulo::DrvHash(DrvHash {
                hash,
                kind: DrvHashKind::Regular,
            }) => Ok(hash),
            DrvHashModulo::DrvHash(_) => Err(UnresolvedDrvHash::Deferred),
            DrvHashModulo::CaOutputHashes(_) => Err(UnresolvedDrvHash::FixedOutput),
        }
    }
}

/// Memoization table for [`hash_derivation_modulo`], keyed by the
/// derivation's store path. Handles are cheap clones of one shared
/// table; the lock is only held across a lookup or insert, never across
/// store reads. Derivations are immutable so entries are never
/// invalidated.
#[derive(Debug, Clone, Default)]
pub struct DrvHashes(Arc<Mutex<BTreeMap<StorePath, DrvHashModulo>>>);

impl DrvHashes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, drv_path: &StorePath) -> Option<DrvHashModulo> {
        self.0.lock().unwrap().get(drv_path).cloned()
    }

    pub fn insert(&self, drv_path: StorePath, value: DrvHashModulo) {
        self.0.lock().unwrap().insert(drv_path, value);
    }
}

/// Look up an input derivation by path and hash it, memoizing the
/// result. Mutually recursive with [`hash_derivation_modulo`].
fn path_derivation_modulo<'a, S>(
    store: &'a mut S,
    drv_path: &'a StorePath,
) -> BoxFuture<'a, Result<DrvHashModulo, Error>>
where
    S: Store + Send,
{
    async move {
        let hashes = store.drv_hashes();
        if let Some(cached) = hashes.lookup(drv_path) {
            return Ok(cached);
        }
        let drv = read_derivation(store, drv_path).await?;
        let modulo = hash_derivation_modulo(store, &drv, false).await?;
        hashes.insert(drv_path.clone(), modulo.clone());
        Ok(modulo)
    }
    .boxed()
}

/// Hash a derivation with fixed-output sub-derivations expunged.
///
/// For fixed-output derivations, each hash in the returned map is not
/// the output's content hash but a hash of that hash along with other
/// constant data: a pure function of the output's contents, with no way
/// to spoof an output for a derivation or vice versa.
///
/// For everything else the input derivation paths are replaced by the
/// hex renderings of their recursively-computed modulo-hashes before
/// hashing the canonical encoding. Fixed-output inputs contribute one
/// pseudo-input per consumed output, keyed by that output's hash and
/// pointing at a single `out`, so the provenance of fixed outputs does
/// not leak into the hash.
pub async fn hash_derivation_modulo<S>(
    store: &mut S,
    drv: &Derivation,
    mask_outputs: bool,
) -> Result<DrvHashModulo, Error>
where
    S: Store + Send,
{
    let store_dir = store.store_dir();
    let mut kind = DrvHashKind::Regular;
    match drv.derivation_type()? {
        DerivationType::CAFixed => {
            let mut output_hashes = CaOutputHashes::new();
            for (output_name, output) in drv.outputs.iter() {
                let dof = match output {
                    DerivationOutput::CAFixed(dof) => dof,
                    // Ruled out by the classifier.
                    _ => continue,
                };
                let path = store_dir.make_fixed_output_path(
                    dof.method,
                    &dof.hash,
                    &super::output_path_name(&drv.name, output_name),
                    &crate::path::StorePathSet::new(),
                    false,
                )?;
                let hash = hash::digest(
                    Algorithm::SHA256,
                    format!(
                        "fixed:out:{}:{:#x}:{}",
                        dof.method_algo(),
                        dof.hash,
                        store_dir.display_path(&path)
                    ),
                );
                output_hashes.insert(output_name.clone(), hash);
            }
            return Ok(DrvHashModulo::CaOutputHashes(output_hashes));
        }
        DerivationType::CAFloating => kind |= DrvHashKind::Deferred,
        DerivationType::InputAddressed | DerivationType::DeferredInputAddressed => {}
    }

    // Replace the input derivation paths with recursive calls to this
    // function.
    let mut inputs2: BTreeMap<String, StringSet> = BTreeMap::new();
    for (input_drv, input_outputs) in drv.input_drvs.iter() {
        match path_derivation_modulo(store, input_drv).await? {
            DrvHashModulo::DrvHash(drv_hash) => {
                kind |= drv_hash.kind;
                inputs2.insert(format!("{:#x}", drv_hash.hash), input_outputs.clone());
            }
            DrvHashModulo::CaOutputHashes(output_hashes) => {
                for output_name in input_outputs.iter() {
                    let h = output_hashes.get(output_name).ok_or_else(|| {
                        Error::UnknownOutput {
                            drv_path: store_dir.print_path(input_drv),
                            output: output_name.clone(),
                        }
                    })?;
                    // Put each one in with a single "out" output.
                    inputs2.insert(format!("{:#x}", h), string_set!["out"]);
                }
            }
        }
    }

    let s = drv.unparse(&store_dir, mask_outputs, Some(&inputs2))?;
    let hash = hash::digest(Algorithm::SHA256, &s);
    trace!("derivation '{}' hashes modulo to {}", drv.name, hash);
    Ok(DrvHashModulo::DrvHash(DrvHash { hash, kind }))
}

/// A hash per output name that uniquely identifies the output modulo
/// self-references: the per-output hashes for fixed-output derivations,
/// the single derivation hash replicated for everything else. Callers
/// that derive paths from these must reject `Deferred` results first.
pub async fn static_output_hashes<S>(
    store: &mut S,
    drv: &Derivation,
) -> Result<BTreeMap<String, Hash>, Error>
where
    S: Store + Send,
{
    match hash_derivation_modulo(store, drv, true).await? {
        DrvHashModulo::DrvHash(drv_hash) => Ok(drv
            .outputs
            .keys()
            .map(|output_name| (output_name.clone(), drv_hash.hash))
            .collect()),
        DrvHashModulo::CaOutputHashes(output_hashes) => Ok(output_hashes),
    }
}
