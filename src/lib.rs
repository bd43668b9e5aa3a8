//! The derivation core of a content-addressed build system: the data
//! model of build recipes, their classifier, the canonical on-disk and
//! wire codecs, placeholder construction, and the modulo-fixed-output
//! hashing that assigns stable identities to derivations and their
//! outputs.

use std::collections::BTreeSet;

pub mod base32;
pub mod hash;
pub mod io;

mod content_address;
mod derivation;
mod error;
mod flag_enum;
mod memory_store;
mod path;
mod store_api;
mod store_dir;

pub use content_address::{FileIngestionMethod, FixedOutputHash, ParseFixedOutputHashError};
pub use derivation::{
    downstream_placeholder, hash_derivation_modulo, hash_placeholder, is_derivation,
    output_path_name, parse_derivation, read_derivation, static_output_hashes, want_output,
    write_derivation, BasicDerivation, CaOutputHashes, Derivation, DerivationInputs,
    DerivationOutput, DerivationOutputs, DerivationOutputsAndOptPaths, DerivationType, DrvHash,
    DrvHashKind, DrvHashModulo, DrvHashes, InvalidDerivationShape, ParseDerivationError,
    ReadDerivationError, UnresolvedDrvHash, WriteDerivationError,
};
pub use error::Error;
pub use memory_store::MemoryStore;
pub use path::{
    ParseStorePathError, ReadStorePathError, StorePath, StorePathHash, StorePathName,
    StorePathSet, DRV_EXTENSION,
};
pub use store_api::{RepairFlag, Store, StoreDirProvider};
pub use store_dir::StoreDir;

pub type StringSet = BTreeSet<String>;

#[macro_export]
macro_rules! string_set {
    [] => { $crate::StringSet::new() };
    [$e:expr$(,$e2:expr)*$(,)?] => {{
        let mut ret = $crate::StringSet::new();
        ret.insert(($e).to_string());
        $(
            ret.insert(($e2).to_string());
        )*
        ret
    }}
}

#[cfg(any(test, feature = "test"))]
pub mod proptest {
    pub use crate::derivation::proptest::{
        arb_basic_derivation, arb_derivation, arb_derivation_output, arb_derivation_outputs,
    };
    pub use crate::path::proptest::{
        arb_drv_name, arb_drv_store_path, arb_output_name, arb_store_path, arb_store_path_name,
    };
}
