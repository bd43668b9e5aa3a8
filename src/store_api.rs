use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::derivation::DrvHashes;
use crate::error::Error;
use crate::flag_enum;
use crate::path::{StorePath, StorePathSet};
use crate::store_dir::StoreDir;

flag_enum! {
    #[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
    pub enum RepairFlag {
        NoRepair = false,
        Repair = true,
    }
}

pub trait StoreDirProvider {
    /// Root directory of this store.
    fn store_dir(&self) -> StoreDir;
}

/// The store oracle the derivation core runs against. Path construction
/// is pure and lives on [`StoreDir`]; everything the core needs from
/// the object store itself is here.
#[async_trait]
pub trait Store: StoreDirProvider {
    /// Read back the contents of a store object.
    async fn read_file(&mut self, path: &StorePath) -> Result<Vec<u8>, Error>;

    /// Persist a text object and return its path. Text objects are
    /// addressed by their contents and references, so writing the same
    /// bytes twice yields the same path; `repair` overwrites a damaged
    /// entry.
    async fn write_file(
        &mut self,
        name: &str,
        contents: &[u8],
        references: &StorePathSet,
        repair: RepairFlag,
    ) -> Result<StorePath, Error>;

    /// The outputs of a derivation together with their realized store
    /// paths, where known.
    async fn query_output_map(
        &mut self,
        drv_path: &StorePath,
    ) -> Result<BTreeMap<String, Option<StorePath>>, Error>;

    /// Handle to the modulo-hash memoization table shared by everything
    /// using this store.
    fn drv_hashes(&self) -> DrvHashes;
}
