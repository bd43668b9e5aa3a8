use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::derivation::DrvHashes;
use crate::error::Error;
use crate::hash::{self, Algorithm};
use crate::path::{StorePath, StorePathSet};
use crate::store_api::{RepairFlag, Store, StoreDirProvider};
use crate::store_dir::StoreDir;

/// A store keeping everything in memory. Enough of an oracle for
/// hashing, writing and resolving derivations; also what the tests run
/// against.
#[derive(Debug, Default)]
pub struct MemoryStore {
    store_dir: StoreDir,
    contents: BTreeMap<StorePath, Vec<u8>>,
    output_maps: BTreeMap<StorePath, BTreeMap<String, Option<StorePath>>>,
    drv_hashes: DrvHashes,
    reads: u64,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn with_store_dir(store_dir: StoreDir) -> MemoryStore {
        MemoryStore {
            store_dir,
            ..MemoryStore::default()
        }
    }

    /// Record a realized output of a derivation, as a scheduler would
    /// after a successful build.
    pub fn register_output(
        &mut self,
        drv_path: &StorePath,
        output_name: &str,
        output_path: Option<StorePath>,
    ) {
        self.output_maps
            .entry(drv_path.clone())
            .or_default()
            .insert(output_name.to_string(), output_path);
    }

    /// How many store objects were read back, memoization-visible.
    pub fn read_count(&self) -> u64 {
        self.reads
    }
}

impl StoreDirProvider for MemoryStore {
    fn store_dir(&self) -> StoreDir {
        self.store_dir.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn read_file(&mut self, path: &StorePath) -> Result<Vec<u8>, Error> {
        self.reads += 1;
        self.contents
            .get(path)
            .cloned()
            .ok_or_else(|| Error::InvalidPath(self.store_dir.print_path(path)))
    }

    async fn write_file(
        &mut self,
        name: &str,
        contents: &[u8],
        references: &StorePathSet,
        repair: RepairFlag,
    ) -> Result<StorePath, Error> {
        let hash = hash::digest(Algorithm::SHA256, contents);
        let path = self.store_dir.make_text_path(name, &hash, references)?;
        if bool::from(repair) || !self.contents.contains_key(&path) {
            self.contents.insert(path.clone(), contents.to_vec());
        }
        Ok(path)
    }

    async fn query_output_map(
        &mut self,
        drv_path: &StorePath,
    ) -> Result<BTreeMap<String, Option<StorePath>>, Error> {
        self.output_maps
            .get(drv_path)
            .cloned()
            .ok_or_else(|| Error::InvalidPath(self.store_dir.print_path(drv_path)))
    }

    fn drv_hashes(&self) -> DrvHashes {
        self.drv_hashes.clone()
    }
}
