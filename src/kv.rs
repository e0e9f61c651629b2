//! Key-value storage on top of a [`Store`].
//!
//! Every value is one file, `/<namespace>/data/<hex(sha256(key))>.data`,
//! so neither key names nor their lengths reach the directory index.
use tracing::debug;

use crate::crypto::sha256;
use crate::error::{ErrorKind, Result};
use crate::medium::Medium;
use crate::path::{validate_segment, VirtualPath};
use crate::store::Store;

const DATA_DIR: &str = "data";
const VALUE_SUFFIX: &str = ".data";

pub struct KvStore<'a, M: Medium> {
    store: &'a Store<M>,
    namespace: String,
}

impl<'a, M: Medium> KvStore<'a, M> {
    pub fn new(store: &'a Store<M>, namespace: &str) -> Result<Self> {
        validate_segment(namespace)?;
        Ok(Self {
            store,
            namespace: namespace.to_owned(),
        })
    }

    fn data_dir(&self) -> Result<VirtualPath> {
        VirtualPath::from_segments([self.namespace.as_str(), DATA_DIR])
    }

    /// Where the value of `key` is kept.
    pub fn path(&self, key: impl AsRef<[u8]>) -> Result<VirtualPath> {
        let name = format!("{}{VALUE_SUFFIX}", hex::encode(sha256(key.as_ref())));
        self.data_dir()?.join(&name)
    }

    fn ensure_dirs(&self) -> Result<()> {
        let data_dir = self.data_dir()?;
        for dir in [data_dir.parent(), Some(data_dir)].into_iter().flatten() {
            match self.store.create_dir(&dir) {
                Err(e) if e.kind() != ErrorKind::Exists => return Err(e),
                _ => {}
            }
        }
        Ok(())
    }

    pub fn set(&self, key: impl AsRef<[u8]>, value: &[u8]) -> Result<()> {
        self.ensure_dirs()?;
        self.store.write_file(&self.path(key)?, value)
    }

    /// Fails with [`ErrorKind::NotFound`] for a key that was never set.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        self.store.read_file(&self.path(key)?)
    }

    pub fn get_range(&self, key: impl AsRef<[u8]>, offset: u64, length: usize) -> Result<Vec<u8>> {
        self.store.read_file_part(&self.path(key)?, offset, length)
    }

    pub fn contains(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        self.store.exists(&self.path(key)?)
    }

    pub fn remove(&self, key: impl AsRef<[u8]>) -> Result<()> {
        self.store.delete_file(&self.path(key)?)
    }

    /// Removes every value of the namespace. Returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let data_dir = self.data_dir()?;
        let entries = match self.store.read_dir(&data_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        let mut removed = 0;
        for entry in entries.iter().filter(|e| !e.is_dir) {
            self.store.delete_file(&data_dir.join(&entry.name)?)?;
            removed += 1;
        }
        debug!("Cleared {removed} values from namespace {}", self.namespace);
        Ok(removed)
    }
}
