//! The atom store: interning facade over the data file and hash directory

use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tessera_core::{AtomId, Error, Result};
use tracing::{debug, info};

use super::data::AtomData;
use super::directory::{fnv1a32, Directory};
use super::{DATA_FILE, HASH_FILE};

/// Maps RDF term strings to stable ids and back
///
/// Readers run lock-free against `Arc` snapshots of the data mapping and the
/// probe directory; all mutation funnels through one internal writer mutex.
/// The store-level write lock in the engine already serializes writers, so
/// the mutex here only guards against misuse, not contention.
pub struct AtomStore {
    data: AtomData,
    directory: RwLock<Arc<Directory>>,
    writer: Mutex<()>,
    hash_path: PathBuf,
}

impl AtomStore {
    /// Open the atom store inside a store directory, creating files as
    /// needed. A missing or stale `atoms.hash` is rebuilt from `atoms.data`.
    pub fn open(store_dir: &Path) -> Result<Self> {
        let data = AtomData::open(&store_dir.join(DATA_FILE))?;
        let hash_path = store_dir.join(HASH_FILE);

        let directory = match Directory::load_from(&hash_path, data.committed_len())? {
            Some(dir) => dir,
            None => {
                info!(
                    target: "tessera::atoms",
                    path = %hash_path.display(),
                    "hash directory missing or stale, rebuilding from data file"
                );
                Directory::rebuild(&data)
            }
        };

        Ok(AtomStore {
            data,
            directory: RwLock::new(Arc::new(directory)),
            writer: Mutex::new(()),
            hash_path,
        })
    }

    /// Intern a canonical term string, returning its stable id.
    ///
    /// The fast path is a lock-free probe; a miss re-probes under the writer
    /// mutex (the directory may have changed) before appending.
    pub fn intern(&self, term: &str) -> Result<AtomId> {
        if term.is_empty() {
            return Err(Error::InvalidArgument(
                "cannot intern the empty string".into(),
            ));
        }
        let bytes = term.as_bytes();
        let fp = fnv1a32(bytes);

        if let Some(offset) = self.snapshot().lookup(bytes, fp, &self.data)? {
            return Ok(AtomId(offset));
        }

        let _writer = self.writer.lock();

        // Double-check: another intern may have published this term between
        // the lock-free probe and the lock acquisition.
        let mut directory = self.snapshot();
        if let Some(offset) = directory.lookup(bytes, fp, &self.data)? {
            return Ok(AtomId(offset));
        }

        if directory.needs_grow() {
            let grown = Arc::new(directory.grown());
            debug!(
                target: "tessera::atoms",
                capacity = grown.capacity(),
                atoms = grown.len(),
                "hash directory doubled"
            );
            *self.directory.write() = Arc::clone(&grown);
            directory = grown;
        }

        let offset = self.data.append(bytes)?;
        directory.publish(fp, offset);
        Ok(AtomId(offset))
    }

    /// Probe for an already-interned term without inserting it.
    ///
    /// Query paths use this: a bound pattern term that was never interned
    /// cannot match any stored quad.
    pub fn lookup(&self, term: &str) -> Result<Option<AtomId>> {
        if term.is_empty() {
            return Ok(Some(AtomId::DEFAULT_GRAPH));
        }
        let bytes = term.as_bytes();
        Ok(self
            .snapshot()
            .lookup(bytes, fnv1a32(bytes), &self.data)?
            .map(AtomId))
    }

    /// Resolve an id back to its term string.
    ///
    /// The default-graph sentinel resolves to the empty string; any offset
    /// that does not address a committed record is `InvalidAtomId`.
    pub fn resolve(&self, id: AtomId) -> Result<String> {
        if id.is_default_graph() {
            return Ok(String::new());
        }
        let bytes = self.data.get(id.as_u64())?;
        String::from_utf8(bytes).map_err(|_| {
            Error::Corruption(format!("atom {} holds non-UTF-8 bytes", id.as_u64()))
        })
    }

    /// Number of interned atoms
    pub fn atom_count(&self) -> u64 {
        self.snapshot().len()
    }

    /// Committed bytes in the data file
    pub fn data_len(&self) -> u64 {
        self.data.committed_len()
    }

    /// fsync the data file only.
    ///
    /// Commit paths call this before the WAL fsync whenever a transaction
    /// interned new terms: a committed record must never reference term
    /// bytes that did not reach disk.
    pub fn sync_data(&self) -> Result<()> {
        self.data.sync()
    }

    /// fsync the data file and persist the directory snapshot (checkpoint
    /// path).
    pub fn flush(&self) -> Result<()> {
        let _writer = self.writer.lock();
        self.data.sync()?;
        self.snapshot()
            .write_to(&self.hash_path, self.data.committed_len())?;
        Ok(())
    }

    fn snapshot(&self) -> Arc<Directory> {
        Arc::clone(&self.directory.read())
    }
}
