//! Named store pools with atomic active-store switching
//!
//! A pool is a directory of sibling stores plus a small JSON metadata file
//! naming the *active* one. The prune-and-switch protocol copies live data
//! into an empty sibling, flips the active pointer atomically (temp file +
//! rename), and clears the old store to reclaim space.
//!
//! Every store opened through a pool holds a slot in the cross-process
//! [`StoreGate`](crate::gate::StoreGate), bounding the aggregate footprint
//! of concurrently open stores system-wide.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tessera_core::{Error, Result};
use tracing::{debug, info};

use crate::config::{PoolConfig, StoreConfig};
use crate::gate::{GatePermit, StoreGate};
use crate::prune::{PruneOptions, PruneReport, PruneTransfer};
use crate::store::QuadStore;

/// Pool metadata file name
pub const POOL_META_FILE: &str = "pool.json";

/// The default active-store name for a fresh pool
pub const DEFAULT_ACTIVE: &str = "primary";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PoolMeta {
    active: String,
    members: Vec<String>,
}

impl PoolMeta {
    fn fresh() -> Self {
        PoolMeta {
            active: DEFAULT_ACTIVE.to_string(),
            members: Vec::new(),
        }
    }
}

struct OpenStore {
    store: Arc<QuadStore>,
    _permit: GatePermit,
}

/// A directory of named sibling stores with one active pointer
pub struct StorePool {
    dir: PathBuf,
    store_config: StoreConfig,
    gate: StoreGate,
    gate_timeout: std::time::Duration,
    open: Mutex<HashMap<String, OpenStore>>,
}

impl StorePool {
    /// Open (or create) a pool at `dir`.
    pub fn open(
        dir: impl AsRef<Path>,
        pool_config: PoolConfig,
        store_config: StoreConfig,
    ) -> Result<StorePool> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let gate = StoreGate::open(pool_config.gate_dir.clone(), pool_config.gate_capacity)?;
        let pool = StorePool {
            dir,
            store_config,
            gate,
            gate_timeout: pool_config.gate_timeout,
            open: Mutex::new(HashMap::new()),
        };

        if !pool.meta_path().exists() {
            pool.write_meta(&PoolMeta::fresh())?;
        }
        Ok(pool)
    }

    /// The pool directory
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Name of the currently active store
    pub fn active_name(&self) -> Result<String> {
        Ok(self.read_meta()?.active)
    }

    /// Open (or return the already-open) active store
    pub fn active(&self) -> Result<Arc<QuadStore>> {
        let name = self.active_name()?;
        self.store(&name)
    }

    /// Member names recorded in the pool metadata
    pub fn members(&self) -> Result<Vec<String>> {
        Ok(self.read_meta()?.members)
    }

    /// Open a named store, creating it if absent.
    ///
    /// Blocks on the cross-process gate up to the configured timeout;
    /// [`Error::CapacityExhausted`] when no slot frees up.
    pub fn store(&self, name: &str) -> Result<Arc<QuadStore>> {
        Self::validate_name(name)?;

        let mut open = self.open.lock();
        if let Some(entry) = open.get(name) {
            return Ok(Arc::clone(&entry.store));
        }

        let permit = self.gate.acquire(self.gate_timeout)?;
        let store = Arc::new(QuadStore::open(
            self.dir.join(name),
            self.store_config.clone(),
        )?);

        let mut meta = self.read_meta()?;
        if !meta.members.iter().any(|m| m == name) {
            meta.members.push(name.to_string());
            self.write_meta(&meta)?;
        }

        debug!(target: "tessera::pool", name, "store opened");
        open.insert(
            name.to_string(),
            OpenStore {
                store: Arc::clone(&store),
                _permit: permit,
            },
        );
        Ok(store)
    }

    /// Close a named store, releasing its gate slot. Outstanding `Arc`
    /// handles keep the store alive until dropped.
    pub fn close(&self, name: &str) {
        if self.open.lock().remove(name).is_some() {
            debug!(target: "tessera::pool", name, "store closed");
        }
    }

    /// Atomically move the active pointer from `from` to `to`.
    ///
    /// Fails with [`Error::Conflict`] when `from` is not the active store.
    pub fn switch(&self, from: &str, to: &str) -> Result<()> {
        Self::validate_name(to)?;
        let mut meta = self.read_meta()?;
        if meta.active != from {
            return Err(Error::Conflict(format!(
                "active store is {:?}, not {from:?}",
                meta.active
            )));
        }
        meta.active = to.to_string();
        if !meta.members.iter().any(|m| m == to) {
            meta.members.push(to.to_string());
        }
        self.write_meta(&meta)?;
        info!(target: "tessera::pool", from, to, "active store switched");
        Ok(())
    }

    /// Close a named store and delete its files.
    ///
    /// The active store cannot be cleared.
    pub fn clear(&self, name: &str) -> Result<()> {
        let mut meta = self.read_meta()?;
        if meta.active == name {
            return Err(Error::Conflict(format!(
                "cannot clear the active store {name:?}"
            )));
        }

        self.close(name);
        let store_dir = self.dir.join(name);
        if store_dir.exists() {
            fs::remove_dir_all(&store_dir)?;
        }
        meta.members.retain(|m| m != name);
        self.write_meta(&meta)?;
        info!(target: "tessera::pool", name, "store cleared");
        Ok(())
    }

    /// The full prune-and-switch cycle: copy the active store into an empty
    /// sibling under `options`, switch the active pointer, clear the old
    /// store. With `dry_run` set, only the transfer report is produced.
    pub fn prune_active(&self, options: PruneOptions) -> Result<PruneReport> {
        let active = self.active_name()?;
        let sibling = if active == DEFAULT_ACTIVE {
            "secondary".to_string()
        } else {
            DEFAULT_ACTIVE.to_string()
        };
        let dry_run = options.dry_run;

        // Step 1: the target must start empty
        if self.dir.join(&sibling).exists() {
            self.clear(&sibling)?;
        }

        let source = self.store(&active)?;
        let target = self.store(&sibling)?;
        let report = PruneTransfer::new(&source, &target, options).run()?;

        if dry_run {
            self.close(&sibling);
            self.clear(&sibling)?;
            return Ok(report);
        }

        drop(source);
        drop(target);
        self.switch(&active, &sibling)?;
        self.close(&active);
        self.clear(&active)?;

        info!(
            target: "tessera::pool",
            old = %active,
            new = %sibling,
            scanned = report.scanned,
            written = report.written,
            bytes_saved = report.bytes_saved,
            "prune-and-switch complete"
        );
        Ok(report)
    }

    fn meta_path(&self) -> PathBuf {
        self.dir.join(POOL_META_FILE)
    }

    fn read_meta(&self) -> Result<PoolMeta> {
        let bytes = fs::read(self.meta_path())?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Corruption(format!("unreadable pool metadata: {e}")))
    }

    /// Write the metadata through a temp file + rename so a crash never
    /// leaves a torn pointer.
    fn write_meta(&self, meta: &PoolMeta) -> Result<()> {
        let tmp = self.dir.join("pool.json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(
                serde_json::to_string_pretty(meta)
                    .map_err(|e| Error::InvalidArgument(e.to_string()))?
                    .as_bytes(),
            )?;
            file.sync_all()?;
        }
        fs::rename(&tmp, self.meta_path())?;
        Ok(())
    }

    fn validate_name(name: &str) -> Result<()> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(Error::InvalidArgument(format!(
                "invalid store name {name:?}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Pattern;
    use tempfile::tempdir;

    fn pool_at(root: &Path, capacity: usize) -> StorePool {
        StorePool::open(
            root.join("pool"),
            PoolConfig::for_testing(root.join("gate"), capacity),
            StoreConfig::for_testing(),
        )
        .unwrap()
    }

    #[test]
    fn test_fresh_pool_defaults_to_primary() {
        let dir = tempdir().unwrap();
        let pool = pool_at(dir.path(), 4);
        assert_eq!(pool.active_name().unwrap(), "primary");
        assert!(pool.members().unwrap().is_empty());
    }

    #[test]
    fn test_store_open_is_cached_and_recorded() {
        let dir = tempdir().unwrap();
        let pool = pool_at(dir.path(), 4);

        let a = pool.store("primary").unwrap();
        let b = pool.store("primary").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.members().unwrap(), vec!["primary"]);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let dir = tempdir().unwrap();
        let pool = pool_at(dir.path(), 4);
        assert!(pool.store("../escape").is_err());
        assert!(pool.store("").is_err());
        assert!(pool.store("with space").is_err());
    }

    #[test]
    fn test_switch_checks_current_active() {
        let dir = tempdir().unwrap();
        let pool = pool_at(dir.path(), 4);

        assert!(matches!(
            pool.switch("secondary", "primary"),
            Err(Error::Conflict(_))
        ));
        pool.switch("primary", "secondary").unwrap();
        assert_eq!(pool.active_name().unwrap(), "secondary");
    }

    #[test]
    fn test_clear_refuses_active_and_deletes_files() {
        let dir = tempdir().unwrap();
        let pool = pool_at(dir.path(), 4);

        let store = pool.store("scratch").unwrap();
        store.add_current(None, "<s>", "<p>", "\"x\"").unwrap();
        drop(store);

        assert!(matches!(pool.clear("primary"), Err(Error::Conflict(_))));

        pool.clear("scratch").unwrap();
        assert!(!dir.path().join("pool/scratch").exists());
        assert_eq!(pool.members().unwrap(), Vec::<String>::new());

        // Recreating it starts empty
        let store = pool.store("scratch").unwrap();
        assert_eq!(store.query_current(Pattern::ANY).unwrap().count(), 0);
    }

    #[test]
    fn test_gate_bounds_open_stores() {
        let dir = tempdir().unwrap();
        let pool = pool_at(dir.path(), 2);

        let _a = pool.store("a").unwrap();
        let _b = pool.store("b").unwrap();
        let err = pool.store("c").unwrap_err();
        assert!(matches!(err, Error::CapacityExhausted { .. }));

        // Closing one frees a slot for the next open
        pool.close("a");
        assert!(pool.store("c").is_ok());
    }

    #[test]
    fn test_two_pools_share_one_gate() {
        let dir = tempdir().unwrap();
        let pool_a = pool_at(dir.path(), 2);
        let pool_b = StorePool::open(
            dir.path().join("pool-b"),
            PoolConfig::for_testing(dir.path().join("gate"), 2),
            StoreConfig::for_testing(),
        )
        .unwrap();

        // Two slots taken by the first pool exhaust the shared gate
        let _a = pool_a.store("a").unwrap();
        let _b = pool_a.store("b").unwrap();
        let err = pool_b.store("c").unwrap_err();
        assert!(matches!(err, Error::CapacityExhausted { .. }));

        pool_a.close("a");
        assert!(pool_b.store("c").is_ok());
    }

    #[test]
    fn test_metadata_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let pool = pool_at(dir.path(), 4);
            pool.store("primary").unwrap();
            pool.switch("primary", "secondary").unwrap();
        }
        let pool = pool_at(dir.path(), 4);
        assert_eq!(pool.active_name().unwrap(), "secondary");
        assert!(pool.members().unwrap().contains(&"primary".to_string()));
    }
}
