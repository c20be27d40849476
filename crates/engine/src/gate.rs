//! Cross-process store gate
//!
//! A counting semaphore bounding the number of concurrently open stores
//! system-wide, so parallel test runs or several embedded instances cannot
//! exhaust the disk together. Named POSIX semaphores are not portably
//! available, so the gate is built from exclusive file locks: a slot
//! directory in the system temp dir holds `slot-N.lock` files, and holding
//! a store slot means holding one file's exclusive lock. File locks die with
//! the process, so a crashed holder frees its slot automatically.
//!
//! The first creator of the gate directory fixes its capacity in a
//! `capacity` file; later openers inherit it.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tessera_core::{Error, Result};
use tracing::{debug, info, warn};

/// Well-known gate directory name under the system temp dir. Every embedder
/// using the default gate contends on the same bound.
pub const GATE_NAME: &str = "SkyOmega-QuadStore-Gate-v1";

/// Default number of concurrently open stores
pub const DEFAULT_GATE_CAPACITY: usize = 4;

/// Poll interval while waiting for a slot
const RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// A file-lock-backed counting semaphore shared across processes
pub struct StoreGate {
    dir: PathBuf,
    capacity: usize,
}

impl StoreGate {
    /// Open (or create) the gate.
    ///
    /// `dir: None` uses the well-known system-wide location. The requested
    /// capacity only applies when this call creates the gate; an existing
    /// gate's capacity wins.
    pub fn open(dir: Option<PathBuf>, requested_capacity: usize) -> Result<StoreGate> {
        let dir = dir.unwrap_or_else(|| std::env::temp_dir().join(GATE_NAME));
        std::fs::create_dir_all(&dir)?;

        let capacity_path = dir.join("capacity");
        let capacity = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&capacity_path)
        {
            Ok(mut file) => {
                file.write_all(requested_capacity.to_string().as_bytes())?;
                file.sync_all()?;
                info!(
                    target: "tessera::gate",
                    path = %dir.display(),
                    capacity = requested_capacity,
                    "created store gate"
                );
                requested_capacity
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Self::read_capacity(&capacity_path).unwrap_or_else(|| {
                    warn!(
                        target: "tessera::gate",
                        path = %capacity_path.display(),
                        "unreadable gate capacity file, assuming the default"
                    );
                    DEFAULT_GATE_CAPACITY
                })
            }
            Err(e) => return Err(Error::Io(e)),
        };

        Ok(StoreGate { dir, capacity })
    }

    fn read_capacity(path: &Path) -> Option<usize> {
        let mut contents = String::new();
        File::open(path).ok()?.read_to_string(&mut contents).ok()?;
        contents.trim().parse().ok().filter(|c| *c > 0)
    }

    /// Number of slots this gate hands out
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Acquire one slot, polling until `timeout`.
    ///
    /// Fails with [`Error::CapacityExhausted`] when every slot stays locked
    /// for the whole wait.
    pub fn acquire(&self, timeout: Duration) -> Result<GatePermit> {
        let start = Instant::now();
        loop {
            for slot in 0..self.capacity {
                let path = self.dir.join(format!("slot-{slot}.lock"));
                let file = OpenOptions::new().create(true).write(true).open(&path)?;
                if file.try_lock_exclusive().is_ok() {
                    debug!(target: "tessera::gate", slot, "store slot acquired");
                    return Ok(GatePermit { _file: file, slot });
                }
            }
            if start.elapsed() >= timeout {
                return Err(Error::CapacityExhausted {
                    waited: start.elapsed(),
                });
            }
            std::thread::sleep(RETRY_INTERVAL);
        }
    }
}

/// One held store slot; dropping it releases the lock
pub struct GatePermit {
    _file: File,
    slot: usize,
}

impl GatePermit {
    /// Which slot this permit holds
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        debug!(target: "tessera::gate", slot = self.slot, "store slot released");
        // Dropping the file handle releases the exclusive lock
    }
}
