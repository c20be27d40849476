//! WAL writer
//!
//! Appends fixed-size records to `wal.log` and owns the checkpoint rewrite.
//! The engine's write lock serializes callers; the writer itself keeps no
//! lock. fsync policy belongs to the caller: single-record commits sync per
//! commit, batched sessions sync once at batch commit.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tessera_core::Result;
use tracing::{debug, info};

use crate::record::{RecordType, WalRecord, RECORD_LEN};

/// File name of the write-ahead log
pub const WAL_FILE: &str = "wal.log";

/// Appender over the write-ahead log
pub struct WalWriter {
    file: File,
    path: PathBuf,
    len: u64,
    next_tx_id: u64,
    checkpoint_watermark: u64,
}

impl WalWriter {
    /// Open the log for appending.
    ///
    /// `next_tx_id` and `checkpoint_watermark` come from the recovery scan;
    /// a fresh store passes `1` and `0`.
    pub fn open(store_dir: &Path, next_tx_id: u64, checkpoint_watermark: u64) -> Result<Self> {
        let path = store_dir.join(WAL_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        let len = file.metadata()?.len();

        Ok(WalWriter {
            file,
            path,
            len,
            next_tx_id,
            checkpoint_watermark,
        })
    }

    /// Allocate the next transaction id
    pub fn begin_tx(&mut self) -> u64 {
        let tx_id = self.next_tx_id;
        self.next_tx_id += 1;
        tx_id
    }

    /// Highest transaction id handed out so far
    pub fn last_tx_id(&self) -> u64 {
        self.next_tx_id.saturating_sub(1)
    }

    /// Watermark of the last checkpoint
    pub fn checkpoint_watermark(&self) -> u64 {
        self.checkpoint_watermark
    }

    /// Current log length in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the log holds no records
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append one record without syncing
    pub fn append(&mut self, record: &WalRecord) -> Result<()> {
        self.file.write_all(&record.to_bytes())?;
        self.len += RECORD_LEN as u64;
        Ok(())
    }

    /// Append pre-assembled records in one write.
    ///
    /// Batch commits serialize their whole `Begin … Commit` span into a
    /// scratch buffer and land it with a single syscall; `bytes` must be a
    /// whole number of records.
    pub fn append_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        debug_assert_eq!(bytes.len() % RECORD_LEN, 0);
        self.file.write_all(bytes)?;
        self.len += bytes.len() as u64;
        Ok(())
    }

    /// fsync the log (the commit durability point)
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Write the checkpoint record for `watermark` and drop every record at
    /// or before it.
    ///
    /// The record is appended and synced first, so a crash during the
    /// rewrite still recovers the watermark from either the old or the new
    /// file. The rewrite goes through a temp file and `rename`.
    pub fn checkpoint(&mut self, watermark: u64) -> Result<()> {
        self.append(&WalRecord::checkpoint(watermark))?;
        self.sync()?;

        // Records after the watermark survive the rewrite; under the store's
        // write lock that set is normally empty.
        let bytes = std::fs::read(&self.path)?;
        let mut kept = Vec::with_capacity(RECORD_LEN);
        kept.extend_from_slice(&WalRecord::checkpoint(watermark).to_bytes());
        for chunk in bytes.chunks_exact(RECORD_LEN) {
            let raw: &[u8; RECORD_LEN] = chunk.try_into().expect("exact chunks");
            if let Ok(record) = WalRecord::from_bytes(raw) {
                if record.record_type != RecordType::Checkpoint && record.tx_id > watermark {
                    kept.extend_from_slice(chunk);
                }
            }
        }

        let tmp = self.path.with_extension("log.tmp");
        {
            let mut tmp_file = File::create(&tmp)?;
            tmp_file.write_all(&kept)?;
            tmp_file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;

        // Reopen the handle onto the renamed file
        self.file = OpenOptions::new().append(true).read(true).open(&self.path)?;
        self.len = kept.len() as u64;
        self.checkpoint_watermark = watermark;

        info!(
            target: "tessera::checkpoint",
            watermark,
            wal_bytes = self.len,
            "WAL truncated at checkpoint"
        );
        Ok(())
    }

    /// Append a whole committed transaction (`Begin`, mutations, `Commit`),
    /// syncing once when `sync` is set; batched sessions and relaxed
    /// durability defer the fsync.
    pub fn append_transaction(
        &mut self,
        tx_id: u64,
        mutations: &[WalRecord],
        sync: bool,
    ) -> Result<()> {
        self.append(&WalRecord::begin(tx_id))?;
        for record in mutations {
            debug_assert_eq!(record.tx_id, tx_id);
            self.append(record)?;
        }
        self.append(&WalRecord::commit(tx_id))?;
        if sync {
            self.sync()?;
        }
        debug!(
            target: "tessera::wal",
            tx_id,
            mutations = mutations.len(),
            "transaction committed"
        );
        Ok(())
    }
}
