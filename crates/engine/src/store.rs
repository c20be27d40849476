//! The quad store orchestrator
//!
//! A [`QuadStore`] owns the atom store, the four quad indexes, and the WAL,
//! all behind one reader/writer lock. Writers intern terms, log a
//! `Begin … Commit` span, and mutate every index under the write guard;
//! readers scan one index under the read guard. A hybrid policy checkpoints
//! after commits when the WAL grows too large or too old.
//!
//! Recovery runs at open: committed WAL spans past the checkpoint watermark
//! are replayed into the indexes (idempotent: atom ids are byte offsets and
//! duplicate index inserts are no-ops). Mid-log damage degrades the store to
//! read-only instead of failing the open.

use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use tessera_core::{AtomId, CancelToken, Error, Quad, QuadPattern, Result, Timestamp, Version};
use tessera_durability::{CheckpointPolicy, RecordType, WalReader, WalRecord, WalWriter, RECORD_LEN};
use tessera_storage::{AtomStore, EntryMeta, IndexKind, QuadIndex, BUFFER_POOL, PAGE_CACHE};
use tracing::{debug, info, warn};

use crate::config::{DurabilityMode, StoreConfig};
use crate::query::{Pattern, QueryIter, TemporalScope};
use crate::stats::StoreStatistics;

/// A buffered mutation awaiting batch commit
struct PendingOp {
    quad: Quad,
    version: Version,
    tombstone: bool,
}

/// An open batch session: mutations buffered in memory, nothing durable,
/// nothing visible
struct PendingBatch {
    ops: Vec<PendingOp>,
}

/// Everything the store lock protects
pub(crate) struct StoreInner {
    pub(crate) atoms: AtomStore,
    indexes: [QuadIndex; 4],
    wal: WalWriter,
    policy: CheckpointPolicy,
    config: StoreConfig,
    batch: Option<PendingBatch>,
    read_only: Option<String>,
    /// Atom-data watermark known durable; commits fsync the data file first
    /// when interning moved past it
    atoms_synced_len: u64,
}

impl StoreInner {
    /// The index instance for `kind`
    pub(crate) fn index(&self, kind: IndexKind) -> &QuadIndex {
        &self.indexes[kind.discriminant() as usize]
    }

    fn ensure_writable(&self) -> Result<()> {
        match &self.read_only {
            Some(reason) => Err(Error::ReadOnly(reason.clone())),
            None => Ok(()),
        }
    }

    /// Insert one entry into all four indexes.
    ///
    /// A tombstone whose key collides with an existing live entry (same quad
    /// and temporal coordinates, possible when a delete lands in the same
    /// millisecond as the insert) degrades to marking that entry deleted.
    fn apply_entry(&mut self, quad: &Quad, version: &Version, tombstone: bool) -> Result<()> {
        let meta = if tombstone {
            EntryMeta::TOMBSTONE
        } else {
            EntryMeta::LIVE
        };
        for index in self.indexes.iter_mut() {
            let key = index.codec().encode(quad, version);
            let inserted = index.insert(&key, meta)?;
            if !inserted && tombstone {
                index.mark_deleted(&key)?;
            }
        }
        Ok(())
    }

    /// fsync the atom data file if any commit-pending intern extended it.
    ///
    /// A WAL record refers to terms by byte offset, so the bytes must be
    /// durable before the commit record is.
    fn sync_new_atoms(&mut self) -> Result<()> {
        let len = self.atoms.data_len();
        if len > self.atoms_synced_len {
            self.atoms.sync_data()?;
            self.atoms_synced_len = len;
        }
        Ok(())
    }

    /// Log and apply one single-mutation transaction
    fn commit_single(&mut self, quad: Quad, version: Version, tombstone: bool) -> Result<()> {
        self.sync_new_atoms()?;
        let tx_id = self.wal.begin_tx();
        let record = if tombstone {
            WalRecord::delete(tx_id, quad, version)
        } else {
            WalRecord::insert(tx_id, quad, version)
        };
        let sync = self.config.durability == DurabilityMode::Strict;
        self.wal.append_transaction(tx_id, &[record], sync)?;
        self.apply_entry(&quad, &version, tombstone)?;
        self.maybe_checkpoint()
    }

    /// Log one multi-mutation `Begin … Commit` span.
    ///
    /// The span is assembled in a pooled scratch buffer and landed with a
    /// single write before the one fsync that makes the batch durable.
    fn log_span(&mut self, tx_id: u64, records: &[WalRecord]) -> Result<()> {
        self.sync_new_atoms()?;
        let mut buf = BUFFER_POOL.acquire((records.len() + 2) * RECORD_LEN);
        buf.extend_from_slice(&WalRecord::begin(tx_id).to_bytes());
        for record in records {
            buf.extend_from_slice(&record.to_bytes());
        }
        buf.extend_from_slice(&WalRecord::commit(tx_id).to_bytes());
        self.wal.append_bytes(&buf)?;
        self.wal.sync()
    }

    fn maybe_checkpoint(&mut self) -> Result<()> {
        if self.policy.due(self.wal.len()) {
            self.run_checkpoint()?;
        }
        Ok(())
    }

    /// Flush and fsync every index and the atom store, then write the
    /// checkpoint watermark and truncate the WAL.
    fn run_checkpoint(&mut self) -> Result<()> {
        for index in &self.indexes {
            index.flush()?;
        }
        self.atoms.flush()?;
        self.atoms_synced_len = self.atoms.data_len();
        let watermark = self.wal.last_tx_id();
        self.wal.checkpoint(watermark)?;
        self.policy.mark_checkpointed();
        Ok(())
    }

    fn intern_quad(
        &self,
        graph: Option<&str>,
        subject: &str,
        predicate: &str,
        object: &str,
    ) -> Result<Quad> {
        let graph = match graph {
            None | Some("") => AtomId::DEFAULT_GRAPH,
            Some(term) => self.atoms.intern(term)?,
        };
        Ok(Quad {
            graph,
            subject: self.atoms.intern(subject)?,
            predicate: self.atoms.intern(predicate)?,
            object: self.atoms.intern(object)?,
        })
    }

    /// Resolve a pattern of term strings to atom ids.
    ///
    /// `None` when a bound term was never interned, so no quad can match.
    fn resolve_pattern(&self, pattern: &Pattern<'_>) -> Result<Option<QuadPattern>> {
        let mut resolved = QuadPattern::ANY;
        for (term, slot) in [
            (pattern.graph, &mut resolved.graph),
            (pattern.subject, &mut resolved.subject),
            (pattern.predicate, &mut resolved.predicate),
            (pattern.object, &mut resolved.object),
        ] {
            if let Some(term) = term {
                match self.atoms.lookup(term)? {
                    Some(id) => *slot = Some(id),
                    None => return Ok(None),
                }
            }
        }
        Ok(Some(resolved))
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        // Best-effort flush; a crash-consistent WAL makes failures safe
        for index in &self.indexes {
            let _ = index.flush();
            index.invalidate_cache();
        }
        let _ = self.atoms.flush();
        let _ = self.wal.sync();
    }
}

/// A persistent, embeddable temporal quad store
pub struct QuadStore {
    dir: PathBuf,
    inner: RwLock<StoreInner>,
}

impl std::fmt::Debug for QuadStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuadStore").field("dir", &self.dir).finish()
    }
}

impl QuadStore {
    /// Open the store in `dir`, creating files as needed and replaying the
    /// WAL.
    ///
    /// Mid-log WAL damage does not fail the open: the committed prefix is
    /// replayed and the store comes up read-only, surfacing
    /// [`Error::ReadOnly`] on every write.
    pub fn open(dir: impl AsRef<Path>, config: StoreConfig) -> Result<QuadStore> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let atoms = AtomStore::open(&dir)?;
        let indexes = [
            QuadIndex::open(&dir, IndexKind::Gspo)?,
            QuadIndex::open(&dir, IndexKind::Gpos)?,
            QuadIndex::open(&dir, IndexKind::Gosp)?,
            QuadIndex::open(&dir, IndexKind::Tgspo)?,
        ];

        let outcome = WalReader::scan(&dir)?;
        if outcome.truncated_tail && outcome.corruption_at.is_none() {
            // Cut the damaged tail off so later appends stay record-aligned
            let wal_path = dir.join(tessera_durability::WAL_FILE);
            let file = std::fs::OpenOptions::new().write(true).open(&wal_path)?;
            file.set_len(outcome.valid_len)?;
            file.sync_all()?;
            warn!(
                target: "tessera::recovery",
                path = %wal_path.display(),
                valid_len = outcome.valid_len,
                "truncated damaged WAL tail"
            );
        }
        let read_only = outcome.corruption_at.map(|offset| {
            warn!(
                target: "tessera::store",
                path = %dir.display(),
                offset,
                "WAL damaged mid-log; store opens read-only"
            );
            format!("WAL damaged at byte offset {offset}")
        });
        let wal = WalWriter::open(&dir, outcome.max_tx_id + 1, outcome.checkpoint_watermark)?;

        let atoms_synced_len = atoms.data_len();
        let mut inner = StoreInner {
            atoms,
            indexes,
            wal,
            policy: CheckpointPolicy::new(config.max_wal_bytes, config.checkpoint_interval),
            config,
            batch: None,
            read_only,
            atoms_synced_len,
        };

        let mut replayed = 0usize;
        for record in outcome.replay_records() {
            let tombstone = record.record_type == RecordType::Delete;
            inner.apply_entry(&record.quad, &record.version, tombstone)?;
            replayed += 1;
        }
        if replayed > 0 {
            info!(
                target: "tessera::recovery",
                path = %dir.display(),
                replayed,
                "replayed committed WAL records"
            );
        }

        debug!(target: "tessera::store", path = %dir.display(), "store open");
        Ok(QuadStore {
            dir,
            inner: RwLock::new(inner),
        })
    }

    /// Open with production defaults
    pub fn open_default(dir: impl AsRef<Path>) -> Result<QuadStore> {
        QuadStore::open(dir, StoreConfig::new())
    }

    /// The store's directory
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Whether recovery degraded this store to read-only
    pub fn is_read_only(&self) -> bool {
        self.inner.read().read_only.is_some()
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Insert a quad that is current as of now.
    ///
    /// `graph: None` (or the empty string) targets the default graph. Terms
    /// must be in canonical lexical form; the store does not re-canonicalize.
    pub fn add_current(
        &self,
        graph: Option<&str>,
        subject: &str,
        predicate: &str,
        object: &str,
    ) -> Result<()> {
        let now = Timestamp::now();
        self.add_versioned(graph, subject, predicate, object, now, Timestamp::FOREVER)
    }

    /// Insert a quad with an explicit validity interval `[from, to)`
    pub fn add_versioned(
        &self,
        graph: Option<&str>,
        subject: &str,
        predicate: &str,
        object: &str,
        valid_from: Timestamp,
        valid_to: Timestamp,
    ) -> Result<()> {
        if valid_from >= valid_to {
            return Err(Error::InvalidArgument(format!(
                "empty validity interval [{valid_from}, {valid_to})"
            )));
        }
        let mut inner = self.inner.write();
        inner.ensure_writable()?;
        let quad = inner.intern_quad(graph, subject, predicate, object)?;
        let version = Version {
            valid_from,
            valid_to,
            tx_time: Timestamp::now(),
        };
        inner.commit_single(quad, version, false)
    }

    /// Record the logical deletion of a quad: a tombstone entry with
    /// `tx_time = now`. The quad's history stays in place until pruning.
    pub fn delete_current(
        &self,
        graph: Option<&str>,
        subject: &str,
        predicate: &str,
        object: &str,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        inner.ensure_writable()?;
        let quad = inner.intern_quad(graph, subject, predicate, object)?;
        let version = Version::current(Timestamp::now());
        inner.commit_single(quad, version, true)
    }

    // ------------------------------------------------------------------
    // Batched write sessions
    // ------------------------------------------------------------------

    /// Open a batch session. Mutations buffer in memory: nothing is logged,
    /// applied, or visible until [`QuadStore::commit_batch`].
    pub fn begin_batch(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.ensure_writable()?;
        if inner.batch.is_some() {
            return Err(Error::Conflict("a batch session is already open".into()));
        }
        inner.batch = Some(PendingBatch { ops: Vec::new() });
        Ok(())
    }

    /// Buffer a current-quad insertion into the open batch
    pub fn add_batched(
        &self,
        graph: Option<&str>,
        subject: &str,
        predicate: &str,
        object: &str,
    ) -> Result<()> {
        let now = Timestamp::now();
        self.push_batched(graph, subject, predicate, object, Version::current(now), false)
    }

    /// Buffer an explicit-interval insertion into the open batch
    pub fn add_versioned_batched(
        &self,
        graph: Option<&str>,
        subject: &str,
        predicate: &str,
        object: &str,
        valid_from: Timestamp,
        valid_to: Timestamp,
    ) -> Result<()> {
        if valid_from >= valid_to {
            return Err(Error::InvalidArgument(format!(
                "empty validity interval [{valid_from}, {valid_to})"
            )));
        }
        let version = Version {
            valid_from,
            valid_to,
            tx_time: Timestamp::now(),
        };
        self.push_batched(graph, subject, predicate, object, version, false)
    }

    /// Buffer a logical deletion into the open batch
    pub fn delete_batched(
        &self,
        graph: Option<&str>,
        subject: &str,
        predicate: &str,
        object: &str,
    ) -> Result<()> {
        let version = Version::current(Timestamp::now());
        self.push_batched(graph, subject, predicate, object, version, true)
    }

    fn push_batched(
        &self,
        graph: Option<&str>,
        subject: &str,
        predicate: &str,
        object: &str,
        version: Version,
        tombstone: bool,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        inner.ensure_writable()?;
        // Interning eagerly is safe: an atom orphaned by rollback is
        // unreferenced but harmless.
        let quad = inner.intern_quad(graph, subject, predicate, object)?;
        match inner.batch.as_mut() {
            Some(batch) => {
                batch.ops.push(PendingOp {
                    quad,
                    version,
                    tombstone,
                });
                Ok(())
            }
            None => Err(Error::InvalidArgument("no open batch session".into())),
        }
    }

    /// Commit the open batch: one WAL span, one fsync, then all index
    /// mutations under the write guard, so readers see the batch atomically.
    /// Returns the number of mutations committed.
    pub fn commit_batch(&self) -> Result<usize> {
        let mut inner = self.inner.write();
        inner.ensure_writable()?;
        let batch = inner
            .batch
            .take()
            .ok_or_else(|| Error::InvalidArgument("no open batch session".into()))?;
        if batch.ops.is_empty() {
            return Ok(0);
        }

        let tx_id = inner.wal.begin_tx();
        let records: Vec<WalRecord> = batch
            .ops
            .iter()
            .map(|op| {
                if op.tombstone {
                    WalRecord::delete(tx_id, op.quad, op.version)
                } else {
                    WalRecord::insert(tx_id, op.quad, op.version)
                }
            })
            .collect();
        inner.log_span(tx_id, &records)?;

        for op in &batch.ops {
            inner.apply_entry(&op.quad, &op.version, op.tombstone)?;
        }
        debug!(
            target: "tessera::store",
            tx_id,
            mutations = batch.ops.len(),
            "batch committed"
        );
        inner.maybe_checkpoint()?;
        Ok(batch.ops.len())
    }

    /// Discard the open batch. Nothing durable was written, so rollback
    /// cannot fail; returns the number of mutations discarded (0 when no
    /// batch was open).
    pub fn rollback_batch(&self) -> usize {
        let mut inner = self.inner.write();
        let discarded = inner.batch.take().map(|b| b.ops.len()).unwrap_or(0);
        if discarded > 0 {
            debug!(target: "tessera::store", discarded, "batch rolled back");
        }
        discarded
    }

    /// Ingest pre-resolved entries (the prune transfer's write path): one
    /// committed span per call.
    pub(crate) fn ingest_batch(&self, entries: &[crate::prune::TransferEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.write();
        inner.ensure_writable()?;

        let mut ops = Vec::with_capacity(entries.len());
        for entry in entries {
            let quad = inner.intern_quad(
                entry.graph.as_deref(),
                &entry.subject,
                &entry.predicate,
                &entry.object,
            )?;
            ops.push(PendingOp {
                quad,
                version: entry.version,
                tombstone: entry.tombstone,
            });
        }

        let tx_id = inner.wal.begin_tx();
        let records: Vec<WalRecord> = ops
            .iter()
            .map(|op| {
                if op.tombstone {
                    WalRecord::delete(tx_id, op.quad, op.version)
                } else {
                    WalRecord::insert(tx_id, op.quad, op.version)
                }
            })
            .collect();
        inner.log_span(tx_id, &records)?;
        for op in &ops {
            inner.apply_entry(&op.quad, &op.version, op.tombstone)?;
        }
        inner.maybe_checkpoint()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Run a query under the read lock.
    ///
    /// The returned iterator holds the read guard; drop it to release the
    /// lock. `cancel`, when given, stops the scan at the next leaf-page
    /// transition after it fires.
    pub fn query(
        &self,
        pattern: Pattern<'_>,
        scope: TemporalScope,
        cancel: Option<CancelToken>,
    ) -> Result<QueryIter<'_>> {
        if let TemporalScope::During(lo, hi) = scope {
            if lo > hi {
                return Err(Error::InvalidArgument(format!(
                    "empty query range [{lo}, {hi}]"
                )));
            }
        }
        let guard = self.inner.read();
        match guard.resolve_pattern(&pattern)? {
            Some(resolved) => QueryIter::new(guard, resolved, scope, cancel),
            None => Ok(QueryIter::empty(guard)),
        }
    }

    /// Like [`QuadStore::query`] but fails with [`Error::LockContention`]
    /// instead of blocking when the write lock is held.
    pub fn try_query(
        &self,
        pattern: Pattern<'_>,
        scope: TemporalScope,
        cancel: Option<CancelToken>,
    ) -> Result<QueryIter<'_>> {
        let guard = self.inner.try_read().ok_or(Error::LockContention)?;
        match guard.resolve_pattern(&pattern)? {
            Some(resolved) => QueryIter::new(guard, resolved, scope, cancel),
            None => Ok(QueryIter::empty(guard)),
        }
    }

    /// Quads current right now (open validity interval, not deleted)
    pub fn query_current(&self, pattern: Pattern<'_>) -> Result<QueryIter<'_>> {
        self.query(pattern, TemporalScope::Current, None)
    }

    /// Entries whose validity interval contains `instant`
    pub fn query_as_of(&self, pattern: Pattern<'_>, instant: Timestamp) -> Result<QueryIter<'_>> {
        self.query(pattern, TemporalScope::AsOf(instant), None)
    }

    /// Entries whose validity interval intersects `[lo, hi]`
    pub fn query_during(
        &self,
        pattern: Pattern<'_>,
        lo: Timestamp,
        hi: Timestamp,
    ) -> Result<QueryIter<'_>> {
        self.query(pattern, TemporalScope::During(lo, hi), None)
    }

    /// Entries recorded in the transaction-time window `[lo, hi]`,
    /// tombstones included.
    ///
    /// With an unbound pattern this scans the TGSPO index bounded by the
    /// window, yielding the audit trail in commit order.
    pub fn query_tx_range(
        &self,
        pattern: Pattern<'_>,
        lo: Timestamp,
        hi: Timestamp,
    ) -> Result<QueryIter<'_>> {
        if lo > hi {
            return Err(Error::InvalidArgument(format!(
                "empty transaction-time range [{lo}, {hi}]"
            )));
        }
        self.query(pattern, TemporalScope::TxRange(lo, hi), None)
    }

    /// Every version of every matching quad, tombstones included
    pub fn query_all_versions(&self, pattern: Pattern<'_>) -> Result<QueryIter<'_>> {
        self.query(pattern, TemporalScope::AllVersions, None)
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Force a checkpoint: flush + fsync all indexes and the atom store,
    /// write the watermark, truncate the WAL.
    pub fn checkpoint(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.ensure_writable()?;
        inner.run_checkpoint()
    }

    /// Snapshot of the store's counters
    pub fn statistics(&self) -> Result<StoreStatistics> {
        let inner = self.inner.read();
        let gspo = inner.index(IndexKind::Gspo);
        let entries = gspo.entry_count()?;
        let tombstones = gspo.tombstone_count()?;

        let mut total_bytes = inner.atoms.data_len() + inner.wal.len();
        for kind in IndexKind::ALL {
            total_bytes += inner.index(kind).len_bytes();
        }

        Ok(StoreStatistics {
            quad_count: entries - tombstones,
            version_count: entries,
            atom_count: inner.atoms.atom_count(),
            total_bytes,
            wal_tx_id: inner.wal.last_tx_id(),
            wal_checkpoint_tx_id: inner.wal.checkpoint_watermark(),
            wal_bytes: inner.wal.len(),
            cache: PAGE_CACHE.stats(),
        })
    }

    /// Intern a canonical term string, returning its stable atom id.
    ///
    /// Outer layers (query planners, format parsers) intern ahead of time
    /// and work in id space.
    pub fn intern_term(&self, term: &str) -> Result<AtomId> {
        let inner = self.inner.write();
        inner.ensure_writable()?;
        inner.atoms.intern(term)
    }

    /// Resolve an atom id to its term string (id 0 is the default graph)
    pub fn resolve_atom(&self, id: AtomId) -> Result<String> {
        self.inner.read().atoms.resolve(id)
    }

    pub(crate) fn read_inner(&self) -> parking_lot::RwLockReadGuard<'_, StoreInner> {
        self.inner.read()
    }

    #[cfg(test)]
    fn write_inner(&self) -> parking_lot::RwLockWriteGuard<'_, StoreInner> {
        self.inner.write()
    }
}
