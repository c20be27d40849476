//! Offline prune transfer
//!
//! Physical space is never reclaimed in place; deletion only writes
//! tombstones. Reclamation streams the live entries of a source store into
//! an empty sibling, filtered by graph/predicate and one of three
//! history-retention modes, after which the pool switches its active pointer
//! to the sibling.
//!
//! The scan walks the source's TGSPO index, so entries arrive in
//! transaction-time order and "latest version" bookkeeping is a single
//! forward pass.

use std::collections::{BTreeSet, HashMap};
use tessera_core::{Error, Quad, Result, Version};
use tessera_storage::IndexKind;
use tracing::{debug, info};

use crate::store::QuadStore;

/// How much history the transfer carries over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMode {
    /// Only the latest non-tombstoned version of each quad
    FlattenToCurrent,
    /// Every non-tombstoned version
    PreserveVersions,
    /// Every entry, tombstones included
    PreserveAll,
}

/// Include/exclude filter over term strings
///
/// An empty filter admits everything. With an include set, only its terms
/// pass; the exclude set always wins over include.
#[derive(Debug, Clone, Default)]
pub struct TermFilter {
    include: Option<BTreeSet<String>>,
    exclude: BTreeSet<String>,
}

impl TermFilter {
    /// Admit only the given terms
    pub fn include<I: IntoIterator<Item = S>, S: Into<String>>(terms: I) -> Self {
        TermFilter {
            include: Some(terms.into_iter().map(Into::into).collect()),
            exclude: BTreeSet::new(),
        }
    }

    /// Admit everything except the given terms
    pub fn exclude<I: IntoIterator<Item = S>, S: Into<String>>(terms: I) -> Self {
        TermFilter {
            include: None,
            exclude: terms.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `term` passes the filter
    pub fn allows(&self, term: &str) -> bool {
        if self.exclude.contains(term) {
            return false;
        }
        match &self.include {
            Some(include) => include.contains(term),
            None => true,
        }
    }
}

/// Transfer options
#[derive(Debug, Clone)]
pub struct PruneOptions {
    /// Filter on the graph term (the default graph is the empty string)
    pub graphs: TermFilter,
    /// Filter on the predicate term
    pub predicates: TermFilter,
    /// History-retention mode
    pub history: HistoryMode,
    /// Count and report without writing to the target
    pub dry_run: bool,
}

impl PruneOptions {
    /// Flatten to current, no filters, writing enabled
    pub fn flatten() -> Self {
        PruneOptions {
            graphs: TermFilter::default(),
            predicates: TermFilter::default(),
            history: HistoryMode::FlattenToCurrent,
            dry_run: false,
        }
    }

    /// The given history mode, no filters, writing enabled
    pub fn with_history(history: HistoryMode) -> Self {
        PruneOptions {
            graphs: TermFilter::default(),
            predicates: TermFilter::default(),
            history,
            dry_run: false,
        }
    }
}

/// What one transfer did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    /// Source entries scanned
    pub scanned: u64,
    /// Entries written to (or, on a dry run, destined for) the target
    pub written: u64,
    /// Disk bytes reclaimed (estimated on a dry run)
    pub bytes_saved: u64,
}

/// One source entry resolved to term strings, ready for re-interning in the
/// target store
pub(crate) struct TransferEntry {
    pub(crate) graph: Option<String>,
    pub(crate) subject: String,
    pub(crate) predicate: String,
    pub(crate) object: String,
    pub(crate) version: Version,
    pub(crate) tombstone: bool,
}

/// Entries written to the target per committed span
const TRANSFER_CHUNK: usize = 10_000;

/// Approximate on-disk footprint of one entry across the four indexes
const ENTRY_FOOTPRINT: u64 = 4 * 72;

/// A streaming copy from one store to an empty sibling
pub struct PruneTransfer<'a> {
    source: &'a QuadStore,
    target: &'a QuadStore,
    options: PruneOptions,
}

impl<'a> PruneTransfer<'a> {
    /// Set up a transfer. The target is checked for emptiness at
    /// [`PruneTransfer::run`].
    pub fn new(source: &'a QuadStore, target: &'a QuadStore, options: PruneOptions) -> Self {
        PruneTransfer {
            source,
            target,
            options,
        }
    }

    /// Run the transfer.
    ///
    /// Fails with [`Error::Conflict`] when source and target are the same
    /// store or the target is not empty.
    pub fn run(&self) -> Result<PruneReport> {
        if std::ptr::eq(self.source, self.target) {
            return Err(Error::Conflict(
                "prune source and target are the same store".into(),
            ));
        }
        let target_stats = self.target.statistics()?;
        if target_stats.version_count != 0 || target_stats.atom_count != 0 {
            return Err(Error::Conflict("prune target is not empty".into()));
        }

        let source_bytes = self.source.statistics()?.total_bytes;
        let mut scanned = 0u64;
        let mut written = 0u64;
        let mut chunk: Vec<TransferEntry> = Vec::new();
        // FlattenToCurrent: latest open-interval entry per quad, in source
        // atom space
        let mut latest: HashMap<Quad, TransferEntry> = HashMap::new();

        {
            let guard = self.source.read_inner();
            let index = guard.index(IndexKind::Tgspo);
            let codec = index.codec();
            let mut cursor = index.scan_start([0x00; 56], [0xFF; 56])?;

            while let Some((key, meta)) = index.scan_step(&mut cursor, None)? {
                scanned += 1;
                let (quad, version) = codec.decode(&key);
                let tombstone = meta.is_tombstone();

                let graph = if quad.graph.is_default_graph() {
                    None
                } else {
                    Some(guard.atoms.resolve(quad.graph)?)
                };
                let predicate = guard.atoms.resolve(quad.predicate)?;

                if !self.options.graphs.allows(graph.as_deref().unwrap_or(""))
                    || !self.options.predicates.allows(&predicate)
                {
                    continue;
                }

                let entry = TransferEntry {
                    graph,
                    subject: guard.atoms.resolve(quad.subject)?,
                    predicate,
                    object: guard.atoms.resolve(quad.object)?,
                    version,
                    tombstone,
                };

                match self.options.history {
                    HistoryMode::PreserveAll => {
                        written += 1;
                        self.emit(&mut chunk, entry)?;
                    }
                    HistoryMode::PreserveVersions => {
                        if !tombstone {
                            written += 1;
                            self.emit(&mut chunk, entry)?;
                        }
                    }
                    HistoryMode::FlattenToCurrent => {
                        // tx-time order makes "keep the newest" a plain
                        // overwrite; closed intervals can never be current
                        if version.valid_to.is_forever() {
                            latest.insert(quad, entry);
                        }
                    }
                }
            }

            if self.options.history == HistoryMode::FlattenToCurrent {
                for (_, entry) in latest {
                    if !entry.tombstone {
                        written += 1;
                        self.emit(&mut chunk, entry)?;
                    }
                }
            }
        }

        if !self.options.dry_run {
            self.target.ingest_batch(&chunk)?;
            self.target.checkpoint()?;
        }

        let bytes_saved = if self.options.dry_run {
            scanned.saturating_sub(written) * ENTRY_FOOTPRINT
        } else {
            source_bytes.saturating_sub(self.target.statistics()?.total_bytes)
        };

        info!(
            target: "tessera::prune",
            scanned,
            written,
            bytes_saved,
            dry_run = self.options.dry_run,
            "prune transfer complete"
        );
        Ok(PruneReport {
            scanned,
            written,
            bytes_saved,
        })
    }

    /// Queue an entry, flushing a full chunk into the target as one
    /// committed span.
    fn emit(&self, chunk: &mut Vec<TransferEntry>, entry: TransferEntry) -> Result<()> {
        if self.options.dry_run {
            return Ok(());
        }
        chunk.push(entry);
        if chunk.len() >= TRANSFER_CHUNK {
            debug!(target: "tessera::prune", entries = chunk.len(), "flushing transfer chunk");
            self.target.ingest_batch(chunk)?;
            chunk.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::query::Pattern;
    use tempfile::tempdir;

    fn open_pair(root: &std::path::Path) -> (QuadStore, QuadStore) {
        (
            QuadStore::open(root.join("source"), StoreConfig::for_testing()).unwrap(),
            QuadStore::open(root.join("target"), StoreConfig::for_testing()).unwrap(),
        )
    }

    fn current_objects(store: &QuadStore) -> Vec<String> {
        let mut objects: Vec<String> = store
            .query_current(Pattern::ANY)
            .unwrap()
            .map(|r| r.unwrap().object)
            .collect();
        objects.sort();
        objects
    }

    #[test]
    fn test_term_filter_semantics() {
        let none = TermFilter::default();
        assert!(none.allows("<anything>"));

        let include = TermFilter::include(["<a>", "<b>"]);
        assert!(include.allows("<a>"));
        assert!(!include.allows("<c>"));

        let exclude = TermFilter::exclude(["<tmp>"]);
        assert!(!exclude.allows("<tmp>"));
        assert!(exclude.allows("<keep>"));
    }

    #[test]
    fn test_non_empty_target_conflicts() {
        let dir = tempdir().unwrap();
        let (source, target) = open_pair(dir.path());
        target.add_current(None, "<s>", "<p>", "\"x\"").unwrap();

        let err = PruneTransfer::new(&source, &target, PruneOptions::flatten())
            .run()
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_same_store_conflicts() {
        let dir = tempdir().unwrap();
        let (source, _) = open_pair(dir.path());
        let err = PruneTransfer::new(&source, &source, PruneOptions::flatten())
            .run()
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_flatten_preserves_current_set() {
        let dir = tempdir().unwrap();
        let (source, target) = open_pair(dir.path());

        source.add_current(None, "<a>", "<p>", "\"keep\"").unwrap();
        source.add_current(None, "<b>", "<p>", "\"gone\"").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        source.delete_current(None, "<b>", "<p>", "\"gone\"").unwrap();

        let report = PruneTransfer::new(&source, &target, PruneOptions::flatten())
            .run()
            .unwrap();

        // insert + insert + tombstone
        assert_eq!(report.scanned, 3);
        assert_eq!(report.written, 1);
        assert_eq!(current_objects(&target), current_objects(&source));
        // The deleted quad's history did not carry over
        assert_eq!(
            target.query_all_versions(Pattern::ANY).unwrap().count(),
            1
        );
    }

    #[test]
    fn test_preserve_versions_drops_tombstones_only() {
        let dir = tempdir().unwrap();
        let (source, target) = open_pair(dir.path());

        source.add_current(None, "<a>", "<p>", "\"1\"").unwrap();
        source.add_current(None, "<a>", "<p>", "\"2\"").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        source.delete_current(None, "<a>", "<p>", "\"1\"").unwrap();

        let report = PruneTransfer::new(
            &source,
            &target,
            PruneOptions::with_history(HistoryMode::PreserveVersions),
        )
        .run()
        .unwrap();

        assert_eq!(report.scanned, 3);
        assert_eq!(report.written, 2);
        let versions: Vec<_> = target
            .query_all_versions(Pattern::ANY)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(versions.len(), 2);
        assert!(versions.iter().all(|v| !v.tombstone));
    }

    #[test]
    fn test_preserve_all_keeps_tombstones() {
        let dir = tempdir().unwrap();
        let (source, target) = open_pair(dir.path());

        source.add_current(None, "<a>", "<p>", "\"1\"").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        source.delete_current(None, "<a>", "<p>", "\"1\"").unwrap();

        let report = PruneTransfer::new(
            &source,
            &target,
            PruneOptions::with_history(HistoryMode::PreserveAll),
        )
        .run()
        .unwrap();

        assert_eq!(report.written, 2);
        let versions: Vec<_> = target
            .query_all_versions(Pattern::ANY)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(versions.iter().filter(|v| v.tombstone).count(), 1);
        // Current view still hides the deleted quad
        assert_eq!(target.query_current(Pattern::ANY).unwrap().count(), 0);
    }

    #[test]
    fn test_filters_take_the_complement() {
        let dir = tempdir().unwrap();
        let (source, target) = open_pair(dir.path());

        source.add_current(Some("<tmp>"), "<s>", "<p>", "\"t\"").unwrap();
        source.add_current(None, "<s>", "<dbg>", "\"d\"").unwrap();
        source.add_current(None, "<s>", "<p>", "\"keep\"").unwrap();

        let options = PruneOptions {
            graphs: TermFilter::exclude(["<tmp>"]),
            predicates: TermFilter::exclude(["<dbg>"]),
            history: HistoryMode::PreserveAll,
            dry_run: false,
        };
        let report = PruneTransfer::new(&source, &target, options).run().unwrap();

        assert_eq!(report.scanned, 3);
        assert_eq!(report.written, 1);
        assert_eq!(current_objects(&target), vec!["\"keep\""]);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = tempdir().unwrap();
        let (source, target) = open_pair(dir.path());

        source.add_current(None, "<a>", "<p>", "\"1\"").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        source.delete_current(None, "<a>", "<p>", "\"1\"").unwrap();

        let mut options = PruneOptions::flatten();
        options.dry_run = true;
        let report = PruneTransfer::new(&source, &target, options).run().unwrap();

        assert_eq!(report.scanned, 2);
        assert_eq!(report.written, 0);
        assert!(report.bytes_saved > 0);
        assert_eq!(target.statistics().unwrap().version_count, 0);
    }
}
