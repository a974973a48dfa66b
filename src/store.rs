//! Main Store struct tying all components together.

use crate::error::{Result, StoreError};
use crate::query::{QuerySpec, Snapshot};
use crate::records::{Scan, Table};
use crate::types::{Fields, Record, RecordId, RecordInput, Sequence, StoreStats, Timestamp};
use crate::wal::{WalEntry, WalOperation, WriteAheadLog};
use fs2::FileExt;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What `open_or_create` does when the on-disk store cannot be opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RecoveryPolicy {
    /// Surface `StoreUnavailable` to the caller.
    #[default]
    Fail,
    /// Delete the unreadable store and start over empty.
    ///
    /// A store locked by another process is never recreated.
    RecreateEmpty,
}

/// A uniqueness rule: no two records of `kind` may share a value of `field`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniqueRule {
    pub kind: String,
    pub field: String,
}

impl UniqueRule {
    pub fn new(kind: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            field: field.into(),
        }
    }
}

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Base path for the store.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// fsync the journal on every commit.
    pub sync_on_commit: bool,

    /// Recovery when the existing store is unreadable.
    pub recovery: RecoveryPolicy,

    /// Uniqueness rules checked on insert and update.
    pub unique: Vec<UniqueRule>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./store"),
            create_if_missing: true,
            sync_on_commit: true,
            recovery: RecoveryPolicy::Fail,
            unique: Vec::new(),
        }
    }
}

/// What a committed transaction did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Store sequence after the commit.
    pub sequence: Sequence,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl CommitSummary {
    pub fn is_empty(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deleted == 0
    }
}

/// Magic bytes for store manifest.
const STORE_MAGIC: &[u8; 4] = b"RST\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

/// Journal file name inside the store directory.
const JOURNAL_FILE: &str = "journal.wal";

/// The record store.
///
/// Provides:
/// - Transactional insert, update and delete with a single writer
/// - Scans that see one consistent committed version
/// - Durable commits through an append-only journal
pub struct Store {
    /// Store configuration.
    config: StoreConfig,

    /// Lock file for exclusive access (none for in-memory stores).
    _lock_file: Option<File>,

    /// Commit journal (none for in-memory stores).
    journal: Option<WriteAheadLog>,

    /// Committed table version.
    committed: RwLock<Arc<Table>>,

    /// Single-writer lock, held for the lifetime of a transaction.
    write_lock: Mutex<()>,
}

impl Store {
    /// Open an existing store or create a new one, applying the configured
    /// recovery policy if the existing store is unreadable.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        let result = if config.path.exists() {
            Self::open(config.clone())
        } else if config.create_if_missing {
            Self::create(config.clone())
        } else {
            Err(StoreError::unavailable(&config.path, StoreError::NotInitialized))
        };

        match result {
            Err(e)
                if config.recovery == RecoveryPolicy::RecreateEmpty
                    && config.create_if_missing
                    && !matches!(e.root_cause(), StoreError::Locked) =>
            {
                warn!(path = %config.path.display(), error = %e, "store unreadable, recreating empty");
                match fs::remove_dir_all(&config.path) {
                    Ok(()) => {}
                    Err(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
                    Err(io_err) => {
                        return Err(StoreError::unavailable(&config.path, io_err.into()))
                    }
                }
                Self::create(config)
            }
            other => other,
        }
    }

    /// Create a new store.
    pub fn create(config: StoreConfig) -> Result<Self> {
        let path = config.path.clone();
        Self::create_inner(config).map_err(|e| StoreError::unavailable(path, e))
    }

    fn create_inner(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;
        // The lock comes first so a store held elsewhere is never rewritten.
        let lock_file = Self::acquire_lock(&config.path)?;
        Self::write_manifest(&config.path)?;

        let (journal, entries) =
            WriteAheadLog::open(config.path.join(JOURNAL_FILE), config.sync_on_commit)?;
        let table = Self::replay(entries);

        info!(path = %config.path.display(), "store created");
        Ok(Self::assemble(config, Some(lock_file), Some(journal), table))
    }

    /// Open an existing store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let path = config.path.clone();
        Self::open_inner(config).map_err(|e| StoreError::unavailable(path, e))
    }

    fn open_inner(config: StoreConfig) -> Result<Self> {
        // Locked is reported ahead of any damage to the manifest.
        let lock_file = Self::acquire_lock(&config.path)?;
        Self::verify_manifest(&config.path)?;

        let (journal, entries) =
            WriteAheadLog::open(config.path.join(JOURNAL_FILE), config.sync_on_commit)?;
        let table = Self::replay(entries);

        info!(
            path = %config.path.display(),
            records = table.len(),
            sequence = table.sequence().0,
            "store opened"
        );
        Ok(Self::assemble(config, Some(lock_file), Some(journal), table))
    }

    /// A non-durable store with default configuration.
    pub fn in_memory() -> Self {
        Self::in_memory_with(StoreConfig::default())
    }

    /// A non-durable store. `path`, `sync_on_commit` and `recovery` are ignored.
    pub fn in_memory_with(config: StoreConfig) -> Self {
        Self::assemble(config, None, None, Table::new())
    }

    fn assemble(
        config: StoreConfig,
        lock_file: Option<File>,
        journal: Option<WriteAheadLog>,
        table: Table,
    ) -> Self {
        Self {
            config,
            _lock_file: lock_file,
            journal,
            committed: RwLock::new(Arc::new(table)),
            write_lock: Mutex::new(()),
        }
    }

    /// Rebuild the committed table from journal entries.
    fn replay(entries: Vec<WalEntry>) -> Table {
        let mut table = Table::new();
        for entry in entries {
            if entry.checkpoint {
                table = Table::new();
            }
            for operation in entry.operations {
                match operation {
                    WalOperation::Put(record) => table.put(record),
                    WalOperation::Delete(id) => {
                        table.remove(id);
                    }
                }
            }
            table.reserve_ids(entry.next_id);
            table.set_sequence(entry.sequence);
        }
        table
    }

    // --- Transactions ---

    /// Begin an explicit transaction.
    ///
    /// Blocks until no other transaction is open. Do not call the implicit
    /// mutators (`insert`, `delete`, `update`) on the same store while the
    /// returned transaction is alive; they wait for the same lock.
    pub fn begin(&self) -> Transaction<'_> {
        let guard = self.write_lock.lock();
        let working = Arc::clone(&self.committed.read());
        Transaction {
            store: self,
            _guard: guard,
            working,
            operations: Vec::new(),
            summary: CommitSummary::default(),
            finished: false,
        }
    }

    /// Run `f` inside a transaction.
    ///
    /// Commits if `f` succeeds. If `f` or the commit fails, nothing is
    /// applied and the failure comes back as `TransactionAborted`.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let mut tx = self.begin();
        match f(&mut tx) {
            Ok(value) => {
                tx.commit().map_err(StoreError::aborted)?;
                Ok(value)
            }
            Err(e) => {
                warn!(error = %e, "transaction failed, rolling back");
                tx.rollback();
                Err(StoreError::aborted(e))
            }
        }
    }

    // --- Implicit single-operation transactions ---

    /// Insert a record and commit.
    pub fn insert(&self, input: RecordInput) -> Result<RecordId> {
        let mut tx = self.begin();
        let id = tx.insert(input)?;
        tx.commit()?;
        Ok(id)
    }

    /// Delete a record and commit.
    pub fn delete(&self, id: RecordId) -> Result<()> {
        let mut tx = self.begin();
        tx.delete(id)?;
        tx.commit()?;
        Ok(())
    }

    /// Merge `fields` into a record and commit.
    pub fn update(&self, id: RecordId, fields: Fields) -> Result<()> {
        let mut tx = self.begin();
        tx.update(id, fields)?;
        tx.commit()?;
        Ok(())
    }

    // --- Reads ---

    /// Get a committed record by id.
    pub fn get(&self, id: RecordId) -> Option<Record> {
        self.committed.read().get(id).cloned()
    }

    /// Scan committed records of a kind.
    pub fn scan(&self, kind: &str) -> Scan {
        Scan::new(self.current(), kind)
    }

    /// Number of committed records of a kind.
    pub fn count(&self, kind: &str) -> usize {
        self.committed.read().count(kind)
    }

    /// Sequence of the last commit.
    pub fn sequence(&self) -> Sequence {
        self.committed.read().sequence()
    }

    /// Evaluate a query against the committed state.
    pub fn snapshot(&self, spec: &QuerySpec) -> Result<Snapshot> {
        Snapshot::capture(spec, self.scan(spec.kind()))
    }

    /// The committed table version.
    fn current(&self) -> Arc<Table> {
        Arc::clone(&self.committed.read())
    }

    // --- Store Operations ---

    /// Rewrite the journal as a single checkpoint of the committed state.
    pub fn compact(&self) -> Result<()> {
        let _lock = self.write_lock.lock();
        let Some(journal) = &self.journal else {
            return Ok(());
        };

        let table = self.current();
        let before = journal.size();
        let checkpoint = WalEntry {
            sequence: table.sequence(),
            next_id: table.next_id(),
            checkpoint: true,
            operations: table.iter().cloned().map(WalOperation::Put).collect(),
            timestamp: Timestamp::now(),
        };
        journal.rewrite(&checkpoint)?;

        info!(before, after = journal.size(), records = table.len(), "journal compacted");
        Ok(())
    }

    /// Get store statistics.
    pub fn stats(&self) -> StoreStats {
        let table = self.current();
        StoreStats {
            record_count: table.len() as u64,
            sequence: table.sequence(),
            journal_size_bytes: self.journal.as_ref().map_or(0, WriteAheadLog::size),
        }
    }

    /// Get the store path (none for in-memory stores).
    pub fn path(&self) -> Option<&Path> {
        self.journal.as_ref().map(|_| self.config.path.as_path())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // --- Private Helpers ---

    fn check_unique(&self, table: &Table, record: &Record) -> Result<()> {
        for rule in self.config.unique.iter().filter(|r| r.kind == record.kind) {
            let Some(value) = record.get(&rule.field) else {
                continue;
            };
            let taken = table
                .iter_kind(&record.kind)
                .any(|other| other.id != record.id && other.get(&rule.field) == Some(value));
            if taken {
                return Err(StoreError::ConstraintViolation(format!(
                    "{}.{} must be unique, {} is already taken",
                    rule.kind, rule.field, value
                )));
            }
        }
        Ok(())
    }

    fn write_manifest(path: &Path) -> Result<()> {
        use std::io::Write;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::create(manifest_path)?;

        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        use std::io::Read;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::open(manifest_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }
}

/// An open transaction.
///
/// Holds the store's writer lock. Reads through the transaction see its own
/// uncommitted writes; readers of the store keep seeing the last commit
/// until [`Transaction::commit`] succeeds. Dropping an uncommitted
/// transaction rolls it back.
pub struct Transaction<'s> {
    store: &'s Store,
    _guard: MutexGuard<'s, ()>,
    /// Working copy, shared with the committed version until first write.
    working: Arc<Table>,
    /// Journal operations in the order they were made.
    operations: Vec<WalOperation>,
    summary: CommitSummary,
    finished: bool,
}

impl<'s> Transaction<'s> {
    /// Insert a new record, returning its assigned identity.
    pub fn insert(&mut self, input: RecordInput) -> Result<RecordId> {
        if input.kind.is_empty() {
            return Err(StoreError::ConstraintViolation(
                "record kind must not be empty".into(),
            ));
        }

        let mut record = Record {
            id: RecordId(self.working.next_id()),
            kind: input.kind,
            fields: input.fields,
        };
        self.store.check_unique(&self.working, &record)?;

        let table = Arc::make_mut(&mut self.working);
        record.id = table.allocate_id();
        table.put(record.clone());

        let id = record.id;
        self.operations.push(WalOperation::Put(record));
        self.summary.inserted += 1;
        Ok(id)
    }

    /// Delete a record. Fails with `NotFound` if it does not exist.
    pub fn delete(&mut self, id: RecordId) -> Result<()> {
        if !self.working.contains(id) {
            return Err(StoreError::NotFound(id));
        }

        Arc::make_mut(&mut self.working).remove(id);
        self.operations.push(WalOperation::Delete(id));
        self.summary.deleted += 1;
        Ok(())
    }

    /// Merge `fields` into an existing record.
    ///
    /// Fields not named keep their value. Identity and kind never change.
    pub fn update(&mut self, id: RecordId, fields: Fields) -> Result<()> {
        let mut record = self
            .working
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound(id))?;
        record.fields.extend(fields);
        self.store.check_unique(&self.working, &record)?;

        Arc::make_mut(&mut self.working).put(record.clone());
        self.operations.push(WalOperation::Put(record));
        self.summary.updated += 1;
        Ok(())
    }

    /// Read a record, including uncommitted writes.
    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.working.get(id)
    }

    /// Scan a kind, including uncommitted writes up to this call.
    pub fn scan(&self, kind: &str) -> Scan {
        Scan::new(Arc::clone(&self.working), kind)
    }

    /// True once anything has been written.
    pub fn is_dirty(&self) -> bool {
        !self.operations.is_empty()
    }

    /// Make the transaction's writes durable and visible.
    ///
    /// If the journal write fails the committed state is untouched.
    pub fn commit(mut self) -> Result<CommitSummary> {
        self.finished = true;

        if self.operations.is_empty() {
            return Ok(CommitSummary {
                sequence: self.working.sequence(),
                ..CommitSummary::default()
            });
        }

        let sequence = self.working.sequence().next();
        let entry = WalEntry {
            sequence,
            next_id: self.working.next_id(),
            checkpoint: false,
            operations: std::mem::take(&mut self.operations),
            timestamp: Timestamp::now(),
        };

        if let Some(journal) = &self.store.journal {
            journal.append(&entry)?;
        }

        Arc::make_mut(&mut self.working).set_sequence(sequence);
        *self.store.committed.write() = Arc::clone(&self.working);

        self.summary.sequence = sequence;
        debug!(
            sequence = sequence.0,
            inserted = self.summary.inserted,
            updated = self.summary.updated,
            deleted = self.summary.deleted,
            "transaction committed"
        );
        Ok(self.summary)
    }

    /// Discard every write made in this transaction.
    pub fn rollback(mut self) {
        self.finished = true;
        debug!(operations = self.operations.len(), "transaction rolled back");
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished && self.is_dirty() {
            debug!(
                operations = self.operations.len(),
                "uncommitted transaction dropped, rolling back"
            );
        }
    }
}
