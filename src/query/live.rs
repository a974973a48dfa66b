//! A query that tracks the store.

use super::{IndexPath, QuerySpec, Snapshot};
use crate::diff::{diff, Changeset};
use crate::error::{Result, StoreError};
use crate::observer::ChangeObserver;
use crate::store::Store;
use crate::types::Record;
use tracing::debug;

/// Holds a query and its most recent snapshot.
///
/// Each [`LiveQuery::refresh`] re-evaluates the query, diffs the result
/// against the retained snapshot, hands the edits to an observer and keeps
/// the new snapshot. Snapshots hold identities only; record contents are
/// read from the store on demand through [`LiveQuery::record_at`].
#[derive(Clone, Debug)]
pub struct LiveQuery {
    spec: QuerySpec,
    current: Snapshot,
    /// Whether `current` came from the store rather than the empty default.
    fetched: bool,
}

impl LiveQuery {
    /// Create a live query. Nothing is fetched until the first
    /// [`perform_fetch`](Self::perform_fetch) or [`refresh`](Self::refresh).
    pub fn new(spec: QuerySpec) -> Result<Self> {
        spec.validate()?;
        Ok(Self {
            spec,
            current: Snapshot::empty(),
            fetched: false,
        })
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    /// The retained snapshot.
    pub fn snapshot(&self) -> &Snapshot {
        &self.current
    }

    /// Load the current results without producing edits.
    pub fn perform_fetch(&mut self, store: &Store) -> Result<&Snapshot> {
        self.current = store.snapshot(&self.spec)?;
        self.fetched = true;
        debug!(
            kind = self.spec.kind(),
            rows = self.current.len(),
            sections = self.current.section_count(),
            sequence = self.current.sequence().0,
            "query fetched"
        );
        Ok(&self.current)
    }

    /// Re-evaluate against the store and report what changed.
    ///
    /// The observer always receives one begin/end batch, empty if nothing
    /// changed. If evaluation fails the retained snapshot is kept and the
    /// observer is not called.
    pub fn refresh<O>(&mut self, store: &Store, observer: &mut O) -> Result<Changeset>
    where
        O: ChangeObserver + ?Sized,
    {
        let next = store.snapshot(&self.spec)?;
        let changes = diff(&self.current, &next);
        changes.deliver(observer);

        debug!(
            kind = self.spec.kind(),
            from = self.current.sequence().0,
            to = next.sequence().0,
            edits = changes.len(),
            "query refreshed"
        );
        self.current = next;
        self.fetched = true;
        Ok(changes)
    }

    /// True if nothing has been fetched yet, or the store has committed
    /// since the retained snapshot.
    pub fn is_stale(&self, store: &Store) -> bool {
        !self.fetched || store.sequence() != self.current.sequence()
    }

    /// Read the record shown at `path`.
    ///
    /// Returns `Ok(None)` if the snapshot has no such row, and `NotFound`
    /// if the row's record has been deleted since the snapshot was taken.
    pub fn record_at(&self, store: &Store, path: IndexPath) -> Result<Option<Record>> {
        let Some(id) = self.current.id_at(path) else {
            return Ok(None);
        };
        store.get(id).map(Some).ok_or(StoreError::NotFound(id))
    }
}
