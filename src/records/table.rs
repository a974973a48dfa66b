//! Committed record table and its per-kind index.

use crate::types::{Record, RecordId, Sequence};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::Arc;

/// One version of the record table.
///
/// The store keeps the committed version behind an `Arc`; readers hold on to
/// the version they started with, writers copy on write and swap at commit.
#[derive(Clone, Debug, Default)]
pub struct Table {
    /// Record storage, ordered by identity (= insertion order).
    records: BTreeMap<RecordId, Record>,

    /// Kind to record ids.
    kind_index: HashMap<String, BTreeSet<RecordId>>,

    /// Next identity to hand out. Never reused, even after deletes.
    next_id: u64,

    /// Commit sequence this version represents.
    sequence: Sequence,
}

impl Table {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Default::default()
        }
    }

    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.records.get(&id)
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records of a kind.
    pub fn count(&self, kind: &str) -> usize {
        self.kind_index.get(kind).map_or(0, BTreeSet::len)
    }

    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    pub(crate) fn set_sequence(&mut self, sequence: Sequence) {
        self.sequence = sequence;
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Reserve the next identity.
    pub(crate) fn allocate_id(&mut self) -> RecordId {
        let id = RecordId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Make sure no id below `next_id` is ever handed out again.
    pub(crate) fn reserve_ids(&mut self, next_id: u64) {
        self.next_id = self.next_id.max(next_id);
    }

    /// Insert or replace a record, keeping the kind index in step.
    pub(crate) fn put(&mut self, record: Record) {
        self.next_id = self.next_id.max(record.id.0 + 1);

        if let Some(old) = self.records.get(&record.id) {
            if old.kind != record.kind {
                let old_kind = old.kind.clone();
                self.unindex(&old_kind, record.id);
            }
        }

        self.kind_index
            .entry(record.kind.clone())
            .or_default()
            .insert(record.id);
        self.records.insert(record.id, record);
    }

    /// Remove a record. Returns the removed record, if any.
    pub(crate) fn remove(&mut self, id: RecordId) -> Option<Record> {
        let record = self.records.remove(&id)?;
        self.unindex(&record.kind, id);
        Some(record)
    }

    fn unindex(&mut self, kind: &str, id: RecordId) {
        if let Some(ids) = self.kind_index.get_mut(kind) {
            ids.remove(&id);
            if ids.is_empty() {
                self.kind_index.remove(kind);
            }
        }
    }

    /// Iterate all records in identity order.
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Iterate the records of one kind in identity order.
    pub fn iter_kind<'a>(&'a self, kind: &str) -> impl Iterator<Item = &'a Record> + 'a {
        self.kind_index
            .get(kind)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.records.get(id))
    }

    /// First id of `kind` strictly after `after`.
    fn next_of_kind(&self, kind: &str, after: Option<RecordId>) -> Option<RecordId> {
        let ids = self.kind_index.get(kind)?;
        let lower = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        ids.range((lower, Bound::Unbounded)).next().copied()
    }
}

/// Lazy scan over the records of one kind.
///
/// A scan pins the table version current when it was created, so it reflects
/// store state at call time no matter how long the consumer takes. Cloning
/// or calling [`Scan::restart`] replays the same version from the start.
#[derive(Clone, Debug)]
pub struct Scan {
    table: Arc<Table>,
    kind: String,
    cursor: Option<RecordId>,
}

impl Scan {
    pub(crate) fn new(table: Arc<Table>, kind: impl Into<String>) -> Self {
        Self {
            table,
            kind: kind.into(),
            cursor: None,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Commit sequence of the pinned version.
    pub fn sequence(&self) -> Sequence {
        self.table.sequence()
    }

    /// Rewind to the first record.
    pub fn restart(&mut self) {
        self.cursor = None;
    }
}

impl Iterator for Scan {
    type Item = Record;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.table.next_of_kind(&self.kind, self.cursor)?;
        self.cursor = Some(id);
        self.table.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fields;

    fn record(table: &mut Table, kind: &str, name: &str) -> RecordId {
        let id = table.allocate_id();
        table.put(Record {
            id,
            kind: kind.to_string(),
            fields: fields([("name", name)]),
        });
        id
    }

    #[test]
    fn test_ids_are_never_reused() {
        let mut table = Table::new();
        let a = record(&mut table, "Employee", "Ann");
        table.remove(a);
        let b = record(&mut table, "Employee", "Bob");
        assert!(b > a);
    }

    #[test]
    fn test_scan_filters_by_kind_in_id_order() {
        let mut table = Table::new();
        let ann = record(&mut table, "Employee", "Ann");
        record(&mut table, "Team", "Mobile");
        let bob = record(&mut table, "Employee", "Bob");

        let scan = Scan::new(Arc::new(table), "Employee");
        let ids: Vec<_> = scan.map(|r| r.id).collect();
        assert_eq!(ids, vec![ann, bob]);
    }

    #[test]
    fn test_scan_is_restartable_and_pinned() {
        let mut table = Table::new();
        record(&mut table, "Employee", "Ann");
        let shared = Arc::new(table);

        let mut scan = Scan::new(Arc::clone(&shared), "Employee");
        assert_eq!(scan.by_ref().count(), 1);
        assert!(scan.next().is_none());

        // A later version does not leak into the pinned scan.
        let mut newer = (*shared).clone();
        record(&mut newer, "Employee", "Bob");

        scan.restart();
        assert_eq!(scan.count(), 1);
        assert_eq!(newer.count("Employee"), 2);
    }

    #[test]
    fn test_remove_drops_empty_kind() {
        let mut table = Table::new();
        let id = record(&mut table, "Employee", "Ann");
        assert!(table.remove(id).is_some());
        assert_eq!(table.count("Employee"), 0);
        assert!(table.remove(id).is_none());
        assert!(table.is_empty());
    }
}
