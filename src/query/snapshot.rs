//! Materialized, sorted, sectioned query results.

use super::QuerySpec;
use crate::error::{Result, StoreError};
use crate::records::Scan;
use crate::types::{FieldValue, Hash, Record, RecordId, Sequence};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// Value a section is keyed by. `None` groups records lacking the field and
/// is the single key of an unsectioned query.
pub type SectionKey = Option<FieldValue>;

/// Position of a row: section index, then row index within the section.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexPath {
    pub section: usize,
    pub row: usize,
}

impl IndexPath {
    pub fn new(section: usize, row: usize) -> Self {
        Self { section, row }
    }
}

impl fmt::Debug for IndexPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.section, self.row)
    }
}

/// One row: an identity plus the cached values it was placed by.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Row {
    pub id: RecordId,
    /// Values of the query's sort keys, in key order.
    pub sort_values: Vec<Option<FieldValue>>,
    /// Digest of every field at capture time.
    pub digest: Hash,
}

/// A group of rows sharing a section key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Section {
    key: SectionKey,
    rows: Vec<Row>,
}

impl Section {
    pub fn key(&self) -> &SectionKey {
        &self.key
    }

    /// Display name of the section (empty for the null key).
    pub fn name(&self) -> String {
        self.key.as_ref().map(ToString::to_string).unwrap_or_default()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Immutable result of evaluating a [`QuerySpec`] at one commit.
///
/// Holds identities and cached key values only; records stay owned by the
/// store and are read back through it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    sections: Vec<Section>,
    positions: HashMap<RecordId, IndexPath>,
    sequence: Sequence,
}

impl Snapshot {
    /// A snapshot with no sections.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Evaluate `spec` over a scan of the store.
    pub fn capture(spec: &QuerySpec, scan: Scan) -> Result<Self> {
        let sequence = scan.sequence();
        Self::from_records(spec, scan, sequence)
    }

    /// Evaluate `spec` over an arbitrary set of records.
    ///
    /// Rows are sorted by the query's keys (ties by identity), then grouped
    /// by section key in order of first appearance, which orders sections
    /// by their first row.
    pub fn from_records<I>(spec: &QuerySpec, records: I, sequence: Sequence) -> Result<Self>
    where
        I: IntoIterator<Item = Record>,
    {
        spec.validate()?;

        let mut projected: Vec<(SectionKey, Row)> = Vec::new();
        for record in records {
            if record.kind != spec.kind() {
                continue;
            }

            let section = match spec.section_field() {
                Some(field) => key_value(&record, field)?,
                None => None,
            };
            let sort_values = spec
                .sort_keys()
                .iter()
                .map(|key| key_value(&record, &key.field))
                .collect::<Result<Vec<_>>>()?;

            projected.push((
                section,
                Row {
                    id: record.id,
                    sort_values,
                    digest: record.digest(),
                },
            ));
        }

        projected.sort_by(|(_, a), (_, b)| compare_rows(spec, a, b));

        let mut sections: Vec<Section> = Vec::new();
        let mut section_of: HashMap<SectionKey, usize> = HashMap::new();
        for (key, row) in projected {
            let index = match section_of.get(&key) {
                Some(&index) => index,
                None => {
                    section_of.insert(key.clone(), sections.len());
                    sections.push(Section {
                        key,
                        rows: Vec::new(),
                    });
                    sections.len() - 1
                }
            };
            sections[index].rows.push(row);
        }

        let positions = sections
            .iter()
            .enumerate()
            .flat_map(|(s, section)| {
                section
                    .rows
                    .iter()
                    .enumerate()
                    .map(move |(r, row)| (row.id, IndexPath::new(s, r)))
            })
            .collect();

        Ok(Self {
            sections,
            positions,
            sequence,
        })
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, index: usize) -> Option<&Section> {
        self.sections.get(index)
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Rows in a section (zero if the section does not exist).
    pub fn row_count(&self, section: usize) -> usize {
        self.sections.get(section).map_or(0, Section::len)
    }

    /// Total rows across all sections.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn row_at(&self, path: IndexPath) -> Option<&Row> {
        self.sections.get(path.section)?.rows.get(path.row)
    }

    pub fn id_at(&self, path: IndexPath) -> Option<RecordId> {
        self.row_at(path).map(|row| row.id)
    }

    pub fn index_path_of(&self, id: RecordId) -> Option<IndexPath> {
        self.positions.get(&id).copied()
    }

    pub fn section_index(&self, key: &SectionKey) -> Option<usize> {
        self.sections.iter().position(|s| &s.key == key)
    }

    /// Identities in display order.
    pub fn ids(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.sections
            .iter()
            .flat_map(|s| s.rows.iter().map(|row| row.id))
    }

    /// Commit sequence the snapshot was captured at.
    pub fn sequence(&self) -> Sequence {
        self.sequence
    }
}

/// Read a key field, refusing blobs.
fn key_value(record: &Record, field: &str) -> Result<Option<FieldValue>> {
    match record.get(field) {
        Some(value) if value.is_blob() => Err(StoreError::InvalidQuery(format!(
            "field '{}' of record {} is a blob and cannot be a sort or section key",
            field, record.id
        ))),
        other => Ok(other.cloned()),
    }
}

fn compare_rows(spec: &QuerySpec, a: &Row, b: &Row) -> Ordering {
    for (i, key) in spec.sort_keys().iter().enumerate() {
        let ord = a.sort_values[i].cmp(&b.sort_values[i]);
        let ord = if key.ascending { ord } else { ord.reverse() };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.id.cmp(&b.id)
}
