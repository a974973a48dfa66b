//! Snapshot diffing.
//!
//! [`diff`] compares two snapshots of the same query and produces the edits
//! a list widget needs to animate from one to the other. Sections are
//! matched by key and rows by identity; nothing is matched by position.
//!
//! Edits follow list-widget batch rules. Deletions and move sources are
//! addressed in the previous snapshot; insertions, move destinations and
//! updates in the next one. The batch is ordered so every deletion comes
//! before any insertion at the same level, deletions run from the highest
//! index down, and insertions from the lowest up:
//!
//! 1. `RowDeleted`, descending
//! 2. `SectionDeleted`, descending
//! 3. `SectionInserted`, ascending
//! 4. `RowInserted`, ascending
//! 5. `RowMoved`, ascending by destination
//! 6. `RowUpdated`, ascending
//!
//! A row that moves is not also reported as updated; the consumer redraws
//! it at its destination.
//!
//! The engine is a pure function of its two inputs. It never fails and
//! never touches the store, so it can run on any thread.

mod apply;
mod lis;

pub use apply::{ApplyError, ListSection, SectionedList};
pub use lis::longest_increasing_subsequence;

use crate::observer::ChangeObserver;
use crate::query::{IndexPath, Row, Snapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One structural change to a sectioned list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Edit {
    /// A section appeared at this index of the next snapshot.
    SectionInserted(usize),
    /// The section at this index of the previous snapshot went away.
    SectionDeleted(usize),
    /// A row appeared at this position of the next snapshot.
    RowInserted(IndexPath),
    /// The row at this position of the previous snapshot went away.
    RowDeleted(IndexPath),
    /// The row now at this position kept its place but its content changed.
    RowUpdated(IndexPath),
    /// A row moved between sections or was reordered within one.
    RowMoved { from: IndexPath, to: IndexPath },
}

impl Edit {
    pub fn is_deletion(&self) -> bool {
        matches!(self, Edit::SectionDeleted(_) | Edit::RowDeleted(_))
    }

    pub fn is_insertion(&self) -> bool {
        matches!(self, Edit::SectionInserted(_) | Edit::RowInserted(_))
    }

    pub fn is_section_edit(&self) -> bool {
        matches!(self, Edit::SectionInserted(_) | Edit::SectionDeleted(_))
    }
}

/// The ordered edits for one transition.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    edits: Vec<Edit>,
}

impl Changeset {
    pub fn edits(&self) -> &[Edit] {
        &self.edits
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Edit> {
        self.edits.iter()
    }

    /// Deliver the edits to `observer` inside one begin/end envelope.
    ///
    /// An empty changeset still produces the envelope.
    pub fn deliver<O: ChangeObserver + ?Sized>(&self, observer: &mut O) {
        observer.begin_updates();
        for edit in &self.edits {
            observer.edit(edit);
        }
        observer.end_updates();
    }
}

impl IntoIterator for Changeset {
    type Item = Edit;
    type IntoIter = std::vec::IntoIter<Edit>;

    fn into_iter(self) -> Self::IntoIter {
        self.edits.into_iter()
    }
}

impl<'a> IntoIterator for &'a Changeset {
    type Item = &'a Edit;
    type IntoIter = std::slice::Iter<'a, Edit>;

    fn into_iter(self) -> Self::IntoIter {
        self.edits.iter()
    }
}

/// Compute the edits that turn `previous` into `next`.
pub fn diff(previous: &Snapshot, next: &Snapshot) -> Changeset {
    let sections = match_sections(previous, next);

    let mut row_deletes: Vec<IndexPath> = Vec::new();
    let mut row_inserts: Vec<IndexPath> = Vec::new();
    let mut moves: Vec<(IndexPath, IndexPath)> = Vec::new();
    let mut updates: Vec<IndexPath> = Vec::new();

    // Rows that may stay in place, per stable next section:
    // (next row index, previous row index, previous row, next row).
    let mut candidates: HashMap<usize, Vec<(usize, usize, &Row, &Row)>> = HashMap::new();

    for (s, section) in previous.sections().iter().enumerate() {
        for (r, row) in section.rows().iter().enumerate() {
            if next.index_path_of(row.id).is_none() {
                row_deletes.push(IndexPath::new(s, r));
            }
        }
    }

    for (s, section) in next.sections().iter().enumerate() {
        for (r, row) in section.rows().iter().enumerate() {
            let to = IndexPath::new(s, r);
            let Some(from) = previous.index_path_of(row.id) else {
                row_inserts.push(to);
                continue;
            };

            match previous.row_at(from) {
                Some(before) if sections.stable_prev[from.section] == Some(s) => {
                    candidates
                        .entry(s)
                        .or_default()
                        .push((r, from.row, before, row));
                }
                _ => moves.push((from, to)),
            }
        }
    }

    // Within a stable section, keep the longest run of rows whose relative
    // order survived; everything else moves.
    for (s, rows) in candidates {
        let order: Vec<usize> = rows.iter().map(|&(_, prev_row, _, _)| prev_row).collect();
        let mut keep = vec![false; rows.len()];
        for i in longest_increasing_subsequence(&order) {
            keep[i] = true;
        }

        let prev_section = sections.stable_next[s].unwrap_or(s);
        for (i, &(next_row, prev_row, before, after)) in rows.iter().enumerate() {
            let to = IndexPath::new(s, next_row);
            if !keep[i] {
                moves.push((IndexPath::new(prev_section, prev_row), to));
            } else if before.digest != after.digest {
                updates.push(to);
            }
        }
    }

    row_deletes.sort_unstable_by(|a, b| b.cmp(a));
    row_inserts.sort_unstable();
    moves.sort_unstable_by(|a, b| a.1.cmp(&b.1));
    updates.sort_unstable();

    let mut edits = Vec::with_capacity(
        row_deletes.len()
            + sections.deleted.len()
            + sections.inserted.len()
            + row_inserts.len()
            + moves.len()
            + updates.len(),
    );
    edits.extend(row_deletes.into_iter().map(Edit::RowDeleted));
    edits.extend(sections.deleted.iter().rev().map(|&s| Edit::SectionDeleted(s)));
    edits.extend(sections.inserted.iter().map(|&s| Edit::SectionInserted(s)));
    edits.extend(row_inserts.into_iter().map(Edit::RowInserted));
    edits.extend(moves.into_iter().map(|(from, to)| Edit::RowMoved { from, to }));
    edits.extend(updates.into_iter().map(Edit::RowUpdated));

    Changeset { edits }
}

/// How the sections of two snapshots line up.
struct SectionMatch {
    /// previous index -> next index, for sections that stay in place.
    stable_prev: Vec<Option<usize>>,
    /// next index -> previous index, for sections that stay in place.
    stable_next: Vec<Option<usize>>,
    /// Previous indices to delete, ascending.
    deleted: Vec<usize>,
    /// Next indices to insert, ascending.
    inserted: Vec<usize>,
}

/// Match sections by key.
///
/// Sections present in both whose relative order survived stay in place.
/// A surviving section that changed relative order cannot be expressed
/// without a section move, so it is deleted and reinserted and its rows
/// are reported as moves.
fn match_sections(previous: &Snapshot, next: &Snapshot) -> SectionMatch {
    let next_index: HashMap<_, usize> = next
        .sections()
        .iter()
        .enumerate()
        .map(|(i, s)| (s.key(), i))
        .collect();

    let survivors: Vec<(usize, usize)> = previous
        .sections()
        .iter()
        .enumerate()
        .filter_map(|(p, s)| next_index.get(s.key()).map(|&n| (p, n)))
        .collect();

    let order: Vec<usize> = survivors.iter().map(|&(_, n)| n).collect();

    let mut stable_prev = vec![None; previous.section_count()];
    let mut stable_next = vec![None; next.section_count()];
    for i in longest_increasing_subsequence(&order) {
        let (p, n) = survivors[i];
        stable_prev[p] = Some(n);
        stable_next[n] = Some(p);
    }

    let deleted = (0..previous.section_count())
        .filter(|&p| stable_prev[p].is_none())
        .collect();
    let inserted = (0..next.section_count())
        .filter(|&n| stable_next[n].is_none())
        .collect();

    SectionMatch {
        stable_prev,
        stable_next,
        deleted,
        inserted,
    }
}
