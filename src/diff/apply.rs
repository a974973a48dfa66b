//! Replaying a changeset onto a plain sectioned list.
//!
//! This is the consumer side of [`super::diff`]: a list that starts out
//! mirroring one snapshot and, after applying a changeset with list-widget
//! batch semantics, mirrors the next one.

use super::{Changeset, Edit};
use crate::query::{IndexPath, SectionKey, Snapshot};
use crate::types::RecordId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    #[error("section {0} out of range")]
    SectionOutOfRange(usize),

    #[error("row {0:?} out of range")]
    RowOutOfRange(IndexPath),

    #[error("row {0:?} not present in the next snapshot")]
    MissingInNext(IndexPath),
}

/// One section of a [`SectionedList`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListSection {
    pub key: SectionKey,
    pub ids: Vec<RecordId>,
}

/// Identities grouped into sections, the way a list widget holds them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SectionedList {
    sections: Vec<ListSection>,
}

impl SectionedList {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let sections = snapshot
            .sections()
            .iter()
            .map(|s| ListSection {
                key: s.key().clone(),
                ids: s.rows().iter().map(|row| row.id).collect(),
            })
            .collect();
        Self { sections }
    }

    pub fn sections(&self) -> &[ListSection] {
        &self.sections
    }

    pub fn len(&self) -> usize {
        self.sections.iter().map(|s| s.ids.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn id_at(&self, path: IndexPath) -> Option<RecordId> {
        self.sections.get(path.section)?.ids.get(path.row).copied()
    }

    /// Apply `changes` as one batch. `next` supplies the keys of inserted
    /// sections and the identities of inserted rows.
    ///
    /// Removals (deleted rows and move sources) are resolved against the
    /// list as it stands before the batch; insertions (new rows and move
    /// destinations) against the list after it. On error the list is left
    /// partially updated.
    pub fn apply(&mut self, changes: &Changeset, next: &Snapshot) -> Result<(), ApplyError> {
        let mut removals: Vec<IndexPath> = Vec::new();
        let mut section_removals: Vec<usize> = Vec::new();
        let mut section_inserts: Vec<usize> = Vec::new();
        let mut inserts: Vec<(IndexPath, RecordId)> = Vec::new();
        let mut updates: Vec<IndexPath> = Vec::new();

        for edit in changes {
            match *edit {
                Edit::RowDeleted(path) => removals.push(path),
                Edit::SectionDeleted(section) => section_removals.push(section),
                Edit::SectionInserted(section) => section_inserts.push(section),
                Edit::RowInserted(path) => {
                    let id = next.id_at(path).ok_or(ApplyError::MissingInNext(path))?;
                    inserts.push((path, id));
                }
                Edit::RowMoved { from, to } => {
                    let id = self.id_at(from).ok_or(ApplyError::RowOutOfRange(from))?;
                    removals.push(from);
                    inserts.push((to, id));
                }
                Edit::RowUpdated(path) => updates.push(path),
            }
        }

        removals.sort_unstable_by(|a, b| b.cmp(a));
        for path in removals {
            let section = self
                .sections
                .get_mut(path.section)
                .ok_or(ApplyError::SectionOutOfRange(path.section))?;
            if path.row >= section.ids.len() {
                return Err(ApplyError::RowOutOfRange(path));
            }
            section.ids.remove(path.row);
        }

        section_removals.sort_unstable_by(|a, b| b.cmp(a));
        for index in section_removals {
            if index >= self.sections.len() {
                return Err(ApplyError::SectionOutOfRange(index));
            }
            self.sections.remove(index);
        }

        section_inserts.sort_unstable();
        for index in section_inserts {
            let key = next
                .section(index)
                .ok_or(ApplyError::SectionOutOfRange(index))?
                .key()
                .clone();
            if index > self.sections.len() {
                return Err(ApplyError::SectionOutOfRange(index));
            }
            self.sections.insert(
                index,
                ListSection {
                    key,
                    ids: Vec::new(),
                },
            );
        }

        inserts.sort_unstable_by_key(|&(path, _)| path);
        for (path, id) in inserts {
            let section = self
                .sections
                .get_mut(path.section)
                .ok_or(ApplyError::SectionOutOfRange(path.section))?;
            if path.row > section.ids.len() {
                return Err(ApplyError::RowOutOfRange(path));
            }
            section.ids.insert(path.row, id);
        }

        for path in updates {
            let here = self.id_at(path).ok_or(ApplyError::RowOutOfRange(path))?;
            if next.id_at(path) != Some(here) {
                return Err(ApplyError::MissingInNext(path));
            }
        }

        Ok(())
    }
}
