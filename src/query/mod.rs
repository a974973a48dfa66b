//! Declarative queries and their materialized snapshots.
//!
//! A [`QuerySpec`] names an entity kind, how to order it and, optionally, a
//! field to group it into sections by. Evaluating a spec against the store
//! yields an immutable [`Snapshot`]; a [`LiveQuery`] keeps the latest one and
//! turns each re-evaluation into a [`crate::diff::Changeset`].

mod live;
mod snapshot;

pub use live::LiveQuery;
pub use snapshot::{IndexPath, Row, Section, SectionKey, Snapshot};

use crate::error::{Result, StoreError};

/// One sort criterion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub ascending: bool,
}

/// What to select, how to order it, how to section it.
///
/// Rows that compare equal under every sort key are ordered by identity,
/// so the resulting order is always total.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuerySpec {
    kind: String,
    sort: Vec<SortKey>,
    section_by: Option<String>,
}

impl QuerySpec {
    /// Select every record of `kind`, in identity order, in one section.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            sort: Vec::new(),
            section_by: None,
        }
    }

    /// Add a sort key. Earlier keys take precedence.
    pub fn sort_by(mut self, field: impl Into<String>, ascending: bool) -> Self {
        self.sort.push(SortKey {
            field: field.into(),
            ascending,
        });
        self
    }

    /// Group rows into sections by the value of `field`.
    pub fn section_by(mut self, field: impl Into<String>) -> Self {
        self.section_by = Some(field.into());
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn sort_keys(&self) -> &[SortKey] {
        &self.sort
    }

    pub fn section_field(&self) -> Option<&str> {
        self.section_by.as_deref()
    }

    /// Reject specs that cannot be evaluated.
    pub fn validate(&self) -> Result<()> {
        if self.kind.is_empty() {
            return Err(StoreError::InvalidQuery("entity kind must not be empty".into()));
        }
        if self.sort.iter().any(|k| k.field.is_empty()) {
            return Err(StoreError::InvalidQuery("sort field must not be empty".into()));
        }
        if self.section_by.as_deref() == Some("") {
            return Err(StoreError::InvalidQuery("section field must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let spec = QuerySpec::new("Employee")
            .sort_by("name", true)
            .sort_by("years_employed", false)
            .section_by("job_title");

        assert_eq!(spec.kind(), "Employee");
        assert_eq!(spec.sort_keys().len(), 2);
        assert!(!spec.sort_keys()[1].ascending);
        assert_eq!(spec.section_field(), Some("job_title"));
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_names() {
        assert!(matches!(
            QuerySpec::new("").validate(),
            Err(StoreError::InvalidQuery(_))
        ));
        assert!(QuerySpec::new("Employee").sort_by("", true).validate().is_err());
        assert!(QuerySpec::new("Employee").section_by("").validate().is_err());
    }
}
