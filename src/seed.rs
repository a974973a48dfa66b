//! Replacing every record of a kind in one transaction.
//!
//! [`reseed`] deletes all records of a kind and inserts a fresh set as a
//! single commit. Either the whole replacement lands or nothing does; a
//! failure part way through never leaves the old set partially deleted.
//!
//! Also provides the sample employee directory used by the demos and tests.

use crate::error::{Result, StoreError};
use crate::query::QuerySpec;
use crate::store::{Store, Transaction};
use crate::types::{Record, RecordId, RecordInput, Sequence};
use chrono::NaiveDate;
use tracing::{info, warn};

/// Entity kind of the sample directory.
pub const EMPLOYEE: &str = "Employee";

/// Outcome of a successful [`reseed`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub deleted: usize,
    pub inserted: usize,
    /// Sequence of the commit that applied the replacement.
    pub sequence: Sequence,
}

/// Replace every record of `kind` with `inputs`, atomically.
///
/// Every input must be of `kind`. Any failure rolls the whole operation
/// back and is returned as `TransactionAborted`.
pub fn reseed<I>(store: &Store, kind: &str, inputs: I) -> Result<SeedSummary>
where
    I: IntoIterator<Item = RecordInput>,
{
    let mut tx = store.begin();
    let replaced = match replace_kind(&mut tx, kind, inputs) {
        Ok(counts) => counts,
        Err(e) => {
            warn!(kind, error = %e, "reseed failed, rolling back");
            tx.rollback();
            return Err(StoreError::aborted(e));
        }
    };

    let commit = tx.commit().map_err(StoreError::aborted)?;
    let summary = SeedSummary {
        deleted: replaced.0,
        inserted: replaced.1,
        sequence: commit.sequence,
    };
    info!(
        kind,
        deleted = summary.deleted,
        inserted = summary.inserted,
        sequence = summary.sequence.0,
        "kind reseeded"
    );
    Ok(summary)
}

/// Replace the `Employee` records with the sample directory.
pub fn reseed_sample(store: &Store, photo: &[u8]) -> Result<SeedSummary> {
    reseed(
        store,
        EMPLOYEE,
        sample_employees(photo).into_iter().map(Employee::into_input),
    )
}

fn replace_kind<I>(tx: &mut Transaction<'_>, kind: &str, inputs: I) -> Result<(usize, usize)>
where
    I: IntoIterator<Item = RecordInput>,
{
    // Collect first: the scan pins the working copy as of this point and
    // deleting while it is live would force a full copy of the table.
    let doomed: Vec<RecordId> = tx.scan(kind).map(|record| record.id).collect();
    for &id in &doomed {
        tx.delete(id)?;
    }

    let mut inserted = 0;
    for input in inputs {
        if input.kind != kind {
            return Err(StoreError::ConstraintViolation(format!(
                "reseeding '{}' with a record of kind '{}'",
                kind, input.kind
            )));
        }
        tx.insert(input)?;
        inserted += 1;
    }

    Ok((doomed.len(), inserted))
}

/// Typed view of an `Employee` record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Employee {
    pub name: String,
    pub job_title: String,
    pub date_of_birth: NaiveDate,
    pub years_employed: i64,
    pub photo: Vec<u8>,
}

impl Employee {
    pub const NAME: &'static str = "name";
    pub const JOB_TITLE: &'static str = "job_title";
    pub const DATE_OF_BIRTH: &'static str = "date_of_birth";
    pub const YEARS_EMPLOYED: &'static str = "years_employed";
    pub const PHOTO: &'static str = "photo";

    pub fn into_input(self) -> RecordInput {
        RecordInput::new(EMPLOYEE)
            .with(Self::NAME, self.name)
            .with(Self::JOB_TITLE, self.job_title)
            .with(Self::DATE_OF_BIRTH, self.date_of_birth)
            .with(Self::YEARS_EMPLOYED, self.years_employed)
            .with(Self::PHOTO, self.photo)
    }

    /// Read an employee back. Fails if the record is of another kind or a
    /// field is missing or has the wrong type.
    pub fn from_record(record: &Record) -> Result<Self> {
        if record.kind != EMPLOYEE {
            return Err(StoreError::InvalidFormat(format!(
                "record {} is a '{}', not an employee",
                record.id, record.kind
            )));
        }

        let field = |name: &str| {
            record.get(name).ok_or_else(|| {
                StoreError::InvalidFormat(format!("employee {} has no '{}'", record.id, name))
            })
        };
        let mistyped = |name: &str| {
            StoreError::InvalidFormat(format!(
                "employee {} field '{}' has the wrong type",
                record.id, name
            ))
        };

        Ok(Self {
            name: field(Self::NAME)?
                .as_text()
                .ok_or_else(|| mistyped(Self::NAME))?
                .to_string(),
            job_title: field(Self::JOB_TITLE)?
                .as_text()
                .ok_or_else(|| mistyped(Self::JOB_TITLE))?
                .to_string(),
            date_of_birth: field(Self::DATE_OF_BIRTH)?
                .as_date()
                .ok_or_else(|| mistyped(Self::DATE_OF_BIRTH))?,
            years_employed: field(Self::YEARS_EMPLOYED)?
                .as_integer()
                .ok_or_else(|| mistyped(Self::YEARS_EMPLOYED))?,
            photo: field(Self::PHOTO)?
                .as_blob()
                .ok_or_else(|| mistyped(Self::PHOTO))?
                .to_vec(),
        })
    }
}

/// The directory listing: every employee, by name, in one section.
pub fn employee_directory() -> QuerySpec {
    QuerySpec::new(EMPLOYEE).sort_by(Employee::NAME, true)
}

const SAMPLE: [(&str, &str, (i32, u32, u32), i64); 11] = [
    ("John Appleseed", "Software Engineer - iOS", (1978, 1, 26), 1),
    ("Ellen Roth", "Software Engineer - Android", (1985, 4, 15), 3),
    ("Zachary Wong", "Product Manager", (1986, 11, 4), 2),
    ("Cynthia Mala", "Project Manager", (1989, 3, 14), 2),
    ("John Ross", "Software Engineer - iOS", (1972, 7, 14), 3),
    ("Russ Joy", "Software Engineer - Android", (1985, 5, 24), 3),
    ("Suzy Chen", "Manager", (1972, 7, 14), 3),
    ("Vincent Dorn", "Software Engineer - iOS", (1990, 7, 22), 1),
    ("Srini Chagar", "Product Manager", (1969, 8, 1), 3),
    ("Lynn Hopi", "Software Engineer - Android", (1978, 2, 22), 3),
    ("Krista Venkata", "Product Manager", (1986, 9, 5), 2),
];

/// The eleven sample employees, all sharing `photo`.
pub fn sample_employees(photo: &[u8]) -> Vec<Employee> {
    SAMPLE
        .iter()
        .filter_map(|&(name, title, (y, m, d), years)| {
            Some(Employee {
                name: name.to_string(),
                job_title: title.to_string(),
                date_of_birth: NaiveDate::from_ymd_opt(y, m, d)?,
                years_employed: years,
                photo: photo.to_vec(),
            })
        })
        .collect()
}
