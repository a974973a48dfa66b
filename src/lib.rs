//! # Roster
//!
//! A transactional record store with live, sectioned queries.
//!
//! ## Core Concepts
//!
//! - **Records**: Typed field maps with a store-assigned, never-reused id
//! - **Transactions**: Single writer, snapshot-isolated readers, journaled commits
//! - **Queries**: Sorted, optionally sectioned snapshots of one entity kind
//! - **Diffs**: Section and row edits between two snapshots, in list-widget batch order
//! - **Observers**: Begin/edit/end callbacks fed by a live query
//!
//! ## Example
//!
//! ```ignore
//! use roster::{seed, LiveQuery, Store, StoreConfig, Transcript};
//!
//! let store = Store::open_or_create(StoreConfig {
//!     path: "./my-store".into(),
//!     ..Default::default()
//! })?;
//!
//! let mut query = LiveQuery::new(seed::employee_directory())?;
//! query.perform_fetch(&store)?;
//!
//! seed::reseed_sample(&store, include_bytes!("person.png"))?;
//!
//! let mut transcript = Transcript::new();
//! let changes = query.refresh(&store, &mut transcript)?;
//! ```

pub mod diff;
pub mod error;
pub mod observer;
pub mod query;
pub mod records;
pub mod seed;
pub mod store;
pub mod types;
pub mod wal;

// Re-exports
pub use diff::{diff, ApplyError, Changeset, Edit, SectionedList};
pub use error::{Result, StoreError};
pub use observer::{
    ChangeEvent, ChangeObserver, ChannelHandle, ChannelObserver, FanOut, NoopObserver, Signal,
    Transcript,
};
pub use query::{IndexPath, LiveQuery, QuerySpec, Row, Section, SectionKey, Snapshot, SortKey};
pub use records::{Scan, Table};
pub use seed::{reseed, Employee, SeedSummary};
pub use store::{CommitSummary, RecoveryPolicy, Store, StoreConfig, Transaction, UniqueRule};
pub use types::*;
pub use wal::{WalEntry, WalOperation, WriteAheadLog};
