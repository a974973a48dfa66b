//! Record storage.
//!
//! Committed records live in an in-memory [`Table`] rebuilt from the journal
//! on open. Scans walk one pinned table version per kind, in identity order.

mod table;

pub use table::{Scan, Table};
