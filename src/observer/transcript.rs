//! An observer that records what it was told.

use super::ChangeObserver;
use crate::diff::Edit;
use serde::{Deserialize, Serialize};

/// One observer callback.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Begin,
    Edit(Edit),
    End,
}

/// Records every callback in order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    signals: Vec<Signal>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    /// Every edit received, across all batches.
    pub fn edits(&self) -> Vec<Edit> {
        self.signals
            .iter()
            .filter_map(|s| match s {
                Signal::Edit(edit) => Some(*edit),
                _ => None,
            })
            .collect()
    }

    /// Number of completed batches.
    pub fn batches(&self) -> usize {
        self.signals.iter().filter(|s| **s == Signal::End).count()
    }

    /// True if every edit sits inside a begin/end pair and pairs don't nest.
    pub fn is_well_formed(&self) -> bool {
        let mut open = false;
        for signal in &self.signals {
            match signal {
                Signal::Begin if open => return false,
                Signal::Begin => open = true,
                Signal::Edit(_) if !open => return false,
                Signal::Edit(_) => {}
                Signal::End if !open => return false,
                Signal::End => open = false,
            }
        }
        !open
    }

    pub fn clear(&mut self) {
        self.signals.clear();
    }
}

impl ChangeObserver for Transcript {
    fn begin_updates(&mut self) {
        self.signals.push(Signal::Begin);
    }

    fn edit(&mut self, edit: &Edit) {
        self.signals.push(Signal::Edit(*edit));
    }

    fn end_updates(&mut self) {
        self.signals.push(Signal::End);
    }
}
