//! Change observer protocol.
//!
//! A live query delivers each changeset to a [`ChangeObserver`] as one
//! batch: `begin_updates`, then every edit in order, then `end_updates`.
//! The envelope is delivered even when there are no edits.
//!
//! Observers are called synchronously on the thread that refreshed the
//! query. To hand the edits to another thread, use a [`ChannelObserver`].

mod channel;
mod transcript;

pub use channel::{ChangeEvent, ChannelHandle, ChannelObserver};
pub use transcript::{Signal, Transcript};

use crate::diff::Edit;

/// Receiver of change notifications for one live query.
pub trait ChangeObserver {
    /// A batch of edits is about to follow.
    fn begin_updates(&mut self);

    /// One edit of the current batch.
    fn edit(&mut self, edit: &Edit);

    /// The batch is complete.
    fn end_updates(&mut self);
}

impl<O: ChangeObserver + ?Sized> ChangeObserver for &mut O {
    fn begin_updates(&mut self) {
        (**self).begin_updates();
    }

    fn edit(&mut self, edit: &Edit) {
        (**self).edit(edit);
    }

    fn end_updates(&mut self) {
        (**self).end_updates();
    }
}

impl<O: ChangeObserver + ?Sized> ChangeObserver for Box<O> {
    fn begin_updates(&mut self) {
        (**self).begin_updates();
    }

    fn edit(&mut self, edit: &Edit) {
        (**self).edit(edit);
    }

    fn end_updates(&mut self) {
        (**self).end_updates();
    }
}

/// Observer that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl ChangeObserver for NoopObserver {
    fn begin_updates(&mut self) {}
    fn edit(&mut self, _edit: &Edit) {}
    fn end_updates(&mut self) {}
}

/// Forwards every signal to several observers, in registration order.
#[derive(Default)]
pub struct FanOut<'a> {
    observers: Vec<&'a mut dyn ChangeObserver>,
}

impl<'a> FanOut<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: &'a mut dyn ChangeObserver) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn push(&mut self, observer: &'a mut dyn ChangeObserver) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl ChangeObserver for FanOut<'_> {
    fn begin_updates(&mut self) {
        for observer in &mut self.observers {
            observer.begin_updates();
        }
    }

    fn edit(&mut self, edit: &Edit) {
        for observer in &mut self.observers {
            observer.edit(edit);
        }
    }

    fn end_updates(&mut self) {
        for observer in &mut self.observers {
            observer.end_updates();
        }
    }
}
