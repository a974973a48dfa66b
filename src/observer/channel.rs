//! Forwarding change notifications to another thread.

use super::ChangeObserver;
use crate::diff::Edit;
use crossbeam_channel::{
    bounded, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError, TrySendError,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Default number of buffered events before the consumer counts as stalled.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// What a [`ChannelObserver`] sends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    Begin,
    Edit { edit: Edit },
    End,
}

/// Observer that pushes every callback into a bounded channel.
///
/// The sending side never blocks. If the consumer has gone away or fallen
/// a full buffer behind, the observer logs once and drops its sender: a
/// consumer that missed an edit can no longer track positions, so it drains
/// what is buffered and then sees a disconnect.
pub struct ChannelObserver {
    /// `None` once detached.
    sender: Option<Sender<ChangeEvent>>,
}

/// Consumer side of a [`ChannelObserver`].
pub struct ChannelHandle {
    pub receiver: Receiver<ChangeEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, ChannelHandle) {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(buffer_size: usize) -> (Self, ChannelHandle) {
        let (sender, receiver) = bounded(buffer_size);
        (
            Self {
                sender: Some(sender),
            },
            ChannelHandle { receiver },
        )
    }

    /// Whether delivery has stopped.
    pub fn is_detached(&self) -> bool {
        self.sender.is_none()
    }

    fn send(&mut self, event: ChangeEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        match sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("change consumer fell behind, detaching observer");
                self.sender = None;
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("change consumer disconnected, detaching observer");
                self.sender = None;
            }
        }
    }
}

impl ChangeObserver for ChannelObserver {
    fn begin_updates(&mut self) {
        self.send(ChangeEvent::Begin);
    }

    fn edit(&mut self, edit: &Edit) {
        self.send(ChangeEvent::Edit { edit: *edit });
    }

    fn end_updates(&mut self) {
        self.send(ChangeEvent::End);
    }
}

impl ChannelHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<ChangeEvent, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<ChangeEvent, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<ChangeEvent, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Receive one complete batch, blocking until its `End` arrives.
    ///
    /// Fails with `RecvError` once the observer is dropped or has detached.
    pub fn recv_batch(&self) -> Result<Vec<Edit>, RecvError> {
        let mut edits = Vec::new();
        loop {
            match self.receiver.recv()? {
                ChangeEvent::Begin => edits.clear(),
                ChangeEvent::Edit { edit } => edits.push(edit),
                ChangeEvent::End => return Ok(edits),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::IndexPath;

    #[test]
    fn test_events_arrive_in_order() {
        let (mut observer, handle) = ChannelObserver::new();
        observer.begin_updates();
        observer.edit(&Edit::RowInserted(IndexPath::new(0, 0)));
        observer.end_updates();

        let timeout = Duration::from_millis(100);
        assert_eq!(handle.recv_timeout(timeout).unwrap(), ChangeEvent::Begin);
        assert_eq!(
            handle.recv_timeout(timeout).unwrap(),
            ChangeEvent::Edit {
                edit: Edit::RowInserted(IndexPath::new(0, 0))
            }
        );
        assert_eq!(handle.recv_timeout(timeout).unwrap(), ChangeEvent::End);
        assert!(handle.try_recv().is_err());
    }

    #[test]
    fn test_full_buffer_detaches() {
        let (mut observer, handle) = ChannelObserver::with_capacity(2);
        observer.begin_updates();
        observer.edit(&Edit::SectionInserted(0));
        observer.edit(&Edit::SectionInserted(1));
        assert!(observer.is_detached());

        // Draining does not re-attach.
        while handle.try_recv().is_ok() {}
        observer.end_updates();
        assert!(handle.try_recv().is_err());
    }

    #[test]
    fn test_detach_ends_pending_batch() {
        let (mut observer, handle) = ChannelObserver::with_capacity(2);
        observer.begin_updates();
        observer.edit(&Edit::SectionInserted(0));
        observer.edit(&Edit::SectionInserted(1));
        assert!(observer.is_detached());

        let consumer = std::thread::spawn(move || {
            let result = handle.recv_batch();
            (result, handle)
        });
        observer.end_updates();

        // The observer is still alive, yet the consumer is released.
        let (result, handle) = consumer.join().unwrap();
        assert_eq!(result, Err(RecvError));
        assert!(matches!(handle.try_recv(), Err(TryRecvError::Disconnected)));
        drop(observer);
    }

    #[test]
    fn test_disconnected_consumer_is_ignored() {
        let (mut observer, handle) = ChannelObserver::new();
        drop(handle);
        observer.begin_updates();
        observer.end_updates();
        assert!(observer.is_detached());
    }

    #[test]
    fn test_recv_batch() {
        let (mut observer, handle) = ChannelObserver::new();
        observer.begin_updates();
        observer.edit(&Edit::SectionDeleted(3));
        observer.end_updates();
        assert_eq!(handle.recv_batch().unwrap(), vec![Edit::SectionDeleted(3)]);
    }
}
