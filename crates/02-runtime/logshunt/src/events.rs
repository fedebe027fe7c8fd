use crossbeam_channel::{Receiver, Sender};

use crate::error::ShuntError;

/// Lifecycle signals raised by an [`Emitter`](crate::Emitter).
#[derive(Debug)]
pub enum EmitterEvent {
    /// Pending bytes were handed off; writes are no longer backed up.
    Drain,
    /// A transport error or a fatal drainer condition.
    Error(ShuntError),
    /// The emitter was destroyed. Always the last event.
    Close,
}

/// Unbounded event queue. All receivers share it, so each event is seen by
/// exactly one of them; nothing is discarded before it is received.
pub(crate) struct EventQueue {
    tx: Sender<EmitterEvent>,
    rx: Receiver<EmitterEvent>,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    pub(crate) fn subscribe(&self) -> Receiver<EmitterEvent> {
        self.rx.clone()
    }

    pub(crate) fn emit(&self, event: EmitterEvent) {
        // The queue holds its own receiver, so the send cannot fail.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::TransportError;

    #[test]
    fn unread_errors_survive_a_flood_of_drains() {
        let queue = EventQueue::new();
        let rx = queue.subscribe();
        let dropped = TransportError::new(12, false, anyhow::anyhow!("sink offline"));
        queue.emit(EmitterEvent::Error(dropped.into()));
        for _ in 0..10_000 {
            queue.emit(EmitterEvent::Drain);
        }
        queue.emit(EmitterEvent::Close);

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 10_002);
        assert!(matches!(
            events.first(),
            Some(EmitterEvent::Error(ShuntError::Transport(err))) if err.len == 12
        ));
        assert!(matches!(events.last(), Some(EmitterEvent::Close)));
    }
}
