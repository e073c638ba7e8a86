//! Change notifications for consumers.

use tokio::sync::broadcast;
use tracing::trace;

use crate::model::{LayerId, PatchId, SiteId};

/// Default number of events buffered per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Something a consumer may need to redraw for.
#[derive(Debug, Clone, PartialEq)]
pub enum DataEvent {
    /// A patch started or stopped being drawn.
    PatchVisibilityChanged {
        layer: LayerId,
        patch: PatchId,
        visible: bool,
    },
    PatchLoaded {
        patch: PatchId,
    },
    PatchLoadFailed {
        patch: PatchId,
        error: String,
    },
    /// A layer's value filter changed; values are normalized 0-1.
    FilterChanged {
        layer: LayerId,
        min: f32,
        max: f32,
    },
    /// A layer's effective opacity changed.
    OpacityChanged {
        layer: LayerId,
        opacity: f32,
    },
    SiteChanged {
        previous: Option<SiteId>,
        current: Option<SiteId>,
    },
    /// Progress of the current burst of loads.
    LoadProgress {
        finished: usize,
        total: usize,
    },
}

/// Fan-out of [`DataEvent`]s. Events sent with no subscriber are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DataEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DataEvent> {
        self.sender.subscribe()
    }

    /// Sends an event and returns how many subscribers received it.
    pub fn emit(&self, event: DataEvent) -> usize {
        trace!(?event, "Event");
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::default();
        assert_eq!(bus.emit(DataEvent::PatchLoaded { patch: PatchId::new(0) }), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.emit(DataEvent::PatchLoaded { patch: PatchId::new(1) });
        bus.emit(DataEvent::LoadProgress { finished: 1, total: 1 });
        assert_eq!(
            rx.recv().await.unwrap(),
            DataEvent::PatchLoaded { patch: PatchId::new(1) }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            DataEvent::LoadProgress { finished: 1, total: 1 }
        );
    }
}
