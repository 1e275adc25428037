//! Channel-backed event sink for tests.

use std::time::Duration;

use ch_client::{Event, EventSink};
use tokio::sync::mpsc;

/// Forwards every dispatched event into an unbounded channel.
pub struct ChannelSink(pub mpsc::UnboundedSender<Event>);

impl EventSink for ChannelSink {
    fn dispatch(&self, event: Event) {
        let _ = self.0.send(event);
    }
}

/// `(sink, receiver)` pair for wiring a session under test.
pub fn event_channel() -> (std::sync::Arc<ChannelSink>, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (std::sync::Arc::new(ChannelSink(tx)), rx)
}

/// Drain events until one matches the kind mask; panics on timeout.
pub async fn wait_for_kind(
    rx: &mut mpsc::UnboundedReceiver<Event>,
    mask: u64,
    timeout: Duration,
) -> Event {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let event = tokio::time::timeout_at(deadline, rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for event mask {mask:#x}"))
            .expect("event channel closed");
        if event.kind() & mask != 0 {
            return event;
        }
    }
}
