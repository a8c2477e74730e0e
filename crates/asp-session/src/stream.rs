//! Expose the unified event stream as a [`tokio_stream::Stream`] for
//! callers that would rather `.await` events than register a callback.

use crate::event::{Event, OnEvent};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Create an [`OnEvent`] sink paired with a [`Stream`](tokio_stream::Stream)
/// of the events it forwards. Pass the sink as
/// [`RunTurnInput::on_event`](crate::driver::RunTurnInput::on_event); poll
/// the stream to consume events in arrival order.
///
/// If the stream side is dropped, the sink silently discards further
/// events rather than panicking — a caller that stops polling mid-run
/// does not bring down the driver.
#[must_use]
pub fn event_stream() -> (OnEvent, UnboundedReceiverStream<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink: OnEvent = std::sync::Arc::new(move |event: Event| {
        let _ = tx.send(event);
    });
    (sink, UnboundedReceiverStream::new(rx))
}
