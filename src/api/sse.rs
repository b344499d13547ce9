//! Server-Sent Events support

use crate::runtime::{SseEvent, WidgetSnapshot};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Stream the current snapshot, then every later one until the session closes
pub fn sse_stream(
    snapshot: WidgetSnapshot,
    broadcast_rx: tokio::sync::broadcast::Receiver<SseEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let init = futures::stream::once(async move {
        let data = json!({ "type": "init", "snapshot": snapshot });
        Ok(Event::default().event("init").data(data.to_string()))
    });

    // Snapshots are full state, so a lagged client only needs the next one
    let broadcasts = BroadcastStream::new(broadcast_rx).filter_map(|result| match result {
        Ok(event) => Some(Ok(sse_event_to_axum(event))),
        Err(_) => None,
    });

    Sse::new(init.chain(broadcasts)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn sse_event_to_axum(event: SseEvent) -> Event {
    let (event_type, data) = match event {
        SseEvent::Snapshot { snapshot } => (
            "snapshot",
            json!({ "type": "snapshot", "snapshot": snapshot }),
        ),
        SseEvent::Closed => ("closed", json!({ "type": "closed" })),
    };

    Event::default().event(event_type).data(data.to_string())
}
