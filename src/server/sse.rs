use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use tokio_stream::StreamExt as _;
use tracing::info;

use super::AppState;
use crate::events;

/// Live feed of device and playback changes for the remote page and any
/// other consumer.
pub async fn sse_handler(
    State(_state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected");

    let rx = events::subscribe();

    let stream = tokio_stream::wrappers::BroadcastStream::new(rx).map(|result| match result {
        Ok(event) => {
            let json = serde_json::to_string(&event).unwrap_or_default();
            Ok(Event::default().event("cast-event").data(json))
        }
        // Client lagged behind the broadcast buffer; tell it to resync.
        Err(_) => Ok(Event::default().event("sync-required").data("{}")),
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keep-alive"),
    )
}
