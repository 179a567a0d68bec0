//! JSON-over-SSE framing shared by every streaming endpoint: one typed
//! `DeviceEvent` receiver per device, rendered into this transport's wire
//! form instead of `dm-grpc`'s `PushUpdates` proto message.

use std::convert::Infallible;

use axum::response::sse::Event;
use serde::Serialize;

pub fn json_event<T: Serialize>(item: &T) -> Result<Event, Infallible> {
    match serde_json::to_string(item) {
        Ok(data) => Ok(Event::default().data(data)),
        Err(err) => Ok(Event::default().event("error").data(err.to_string())),
    }
}
