use tokio::sync::broadcast;

use crate::{Device, PlaybackState};

// Global event broadcaster; the SSE endpoint and any in-process consumer
// (the TUI) subscribe here.
lazy_static::lazy_static! {
    static ref EVENT_BROADCASTER: broadcast::Sender<CastEvent> = {
        let (tx, _) = broadcast::channel(100);
        tx
    };
}

/// Everything a consumer needs to render: device list changes, session
/// lifecycle, and playback state updates.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CastEvent {
    DeviceAdded { device: Device },
    DeviceRemoved { device_id: String },
    ScanFinished { found: usize },
    SessionBound { device: Device },
    SessionUnbound { device_id: String },
    StateChanged { state: PlaybackState },
    DeviceLost { device_id: String, reason: String },
    Error { message: String },
}

pub fn subscribe() -> broadcast::Receiver<CastEvent> {
    EVENT_BROADCASTER.subscribe()
}

pub fn broadcast_event(event: CastEvent) {
    // No subscribers is fine; events are advisory.
    let _ = EVENT_BROADCASTER.send(event);
}

pub fn notify_device_added(device: Device) {
    broadcast_event(CastEvent::DeviceAdded { device });
}

pub fn notify_device_removed(device_id: String) {
    broadcast_event(CastEvent::DeviceRemoved { device_id });
}

pub fn notify_state_changed(state: PlaybackState) {
    broadcast_event(CastEvent::StateChanged { state });
}

pub fn notify_device_lost(device_id: String, reason: String) {
    broadcast_event(CastEvent::DeviceLost { device_id, reason });
}

pub fn notify_error(message: String) {
    broadcast_event(CastEvent::Error { message });
}
