pub mod adapter;
pub mod config;
pub mod error;
pub mod events;
pub mod network;
pub mod relay;
pub mod server;
pub mod session;

pub use error::{CastError, Result};

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Media file extensions the receivers can actually play.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    // Video
    "mp4", "webm", "mkv", "avi", "mov", "m4v",
    // Audio
    "mp3", "flac", "wav", "ogg", "opus", "aac", "m4a",
    // Image
    "jpg", "jpeg", "png", "gif", "webp", "bmp",
];

/// Returns true if the path's extension is in [`SUPPORTED_EXTENSIONS`].
pub fn is_supported_media(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

/// Kind of discovered receiver device
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    CastReceiver,
    RokuReceiver,
    /// Reserved; no adapter implemented yet.
    AirPlayReceiver,
}

impl DeviceKind {
    pub fn label(&self) -> &'static str {
        match self {
            DeviceKind::CastReceiver => "cast",
            DeviceKind::RokuReceiver => "roku",
            DeviceKind::AirPlayReceiver => "airplay",
        }
    }
}

/// What a device kind can be asked to do. Gaps are explicit: the session
/// manager surfaces UnsupportedOperation instead of silently dropping a
/// command the protocol cannot express.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub supports_seek: bool,
    pub supports_volume: bool,
    pub supports_mute: bool,
}

impl DeviceCapabilities {
    pub fn for_kind(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::CastReceiver => Self {
                supports_seek: true,
                supports_volume: true,
                supports_mute: true,
            },
            // ECP exposes only coarse keypress controls.
            DeviceKind::RokuReceiver | DeviceKind::AirPlayReceiver => Self {
                supports_seek: false,
                supports_volume: false,
                supports_mute: false,
            },
        }
    }
}

/// A discovered device on the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub kind: DeviceKind,
    pub addr: IpAddr,
    pub port: u16,
    pub model: String,
    pub capabilities: DeviceCapabilities,
    pub last_seen: DateTime<Utc>,
}

impl Device {
    pub fn new(name: String, kind: DeviceKind, addr: IpAddr, port: u16, model: String) -> Self {
        Self {
            id: format!("{}:{}:{}", kind.label(), addr, port),
            name,
            kind,
            addr,
            port,
            model,
            capabilities: DeviceCapabilities::for_kind(kind),
            last_seen: Utc::now(),
        }
    }

    pub fn is_stale(&self, grace: std::time::Duration) -> bool {
        let elapsed = Utc::now().signed_duration_since(self.last_seen);
        elapsed.num_seconds() > grace.as_secs() as i64
    }
}

/// The media a session is (or will be) playing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaRef {
    pub url: String,
    pub title: String,
    pub content_type: String,
}

impl MediaRef {
    /// Reference a remote URL, guessing the content type from its path.
    pub fn remote(url: impl Into<String>, title: impl Into<String>) -> Self {
        let url = url.into();
        let content_type = mime_guess::from_path(&url)
            .first()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "video/mp4".to_string());
        let title = title.into();
        Self {
            title: if title.is_empty() { url.clone() } else { title },
            url,
            content_type,
        }
    }
}

/// Playback status of the bound device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    Idle,
    Loading,
    Playing,
    Paused,
    Stopped,
    Error,
}

/// Snapshot of device playback state, mutated only by the session manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    pub media: Option<MediaRef>,
    /// Seconds from the start of the media, never negative.
    pub position: f64,
    /// Seconds; None when the device has not reported one.
    pub duration: Option<f64>,
    /// Percent, clamped to 0..=100.
    pub volume: u8,
    pub muted: bool,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            status: PlaybackStatus::Idle,
            media: None,
            position: 0.0,
            duration: None,
            volume: 100,
            muted: false,
        }
    }
}

impl PlaybackState {
    /// Clamp position/volume so the published snapshot always honors the
    /// data-model invariants.
    pub fn normalize(&mut self) {
        self.position = self.position.max(0.0);
        if let Some(d) = self.duration {
            if d >= 0.0 {
                self.position = self.position.min(d);
            }
        }
        self.volume = self.volume.min(100);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn supported_extensions_cover_common_media() {
        for ext in ["mp4", "webm", "mkv", "mp3", "flac", "jpg", "png"] {
            assert!(
                SUPPORTED_EXTENSIONS.contains(&ext),
                "{ext} should be supported"
            );
        }
        for ext in ["exe", "zip", "pdf", "docx"] {
            assert!(!SUPPORTED_EXTENSIONS.contains(&ext));
        }
    }

    #[test]
    fn supported_media_check_is_case_insensitive() {
        assert!(is_supported_media(Path::new("/videos/Movie.MP4")));
        assert!(!is_supported_media(Path::new("/videos/notes.txt")));
        assert!(!is_supported_media(Path::new("/videos/noext")));
    }

    #[test]
    fn device_id_is_stable_across_rediscovery() {
        let addr: IpAddr = "192.168.1.42".parse().unwrap();
        let a = Device::new("TV".into(), DeviceKind::CastReceiver, addr, 8009, "X".into());
        let b = Device::new(
            "TV renamed".into(),
            DeviceKind::CastReceiver,
            addr,
            8009,
            "Y".into(),
        );
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn normalize_clamps_position_and_volume() {
        let mut state = PlaybackState {
            position: 120.0,
            duration: Some(100.0),
            volume: 100,
            ..Default::default()
        };
        state.normalize();
        assert_eq!(state.position, 100.0);

        let mut state = PlaybackState {
            position: -5.0,
            ..Default::default()
        };
        state.normalize();
        assert_eq!(state.position, 0.0);
    }

    #[test]
    fn media_ref_guesses_content_type() {
        let m = MediaRef::remote("http://example.com/clip.mp3", "");
        assert_eq!(m.content_type, "audio/mpeg");
        assert_eq!(m.title, "http://example.com/clip.mp3");

        let m = MediaRef::remote("http://example.com/stream", "Live");
        assert_eq!(m.content_type, "video/mp4");
        assert_eq!(m.title, "Live");
    }
}
