pub mod cast;
pub mod roku;

#[cfg(test)]
pub mod mock;

use std::time::Duration;

use crate::{CastError, Device, DeviceKind, MediaRef, PlaybackStatus, Result};

/// What a status poll reports. Fields a protocol cannot express come back as
/// None and the session manager retains the previously known value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    pub status: Option<PlaybackStatus>,
    pub position: Option<f64>,
    pub duration: Option<f64>,
    pub volume: Option<u8>,
    pub muted: Option<bool>,
}

/// One live protocol client per bound device. A tagged variant set: dispatch
/// is a single match here, and the core never speaks a vendor wire protocol
/// directly.
pub enum Adapter {
    Cast(cast::CastAdapter),
    Roku(roku::RokuAdapter),
    #[cfg(test)]
    Mock(mock::MockAdapter),
}

impl Adapter {
    /// Connect the right client for the device kind.
    pub async fn connect(device: &Device, timeout: Duration) -> Result<Self> {
        match device.kind {
            DeviceKind::CastReceiver => Ok(Adapter::Cast(
                cast::CastAdapter::connect(device, timeout).await?,
            )),
            DeviceKind::RokuReceiver => Ok(Adapter::Roku(
                roku::RokuAdapter::connect(device, timeout).await?,
            )),
            DeviceKind::AirPlayReceiver => Err(CastError::Unsupported(
                "AirPlay receivers are not controllable yet".into(),
            )),
        }
    }

    pub async fn disconnect(&self) -> Result<()> {
        match self {
            Adapter::Cast(a) => a.disconnect().await,
            Adapter::Roku(a) => a.disconnect().await,
            #[cfg(test)]
            Adapter::Mock(a) => a.disconnect().await,
        }
    }

    /// Begin a device-side fetch of the media URL.
    pub async fn load(&self, media: &MediaRef) -> Result<()> {
        match self {
            Adapter::Cast(a) => a.load(media).await,
            Adapter::Roku(a) => a.load(media).await,
            #[cfg(test)]
            Adapter::Mock(a) => a.load(media).await,
        }
    }

    pub async fn play(&self) -> Result<()> {
        match self {
            Adapter::Cast(a) => a.play().await,
            Adapter::Roku(a) => a.play().await,
            #[cfg(test)]
            Adapter::Mock(a) => a.play().await,
        }
    }

    pub async fn pause(&self) -> Result<()> {
        match self {
            Adapter::Cast(a) => a.pause().await,
            Adapter::Roku(a) => a.pause().await,
            #[cfg(test)]
            Adapter::Mock(a) => a.pause().await,
        }
    }

    pub async fn stop(&self) -> Result<()> {
        match self {
            Adapter::Cast(a) => a.stop().await,
            Adapter::Roku(a) => a.stop().await,
            #[cfg(test)]
            Adapter::Mock(a) => a.stop().await,
        }
    }

    /// Seek to an absolute position in seconds.
    pub async fn seek(&self, target: f64) -> Result<()> {
        match self {
            Adapter::Cast(a) => a.seek(target).await,
            Adapter::Roku(a) => a.seek(target).await,
            #[cfg(test)]
            Adapter::Mock(a) => a.seek(target).await,
        }
    }

    /// Volume as a percentage, 0..=100.
    pub async fn set_volume(&self, level: u8) -> Result<()> {
        match self {
            Adapter::Cast(a) => a.set_volume(level).await,
            Adapter::Roku(a) => a.set_volume(level).await,
            #[cfg(test)]
            Adapter::Mock(a) => a.set_volume(level).await,
        }
    }

    pub async fn set_mute(&self, muted: bool) -> Result<()> {
        match self {
            Adapter::Cast(a) => a.set_mute(muted).await,
            Adapter::Roku(a) => a.set_mute(muted).await,
            #[cfg(test)]
            Adapter::Mock(a) => a.set_mute(muted).await,
        }
    }

    pub async fn poll_status(&self) -> Result<StatusSnapshot> {
        match self {
            Adapter::Cast(a) => a.poll_status().await,
            Adapter::Roku(a) => a.poll_status().await,
            #[cfg(test)]
            Adapter::Mock(a) => a.poll_status().await,
        }
    }
}
