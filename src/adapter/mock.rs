//! Scriptable in-process adapter for session manager tests. No network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::StatusSnapshot;
use crate::{CastError, MediaRef, PlaybackStatus, Result};

#[derive(Default)]
pub struct MockAdapter {
    /// When set, every poll fails with a Status error.
    pub fail_polls: AtomicBool,
    /// When set, seeks are refused as Unsupported.
    pub refuse_seek: AtomicBool,
    /// When set, commands sleep this long before answering. Used to hold a
    /// command in flight while another is issued.
    pub command_delay: Mutex<Option<Duration>>,
    state: Mutex<StatusSnapshot>,
    calls: Mutex<Vec<String>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    async fn maybe_delay(&self) {
        let delay = *self.command_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.record("disconnect");
        Ok(())
    }

    pub async fn load(&self, media: &MediaRef) -> Result<()> {
        self.record("load");
        self.maybe_delay().await;
        let mut state = self.state.lock().unwrap();
        *state = StatusSnapshot {
            status: Some(PlaybackStatus::Playing),
            position: Some(0.0),
            duration: Some(120.0),
            volume: Some(50),
            muted: Some(false),
        };
        let _ = media;
        Ok(())
    }

    pub async fn play(&self) -> Result<()> {
        self.record("play");
        self.maybe_delay().await;
        self.state.lock().unwrap().status = Some(PlaybackStatus::Playing);
        Ok(())
    }

    pub async fn pause(&self) -> Result<()> {
        self.record("pause");
        self.maybe_delay().await;
        self.state.lock().unwrap().status = Some(PlaybackStatus::Paused);
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.record("stop");
        self.maybe_delay().await;
        let mut state = self.state.lock().unwrap();
        state.status = Some(PlaybackStatus::Stopped);
        state.position = Some(0.0);
        Ok(())
    }

    pub async fn seek(&self, target: f64) -> Result<()> {
        self.record("seek");
        if self.refuse_seek.load(Ordering::SeqCst) {
            return Err(CastError::Unsupported("seek refused".into()));
        }
        self.maybe_delay().await;
        self.state.lock().unwrap().position = Some(target.max(0.0));
        Ok(())
    }

    pub async fn set_volume(&self, level: u8) -> Result<()> {
        self.record("set_volume");
        self.state.lock().unwrap().volume = Some(level.min(100));
        Ok(())
    }

    pub async fn set_mute(&self, muted: bool) -> Result<()> {
        self.record("set_mute");
        self.state.lock().unwrap().muted = Some(muted);
        Ok(())
    }

    pub async fn poll_status(&self) -> Result<StatusSnapshot> {
        self.record("poll");
        if self.fail_polls.load(Ordering::SeqCst) {
            return Err(CastError::Status("mock poll failure".into()));
        }
        Ok(self.state.lock().unwrap().clone())
    }
}
