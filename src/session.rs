use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapter::{Adapter, StatusSnapshot};
use crate::config::Config;
use crate::events;
use crate::{CastError, Device, MediaRef, PlaybackState, PlaybackStatus, Result};

/// Where a seek should land, as typed by a user: `+30`, `-10`, `90`,
/// `1:30` or `1:02:03`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeekTarget {
    Relative(f64),
    Absolute(f64),
}

/// Parse a seek expression. Signed numbers are relative offsets in seconds,
/// unsigned numbers and clock forms are absolute positions.
pub fn parse_seek_target(input: &str) -> Option<SeekTarget> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Some(rest) = input.strip_prefix('+') {
        return rest.parse::<f64>().ok().map(SeekTarget::Relative);
    }
    if let Some(rest) = input.strip_prefix('-') {
        return rest.parse::<f64>().ok().map(|s| SeekTarget::Relative(-s));
    }
    if input.contains(':') {
        let parts: Vec<&str> = input.split(':').collect();
        if parts.len() > 3 {
            return None;
        }
        let mut seconds = 0.0;
        for part in &parts {
            let value = part.parse::<f64>().ok()?;
            if value < 0.0 {
                return None;
            }
            seconds = seconds * 60.0 + value;
        }
        return Some(SeekTarget::Absolute(seconds));
    }
    input
        .parse::<f64>()
        .ok()
        .filter(|s| *s >= 0.0)
        .map(SeekTarget::Absolute)
}

/// The one live session, if any. Owns the adapter connection, the playback
/// state and the pending-command flag.
pub struct Session {
    pub device: Device,
    adapter: Adapter,
    state: Mutex<PlaybackState>,
    pending: AtomicBool,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    fn new(device: Device, adapter: Adapter) -> Arc<Self> {
        Arc::new(Self {
            device,
            adapter,
            state: Mutex::new(PlaybackState::default()),
            pending: AtomicBool::new(false),
            poll_task: Mutex::new(None),
        })
    }

    pub fn state(&self) -> PlaybackState {
        self.state.lock().unwrap().clone()
    }

    /// Claim the command slot. Fails with Busy instead of queueing, so a
    /// stale ack can never race a newer command's state update.
    fn begin_command(&self) -> Result<CommandGuard<'_>> {
        if self
            .pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CastError::Busy);
        }
        Ok(CommandGuard { session: self })
    }

    fn mutate_state(&self, f: impl FnOnce(&mut PlaybackState)) -> PlaybackState {
        let mut state = self.state.lock().unwrap();
        f(&mut state);
        state.normalize();
        state.clone()
    }

    fn stop_polling(&self) {
        if let Some(task) = self.poll_task.lock().unwrap().take() {
            task.abort();
        }
    }
}

struct CommandGuard<'a> {
    session: &'a Session,
}

impl Drop for CommandGuard<'_> {
    fn drop(&mut self) {
        self.session.pending.store(false, Ordering::SeqCst);
    }
}

/// Single writer for session lifecycle and playback commands. Everything
/// else reads snapshots or listens on the event channel.
pub struct SessionManager {
    config: Config,
    active: RwLock<Option<Arc<Session>>>,
}

impl SessionManager {
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            config,
            active: RwLock::new(None),
        })
    }

    /// Bind to a device, tearing down any existing session first. Exactly
    /// one session exists process-wide.
    pub async fn bind(self: &Arc<Self>, device: Device) -> Result<Device> {
        self.unbind().await;
        let adapter = Adapter::connect(&device, self.config.connect_timeout()).await?;
        self.install(device, adapter).await
    }

    async fn install(self: &Arc<Self>, device: Device, adapter: Adapter) -> Result<Device> {
        let session = Session::new(device.clone(), adapter);
        *session.poll_task.lock().unwrap() = Some(tokio::spawn(poll_loop(
            Arc::clone(&session),
            self.config.poll_interval(),
            self.config.session.miss_threshold,
        )));
        *self.active.write().await = Some(session);
        info!("Bound session to {} ({})", device.name, device.id);
        events::broadcast_event(events::CastEvent::SessionBound {
            device: device.clone(),
        });
        Ok(device)
    }

    /// Tear down the active session, cancelling its poll loop. Safe to call
    /// with nothing bound.
    pub async fn unbind(&self) {
        let previous = self.active.write().await.take();
        if let Some(session) = previous {
            session.stop_polling();
            if let Err(e) = session.adapter.disconnect().await {
                debug!("Disconnect from {} failed: {}", session.device.name, e);
            }
            info!("Unbound session from {}", session.device.name);
            events::broadcast_event(events::CastEvent::SessionUnbound {
                device_id: session.device.id.clone(),
            });
        }
    }

    pub async fn current_device(&self) -> Option<Device> {
        self.active.read().await.as_ref().map(|s| s.device.clone())
    }

    pub async fn state(&self) -> Option<PlaybackState> {
        self.active.read().await.as_ref().map(|s| s.state())
    }

    pub async fn has_session(&self) -> bool {
        self.active.read().await.is_some()
    }

    async fn session(&self) -> Result<Arc<Session>> {
        self.active
            .read()
            .await
            .as_ref()
            .cloned()
            .ok_or(CastError::NoActiveSession)
    }

    /// Start playing a media reference on the bound device. The session
    /// enters Loading; the next confirming poll moves it to Playing. A load
    /// failure demotes to Error but keeps the session bound so the user can
    /// retry.
    pub async fn cast(&self, media: MediaRef) -> Result<()> {
        let session = self.session().await?;
        let guard = session.begin_command()?;

        let state = session.mutate_state(|s| {
            s.status = PlaybackStatus::Loading;
            s.media = Some(media.clone());
            s.position = 0.0;
            s.duration = None;
        });
        events::notify_state_changed(state);

        match session.adapter.load(&media).await {
            Ok(()) => {
                info!("Loading {} on {}", media.title, session.device.name);
                Ok(())
            }
            Err(e) => {
                warn!("Load failed on {}: {}", session.device.name, e);
                let state = session.mutate_state(|s| s.status = PlaybackStatus::Error);
                events::notify_state_changed(state);
                drop(guard);
                Err(e)
            }
        }
    }

    /// Toggle between play and pause based on the last known status.
    pub async fn play_pause(&self) -> Result<()> {
        let session = self.session().await?;
        let _guard = session.begin_command()?;
        let playing = session.state().status == PlaybackStatus::Playing;
        if playing {
            session.adapter.pause().await?;
            let state = session.mutate_state(|s| s.status = PlaybackStatus::Paused);
            events::notify_state_changed(state);
        } else {
            session.adapter.play().await?;
            let state = session.mutate_state(|s| s.status = PlaybackStatus::Playing);
            events::notify_state_changed(state);
        }
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let session = self.session().await?;
        let _guard = session.begin_command()?;
        session.adapter.stop().await?;
        let state = session.mutate_state(|s| {
            s.status = PlaybackStatus::Stopped;
            s.position = 0.0;
        });
        events::notify_state_changed(state);
        Ok(())
    }

    /// Seek relative to the current position. Refused up front on devices
    /// that cannot seek; the position is left untouched in that case.
    pub async fn seek(&self, delta: f64) -> Result<()> {
        let session = self.session().await?;
        if !session.device.capabilities.supports_seek {
            return Err(CastError::Unsupported(format!(
                "{} devices cannot seek",
                session.device.kind.label()
            )));
        }
        let _guard = session.begin_command()?;
        let current = session.state();
        let target = clamp_seek(current.position + delta, current.duration);
        session.adapter.seek(target).await?;
        let state = session.mutate_state(|s| s.position = target);
        events::notify_state_changed(state);
        Ok(())
    }

    /// Seek to a parsed target, relative or absolute.
    pub async fn seek_to(&self, target: SeekTarget) -> Result<()> {
        match target {
            SeekTarget::Relative(delta) => self.seek(delta).await,
            SeekTarget::Absolute(position) => {
                let session = self.session().await?;
                if !session.device.capabilities.supports_seek {
                    return Err(CastError::Unsupported(format!(
                        "{} devices cannot seek",
                        session.device.kind.label()
                    )));
                }
                let _guard = session.begin_command()?;
                let position = clamp_seek(position, session.state().duration);
                session.adapter.seek(position).await?;
                let state = session.mutate_state(|s| s.position = position);
                events::notify_state_changed(state);
                Ok(())
            }
        }
    }

    pub async fn set_volume(&self, level: u8) -> Result<()> {
        let session = self.session().await?;
        if !session.device.capabilities.supports_volume {
            return Err(CastError::Unsupported(format!(
                "{} devices cannot set volume",
                session.device.kind.label()
            )));
        }
        let _guard = session.begin_command()?;
        let level = level.min(100);
        session.adapter.set_volume(level).await?;
        let state = session.mutate_state(|s| s.volume = level);
        events::notify_state_changed(state);
        Ok(())
    }

    pub async fn toggle_mute(&self) -> Result<()> {
        let session = self.session().await?;
        if !session.device.capabilities.supports_mute {
            return Err(CastError::Unsupported(format!(
                "{} devices cannot mute",
                session.device.kind.label()
            )));
        }
        let _guard = session.begin_command()?;
        let muted = !session.state().muted;
        session.adapter.set_mute(muted).await?;
        let state = session.mutate_state(|s| s.muted = muted);
        events::notify_state_changed(state);
        Ok(())
    }

    #[cfg(test)]
    pub async fn bind_mock(
        self: &Arc<Self>,
        device: Device,
        mock: crate::adapter::mock::MockAdapter,
    ) -> Result<Device> {
        self.unbind().await;
        self.install(device, Adapter::Mock(mock)).await
    }

    #[cfg(test)]
    pub async fn active_session(&self) -> Option<Arc<Session>> {
        self.active.read().await.clone()
    }
}

/// Background status loop for one session. Merges device reports into the
/// published state; after `miss_threshold` consecutive failures the session
/// demotes to Error and device loss is announced once per failure run.
async fn poll_loop(session: Arc<Session>, interval: Duration, miss_threshold: u32) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut misses: u32 = 0;

    loop {
        ticker.tick().await;

        // Commands hold the slot; skip the cycle rather than racing one.
        let Ok(_guard) = session.begin_command() else {
            continue;
        };

        match session.adapter.poll_status().await {
            Ok(snapshot) => {
                let recovered = misses >= miss_threshold;
                misses = 0;
                let before = session.state();
                let after = session.mutate_state(|s| merge_snapshot(s, &snapshot, recovered));
                if after != before {
                    events::notify_state_changed(after);
                }
            }
            Err(e) => {
                misses = misses.saturating_add(1);
                debug!(
                    "Status poll miss {}/{} for {}: {}",
                    misses, miss_threshold, session.device.name, e
                );
                if misses == miss_threshold {
                    warn!("Lost contact with {}: {}", session.device.name, e);
                    let state = session.mutate_state(|s| s.status = PlaybackStatus::Error);
                    events::notify_state_changed(state);
                    events::notify_device_lost(session.device.id.clone(), e.to_string());
                }
            }
        }
    }
}

/// Keep a seek target inside the playable span. Without a known duration
/// only the lower bound applies.
fn clamp_seek(target: f64, duration: Option<f64>) -> f64 {
    let target = target.max(0.0);
    match duration {
        Some(duration) if duration >= 0.0 => target.min(duration),
        _ => target,
    }
}

/// Fold one device report into the session state. Fields the device did not
/// report keep their previous value. An Error state is only left when the
/// poll run has recovered, so transient report gaps do not mask a loss.
fn merge_snapshot(state: &mut PlaybackState, snapshot: &StatusSnapshot, recovered: bool) {
    if state.status == PlaybackStatus::Error && !recovered && snapshot.status.is_none() {
        return;
    }
    if let Some(status) = snapshot.status {
        // Loading is confirmed as Playing by the device, not by the ack.
        state.status = status;
    } else if recovered {
        state.status = PlaybackStatus::Idle;
    }
    if let Some(position) = snapshot.position {
        state.position = position;
    }
    if let Some(duration) = snapshot.duration {
        state.duration = Some(duration);
    }
    if let Some(volume) = snapshot.volume {
        state.volume = volume;
    }
    if let Some(muted) = snapshot.muted {
        state.muted = muted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::mock::MockAdapter;
    use crate::DeviceKind;
    use std::sync::atomic::Ordering;

    fn test_device(kind: DeviceKind) -> Device {
        Device::new(
            "LivingRoomTV".into(),
            kind,
            "192.168.1.50".parse().unwrap(),
            8009,
            "Chromecast".into(),
        )
    }

    fn manager() -> Arc<SessionManager> {
        // Slow poll cadence so tests control state explicitly.
        let mut config = Config::default();
        config.session.poll_interval_ms = 60_000;
        SessionManager::new(config)
    }

    #[tokio::test]
    async fn bind_is_exclusive() {
        let manager = manager();
        let first = test_device(DeviceKind::CastReceiver);
        manager
            .bind_mock(first.clone(), MockAdapter::new())
            .await
            .unwrap();
        assert_eq!(manager.current_device().await.unwrap().id, first.id);

        let second = Device::new(
            "Bedroom".into(),
            DeviceKind::CastReceiver,
            "192.168.1.51".parse().unwrap(),
            8009,
            "Chromecast".into(),
        );
        manager
            .bind_mock(second.clone(), MockAdapter::new())
            .await
            .unwrap();
        assert_eq!(manager.current_device().await.unwrap().id, second.id);

        manager.unbind().await;
        assert!(manager.current_device().await.is_none());
    }

    #[tokio::test]
    async fn commands_without_session_fail() {
        let manager = manager();
        assert!(matches!(
            manager.play_pause().await,
            Err(CastError::NoActiveSession)
        ));
        assert!(matches!(
            manager.cast(MediaRef::remote("http://x/y.mp4", "")).await,
            Err(CastError::NoActiveSession)
        ));
    }

    #[tokio::test]
    async fn concurrent_command_is_rejected_busy() {
        let manager = manager();
        let mock = MockAdapter::new();
        *mock.command_delay.lock().unwrap() = Some(Duration::from_millis(200));
        manager
            .bind_mock(test_device(DeviceKind::CastReceiver), mock)
            .await
            .unwrap();

        let m = Arc::clone(&manager);
        let slow = tokio::spawn(async move { m.play_pause().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let before = manager.state().await.unwrap();
        let result = manager.stop().await;
        assert!(matches!(result, Err(CastError::Busy)));
        // A rejected command must not touch the published state.
        assert_eq!(manager.state().await.unwrap(), before);

        slow.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cast_enters_loading_then_playing_on_poll() {
        let manager = manager();
        manager
            .bind_mock(test_device(DeviceKind::CastReceiver), MockAdapter::new())
            .await
            .unwrap();

        manager
            .cast(MediaRef::remote("http://10.0.0.2:8765/media/abc.mp4", "movie"))
            .await
            .unwrap();
        assert_eq!(
            manager.state().await.unwrap().status,
            PlaybackStatus::Loading
        );

        // Drive one poll cycle by hand; the mock reports Playing after load.
        let session = manager.active_session().await.unwrap();
        let snapshot = session.adapter.poll_status().await.unwrap();
        let state = session.mutate_state(|s| merge_snapshot(s, &snapshot, false));
        assert_eq!(state.status, PlaybackStatus::Playing);
        assert_eq!(state.duration, Some(120.0));
        assert!(state.media.is_some());
    }

    #[tokio::test]
    async fn unsupported_seek_leaves_position_unchanged() {
        let manager = manager();
        manager
            .bind_mock(test_device(DeviceKind::RokuReceiver), MockAdapter::new())
            .await
            .unwrap();
        manager
            .cast(MediaRef::remote("http://10.0.0.2:8765/media/abc.mp4", ""))
            .await
            .unwrap();

        let before = manager.state().await.unwrap().position;
        let result = manager.seek(10.0).await;
        assert!(matches!(result, Err(CastError::Unsupported(_))));
        assert_eq!(manager.state().await.unwrap().position, before);
    }

    #[tokio::test]
    async fn relative_seek_clamps_at_zero() {
        let manager = manager();
        manager
            .bind_mock(test_device(DeviceKind::CastReceiver), MockAdapter::new())
            .await
            .unwrap();
        manager.seek(-30.0).await.unwrap();
        assert_eq!(manager.state().await.unwrap().position, 0.0);
    }

    #[tokio::test]
    async fn seek_clamps_to_known_duration() {
        let manager = manager();
        manager
            .bind_mock(test_device(DeviceKind::CastReceiver), MockAdapter::new())
            .await
            .unwrap();
        let session = manager.active_session().await.unwrap();
        session.mutate_state(|s| {
            s.duration = Some(120.0);
            s.position = 100.0;
        });

        // A relative jump far past the end lands on the last second.
        manager.seek(5000.0).await.unwrap();
        assert_eq!(manager.state().await.unwrap().position, 120.0);

        // So does an absolute target past the end.
        manager.seek_to(SeekTarget::Absolute(9999.0)).await.unwrap();
        assert_eq!(manager.state().await.unwrap().position, 120.0);
    }

    #[test]
    fn clamp_without_duration_only_floors() {
        assert_eq!(clamp_seek(-5.0, None), 0.0);
        assert_eq!(clamp_seek(9999.0, None), 9999.0);
        assert_eq!(clamp_seek(90.0, Some(120.0)), 90.0);
    }

    #[tokio::test]
    async fn volume_is_clamped_and_mute_toggles() {
        let manager = manager();
        manager
            .bind_mock(test_device(DeviceKind::CastReceiver), MockAdapter::new())
            .await
            .unwrap();

        manager.set_volume(200).await.unwrap();
        assert_eq!(manager.state().await.unwrap().volume, 100);

        manager.toggle_mute().await.unwrap();
        assert!(manager.state().await.unwrap().muted);
        manager.toggle_mute().await.unwrap();
        assert!(!manager.state().await.unwrap().muted);
    }

    #[tokio::test]
    async fn repeated_poll_misses_demote_to_error_once() {
        let mut config = Config::default();
        config.session.poll_interval_ms = 10;
        config.session.miss_threshold = 3;
        let manager = SessionManager::new(config);

        let mock = MockAdapter::new();
        mock.fail_polls.store(true, Ordering::SeqCst);
        manager
            .bind_mock(test_device(DeviceKind::CastReceiver), mock)
            .await
            .unwrap();

        let mut rx = events::subscribe();
        // Let well past 3 poll cycles elapse.
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(manager.state().await.unwrap().status, PlaybackStatus::Error);
        // Still bound: device loss does not auto-unbind.
        assert!(manager.has_session().await);

        let mut losses = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, events::CastEvent::DeviceLost { .. }) {
                losses += 1;
            }
        }
        assert_eq!(losses, 1, "one notification per failure run");

        manager.unbind().await;
    }

    #[test]
    fn seek_targets_parse() {
        assert_eq!(parse_seek_target("+30"), Some(SeekTarget::Relative(30.0)));
        assert_eq!(parse_seek_target("-10"), Some(SeekTarget::Relative(-10.0)));
        assert_eq!(parse_seek_target("90"), Some(SeekTarget::Absolute(90.0)));
        assert_eq!(parse_seek_target("1:30"), Some(SeekTarget::Absolute(90.0)));
        assert_eq!(
            parse_seek_target("1:02:03"),
            Some(SeekTarget::Absolute(3723.0))
        );
        assert_eq!(parse_seek_target(""), None);
        assert_eq!(parse_seek_target("abc"), None);
        assert_eq!(parse_seek_target("1:2:3:4"), None);
    }
}
