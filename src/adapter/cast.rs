use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use rust_cast::channels::media::{Media, PlayerState, StatusEntry, StreamType};
use rust_cast::channels::receiver::CastDeviceApp;
use rust_cast::CastDevice;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::StatusSnapshot;
use crate::{CastError, Device, MediaRef, PlaybackStatus, Result};

// The receiver platform connection, always present once the TLS socket is up.
const RECEIVER_DESTINATION: &str = "receiver-0";

/// Async handle to a Cast receiver. The rust_cast client is synchronous and
/// owns a TLS socket, so a dedicated worker thread holds the connection and
/// commands cross over a channel, one in flight at a time.
pub struct CastAdapter {
    tx: Sender<Request>,
    reply_timeout: Duration,
}

enum Command {
    Load(MediaRef),
    Play,
    Pause,
    Stop,
    Seek(f64),
    SetVolume(u8),
    SetMute(bool),
    PollStatus,
    Disconnect,
}

struct Request {
    command: Command,
    reply: oneshot::Sender<Result<StatusSnapshot>>,
}

impl CastAdapter {
    pub async fn connect(device: &Device, timeout: Duration) -> Result<Self> {
        let host = device.addr.to_string();
        let port = device.port;
        let name = device.name.clone();
        let (tx, rx) = crossbeam_channel::unbounded::<Request>();
        let (ready_tx, ready_rx) = oneshot::channel();

        thread::Builder::new()
            .name(format!("cast-{}", device.addr))
            .spawn(move || worker(host, port, name, ready_tx, rx))
            .map_err(|e| CastError::Connection(format!("failed to spawn cast worker: {e}")))?;

        match tokio::time::timeout(timeout, ready_rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(CastError::Connection("cast worker exited".into())),
            Err(_) => {
                return Err(CastError::Connection(format!(
                    "connection timed out after {}s",
                    timeout.as_secs()
                )))
            }
        }

        Ok(Self {
            tx,
            reply_timeout: timeout,
        })
    }

    async fn send(&self, command: Command) -> Result<StatusSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Request {
                command,
                reply: reply_tx,
            })
            .map_err(|_| CastError::Connection("cast worker is gone".into()))?;
        match tokio::time::timeout(self.reply_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CastError::Connection("cast worker dropped reply".into())),
            Err(_) => Err(CastError::Command("device did not answer in time".into())),
        }
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.send(Command::Disconnect).await.map(|_| ())
    }

    pub async fn load(&self, media: &MediaRef) -> Result<()> {
        self.send(Command::Load(media.clone())).await.map(|_| ())
    }

    pub async fn play(&self) -> Result<()> {
        self.send(Command::Play).await.map(|_| ())
    }

    pub async fn pause(&self) -> Result<()> {
        self.send(Command::Pause).await.map(|_| ())
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(Command::Stop).await.map(|_| ())
    }

    pub async fn seek(&self, target: f64) -> Result<()> {
        self.send(Command::Seek(target)).await.map(|_| ())
    }

    pub async fn set_volume(&self, level: u8) -> Result<()> {
        self.send(Command::SetVolume(level)).await.map(|_| ())
    }

    pub async fn set_mute(&self, muted: bool) -> Result<()> {
        self.send(Command::SetMute(muted)).await.map(|_| ())
    }

    pub async fn poll_status(&self) -> Result<StatusSnapshot> {
        self.send(Command::PollStatus).await
    }
}

/// Worker thread body. Connects, launches the default media receiver, then
/// serves commands until Disconnect or channel close.
fn worker(
    host: String,
    port: u16,
    name: String,
    ready: oneshot::Sender<Result<()>>,
    rx: Receiver<Request>,
) {
    let (cast_device, transport_id, session_id) = match open(&host, port) {
        Ok(conn) => {
            let _ = ready.send(Ok(()));
            conn
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    info!("Connected to Cast receiver {} at {}:{}", name, host, port);

    let mut media_session_id: Option<i32> = None;

    while let Ok(request) = rx.recv() {
        let disconnect = matches!(request.command, Command::Disconnect);
        let result = handle(
            &cast_device,
            &transport_id,
            &session_id,
            &mut media_session_id,
            request.command,
        );
        let _ = request.reply.send(result);
        if disconnect {
            break;
        }
    }
    debug!("Cast worker for {} shutting down", name);
}

fn open(host: &str, port: u16) -> Result<(CastDevice<'static>, String, String)> {
    let cast_device = CastDevice::connect_without_host_verification(host.to_string(), port)
        .map_err(|e| CastError::Connection(format!("failed to reach {host}:{port}: {e}")))?;
    cast_device
        .connection
        .connect(RECEIVER_DESTINATION)
        .map_err(|e| CastError::Connection(format!("receiver handshake failed: {e}")))?;
    if let Err(e) = cast_device.heartbeat.ping() {
        warn!("Heartbeat ping failed: {}", e);
    }
    let app = cast_device
        .receiver
        .launch_app(&CastDeviceApp::DefaultMediaReceiver)
        .map_err(|e| CastError::Connection(format!("failed to launch media receiver: {e}")))?;
    cast_device
        .connection
        .connect(app.transport_id.as_str())
        .map_err(|e| CastError::Connection(format!("media receiver handshake failed: {e}")))?;
    let transport_id = app.transport_id.to_string();
    let session_id = app.session_id.to_string();
    Ok((cast_device, transport_id, session_id))
}

fn handle(
    cast_device: &CastDevice<'_>,
    transport_id: &str,
    session_id: &str,
    media_session_id: &mut Option<i32>,
    command: Command,
) -> Result<StatusSnapshot> {
    match command {
        Command::Load(media) => {
            let payload = Media {
                content_id: media.url.clone(),
                content_type: media.content_type.clone(),
                stream_type: StreamType::Buffered,
                duration: None,
                metadata: None,
            };
            let status = cast_device
                .media
                .load(transport_id, session_id, &payload)
                .map_err(|e| CastError::Load(format!("{e}")))?;
            *media_session_id = status.entries.first().map(|e| e.media_session_id);
            Ok(StatusSnapshot::default())
        }
        Command::Play => {
            let msid = require_media_session(media_session_id)?;
            cast_device
                .media
                .play(transport_id, msid)
                .map_err(|e| CastError::Command(format!("play failed: {e}")))?;
            Ok(StatusSnapshot::default())
        }
        Command::Pause => {
            let msid = require_media_session(media_session_id)?;
            cast_device
                .media
                .pause(transport_id, msid)
                .map_err(|e| CastError::Command(format!("pause failed: {e}")))?;
            Ok(StatusSnapshot::default())
        }
        Command::Stop => {
            if let Some(msid) = *media_session_id {
                cast_device
                    .media
                    .stop(transport_id, msid)
                    .map_err(|e| CastError::Command(format!("stop failed: {e}")))?;
                *media_session_id = None;
            }
            Ok(StatusSnapshot::default())
        }
        Command::Seek(target) => {
            let msid = require_media_session(media_session_id)?;
            cast_device
                .media
                .seek(transport_id, msid, Some(target as f32), None)
                .map_err(|e| CastError::Command(format!("seek failed: {e}")))?;
            Ok(StatusSnapshot::default())
        }
        Command::SetVolume(level) => {
            let level = f32::from(level.min(100)) / 100.0;
            cast_device
                .receiver
                .set_volume(level)
                .map_err(|e| CastError::Command(format!("volume change failed: {e}")))?;
            Ok(StatusSnapshot::default())
        }
        Command::SetMute(muted) => {
            cast_device
                .receiver
                .set_volume(muted)
                .map_err(|e| CastError::Command(format!("mute change failed: {e}")))?;
            Ok(StatusSnapshot::default())
        }
        Command::PollStatus => poll(cast_device, transport_id, media_session_id),
        Command::Disconnect => {
            let _ = cast_device.receiver.stop_app(session_id);
            let _ = cast_device.connection.disconnect(transport_id);
            Ok(StatusSnapshot::default())
        }
    }
}

fn require_media_session(media_session_id: &Option<i32>) -> Result<i32> {
    media_session_id.ok_or_else(|| CastError::Command("no media loaded on receiver".into()))
}

fn poll(
    cast_device: &CastDevice<'_>,
    transport_id: &str,
    media_session_id: &mut Option<i32>,
) -> Result<StatusSnapshot> {
    let status = cast_device
        .media
        .get_status(transport_id, None)
        .map_err(|e| CastError::Status(format!("{e}")))?;

    let mut snapshot = StatusSnapshot::default();
    if let Some(entry) = status.entries.first() {
        *media_session_id = Some(entry.media_session_id);
        snapshot = entry_snapshot(entry);
    } else {
        // No entries means the media session ended on the device side.
        *media_session_id = None;
        snapshot.status = Some(PlaybackStatus::Idle);
    }

    // Volume lives on the receiver channel, not the media channel.
    match cast_device.receiver.get_status() {
        Ok(receiver_status) => {
            snapshot.volume = receiver_status
                .volume
                .level
                .map(|level| (level.clamp(0.0, 1.0) * 100.0).round() as u8);
            snapshot.muted = receiver_status.volume.muted;
        }
        Err(e) => debug!("Receiver status poll failed: {}", e),
    }

    Ok(snapshot)
}

fn entry_snapshot(entry: &StatusEntry) -> StatusSnapshot {
    let status = match entry.player_state {
        PlayerState::Idle => PlaybackStatus::Idle,
        PlayerState::Buffering => PlaybackStatus::Loading,
        PlayerState::Playing => PlaybackStatus::Playing,
        PlayerState::Paused => PlaybackStatus::Paused,
    };
    StatusSnapshot {
        status: Some(status),
        position: entry.current_time.map(f64::from),
        duration: entry
            .media
            .as_ref()
            .and_then(|m| m.duration)
            .map(f64::from),
        volume: None,
        muted: None,
    }
}
