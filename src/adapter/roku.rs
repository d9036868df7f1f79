use std::time::Duration;

use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, info};

use super::StatusSnapshot;
use crate::{CastError, Device, MediaRef, PlaybackStatus, Result};

/// ECP client for a Roku receiver. ECP is plain unauthenticated HTTP on port
/// 8060, so there is no persistent connection to hold; each command is one
/// request against the device's base URL.
pub struct RokuAdapter {
    base: String,
    http: reqwest::Client,
}

impl RokuAdapter {
    /// Verifies the device answers `/query/device-info` before claiming a
    /// session exists.
    pub async fn connect(device: &Device, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CastError::Connection(format!("http client setup failed: {e}")))?;
        let base = format!("http://{}:{}", device.addr, device.port);

        let url = format!("{base}/query/device-info");
        let response = http
            .get(&url)
            .send()
            .await
            .map_err(|e| CastError::Connection(format!("{} unreachable: {e}", device.name)))?;
        if !response.status().is_success() {
            return Err(CastError::Connection(format!(
                "{} answered device-info with {}",
                device.name,
                response.status()
            )));
        }
        info!("Connected to Roku receiver {} at {}", device.name, base);
        Ok(Self { base, http })
    }

    pub async fn disconnect(&self) -> Result<()> {
        // Best effort: kick the player back to the home screen.
        let _ = self.keypress("Home").await;
        Ok(())
    }

    /// Hands the URL to the built-in Roku Media Player via the ECP input
    /// deep link. `t` selects the player lane: v(ideo), a(udio) or p(icture).
    pub async fn load(&self, media: &MediaRef) -> Result<()> {
        let lane = if media.content_type.starts_with("audio/") {
            "a"
        } else if media.content_type.starts_with("image/") {
            "p"
        } else {
            "v"
        };
        let url = format!(
            "{}/input/15985?t={}&u={}",
            self.base,
            lane,
            urlencoding::encode(&media.url)
        );
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| CastError::Load(format!("{e}")))?;
        if !response.status().is_success() {
            return Err(CastError::Load(format!(
                "device rejected input with {}",
                response.status()
            )));
        }
        Ok(())
    }

    // ECP has one Play key that toggles play/pause.
    pub async fn play(&self) -> Result<()> {
        self.keypress("Play").await
    }

    pub async fn pause(&self) -> Result<()> {
        self.keypress("Play").await
    }

    pub async fn stop(&self) -> Result<()> {
        self.keypress("Home").await
    }

    pub async fn seek(&self, _target: f64) -> Result<()> {
        Err(CastError::Unsupported(
            "Roku ECP has no absolute seek".into(),
        ))
    }

    pub async fn set_volume(&self, _level: u8) -> Result<()> {
        Err(CastError::Unsupported(
            "Roku ECP has no absolute volume control".into(),
        ))
    }

    pub async fn set_mute(&self, _muted: bool) -> Result<()> {
        Err(CastError::Unsupported("Roku ECP has no mute control".into()))
    }

    pub async fn poll_status(&self) -> Result<StatusSnapshot> {
        let url = format!("{}/query/media-player", self.base);
        let body = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| CastError::Status(format!("{e}")))?
            .text()
            .await
            .map_err(|e| CastError::Status(format!("{e}")))?;
        parse_media_player(&body)
            .ok_or_else(|| CastError::Status("unparseable media-player report".into()))
    }

    async fn keypress(&self, key: &str) -> Result<()> {
        let url = format!("{}/keypress/{}", self.base, key);
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| CastError::Command(format!("keypress {key} failed: {e}")))?;
        if !response.status().is_success() {
            return Err(CastError::Command(format!(
                "keypress {} answered {}",
                key,
                response.status()
            )));
        }
        debug!("Roku keypress {} acknowledged", key);
        Ok(())
    }
}

/// Parses an ECP `/query/media-player` report. The document looks like
/// `<player state="play"><position>8500 ms</position>...</player>` with
/// position and duration given in milliseconds.
fn parse_media_player(xml: &str) -> Option<StatusSnapshot> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut snapshot = StatusSnapshot::default();
    let mut saw_player = false;
    let mut current: Vec<u8> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.name().as_ref() == b"player" {
                    saw_player = true;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"state" {
                            let state = attr.unescape_value().ok()?;
                            snapshot.status = Some(map_player_state(&state));
                        }
                    }
                }
                current = e.name().as_ref().to_vec();
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().ok()?.trim().to_string();
                match current.as_slice() {
                    b"position" => snapshot.position = parse_millis(&text),
                    b"duration" => snapshot.duration = parse_millis(&text),
                    _ => {}
                }
            }
            Ok(Event::End(_)) => current.clear(),
            Ok(Event::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
    }

    saw_player.then_some(snapshot)
}

fn map_player_state(state: &str) -> PlaybackStatus {
    match state {
        "play" => PlaybackStatus::Playing,
        "pause" => PlaybackStatus::Paused,
        "buffer" | "startup" | "open" => PlaybackStatus::Loading,
        "close" | "none" => PlaybackStatus::Idle,
        _ => PlaybackStatus::Idle,
    }
}

/// "8500 ms" -> 8.5 seconds.
fn parse_millis(text: &str) -> Option<f64> {
    let digits = text.trim().trim_end_matches("ms").trim();
    digits.parse::<f64>().ok().map(|ms| ms / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_player_report_maps_state_and_times() {
        let xml = r#"<?xml version="1.0"?>
            <player error="false" state="play">
                <plugin bandwidth="10000000 bps" id="15985" name="Roku Media Player"/>
                <position>8500 ms</position>
                <duration>120000 ms</duration>
                <is_live>false</is_live>
            </player>"#;
        let snapshot = parse_media_player(xml).unwrap();
        assert_eq!(snapshot.status, Some(PlaybackStatus::Playing));
        assert_eq!(snapshot.position, Some(8.5));
        assert_eq!(snapshot.duration, Some(120.0));
    }

    #[test]
    fn buffering_and_idle_states_map() {
        let buffering = parse_media_player(r#"<player state="buffer"/>"#).unwrap();
        assert_eq!(buffering.status, Some(PlaybackStatus::Loading));

        let idle = parse_media_player(r#"<player state="none"/>"#).unwrap();
        assert_eq!(idle.status, Some(PlaybackStatus::Idle));
        assert!(idle.position.is_none());
    }

    #[test]
    fn non_player_document_is_rejected() {
        assert!(parse_media_player("<device-info></device-info>").is_none());
        assert!(parse_media_player("not xml at all").is_none());
    }

    #[test]
    fn millisecond_fields_parse_with_and_without_suffix() {
        assert_eq!(parse_millis("8500 ms"), Some(8.5));
        assert_eq!(parse_millis("8500"), Some(8.5));
        assert_eq!(parse_millis("quick"), None);
    }
}
