//! Relay bridge between the secondary client (phone) and the session
//! manager, plus the token registry backing `/media/{token}`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::session::SessionManager;
use crate::{is_supported_media, CastError, MediaRef, Result};

/// How long a relay ticket stays redeemable.
const TICKET_TTL: Duration = Duration::from_secs(300);

/// Token-addressed file served over `/media/{token}`. Read-only to fetching
/// devices; the store owns the mapping for the HTTP lifetime.
#[derive(Debug, Clone)]
pub struct ServedFile {
    pub path: PathBuf,
    pub content_type: String,
    pub title: String,
}

/// Registry of served files. Tokens are opaque and unguessable; the path
/// never appears in a URL.
#[derive(Default)]
pub struct MediaStore {
    entries: DashMap<String, ServedFile>,
}

impl MediaStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a local file for serving and return its token. The file must
    /// exist and carry a playable extension.
    pub fn register(&self, path: &Path) -> Result<String> {
        if !path.is_file() {
            return Err(CastError::NotFound(format!(
                "no such file: {}",
                path.display()
            )));
        }
        if !is_supported_media(path) {
            return Err(CastError::Unsupported(format!(
                "not a playable media file: {}",
                path.display()
            )));
        }
        let content_type = mime_guess::from_path(path)
            .first()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let title = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("media")
            .to_string();
        let token = Uuid::new_v4().simple().to_string();
        self.entries.insert(
            token.clone(),
            ServedFile {
                path: path.to_path_buf(),
                content_type,
                title,
            },
        );
        debug!("Registered {} as token {}", path.display(), token);
        Ok(token)
    }

    pub fn get(&self, token: &str) -> Option<ServedFile> {
        self.entries.get(token).map(|e| e.value().clone())
    }

    pub fn revoke(&self, token: &str) {
        self.entries.remove(token);
    }

    /// Absolute URL a receiver on the LAN can fetch this token from.
    pub fn url_for(&self, token: &str, port: u16) -> Result<String> {
        Ok(lan_url(local_addr()?, port, &format!("/media/{token}")))
    }
}

fn local_addr() -> Result<std::net::IpAddr> {
    local_ip_address::local_ip()
        .map_err(|e| CastError::Connection(format!("cannot determine LAN address: {e}")))
}

/// Build an absolute URL other LAN clients can reach this host on.
fn lan_url(ip: std::net::IpAddr, port: u16, path: &str) -> String {
    format!("http://{ip}:{port}{path}")
}

/// Proof that a phone-relayed media URL was produced for an active session.
/// Single-use: redeeming consumes the ticket.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RelayTicket {
    pub token: String,
    pub origin: String,
    pub media_url: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RelayTicket {
    pub fn new(origin: impl Into<String>, media_url: impl Into<String>) -> Self {
        let created_at = Utc::now();
        Self {
            token: Uuid::new_v4().simple().to_string(),
            origin: origin.into(),
            media_url: media_url.into(),
            created_at,
            expires_at: created_at + chrono::Duration::seconds(TICKET_TTL.as_secs() as i64),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Redeem the ticket for its media URL. Takes the ticket by value so it
    /// cannot be redeemed twice.
    pub fn redeem(self) -> Result<String> {
        if self.is_expired() {
            return Err(CastError::NotFound(format!(
                "relay ticket {} expired",
                self.token
            )));
        }
        Ok(self.media_url)
    }
}

/// An upload in flight: the checks have passed and the destination file is
/// open, but nothing is registered yet. Call [`PendingUpload::abort`] to
/// clean up after a failed transfer.
pub struct PendingUpload {
    path: PathBuf,
    title: String,
    file: tokio::fs::File,
    written: u64,
}

impl PendingUpload {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.file.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Remove the partial file.
    pub async fn abort(self) {
        drop(self.file);
        let _ = tokio::fs::remove_file(&self.path).await;
    }
}

/// Hands phone submissions (uploads, pasted URLs) and local library files to
/// the session manager as cast targets. Holds no playback state.
pub struct RelayBridge {
    store: Arc<MediaStore>,
    manager: Arc<SessionManager>,
    upload_dir: PathBuf,
    port: u16,
}

impl RelayBridge {
    pub fn new(
        store: Arc<MediaStore>,
        manager: Arc<SessionManager>,
        upload_dir: PathBuf,
        port: u16,
    ) -> Self {
        Self {
            store,
            manager,
            upload_dir,
            port,
        }
    }

    /// Cast a pasted remote URL straight through to the bound device.
    pub async fn relay_url(&self, url: &str, title: &str) -> Result<()> {
        if url.is_empty() || !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(CastError::Load(format!("not a castable URL: {url}")));
        }
        self.manager.cast(MediaRef::remote(url, title)).await
    }

    /// First half of an upload: the session and extension checks, then an
    /// open destination file. With nothing bound, no file is created and no
    /// ticket will exist. Bytes are streamed in with
    /// [`PendingUpload::write_chunk`], never buffered whole.
    pub async fn begin_upload(&self, filename: &str) -> Result<PendingUpload> {
        if !self.manager.has_session().await {
            return Err(CastError::NoActiveSession);
        }
        let safe_name = sanitize_filename(filename);
        if !is_supported_media(Path::new(&safe_name)) {
            return Err(CastError::Unsupported(format!(
                "not a playable media file: {filename}"
            )));
        }
        let path = self
            .upload_dir
            .join(format!("{}-{}", Uuid::new_v4().simple(), safe_name));
        let file = tokio::fs::File::create(&path).await?;
        Ok(PendingUpload {
            path,
            title: safe_name,
            file,
            written: 0,
        })
    }

    /// Second half: register the stored file, mint a ticket and cast it.
    pub async fn finish_upload(&self, upload: PendingUpload) -> Result<RelayTicket> {
        let PendingUpload {
            path,
            title,
            mut file,
            written,
        } = upload;
        file.flush().await?;
        drop(file);
        info!(
            "Stored relayed upload {} ({} bytes) at {}",
            title,
            written,
            path.display()
        );

        let token = match self.store.register(&path) {
            Ok(token) => token,
            Err(e) => {
                let _ = tokio::fs::remove_file(&path).await;
                return Err(e);
            }
        };
        let media_url = match self.store.url_for(&token, self.port) {
            Ok(url) => url,
            Err(e) => {
                self.store.revoke(&token);
                let _ = tokio::fs::remove_file(&path).await;
                return Err(e);
            }
        };
        let ticket = RelayTicket::new("mobile", media_url);

        let url = ticket.clone().redeem()?;
        let mut media = MediaRef::remote(url, title);
        if let Some(entry) = self.store.get(&token) {
            media.content_type = entry.content_type;
        }
        if let Err(e) = self.manager.cast(media).await {
            // The cast failed, so the stored copy is unreachable garbage.
            self.store.revoke(&token);
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e);
        }
        Ok(ticket)
    }

    /// Store an upload already held in memory and cast it. Streaming callers
    /// use begin_upload/finish_upload directly.
    pub async fn relay_upload(&self, filename: &str, body: bytes::Bytes) -> Result<RelayTicket> {
        let mut upload = self.begin_upload(filename).await?;
        if let Err(e) = upload.write_chunk(&body).await {
            upload.abort().await;
            return Err(e);
        }
        self.finish_upload(upload).await
    }

    /// URL of the phone control page on this host; the payload a QR code or
    /// status line shows so nobody types an address by hand.
    pub fn remote_url(&self) -> Result<String> {
        Ok(lan_url(local_addr()?, self.port, "/remote"))
    }

    /// Serve a library file and cast its URL to the bound device.
    pub async fn cast_local(&self, path: &Path) -> Result<String> {
        if !self.manager.has_session().await {
            return Err(CastError::NoActiveSession);
        }
        let token = self.store.register(path)?;
        let media_url = self.store.url_for(&token, self.port)?;
        let mut media = MediaRef::remote(media_url.clone(), "");
        if let Some(entry) = self.store.get(&token) {
            media.content_type = entry.content_type;
            media.title = entry.title;
        }
        self.manager.cast(media).await?;
        Ok(media_url)
    }
}

/// Keep only the final path component and drop characters that could break
/// out of the upload directory.
fn sanitize_filename(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("upload")
        .trim()
        .to_string();
    let cleaned: String = base
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' '))
        .collect();
    if cleaned.trim_matches(['.', ' ']).is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::io::Write;

    #[test]
    fn register_rejects_missing_and_unplayable_files() {
        let store = MediaStore::new();
        assert!(matches!(
            store.register(Path::new("/definitely/not/here.mp4")),
            Err(CastError::NotFound(_))
        ));

        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("notes.txt");
        std::fs::File::create(&doc)
            .unwrap()
            .write_all(b"hi")
            .unwrap();
        assert!(matches!(
            store.register(&doc),
            Err(CastError::Unsupported(_))
        ));
    }

    #[test]
    fn registered_token_resolves_until_revoked() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip.mp4");
        std::fs::File::create(&clip)
            .unwrap()
            .write_all(b"fake video")
            .unwrap();

        let store = MediaStore::new();
        let token = store.register(&clip).unwrap();
        let entry = store.get(&token).unwrap();
        assert_eq!(entry.path, clip);
        assert_eq!(entry.content_type, "video/mp4");
        assert_eq!(entry.title, "clip.mp4");

        store.revoke(&token);
        assert!(store.get(&token).is_none());
    }

    #[test]
    fn ticket_is_single_use_by_construction() {
        let ticket = RelayTicket::new("mobile", "http://10.0.0.2:8765/media/abc");
        assert!(!ticket.is_expired());
        let url = ticket.redeem().unwrap();
        assert_eq!(url, "http://10.0.0.2:8765/media/abc");
        // `ticket` is moved; a second redeem does not compile.
    }

    #[test]
    fn expired_ticket_cannot_be_redeemed() {
        let mut ticket = RelayTicket::new("mobile", "http://10.0.0.2:8765/media/abc");
        ticket.expires_at = Utc::now() - chrono::Duration::seconds(1);
        assert!(ticket.is_expired());
        assert!(matches!(ticket.redeem(), Err(CastError::NotFound(_))));
    }

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\clips\\movie.mp4"), "movie.mp4");
        assert_eq!(sanitize_filename("my clip.mp4"), "my clip.mp4");
        assert_eq!(sanitize_filename("..."), "upload");
        assert_eq!(sanitize_filename(""), "upload");
    }

    #[test]
    fn lan_urls_are_absolute() {
        let ip: std::net::IpAddr = "192.168.1.20".parse().unwrap();
        assert_eq!(lan_url(ip, 8765, "/remote"), "http://192.168.1.20:8765/remote");
        assert_eq!(
            lan_url(ip, 8765, "/media/abc"),
            "http://192.168.1.20:8765/media/abc"
        );
    }

    #[tokio::test]
    async fn upload_streams_chunks_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new();
        let mut config = Config::default();
        config.session.poll_interval_ms = 60_000;
        let manager = SessionManager::new(config);
        let device = crate::Device::new(
            "TV".into(),
            crate::DeviceKind::CastReceiver,
            "192.168.1.50".parse().unwrap(),
            8009,
            "Chromecast".into(),
        );
        manager
            .bind_mock(device, crate::adapter::mock::MockAdapter::new())
            .await
            .unwrap();

        let bridge = RelayBridge::new(
            Arc::clone(&store),
            Arc::clone(&manager),
            dir.path().to_path_buf(),
            8765,
        );

        let mut upload = bridge.begin_upload("clip.mp4").await.unwrap();
        upload.write_chunk(b"01234").await.unwrap();
        upload.write_chunk(b"56789").await.unwrap();
        let path = upload.path().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), b"0123456789");

        // A failed transfer leaves nothing behind.
        upload.abort().await;
        assert!(!path.exists());
        manager.unbind().await;
    }

    #[tokio::test]
    async fn upload_without_session_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new();
        let manager = SessionManager::new(Config::default());
        let bridge = RelayBridge::new(
            Arc::clone(&store),
            manager,
            dir.path().to_path_buf(),
            8765,
        );

        let result = bridge
            .relay_upload("clip.mov", bytes::Bytes::from_static(b"data"))
            .await;
        assert!(matches!(result, Err(CastError::NoActiveSession)));
        // No ticket, no stored bytes.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
