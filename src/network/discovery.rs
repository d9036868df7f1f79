use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent};
use quick_xml::events::Event;
use quick_xml::Reader;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use super::registry::Registry;
use crate::config::Config;
use crate::events;
use crate::{CastError, Device, DeviceKind, Result};

const GOOGLECAST_SERVICE: &str = "_googlecast._tcp.local.";
const SSDP_MULTICAST: &str = "239.255.255.250:1900";
const ROKU_ECP_PORT: u16 = 8060;

/// Runs discovery passes and owns the registry's write side.
pub struct Scanner {
    registry: Arc<Registry>,
    config: Config,
    http: reqwest::Client,
}

impl Scanner {
    pub fn new(registry: Arc<Registry>, config: Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap_or_default();
        Self {
            registry,
            config,
            http,
        }
    }

    /// One discovery pass over the requested kinds, run concurrently, each
    /// bounded by the configured scan timeout. Results are merged into the
    /// registry; devices that stayed silent past the grace period are
    /// evicted afterwards.
    pub async fn scan(&self, kinds: &[DeviceKind]) -> Result<Vec<Device>> {
        let window = self.config.scan_timeout();
        let mut found = Vec::new();

        let want_cast = kinds.contains(&DeviceKind::CastReceiver);
        let want_roku = kinds.contains(&DeviceKind::RokuReceiver);

        let (cast, roku) = tokio::join!(
            async {
                if want_cast {
                    self.scan_cast(window).await
                } else {
                    Ok(Vec::new())
                }
            },
            async {
                if want_roku {
                    self.scan_roku(window.min(Duration::from_secs(3))).await
                } else {
                    Ok(Vec::new())
                }
            },
        );

        match cast {
            Ok(devices) => found.extend(devices),
            Err(e) => warn!("Cast discovery pass failed: {}", e),
        }
        match roku {
            Ok(devices) => found.extend(devices),
            Err(e) => warn!("Roku discovery pass failed: {}", e),
        }

        self.registry.merge(found.clone());
        self.registry.evict_stale(self.config.stale_after());
        events::broadcast_event(events::CastEvent::ScanFinished { found: found.len() });
        Ok(found)
    }

    /// Periodic background scanning until the task is aborted.
    pub async fn run(self: Arc<Self>, kinds: Vec<DeviceKind>) {
        let mut interval = tokio::time::interval(self.config.scan_interval());
        loop {
            interval.tick().await;
            if let Err(e) = self.scan(&kinds).await {
                warn!("Scheduled scan failed: {}", e);
            }
        }
    }

    /// mDNS browse for Cast receivers advertising `_googlecast._tcp`.
    async fn scan_cast(&self, window: Duration) -> Result<Vec<Device>> {
        let mdns = ServiceDaemon::new()
            .map_err(|e| CastError::Discovery(format!("failed to create mDNS daemon: {e}")))?;
        let receiver = mdns.browse(GOOGLECAST_SERVICE).map_err(|e| {
            CastError::Discovery(format!("failed to browse {GOOGLECAST_SERVICE}: {e}"))
        })?;

        let mut devices = Vec::new();
        let mut seen = HashSet::new();
        let deadline = Instant::now() + window;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let event = match timeout(remaining, receiver.recv_async()).await {
                Ok(Ok(event)) => event,
                Ok(Err(_)) => break, // channel closed
                Err(_) => break,     // window elapsed
            };
            if let ServiceEvent::ServiceResolved(info) = event {
                let Some(addr) = info.get_addresses().iter().next().copied() else {
                    debug!("No address for {}", info.get_fullname());
                    continue;
                };
                // TXT records carry the friendly name ("fn") and model ("md");
                // fall back to the instance name.
                let name = info
                    .get_property_val_str("fn")
                    .unwrap_or_else(|| info.get_fullname().trim_end_matches('.'))
                    .to_string();
                let model = info
                    .get_property_val_str("md")
                    .unwrap_or("Chromecast")
                    .to_string();
                let device = Device::new(
                    name,
                    DeviceKind::CastReceiver,
                    addr,
                    info.get_port(),
                    model,
                );
                if seen.insert(device.id.clone()) {
                    devices.push(device);
                }
            }
        }

        let _ = mdns.stop_browse(GOOGLECAST_SERVICE);
        let _ = mdns.shutdown();
        Ok(devices)
    }

    /// SSDP M-SEARCH for `roku:ecp`, then probe each responder's
    /// `/query/device-info` to normalize it into a Device.
    async fn scan_roku(&self, window: Duration) -> Result<Vec<Device>> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        let msearch = format!(
            "M-SEARCH * HTTP/1.1\r\n\
             HOST: {SSDP_MULTICAST}\r\n\
             MAN: \"ssdp:discover\"\r\n\
             ST: roku:ecp\r\n\
             MX: 2\r\n\r\n"
        );
        socket.send_to(msearch.as_bytes(), SSDP_MULTICAST).await?;

        let mut devices = Vec::new();
        let mut seen: HashSet<IpAddr> = HashSet::new();
        let mut buf = [0u8; 4096];
        let deadline = Instant::now() + window;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let (len, _) = match timeout(remaining, socket.recv_from(&mut buf)).await {
                Ok(Ok(recv)) => recv,
                Ok(Err(e)) => {
                    debug!("SSDP recv error: {}", e);
                    continue;
                }
                Err(_) => break,
            };
            let payload = String::from_utf8_lossy(&buf[..len]);
            let headers = parse_ssdp_headers(&payload);
            let Some(location) = headers.get("location") else {
                continue;
            };
            let Some(host) = host_from_url(location) else {
                continue;
            };
            let Ok(addr) = host.parse::<IpAddr>() else {
                continue;
            };
            if !seen.insert(addr) {
                continue;
            }
            match self.roku_device_info(addr).await {
                Ok(device) => devices.push(device),
                Err(e) => debug!("Roku probe {} failed: {}", addr, e),
            }
        }

        Ok(devices)
    }

    async fn roku_device_info(&self, addr: IpAddr) -> Result<Device> {
        let url = format!("http://{addr}:{ROKU_ECP_PORT}/query/device-info");
        let body = self.http.get(&url).send().await?.text().await?;
        let info = parse_roku_device_info(&body)
            .ok_or_else(|| CastError::Discovery(format!("unparseable device-info from {addr}")))?;
        let name = info.name.unwrap_or_else(|| format!("Roku ({addr})"));
        let model = info.model.unwrap_or_else(|| "Roku".to_string());
        Ok(Device::new(
            name,
            DeviceKind::RokuReceiver,
            addr,
            ROKU_ECP_PORT,
            model,
        ))
    }
}

#[derive(Debug, Default)]
struct RokuInfo {
    name: Option<String>,
    model: Option<String>,
}

/// Pull the device name and model out of an ECP device-info document.
/// `user-device-name` wins over `friendly-device-name`.
fn parse_roku_device_info(xml: &str) -> Option<RokuInfo> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut info = RokuInfo::default();
    let mut current: Vec<u8> = Vec::new();
    let mut friendly: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => current = e.name().as_ref().to_vec(),
            Ok(Event::Text(t)) => {
                let text = t.unescape().ok()?.trim().to_string();
                if text.is_empty() {
                    continue;
                }
                match current.as_slice() {
                    b"user-device-name" => info.name = Some(text),
                    b"friendly-device-name" => friendly = Some(text),
                    b"model-name" => info.model = Some(text),
                    _ => {}
                }
            }
            Ok(Event::End(_)) => current.clear(),
            Ok(Event::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
    }

    if info.name.is_none() {
        info.name = friendly;
    }
    Some(info)
}

fn parse_ssdp_headers(payload: &str) -> std::collections::HashMap<String, String> {
    let mut headers = std::collections::HashMap::new();
    for line in payload.lines().skip(1) {
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }
    headers
}

fn host_from_url(url: &str) -> Option<&str> {
    let rest = url.split_once("//")?.1;
    let host_port = rest.split('/').next().unwrap_or(rest);
    match host_port.split_once(':') {
        Some((host, _)) => Some(host),
        None => Some(host_port),
    }
}
