//! Host configuration file.
//!
//! The JSON layout is the one kiosk deployments already ship:
//!
//! ```json
//! {
//!   "server": { "host": "192.168.4.1", "port": 5000 },
//!   "udp": { "listen_port": 5005, "max_packet_size": 4096 },
//!   "video": { "transport": "udp", "tcp_host": "192.168.4.1", "tcp_port": 5050 },
//!   "network": { "timeout": 2.0 }
//! }
//! ```
//!
//! Every section and field is optional. The `VIDEO_TRANSPORT` environment
//! variable (`udp` or `tcp`) overrides `video.transport` when loading from a
//! file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use kiosklink_control::ChannelConfig;
use kiosklink_frame::DEFAULT_MAX_PACKET_SIZE;
use kiosklink_video::{DatagramConfig, StreamConfig, VideoConfig};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::client::ClientConfig;

/// Environment variable overriding `video.transport`.
pub const TRANSPORT_ENV: &str = "VIDEO_TRANSPORT";

const DEFAULT_VIDEO_PORT: u16 = 5005;
const DEFAULT_TIMEOUT_SECS: f64 = 2.0;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Video transport named in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    #[default]
    Udp,
    Tcp,
}

impl TransportKind {
    /// Case-insensitive; `None` for anything but `udp` or `tcp`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "udp" => Some(TransportKind::Udp),
            "tcp" => Some(TransportKind::Tcp),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Udp => "udp",
            TransportKind::Tcp => "tcp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KioskConfig {
    pub server: ServerSection,
    pub udp: UdpSection,
    pub video: VideoSection,
    pub network: NetworkSection,
}

/// Control endpoint on the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

/// Local datagram video port. `listen_port` wins over `port` when both are set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,
    /// Largest datagram the device sends, header included.
    pub max_packet_size: usize,
}

impl UdpSection {
    pub fn video_port(&self) -> u16 {
        self.listen_port.or(self.port).unwrap_or(DEFAULT_VIDEO_PORT)
    }
}

impl Default for UdpSection {
    fn default() -> Self {
        Self {
            port: None,
            listen_port: None,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSection {
    /// `udp` or `tcp`; anything else falls back to `udp`.
    pub transport: String,
    pub tcp_host: String,
    pub tcp_port: u16,
}

impl Default for VideoSection {
    fn default() -> Self {
        Self {
            transport: TransportKind::Udp.as_str().to_string(),
            tcp_host: "127.0.0.1".to_string(),
            tcp_port: 5050,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    /// Connect timeout in seconds.
    pub timeout: f64,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl KioskConfig {
    /// Load from `path`, then apply the `VIDEO_TRANSPORT` override.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: KioskConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.normalize(std::env::var(TRANSPORT_ENV).ok().as_deref());
        info!(
            path = %path.display(),
            transport = config.transport().as_str(),
            "config loaded"
        );
        Ok(config)
    }

    /// Parse a JSON document without consulting the environment.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        let mut config: KioskConfig = serde_json::from_str(text)?;
        config.normalize(None);
        Ok(config)
    }

    /// Replace an unknown transport with `udp`, then apply `env_override` if
    /// it names a known transport.
    pub fn normalize(&mut self, env_override: Option<&str>) {
        if TransportKind::parse(&self.video.transport).is_none() {
            warn!(transport = %self.video.transport, "unknown video transport; using udp");
            self.video.transport = TransportKind::Udp.as_str().to_string();
        }

        let Some(value) = env_override else {
            return;
        };
        match TransportKind::parse(value) {
            Some(kind) => {
                info!(
                    transport = kind.as_str(),
                    "video transport overridden by {TRANSPORT_ENV}"
                );
                self.video.transport = kind.as_str().to_string();
            }
            None => warn!(value, "ignoring unknown {TRANSPORT_ENV} value"),
        }
    }

    pub fn transport(&self) -> TransportKind {
        TransportKind::parse(&self.video.transport).unwrap_or_default()
    }

    /// `network.timeout` as a duration; non-positive or invalid values give
    /// the 2s default.
    pub fn connect_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.network.timeout)
            .ok()
            .filter(|timeout| !timeout.is_zero())
            .unwrap_or(Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS))
    }

    pub fn channel_config(&self) -> ChannelConfig {
        let mut channel = ChannelConfig::new(&self.server.host, self.server.port);
        channel.connect_timeout = self.connect_timeout();
        channel
    }

    pub fn video_config(&self) -> VideoConfig {
        match self.transport() {
            TransportKind::Udp => {
                VideoConfig::Datagram(DatagramConfig::new("0.0.0.0", self.udp.video_port()))
            }
            TransportKind::Tcp => {
                let mut stream = StreamConfig::new(&self.video.tcp_host, self.video.tcp_port);
                stream.connect_timeout = self.connect_timeout();
                VideoConfig::Stream(stream)
            }
        }
    }

    /// Client running the configured video transport.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(self.channel_config(), Some(self.video_config()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_takes_defaults() {
        let config = KioskConfig::from_json("{}").unwrap();
        assert_eq!(config, KioskConfig::default());
        assert_eq!(config.transport(), TransportKind::Udp);
        assert_eq!(config.udp.video_port(), 5005);
        assert_eq!(config.connect_timeout(), Duration::from_secs(2));
        assert_eq!(config.channel_config().addr, "127.0.0.1:5000");
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config = KioskConfig::from_json(
            r#"{"server":{"host":"10.0.0.7"},"video":{"transport":"TCP","tcp_port":6000}}"#,
        )
        .unwrap();
        assert_eq!(config.server.host, "10.0.0.7");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.transport(), TransportKind::Tcp);
        assert_eq!(config.video.tcp_host, "127.0.0.1");

        match config.video_config() {
            VideoConfig::Stream(stream) => assert_eq!(stream.addr, "127.0.0.1:6000"),
            other => panic!("expected stream config, got {other:?}"),
        }
    }

    #[test]
    fn listen_port_wins_over_port() {
        let config =
            KioskConfig::from_json(r#"{"udp":{"port":6001,"listen_port":6002}}"#).unwrap();
        assert_eq!(config.udp.video_port(), 6002);

        let config = KioskConfig::from_json(r#"{"udp":{"port":6001}}"#).unwrap();
        assert_eq!(config.udp.video_port(), 6001);
        match config.video_config() {
            VideoConfig::Datagram(datagram) => assert_eq!(datagram.port, 6001),
            other => panic!("expected datagram config, got {other:?}"),
        }
    }

    #[test]
    fn unknown_transport_falls_back_to_udp() {
        let config = KioskConfig::from_json(r#"{"video":{"transport":"quic"}}"#).unwrap();
        assert_eq!(config.video.transport, "udp");
        assert_eq!(config.transport(), TransportKind::Udp);
    }

    #[test]
    fn environment_override_applies_only_known_values() {
        let mut config = KioskConfig::default();
        config.normalize(Some("TCP"));
        assert_eq!(config.transport(), TransportKind::Tcp);

        config.normalize(Some("carrier-pigeon"));
        assert_eq!(config.transport(), TransportKind::Tcp);
    }

    #[test]
    fn invalid_timeouts_use_default() {
        for timeout in [0.0, -1.0, f64::NAN] {
            let mut config = KioskConfig::default();
            config.network.timeout = timeout;
            assert_eq!(config.connect_timeout(), Duration::from_secs(2));
        }

        let mut config = KioskConfig::default();
        config.network.timeout = 0.25;
        assert_eq!(config.channel_config().connect_timeout, Duration::from_millis(250));
    }

    #[test]
    fn load_reports_missing_and_malformed_files() {
        let dir = std::env::temp_dir();
        let missing = dir.join(format!("kiosklink-missing-{}.json", std::process::id()));
        assert!(matches!(
            KioskConfig::load(&missing),
            Err(ConfigError::Read { .. })
        ));

        let malformed = dir.join(format!("kiosklink-malformed-{}.json", std::process::id()));
        std::fs::write(&malformed, "{ not json").unwrap();
        let err = KioskConfig::load(&malformed).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("kiosklink-malformed"));
        let _ = std::fs::remove_file(&malformed);
    }

    #[test]
    fn serializes_effective_config() {
        let config = KioskConfig::from_json(r#"{"udp":{"listen_port":7000}}"#).unwrap();
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["udp"]["listen_port"], 7000);
        assert!(value["udp"].get("port").is_none());
        assert_eq!(value["video"]["transport"], "udp");
    }
}
