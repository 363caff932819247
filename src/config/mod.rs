use crate::client::LoadProfile;
use crate::error::{BenchError, Result};
use crate::protocol::{CLIENT_ACK_BUFFER, DEFAULT_BACKLOG, DEFAULT_HOST, DEFAULT_PORT, SERVER_RECV_BUFFER};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub backlog: i32,
    pub recv_buffer_size: usize,
    /// Unbounded when unset.
    pub max_connections: Option<usize>,
    pub read_timeout_ms: Option<u64>,
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClientConfig {
    pub server_addr: SocketAddr,
    pub ack_buffer_size: usize,
    pub connect_timeout_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
    pub pause_between_profiles_ms: u64,
    pub profiles: Vec<LoadProfile>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MetricsConfig {
    pub output_dir: PathBuf,
    pub persist: bool,
}

fn default_addr() -> SocketAddr {
    let ip: IpAddr = DEFAULT_HOST
        .parse()
        .unwrap_or(IpAddr::from([127, 0, 0, 1]));
    SocketAddr::new(ip, DEFAULT_PORT)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_addr(),
            backlog: DEFAULT_BACKLOG,
            recv_buffer_size: SERVER_RECV_BUFFER,
            max_connections: None,
            read_timeout_ms: None,
            shutdown_grace_ms: 1000,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: default_addr(),
            ack_buffer_size: CLIENT_ACK_BUFFER,
            connect_timeout_ms: None,
            read_timeout_ms: None,
            pause_between_profiles_ms: 1000,
            profiles: LoadProfile::default_plan(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            persist: true,
        }
    }
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    pub fn pause_between_profiles(&self) -> Duration {
        Duration::from_millis(self.pause_between_profiles_ms)
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path` when given, otherwise starts from defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.backlog <= 0 {
            return Err(BenchError::Config("server.backlog must be positive".into()));
        }
        if self.server.recv_buffer_size == 0 {
            return Err(BenchError::Config(
                "server.recv_buffer_size must be positive".into(),
            ));
        }
        if self.server.max_connections == Some(0) {
            return Err(BenchError::Config(
                "server.max_connections must be positive when set".into(),
            ));
        }
        if self.client.ack_buffer_size == 0 {
            return Err(BenchError::Config(
                "client.ack_buffer_size must be positive".into(),
            ));
        }
        if self.client.profiles.is_empty() {
            return Err(BenchError::Config(
                "client.profiles must contain at least one profile".into(),
            ));
        }
        for profile in &self.client.profiles {
            profile.validate()?;
        }
        Ok(())
    }
}
