use ackbench::client::LoadProfile;
use ackbench::config::{ClientConfig, Config, ServerConfig};
use clap::{Args, Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

/// TCP acknowledgment latency and throughput benchmark
#[derive(Parser, Debug)]
#[command(name = "ackbench", version, about, long_about = None)]
pub struct Cli {
    /// TOML config file; defaults are used when omitted
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset (e.g. "debug")
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Directory for the metrics JSON file
    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// Print the summary but don't write a metrics file
    #[arg(long, global = true)]
    pub no_persist: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept connections and acknowledge every payload
    Server(ServerArgs),
    /// Connect and drive load against a server
    Client(ClientArgs),
}

#[derive(Args, Debug)]
pub struct ServerArgs {
    #[arg(long)]
    pub host: Option<IpAddr>,

    #[arg(short, long)]
    pub port: Option<u16>,

    /// Cap on concurrently served connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    #[arg(long)]
    pub read_timeout_ms: Option<u64>,
}

#[derive(Args, Debug)]
pub struct ClientArgs {
    #[arg(long)]
    pub host: Option<IpAddr>,

    #[arg(short, long)]
    pub port: Option<u16>,

    /// Run a single bulk profile of this many messages
    #[arg(short = 'n', long, conflicts_with_all = ["rate", "duration"])]
    pub count: Option<u64>,

    /// Run a single rate-limited profile at this many messages per second
    #[arg(short, long)]
    pub rate: Option<u32>,

    /// Length of the rate-limited profile in seconds
    #[arg(short, long)]
    pub duration: Option<f64>,

    /// Payload size in bytes
    #[arg(short, long)]
    pub size: Option<usize>,

    #[arg(long)]
    pub connect_timeout_ms: Option<u64>,

    #[arg(long)]
    pub read_timeout_ms: Option<u64>,
}

impl Cli {
    pub fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.output_dir {
            config.metrics.output_dir = dir.clone();
        }
        if self.no_persist {
            config.metrics.persist = false;
        }
        match &self.command {
            Command::Server(args) => args.apply(&mut config.server),
            Command::Client(args) => args.apply(&mut config.client),
        }
    }
}

impl ServerArgs {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(host) = self.host {
            config.listen_addr.set_ip(host);
        }
        if let Some(port) = self.port {
            config.listen_addr.set_port(port);
        }
        if self.max_connections.is_some() {
            config.max_connections = self.max_connections;
        }
        if self.read_timeout_ms.is_some() {
            config.read_timeout_ms = self.read_timeout_ms;
        }
    }
}

impl ClientArgs {
    fn apply(&self, config: &mut ClientConfig) {
        if let Some(host) = self.host {
            config.server_addr.set_ip(host);
        }
        if let Some(port) = self.port {
            config.server_addr.set_port(port);
        }
        if self.connect_timeout_ms.is_some() {
            config.connect_timeout_ms = self.connect_timeout_ms;
        }
        if self.read_timeout_ms.is_some() {
            config.read_timeout_ms = self.read_timeout_ms;
        }
        if let Some(profile) = self.profile() {
            config.profiles = vec![profile];
        } else if let Some(size) = self.size {
            for profile in &mut config.profiles {
                match profile {
                    LoadProfile::Bulk { message_size, .. }
                    | LoadProfile::RateLimited { message_size, .. } => *message_size = size,
                }
            }
        }
    }

    fn profile(&self) -> Option<LoadProfile> {
        if let Some(message_count) = self.count {
            return Some(LoadProfile::Bulk {
                message_count,
                message_size: self.size.unwrap_or(1024),
            });
        }
        if self.rate.is_some() || self.duration.is_some() {
            return Some(LoadProfile::RateLimited {
                duration_secs: self.duration.unwrap_or(10.0),
                rate: self.rate.unwrap_or(10),
                message_size: self.size.unwrap_or(512),
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn client_count_replaces_the_plan() {
        let cli = parse(&["ackbench", "client", "-n", "100", "-s", "1024", "-p", "6001"]);
        let mut config = Config::default();
        cli.apply(&mut config);

        assert_eq!(config.client.server_addr.port(), 6001);
        assert_eq!(
            config.client.profiles,
            vec![LoadProfile::Bulk {
                message_count: 100,
                message_size: 1024,
            }]
        );
    }

    #[test]
    fn rate_flags_build_a_rate_limited_profile() {
        let cli = parse(&["ackbench", "client", "--rate", "20", "--duration", "3"]);
        let mut config = Config::default();
        cli.apply(&mut config);

        assert_eq!(
            config.client.profiles,
            vec![LoadProfile::RateLimited {
                duration_secs: 3.0,
                rate: 20,
                message_size: 512,
            }]
        );
    }

    #[test]
    fn count_conflicts_with_rate() {
        assert!(Cli::try_parse_from(["ackbench", "client", "-n", "5", "--rate", "2"]).is_err());
    }

    #[test]
    fn server_overrides_and_globals() {
        let cli = parse(&[
            "ackbench",
            "server",
            "--host",
            "0.0.0.0",
            "--port",
            "7000",
            "--max-connections",
            "8",
            "--no-persist",
        ]);
        let mut config = Config::default();
        cli.apply(&mut config);

        assert_eq!(config.server.listen_addr, "0.0.0.0:7000".parse::<std::net::SocketAddr>().unwrap());
        assert_eq!(config.server.max_connections, Some(8));
        assert!(!config.metrics.persist);
    }
}
