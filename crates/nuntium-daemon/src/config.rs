//! CLI argument parsing and config file support.
//!
//! The daemon can be configured via CLI flags, a JSON config file, or
//! a combination of both (CLI overrides config file).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use nuntium_types::adapters::ProxyInfo;
use nuntium_types::{NuntiumError, Result};

// ---------------------------------------------------------------------------
// CLI arguments (manual parsing, no clap dependency)
// ---------------------------------------------------------------------------

/// Parsed command-line arguments.
pub struct CliArgs {
    pub data_dir: Option<PathBuf>,
    pub identity: Option<String>,
    pub modem_path: Option<String>,
    pub context_path: Option<String>,
    pub message_center: Option<String>,
    pub proxy: Option<String>,
    pub socket: Option<PathBuf>,
    pub use_delivery_reports: bool,
    pub config_path: Option<PathBuf>,
}

impl CliArgs {
    /// Parses CLI arguments from `std::env::args`.
    pub fn parse_from_env() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let mut cli = Self {
            data_dir: None,
            identity: None,
            modem_path: None,
            context_path: None,
            message_center: None,
            proxy: None,
            socket: None,
            use_delivery_reports: false,
            config_path: None,
        };

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--data-dir" => {
                    i += 1;
                    cli.data_dir = args.get(i).map(PathBuf::from);
                }
                "--identity" => {
                    i += 1;
                    cli.identity = args.get(i).cloned();
                }
                "--modem-path" => {
                    i += 1;
                    cli.modem_path = args.get(i).cloned();
                }
                "--context-path" => {
                    i += 1;
                    cli.context_path = args.get(i).cloned();
                }
                "--message-center" => {
                    i += 1;
                    cli.message_center = args.get(i).cloned();
                }
                "--proxy" => {
                    i += 1;
                    cli.proxy = args.get(i).cloned();
                }
                "--socket" => {
                    i += 1;
                    cli.socket = args.get(i).map(PathBuf::from);
                }
                "--use-delivery-reports" => {
                    cli.use_delivery_reports = true;
                }
                "--config" => {
                    i += 1;
                    cli.config_path = args.get(i).map(PathBuf::from);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                other => {
                    eprintln!("unknown argument: {other}");
                    eprintln!("use --help for usage information");
                    std::process::exit(1);
                }
            }
            i += 1;
        }

        cli
    }
}

fn print_help() {
    println!(
        "\
nuntium - headless MMS mediator

Usage:

  nuntium [OPTIONS]

Options:

  --data-dir <PATH>         Data directory (default: $XDG_CACHE_HOME/nuntium)
  --identity <ID>           Account identity to serve (default: local)
  --modem-path <PATH>       Radio object path of the modem (default: /modem_0)
  --context-path <PATH>     Radio object path of the data context
  --message-center <URL>    Message-center URL of the operator
  --proxy <HOST:PORT>       MMS proxy of the operator
  --socket <PATH>           Unix socket accepting injected push PDUs
  --use-delivery-reports    Request delivery reports for submissions
  --config <PATH>           Load config from JSON file

The data context is assumed to be managed externally; pushes arrive
as length-prefixed frames on the injection socket."
    );
}

// ---------------------------------------------------------------------------
// Config file (JSON)
// ---------------------------------------------------------------------------

/// JSON config file format.
///
/// Example `nuntium.json`:
/// ```json
/// {
///   "data_dir": "/var/lib/nuntium",
///   "identity": "sim0",
///   "modem_path": "/ril_0",
///   "context_path": "/ril_0/context2",
///   "message_center": "http://mmsc.operator.example/mms",
///   "proxy": "10.0.0.1:8080",
///   "socket": "/run/nuntium/push.sock",
///   "use_delivery_reports": false
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub data_dir: Option<PathBuf>,
    pub identity: Option<String>,
    pub modem_path: Option<String>,
    pub context_path: Option<String>,
    pub message_center: Option<String>,
    pub proxy: Option<String>,
    pub socket: Option<PathBuf>,
    #[serde(default)]
    pub use_delivery_reports: bool,
}

impl DaemonConfig {
    /// Loads the config file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| NuntiumError::Config {
            reason: format!("reading {}: {e}", path.display()),
        })?;
        serde_json::from_str(&raw).map_err(|e| NuntiumError::Config {
            reason: format!("parsing {}: {e}", path.display()),
        })
    }

    /// Builds a config from CLI arguments only.
    pub fn from_cli(cli: &CliArgs) -> Self {
        Self::default().merge_cli(cli)
    }

    /// Applies CLI overrides on top of this config.
    pub fn merge_cli(mut self, cli: &CliArgs) -> Self {
        if cli.data_dir.is_some() {
            self.data_dir = cli.data_dir.clone();
        }
        if cli.identity.is_some() {
            self.identity = cli.identity.clone();
        }
        if cli.modem_path.is_some() {
            self.modem_path = cli.modem_path.clone();
        }
        if cli.context_path.is_some() {
            self.context_path = cli.context_path.clone();
        }
        if cli.message_center.is_some() {
            self.message_center = cli.message_center.clone();
        }
        if cli.proxy.is_some() {
            self.proxy = cli.proxy.clone();
        }
        if cli.socket.is_some() {
            self.socket = cli.socket.clone();
        }
        if cli.use_delivery_reports {
            self.use_delivery_reports = true;
        }
        self
    }

    /// Resolved data directory.
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        let cache = std::env::var_os("XDG_CACHE_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache")))
            .unwrap_or_else(|| PathBuf::from("."));
        cache.join("nuntium")
    }

    /// Resolved account identity.
    pub fn identity(&self) -> String {
        self.identity.clone().unwrap_or_else(|| "local".to_string())
    }

    /// Resolved modem object path.
    pub fn modem_path(&self) -> String {
        self.modem_path.clone().unwrap_or_else(|| "/modem_0".to_string())
    }

    /// Resolved push-injection socket path.
    pub fn socket(&self) -> PathBuf {
        self.socket
            .clone()
            .unwrap_or_else(|| self.data_dir().join("push.sock"))
    }

    /// Parses the configured proxy coordinates.
    pub fn proxy_info(&self) -> Result<Option<ProxyInfo>> {
        let Some(raw) = &self.proxy else {
            return Ok(None);
        };
        let (host, port) = raw.rsplit_once(':').ok_or_else(|| NuntiumError::Config {
            reason: format!("proxy {raw} is not HOST:PORT"),
        })?;
        let port = port.parse::<u16>().map_err(|e| NuntiumError::Config {
            reason: format!("proxy port in {raw}: {e}"),
        })?;
        Ok(Some(ProxyInfo {
            host: host.to_string(),
            port,
        }))
    }
}
