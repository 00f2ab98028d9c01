use anyhow::anyhow;
use clap::Parser;
use fern::colors::{Color, ColoredLevelConfig};
use log::{info, LevelFilter};
use serde::{Deserialize, Serialize};
use std::{env, fmt, fs, path::Path, str::FromStr};
use time::{format_description::well_known::Iso8601, OffsetDateTime};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to Settings.toml file holding configuration options
    #[arg(short, long)]
    pub config: Option<String>,

    /// Log level to run with the service (default: info)
    #[arg(short, long)]
    pub level: Option<String>,
}

// No Debug, holds provider credentials
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    pub config: Option<String>,
    pub level: Option<String>,
    pub api_settings: APISettings,
    pub funding_settings: FundingSettings,
    pub lnpay_settings: LnPaySettings,
    pub lntxbot_settings: LntxbotSettings,
    pub lnd_rest_settings: LndRestSettings,
}

impl Settings {
    /// Settings file first, then the `--level` flag, then the environment
    /// overlay from `lookup`
    pub fn load<F>(cli_settings: CliSettings, lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = match cli_settings.config.as_deref() {
            Some(config_path) => Self::from_file(Path::new(config_path))?,
            None => Self::from_file_or_defaults(Path::new(DEFAULT_CONFIG_PATH))?,
        };

        if let Some(level) = cli_settings.level {
            settings.level = Some(level);
        }
        settings.apply_env(lookup);

        Ok(settings)
    }

    fn from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config {}: {}", path.display(), e))?;
        toml::from_str(&content).map_err(|e| anyhow!("Failed to map config to settings: {}", e))
    }

    fn from_file_or_defaults(path: &Path) -> Result<Self, anyhow::Error> {
        if path.exists() {
            return Self::from_file(path);
        }

        let settings = Self::default();
        if let Some(directory) = path.parent() {
            fs::create_dir_all(directory)
                .map_err(|e| anyhow!("Failed to create config directory: {}", e))?;
        }
        let content = toml::to_string(&settings)
            .map_err(|e| anyhow!("Failed to serialize default settings: {}", e))?;
        fs::write(path, content).map_err(|e| anyhow!("Failed to write default config: {}", e))?;
        info!("Wrote default settings to {}", path.display());

        Ok(settings)
    }

    /// Overlay provider configuration read from the environment.
    ///
    /// Variable names follow the ones wallet operators already export for
    /// these providers, empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(kind) = var("FUNDING_SOURCE").or_else(|| var("LNBITS_BACKEND_WALLET_CLASS")) {
            match kind.parse::<FundingSourceKind>() {
                Ok(kind) => self.funding_settings.kind = kind,
                Err(e) => log::warn!("Ignoring funding source from environment: {}", e),
            }
        }

        if let Some(endpoint) = var("LNPAY_API_ENDPOINT") {
            self.lnpay_settings.api_endpoint = endpoint;
        }
        if let Some(api_key) = var("LNPAY_API_KEY") {
            self.lnpay_settings.api_key = Some(api_key);
        }
        if let Some(wallet_key) = var("LNPAY_WALLET_KEY").or_else(|| var("LNPAY_ADMIN_KEY")) {
            self.lnpay_settings.wallet_key = Some(wallet_key);
        }

        if let Some(endpoint) = var("LNTXBOT_API_ENDPOINT") {
            self.lntxbot_settings.api_endpoint = endpoint;
        }
        if let Some(key) = var("LNTXBOT_KEY")
            .or_else(|| var("LNTXBOT_ADMIN_KEY"))
            .or_else(|| var("LNTXBOT_INVOICE_KEY"))
        {
            self.lntxbot_settings.key = Some(key);
        }

        if let Some(endpoint) = var("LND_REST_ENDPOINT") {
            self.lnd_rest_settings.endpoint = endpoint;
        }
        if let Some(macaroon) = var("LND_REST_MACAROON") {
            self.lnd_rest_settings.macaroon = Some(macaroon);
        }
        if let Some(cert) = var("LND_REST_CERT") {
            self.lnd_rest_settings.tls_cert_path = Some(cert);
        }
    }
}

/// Which provider backs this process
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FundingSourceKind {
    #[default]
    Void,
    #[serde(rename = "lnpay")]
    LnPay,
    Lntxbot,
    LndRest,
}

impl FromStr for FundingSourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "void" | "voidwallet" => Ok(FundingSourceKind::Void),
            "lnpay" | "lnpaywallet" => Ok(FundingSourceKind::LnPay),
            "lntxbot" | "lntxbotwallet" => Ok(FundingSourceKind::Lntxbot),
            "lnd_rest" | "lndrest" | "lndrestwallet" => Ok(FundingSourceKind::LndRest),
            other => Err(anyhow!("unknown funding source: {}", other)),
        }
    }
}

impl fmt::Display for FundingSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FundingSourceKind::Void => "void",
            FundingSourceKind::LnPay => "lnpay",
            FundingSourceKind::Lntxbot => "lntxbot",
            FundingSourceKind::LndRest => "lnd_rest",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FundingSettings {
    /// Backend used to create and pay invoices
    pub kind: FundingSourceKind,
    /// Upper bound in seconds for every request sent to the provider
    pub http_timeout_secs: u64,
    /// Poll outstanding invoices for backends that cannot push settlements
    pub enable_poller: bool,
    /// Interval in seconds between two polls of outstanding invoices
    pub poll_interval_secs: u64,
}

impl Default for FundingSettings {
    fn default() -> Self {
        FundingSettings {
            kind: FundingSourceKind::Void,
            http_timeout_secs: 15,
            enable_poller: true,
            poll_interval_secs: 5,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LnPaySettings {
    pub api_endpoint: String,
    pub api_key: Option<String>,
    /// Wallet key embedded in request paths (admin key works too)
    pub wallet_key: Option<String>,
}

impl Default for LnPaySettings {
    fn default() -> Self {
        LnPaySettings {
            api_endpoint: String::from("https://lnpay.co/v1"),
            api_key: None,
            wallet_key: None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Default)]
pub struct LntxbotSettings {
    pub api_endpoint: String,
    /// Key sent as the Basic authorization credential
    pub key: Option<String>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LndRestSettings {
    /// Url to find the lnd lightning node's REST api
    pub endpoint: String,
    /// Hex encoded macaroon, or a path to a `.macaroon` file
    pub macaroon: Option<String>,
    /// Optional file path to the lnd tls cert (typically only used in local development, with self signed certs)
    pub tls_cert_path: Option<String>,
}

impl Default for LndRestSettings {
    fn default() -> Self {
        LndRestSettings {
            endpoint: String::from("https://localhost:8080"),
            macaroon: None,
            tls_cert_path: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct APISettings {
    pub domain: String,
    pub port: String,
    pub origins: Vec<String>,
}

impl Default for APISettings {
    fn default() -> Self {
        APISettings {
            domain: String::from("127.0.0.1"),
            port: String::from("9930"),
            origins: vec![String::from("http://localhost:9930")],
        }
    }
}

/// Read when `--config` is not given, written with defaults if missing
pub const DEFAULT_CONFIG_PATH: &str = "./config/local.toml";

pub fn get_settings() -> Result<Settings, anyhow::Error> {
    Settings::load(Cli::parse().into(), |name| env::var(name).ok())
}

pub struct CliSettings {
    pub config: Option<String>,
    pub level: Option<String>,
}

impl From<Cli> for CliSettings {
    fn from(cli: Cli) -> Self {
        Self {
            config: cli.config,
            level: cli.level,
        }
    }
}

pub fn setup_logger(
    level: Option<String>,
    filter_targets: Vec<String>,
) -> Result<(), fern::InitError> {
    let rust_log = get_log_level(level);
    let colors = ColoredLevelConfig::new()
        .trace(Color::White)
        .debug(Color::Cyan)
        .info(Color::Blue)
        .warn(Color::Yellow)
        .error(Color::Magenta);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{} {}] {}: {}",
                OffsetDateTime::now_utc()
                    .format(&Iso8601::DEFAULT)
                    .unwrap_or_default(),
                colors.color(record.level()),
                record.target(),
                message
            ));
        })
        .level(rust_log)
        .filter(move |metadata| {
            !filter_targets
                .iter()
                .any(|filter| metadata.target().starts_with(filter))
        })
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}

pub fn get_log_level(level: Option<String>) -> LevelFilter {
    let level = level.unwrap_or_else(|| env::var("RUST_LOG").unwrap_or_default());
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}
