//! Layered configuration: built-in defaults, then the JSON config file, then
//! environment variables and command-line flags (clap reads both).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use lib_common::core::RefreshSchedule;
use lib_common::markets::fx::{ApiFetcherConfig, PageFetcherConfig, RateBand};
use lib_common::persist::DEFAULT_STATE_FILE;
use lib_common::watchdog::{ProducerSpec, RestartPolicy, WatchdogConfig};

/// A config struct whose `Some` fields can be layered over another instance.
pub trait Layered: DeserializeOwned + Sized {
    /// `other` overrides `self` for every `Some` field.
    fn merge(self, other: Self) -> Self;
    /// Explicit config file location, if given.
    fn config_path(&self) -> Option<&Path>;
}

/// Applies the config file (if present) over `defaults`, then `cli` over that.
pub fn load_layers<C: Layered>(defaults: C, cli: C, default_file: &str) -> Result<C> {
    let path = cli
        .config_path()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(default_file));

    let mut current = defaults;
    if path.exists() {
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let file_config: C = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        current = current.merge(file_config);
    }
    Ok(current.merge(cli))
}

fn positive_secs(name: &str, secs: u64) -> Result<Duration> {
    if secs == 0 {
        bail!("{} must be greater than zero", name);
    }
    Ok(Duration::from_secs(secs))
}

// ---------------------------------------------------------------------------
// server_fx
// ---------------------------------------------------------------------------

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "USD/KRW rate cache service", version)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    #[clap(long, env = "FX_SERVICE_PORT", help = "TCP port of the lookup protocol.")]
    pub port: Option<u16>,

    #[clap(long, env = "FX_SERVICE_HOST", help = "Address to listen on.")]
    pub host: Option<String>,

    #[clap(long, env = "FX_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "FX_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "FX_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "FX_CACHE_TTL_SECONDS", help = "Seconds a cached rate is served without refreshing.")]
    pub cache_ttl_seconds: Option<u64>,

    #[clap(long, env = "FX_REFRESH_MIN_SECONDS", help = "Shortest pause of the periodic refresher.")]
    pub refresh_min_seconds: Option<u64>,

    #[clap(long, env = "FX_REFRESH_MAX_SECONDS", help = "Longest pause of the periodic refresher.")]
    pub refresh_max_seconds: Option<u64>,

    #[clap(long, env = "FX_BAND_MIN", help = "Exclusive lower bound of plausible rates.")]
    pub band_min: Option<f64>,

    #[clap(long, env = "FX_BAND_MAX", help = "Exclusive upper bound of plausible rates.")]
    pub band_max: Option<f64>,

    #[clap(long, env = "FX_BASE_CURRENCY", help = "Base currency code.")]
    pub base_currency: Option<String>,

    #[clap(long, env = "FX_QUOTE_CURRENCY", help = "Quote currency code.")]
    pub quote_currency: Option<String>,

    #[clap(long, env = "FX_PAGE_URL", help = "Quote page of the primary source.")]
    pub page_url: Option<String>,

    #[clap(long, env = "FX_PAGE_INSTRUMENT_ID", help = "Legacy instrument id used in the page markup.")]
    pub page_instrument_id: Option<u32>,

    #[clap(long, env = "FX_API_URL", help = "Base URL of the fallback rates API.")]
    pub api_url: Option<String>,

    #[clap(long, env = "FX_PAGE_TIMEOUT_SECONDS", help = "Time budget of one page fetch.")]
    pub page_timeout_seconds: Option<u64>,

    #[clap(long, env = "FX_API_TIMEOUT_SECONDS", help = "Time budget of one API fetch.")]
    pub api_timeout_seconds: Option<u64>,

    #[clap(long, env = "FX_STATE_FILE", help = "State file published on every refresh.")]
    pub state_file: Option<PathBuf>,
}

impl Layered for ServiceConfig {
    fn merge(self, other: ServiceConfig) -> ServiceConfig {
        ServiceConfig {
            port: other.port.or(self.port),
            host: other.host.or(self.host),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            cache_ttl_seconds: other.cache_ttl_seconds.or(self.cache_ttl_seconds),
            refresh_min_seconds: other.refresh_min_seconds.or(self.refresh_min_seconds),
            refresh_max_seconds: other.refresh_max_seconds.or(self.refresh_max_seconds),
            band_min: other.band_min.or(self.band_min),
            band_max: other.band_max.or(self.band_max),
            base_currency: other.base_currency.or(self.base_currency),
            quote_currency: other.quote_currency.or(self.quote_currency),
            page_url: other.page_url.or(self.page_url),
            page_instrument_id: other.page_instrument_id.or(self.page_instrument_id),
            api_url: other.api_url.or(self.api_url),
            page_timeout_seconds: other.page_timeout_seconds.or(self.page_timeout_seconds),
            api_timeout_seconds: other.api_timeout_seconds.or(self.api_timeout_seconds),
            state_file: other.state_file.or(self.state_file),
        }
    }

    fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }
}

impl ServiceConfig {
    /// Built-in defaults. Source URLs are derived from the currency pair
    /// when resolving, so they are left unset here.
    pub fn defaults() -> Self {
        ServiceConfig {
            port: Some(lib_common::core::DEFAULT_PORT),
            host: Some("127.0.0.1".to_string()),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            cache_ttl_seconds: Some(10),
            refresh_min_seconds: Some(8),
            refresh_max_seconds: Some(13),
            band_min: Some(1000.0),
            band_max: Some(2000.0),
            base_currency: Some("USD".to_string()),
            quote_currency: Some("KRW".to_string()),
            page_timeout_seconds: Some(15),
            api_timeout_seconds: Some(5),
            state_file: Some(PathBuf::from(DEFAULT_STATE_FILE)),
            ..Default::default()
        }
    }

    /// Checks the merged values and turns them into typed settings.
    pub fn resolve(self) -> Result<ServiceSettings> {
        let defaults = ServiceConfig::defaults().merge(self);

        let band_min = defaults.band_min.unwrap_or(1000.0);
        let band_max = defaults.band_max.unwrap_or(2000.0);
        let band = RateBand::new(band_min, band_max).with_context(|| {
            format!("invalid rate band: min {} must be below max {}", band_min, band_max)
        })?;

        let refresh = RefreshSchedule {
            min: positive_secs("refresh min seconds", defaults.refresh_min_seconds.unwrap_or(8))?,
            max: positive_secs("refresh max seconds", defaults.refresh_max_seconds.unwrap_or(13))?,
        };
        if refresh.min > refresh.max {
            bail!(
                "refresh min ({:?}) must not exceed refresh max ({:?})",
                refresh.min,
                refresh.max
            );
        }

        let ttl = positive_secs("cache ttl seconds", defaults.cache_ttl_seconds.unwrap_or(10))?;

        let base = defaults.base_currency.unwrap_or_else(|| "USD".to_string()).to_uppercase();
        let quote = defaults.quote_currency.unwrap_or_else(|| "KRW".to_string()).to_uppercase();
        let is_usd_krw = base == "USD" && quote == "KRW";

        let mut page = PageFetcherConfig::default();
        page.timeout = positive_secs("page timeout seconds", defaults.page_timeout_seconds.unwrap_or(15))?;
        if let Some(url) = defaults.page_url {
            page.url = url;
        } else if !is_usd_krw {
            page.url = format!(
                "https://www.investing.com/currencies/{}-{}",
                base.to_lowercase(),
                quote.to_lowercase()
            );
        }
        page.instrument_id = defaults
            .page_instrument_id
            .or(if is_usd_krw { page.instrument_id } else { None });

        let mut api = ApiFetcherConfig {
            base_currency: base,
            quote_currency: quote,
            timeout: positive_secs("api timeout seconds", defaults.api_timeout_seconds.unwrap_or(5))?,
            ..ApiFetcherConfig::default()
        };
        if let Some(url) = defaults.api_url {
            api.base_url = url;
        }

        let host = defaults.host.unwrap_or_else(|| "127.0.0.1".to_string());
        let port = defaults.port.unwrap_or(lib_common::core::DEFAULT_PORT);

        Ok(ServiceSettings {
            listen_addr: format!("{}:{}", host, port),
            ttl,
            refresh,
            band,
            page,
            api,
            state_file: defaults.state_file.unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE)),
            log_dir: defaults.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: defaults.log_level.unwrap_or_else(|| "info".to_string()),
        })
    }
}

/// Validated settings of `server_fx`.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub listen_addr: String,
    pub ttl: Duration,
    pub refresh: RefreshSchedule,
    pub band: RateBand,
    pub page: PageFetcherConfig,
    pub api: ApiFetcherConfig,
    pub state_file: PathBuf,
    pub log_dir: PathBuf,
    pub log_level: String,
}

/// Defaults <- `server_fx.conf` <- env/CLI.
pub fn load_service_settings() -> Result<ServiceSettings> {
    load_layers(ServiceConfig::defaults(), ServiceConfig::parse(), "server_fx.conf")?.resolve()
}

// ---------------------------------------------------------------------------
// fx_watchdog
// ---------------------------------------------------------------------------

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Supervisor that restarts the rate service when it dies or its data goes stale", version)]
#[serde(rename_all = "camelCase")]
pub struct WatchdogArgs {
    #[clap(long, env = "FX_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "FX_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "FX_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "FX_STATE_FILE", help = "State file published by the producer.")]
    pub state_file: Option<PathBuf>,

    #[clap(long, env = "FX_PRODUCER_TAG", help = "Command-line substring identifying the producer.")]
    pub producer_tag: Option<String>,

    #[clap(long, env = "FX_PRODUCER_COMMAND", help = "Executable launched on restart.")]
    pub producer_command: Option<PathBuf>,

    #[clap(long, env = "FX_PRODUCER_ARGS", help = "Whitespace separated arguments for the producer.")]
    pub producer_args: Option<String>,

    #[clap(long, env = "FX_PRODUCER_LOG", help = "File receiving the producer's output.")]
    pub producer_log: Option<PathBuf>,

    #[clap(long, env = "FX_AUX_KILL_TAGS", help = "Comma separated command-line substrings also killed on restart.")]
    pub aux_kill_tags: Option<String>,

    #[clap(long, env = "FX_MAX_AGE_SECONDS", help = "Oldest acceptable data, in seconds.")]
    pub max_age_seconds: Option<u64>,

    #[clap(long, env = "FX_CHECK_INTERVAL_SECONDS", help = "Seconds between checks.")]
    pub check_interval_seconds: Option<u64>,

    #[clap(long, env = "FX_STALE_THRESHOLD", help = "Consecutive stale checks that trigger a restart.")]
    pub stale_threshold: Option<u32>,

    #[clap(long, env = "FX_SETTLE_SECONDS", help = "Pause between terminate and relaunch.")]
    pub settle_seconds: Option<u64>,

    #[clap(long, env = "FX_STARTUP_GRACE_SECONDS", help = "Pause between relaunch and the liveness re-check.")]
    pub startup_grace_seconds: Option<u64>,

    #[clap(long, env = "FX_BACKOFF_BASE_SECONDS", help = "Cooldown after the first failed restart.")]
    pub backoff_base_seconds: Option<u64>,

    #[clap(long, env = "FX_BACKOFF_MAX_SECONDS", help = "Cooldown ceiling.")]
    pub backoff_max_seconds: Option<u64>,
}

impl Layered for WatchdogArgs {
    fn merge(self, other: WatchdogArgs) -> WatchdogArgs {
        WatchdogArgs {
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            state_file: other.state_file.or(self.state_file),
            producer_tag: other.producer_tag.or(self.producer_tag),
            producer_command: other.producer_command.or(self.producer_command),
            producer_args: other.producer_args.or(self.producer_args),
            producer_log: other.producer_log.or(self.producer_log),
            aux_kill_tags: other.aux_kill_tags.or(self.aux_kill_tags),
            max_age_seconds: other.max_age_seconds.or(self.max_age_seconds),
            check_interval_seconds: other.check_interval_seconds.or(self.check_interval_seconds),
            stale_threshold: other.stale_threshold.or(self.stale_threshold),
            settle_seconds: other.settle_seconds.or(self.settle_seconds),
            startup_grace_seconds: other.startup_grace_seconds.or(self.startup_grace_seconds),
            backoff_base_seconds: other.backoff_base_seconds.or(self.backoff_base_seconds),
            backoff_max_seconds: other.backoff_max_seconds.or(self.backoff_max_seconds),
        }
    }

    fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }
}

/// `server_fx` next to the running executable.
fn sibling_producer() -> PathBuf {
    let name = format!("server_fx{}", std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .map(|exe| exe.with_file_name(&name))
        .unwrap_or_else(|_| PathBuf::from(name))
}

impl WatchdogArgs {
    pub fn defaults() -> Self {
        WatchdogArgs {
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            state_file: Some(PathBuf::from(DEFAULT_STATE_FILE)),
            producer_tag: Some("server_fx".to_string()),
            producer_log: Some(PathBuf::from("./logs/server_fx.out")),
            max_age_seconds: Some(30),
            check_interval_seconds: Some(10),
            stale_threshold: Some(3),
            settle_seconds: Some(2),
            startup_grace_seconds: Some(5),
            backoff_base_seconds: Some(10),
            backoff_max_seconds: Some(300),
            ..Default::default()
        }
    }

    pub fn resolve(self) -> Result<WatchdogSettings> {
        let merged = WatchdogArgs::defaults().merge(self);

        let stale_threshold = merged.stale_threshold.unwrap_or(3);
        if stale_threshold == 0 {
            bail!("stale threshold must be at least 1");
        }

        let policy = RestartPolicy {
            backoff_base: positive_secs("backoff base seconds", merged.backoff_base_seconds.unwrap_or(10))?,
            backoff_max: positive_secs("backoff max seconds", merged.backoff_max_seconds.unwrap_or(300))?,
        };
        if policy.backoff_base > policy.backoff_max {
            bail!("backoff base must not exceed backoff max");
        }

        let tag = merged.producer_tag.unwrap_or_else(|| "server_fx".to_string());
        if tag.trim().is_empty() {
            bail!("producer tag must not be empty");
        }

        let state_file = merged.state_file.unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE));
        let watchdog = WatchdogConfig {
            state_file,
            max_age: positive_secs("max age seconds", merged.max_age_seconds.unwrap_or(30))?,
            check_interval: positive_secs("check interval seconds", merged.check_interval_seconds.unwrap_or(10))?,
            stale_threshold,
            settle: Duration::from_secs(merged.settle_seconds.unwrap_or(2)),
            startup_grace: Duration::from_secs(merged.startup_grace_seconds.unwrap_or(5)),
            policy,
        };

        let producer = ProducerSpec {
            tag,
            command: merged.producer_command.unwrap_or_else(sibling_producer),
            args: split_words(merged.producer_args.as_deref().unwrap_or("")),
            log_path: merged.producer_log.unwrap_or_else(|| PathBuf::from("./logs/server_fx.out")),
            aux_kill_tags: split_list(merged.aux_kill_tags.as_deref().unwrap_or("")),
        };

        Ok(WatchdogSettings {
            watchdog,
            producer,
            log_dir: merged.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: merged.log_level.unwrap_or_else(|| "info".to_string()),
        })
    }
}

fn split_words(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Validated settings of `fx_watchdog`.
#[derive(Debug, Clone)]
pub struct WatchdogSettings {
    pub watchdog: WatchdogConfig,
    pub producer: ProducerSpec,
    pub log_dir: PathBuf,
    pub log_level: String,
}

/// Defaults <- `fx_watchdog.conf` <- env/CLI.
pub fn load_watchdog_settings() -> Result<WatchdogSettings> {
    load_layers(WatchdogArgs::defaults(), WatchdogArgs::parse(), "fx_watchdog.conf")?.resolve()
}

// ---------------------------------------------------------------------------
// fx_client
// ---------------------------------------------------------------------------

#[derive(Parser, Debug, Clone)]
#[clap(about = "Send one command to the rate service and print the reply", version)]
pub struct ClientArgs {
    #[clap(default_value = "GET_RATE", help = "GET_RATE, STATS or SHUTDOWN.")]
    pub command: String,

    #[clap(long, env = "FX_SERVICE_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[clap(long, env = "FX_SERVICE_PORT", default_value_t = lib_common::core::DEFAULT_PORT)]
    pub port: u16,

    #[clap(long, default_value_t = 5000, help = "Overall request timeout in milliseconds.")]
    pub timeout_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_defaults_resolve() {
        let settings = ServiceConfig::default().resolve().unwrap();
        assert_eq!(settings.listen_addr, "127.0.0.1:9516");
        assert_eq!(settings.ttl, Duration::from_secs(10));
        assert_eq!(settings.band, RateBand::default());
        assert_eq!(settings.refresh, RefreshSchedule::default());
        assert_eq!(settings.page.instrument_id, Some(650));
        assert_eq!(settings.api.quote_currency, "KRW");
    }

    #[test]
    fn file_overrides_defaults_and_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server_fx.conf");
        fs::write(&path, r#"{"port": 9600, "cacheTtlSeconds": 20, "logLevel": "debug"}"#).unwrap();

        let cli = ServiceConfig::try_parse_from([
            "server_fx",
            "--config-path",
            path.to_str().unwrap(),
            "--port",
            "9700",
        ])
        .unwrap();

        let merged = load_layers(ServiceConfig::defaults(), cli, "server_fx.conf").unwrap();
        assert_eq!(merged.port, Some(9700));
        assert_eq!(merged.cache_ttl_seconds, Some(20));
        assert_eq!(merged.log_level.as_deref(), Some("debug"));
        assert_eq!(merged.refresh_max_seconds, Some(13));
    }

    #[test]
    fn unparsable_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.conf");
        fs::write(&path, "{ port: ").unwrap();
        let cli = ServiceConfig {
            config_path: Some(path),
            ..Default::default()
        };
        assert!(load_layers(ServiceConfig::defaults(), cli, "server_fx.conf").is_err());
    }

    #[test]
    fn inverted_band_is_rejected() {
        let cfg = ServiceConfig {
            band_min: Some(2000.0),
            band_max: Some(1000.0),
            ..Default::default()
        };
        let err = cfg.resolve().unwrap_err().to_string();
        assert!(err.contains("invalid rate band"), "{err}");
    }

    #[test]
    fn inverted_refresh_schedule_is_rejected() {
        let cfg = ServiceConfig {
            refresh_min_seconds: Some(20),
            refresh_max_seconds: Some(10),
            ..Default::default()
        };
        assert!(cfg.resolve().is_err());
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let cfg = ServiceConfig {
            cache_ttl_seconds: Some(0),
            ..Default::default()
        };
        assert!(cfg.resolve().is_err());
    }

    #[test]
    fn other_pairs_derive_page_url() {
        let cfg = ServiceConfig {
            base_currency: Some("eur".to_string()),
            quote_currency: Some("krw".to_string()),
            ..Default::default()
        };
        let settings = cfg.resolve().unwrap();
        assert_eq!(settings.page.url, "https://www.investing.com/currencies/eur-krw");
        assert_eq!(settings.page.instrument_id, None);
        assert_eq!(settings.api.base_currency, "EUR");
    }

    #[test]
    fn watchdog_defaults_resolve() {
        let settings = WatchdogArgs::default().resolve().unwrap();
        assert_eq!(settings.watchdog.max_age, Duration::from_secs(30));
        assert_eq!(settings.watchdog.stale_threshold, 3);
        assert_eq!(settings.watchdog.policy, RestartPolicy::default());
        assert_eq!(settings.producer.tag, "server_fx");
        assert!(settings.producer.aux_kill_tags.is_empty());
    }

    #[test]
    fn watchdog_lists_are_split() {
        let args = WatchdogArgs {
            producer_args: Some("--port 9600  --log-level debug".to_string()),
            aux_kill_tags: Some("chromedriver, headless_shell,,".to_string()),
            ..Default::default()
        };
        let settings = args.resolve().unwrap();
        assert_eq!(settings.producer.args, vec!["--port", "9600", "--log-level", "debug"]);
        assert_eq!(settings.producer.aux_kill_tags, vec!["chromedriver", "headless_shell"]);
    }

    #[test]
    fn zero_stale_threshold_is_rejected() {
        let args = WatchdogArgs {
            stale_threshold: Some(0),
            ..Default::default()
        };
        assert!(args.resolve().is_err());
    }

    #[test]
    fn client_defaults_to_get_rate() {
        let args = ClientArgs::try_parse_from(["fx_client"]).unwrap();
        assert_eq!(args.command, "GET_RATE");
        assert_eq!(args.timeout_ms, 5000);
    }
}
