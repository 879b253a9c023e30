use clap::Parser;
use locus::config::Settings;
use locus::location::providers::HttpFallbackClient;
use locus::location::query::{CellRequest, WifiRequest};
use locus::location::{GeoIpDb, JsonNetworkStore, Locator, MaxMindDb, NetworkStore, Query, QueryRequest, SearchKind};
use locus::stats::{ApiKey, NoopStats, StatsSink, StatsdClient, TracingReporter};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Locus: locate a device from the networks it can see.
///
/// Combines nearby WiFi access points, cell towers and the client IP into a
/// single position (or country) estimate and prints it as JSON.
///
/// Examples:
///   locus --wifi 01:23:45:67:89:ab --wifi 01:23:45:67:89:ac
///   locus --cell lte:262:1:7033:17811 --ip 81.2.69.160
///   locus --ip 81.2.69.160 --country
///   locus --cell gsm:262:1:5 --fallback lacf=false
#[derive(Parser)]
#[command(name = "locus", version, about, long_about = None)]
struct Cli {
    /// TOML settings file.
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// JSON network record store. Overrides [store] path.
    #[arg(long)]
    store: Option<PathBuf>,

    /// MaxMind City database. Overrides [store] geoip_path.
    #[arg(long)]
    geoip: Option<PathBuf>,

    /// Observed WiFi access point (MAC address). Repeatable.
    #[arg(long, short = 'w')]
    wifi: Vec<String>,

    /// Observed cell as radio:mcc:mnc:lac[:cid]. Repeatable.
    #[arg(long, value_parser = parse_cell)]
    cell: Vec<CellRequest>,

    /// Client IP address.
    #[arg(long)]
    ip: Option<String>,

    /// Fallback policy flag as name=bool (e.g. ipf=false). Repeatable.
    #[arg(long, value_parser = parse_fallback)]
    fallback: Vec<(String, bool)>,

    /// Caller name used for per-caller counters.
    #[arg(long, default_value = "cli")]
    api_key: String,

    /// Emit per-caller counters.
    #[arg(long)]
    log_stats: bool,

    /// Allow the external fallback service.
    #[arg(long)]
    allow_fallback: bool,

    /// Resolve the country instead of a position.
    #[arg(long)]
    country: bool,
}

fn parse_cell(s: &str) -> Result<CellRequest, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 4 && parts.len() != 5 {
        return Err(format!("Invalid cell '{}'. Use radio:mcc:mnc:lac[:cid].", s));
    }
    let num = |field: &str, raw: &str| -> Result<i64, String> {
        raw.trim()
            .parse()
            .map_err(|_| format!("Invalid {} '{}' in cell '{}'", field, raw, s))
    };
    Ok(CellRequest {
        radio: parts[0].to_string(),
        mcc: num("mcc", parts[1])?,
        mnc: num("mnc", parts[2])?,
        lac: num("lac", parts[3])?,
        cid: parts.get(4).map(|raw| num("cid", raw)).transpose()?,
        signal: None,
    })
}

fn parse_fallback(s: &str) -> Result<(String, bool), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid fallback '{}'. Use name=true or name=false.", s))?;
    let value = match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => true,
        "false" | "0" | "no" => false,
        other => return Err(format!("Invalid fallback value '{}'", other)),
    };
    Ok((name.trim().to_string(), value))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // ── Settings ────────────────────────────────────────────────

    let mut settings = match &cli.config {
        Some(path) => Settings::load(path).unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }),
        None => Settings::default(),
    };
    if cli.store.is_some() {
        settings.store.path = cli.store.clone();
    }
    if cli.geoip.is_some() {
        settings.store.geoip_path = cli.geoip.clone();
    }

    // ── Backends ────────────────────────────────────────────────

    let store = Arc::new(load_store(&settings));
    let geoip: Arc<dyn GeoIpDb> = match &settings.store.geoip_path {
        Some(path) => Arc::new(MaxMindDb::open(path).unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        })),
        None => store.clone(),
    };
    let stats: Arc<dyn StatsSink> = if settings.statsd.enabled {
        match StatsdClient::new(&settings.statsd) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                warn!("statsd disabled: {}", e);
                NoopStats::arc()
            }
        }
    } else {
        NoopStats::arc()
    };

    let network_store: Arc<dyn NetworkStore> = store;
    let mut locator = Locator::new(network_store, geoip, settings.clone(), stats, Arc::new(TracingReporter));
    if let Some(client) = HttpFallbackClient::from_settings(&settings.fallback) {
        locator = locator.with_fallback_client(Arc::new(client));
    }

    // ── Query ───────────────────────────────────────────────────

    let query = Query::from_request(build_request(&cli));
    let api_key = ApiKey::new(cli.api_key.clone())
        .with_log(cli.log_stats)
        .with_fallback(cli.allow_fallback);
    let kind = if cli.country { SearchKind::Country } else { SearchKind::Position };

    // ── Search ──────────────────────────────────────────────────

    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("Error: Cannot start runtime: {}", e);
        std::process::exit(1);
    });
    let location = runtime.block_on(locator.locate(api_key, kind, &query));

    match serde_json::to_string_pretty(&location) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// An explicitly configured store must load; a missing default store just
/// means no network records.
fn load_store(settings: &Settings) -> JsonNetworkStore {
    let (path, explicit) = match &settings.store.path {
        Some(path) => (path.clone(), true),
        None => (JsonNetworkStore::default_path(), false),
    };
    if !explicit && !path.exists() {
        warn!("no network store at {}, continuing without network records", path.display());
        return JsonNetworkStore::default();
    }
    match JsonNetworkStore::load_from(&path) {
        Ok(store) => {
            info!("{} network records from {}", store.len(), path.display());
            store
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn build_request(cli: &Cli) -> QueryRequest {
    let fallbacks = if cli.fallback.is_empty() {
        None
    } else {
        let map: Map<String, Value> = cli
            .fallback
            .iter()
            .map(|(name, value)| (name.clone(), Value::Bool(*value)))
            .collect();
        Some(Value::Object(map))
    };
    QueryRequest {
        cell: cli.cell.clone(),
        wifi: cli
            .wifi
            .iter()
            .map(|key| WifiRequest {
                key: key.clone(),
                signal: None,
            })
            .collect(),
        ip: cli.ip.clone(),
        fallbacks,
    }
}
