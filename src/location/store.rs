//! Backing stores consumed by the providers.
//!
//! `NetworkStore` resolves WiFi keys, cells and cell areas to stored
//! positions. `GeoIpDb` resolves IP addresses. The JSON file store serves
//! both and is what the binary uses by default (~/.locus/networks.json);
//! `MaxMindDb` adapts a GeoLite2/GeoIP2 City database.

use async_trait::async_trait;
use maxminddb::{geoip2, MaxMindDBError, Reader};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

use super::network::Network;
use super::query::{normalize_wifi_key, CellAreaKey, CellKey};
use super::types::LocationError;

/// What to resolve against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupCriteria {
    /// Normalized WiFi keys.
    Wifi(Vec<String>),
    Cell(Vec<CellKey>),
    CellArea(Vec<CellAreaKey>),
}

/// Read-only network record store.
#[async_trait]
pub trait NetworkStore: Send + Sync {
    /// Resolve the criteria. Unknown keys are skipped; matches come back
    /// in criteria order.
    ///
    /// `Network::key` of every match must be the `Display` form of the key
    /// that was asked for: the normalized WiFi key, `CellKey` as
    /// `radio:mcc:mnc:lac:cid`, `CellAreaKey` as `radio:mcc:mnc:lac`.
    /// Providers map matches back to the query by that string.
    async fn lookup(&self, criteria: &LookupCriteria) -> Result<Vec<Network>, LocationError>;

    /// Store name (for logs)
    fn name(&self) -> &'static str;
}

/// A GeoIP match. Any field may be missing for coarse blocks.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GeoIpRecord {
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    /// Radius in meters.
    #[serde(default)]
    pub radius: Option<f64>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub country_name: Option<String>,
}

/// IP address to geo-block database.
pub trait GeoIpDb: Send + Sync {
    fn geoip_lookup(&self, ip: IpAddr) -> Result<Option<GeoIpRecord>, LocationError>;
}

// ─── JSON file store ────────────────────────────────────────────

#[derive(Deserialize)]
struct WifiRecord {
    key: String,
    lat: f64,
    lon: f64,
    #[serde(default)]
    range: Option<f64>,
}

#[derive(Deserialize)]
struct CellRecord {
    #[serde(flatten)]
    key: CellKey,
    lat: f64,
    lon: f64,
    #[serde(default)]
    range: Option<f64>,
}

#[derive(Deserialize)]
struct CellAreaRecord {
    #[serde(flatten)]
    key: CellAreaKey,
    lat: f64,
    lon: f64,
    #[serde(default)]
    range: Option<f64>,
}

#[derive(Deserialize)]
struct GeoIpEntry {
    ip: IpAddr,
    #[serde(flatten)]
    record: GeoIpRecord,
}

#[derive(Deserialize, Default)]
struct StoreFile {
    #[serde(default)]
    wifi: Vec<WifiRecord>,
    #[serde(default)]
    cell: Vec<CellRecord>,
    #[serde(default)]
    cell_area: Vec<CellAreaRecord>,
    #[serde(default)]
    geoip: Vec<GeoIpEntry>,
}

/// In-memory store loaded from a JSON document.
#[derive(Debug, Default)]
pub struct JsonNetworkStore {
    wifis: HashMap<String, Network>,
    cells: HashMap<CellKey, Network>,
    areas: HashMap<CellAreaKey, Network>,
    geoip: HashMap<IpAddr, GeoIpRecord>,
}

impl JsonNetworkStore {
    /// Load from the default location (~/.locus/networks.json).
    pub fn load() -> Result<Self, LocationError> {
        Self::load_from(&Self::default_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, LocationError> {
        let data = fs::read_to_string(path)
            .map_err(|e| LocationError::Store(format!("{}: {}", path.display(), e)))?;
        let store = Self::from_json(&data)?;
        debug!(
            "loaded {} wifis, {} cells, {} areas, {} geoip blocks from {}",
            store.wifis.len(),
            store.cells.len(),
            store.areas.len(),
            store.geoip.len(),
            path.display()
        );
        Ok(store)
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".locus")
            .join("networks.json")
    }

    pub fn from_json(data: &str) -> Result<Self, LocationError> {
        let file: StoreFile = serde_json::from_str(data).map_err(|e| LocationError::Store(e.to_string()))?;
        let mut store = Self::default();

        for w in file.wifi {
            match normalize_wifi_key(&w.key) {
                Some(key) => {
                    store.wifis.insert(
                        key.clone(),
                        Network {
                            key,
                            lat: w.lat,
                            lon: w.lon,
                            range: w.range,
                        },
                    );
                }
                None => warn!("skipping stored wifi with invalid key '{}'", w.key),
            }
        }
        for c in file.cell {
            store.cells.insert(
                c.key,
                Network {
                    key: c.key.to_string(),
                    lat: c.lat,
                    lon: c.lon,
                    range: c.range,
                },
            );
        }
        for a in file.cell_area {
            store.areas.insert(
                a.key,
                Network {
                    key: a.key.to_string(),
                    lat: a.lat,
                    lon: a.lon,
                    range: a.range,
                },
            );
        }
        for g in file.geoip {
            store.geoip.insert(g.ip, g.record);
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.wifis.len() + self.cells.len() + self.areas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl NetworkStore for JsonNetworkStore {
    async fn lookup(&self, criteria: &LookupCriteria) -> Result<Vec<Network>, LocationError> {
        let found: Vec<Network> = match criteria {
            LookupCriteria::Wifi(keys) => keys.iter().filter_map(|k| self.wifis.get(k)).cloned().collect(),
            LookupCriteria::Cell(keys) => keys.iter().filter_map(|k| self.cells.get(k)).cloned().collect(),
            LookupCriteria::CellArea(keys) => keys.iter().filter_map(|k| self.areas.get(k)).cloned().collect(),
        };
        trace!("json store lookup {:?} -> {} matches", criteria, found.len());
        Ok(found)
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

impl GeoIpDb for JsonNetworkStore {
    fn geoip_lookup(&self, ip: IpAddr) -> Result<Option<GeoIpRecord>, LocationError> {
        Ok(self.geoip.get(&ip).cloned())
    }
}

// ─── MaxMind ────────────────────────────────────────────────────

/// GeoIP database backed by a MaxMind City `.mmdb` file.
pub struct MaxMindDb {
    reader: Reader<Vec<u8>>,
}

impl MaxMindDb {
    pub fn open(path: &Path) -> Result<Self, LocationError> {
        let reader = Reader::open_readfile(path)
            .map_err(|e| LocationError::Store(format!("{}: {}", path.display(), e)))?;
        Ok(Self { reader })
    }
}

impl GeoIpDb for MaxMindDb {
    fn geoip_lookup(&self, ip: IpAddr) -> Result<Option<GeoIpRecord>, LocationError> {
        let city: geoip2::City = match self.reader.lookup(ip) {
            Ok(city) => city,
            Err(MaxMindDBError::AddressNotFoundError(_)) => return Ok(None),
            Err(e) => return Err(LocationError::Store(e.to_string())),
        };

        let location = city.location.as_ref();
        let country = city.country.as_ref();

        // MaxMind reports the radius in kilometers
        let record = GeoIpRecord {
            lat: location.and_then(|l| l.latitude),
            lon: location.and_then(|l| l.longitude),
            radius: location.and_then(|l| l.accuracy_radius).map(|km| f64::from(km) * 1000.0),
            country_code: country.and_then(|c| c.iso_code).map(String::from),
            country_name: country
                .and_then(|c| c.names.as_ref())
                .and_then(|names| names.get("en"))
                .map(|s| s.to_string()),
        };
        trace!("maxmind lookup for {}: {:?}", ip, record);
        Ok(Some(record))
    }
}
