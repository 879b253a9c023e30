//! Normalized, read-only view of one locate request.
//!
//! Raw caller input arrives as a [`QueryRequest`] (serde) and is filtered
//! into a [`Query`]: invalid or duplicate cells and WiFi keys are dropped,
//! the IP is parsed, and the fallback policy map is kept raw so that a
//! malformed map can be reported instead of rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use tracing::debug;

use super::types::LocationError;

const MAX_CID: i64 = 268_435_455;

/// Cellular radio generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Radio {
    Gsm,
    Wcdma,
    Lte,
}

impl FromStr for Radio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gsm" => Ok(Self::Gsm),
            "wcdma" | "umts" => Ok(Self::Wcdma),
            "lte" => Ok(Self::Lte),
            other => Err(format!("unknown radio type '{}'", other)),
        }
    }
}

impl fmt::Display for Radio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gsm => write!(f, "gsm"),
            Self::Wcdma => write!(f, "wcdma"),
            Self::Lte => write!(f, "lte"),
        }
    }
}

/// Identifies a location area (all cells sharing radio/mcc/mnc/lac).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellAreaKey {
    pub radio: Radio,
    pub mcc: u16,
    pub mnc: u16,
    pub lac: u32,
}

impl fmt::Display for CellAreaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.radio, self.mcc, self.mnc, self.lac)
    }
}

/// Identifies a single cell tower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellKey {
    #[serde(flatten)]
    pub area: CellAreaKey,
    pub cid: u32,
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.area, self.cid)
    }
}

/// A validated cell observation from the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellLookup {
    pub area: CellAreaKey,
    pub cid: Option<u32>,
    pub signal: Option<i32>,
}

impl CellLookup {
    pub fn cell_key(&self) -> Option<CellKey> {
        self.cid.map(|cid| CellKey { area: self.area, cid })
    }
}

/// A validated WiFi observation from the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiLookup {
    /// 12 lowercase hex digits.
    pub key: String,
    pub signal: Option<i32>,
}

// ─── Raw request ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CellRequest {
    pub radio: String,
    pub mcc: i64,
    pub mnc: i64,
    pub lac: i64,
    #[serde(default)]
    pub cid: Option<i64>,
    #[serde(default)]
    pub signal: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WifiRequest {
    pub key: String,
    #[serde(default)]
    pub signal: Option<i32>,
}

/// Caller input before normalization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub cell: Vec<CellRequest>,
    #[serde(default)]
    pub wifi: Vec<WifiRequest>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub fallbacks: Option<Value>,
}

// ─── Normalized query ───────────────────────────────────────────

/// Immutable per-request query shared by every provider.
#[derive(Debug, Clone, Default)]
pub struct Query {
    cells: Vec<CellLookup>,
    wifis: Vec<WifiLookup>,
    ip: Option<IpAddr>,
    fallbacks: Option<Value>,
}

impl Query {
    pub fn from_request(request: QueryRequest) -> Self {
        let mut seen_cells = HashSet::new();
        let cells = request
            .cell
            .iter()
            .filter_map(normalize_cell)
            .filter(|c| seen_cells.insert((c.area, c.cid)))
            .collect();

        let mut seen_wifis = HashSet::new();
        let wifis = request
            .wifi
            .iter()
            .filter_map(|w| {
                let key = normalize_wifi_key(&w.key)?;
                Some(WifiLookup { key, signal: w.signal })
            })
            .filter(|w| seen_wifis.insert(w.key.clone()))
            .collect();

        let ip = request.ip.as_deref().and_then(|raw| match raw.trim().parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                debug!("ignoring unparseable ip '{}'", raw);
                None
            }
        });

        Self {
            cells,
            wifis,
            ip,
            fallbacks: request.fallbacks,
        }
    }

    pub fn cells(&self) -> &[CellLookup] {
        &self.cells
    }

    /// Distinct location areas of the query cells, in query order.
    pub fn cell_areas(&self) -> Vec<CellAreaKey> {
        let mut seen = HashSet::new();
        self.cells
            .iter()
            .map(|c| c.area)
            .filter(|a| seen.insert(*a))
            .collect()
    }

    pub fn wifis(&self) -> &[WifiLookup] {
        &self.wifis
    }

    pub fn ip(&self) -> Option<IpAddr> {
        self.ip
    }

    /// Raw value of one fallback policy flag.
    ///
    /// A missing or null map yields `Ok(None)`; anything that is not a JSON
    /// object is malformed.
    pub fn fallback(&self, name: &str) -> Result<Option<&Value>, LocationError> {
        match &self.fallbacks {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) => Ok(map.get(name)),
            Some(other) => Err(LocationError::MalformedFallbacks(format!(
                "expected an object, got {}",
                other
            ))),
        }
    }
}

fn normalize_cell(raw: &CellRequest) -> Option<CellLookup> {
    let radio: Radio = raw.radio.parse().ok()?;
    if !(1..=999).contains(&raw.mcc) || !(0..=32767).contains(&raw.mnc) || !(1..=65535).contains(&raw.lac) {
        return None;
    }
    let cid = match raw.cid {
        None => None,
        Some(cid) if (1..=MAX_CID).contains(&cid) => Some(cid as u32),
        Some(_) => return None,
    };
    Some(CellLookup {
        area: CellAreaKey {
            radio,
            mcc: raw.mcc as u16,
            mnc: raw.mnc as u16,
            lac: raw.lac as u32,
        },
        cid,
        signal: raw.signal,
    })
}

/// Normalize a MAC-style key to 12 lowercase hex digits.
///
/// Rejects anything that is not 12 hex digits after stripping separators,
/// as well as the all-zero and broadcast addresses.
pub fn normalize_wifi_key(raw: &str) -> Option<String> {
    let key: String = raw
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .collect::<String>()
        .to_lowercase();
    if key.len() != 12 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    if key == "000000000000" || key == "ffffffffffff" {
        return None;
    }
    Some(key)
}
