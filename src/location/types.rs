//! Core types for the location subsystem.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where an estimate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// Computed from our own network records.
    Internal,
    /// Returned by a third-party locate service.
    Fallback,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal => write!(f, "internal"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Which found variant a provider produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationType {
    Position,
    Country,
}

/// Provenance stamped on every found result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provenance {
    pub source: DataSource,
    /// Name of the query fallback flag that authorized the attempt.
    pub fallback: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    /// Accuracy radius in meters, never below the producing source's floor.
    pub accuracy: f64,
    #[serde(flatten)]
    pub provenance: Provenance,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Country {
    /// ISO 3166-1 alpha-2 code
    pub country_code: String,
    pub country_name: String,
    #[serde(flatten)]
    pub provenance: Provenance,
}

/// The outcome of one provider run, or of a whole search.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Location {
    /// No estimate. `query_data` tells whether the query carried any input
    /// the producer could have used.
    Empty { query_data: bool },
    Position(Position),
    Country(Country),
}

impl Default for Location {
    fn default() -> Self {
        Self::Empty { query_data: false }
    }
}

impl Location {
    pub fn empty(query_data: bool) -> Self {
        Self::Empty { query_data }
    }

    pub fn found(&self) -> bool {
        match self {
            Self::Empty { .. } => false,
            Self::Position(_) => true,
            Self::Country(c) => !c.country_code.is_empty(),
        }
    }

    /// Whether relevant query input was present. Found results imply it.
    pub fn query_data(&self) -> bool {
        match self {
            Self::Empty { query_data } => *query_data,
            _ => true,
        }
    }

    /// Accuracy in meters. Only positions carry one.
    pub fn accuracy(&self) -> Option<f64> {
        match self {
            Self::Position(p) => Some(p.accuracy),
            _ => None,
        }
    }

    pub fn provenance(&self) -> Option<&Provenance> {
        match self {
            Self::Empty { .. } => None,
            Self::Position(p) => Some(&p.provenance),
            Self::Country(c) => Some(&c.provenance),
        }
    }

    pub fn source(&self) -> Option<DataSource> {
        self.provenance().map(|p| p.source)
    }

    /// Strict precedence: found beats empty, then the tighter accuracy wins.
    /// Equal results never beat each other, so the earlier one is kept.
    pub fn is_better_than(&self, other: &Location) -> bool {
        match (self.found(), other.found()) {
            (false, _) => false,
            (true, false) => true,
            (true, true) => match (self.accuracy(), other.accuracy()) {
                (Some(a), Some(b)) => a < b,
                (Some(_), None) => true,
                (None, _) => false,
            },
        }
    }
}

/// Location engine errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LocationError {
    #[error("invalid coordinate ({lat}, {lon})")]
    InvalidCoordinate { lat: f64, lon: f64 },

    #[error("accuracy estimate requested for an empty cluster")]
    EmptyCluster,

    #[error("provider '{provider}' unavailable: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    #[error("malformed fallbacks: {0}")]
    MalformedFallbacks(String),

    #[error("network store error: {0}")]
    Store(String),
}

impl LocationError {
    pub fn unavailable(provider: &str, reason: impl fmt::Display) -> Self {
        Self::ProviderUnavailable {
            provider: provider.to_string(),
            reason: reason.to_string(),
        }
    }
}
