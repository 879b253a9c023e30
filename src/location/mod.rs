//! Location engine.
//!
//! Turns a query of nearby WiFi networks, cell towers and the client IP into
//! a single best location estimate, using known network records and an
//! optional external fallback service.

pub mod network;
pub mod providers;
pub mod query;
pub mod searcher;
pub mod store;
pub mod types;

pub use query::{Query, QueryRequest};
pub use searcher::{Locator, SearchKind, Searcher};
pub use store::{GeoIpDb, JsonNetworkStore, MaxMindDb, NetworkStore};
pub use types::{DataSource, Location, LocationError};
