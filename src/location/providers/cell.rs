//! Cell tower and cell area (LAC) providers.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Provider, ProviderConfig, ProviderContext};
use crate::config::Settings;
use crate::location::network::{cluster_center, estimate_accuracy, Network};
use crate::location::query::{CellAreaKey, CellKey, Query};
use crate::location::store::{LookupCriteria, NetworkStore};
use crate::location::types::{DataSource, Location, LocationError, LocationType};

// ─── Cells ──────────────────────────────────────────────────────

/// Locates from individually known cell towers.
pub struct CellProvider {
    store: Arc<dyn NetworkStore>,
    minimum: f64,
    ctx: ProviderContext,
}

impl CellProvider {
    pub const CONFIG: ProviderConfig = ProviderConfig {
        log_name: "cell",
        location_type: LocationType::Position,
        fallback_field: None,
        source: DataSource::Internal,
    };

    pub fn new(store: Arc<dyn NetworkStore>, settings: &Settings, ctx: ProviderContext) -> Self {
        Self {
            store,
            minimum: settings.accuracy.cell_min,
            ctx,
        }
    }
}

/// Group matched cells by location area, keeping first-seen order.
fn group_by_area(found: Vec<Network>, areas: &HashMap<String, CellAreaKey>) -> Vec<Vec<Network>> {
    let mut order: Vec<CellAreaKey> = Vec::new();
    let mut groups: HashMap<CellAreaKey, Vec<Network>> = HashMap::new();
    for network in found {
        let Some(area) = areas.get(&network.key) else {
            warn!("cell: store returned unrequested key '{}'", network.key);
            continue;
        };
        if !groups.contains_key(area) {
            order.push(*area);
        }
        groups.entry(*area).or_default().push(network);
    }
    order.iter().filter_map(|a| groups.remove(a)).collect()
}

#[async_trait]
impl Provider for CellProvider {
    fn config(&self) -> &ProviderConfig {
        &Self::CONFIG
    }

    fn context(&self) -> &ProviderContext {
        &self.ctx
    }

    async fn locate(&self, query: &Query) -> Result<Location, LocationError> {
        let config = self.config();
        let keys: Vec<CellKey> = query.cells().iter().filter_map(|c| c.cell_key()).collect();
        if keys.is_empty() {
            return Ok(config.empty(false));
        }

        let areas: HashMap<String, CellAreaKey> = keys.iter().map(|k| (k.to_string(), k.area)).collect();
        let found = self
            .store
            .lookup(&LookupCriteria::Cell(keys))
            .await
            .map_err(|e| config.unavailable(e))?;

        // Largest area group wins; the earliest in query order breaks ties.
        let mut best: Option<Vec<Network>> = None;
        for group in group_by_area(found, &areas) {
            if best.as_ref().map_or(true, |b| group.len() > b.len()) {
                best = Some(group);
            }
        }
        let Some(cells) = best else {
            return Ok(config.empty(true));
        };

        let (lat, lon) = cluster_center(&cells)?;
        let accuracy = estimate_accuracy(lat, lon, &cells, self.minimum)?;
        debug!("cell: {} cells, accuracy {:.0}m", cells.len(), accuracy);
        Ok(config.position(lat, lon, accuracy))
    }
}

// ─── Cell areas ─────────────────────────────────────────────────

/// Locates from the coverage area of the query's location area codes.
pub struct CellAreaProvider {
    store: Arc<dyn NetworkStore>,
    minimum: f64,
    ctx: ProviderContext,
}

impl CellAreaProvider {
    pub const CONFIG: ProviderConfig = ProviderConfig {
        log_name: "cell_lac",
        location_type: LocationType::Position,
        fallback_field: Some("lacf"),
        source: DataSource::Internal,
    };

    pub fn new(store: Arc<dyn NetworkStore>, settings: &Settings, ctx: ProviderContext) -> Self {
        Self {
            store,
            minimum: settings.accuracy.cell_area_min,
            ctx,
        }
    }
}

#[async_trait]
impl Provider for CellAreaProvider {
    fn config(&self) -> &ProviderConfig {
        &Self::CONFIG
    }

    fn context(&self) -> &ProviderContext {
        &self.ctx
    }

    async fn locate(&self, query: &Query) -> Result<Location, LocationError> {
        let config = self.config();
        let areas = query.cell_areas();
        if areas.is_empty() {
            return Ok(config.empty(false));
        }

        let found = self
            .store
            .lookup(&LookupCriteria::CellArea(areas))
            .await
            .map_err(|e| config.unavailable(e))?;
        let Some(area) = found.into_iter().next() else {
            return Ok(config.empty(true));
        };

        let accuracy = estimate_accuracy(area.lat, area.lon, std::slice::from_ref(&area), self.minimum)?;
        Ok(config.position(area.lat, area.lon, accuracy))
    }
}
