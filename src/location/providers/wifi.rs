//! WiFi access point provider.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{Provider, ProviderConfig, ProviderContext};
use crate::config::{Settings, WifiSettings};
use crate::location::network::{cluster_center, cluster_networks, estimate_accuracy, Network};
use crate::location::query::Query;
use crate::location::store::{LookupCriteria, NetworkStore};
use crate::location::types::{DataSource, Location, LocationError, LocationType};

pub struct WifiProvider {
    store: Arc<dyn NetworkStore>,
    settings: WifiSettings,
    minimum: f64,
    ctx: ProviderContext,
}

impl WifiProvider {
    pub const CONFIG: ProviderConfig = ProviderConfig {
        log_name: "wifi",
        location_type: LocationType::Position,
        fallback_field: None,
        source: DataSource::Internal,
    };

    pub fn new(store: Arc<dyn NetworkStore>, settings: &Settings, ctx: ProviderContext) -> Self {
        Self {
            store,
            settings: settings.wifi.clone(),
            minimum: settings.accuracy.wifi_min,
            ctx,
        }
    }

    /// Largest cluster with enough members; the earliest wins a tie.
    fn pick_cluster(&self, clusters: Vec<Vec<Network>>) -> Option<Vec<Network>> {
        let mut best: Option<Vec<Network>> = None;
        for cluster in clusters {
            if cluster.len() < self.settings.min_cluster_size {
                continue;
            }
            if best.as_ref().map_or(true, |b| cluster.len() > b.len()) {
                best = Some(cluster);
            }
        }
        best
    }
}

#[async_trait]
impl Provider for WifiProvider {
    fn config(&self) -> &ProviderConfig {
        &Self::CONFIG
    }

    fn context(&self) -> &ProviderContext {
        &self.ctx
    }

    async fn locate(&self, query: &Query) -> Result<Location, LocationError> {
        let config = self.config();
        let wifis = query.wifis();
        if wifis.is_empty() || wifis.len() < self.settings.min_query_wifis {
            return Ok(config.empty(false));
        }

        let keys = wifis.iter().map(|w| w.key.clone()).collect();
        let found = self
            .store
            .lookup(&LookupCriteria::Wifi(keys))
            .await
            .map_err(|e| config.unavailable(e))?;
        if found.is_empty() {
            return Ok(config.empty(true));
        }

        let matched = found.len();
        let clusters = cluster_networks(found, self.settings.max_cluster_distance)?;
        let Some(cluster) = self.pick_cluster(clusters) else {
            debug!("wifi: {} matches but no cluster of {}", matched, self.settings.min_cluster_size);
            return Ok(config.empty(true));
        };

        let (lat, lon) = cluster_center(&cluster)?;
        let accuracy = estimate_accuracy(lat, lon, &cluster, self.minimum)?;
        debug!("wifi: {}/{} matches clustered, accuracy {:.0}m", cluster.len(), matched, accuracy);
        Ok(config.position(lat, lon, accuracy))
    }
}
