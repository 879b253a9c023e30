//! GeoIP provider, in position and country flavours.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;

use super::{Provider, ProviderConfig, ProviderContext};
use crate::config::Settings;
use crate::location::network::{estimate_accuracy, Network};
use crate::location::query::Query;
use crate::location::store::GeoIpDb;
use crate::location::types::{DataSource, Location, LocationError, LocationType};

pub struct GeoIpProvider {
    db: Arc<dyn GeoIpDb>,
    config: ProviderConfig,
    minimum: f64,
    ctx: ProviderContext,
}

impl GeoIpProvider {
    pub const POSITION_CONFIG: ProviderConfig = ProviderConfig {
        log_name: "geoip",
        location_type: LocationType::Position,
        fallback_field: Some("ipf"),
        source: DataSource::Internal,
    };

    pub const COUNTRY_CONFIG: ProviderConfig = ProviderConfig {
        location_type: LocationType::Country,
        ..Self::POSITION_CONFIG
    };

    /// Provider producing positions from the geo-block's centre and radius.
    pub fn position(db: Arc<dyn GeoIpDb>, settings: &Settings, ctx: ProviderContext) -> Self {
        Self {
            db,
            config: Self::POSITION_CONFIG,
            minimum: settings.accuracy.geoip_min,
            ctx,
        }
    }

    /// Provider producing the geo-block's country.
    pub fn country(db: Arc<dyn GeoIpDb>, ctx: ProviderContext) -> Self {
        Self {
            db,
            config: Self::COUNTRY_CONFIG,
            minimum: 0.0,
            ctx,
        }
    }
}

#[async_trait]
impl Provider for GeoIpProvider {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn context(&self) -> &ProviderContext {
        &self.ctx
    }

    async fn locate(&self, query: &Query) -> Result<Location, LocationError> {
        let config = &self.config;
        let Some(ip) = query.ip() else {
            return Ok(config.empty(false));
        };

        let Some(record) = self.db.geoip_lookup(ip).map_err(|e| config.unavailable(e))? else {
            trace!("geoip: no block for {}", ip);
            return Ok(config.empty(true));
        };

        match config.location_type {
            LocationType::Position => {
                let (Some(lat), Some(lon)) = (record.lat, record.lon) else {
                    return Ok(config.empty(true));
                };
                let block = Network {
                    key: ip.to_string(),
                    lat,
                    lon,
                    range: record.radius,
                };
                let accuracy = estimate_accuracy(lat, lon, std::slice::from_ref(&block), self.minimum)?;
                Ok(config.position(lat, lon, accuracy))
            }
            LocationType::Country => match record.country_code.filter(|c| !c.is_empty()) {
                Some(code) => {
                    let name = record.country_name.unwrap_or_else(|| code.clone());
                    Ok(config.country(code, name))
                }
                None => Ok(config.empty(true)),
            },
        }
    }
}
