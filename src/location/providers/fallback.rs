//! External fallback locate service.
//!
//! Forwards the query's cells and WiFi networks to a third-party geolocation
//! API and adapts its answer into a Fallback-sourced position.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};
use ureq::Agent;

use super::{fallback_allows, Provider, ProviderConfig, ProviderContext};
use crate::config::FallbackSettings;
use crate::geocalc;
use crate::location::query::Query;
use crate::location::types::{DataSource, Location, LocationError, LocationType};

const LOG_NAME: &str = "fallback";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackCell {
    pub radio_type: String,
    pub mobile_country_code: u16,
    pub mobile_network_code: u16,
    pub location_area_code: u32,
    pub cell_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackWifi {
    /// Colon separated, as most services expect.
    pub mac_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<i32>,
}

/// Request body sent to the external service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackRequest {
    pub cell_towers: Vec<FallbackCell>,
    pub wifi_access_points: Vec<FallbackWifi>,
    pub consider_ip: bool,
}

impl FallbackRequest {
    pub fn from_query(query: &Query) -> Self {
        let cell_towers = query
            .cells()
            .iter()
            .filter_map(|c| {
                let key = c.cell_key()?;
                Some(FallbackCell {
                    radio_type: key.area.radio.to_string(),
                    mobile_country_code: key.area.mcc,
                    mobile_network_code: key.area.mnc,
                    location_area_code: key.area.lac,
                    cell_id: key.cid,
                    signal_strength: c.signal,
                })
            })
            .collect();
        let wifi_access_points = query
            .wifis()
            .iter()
            .map(|w| FallbackWifi {
                mac_address: colon_mac(&w.key),
                signal_strength: w.signal,
            })
            .collect();
        Self {
            cell_towers,
            wifi_access_points,
            consider_ip: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cell_towers.is_empty() && self.wifi_access_points.is_empty()
    }
}

fn colon_mac(key: &str) -> String {
    key.as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FallbackPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Answer of the external service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FallbackResponse {
    pub location: FallbackPoint,
    pub accuracy: f64,
}

/// Client for the external locate service. `Ok(None)` means the service
/// answered but could not locate.
#[async_trait]
pub trait FallbackClient: Send + Sync {
    async fn locate(&self, request: &FallbackRequest) -> Result<Option<FallbackResponse>, LocationError>;
}

/// JSON-over-HTTP client (ureq, run on the blocking pool).
pub struct HttpFallbackClient {
    url: String,
    agent: Agent,
}

impl HttpFallbackClient {
    pub fn new(url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("locus/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            url: url.to_string(),
            agent,
        }
    }

    pub fn from_settings(settings: &FallbackSettings) -> Option<Self> {
        settings
            .url
            .as_deref()
            .map(|url| Self::new(url, Duration::from_millis(settings.timeout_ms)))
    }

    fn post_sync(agent: &Agent, url: &str, body: serde_json::Value) -> Result<Option<FallbackResponse>, LocationError> {
        match agent.post(url).send_json(body) {
            Ok(resp) => {
                let parsed: FallbackResponse = resp
                    .into_json()
                    .map_err(|e| LocationError::unavailable(LOG_NAME, format!("bad response: {}", e)))?;
                trace!("fallback answered {:?}", parsed);
                Ok(Some(parsed))
            }
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(e) => Err(LocationError::unavailable(LOG_NAME, e)),
        }
    }
}

#[async_trait]
impl FallbackClient for HttpFallbackClient {
    async fn locate(&self, request: &FallbackRequest) -> Result<Option<FallbackResponse>, LocationError> {
        let body = serde_json::to_value(request).map_err(|e| LocationError::unavailable(LOG_NAME, e))?;
        let agent = self.agent.clone();
        let url = self.url.clone();
        tokio::task::spawn_blocking(move || Self::post_sync(&agent, &url, body))
            .await
            .map_err(|e| LocationError::unavailable(LOG_NAME, e))?
    }
}

pub struct FallbackProvider {
    client: Arc<dyn FallbackClient>,
    accuracy_threshold: f64,
    timeout: Duration,
    ctx: ProviderContext,
}

impl FallbackProvider {
    pub const CONFIG: ProviderConfig = ProviderConfig {
        log_name: LOG_NAME,
        location_type: LocationType::Position,
        fallback_field: None,
        source: DataSource::Fallback,
    };

    pub fn new(client: Arc<dyn FallbackClient>, settings: &FallbackSettings, ctx: ProviderContext) -> Self {
        Self {
            client,
            accuracy_threshold: settings.accuracy_threshold,
            timeout: Duration::from_millis(settings.timeout_ms),
            ctx,
        }
    }
}

#[async_trait]
impl Provider for FallbackProvider {
    fn config(&self) -> &ProviderConfig {
        &Self::CONFIG
    }

    fn context(&self) -> &ProviderContext {
        &self.ctx
    }

    /// Same limit as the HTTP client.
    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    /// Only for callers allowed to use the external service, and only while
    /// nothing accurate enough has been found yet.
    fn should_locate(&self, query: &Query, location: &Location) -> bool {
        if !self.ctx.api_key.allow_fallback {
            return false;
        }
        if let Some(accuracy) = location.accuracy() {
            if accuracy <= self.accuracy_threshold {
                debug!("fallback: current best {:.0}m is good enough", accuracy);
                return false;
            }
        }
        fallback_allows(self.config(), &self.ctx, query)
    }

    async fn locate(&self, query: &Query) -> Result<Location, LocationError> {
        let config = self.config();
        let request = FallbackRequest::from_query(query);
        if request.is_empty() {
            return Ok(config.empty(false));
        }

        let Some(response) = self.client.locate(&request).await? else {
            return Ok(config.empty(true));
        };
        let FallbackPoint { lat, lng } = response.location;
        geocalc::validate(lat, lng)?;
        if !response.accuracy.is_finite() || response.accuracy <= 0.0 {
            return Err(LocationError::unavailable(
                LOG_NAME,
                format!("invalid accuracy {}", response.accuracy),
            ));
        }
        Ok(config.position(lat, lng, response.accuracy))
    }
}
