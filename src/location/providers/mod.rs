//! Location providers: one estimator per signal source.
//!
//! Every provider carries a constant [`ProviderConfig`] (telemetry name,
//! result type, gating fallback flag, provenance) and a per-caller
//! [`ProviderContext`]. The searcher asks `should_locate` first and only
//! then runs `locate`.

mod cell;
mod fallback;
mod geoip;
mod wifi;

pub use cell::{CellAreaProvider, CellProvider};
pub use fallback::{
    FallbackCell, FallbackClient, FallbackPoint, FallbackProvider, FallbackRequest, FallbackResponse,
    FallbackWifi, HttpFallbackClient,
};
pub use geoip::GeoIpProvider;
pub use wifi::WifiProvider;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::query::Query;
use super::types::{Country, DataSource, Location, LocationError, LocationType, Position, Provenance};
use crate::stats::{ApiKey, ErrorReporter, StatsSink};

/// Construction-time constants of a provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProviderConfig {
    /// Telemetry key, e.g. `cell_lac`.
    pub log_name: &'static str,
    pub location_type: LocationType,
    /// Query fallback flag gating this provider; `None` means always eligible.
    pub fallback_field: Option<&'static str>,
    pub source: DataSource,
}

impl ProviderConfig {
    pub fn provenance(&self) -> Provenance {
        Provenance {
            source: self.source,
            fallback: self.fallback_field,
        }
    }

    pub fn empty(&self, query_data: bool) -> Location {
        Location::empty(query_data)
    }

    pub fn position(&self, lat: f64, lon: f64, accuracy: f64) -> Location {
        Location::Position(Position {
            lat,
            lon,
            accuracy,
            provenance: self.provenance(),
        })
    }

    pub fn country(&self, country_code: String, country_name: String) -> Location {
        Location::Country(Country {
            country_code,
            country_name,
            provenance: self.provenance(),
        })
    }

    /// Wrap a backing-store failure.
    pub fn unavailable(&self, err: impl std::fmt::Display) -> LocationError {
        LocationError::unavailable(self.log_name, err)
    }
}

/// Per-caller handles shared by all providers of one search.
#[derive(Clone)]
pub struct ProviderContext {
    pub api_key: ApiKey,
    pub stats: Arc<dyn StatsSink>,
    pub reporter: Arc<dyn ErrorReporter>,
}

impl ProviderContext {
    pub fn new(api_key: ApiKey, stats: Arc<dyn StatsSink>, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            api_key,
            stats,
            reporter,
        }
    }
}

/// A location estimator for one signal source.
#[async_trait]
pub trait Provider: Send + Sync {
    fn config(&self) -> &ProviderConfig;

    fn context(&self) -> &ProviderContext;

    /// Given the query and the best location found so far by earlier
    /// providers, decide whether this provider should run at all.
    fn should_locate(&self, query: &Query, _location: &Location) -> bool {
        fallback_allows(self.config(), self.context(), query)
    }

    /// Time budget for one `locate` call when it differs from the
    /// search-wide provider timeout.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Estimate a location from the query.
    async fn locate(&self, query: &Query) -> Result<Location, LocationError>;

    /// Count a successful lookup.
    fn log_hit(&self) {
        let metric = format!("{}_hit", self.config().log_name);
        self.context().stats.count(&metric);
    }

    /// Count a lookup where the caller sent relevant data and we found a result.
    fn log_success(&self) {
        let ctx = self.context();
        if ctx.api_key.log {
            let metric = format!("api_log.{}.{}_hit", ctx.api_key.name, self.config().log_name);
            ctx.stats.count(&metric);
        }
    }

    /// Count a lookup where the caller sent relevant data and we found nothing.
    fn log_failure(&self) {
        let ctx = self.context();
        if ctx.api_key.log {
            let metric = format!("api_log.{}.{}_miss", ctx.api_key.name, self.config().log_name);
            ctx.stats.count(&metric);
        }
    }
}

/// The fallback-flag policy shared by all providers.
///
/// Only an explicit `false` for the provider's field disables it. Missing
/// keys, other values and malformed maps all allow the attempt; malformed
/// maps are reported.
pub fn fallback_allows(config: &ProviderConfig, ctx: &ProviderContext, query: &Query) -> bool {
    let Some(field) = config.fallback_field else {
        return true;
    };
    match query.fallback(field) {
        Ok(Some(Value::Bool(false))) => false,
        Ok(_) => true,
        Err(err) => {
            warn!("{}: ignoring fallbacks: {}", config.log_name, err);
            ctx.reporter.capture(&err);
            true
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::location::query::QueryRequest;
    use serde_json::json;

    fn query_with_fallbacks(fallbacks: Option<Value>) -> Query {
        Query::from_request(QueryRequest {
            fallbacks,
            ..Default::default()
        })
    }

    fn provider(fallback_field: Option<&'static str>, ctx: &ProviderContext) -> StaticProvider {
        StaticProvider::new(
            ProviderConfig {
                fallback_field,
                ..TEST_CONFIG
            },
            ctx,
            Ok(Location::default()),
        )
    }

    #[test]
    fn test_log_hit() {
        let t = test_context(true);
        provider(None, &t.ctx).log_hit();
        assert_eq!(t.stats.metrics(), vec!["test_hit"]);
    }

    #[test]
    fn test_log_success() {
        let t = test_context(true);
        provider(None, &t.ctx).log_success();
        assert_eq!(t.stats.metrics(), vec!["api_log.test.test_hit"]);
    }

    #[test]
    fn test_log_failure() {
        let t = test_context(true);
        provider(None, &t.ctx).log_failure();
        assert_eq!(t.stats.metrics(), vec!["api_log.test.test_miss"]);
    }

    #[test]
    fn test_caller_logging_disabled() {
        let t = test_context(false);
        let p = provider(None, &t.ctx);
        p.log_success();
        p.log_failure();
        p.log_hit();
        assert_eq!(t.stats.metrics(), vec!["test_hit"]);
    }

    #[test]
    fn test_should_locate_is_true_if_no_fallback_set() {
        let t = test_context(true);
        let p = provider(None, &t.ctx);
        let empty = Location::default();
        assert!(p.should_locate(&query_with_fallbacks(Some(json!({}))), &empty));
        assert!(p.should_locate(&query_with_fallbacks(Some(json!({"fallback": false}))), &empty));
        assert!(p.should_locate(&query_with_fallbacks(Some(json!("garbage"))), &empty));
    }

    #[test]
    fn test_should_not_locate_if_fallback_field_is_set() {
        let t = test_context(true);
        let p = provider(Some("fallback"), &t.ctx);
        let query = query_with_fallbacks(Some(json!({"fallback": false})));
        assert!(!p.should_locate(&query, &Location::default()));
    }

    #[test]
    fn test_should_locate_if_a_different_fallback_field_is_set() {
        let t = test_context(true);
        let p = provider(Some("fallback"), &t.ctx);
        let query = query_with_fallbacks(Some(json!({"another_fallback": false})));
        assert!(p.should_locate(&query, &Location::default()));
    }

    #[test]
    fn test_should_locate_ignore_invalid_values() {
        let t = test_context(true);
        let p = provider(Some("fallback"), &t.ctx);
        for value in [json!("asdf"), json!(0), json!(null), json!(true)] {
            let query = query_with_fallbacks(Some(json!({ "fallback": value })));
            assert!(p.should_locate(&query, &Location::default()));
        }
        assert!(p.should_locate(&query_with_fallbacks(None), &Location::default()));
        assert!(t.reporter.captured().is_empty());
    }

    #[test]
    fn test_should_locate_reports_malformed_map() {
        let t = test_context(true);
        let p = provider(Some("fallback"), &t.ctx);
        let query = query_with_fallbacks(Some(json!(["fallback", false])));
        assert!(p.should_locate(&query, &Location::default()));
        assert!(matches!(t.reporter.captured()[0], LocationError::MalformedFallbacks(_)));
    }

    #[test]
    fn test_config_stamps_provenance() {
        let config = ProviderConfig {
            fallback_field: Some("lacf"),
            ..TEST_CONFIG
        };
        match config.position(1.0, 2.0, 300.0) {
            Location::Position(p) => {
                assert_eq!(p.provenance.fallback, Some("lacf"));
                assert_eq!(p.provenance.source, DataSource::Internal);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
