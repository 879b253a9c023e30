//! Search orchestration.
//!
//! A [`Searcher`] runs an ordered provider chain over one query and folds the
//! outcomes into a single best [`Location`]. The [`Locator`] holds the
//! process-wide backends and builds a searcher per caller.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::providers::{
    CellAreaProvider, CellProvider, FallbackClient, FallbackProvider, GeoIpProvider, Provider, ProviderContext,
    WifiProvider,
};
use super::query::Query;
use super::store::{GeoIpDb, NetworkStore};
use super::types::{DataSource, Location, LocationError};
use crate::config::{SearchSettings, Settings};
use crate::stats::{ApiKey, ErrorReporter, StatsSink};

/// What a search should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Position,
    Country,
}

pub struct Searcher {
    providers: Vec<Box<dyn Provider>>,
    settings: SearchSettings,
    ctx: ProviderContext,
}

impl Searcher {
    pub fn new(providers: Vec<Box<dyn Provider>>, settings: SearchSettings, ctx: ProviderContext) -> Self {
        Self {
            providers,
            settings,
            ctx,
        }
    }

    /// Log names of the chain, in priority order.
    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.config().log_name).collect()
    }

    /// Run the chain and return the best result. Never fails; the worst
    /// outcome is an empty location.
    pub async fn search(&self, query: &Query) -> Location {
        let mut best = Location::default();

        for provider in &self.providers {
            let name = provider.config().log_name;
            if !provider.should_locate(query, &best) {
                debug!("{}: skipped", name);
                continue;
            }

            let candidate = match self.run(provider.as_ref(), query).await {
                Ok(location) => location,
                Err(err @ LocationError::ProviderUnavailable { .. }) => {
                    warn!("{}", err);
                    self.ctx.stats.count(&format!("{}_unavailable", name));
                    self.ctx.reporter.capture(&err);
                    continue;
                }
                Err(err) => {
                    self.ctx.reporter.capture(&err);
                    Location::empty(true)
                }
            };

            if candidate.found() {
                provider.log_hit();
                provider.log_success();
            } else if candidate.query_data() {
                provider.log_failure();
            }

            best = merge(best, candidate);

            if self.early_exit(&best) {
                debug!("{}: good enough, stopping", name);
                break;
            }
        }

        best
    }

    async fn run(&self, provider: &dyn Provider, query: &Query) -> Result<Location, LocationError> {
        let timeout = provider.timeout().unwrap_or_else(|| self.settings.provider_timeout());
        match tokio::time::timeout(timeout, provider.locate(query)).await {
            Ok(result) => result,
            Err(_) => Err(provider
                .config()
                .unavailable(format!("timed out after {}ms", timeout.as_millis()))),
        }
    }

    fn early_exit(&self, best: &Location) -> bool {
        let Some(threshold) = self.settings.early_exit_accuracy else {
            return false;
        };
        best.source() == Some(DataSource::Internal) && best.accuracy().map_or(false, |a| a <= threshold)
    }
}

/// Keep the better of two results; on a tie the earlier one stays.
fn merge(best: Location, candidate: Location) -> Location {
    if candidate.is_better_than(&best) {
        return candidate;
    }
    if let (Location::Empty { query_data: a }, Location::Empty { query_data: b }) = (&best, &candidate) {
        return Location::empty(*a || *b);
    }
    best
}

/// Process-wide factory for per-caller searchers.
pub struct Locator {
    store: Arc<dyn NetworkStore>,
    geoip: Arc<dyn GeoIpDb>,
    fallback: Option<Arc<dyn FallbackClient>>,
    settings: Settings,
    stats: Arc<dyn StatsSink>,
    reporter: Arc<dyn ErrorReporter>,
}

impl Locator {
    pub fn new(
        store: Arc<dyn NetworkStore>,
        geoip: Arc<dyn GeoIpDb>,
        settings: Settings,
        stats: Arc<dyn StatsSink>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            store,
            geoip,
            fallback: None,
            settings,
            stats,
            reporter,
        }
    }

    pub fn with_fallback_client(mut self, client: Arc<dyn FallbackClient>) -> Self {
        self.fallback = Some(client);
        self
    }

    pub fn searcher(&self, api_key: ApiKey, kind: SearchKind) -> Searcher {
        let ctx = ProviderContext::new(api_key, self.stats.clone(), self.reporter.clone());
        let settings = &self.settings;

        let providers: Vec<Box<dyn Provider>> = match kind {
            SearchKind::Position => {
                let mut chain: Vec<Box<dyn Provider>> = vec![
                    Box::new(WifiProvider::new(self.store.clone(), settings, ctx.clone())),
                    Box::new(CellProvider::new(self.store.clone(), settings, ctx.clone())),
                    Box::new(CellAreaProvider::new(self.store.clone(), settings, ctx.clone())),
                    Box::new(GeoIpProvider::position(self.geoip.clone(), settings, ctx.clone())),
                ];
                if let Some(client) = &self.fallback {
                    chain.push(Box::new(FallbackProvider::new(
                        client.clone(),
                        &settings.fallback,
                        ctx.clone(),
                    )));
                }
                chain
            }
            SearchKind::Country => vec![Box::new(GeoIpProvider::country(self.geoip.clone(), ctx.clone()))],
        };

        Searcher::new(providers, settings.search.clone(), ctx)
    }

    /// One-shot convenience: build a searcher and run it.
    pub async fn locate(&self, api_key: ApiKey, kind: SearchKind, query: &Query) -> Location {
        let caller = api_key.name.clone();
        let location = self.searcher(api_key, kind).search(query).await;
        info!(
            "{}: {:?} search -> {}",
            caller,
            kind,
            match &location {
                Location::Empty { .. } => "empty".to_string(),
                Location::Position(p) => format!("position ±{:.0}m ({})", p.accuracy, p.provenance.source),
                Location::Country(c) => format!("country {}", c.country_code),
            }
        );
        location
    }
}

#[cfg(test)]
mod tests {
    use super::super::providers::testing::{test_context, StaticProvider, TestContext, TEST_CONFIG};
    use super::super::providers::{FallbackRequest, FallbackResponse, FallbackPoint, ProviderConfig};
    use super::super::query::{QueryRequest, WifiRequest};
    use super::super::store::JsonNetworkStore;
    use super::super::types::{Position, Provenance};
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    fn position(accuracy: f64) -> Location {
        Location::Position(Position {
            lat: 1.0,
            lon: 1.0,
            accuracy,
            provenance: Provenance {
                source: DataSource::Internal,
                fallback: None,
            },
        })
    }

    fn searcher(t: &TestContext, providers: Vec<StaticProvider>) -> Searcher {
        searcher_with(t, providers, SearchSettings::default())
    }

    fn searcher_with(t: &TestContext, providers: Vec<StaticProvider>, settings: SearchSettings) -> Searcher {
        let boxed = providers
            .into_iter()
            .map(|p| Box::new(p) as Box<dyn Provider>)
            .collect();
        Searcher::new(boxed, settings, t.ctx.clone())
    }

    fn position_at(lat: f64, accuracy: f64) -> Location {
        let mut location = position(accuracy);
        if let Location::Position(p) = &mut location {
            p.lat = lat;
        }
        location
    }

    fn lat_of(location: &Location) -> f64 {
        match location {
            Location::Position(p) => p.lat,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tighter_accuracy_wins() {
        let t = test_context(true);
        let s = searcher(
            &t,
            vec![
                StaticProvider::named("first", &t.ctx, Ok(position_at(5.0, 50.0))),
                StaticProvider::named("second", &t.ctx, Ok(position_at(6.0, 10.0))),
            ],
        );
        let best = s.search(&Query::default()).await;
        assert_eq!(best.accuracy(), Some(10.0));
        assert_eq!(lat_of(&best), 6.0);
    }

    #[tokio::test]
    async fn test_tighter_accuracy_wins_when_first() {
        let t = test_context(true);
        let s = searcher(
            &t,
            vec![
                StaticProvider::named("first", &t.ctx, Ok(position_at(5.0, 10.0))),
                StaticProvider::named("second", &t.ctx, Ok(position_at(6.0, 50.0))),
            ],
        );
        let best = s.search(&Query::default()).await;
        assert_eq!(best.accuracy(), Some(10.0));
        assert_eq!(lat_of(&best), 5.0);
        assert_eq!(t.stats.count_of("second_hit"), 1);
    }

    #[tokio::test]
    async fn test_tie_keeps_earlier() {
        let t = test_context(true);
        let mut later = position(10.0);
        if let Location::Position(p) = &mut later {
            p.lat = 9.0;
        }
        let s = searcher(
            &t,
            vec![
                StaticProvider::named("first", &t.ctx, Ok(position(10.0))),
                StaticProvider::named("second", &t.ctx, Ok(later)),
            ],
        );
        match s.search(&Query::default()).await {
            Location::Position(p) => assert_eq!(p.lat, 1.0),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_outage_is_not_fatal() {
        let t = test_context(true);
        let s = searcher(
            &t,
            vec![
                StaticProvider::named("wifi", &t.ctx, Err(LocationError::unavailable("wifi", "down"))),
                StaticProvider::named("cell", &t.ctx, Ok(position(1000.0))),
            ],
        );
        assert_eq!(s.search(&Query::default()).await.accuracy(), Some(1000.0));
        assert_eq!(t.stats.count_of("wifi_unavailable"), 1);
        assert_eq!(t.stats.count_of("cell_hit"), 1);
        assert_eq!(t.reporter.captured().len(), 1);
    }

    #[tokio::test]
    async fn test_all_empty() {
        let t = test_context(true);
        let s = searcher(
            &t,
            vec![
                StaticProvider::named("wifi", &t.ctx, Ok(Location::empty(false))),
                StaticProvider::named("cell", &t.ctx, Ok(Location::empty(true))),
                StaticProvider::named("geoip", &t.ctx, Ok(Location::empty(false))),
            ],
        );
        assert_eq!(s.search(&Query::default()).await, Location::empty(true));
        assert_eq!(t.stats.metrics(), vec!["api_log.test.cell_miss"]);
    }

    #[tokio::test]
    async fn test_no_providers() {
        let t = test_context(true);
        let s = searcher(&t, vec![]);
        assert_eq!(s.search(&Query::default()).await, Location::empty(false));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_outage() {
        let t = test_context(true);
        let settings = SearchSettings {
            provider_timeout_ms: 20,
            ..SearchSettings::default()
        };
        let s = searcher_with(
            &t,
            vec![
                StaticProvider::named("slow", &t.ctx, Ok(position(5.0))).with_delay(Duration::from_millis(500)),
                StaticProvider::named("fast", &t.ctx, Ok(position(800.0))),
            ],
            settings,
        );
        assert_eq!(s.search(&Query::default()).await.accuracy(), Some(800.0));
        assert_eq!(t.stats.count_of("slow_unavailable"), 1);
    }

    #[tokio::test]
    async fn test_provider_timeout_overrides_search_timeout() {
        let t = test_context(true);
        let settings = SearchSettings {
            provider_timeout_ms: 20,
            ..SearchSettings::default()
        };
        let s = searcher_with(
            &t,
            vec![StaticProvider::named("patient", &t.ctx, Ok(position(30.0)))
                .with_delay(Duration::from_millis(100))
                .with_timeout(Duration::from_millis(2000))],
            settings,
        );
        assert_eq!(s.search(&Query::default()).await.accuracy(), Some(30.0));
        assert_eq!(t.stats.count_of("patient_unavailable"), 0);
    }

    #[tokio::test]
    async fn test_internal_fault_reported_as_empty() {
        let t = test_context(true);
        let s = searcher(
            &t,
            vec![StaticProvider::named("wifi", &t.ctx, Err(LocationError::EmptyCluster))],
        );
        assert_eq!(s.search(&Query::default()).await, Location::empty(true));
        assert_eq!(t.reporter.captured(), vec![LocationError::EmptyCluster]);
        assert_eq!(t.stats.metrics(), vec!["api_log.test.wifi_miss"]);
    }

    #[tokio::test]
    async fn test_skipped_provider_emits_nothing() {
        let t = test_context(true);
        let gated = StaticProvider::new(
            ProviderConfig {
                log_name: "geoip",
                fallback_field: Some("ipf"),
                ..TEST_CONFIG
            },
            &t.ctx,
            Ok(position(25_000.0)),
        );
        let s = searcher(&t, vec![gated]);
        let query = Query::from_request(QueryRequest {
            fallbacks: Some(json!({"ipf": false})),
            ..Default::default()
        });
        assert_eq!(s.search(&query).await, Location::empty(false));
        assert!(t.stats.metrics().is_empty());
    }

    #[tokio::test]
    async fn test_early_exit() {
        let t = test_context(true);
        let settings = SearchSettings {
            early_exit_accuracy: Some(200.0),
            ..SearchSettings::default()
        };
        let s = searcher_with(
            &t,
            vec![
                StaticProvider::named("wifi", &t.ctx, Ok(position(150.0))),
                StaticProvider::named("cell", &t.ctx, Ok(position(100.0))),
            ],
            settings,
        );
        assert_eq!(s.search(&Query::default()).await.accuracy(), Some(150.0));
        assert_eq!(t.stats.count_of("cell_hit"), 0);
    }

    #[test]
    fn test_merge_empties() {
        assert_eq!(merge(Location::empty(true), Location::empty(false)), Location::empty(true));
        assert_eq!(merge(Location::empty(false), Location::empty(true)), Location::empty(true));
        assert_eq!(merge(position(5.0), Location::empty(true)), position(5.0));
    }

    // ─── Locator ────────────────────────────────────────────────

    struct FixedClient(f64);

    #[async_trait]
    impl FallbackClient for FixedClient {
        async fn locate(&self, _request: &FallbackRequest) -> Result<Option<FallbackResponse>, LocationError> {
            Ok(Some(FallbackResponse {
                location: FallbackPoint { lat: 40.0, lng: -74.0 },
                accuracy: self.0,
            }))
        }
    }

    /// Answers like `FixedClient`, after a delay.
    struct SlowClient(Duration);

    #[async_trait]
    impl FallbackClient for SlowClient {
        async fn locate(&self, request: &FallbackRequest) -> Result<Option<FallbackResponse>, LocationError> {
            tokio::time::sleep(self.0).await;
            FixedClient(30.0).locate(request).await
        }
    }

    fn store() -> Arc<JsonNetworkStore> {
        let data = json!({
            "wifi": [
                {"key": "101010101010", "lat": 51.5, "lon": -0.1, "range": 40.0},
                {"key": "202020202020", "lat": 51.5005, "lon": -0.1, "range": 40.0}
            ],
            "geoip": [
                {"ip": "81.2.69.160", "lat": 51.51, "lon": -0.09, "radius": 30000.0,
                 "country_code": "GB", "country_name": "United Kingdom"}
            ]
        });
        Arc::new(JsonNetworkStore::from_json(&data.to_string()).unwrap())
    }

    fn locator(t: &TestContext) -> Locator {
        let store = store();
        Locator::new(store.clone(), store, Settings::default(), t.stats.clone(), t.reporter.clone())
    }

    fn wifi_query(keys: &[&str], ip: Option<&str>) -> Query {
        Query::from_request(QueryRequest {
            wifi: keys
                .iter()
                .map(|k| WifiRequest {
                    key: k.to_string(),
                    signal: None,
                })
                .collect(),
            ip: ip.map(str::to_string),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_wifi_hit_telemetry() {
        let t = test_context(true);
        let loc = locator(&t)
            .locate(
                ApiKey::new("test").with_log(true),
                SearchKind::Position,
                &wifi_query(&["10:10:10:10:10:10", "20:20:20:20:20:20"], None),
            )
            .await;
        assert_eq!(loc.accuracy(), Some(100.0));
        assert_eq!(t.stats.metrics(), vec!["wifi_hit", "api_log.test.wifi_hit"]);
    }

    #[tokio::test]
    async fn test_position_chain_prefers_wifi_over_geoip() {
        let t = test_context(false);
        let loc = locator(&t)
            .locate(
                ApiKey::new("test"),
                SearchKind::Position,
                &wifi_query(&["101010101010", "202020202020"], Some("81.2.69.160")),
            )
            .await;
        assert_eq!(loc.accuracy(), Some(100.0));
        assert_eq!(t.stats.count_of("geoip_hit"), 1);
    }

    #[tokio::test]
    async fn test_country_search() {
        let t = test_context(false);
        let loc = locator(&t)
            .locate(ApiKey::new("test"), SearchKind::Country, &wifi_query(&[], Some("81.2.69.160")))
            .await;
        match loc {
            Location::Country(c) => assert_eq!(c.country_code, "GB"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_chains() {
        let t = test_context(false);
        let plain = locator(&t);
        assert_eq!(
            plain.searcher(ApiKey::new("a"), SearchKind::Position).provider_names(),
            vec!["wifi", "cell", "cell_lac", "geoip"]
        );
        assert_eq!(
            plain.searcher(ApiKey::new("a"), SearchKind::Country).provider_names(),
            vec!["geoip"]
        );
        let with_fallback = locator(&t).with_fallback_client(Arc::new(FixedClient(30.0)));
        assert_eq!(
            with_fallback.searcher(ApiKey::new("a"), SearchKind::Position).provider_names(),
            vec!["wifi", "cell", "cell_lac", "geoip", "fallback"]
        );
    }

    #[tokio::test]
    async fn test_fallback_only_for_permitted_callers() {
        let t = test_context(false);
        let locator = locator(&t).with_fallback_client(Arc::new(FixedClient(30.0)));
        let query = wifi_query(&["aaaaaaaaaaaa", "bbbbbbbbbbbb"], Some("81.2.69.160"));

        let loc = locator.locate(ApiKey::new("a"), SearchKind::Position, &query).await;
        assert_eq!(loc.source(), Some(DataSource::Internal));
        assert_eq!(loc.accuracy(), Some(30_000.0));

        let loc = locator
            .locate(ApiKey::new("b").with_fallback(true), SearchKind::Position, &query)
            .await;
        assert_eq!(loc.source(), Some(DataSource::Fallback));
        assert_eq!(loc.accuracy(), Some(30.0));
    }

    #[tokio::test]
    async fn test_fallback_waits_for_its_own_timeout() {
        let t = test_context(false);
        let mut settings = Settings::default();
        settings.search.provider_timeout_ms = 20;
        settings.fallback.timeout_ms = 2000;
        let store = store();
        let locator = Locator::new(store.clone(), store, settings, t.stats.clone(), t.reporter.clone())
            .with_fallback_client(Arc::new(SlowClient(Duration::from_millis(100))));
        let query = wifi_query(&["aaaaaaaaaaaa", "bbbbbbbbbbbb"], None);

        let loc = locator
            .locate(ApiKey::new("b").with_fallback(true), SearchKind::Position, &query)
            .await;
        assert_eq!(loc.source(), Some(DataSource::Fallback));
        assert_eq!(loc.accuracy(), Some(30.0));
        assert_eq!(t.stats.count_of("fallback_unavailable"), 0);
        assert!(t.reporter.captured().is_empty());
    }
}
