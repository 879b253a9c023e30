//! Telemetry handles injected into the search engine.
//!
//! Counters go through [`StatsSink`]; internal faults go through
//! [`ErrorReporter`]. Both are fire-and-forget: implementations must never
//! block or fail a search. The surrounding service creates them once at
//! startup and hands clones of the `Arc` to every searcher.

use cadence::prelude::*;
use cadence::{MetricError, MetricSink, QueuingMetricSink, UdpMetricSink};
use std::collections::VecDeque;
use std::net::UdpSocket;
use std::panic::RefUnwindSafe;
use std::sync::{Arc, Mutex};
use tracing::{debug, error};

use crate::config::StatsdSettings;
use crate::location::types::LocationError;

/// Most recent entries kept by the in-memory debug sinks.
const DEBUG_CAPACITY: usize = 100;

fn push_capped<T>(buf: &Mutex<VecDeque<T>>, item: T) {
    if let Ok(mut b) = buf.lock() {
        if b.len() == DEBUG_CAPACITY {
            b.pop_front();
        }
        b.push_back(item);
    }
}

/// Counter sink.
pub trait StatsSink: Send + Sync {
    fn count(&self, metric: &str);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NoopStats;

impl StatsSink for NoopStats {
    fn count(&self, _metric: &str) {}
}

impl NoopStats {
    pub fn arc() -> Arc<dyn StatsSink> {
        Arc::new(Self)
    }
}

/// In-memory sink keeping the last 100 counted metric names.
#[derive(Debug, Default)]
pub struct DebugStats {
    msgs: Mutex<VecDeque<String>>,
}

impl DebugStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metrics(&self) -> Vec<String> {
        self.msgs
            .lock()
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// How often one metric was counted.
    pub fn count_of(&self, metric: &str) -> usize {
        self.metrics().iter().filter(|m| *m == metric).count()
    }

    pub fn clear(&self) {
        if let Ok(mut m) = self.msgs.lock() {
            m.clear();
        }
    }
}

impl StatsSink for DebugStats {
    fn count(&self, metric: &str) {
        push_capped(&self.msgs, metric.to_string());
    }
}

/// statsd counters through cadence (`prefix.metric:1|c`).
///
/// The server address is resolved once at construction and packets are
/// sent from cadence's queue thread, so `count` never blocks a search.
pub struct StatsdClient {
    client: cadence::StatsdClient,
}

impl StatsdClient {
    pub fn new(settings: &StatsdSettings) -> Result<Self, MetricError> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;
        let udp = UdpMetricSink::from((settings.host.as_str(), settings.port), socket)?;
        Ok(Self::from_sink(&settings.metric_prefix, QueuingMetricSink::from(udp)))
    }

    pub fn from_sink<T>(prefix: &str, sink: T) -> Self
    where
        T: MetricSink + Send + Sync + RefUnwindSafe + 'static,
    {
        Self {
            client: cadence::StatsdClient::from_sink(prefix.trim(), sink),
        }
    }
}

impl StatsSink for StatsdClient {
    fn count(&self, metric: &str) {
        if let Err(e) = self.client.count(metric, 1_i64) {
            debug!("statsd count {} failed: {}", metric, e);
        }
    }
}

/// Sink for internal faults that should be looked at but not fail a request.
pub trait ErrorReporter: Send + Sync {
    fn capture(&self, err: &LocationError);
}

/// Reports faults as `error!` events.
#[derive(Debug, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn capture(&self, err: &LocationError) {
        error!("captured: {}", err);
    }
}

/// In-memory reporter keeping the last 100 captured faults.
#[derive(Debug, Default)]
pub struct DebugReporter {
    msgs: Mutex<VecDeque<LocationError>>,
}

impl DebugReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn captured(&self) -> Vec<LocationError> {
        self.msgs
            .lock()
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl ErrorReporter for DebugReporter {
    fn capture(&self, err: &LocationError) {
        push_capped(&self.msgs, err.clone());
    }
}

/// The calling API key, used to namespace per-caller counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKey {
    pub name: String,
    /// Emit `api_log.{name}.*` counters for this caller.
    pub log: bool,
    /// Caller may use the external fallback service.
    pub allow_fallback: bool,
}

impl ApiKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            log: false,
            allow_fallback: false,
        }
    }

    pub fn with_log(mut self, log: bool) -> Self {
        self.log = log;
        self
    }

    pub fn with_fallback(mut self, allow: bool) -> Self {
        self.allow_fallback = allow;
        self
    }
}
