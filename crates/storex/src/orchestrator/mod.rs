//! Scrape orchestration: concurrent fan-out to collectors, failure isolation and self-observability.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use futures::future;
use prometheus_client::registry::Registry;

use self::metrics::{CollectorLabels, CycleSnapshot, ExporterMetrics};
use crate::{
    client::BackendClient,
    collector::{CollectError, Collector},
    format::{self, Format},
    registry::CollectorRegistry,
    sample::{Sample, Samples},
};

mod metrics;

/// Value of the `collector` label used for the duration of the reachability probe.
pub const REACHABILITY_COLLECTOR: &str = "reach";

/// Result of running a single collector in a scrape cycle.
#[derive(Debug)]
pub struct CollectorOutcome {
    name: &'static str,
    duration: Duration,
    error: Option<CollectError>,
}

impl CollectorOutcome {
    /// Returns the collector name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the wall-clock duration of the collector run.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Returns the error returned by the collector, if any.
    pub fn error(&self) -> Option<&CollectError> {
        self.error.as_ref()
    }

    /// Checks whether the collector succeeded.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Snapshot of a completed scrape cycle.
#[derive(Debug)]
pub struct ScrapeOutcome {
    up: bool,
    reach_duration: Duration,
    collectors: Vec<CollectorOutcome>,
    samples: Vec<Sample>,
}

impl ScrapeOutcome {
    /// Returns the result of the reachability probe.
    pub fn is_up(&self) -> bool {
        self.up
    }

    /// Returns the duration of the reachability probe.
    pub fn reach_duration(&self) -> Duration {
        self.reach_duration
    }

    /// Returns outcomes of enabled collectors in registration order.
    pub fn collectors(&self) -> &[CollectorOutcome] {
        &self.collectors
    }

    /// Returns the named collector outcome.
    pub fn collector(&self, name: &str) -> Option<&CollectorOutcome> {
        self.collectors.iter().find(|outcome| outcome.name == name)
    }

    /// Returns samples emitted by successful collectors, ordered by collector registration
    /// and then by emission.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Checks whether this cycle is reported as erroneous, i.e. the probe or any collector failed.
    pub fn has_error(&self) -> bool {
        !self.up || self.collectors.iter().any(|outcome| !outcome.is_success())
    }
}

/// Runs enabled collectors of a single backend on every scrape and reports self-observability metrics.
///
/// A scrape cycle:
///
/// 1. Increments the scrape counter.
/// 2. Probes the backend with [`BackendClient::ping()`] and sets the `up` gauge from the result.
///    A failed probe is advisory; collectors run regardless.
/// 3. Spawns a task per enabled collector. All tasks share the client and feed a single sink.
/// 4. Waits for all tasks. Failed (or panicked) collectors are logged, their error counters are
///    incremented, and their samples are discarded.
/// 5. Sets the last-error gauge for the cycle.
///
/// The orchestrator has no cross-cycle state besides its counters, so concurrent scrapes are independent.
pub struct Orchestrator {
    namespace: String,
    client: Arc<dyn BackendClient>,
    collectors: Vec<Arc<dyn Collector>>,
    metrics: ExporterMetrics,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let collectors: Vec<_> = self.collector_names().collect();
        formatter
            .debug_struct("Orchestrator")
            .field("namespace", &self.namespace)
            .field("collectors", &collectors)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator for collectors enabled in `registry`. Self metrics are reported
    /// under `namespace` (e.g., `gdas_up`).
    ///
    /// # Panics
    ///
    /// Panics if `namespace` is not a valid metric name prefix.
    #[track_caller]
    pub fn new(
        namespace: &str,
        client: Arc<dyn BackendClient>,
        registry: &CollectorRegistry,
    ) -> Self {
        crate::validation::assert_metric_name(namespace);

        let collectors: Vec<_> = registry.enabled().cloned().collect();
        let metrics = ExporterMetrics::default();
        for collector in &collectors {
            // Makes error counters visible before the first failure.
            let counter = metrics
                .scrape_errors
                .get_or_create(&CollectorLabels::new(collector.name()));
            drop(counter);
        }

        let names: Vec<_> = collectors.iter().map(|collector| collector.name()).collect();
        tracing::info!(
            namespace,
            collectors = ?names,
            "Created orchestrator with {} enabled collector(s)",
            names.len()
        );
        Self {
            namespace: namespace.to_owned(),
            client,
            collectors,
            metrics,
        }
    }

    /// Returns the metrics namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Iterates over the names of enabled collectors in registration order.
    pub fn collector_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.collectors.iter().map(|collector| collector.name())
    }

    async fn probe(&self) -> (bool, Duration) {
        let started_at = Instant::now();
        let up = match self.client.ping().await {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!(namespace = %self.namespace, "Backend reports itself as unhealthy");
                false
            }
            Err(err) => {
                tracing::warn!(namespace = %self.namespace, %err, "Backend is unreachable");
                false
            }
        };
        self.metrics.up.set(i64::from(up));
        (up, started_at.elapsed())
    }

    /// Runs a single scrape cycle. Resolves once every enabled collector has finished.
    pub async fn scrape(&self) -> ScrapeOutcome {
        self.metrics.scrapes.inc();
        let (up, reach_duration) = self.probe().await;

        let (sink, mut samples) = Samples::channel();
        let fan_out_started_at = Instant::now();
        let tasks: Vec<_> = self
            .collectors
            .iter()
            .enumerate()
            .map(|(idx, collector)| {
                let collector = Arc::clone(collector);
                let client = Arc::clone(&self.client);
                let sink = sink.with_origin(idx);
                tokio::spawn(async move {
                    let started_at = Instant::now();
                    let result = collector.collect(client.as_ref(), &sink).await;
                    (result, started_at.elapsed())
                })
            })
            .collect();
        drop(sink);
        let results = future::join_all(tasks).await;

        let mut collectors = Vec::with_capacity(results.len());
        for (collector, result) in self.collectors.iter().zip(results) {
            let name = collector.name();
            let (result, duration) = match result {
                Ok(output) => output,
                Err(err) => (
                    Err(CollectError::Panicked(err.to_string())),
                    fan_out_started_at.elapsed(),
                ),
            };
            let error = result.err();
            if let Some(err) = &error {
                tracing::warn!(collector = name, %err, "Collector failed");
                self.metrics
                    .scrape_errors
                    .get_or_create(&CollectorLabels::new(name))
                    .inc();
            }
            collectors.push(CollectorOutcome {
                name,
                duration,
                error,
            });
        }

        let mut tagged = samples.drain_tagged();
        tagged.retain(|(origin, _)| collectors[*origin].is_success());
        // Stable sort: emission order is preserved within each collector.
        tagged.sort_by_key(|(origin, _)| *origin);
        let samples = tagged.into_iter().map(|(_, sample)| sample).collect();

        let outcome = ScrapeOutcome {
            up,
            reach_duration,
            collectors,
            samples,
        };
        self.metrics
            .last_scrape_error
            .set(i64::from(outcome.has_error()));
        tracing::debug!(
            namespace = %self.namespace,
            up,
            latency_sec = fan_out_started_at.elapsed().as_secs_f64(),
            sample_count = outcome.samples.len(),
            "Finished scrape cycle"
        );
        outcome
    }

    /// Encodes persistent self metrics together with the outcome of a scrape cycle.
    pub fn encode(&self, outcome: &ScrapeOutcome, format: Format) -> String {
        let mut registry = Registry::default();
        self.metrics.register(&mut registry, &self.namespace);

        let durations = [(REACHABILITY_COLLECTOR, outcome.reach_duration)]
            .into_iter()
            .chain(
                outcome
                    .collectors
                    .iter()
                    .map(|collector| (collector.name, collector.duration)),
            )
            .map(|(name, duration)| (name, duration.as_secs_f64()))
            .collect();
        let snapshot = CycleSnapshot::new(&self.namespace, durations, outcome.samples.clone());
        registry.register_collector(Box::new(snapshot));

        let mut buffer = String::with_capacity(4_096);
        if let Err(err) = format::encode(&mut buffer, &registry, format) {
            // Writing to a string only fails if encoding itself fails, e.g. on a duplicate label.
            tracing::error!(%err, "Failed encoding metrics");
        }
        buffer
    }

    /// Runs a scrape cycle and encodes its results in the specified format.
    pub async fn render(&self, format: Format) -> String {
        let outcome = self.scrape().await;
        self.encode(&outcome, format)
    }
}
