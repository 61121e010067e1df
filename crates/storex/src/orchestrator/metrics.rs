//! Self-observability metrics of the orchestrator.

use std::{
    fmt::{self, Write as _},
    sync::Arc,
};

use prometheus_client::{
    collector::Collector as EncodeCollector,
    encoding::{
        DescriptorEncoder, EncodeLabelSet, EncodeLabelValue, EncodeMetric, LabelValueEncoder,
        MetricEncoder,
    },
    metrics::{
        counter::{ConstCounter, Counter},
        family::Family,
        gauge::{ConstGauge, Gauge},
        MetricType,
    },
    registry::Registry,
};

use crate::{
    descriptor::{Descriptor, MetricKind},
    sample::Sample,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, EncodeLabelSet)]
pub(super) struct CollectorLabels {
    collector: String,
}

impl CollectorLabels {
    pub(super) fn new(collector: &str) -> Self {
        Self {
            collector: collector.to_owned(),
        }
    }
}

/// Metrics that live for the process lifetime.
#[derive(Debug, Default)]
pub(super) struct ExporterMetrics {
    pub scrapes: Counter,
    pub scrape_errors: Family<CollectorLabels, Counter>,
    pub last_scrape_error: Gauge,
    pub up: Gauge,
}

impl ExporterMetrics {
    pub(super) fn register(&self, registry: &mut Registry, namespace: &str) {
        registry.register(
            format!("{namespace}_exporter_scrapes"),
            "Total number of times the backend was scraped for metrics",
            self.scrapes.clone(),
        );
        registry.register(
            format!("{namespace}_exporter_scrape_errors"),
            "Total number of times an error occurred scraping the backend, by collector",
            self.scrape_errors.clone(),
        );
        registry.register(
            format!("{namespace}_exporter_last_scrape_error"),
            "Whether the last scrape of metrics from the backend resulted in an error (1 for error, 0 for success)",
            self.last_scrape_error.clone(),
        );
        registry.register(
            format!("{namespace}_up"),
            "Whether the backend is up",
            self.up.clone(),
        );
    }
}

const DURATION_HELP: &str = "Duration of a collector scrape, in seconds";

/// Samples emitted by collectors in a scrape, grouped into families.
#[derive(Debug)]
struct SampleFamily {
    descriptor: Arc<Descriptor>,
    samples: Vec<Sample>,
}

/// Immutable view of a single scrape cycle, encoded alongside persistent metrics.
#[derive(Debug)]
pub(super) struct CycleSnapshot {
    duration_name: String,
    durations: Vec<(&'static str, f64)>,
    families: Vec<SampleFamily>,
}

impl CycleSnapshot {
    /// Groups `samples` (already in the output order) by family name, preserving the order
    /// of first emission.
    pub(super) fn new(
        namespace: &str,
        durations: Vec<(&'static str, f64)>,
        samples: impl IntoIterator<Item = Sample>,
    ) -> Self {
        let mut families: Vec<SampleFamily> = vec![];
        for sample in samples {
            let existing = families
                .iter_mut()
                .find(|family| family.descriptor.name() == sample.descriptor().name());
            if let Some(family) = existing {
                family.samples.push(sample);
            } else {
                families.push(SampleFamily {
                    descriptor: Arc::clone(sample.descriptor()),
                    samples: vec![sample],
                });
            }
        }

        Self {
            duration_name: format!("{namespace}_exporter_collector_duration_seconds"),
            durations,
            families,
        }
    }
}

impl EncodeCollector for CycleSnapshot {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> fmt::Result {
        let mut duration_encoder =
            encoder.encode_descriptor(&self.duration_name, DURATION_HELP, None, MetricType::Gauge)?;
        for &(collector, seconds) in &self.durations {
            let labels = [("collector", collector)];
            ConstGauge::new(seconds).encode(duration_encoder.encode_family(&labels)?)?;
        }

        for family in &self.families {
            let descriptor = &family.descriptor;
            let mut family_encoder = encoder.encode_descriptor(
                descriptor.family_name(),
                descriptor.help(),
                None,
                descriptor.kind().metric_type(),
            )?;
            if descriptor.label_names().is_empty() {
                // An unlabeled family has a single series; the latest emitted value wins.
                if family.samples.len() > 1 {
                    tracing::debug!(
                        family = descriptor.family_name(),
                        dropped = family.samples.len() - 1,
                        "Unlabeled metric emitted several times, keeping the last value"
                    );
                }
                if let Some(sample) = family.samples.last() {
                    encode_value(descriptor.kind(), sample.value(), family_encoder)?;
                }
                continue;
            }
            for sample in &family.samples {
                let labels: Vec<_> = sample
                    .labels()
                    .map(|(name, value)| (name, EscapedLabelValue(value)))
                    .collect();
                encode_value(
                    descriptor.kind(),
                    sample.value(),
                    family_encoder.encode_family(&labels)?,
                )?;
            }
        }
        Ok(())
    }
}

/// Label value coming from a backend, with backslashes, double quotes and line feeds escaped.
#[derive(Debug, Clone, Copy)]
struct EscapedLabelValue<'a>(&'a str);

impl EncodeLabelValue for EscapedLabelValue<'_> {
    fn encode(&self, encoder: &mut LabelValueEncoder<'_>) -> fmt::Result {
        let mut rest = self.0;
        while let Some(pos) = rest.find(['\\', '"', '\n']) {
            encoder.write_str(&rest[..pos])?;
            encoder.write_str(match rest.as_bytes()[pos] {
                b'\\' => "\\\\",
                b'"' => "\\\"",
                _ => "\\n",
            })?;
            rest = &rest[pos + 1..];
        }
        encoder.write_str(rest)
    }
}

fn encode_value(kind: MetricKind, value: f64, encoder: MetricEncoder<'_>) -> fmt::Result {
    match kind {
        MetricKind::Counter => ConstCounter::new(value).encode(encoder),
        MetricKind::Gauge => ConstGauge::new(value).encode(encoder),
    }
}
