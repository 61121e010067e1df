//! Metric family descriptors.

use std::{fmt, sync::Arc};

use prometheus_client::metrics::MetricType;

use crate::validation::{assert_label_names, assert_metric_name};

/// Kind of values reported for a metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Monotonically increasing value.
    Counter,
    /// Value that can go up and down.
    Gauge,
}

impl MetricKind {
    pub(crate) fn metric_type(self) -> MetricType {
        match self {
            Self::Counter => MetricType::Counter,
            Self::Gauge => MetricType::Gauge,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
        })
    }
}

/// Immutable identity of a metric family: fully qualified name, help text, ordered label names
/// and value kind.
///
/// Descriptors are created once (usually when a [`Collector`](crate::Collector) is constructed)
/// and shared by reference with all [`Sample`](crate::Sample)s of the family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Descriptor {
    name: String,
    help: String,
    label_names: Vec<String>,
    kind: MetricKind,
}

impl Descriptor {
    /// Creates a descriptor. The fully qualified name is built by joining non-empty `namespace`,
    /// `subsystem` and `name` with `_`.
    ///
    /// # Panics
    ///
    /// Panics if the resulting metric name or any of the label names is not a valid Prometheus name.
    #[track_caller]
    pub fn new(
        namespace: &str,
        subsystem: &str,
        name: &str,
        help: impl Into<String>,
        label_names: &[&str],
        kind: MetricKind,
    ) -> Self {
        let name = Self::fq_name(namespace, subsystem, name);
        assert_metric_name(&name);
        assert_label_names(label_names);
        Self {
            name,
            help: help.into(),
            label_names: label_names.iter().map(|&name| name.to_owned()).collect(),
            kind,
        }
    }

    /// Shortcut to create a shared gauge descriptor.
    #[track_caller]
    pub fn gauge(
        namespace: &str,
        subsystem: &str,
        name: &str,
        help: impl Into<String>,
        label_names: &[&str],
    ) -> Arc<Self> {
        Arc::new(Self::new(
            namespace,
            subsystem,
            name,
            help,
            label_names,
            MetricKind::Gauge,
        ))
    }

    /// Shortcut to create a shared counter descriptor.
    #[track_caller]
    pub fn counter(
        namespace: &str,
        subsystem: &str,
        name: &str,
        help: impl Into<String>,
        label_names: &[&str],
    ) -> Arc<Self> {
        Arc::new(Self::new(
            namespace,
            subsystem,
            name,
            help,
            label_names,
            MetricKind::Counter,
        ))
    }

    fn fq_name(namespace: &str, subsystem: &str, name: &str) -> String {
        let parts = [namespace, subsystem, name];
        let parts: Vec<_> = parts.into_iter().filter(|part| !part.is_empty()).collect();
        parts.join("_")
    }

    /// Returns the fully qualified metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the help text.
    pub fn help(&self) -> &str {
        &self.help
    }

    /// Returns label names in the order label values must be provided.
    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    /// Returns the kind of values reported for this family.
    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Name passed to the encoder. The OpenMetrics encoder appends `_total` to counter samples itself.
    pub(crate) fn family_name(&self) -> &str {
        match self.kind {
            MetricKind::Counter => self.name.strip_suffix("_total").unwrap_or(&self.name),
            MetricKind::Gauge => &self.name,
        }
    }
}
