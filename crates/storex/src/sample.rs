//! Metric samples and the concurrent sink collectors write them to.

use std::{fmt, sync::Arc};

use tokio::sync::mpsc;

use crate::descriptor::Descriptor;

/// Single observation emitted by a collector during a scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    descriptor: Arc<Descriptor>,
    value: f64,
    label_values: Vec<String>,
}

impl Sample {
    /// Returns the descriptor of the family this sample belongs to.
    pub fn descriptor(&self) -> &Arc<Descriptor> {
        &self.descriptor
    }

    /// Returns the sample value.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Returns label values, positionally matching [`Descriptor::label_names()`].
    pub fn label_values(&self) -> &[String] {
        &self.label_values
    }

    /// Iterates over `(label_name, label_value)` pairs in the declared label order.
    pub fn labels(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.descriptor
            .label_names()
            .iter()
            .zip(&self.label_values)
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

/// Errors emitting a [`Sample`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SampleError {
    /// Number of label values differs from the number of label names in the descriptor.
    #[error("metric `{metric}` expects {expected} label values, got {actual}")]
    LabelCount {
        /// Metric name.
        metric: String,
        /// Number of label names in the descriptor.
        expected: usize,
        /// Number of provided label values.
        actual: usize,
    },
    /// The scrape this sink belongs to has already been completed.
    #[error("cannot emit `{metric}`: scrape is already completed")]
    Closed {
        /// Metric name.
        metric: String,
    },
}

type Tagged = (usize, Sample);

/// Concurrency-safe destination for samples produced by collectors.
///
/// A sink is a cheap clonable handle; all clones created for a scrape feed the same buffer.
/// Each handle is tagged with the collector that owns it, which allows the orchestrator to group
/// samples deterministically and to drop the output of collectors that failed.
#[derive(Clone)]
pub struct Sink {
    origin: usize,
    sender: mpsc::UnboundedSender<Tagged>,
}

impl fmt::Debug for Sink {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Sink")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl Sink {
    /// Creates a sink that is not attached to any scrape, together with the buffer receiving
    /// its samples. Useful to drive a single collector in isolation.
    pub fn detached() -> (Self, Samples) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { origin: 0, sender }, Samples { receiver })
    }

    pub(crate) fn with_origin(&self, origin: usize) -> Self {
        Self {
            origin,
            sender: self.sender.clone(),
        }
    }

    /// Emits a sample for the family described by `descriptor`. `label_values` must positionally
    /// match [`Descriptor::label_names()`].
    ///
    /// # Errors
    ///
    /// Returns an error if the number of label values is wrong, or if the scrape this sink belongs to
    /// has been completed.
    pub fn emit<I, S>(
        &self,
        descriptor: &Arc<Descriptor>,
        value: f64,
        label_values: I,
    ) -> Result<(), SampleError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let label_values: Vec<String> = label_values.into_iter().map(Into::into).collect();
        let expected = descriptor.label_names().len();
        if label_values.len() != expected {
            return Err(SampleError::LabelCount {
                metric: descriptor.name().to_owned(),
                expected,
                actual: label_values.len(),
            });
        }

        let sample = Sample {
            descriptor: Arc::clone(descriptor),
            value,
            label_values,
        };
        self.sender
            .send((self.origin, sample))
            .map_err(|_| SampleError::Closed {
                metric: descriptor.name().to_owned(),
            })
    }

    /// Emits a sample for a family without labels.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor declares labels, or if the scrape this sink belongs to
    /// has been completed.
    pub fn emit_value(&self, descriptor: &Arc<Descriptor>, value: f64) -> Result<(), SampleError> {
        self.emit(descriptor, value, [] as [&str; 0])
    }
}

/// Buffer of samples emitted into a [`Sink`].
#[derive(Debug)]
pub struct Samples {
    receiver: mpsc::UnboundedReceiver<Tagged>,
}

impl Samples {
    pub(crate) fn channel() -> (Sink, Self) {
        Sink::detached()
    }

    /// Takes all samples buffered so far, in emission order.
    pub fn drain(&mut self) -> Vec<Sample> {
        self.drain_tagged()
            .into_iter()
            .map(|(_, sample)| sample)
            .collect()
    }

    pub(crate) fn drain_tagged(&mut self) -> Vec<Tagged> {
        let mut samples = vec![];
        while let Ok(tagged) = self.receiver.try_recv() {
            samples.push(tagged);
        }
        samples
    }
}
