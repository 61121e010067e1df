//! Helpers shared by backend tests.

use std::fmt::Write as _;

use storex::{client::BackendClient, CollectError, Collector, CollectorRegistry, Sample, Sink};

/// Runs a single collector against `client` and renders the emitted samples as
/// `name{label="value",..} value` lines, in emission order.
pub(crate) async fn collect_lines(
    collector: &dyn Collector,
    client: &dyn BackendClient,
) -> Result<Vec<String>, CollectError> {
    let (sink, mut samples) = Sink::detached();
    collector.collect(client, &sink).await?;
    Ok(samples.drain().iter().map(render_sample).collect())
}

/// Same as [`collect_lines()`], but looks up the collector by name in `registry`.
pub(crate) async fn collect_named(
    registry: &CollectorRegistry,
    name: &str,
    client: &dyn BackendClient,
) -> Result<Vec<String>, CollectError> {
    let (collector, _) = registry
        .entries()
        .find(|(collector, _)| collector.name() == name)
        .unwrap_or_else(|| panic!("collector `{name}` is not registered"));
    collect_lines(collector, client).await
}

fn render_sample(sample: &Sample) -> String {
    let mut line = sample.descriptor().name().to_owned();
    let labels: Vec<_> = sample
        .labels()
        .map(|(name, value)| format!("{name}=\"{value}\""))
        .collect();
    if !labels.is_empty() {
        write!(line, "{{{}}}", labels.join(",")).unwrap();
    }
    write!(line, " {}", sample.value()).unwrap();
    line
}
