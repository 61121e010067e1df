//! Support for exposition formats.

use std::{fmt, mem};

use prometheus_client::{encoding::text, registry::Registry};

/// Metrics exposition format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Format {
    /// [Prometheus text format][prom], version 0.0.4. Obtained by a streaming transform of
    /// OpenMetrics-encoded metrics that moves the `_total` suffix of counters to their `# HELP` / `# TYPE`
    /// lines and removes the `# EOF` terminator. This is the default format.
    ///
    /// [prom]: https://prometheus.io/docs/instrumenting/exposition_formats/
    #[default]
    Prometheus,
    /// [OpenMetrics text format][om] as produced by [`prometheus-client`].
    ///
    /// [om]: https://github.com/OpenObservability/OpenMetrics/blob/main/specification/OpenMetrics.md
    /// [`prometheus-client`]: https://docs.rs/prometheus-client/
    OpenMetrics,
}

impl Format {
    /// Content type for the Prometheus text format.
    pub const PROMETHEUS_CONTENT_TYPE: &'static str = "text/plain; version=0.0.4; charset=utf-8";
    /// Content type for the OpenMetrics text format.
    pub const OPEN_METRICS_CONTENT_TYPE: &'static str =
        "application/openmetrics-text; version=1.0.0; charset=utf-8";

    /// Returns the content type of this format.
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Prometheus => Self::PROMETHEUS_CONTENT_TYPE,
            Self::OpenMetrics => Self::OPEN_METRICS_CONTENT_TYPE,
        }
    }

    /// Chooses the format based on the `Accept` header of a scrape request. OpenMetrics is only used
    /// if the client explicitly asks for it.
    pub fn negotiate(accept: Option<&str>) -> Self {
        let wants_open_metrics = accept.is_some_and(|accept| {
            accept
                .split(',')
                .any(|item| item.trim().starts_with("application/openmetrics-text"))
        });
        if wants_open_metrics {
            Self::OpenMetrics
        } else {
            Self::Prometheus
        }
    }
}

/// Encodes `registry` into `writer` using the specified format.
pub(crate) fn encode<W: fmt::Write>(
    writer: &mut W,
    registry: &Registry,
    format: Format,
) -> fmt::Result {
    match format {
        Format::OpenMetrics => text::encode(writer, registry),
        Format::Prometheus => {
            let mut wrapper = PrometheusWrapper::new(writer);
            text::encode(&mut wrapper, registry)?;
            wrapper.flush()
        }
    }
}

#[must_use = "Must be `flush()`ed to not lose the last line"]
#[derive(Debug)]
struct PrometheusWrapper<'a, W> {
    writer: &'a mut W,
    pending_help: Option<String>,
    last_line: String,
}

impl<'a, W: fmt::Write> PrometheusWrapper<'a, W> {
    fn new(writer: &'a mut W) -> Self {
        Self {
            writer,
            pending_help: None,
            last_line: String::new(),
        }
    }

    /// Splits a `# HELP` / `# TYPE` payload into the metric name and the remainder.
    fn split_name(definition: &str) -> Result<(&str, &str), fmt::Error> {
        definition
            .split_once(|ch: char| ch.is_ascii_whitespace())
            .ok_or(fmt::Error)
    }

    fn handle_line(&mut self) -> fmt::Result {
        let line = mem::take(&mut self.last_line);
        if line == "# EOF" {
            // Prometheus format doesn't specify the termination sequence.
            return self.flush_pending_help();
        }

        if line.starts_with("# HELP ") {
            // `# HELP` precedes `# TYPE`, so it can only be rewritten once the type is known.
            self.flush_pending_help()?;
            self.pending_help = Some(line);
            return Ok(());
        }

        if let Some(type_def) = line.strip_prefix("# TYPE ") {
            let (name, ty) = Self::split_name(type_def)?;
            let ty = ty.trim();
            if ty == "counter" {
                // Counter samples are reported with the `_total` suffix; Prometheus expects the family
                // to have the same name as its samples.
                if let Some(help) = self.pending_help.take() {
                    let help_def = help.strip_prefix("# HELP ").ok_or(fmt::Error)?;
                    let (help_name, help_text) = Self::split_name(help_def)?;
                    if help_name == name {
                        writeln!(self.writer, "# HELP {name}_total {help_text}")?;
                    } else {
                        writeln!(self.writer, "{help}")?;
                    }
                }
                return writeln!(self.writer, "# TYPE {name}_total {ty}");
            }
            self.flush_pending_help()?;
            return writeln!(self.writer, "{line}");
        }

        self.flush_pending_help()?;
        writeln!(self.writer, "{line}")
    }

    fn flush_pending_help(&mut self) -> fmt::Result {
        if let Some(help) = self.pending_help.take() {
            writeln!(self.writer, "{help}")?;
        }
        Ok(())
    }

    fn flush(mut self) -> fmt::Result {
        if !self.last_line.is_empty() {
            self.handle_line()?;
        }
        self.flush_pending_help()
    }
}

impl<W: fmt::Write> fmt::Write for PrometheusWrapper<'_, W> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let lines: Vec<_> = s.lines().collect();
        for (i, line) in lines.iter().enumerate() {
            self.last_line.push_str(line);
            if i + 1 < lines.len() || s.ends_with('\n') {
                self.handle_line()?;
            }
        }
        Ok(())
    }
}
