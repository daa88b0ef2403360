//! Page-timing samples and the sink they are pushed into
//!
//! The metric backend is owned by the harness; the engine only produces
//! samples and hands them to an injected [`SampleSink`].

use std::collections::HashMap;
use std::time::Duration;

/// The page-timing metrics emitted by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrowserMetric {
    Loaded,
    DomContentLoaded,
    FirstPaint,
    FirstContentfulPaint,
    FirstMeaningfulPaint,
}

impl BrowserMetric {
    pub fn name(&self) -> &'static str {
        match self {
            BrowserMetric::Loaded => "browser_loaded",
            BrowserMetric::DomContentLoaded => "browser_dom_content_loaded",
            BrowserMetric::FirstPaint => "browser_first_paint",
            BrowserMetric::FirstContentfulPaint => "browser_first_contentful_paint",
            BrowserMetric::FirstMeaningfulPaint => "browser_first_meaningful_paint",
        }
    }
}

impl std::fmt::Display for BrowserMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One duration sample, tagged with the active scope tags
#[derive(Debug, Clone)]
pub struct Sample {
    pub metric: BrowserMetric,
    pub value: Duration,
    pub tags: HashMap<String, String>,
}

/// Receives samples produced by the engine
pub trait SampleSink: Send + Sync {
    fn emit(&self, sample: Sample);
}

/// Drops samples; the default when the harness supplies no backend
#[derive(Debug, Default)]
pub struct NullSink;

impl SampleSink for NullSink {
    fn emit(&self, sample: Sample) {
        tracing::debug!(
            metric = sample.metric.name(),
            value_ms = sample.value.as_millis() as u64,
            "sample dropped (no sink configured)"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_stable() {
        assert_eq!(BrowserMetric::Loaded.name(), "browser_loaded");
        assert_eq!(
            BrowserMetric::FirstContentfulPaint.to_string(),
            "browser_first_contentful_paint"
        );
    }
}
