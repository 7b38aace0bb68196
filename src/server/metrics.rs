// Prometheus metrics for the HTTP API

use anyhow::{Context, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

pub struct ServerMetrics {
    registry: Registry,
    queries: IntCounterVec,
    query_duration: HistogramVec,
    active_sessions: IntGauge,
}

impl ServerMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("aerodesk".to_string()), None)
            .context("Failed to create metrics registry")?;

        let queries = IntCounterVec::new(
            Opts::new("queries_total", "Queries processed, by agent action"),
            &["action"],
        )?;
        let query_duration = HistogramVec::new(
            HistogramOpts::new("query_duration_seconds", "Time spent answering a query")
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["action"],
        )?;
        let active_sessions = IntGauge::new("active_sessions", "Sessions currently held in memory")?;

        registry.register(Box::new(queries.clone()))?;
        registry.register(Box::new(query_duration.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;

        Ok(Self {
            registry,
            queries,
            query_duration,
            active_sessions,
        })
    }

    pub fn observe_query(&self, action: &str, seconds: f64) {
        self.queries.with_label_values(&[action]).inc();
        self.query_duration.with_label_values(&[action]).observe(seconds);
    }

    pub fn set_active_sessions(&self, count: usize) {
        self.active_sessions.set(count as i64);
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .context("Failed to encode metrics")?;
        String::from_utf8(buffer).context("Metrics output is not UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_counts_queries() {
        let metrics = ServerMetrics::new().unwrap();
        metrics.observe_query("tool_execution", 0.2);
        metrics.observe_query("tool_execution", 0.4);
        metrics.set_active_sessions(3);

        let text = metrics.render().unwrap();
        assert!(text.contains("aerodesk_queries_total{action=\"tool_execution\"} 2"));
        assert!(text.contains("aerodesk_active_sessions 3"));
        assert!(text.contains("aerodesk_query_duration_seconds_bucket"));
    }
}
