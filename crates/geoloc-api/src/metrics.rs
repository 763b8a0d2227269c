//! Prometheus counters served on `/metrics`.
use geoloc_core::PipelineState;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    runs_total: IntCounterVec,
    collaborator_failures_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let runs_total = IntCounterVec::new(
            Opts::new("geoloc_runs_total", "Completed pipeline runs by intent"),
            &["intent"],
        )?;
        let collaborator_failures_total = IntCounter::new(
            "geoloc_collaborator_failures_total",
            "Collaborator failures absorbed by the pipeline",
        )?;

        registry.register(Box::new(runs_total.clone()))?;
        registry.register(Box::new(collaborator_failures_total.clone()))?;

        Ok(Self {
            registry,
            runs_total,
            collaborator_failures_total,
        })
    }

    /// Counts a finished run.
    pub fn observe(&self, state: &PipelineState) {
        let intent = state.intent.map(|i| i.as_str()).unwrap_or("unknown");
        self.runs_total.with_label_values(&[intent]).inc();
        self.collaborator_failures_total
            .inc_by(state.failures.len() as u64);
    }

    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoloc_core::Intent;

    #[test]
    fn test_observe_counts_runs_and_failures() {
        let metrics = Metrics::new().unwrap();

        let mut state = PipelineState::new("where?", Some("img.jpg".into()));
        state.intent = Some(Intent::Reasoning);
        state.record_failure("execute.spatial.v1", "db", "timeout");
        state.record_failure("narrate.locations.v1", "llm", "503");
        metrics.observe(&state);

        let text = metrics.encode().unwrap();
        assert!(text.contains("geoloc_runs_total{intent=\"reasoning\"} 1"));
        assert!(text.contains("geoloc_collaborator_failures_total 2"));
    }
}
