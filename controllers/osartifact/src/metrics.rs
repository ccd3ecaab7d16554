//! Prometheus metrics for the OSArtifact controller.

use crate::error::ControllerError;
use crds::ArtifactPhase;
use prometheus::{IntCounterVec, Opts, Registry};

/// Counters exported on `/metrics`
#[derive(Debug, Clone)]
pub struct Metrics {
    /// Reconcile invocations, by the phase the artifact was found in
    reconciliations: IntCounterVec,
    /// Failed reconcile invocations, by error kind
    failures: IntCounterVec,
    /// Phase transitions written, by edge
    transitions: IntCounterVec,
    registry: Registry,
}

impl Metrics {
    /// Create the counters and register them in a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconciliations = IntCounterVec::new(
            Opts::new(
                "osartifact_reconciliations_total",
                "Total number of OSArtifact reconcile invocations",
            ),
            &["phase"],
        )?;
        registry.register(Box::new(reconciliations.clone()))?;

        let failures = IntCounterVec::new(
            Opts::new(
                "osartifact_reconcile_errors_total",
                "Total number of OSArtifact reconcile invocations that returned an error",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(failures.clone()))?;

        let transitions = IntCounterVec::new(
            Opts::new(
                "osartifact_phase_transitions_total",
                "Total number of OSArtifact phase transitions",
            ),
            &["from", "to"],
        )?;
        registry.register(Box::new(transitions.clone()))?;

        Ok(Self {
            reconciliations,
            failures,
            transitions,
            registry,
        })
    }

    /// Count a reconcile of an artifact in `phase`
    pub fn record_reconcile(&self, phase: ArtifactPhase) {
        self.reconciliations.with_label_values(&[phase.as_str()]).inc();
    }

    /// Count a failed reconcile
    pub fn record_failure(&self, error: &ControllerError) {
        self.failures.with_label_values(&[error.metric_label()]).inc();
    }

    /// Count a persisted phase transition
    pub fn record_transition(&self, from: ArtifactPhase, to: ArtifactPhase) {
        self.transitions
            .with_label_values(&[from.as_str(), to.as_str()])
            .inc();
    }

    /// Render every metric in the Prometheus text format
    pub fn export_text(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    #[cfg(test)]
    pub(crate) fn transitions(&self, from: ArtifactPhase, to: ArtifactPhase) -> u64 {
        self.transitions
            .with_label_values(&[from.as_str(), to.as_str()])
            .get()
    }
}
