//! Prometheus registry with per-outcome case counters and a latency histogram.
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};

/// How a `/check` request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseOutcome {
    Completed,
    Halted,
    Rejected,
    Failed,
}

impl CaseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseOutcome::Completed => "completed",
            CaseOutcome::Halted => "halted",
            CaseOutcome::Rejected => "rejected",
            CaseOutcome::Failed => "failed",
        }
    }
}

pub struct Metrics {
    registry: Registry,
    cases: IntCounterVec,
    latency: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let cases = IntCounterVec::new(
            Opts::new("rxguard_cases_total", "Cases handled, by outcome"),
            &["outcome"],
        )?;
        let latency = Histogram::with_opts(
            HistogramOpts::new("rxguard_case_duration_seconds", "End-to-end case latency")
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        )?;
        registry.register(Box::new(cases.clone()))?;
        registry.register(Box::new(latency.clone()))?;

        for outcome in [
            CaseOutcome::Completed,
            CaseOutcome::Halted,
            CaseOutcome::Rejected,
            CaseOutcome::Failed,
        ] {
            cases.with_label_values(&[outcome.as_str()]);
        }

        Ok(Self {
            registry,
            cases,
            latency,
        })
    }

    pub fn record(&self, outcome: CaseOutcome, seconds: f64) {
        self.cases.with_label_values(&[outcome.as_str()]).inc();
        if outcome != CaseOutcome::Rejected {
            self.latency.observe(seconds);
        }
    }

    pub fn count(&self, outcome: CaseOutcome) -> u64 {
        self.cases.with_label_values(&[outcome.as_str()]).get()
    }

    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }
}
