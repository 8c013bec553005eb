//! Counters emitted by the core.
//!
//! Recording goes through the `metrics` facade; binaries decide which recorder (if any)
//! is installed. Labels are static strings so recording never allocates.

use metrics::counter;

pub const ADMISSIONS_TOTAL: &str = "sublimit_admissions_total";
pub const GATE_REJECTIONS_TOTAL: &str = "sublimit_gate_rejections_total";

/// Result of a single subscription admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    Admitted,
    Throttled,
}

impl AdmissionOutcome {
    #[must_use]
    pub fn as_metric_str(self) -> &'static str {
        match self {
            Self::Admitted => "admitted",
            Self::Throttled => "throttled",
        }
    }
}

#[inline]
pub fn record_admission(outcome: AdmissionOutcome) {
    counter!(ADMISSIONS_TOTAL, "outcome" => outcome.as_metric_str()).increment(1);
}

#[inline]
pub fn record_gate_rejection(reason: &'static str) {
    counter!(GATE_REJECTIONS_TOTAL, "reason" => reason).increment(1);
}
