use crate::core::Verdict;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::{Registry, Unit},
};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AdmissionMetrics {
    verdicts: Family<VerdictLabels, Counter>,
    decision_duration: Histogram,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct VerdictLabels {
    allowed: &'static str,
    reason: &'static str,
}

// === impl AdmissionMetrics ===

impl AdmissionMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let verdicts = Family::<VerdictLabels, Counter>::default();
        reg.register(
            "verdicts",
            "Total number of admission verdicts by outcome and reason",
            verdicts.clone(),
        );

        // Member decisions are bounded by the store's dial and request
        // timeouts, 5s each by default.
        let decision_duration =
            Histogram::new([0.001, 0.005, 0.025, 0.1, 0.5, 1.0, 5.0, 10.0]);
        reg.register_with_unit(
            "decision_duration",
            "Histogram of the time taken to render an admission verdict",
            Unit::Seconds,
            decision_duration.clone(),
        );

        Self {
            verdicts,
            decision_duration,
        }
    }

    pub(crate) fn observe(&self, verdict: &Verdict, elapsed: Duration) {
        self.decision_duration.observe(elapsed.as_secs_f64());
        self.verdicts
            .get_or_create(&VerdictLabels {
                allowed: if verdict.is_allowed() { "true" } else { "false" },
                reason: verdict.reason().code(),
            })
            .inc();
    }
}

impl Default for AdmissionMetrics {
    /// Metrics that are not exported.
    fn default() -> Self {
        Self::register(&mut Registry::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Reason;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn counts_verdicts_by_reason() {
        let mut prom = Registry::default();
        let metrics = AdmissionMetrics::register(prom.sub_registry_with_prefix("admission"));

        let denied = Verdict::deny(Reason::LeaderProtected);
        metrics.observe(&denied, Duration::from_millis(3));
        metrics.observe(&denied, Duration::from_millis(4));
        metrics.observe(
            &Verdict::deny(Reason::ClusterUnavailable),
            Duration::from_secs(5),
        );

        let mut text = String::new();
        encode(&mut text, &prom).unwrap();
        assert!(
            text.contains(r#"admission_verdicts_total{allowed="false",reason="LeaderProtected"} 2"#),
            "{text}"
        );
        assert!(
            text.contains(
                r#"admission_verdicts_total{allowed="false",reason="ClusterUnavailable"} 1"#
            ),
            "{text}"
        );
        assert!(
            text.contains("admission_decision_duration_seconds_count 3"),
            "{text}"
        );
    }
}
