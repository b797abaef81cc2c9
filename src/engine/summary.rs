//! Machine-readable outcomes returned by each engine entry point.

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoverSummary {
    pub created: usize,
    pub already_known: usize,
    /// Set when the upstream listing failed and nothing was discovered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AdvanceSummary {
    /// Records whose state moved forward.
    pub transitioned: usize,
    /// Not due, meeting not over yet, recurring parent, or terminal.
    pub skipped: usize,
    /// Not ready or transient failure; retried on a later pass.
    pub deferred: usize,
    /// Moved to `Failed` during this pass.
    pub failed: usize,
    /// Lost a version race to another writer.
    pub superseded: usize,
    /// Cut off by the invocation budget before finishing.
    pub unfinished: usize,
}

impl AdvanceSummary {
    pub fn record(&mut self, outcome: TransitionOutcome) {
        match outcome {
            TransitionOutcome::Transitioned => self.transitioned += 1,
            TransitionOutcome::Skipped => self.skipped += 1,
            TransitionOutcome::Deferred => self.deferred += 1,
            TransitionOutcome::Failed => self.failed += 1,
            TransitionOutcome::Superseded => self.superseded += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.transitioned
            + self.skipped
            + self.deferred
            + self.failed
            + self.superseded
            + self.unfinished
    }
}

/// What one record's pass ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionOutcome {
    Transitioned,
    Skipped,
    Deferred,
    Failed,
    Superseded,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RenewalSummary {
    pub renewed: usize,
    pub skipped: usize,
    pub deferred: usize,
    /// Subscriptions found past their expiry during this pass.
    pub lapsed: usize,
    pub superseded: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostSyncSummary {
    pub hosts_seen: usize,
    pub eligible: usize,
    pub created: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum ReplayOutcome {
    Replayed,
    /// The record is not `Failed`.
    NotEligible,
    NotFound,
    /// Still `Failed`, but every re-arm lost a version race. Safe to retry.
    Contended,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_summary_counts() {
        let mut summary = AdvanceSummary::default();
        summary.record(TransitionOutcome::Transitioned);
        summary.record(TransitionOutcome::Deferred);
        summary.record(TransitionOutcome::Deferred);
        summary.unfinished = 1;
        assert_eq!(summary.transitioned, 1);
        assert_eq!(summary.deferred, 2);
        assert_eq!(summary.total(), 4);
    }

    #[test]
    fn test_summaries_serialize_as_flat_counts() {
        let value = serde_json::to_value(AdvanceSummary::default()).unwrap();
        assert_eq!(value["superseded"], 0);
        let value = serde_json::to_value(ReplayOutcome::NotEligible).unwrap();
        assert_eq!(value["result"], "not_eligible");
    }
}
