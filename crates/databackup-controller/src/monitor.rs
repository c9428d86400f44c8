//! Worker pod observation and duration bookkeeping

use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;

/// What the worker pod says about the backup
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodOutcome {
    /// Pending, running, or unknown
    Running,
    /// Exited successfully at the given time
    Succeeded(DateTime<Utc>),
    /// Exited with an error at the given time
    Failed(DateTime<Utc>),
}

/// Classify a worker pod
///
/// The terminal time is the first pod condition's transition time; a pod
/// without conditions is treated as having finished at `now`.
pub fn inspect(pod: &Pod, now: DateTime<Utc>) -> PodOutcome {
    let status = pod.status.as_ref();
    let finished_at = || {
        status
            .and_then(|s| s.conditions.as_ref())
            .and_then(|c| c.first())
            .and_then(|c| c.last_transition_time.as_ref())
            .map(|t| t.0)
            .unwrap_or(now)
    };

    match status.and_then(|s| s.phase.as_deref()) {
        Some("Succeeded") => PodOutcome::Succeeded(finished_at()),
        Some("Failed") => PodOutcome::Failed(finished_at()),
        _ => PodOutcome::Running,
    }
}

/// Elapsed time between creation and completion, never negative
pub fn elapsed(created: DateTime<Utc>, finished: DateTime<Utc>) -> Duration {
    (finished - created).to_std().unwrap_or(Duration::ZERO)
}

/// Render a duration rounded to whole seconds, e.g. `45s`, `1m30s`, `2h0m5s`
pub fn format_duration(d: Duration) -> String {
    let secs = (d.as_millis() + 500) / 1000;
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else {
        format!("{s}s")
    }
}
