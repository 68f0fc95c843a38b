//! Advisory conversion progress
//!
//! There is no byte-accurate telemetry from the encoder; progress is derived
//! purely from wall-clock time against a per-file estimate and mapped through
//! a piecewise curve so perceived progress stays smooth. The tracker task is
//! aborted the instant the encoder process exits and never races the final
//! forced 100% write, which happens only after the abort completes.

use crate::db::{JobStore, JobUpdate};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// How often the tracker samples the model
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Minimum advance (in percent points) before a store write is emitted
pub const MIN_STEP: f64 = 2.0;

/// Estimated progress must never claim more than this before the encoder
/// actually exits
pub const PROGRESS_CAP: f64 = 90.0;

/// Strategy mapping elapsed wall-clock time to a percentage.
///
/// Pluggable so tests can inject a fast deterministic model instead of the
/// per-file-seconds estimate.
pub trait ProgressModel: Send + Sync {
    fn percent(&self, elapsed: Duration) -> f64;
}

/// Production model: elapsed time against `per_file_seconds * file_count`,
/// shaped through a three-segment curve (slow start, medium ramp, faster ramp
/// to the 90% cap).
#[derive(Debug, Clone)]
pub struct ElapsedTimeModel {
    pub per_file_seconds: f64,
    pub file_count: usize,
}

impl ProgressModel for ElapsedTimeModel {
    fn percent(&self, elapsed: Duration) -> f64 {
        let estimated_total = (self.per_file_seconds * self.file_count as f64).max(f64::EPSILON);
        let t = (elapsed.as_secs_f64() / estimated_total).min(0.9);

        if t < 0.1 {
            // 0-10% of estimated time maps to 0-2% progress
            t * 20.0
        } else if t < 0.5 {
            // 10-50% of estimated time maps to 2-25% progress
            2.0 + (t - 0.1) * 57.5
        } else {
            // 50-90% of estimated time maps to 25-90% progress
            25.0 + (t - 0.5) * 162.5
        }
    }
}

/// Periodically advance the job's progress until aborted.
///
/// Writes are throttled to one per poll interval and only emitted when the
/// model has advanced by at least [`MIN_STEP`], bounding write volume to the
/// job store.
pub async fn track(store: JobStore, job_id: Uuid, model: Arc<dyn ProgressModel>) {
    let started = Instant::now();
    let mut last_written = 0.0_f64;

    loop {
        let percent = model.percent(started.elapsed()).min(PROGRESS_CAP);

        if percent - last_written >= MIN_STEP {
            match store
                .update(
                    job_id,
                    JobUpdate {
                        progress: Some(percent),
                        ..Default::default()
                    },
                )
                .await
            {
                Ok(_) => {
                    tracing::debug!(job_id = %job_id, progress = percent, "Progress update");
                    last_written = percent;
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Progress write failed");
                }
            }
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> ElapsedTimeModel {
        // 10 files at 12s each: 120s estimated total
        ElapsedTimeModel {
            per_file_seconds: 12.0,
            file_count: 10,
        }
    }

    #[test]
    fn test_curve_is_monotonic() {
        let model = model();
        let mut previous = -1.0;
        for seconds in 0..600 {
            let percent = model.percent(Duration::from_secs(seconds));
            assert!(
                percent >= previous,
                "progress went backwards at {}s: {} < {}",
                seconds,
                percent,
                previous
            );
            previous = percent;
        }
    }

    #[test]
    fn test_curve_never_exceeds_cap() {
        let model = model();
        assert!(model.percent(Duration::from_secs(0)) == 0.0);
        // Far past the estimate, still capped at 90
        let late = model.percent(Duration::from_secs(100_000));
        assert!((late - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_curve_segments() {
        let model = model();
        // 10% of the 120s estimate: boundary of the slow-start segment
        let at_slow_end = model.percent(Duration::from_secs_f64(12.0));
        assert!((at_slow_end - 2.0).abs() < 1e-6);
        // 50% of the estimate: boundary of the medium segment
        let at_medium_end = model.percent(Duration::from_secs_f64(60.0));
        assert!((at_medium_end - 25.0).abs() < 1e-6);
        // 90% of the estimate reaches the cap
        let at_cap = model.percent(Duration::from_secs_f64(108.0));
        assert!((at_cap - 90.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_files_does_not_divide_by_zero() {
        let model = ElapsedTimeModel {
            per_file_seconds: 12.0,
            file_count: 0,
        };
        let percent = model.percent(Duration::from_secs(10));
        assert!(percent.is_finite());
        assert!(percent <= 90.0);
    }
}
