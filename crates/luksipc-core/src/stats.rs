//! Throttled progress reporting: shown at most every few seconds, and
//! never more than once per 100 MiB/5s or forced at 60s regardless.

use std::time::{Duration, Instant};

const MIN_PROGRESS_BYTES: u64 = 100 * 1024 * 1024;
const MIN_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);
const FORCE_PROGRESS_INTERVAL: Duration = Duration::from_secs(60);

pub struct ProgressStats {
    start: Instant,
    last_show: Instant,
    last_out_offset: u64,
    copied: u64,
}

impl ProgressStats {
    pub fn start(initial_out_offset: u64) -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_show: now,
            last_out_offset: initial_out_offset,
            copied: 0,
        }
    }

    pub fn record_copied(&mut self, bytes: u64) {
        self.copied += bytes;
    }

    /// Called after every successful write; logs a progress line through
    /// `tracing::info!` when enough time or data has passed since the last
    /// one.
    pub fn maybe_show(&mut self, out_offset: u64, end_out_offset: u64) {
        let now = Instant::now();
        let progress_bytes = out_offset.saturating_sub(self.last_out_offset);
        let progress_time = now.duration_since(self.last_show);

        let should_show = (progress_bytes >= MIN_PROGRESS_BYTES
            && progress_time >= MIN_PROGRESS_INTERVAL)
            || progress_time >= FORCE_PROGRESS_INTERVAL;

        if !should_show {
            return;
        }

        let runtime = now.duration_since(self.start);
        let runtime_secs = runtime.as_secs();

        let speed_bytes_per_sec = if runtime.as_secs_f64() > 1.0 {
            self.copied as f64 / runtime.as_secs_f64()
        } else {
            0.0
        };

        let remaining_bytes = end_out_offset.saturating_sub(out_offset);
        let remaining_secs = if speed_bytes_per_sec > 10.0 {
            let secs = remaining_bytes as f64 / speed_bytes_per_sec;
            if secs > 0.0 && secs < 100.0 * 3600.0 {
                secs as u64
            } else {
                0
            }
        } else {
            0
        };

        let pct = if end_out_offset > 0 {
            100.0 * out_offset as f64 / end_out_offset as f64
        } else {
            100.0
        };

        tracing::info!(
            "{:2}:{:02}: {:5.1}%   {:7} MiB / {} MiB   {:5.1} MiB/s   Left: {:7} MiB {:2}:{:02} h:m",
            runtime_secs / 3600,
            (runtime_secs % 3600) / 60,
            pct,
            out_offset / 1024 / 1024,
            end_out_offset / 1024 / 1024,
            speed_bytes_per_sec / 1024.0 / 1024.0,
            remaining_bytes / 1024 / 1024,
            remaining_secs / 3600,
            (remaining_secs % 3600) / 60,
        );

        self.last_out_offset = out_offset;
        self.last_show = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn does_not_show_immediately_after_start_with_small_progress() {
        let mut stats = ProgressStats::start(0);
        // Should be a no-op; nothing to assert on directly besides "doesn't panic"
        // since tracing output isn't captured here, but we exercise the code path.
        stats.record_copied(1024);
        stats.maybe_show(1024, 10 * 1024 * 1024 * 1024);
    }

    #[test]
    fn record_copied_accumulates() {
        let mut stats = ProgressStats::start(0);
        stats.record_copied(100);
        stats.record_copied(200);
        assert_eq!(stats.copied, 300);
    }
}
