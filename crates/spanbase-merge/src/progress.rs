//! Progress reporter for the merged-region open.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use spanbase_server::Progressable;
use spanbase_types::RegionDescriptor;
use tracing::info;

/// Logs a liveness line at a fixed cadence while a region open is in
/// progress. The open of a large merged region can block for tens of
/// seconds; the log line is the only sign of life.
#[derive(Debug)]
pub struct LoggingProgress {
    region: String,
    interval: Duration,
    started: Instant,
    last_logged: Mutex<Instant>,
    lines: AtomicU64,
}

impl LoggingProgress {
    /// Create a reporter for `region` logging every `interval_ms`.
    #[must_use]
    pub fn new(region: &RegionDescriptor, interval_ms: u64) -> Self {
        let now = Instant::now();
        Self {
            region: region.region_name_as_string(),
            interval: Duration::from_millis(interval_ms),
            started: now,
            last_logged: Mutex::new(now),
            lines: AtomicU64::new(0),
        }
    }

    /// Number of log lines emitted so far.
    #[must_use]
    pub fn lines_logged(&self) -> u64 {
        self.lines.load(Ordering::Relaxed)
    }
}

impl Progressable for LoggingProgress {
    fn progress(&self) {
        let mut last = self.last_logged.lock();
        if last.elapsed() >= self.interval {
            let elapsed_ms =
                u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
            info!(region = %self.region, elapsed_ms, "opening merged region, still in progress");
            *last = Instant::now();
            self.lines.fetch_add(1, Ordering::Relaxed);
        }
    }
}
