//! Sliding scan window per shard.
//!
//! A pass walks hour buckets from `start_hour` down to 0. Files that turn up
//! in an older bucket mean the remote host is lagging, so the next pass
//! starts further back: twice the triggering bucket's depth, capped at
//! `max_hour`.

/// Lower edge of a bucket's age band past the hour boundary
pub const BAND_OFFSET_MINUTES: u32 = 10;
/// Upper edge of a bucket's age band past the hour boundary
pub const BAND_END_MINUTES: u32 = 120;
/// Deepest window a configuration may ask for: one year of buckets
pub const MAX_WINDOW_HOURS: u32 = 24 * 365;

/// Modification-age range, in minutes, scanned for one hour bucket.
///
/// Consecutive bands overlap by 50 minutes so a file sitting on an hour
/// boundary is seen by two passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgeBand {
    pub min_minutes: u32,
    pub max_minutes: u32,
}

impl AgeBand {
    pub fn for_bucket(hour: u32) -> Self {
        let start = hour.saturating_mul(60);
        Self {
            min_minutes: start.saturating_add(BAND_OFFSET_MINUTES),
            max_minutes: start.saturating_add(BAND_END_MINUTES),
        }
    }

    /// Exclusive on both ends, like `find -mmin +min -mmin -max`
    pub fn contains(&self, age_minutes: u32) -> bool {
        age_minutes > self.min_minutes && age_minutes < self.max_minutes
    }
}

/// Files one bucket of a pass downloaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discovery {
    pub hour: u32,
    pub files: usize,
}

/// Start hour for the next pass.
///
/// `discoveries` must be in scan order (oldest bucket first). The first
/// bucket that is older than 0, or is bucket 0 with more than
/// `burst_threshold` files, decides; no such bucket resets the window to 0.
pub fn next_window(
    previous_start_hour: u32,
    max_hour: u32,
    burst_threshold: usize,
    discoveries: &[Discovery],
) -> u32 {
    discoveries
        .iter()
        .filter(|d| d.hour <= previous_start_hour && d.files > 0)
        .find(|d| d.hour > 0 || d.files > burst_threshold)
        .map(|d| d.hour.saturating_add(1).saturating_mul(2).min(max_hour))
        .unwrap_or(0)
}

/// Window state owned by one shard worker, reset on every restart
#[derive(Debug, Clone)]
pub struct WindowState {
    start_hour: u32,
    max_hour: u32,
    burst_threshold: usize,
}

impl WindowState {
    pub fn new(max_hour: u32, burst_threshold: usize) -> Self {
        Self {
            start_hour: 0,
            max_hour,
            burst_threshold,
        }
    }

    pub fn start_hour(&self) -> u32 {
        self.start_hour
    }

    pub fn max_hour(&self) -> u32 {
        self.max_hour
    }

    /// Buckets of the current pass, oldest first, ending at 0
    pub fn buckets(&self) -> impl Iterator<Item = u32> {
        (0..=self.start_hour).rev()
    }

    /// Recompute `start_hour` from the pass that just finished
    pub fn advance(&mut self, discoveries: &[Discovery]) -> u32 {
        self.start_hour = next_window(
            self.start_hour,
            self.max_hour,
            self.burst_threshold,
            discoveries,
        );
        self.start_hour
    }
}
