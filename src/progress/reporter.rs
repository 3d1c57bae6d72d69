//! Progress reporter implementation
//!
//! Uses indicatif for a file-count bar, a byte counter and a status line
//! while a batch run walks its input directory.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Progress reporter for batch runs
pub struct ProgressReporter {
    /// Multi-progress container
    multi: MultiProgress,
    /// File count progress bar
    files_bar: ProgressBar,
    /// Current status message
    status: ProgressBar,
    /// Start time
    start_time: Instant,
    /// Total files to process
    total_files: AtomicU64,
    /// Files finished successfully
    files_done: AtomicU64,
    /// Files that failed
    files_failed: AtomicU64,
    /// Input bytes consumed
    bytes_processed: AtomicU64,
}

impl ProgressReporter {
    /// Create a new progress reporter drawing to stderr
    pub fn new() -> Self {
        let multi = MultiProgress::new();

        let status = multi.add(ProgressBar::new_spinner());
        status.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );

        let files_bar = multi.add(ProgressBar::new(0));
        files_bar.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} files ({percent}%, ETA {eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        files_bar.set_prefix("Files");

        Self {
            multi,
            files_bar,
            status,
            start_time: Instant::now(),
            total_files: AtomicU64::new(0),
            files_done: AtomicU64::new(0),
            files_failed: AtomicU64::new(0),
            bytes_processed: AtomicU64::new(0),
        }
    }

    /// Create a hidden progress reporter (for quiet mode)
    pub fn disabled() -> Self {
        let reporter = Self::new();
        reporter.multi.set_draw_target(ProgressDrawTarget::hidden());
        reporter
    }

    /// Set total files to process
    pub fn set_total_files(&self, total: u64) {
        self.total_files.store(total, Ordering::Relaxed);
        self.files_bar.set_length(total);
    }

    /// Record a finished file
    pub fn file_done(&self, bytes: u64) {
        self.files_done.fetch_add(1, Ordering::Relaxed);
        self.bytes_processed.fetch_add(bytes, Ordering::Relaxed);
        self.files_bar.inc(1);
    }

    /// Record a failed file
    pub fn file_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
        self.files_bar.inc(1);
    }

    /// Set current status message
    pub fn set_status(&self, msg: &str) {
        self.status.set_message(msg.to_string());
    }

    /// Show the file currently being processed
    pub fn set_current_file(&self, path: &str) {
        let display = if path.chars().count() > 60 {
            let tail: String = path.chars().rev().take(57).collect::<Vec<_>>().into_iter().rev().collect();
            format!("...{}", tail)
        } else {
            path.to_string()
        };
        self.status.set_message(display);
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Finish progress with success message
    pub fn finish_success(&self, message: &str) {
        self.status.finish_with_message(format!("✓ {}", message));
        self.files_bar.finish();
    }

    /// Finish progress with error message
    pub fn finish_error(&self, message: &str) {
        self.status.finish_with_message(format!("✗ {}", message));
        self.files_bar.abandon();
    }

    /// Get progress summary
    pub fn summary(&self) -> ProgressSummary {
        ProgressSummary {
            total_files: self.total_files.load(Ordering::Relaxed),
            files_done: self.files_done.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            bytes_processed: self.bytes_processed.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress summary
#[derive(Debug, Clone)]
pub struct ProgressSummary {
    /// Total files found
    pub total_files: u64,
    /// Files finished successfully
    pub files_done: u64,
    /// Files that failed
    pub files_failed: u64,
    /// Input bytes consumed
    pub bytes_processed: u64,
    /// Elapsed time
    pub elapsed: Duration,
}

impl ProgressSummary {
    /// Get completion percentage
    pub fn percentage(&self) -> f64 {
        if self.total_files == 0 {
            0.0
        } else {
            ((self.files_done + self.files_failed) as f64 / self.total_files as f64) * 100.0
        }
    }

    /// Get throughput in bytes/second
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes_processed as f64 / secs
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_reporter() {
        let reporter = ProgressReporter::disabled();
        reporter.set_total_files(4);

        reporter.file_done(500);
        reporter.file_failed();

        let summary = reporter.summary();
        assert_eq!(summary.files_done, 1);
        assert_eq!(summary.files_failed, 1);
        assert_eq!(summary.bytes_processed, 500);
        assert_eq!(summary.percentage(), 50.0);
        assert!(summary.elapsed <= reporter.elapsed());
    }

    #[test]
    fn test_summary_throughput() {
        let summary = ProgressSummary {
            total_files: 2,
            files_done: 2,
            files_failed: 0,
            bytes_processed: 4096,
            elapsed: Duration::from_secs(2),
        };
        assert_eq!(summary.throughput(), 2048.0);
        assert_eq!(summary.percentage(), 100.0);

        let idle = ProgressSummary {
            elapsed: Duration::ZERO,
            ..summary
        };
        assert_eq!(idle.throughput(), 0.0);
    }

    #[test]
    fn test_long_paths_are_truncated() {
        let reporter = ProgressReporter::disabled();
        reporter.set_current_file(&"dir/".repeat(40));
        reporter.set_current_file("short.txt");
        reporter.finish_success("done");
    }
}
