//! Progress reporting for long scans in the `fpstore` binary.
//!
//! Bars draw on stderr so the scan output on stdout stays pipeable. In
//! log-only mode the bars are hidden and progress goes to the log instead,
//! every `interval` rows.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::info;

/// Global flag for log-only mode (set from args in main)
pub static LOG_ONLY: AtomicBool = AtomicBool::new(false);

pub fn set_log_only(value: bool) {
    LOG_ONLY.store(value, Ordering::Relaxed);
}

pub fn is_log_only() -> bool {
    LOG_ONLY.load(Ordering::Relaxed)
}

/// Format duration in human-readable format
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.1}m", secs / 60.0)
    }
}

/// Bar over `total` rows of a table scan.
pub fn scan_bar(total: u64, table: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if is_log_only() {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    } else {
        pb.set_draw_target(ProgressDrawTarget::stderr());
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} rows ({per_sec})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
    }
    pb.set_message(format!("Scanning {}", table));
    pb
}

/// Logs scan progress when bars are hidden. A `total` of 0 means the row
/// count is unknown, and only the running count is logged.
pub fn log_rows(table: &str, done: u64, total: u64, interval: u64) {
    if !is_log_only() || interval == 0 {
        return;
    }
    if let Some(line) = progress_line(done, total, interval) {
        info!(table, done, "{}", line);
    }
}

fn progress_line(done: u64, total: u64, interval: u64) -> Option<String> {
    if total == 0 {
        return (done % interval == 0).then(|| format!("scanned {} rows", done));
    }
    if done % interval == 0 || done == total {
        let pct = 100.0 * done as f64 / total as f64;
        return Some(format!("scan {:.1}% ({}/{})", pct, done, total));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(2_500)), "2.5s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1.5m");
    }

    #[test]
    fn test_progress_line_with_unknown_total() {
        assert_eq!(progress_line(100, 0, 100).as_deref(), Some("scanned 100 rows"));
        assert_eq!(progress_line(150, 0, 100), None);
        assert!(!progress_line(200, 0, 100).unwrap().contains('%'));
    }

    #[test]
    fn test_progress_line_with_known_total() {
        assert_eq!(progress_line(50, 200, 50).as_deref(), Some("scan 25.0% (50/200)"));
        assert_eq!(progress_line(7, 7, 50).as_deref(), Some("scan 100.0% (7/7)"));
        assert_eq!(progress_line(3, 7, 50), None);
    }

    #[test]
    fn test_scan_bar_tracks_rows() {
        let pb = scan_bar(10, "fingerprints");
        pb.inc(4);
        assert_eq!(pb.position(), 4);
        assert_eq!(pb.length(), Some(10));
    }
}
