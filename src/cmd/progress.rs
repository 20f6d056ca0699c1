//! Progress bar and spinner utilities for CLI operations

use crate::engine::{Progress, ProgressSink};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Create a spinner for indeterminate operations
pub fn create_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

/// Create a progress bar for determinate operations
pub fn create_progress_bar(total: u64, message: &str) -> ProgressBar {
    let bar = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.cyan} {msg} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%)")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓▒░ ");
    bar.set_style(style);
    bar.set_message(message.to_string());
    bar
}

pub fn finish_spinner_success(spinner: &ProgressBar, message: &str) {
    finish_with_prefix(spinner, "{prefix:.green} {msg}", "✓", message);
}

pub fn finish_spinner_error(spinner: &ProgressBar, message: &str) {
    finish_with_prefix(spinner, "{prefix:.red} {msg}", "✗", message);
}

fn finish_with_prefix(bar: &ProgressBar, template: &str, prefix: &'static str, message: &str) {
    bar.set_style(
        ProgressStyle::default_spinner()
            .template(template)
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_prefix(prefix);
    bar.finish_with_message(message.to_string());
}

/// Batch progress on a terminal bar
pub struct BatchProgressBar {
    bar: ProgressBar,
}

impl BatchProgressBar {
    pub fn new(total: usize, message: &str) -> Self {
        Self {
            bar: create_progress_bar(total as u64, message),
        }
    }

    pub fn finish(&self, failed: usize) {
        let message = format!("{} processed", self.bar.position());
        if failed == 0 {
            finish_spinner_success(&self.bar, &message);
        } else {
            finish_spinner_error(&self.bar, &format!("{}, {} failed", message, failed));
        }
    }
}

impl ProgressSink for BatchProgressBar {
    fn on_progress(&self, progress: &Progress) {
        self.bar.set_position(progress.processed as u64);
        self.bar
            .set_message(format!("Batch {}/{}", progress.batch, progress.batch_count));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_spinner() {
        let spinner = create_spinner("Testing...");
        assert!(!spinner.is_finished());
        finish_spinner_success(&spinner, "Done");
        assert!(spinner.is_finished());
    }

    #[test]
    fn test_batch_progress_tracks_processed_count() {
        let sink = BatchProgressBar::new(47, "Processing");
        sink.on_progress(&Progress {
            processed: 20,
            total: 47,
            percent: 42.6,
            batch: 1,
            batch_count: 3,
        });
        assert_eq!(sink.bar.position(), 20);
        assert_eq!(sink.bar.length(), Some(47));
        sink.finish(0);
        assert!(sink.bar.is_finished());
    }
}
