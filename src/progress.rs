//! Progress bar utilities for pack operations
//!
//! Progress is drawn with indicatif and hidden unless explicitly requested,
//! so library callers and tests stay silent.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Style presets for progress indicators
pub struct ProgressStyles;

impl ProgressStyles {
    /// Style for file processing (shows count and speed)
    pub fn files() -> ProgressStyle {
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓▒░  ")
    }

    /// Style for indeterminate operations (spinner only)
    pub fn spinner() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "✓"])
    }

    /// Style for a finished bar
    pub fn success() -> ProgressStyle {
        ProgressStyle::with_template("{prefix:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
    }
}

/// Progress reporting for one pack run
#[derive(Debug, Clone)]
pub struct PackProgress {
    bar: ProgressBar,
}

impl PackProgress {
    /// Progress over `total` files, drawn only when `visible`
    pub fn files(total: u64, visible: bool) -> Self {
        let bar = if visible {
            let pb = ProgressBar::new(total);
            pb.set_style(ProgressStyles::files());
            pb
        } else {
            ProgressBar::hidden()
        };
        Self { bar }
    }

    /// Indeterminate progress, drawn only when `visible`
    pub fn spinner(msg: &str, visible: bool) -> Self {
        let bar = if visible {
            let pb = ProgressBar::new_spinner();
            pb.set_style(ProgressStyles::spinner());
            pb.enable_steady_tick(Duration::from_millis(80));
            pb
        } else {
            ProgressBar::hidden()
        };
        bar.set_message(msg.to_string());
        Self { bar }
    }

    /// Hidden progress
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Record one processed file
    pub fn file_done(&self, target: &str) {
        self.bar.set_message(target.to_string());
        self.bar.inc(1);
    }

    /// Record `n` processed files
    pub fn advance(&self, n: u64) {
        self.bar.inc(n);
    }

    /// Update the message
    pub fn set_message(&self, msg: &str) {
        self.bar.set_message(msg.to_string());
    }

    /// Number of files recorded so far
    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    /// Finish with a success message
    pub fn finish(&self, msg: &str) {
        self.bar.set_style(ProgressStyles::success());
        self.bar.set_prefix("✓");
        self.bar.finish_with_message(msg.to_string());
    }

    /// Remove the bar without a message
    pub fn abandon(&self) {
        self.bar.finish_and_clear();
    }
}
