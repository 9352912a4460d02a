//! Spinner shown while the initial build runs.

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::time::Duration;

/// Simple spinner for tasks without known duration.
///
/// Hidden automatically in CI so logs stay readable.
pub struct Spinner {
    pb: ProgressBar,
}

impl Spinner {
    /// Create and start a new spinner.
    pub fn new(message: &str) -> Self {
        let pb = if super::is_ci() {
            ProgressBar::hidden()
        } else {
            ProgressBar::new_spinner()
        };

        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style.tick_strings(&["◐", "◓", "◑", "◒"]));
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));

        Self { pb }
    }

    /// Finish spinner with a green checkmark.
    ///
    /// A hidden spinner (CI, no terminal) prints the message as a status line.
    pub fn finish(&self, message: &str) {
        if self.pb.is_hidden() {
            self.pb.finish_and_clear();
            super::success(message);
            return;
        }
        let mark = if super::colors_enabled() {
            "✓".green().to_string()
        } else {
            "✓".to_string()
        };
        self.pb.finish_with_message(format!("{} {}", mark, message));
    }

    /// Finish spinner with a red X.
    pub fn fail(&self, message: &str) {
        if self.pb.is_hidden() {
            self.pb.finish_and_clear();
            super::error(message);
            return;
        }
        let mark = if super::colors_enabled() {
            "✗".red().to_string()
        } else {
            "✗".to_string()
        };
        self.pb.finish_with_message(format!("{} {}", mark, message));
    }
}
