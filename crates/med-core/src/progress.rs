//! Terminal progress reporting for training loops.

use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar whose length tracks the `total` of the latest update.
///
/// The bar is drawn with `#` fill and a `>` head at a fixed character width.
/// It hides itself automatically when stderr is not a terminal.
pub struct ProgressReporter {
    width: usize,
    bar: Option<ProgressBar>,
}

impl ProgressReporter {
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
            bar: None,
        }
    }

    /// Template used for the bar at this width
    pub fn template(&self) -> String {
        format!("{{msg}} [{{bar:{}.cyan/blue}}] {{percent:>3}}%", self.width)
    }

    /// Moves the bar to `current` of `total`, replacing its message.
    pub fn update(&mut self, current: u64, total: u64, message: impl Into<String>) {
        let bar = self.bar_for(total);
        bar.set_position(current.min(total));
        bar.set_message(message.into());
        if current >= total {
            bar.finish();
            self.bar = None;
        }
    }

    /// Clears any unfinished bar.
    pub fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish();
        }
    }

    fn bar_for(&mut self, total: u64) -> &ProgressBar {
        let stale = self
            .bar
            .as_ref()
            .map(|bar| bar.length() != Some(total))
            .unwrap_or(true);

        if stale {
            if let Some(old) = self.bar.take() {
                old.finish_and_clear();
            }
            let style = ProgressStyle::default_bar()
                .template(&self.template())
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#> ");
            let bar = ProgressBar::new(total);
            bar.set_style(style);
            self.bar = Some(bar);
        }

        self.bar.get_or_insert_with(|| ProgressBar::new(total))
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_uses_width() {
        let reporter = ProgressReporter::new(50);
        assert!(reporter.template().contains("{bar:50.cyan/blue}"));
    }

    #[test]
    fn test_zero_width_is_clamped() {
        let reporter = ProgressReporter::new(0);
        assert!(reporter.template().contains("{bar:1."));
    }

    #[test]
    fn test_bar_is_released_when_complete() {
        let mut reporter = ProgressReporter::new(10);
        reporter.update(1, 3, "Epoch 1/1, Batch 1/3");
        assert!(reporter.bar.is_some());
        reporter.update(3, 3, "Epoch 1/1, Batch 3/3");
        assert!(reporter.bar.is_none());
    }

    #[test]
    fn test_new_total_replaces_bar() {
        let mut reporter = ProgressReporter::new(10);
        reporter.update(1, 4, "a");
        reporter.update(1, 8, "b");
        assert_eq!(reporter.bar.as_ref().and_then(|b| b.length()), Some(8));
    }
}
