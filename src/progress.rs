use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar for a synchronous run. Only successful tables move the bar.
pub struct OptimizationProgress {
    bar: ProgressBar,
}

impl OptimizationProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} tables | {msg}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        Self { bar }
    }

    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    pub fn start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
    }

    pub fn record(&self, table: &str, success: bool) {
        if success {
            self.bar.inc(1);
        }
        self.bar.set_message(table.to_string());
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn length(&self) -> Option<u64> {
        self.bar.length()
    }
}

impl Default for OptimizationProgress {
    fn default() -> Self {
        Self::new()
    }
}
