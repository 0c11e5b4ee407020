use indicatif::{ProgressBar, ProgressStyle};

/// Observer for reporting incremental progress while sampling permutations.
///
/// Purely cosmetic: observers never influence the estimate. In parallel runs
/// the callbacks arrive from rayon worker threads, one at a time.
pub trait SamplingProgress: Send {
    fn on_start(&mut self, total_permutations: u64) {
        let _ = total_permutations;
    }
    /// Called with the cumulative number of completed permutations.
    fn on_advance(&mut self, completed_permutations: u64) {
        let _ = completed_permutations;
    }
    fn on_finish(&mut self) {}
}

#[derive(Default)]
pub struct NoopProgress;

impl SamplingProgress for NoopProgress {}

/// Terminal progress bar.
#[derive(Default)]
pub struct BarProgress {
    bar: Option<ProgressBar>,
}

impl BarProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SamplingProgress for BarProgress {
    fn on_start(&mut self, total_permutations: u64) {
        let bar = ProgressBar::new(total_permutations);
        if let Ok(style) = ProgressStyle::with_template(
            ">  - Permutations [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
        ) {
            bar.set_style(style.progress_chars("█▉▊▋▌▍▎▏ "));
        }
        self.bar = Some(bar);
    }

    fn on_advance(&mut self, completed_permutations: u64) {
        if let Some(bar) = &self.bar {
            bar.set_position(completed_permutations);
        }
    }

    fn on_finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}
