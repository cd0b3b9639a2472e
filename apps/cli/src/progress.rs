//! Terminal progress bars for uploads and downloads.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use cloudsh_transfer::{ProgressCallback, SpeedCalculator};
use indicatif::{HumanBytes, HumanDuration, ProgressBar, ProgressStyle};

const BAR_TEMPLATE: &str =
    "{spinner:.blue} {prefix} [{elapsed_precise}] {wide_bar:.cyan/blue} {bytes}/{total_bytes} {msg}";

const TICK: &str = "⠁⠂⠄⡀⢀⠠⠐⠈ ";

const BAR_CHARS: &str = "█▓▒░  ";

fn bar_style() -> ProgressStyle {
    match ProgressStyle::with_template(BAR_TEMPLATE) {
        Ok(style) => style.tick_chars(TICK).progress_chars(BAR_CHARS),
        Err(_) => ProgressStyle::default_bar(),
    }
}

/// A progress bar on stderr, fed by the engine's `(done, total)` reports.
///
/// Speed and ETA come from a sliding window over the reported deltas, so
/// bytes already present before a resume never count as throughput.
pub struct ProgressLine {
    bar: ProgressBar,
    speed: SpeedCalculator,
    last_done: AtomicU64,
}

impl ProgressLine {
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Self::with_bar(label, ProgressBar::no_length())
    }

    fn with_bar(label: impl Into<String>, bar: ProgressBar) -> Arc<Self> {
        bar.set_style(bar_style());
        bar.set_prefix(label.into());
        Arc::new(Self {
            bar,
            speed: SpeedCalculator::default(),
            last_done: AtomicU64::new(0),
        })
    }

    /// Callback to hand to the transfer engine.
    pub fn callback(self: &Arc<Self>) -> ProgressCallback {
        let line = Arc::clone(self);
        Arc::new(move |done, total| line.update(done, total))
    }

    /// The first report seeds the baseline. A total of 0 leaves the bar
    /// without a length.
    fn update(&self, done: u64, total: u64) {
        let previous = self.last_done.swap(done, Ordering::Relaxed);
        if previous > 0 {
            self.speed.add_sample(done.saturating_sub(previous));
        }

        if total > 0 {
            self.bar.set_length(total);
        }
        self.bar.set_position(done);

        let remaining = (total > 0).then(|| total.saturating_sub(done));
        let eta = remaining.and_then(|r| self.speed.eta(r));
        self.bar.set_message(rate_message(self.speed.bytes_per_second(), eta));
    }

    pub fn finish(&self) {
        self.bar.finish();
    }
}

fn rate_message(speed: f64, eta: Option<Duration>) -> String {
    if speed <= 0.0 {
        return String::new();
    }
    let rate = HumanBytes(speed as u64);
    match eta {
        Some(eta) if !eta.is_zero() => format!("({rate}/s, {})", HumanDuration(eta)),
        _ => format!("({rate}/s)"),
    }
}
