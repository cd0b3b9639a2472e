use std::io;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, ready};
use std::time::{Duration, Instant};

use tokio::io::AsyncWrite;

/// Observer invoked with `(bytes_done, bytes_total)`.
///
/// `bytes_total` is 0 when the total is not known.
pub type ProgressCallback = std::sync::Arc<dyn Fn(u64, u64) + Send + Sync>;

pub(crate) fn notify(progress: Option<&ProgressCallback>, done: u64, total: u64) {
    if let Some(cb) = progress {
        cb(done, total);
    }
}

// ---------------------------------------------------------------------------
// ProgressRelay
// ---------------------------------------------------------------------------

/// Byte-counting writer that reports every successful write.
///
/// The counter starts at `offset`, so a resumed download reports its real
/// position rather than counting from zero.
pub struct ProgressRelay<W> {
    inner: W,
    written: u64,
    total: u64,
    callback: Option<ProgressCallback>,
}

impl<W> ProgressRelay<W> {
    pub fn new(inner: W, offset: u64, total: u64, callback: Option<ProgressCallback>) -> Self {
        Self {
            inner,
            written: offset,
            total,
            callback,
        }
    }

    /// Bytes counted so far, including the starting offset.
    pub fn position(&self) -> u64 {
        self.written
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ProgressRelay<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let n = ready!(Pin::new(&mut this.inner).poll_write(cx, buf))?;
        if n > 0 {
            this.written += n as u64;
            notify(this.callback.as_ref(), this.written, this.total);
        }
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(100),
                window_size: window_size.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SpeedInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records `bytes` transferred since the previous sample.
    pub fn add_sample(&self, bytes: u64) {
        self.add_sample_at(bytes, Instant::now());
    }

    fn add_sample_at(&self, bytes: u64, now: Instant) {
        let mut s = self.lock();
        s.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        if let Some(cutoff) = now.checked_sub(s.window_size) {
            s.samples.retain(|sample| sample.timestamp >= cutoff);
        }

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Average speed in bytes/second within the window; 0.0 with fewer than
    /// two samples.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.lock();
        let (Some(first), Some(last)) = (s.samples.first(), s.samples.last()) else {
            return 0.0;
        };
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if s.samples.len() < 2 || elapsed.is_zero() {
            return 0.0;
        }

        // The first sample marks the window start; its bytes predate it.
        let total_bytes: u64 = s.samples.iter().skip(1).map(|sample| sample.bytes).sum();
        total_bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to move `remaining_bytes`, or `None` with no speed yet.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    pub fn reset(&self) {
        self.lock().samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::io::AsyncWriteExt;

    use super::*;

    fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<(u64, u64)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let cb: ProgressCallback = Arc::new(move |done, total| s.lock().unwrap().push((done, total)));
        (cb, seen)
    }

    #[tokio::test]
    async fn relay_counts_from_offset() {
        let (cb, seen) = recorder();
        let mut relay = ProgressRelay::new(Vec::new(), 1000, 2000, Some(cb));

        relay.write_all(&[1u8; 600]).await.unwrap();
        relay.write_all(&[2u8; 400]).await.unwrap();
        relay.flush().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.first(), Some(&(1600, 2000)));
        assert_eq!(seen.last(), Some(&(2000, 2000)));
        assert_eq!(relay.position(), 2000);
        assert_eq!(relay.into_inner().len(), 1000);
    }

    #[tokio::test]
    async fn relay_without_callback_still_counts() {
        let mut relay = ProgressRelay::new(Vec::new(), 0, 0, None);
        relay.write_all(b"hello").await.unwrap();
        assert_eq!(relay.position(), 5);
    }

    #[test]
    fn speed_calculator_no_samples() {
        let calc = SpeedCalculator::default();
        assert_eq!(calc.bytes_per_second(), 0.0);
        assert!(calc.eta(1000).is_none());
    }

    #[test]
    fn speed_calculator_single_sample() {
        let calc = SpeedCalculator::default();
        calc.add_sample(100);
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn speed_calculator_exact_rate() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(10)), None);
        let start = Instant::now();
        calc.add_sample_at(0, start);
        calc.add_sample_at(500, start + Duration::from_millis(500));
        calc.add_sample_at(500, start + Duration::from_secs(1));

        assert!((calc.bytes_per_second() - 1000.0).abs() < 1e-6);
        let eta = calc.eta(3000).unwrap();
        assert!((eta.as_secs_f64() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn speed_calculator_drops_old_samples() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(1)), None);
        let start = Instant::now();
        calc.add_sample_at(1_000_000, start);
        calc.add_sample_at(10, start + Duration::from_secs(5));
        assert_eq!(calc.lock().samples.len(), 1);
    }

    #[test]
    fn speed_calculator_reset() {
        let calc = SpeedCalculator::default();
        calc.add_sample(100);
        calc.add_sample(200);
        calc.reset();
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn speed_calculator_max_samples() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(60)), Some(5));
        for i in 0..20 {
            calc.add_sample(i * 10);
        }
        assert!(calc.lock().samples.len() <= 5);
    }
}
