//! Counters and bounded timing windows for subjects and emitter events.

use std::{
  collections::VecDeque,
  future::Future,
  pin::Pin,
  task::{ready, Context, Poll},
  time::{Duration, Instant},
};

use pin_project_lite::pin_project;

/// Number of timing samples kept per window.
pub const METRICS_WINDOW: usize = 100;

/// The most recent [`METRICS_WINDOW`] duration samples; older ones are
/// trimmed as new ones arrive.
#[derive(Debug, Clone, Default)]
pub struct RollingWindow {
  samples: VecDeque<Duration>,
}

impl RollingWindow {
  pub fn push(&mut self, sample: Duration) {
    if self.samples.len() == METRICS_WINDOW {
      self.samples.pop_front();
    }
    self.samples.push_back(sample);
  }

  #[inline]
  pub fn len(&self) -> usize { self.samples.len() }

  #[inline]
  pub fn is_empty(&self) -> bool { self.samples.is_empty() }

  pub fn average(&self) -> Option<Duration> {
    if self.samples.is_empty() {
      return None;
    }
    let total: Duration = self.samples.iter().sum();
    Some(total / self.samples.len() as u32)
  }

  pub fn max(&self) -> Option<Duration> { self.samples.iter().max().copied() }

  pub fn iter(&self) -> impl Iterator<Item = &Duration> { self.samples.iter() }
}

/// Metrics of one subject or one emitter event key.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
  /// Notifications/emits that reached dispatch.
  pub emit_count: u64,
  /// Individual callback executions.
  pub execution_count: u64,
  /// Executions that settled without error.
  pub success_count: u64,
  /// Failures of any pipeline stage: filter, transform or callback.
  pub error_count: u64,
  pub emit_times: RollingWindow,
  pub execution_times: RollingWindow,
  /// Scheduler time of the last emit.
  pub last_emit_at: Option<Duration>,
}

impl Metrics {
  pub(crate) fn record_emit(&mut self, elapsed: Duration, at: Duration) {
    self.emit_count += 1;
    self.emit_times.push(elapsed);
    self.last_emit_at = Some(at);
  }

  pub(crate) fn record_execution(&mut self, elapsed: Duration) {
    self.execution_count += 1;
    self.execution_times.push(elapsed);
  }

  pub(crate) fn record_success(&mut self) { self.success_count += 1; }

  pub(crate) fn record_error(&mut self) { self.error_count += 1; }

  pub fn average_emit_time(&self) -> Option<Duration> { self.emit_times.average() }

  pub fn average_execution_time(&self) -> Option<Duration> { self.execution_times.average() }
}

pin_project! {
    /// Resolves to the inner output together with the wall time it took,
    /// measured from construction.
    pub(crate) struct Timed<F> {
        #[pin]
        inner: F,
        started: Instant,
    }
}

impl<F> Timed<F> {
  pub(crate) fn new(inner: F) -> Self { Self { inner, started: Instant::now() } }
}

impl<F: Future> Future for Timed<F> {
  type Output = (F::Output, Duration);

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let this = self.project();
    let output = ready!(this.inner.poll(cx));
    Poll::Ready((output, this.started.elapsed()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[rxnotify_macro::test]
  fn window_is_bounded() {
    let mut window = RollingWindow::default();
    for i in 0..150u64 {
      window.push(Duration::from_millis(i));
    }
    assert_eq!(window.len(), METRICS_WINDOW);
    // 50..150 remain
    assert_eq!(window.iter().next(), Some(&Duration::from_millis(50)));
    assert_eq!(window.max(), Some(Duration::from_millis(149)));
  }

  #[rxnotify_macro::test]
  fn averages_and_counts() {
    let mut metrics = Metrics::default();
    assert_eq!(metrics.average_emit_time(), None);
    metrics.record_emit(Duration::from_millis(10), Duration::ZERO);
    metrics.record_emit(Duration::from_millis(30), Duration::from_secs(1));
    metrics.record_execution(Duration::from_millis(1));
    metrics.record_success();
    metrics.record_error();
    metrics.record_error();
    assert_eq!(metrics.emit_count, 2);
    assert_eq!(metrics.average_emit_time(), Some(Duration::from_millis(20)));
    assert_eq!((metrics.execution_count, metrics.success_count, metrics.error_count), (2, 1, 2));
    assert_eq!(metrics.last_emit_at, Some(Duration::from_secs(1)));
  }

  #[rxnotify_macro::test]
  async fn timed_reports_output_and_elapsed() {
    let (out, elapsed) = Timed::new(async { 7 }).await;
    assert_eq!(out, 7);
    assert!(elapsed < Duration::from_secs(1));
  }
}
