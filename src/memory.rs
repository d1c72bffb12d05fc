//! Periodic reclamation of dead observers and idle subjects.
//!
//! The manager only holds weak handles, so tracking never extends the
//! lifetime of a subject or observer. A sweep:
//!
//! - forgets handles whose referent is gone,
//! - drops dead weak observers from every live subject,
//! - disposes subjects that are completed or have no observers and have been
//!   idle longer than the inactivity threshold.
//!
//! Byte figures in [`GcReport`] are estimates derived from the sizes of the
//! stored records; exact heap accounting is not available.

use std::{
  any::Any,
  cell::RefCell,
  mem,
  rc::{Rc, Weak},
  time::Duration,
};

use tracing::debug;

use crate::{
  id::SubjectId,
  scheduler::{SchedulerRef, TaskHandle},
  subject::{Lifecycle, Subject, SubjectInner},
};

/// Idle time after which an unobserved or completed subject is disposed.
pub const INACTIVITY_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// What the manager needs to know about a subject, independent of its
/// value type.
pub(crate) trait Trackable {
  fn lifecycle(&self) -> Lifecycle;
  fn observer_count(&self) -> usize;
  fn idle_for(&self) -> Duration;
  fn collect_dead_observers(&self) -> usize;
  fn estimated_bytes(&self) -> usize;
  fn dispose(&self) -> bool;
}

impl<T> Trackable for SubjectInner<T> {
  fn lifecycle(&self) -> Lifecycle { SubjectInner::lifecycle(self) }

  fn observer_count(&self) -> usize { SubjectInner::observer_count(self) }

  fn idle_for(&self) -> Duration { SubjectInner::idle_for(self) }

  fn collect_dead_observers(&self) -> usize { SubjectInner::collect_dead_observers(self) }

  fn estimated_bytes(&self) -> usize { self.memory_usage().estimated_bytes }

  fn dispose(&self) -> bool { SubjectInner::dispose(self) }
}

enum Tracked {
  Subject { id: SubjectId, handle: Weak<dyn Trackable> },
  Observer(Weak<dyn Any>),
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
  /// Tracking records dropped (referent gone, or subject disposed).
  pub released_handles: usize,
  /// Dead weak observers removed from live subjects.
  pub dead_observers: usize,
  pub disposed_subjects: usize,
  /// Approximation, see the module docs.
  pub estimated_freed_bytes: usize,
}

struct ManagerState {
  tracked: Vec<Tracked>,
  timer: Option<TaskHandle>,
}

struct ManagerInner {
  scheduler: SchedulerRef,
  threshold: Duration,
  state: RefCell<ManagerState>,
}

/// Tracks subjects and observers weakly and sweeps them on demand or on a
/// timer.
#[derive(Clone)]
pub struct MemoryManager {
  inner: Rc<ManagerInner>,
}

impl MemoryManager {
  pub fn new(scheduler: SchedulerRef) -> Self { Self::with_threshold(scheduler, INACTIVITY_THRESHOLD) }

  pub fn with_threshold(scheduler: SchedulerRef, threshold: Duration) -> Self {
    Self {
      inner: Rc::new(ManagerInner {
        scheduler,
        threshold,
        state: RefCell::new(ManagerState { tracked: Vec::new(), timer: None }),
      }),
    }
  }

  pub fn track<T: 'static>(&self, subject: &Subject<T>) -> SubjectId {
    let id = subject.id();
    let handle = Rc::downgrade(&subject.inner) as Weak<dyn Trackable>;
    self.inner.state.borrow_mut().tracked.push(Tracked::Subject { id, handle });
    id
  }

  /// Track an observer so sweeps report when it has been dropped.
  pub fn track_observer<O: 'static>(&self, observer: &Rc<O>) {
    let handle = Rc::downgrade(observer) as Weak<dyn Any>;
    self.inner.state.borrow_mut().tracked.push(Tracked::Observer(handle));
  }

  pub fn untrack(&self, id: SubjectId) -> bool {
    let mut state = self.inner.state.borrow_mut();
    let before = state.tracked.len();
    state.tracked.retain(|t| !matches!(t, Tracked::Subject { id: tracked, .. } if *tracked == id));
    state.tracked.len() != before
  }

  pub fn tracked_count(&self) -> usize { self.inner.state.borrow().tracked.len() }

  /// Sweep every `interval` until [`stop`](Self::stop). Restarts the timer
  /// if it is already running.
  pub fn start(&self, interval: Duration) {
    self.stop();
    arm(&self.inner, interval);
    debug!(?interval, "memory manager started");
  }

  pub fn stop(&self) {
    if let Some(timer) = self.inner.state.borrow_mut().timer.take() {
      timer.cancel();
    }
  }

  pub fn is_running(&self) -> bool { self.inner.state.borrow().timer.is_some() }

  pub fn run_garbage_collection(&self) -> GcReport { sweep(&self.inner) }
}

impl Drop for ManagerInner {
  fn drop(&mut self) {
    if let Some(timer) = self.state.get_mut().timer.take() {
      timer.cancel();
    }
  }
}

fn arm(inner: &Rc<ManagerInner>, interval: Duration) {
  let weak = Rc::downgrade(inner);
  let timer = inner.scheduler.schedule(
    Some(interval),
    Box::new(move || {
      let Some(inner) = weak.upgrade() else { return };
      sweep(&inner);
      arm(&inner, interval);
    }),
  );
  inner.state.borrow_mut().timer = Some(timer);
}

fn sweep(inner: &ManagerInner) -> GcReport {
  let tracked = mem::take(&mut inner.state.borrow_mut().tracked);
  let mut report = GcReport::default();
  let mut kept = Vec::with_capacity(tracked.len());

  for entry in tracked {
    match entry {
      Tracked::Observer(handle) => {
        if handle.strong_count() == 0 {
          report.released_handles += 1;
        } else {
          kept.push(Tracked::Observer(handle));
        }
      }
      Tracked::Subject { id, handle } => {
        let Some(subject) = handle.upgrade() else {
          report.released_handles += 1;
          continue;
        };
        if subject.lifecycle() == Lifecycle::Disposed {
          report.released_handles += 1;
          continue;
        }

        let before = subject.estimated_bytes();
        report.dead_observers += subject.collect_dead_observers();
        report.estimated_freed_bytes += before.saturating_sub(subject.estimated_bytes());

        let reclaimable = subject.lifecycle() == Lifecycle::Completed || subject.observer_count() == 0;
        if reclaimable && subject.idle_for() > inner.threshold {
          let bytes = subject.estimated_bytes();
          if subject.dispose() {
            debug!(subject = %id, "disposed idle subject");
            report.disposed_subjects += 1;
            report.estimated_freed_bytes += bytes;
          }
          report.released_handles += 1;
        } else {
          kept.push(Tracked::Subject { id, handle });
        }
      }
    }
  }

  // Keep anything tracked while the sweep ran.
  let mut state = inner.state.borrow_mut();
  kept.append(&mut state.tracked);
  state.tracked = kept;
  debug!(?report, tracked = state.tracked.len(), "gc sweep finished");
  report
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    observer::observer_fn,
    scheduler::TestScheduler,
    subject::{ObserverOptions, SubjectConfig},
  };

  fn subject() -> Subject<i32> { Subject::with_scheduler(SubjectConfig::default(), Rc::new(TestScheduler)) }

  fn manager() -> MemoryManager {
    TestScheduler::init();
    MemoryManager::new(Rc::new(TestScheduler))
  }

  #[rxnotify_macro::test]
  fn idle_unobserved_subjects_are_disposed() {
    let manager = manager();
    let idle = subject();
    let busy = subject();
    busy.add_observer(|_: i32| (), ObserverOptions::new()).unwrap();
    manager.track(&idle);
    manager.track(&busy);

    assert_eq!(manager.run_garbage_collection(), GcReport::default());
    TestScheduler::advance_by(INACTIVITY_THRESHOLD + Duration::from_secs(1));

    let report = manager.run_garbage_collection();
    assert_eq!(report.disposed_subjects, 1);
    assert_eq!(report.released_handles, 1);
    assert!(report.estimated_freed_bytes > 0);
    assert!(idle.is_disposed());
    assert!(!busy.is_disposed());
    assert_eq!(manager.tracked_count(), 1);
  }

  #[rxnotify_macro::test]
  fn recent_activity_keeps_a_subject() {
    let manager = manager();
    let subject = subject();
    manager.track(&subject);
    TestScheduler::advance_by(INACTIVITY_THRESHOLD);
    subject.notify_sync(1).unwrap();
    TestScheduler::advance_by(Duration::from_secs(10));
    assert_eq!(manager.run_garbage_collection().disposed_subjects, 0);
    assert!(!subject.is_disposed());
  }

  #[rxnotify_macro::test]
  fn dropped_referents_release_their_handles() {
    let manager = manager();
    let subject = subject();
    let observer = observer_fn(|_: i32| ());
    manager.track(&subject);
    manager.track_observer(&observer);
    assert_eq!(manager.tracked_count(), 2);

    drop(subject);
    drop(observer);
    let report = manager.run_garbage_collection();
    assert_eq!(report.released_handles, 2);
    assert_eq!(manager.tracked_count(), 0);
  }

  #[rxnotify_macro::test]
  fn sweeps_collect_dead_weak_observers() {
    let manager = manager();
    let subject = subject();
    let keep = observer_fn(|_: i32| ());
    let gone = observer_fn(|_: i32| ());
    subject.add_shared_observer(&keep, ObserverOptions::new().weak_reference()).unwrap();
    subject.add_shared_observer(&gone, ObserverOptions::new().weak_reference()).unwrap();
    manager.track(&subject);

    drop(gone);
    let report = manager.run_garbage_collection();
    assert_eq!(report.dead_observers, 1);
    assert_eq!(subject.observer_count(), 1);
  }

  #[rxnotify_macro::test]
  fn the_timer_sweeps_until_stopped() {
    let manager = manager();
    let subject = subject();
    manager.track(&subject);
    manager.start(Duration::from_secs(60));
    assert!(manager.is_running());

    TestScheduler::advance_by(INACTIVITY_THRESHOLD + Duration::from_secs(60));
    assert!(subject.is_disposed());
    assert_eq!(manager.tracked_count(), 0);

    manager.stop();
    assert!(!manager.is_running());
    assert!(manager.untrack(manager.track(&self::subject())));
  }
}
