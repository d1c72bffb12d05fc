use std::ops::Deref;

use super::{impl_seeded_registration, ObserverOptions, ReplayConfig, Subject, SubjectConfig};
use crate::scheduler::SchedulerRef;

/// A subject that replays its last `buffer_size` values, oldest first, to
/// every new observer before any live value.
#[derive(Clone)]
pub struct ReplaySubject<T> {
  pub(crate) subject: Subject<T>,
}

#[cfg(feature = "tokio-scheduler")]
impl<T: Clone + 'static> ReplaySubject<T> {
  pub fn new(buffer_size: usize) -> Self {
    Self::with_scheduler(buffer_size, SubjectConfig::default(), crate::scheduler::default_scheduler())
  }
}

impl<T: Clone + 'static> ReplaySubject<T> {
  /// `config.replay` is overridden: replay is always on with `buffer_size`.
  pub fn with_scheduler(buffer_size: usize, mut config: SubjectConfig<T>, scheduler: SchedulerRef) -> Self {
    config.replay = ReplayConfig { enabled: true, buffer_size };
    Self { subject: Subject::with_scheduler(config, scheduler) }
  }

  /// The retained history, oldest first.
  pub fn buffer(&self) -> Vec<T> { self.subject.replay_buffer() }

  fn seed(&self, options: ObserverOptions<T>) -> (ObserverOptions<T>, Vec<T>) { (options.replay(), Vec::new()) }

  impl_seeded_registration!(seed);
}

impl<T> Deref for ReplaySubject<T> {
  type Target = Subject<T>;

  fn deref(&self) -> &Subject<T> { &self.subject }
}

#[cfg(test)]
mod tests {
  use std::{cell::RefCell, rc::Rc};

  use super::*;
  use crate::scheduler::TestScheduler;

  fn replay(size: usize) -> ReplaySubject<&'static str> {
    TestScheduler::init();
    ReplaySubject::with_scheduler(size, SubjectConfig::default(), Rc::new(TestScheduler))
  }

  #[rxnotify_macro::test]
  fn buffer_keeps_the_last_values() {
    let subject = replay(2);
    for v in ["a", "b", "c"] {
      subject.notify_sync(v).unwrap();
    }
    assert_eq!(subject.buffer(), vec!["b", "c"]);
  }

  #[rxnotify_macro::test]
  fn every_observer_gets_the_history() {
    let subject = replay(3);
    subject.notify_sync("a").unwrap();
    subject.notify_sync("b").unwrap();

    let seen = Rc::new(RefCell::new(vec![]));
    let s = seen.clone();
    // replay is forced even without asking for it
    subject
      .add_observer(move |v: &'static str| s.borrow_mut().push(v), ObserverOptions::new())
      .unwrap();
    TestScheduler::flush();
    subject.notify_sync("c").unwrap();
    assert_eq!(*seen.borrow(), vec!["a", "b", "c"]);
  }

  #[rxnotify_macro::test]
  fn dispose_clears_history() {
    let subject = replay(3);
    subject.notify_sync("a").unwrap();
    subject.dispose();
    assert!(subject.buffer().is_empty());
  }
}
