use std::{
  cell::{Cell, RefCell},
  collections::VecDeque,
  rc::Rc,
  time::Duration,
};

use smallvec::SmallVec;

use super::config::ObserverOptions;
use crate::{id::ObserverId, observer::ObserverRef, scheduler::TaskHandle};

/// Per-observer activity, in scheduler time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverActivity {
  pub execution_count: u64,
  pub registered_at: Duration,
  pub last_executed: Option<Duration>,
}

/// A debounced value waiting for its timer.
pub(crate) struct PendingDebounce<T> {
  pub(crate) handle: TaskHandle,
  pub(crate) value: T,
}

/// Mutable per-subscriber dispatch state.
pub(crate) struct SubscriberState<T> {
  pub(crate) debounce: Option<PendingDebounce<T>>,
  pub(crate) last_fired: Option<Duration>,
  pub(crate) buffer: VecDeque<T>,
  /// Replay values not yet delivered; drained before any live value.
  pub(crate) pending_replay: Option<VecDeque<T>>,
  pub(crate) execution_count: u64,
  pub(crate) created_at: Duration,
  pub(crate) last_executed: Option<Duration>,
}

/// One registered observer plus its dispatch configuration.
///
/// Owned by its subject's [`Registry`]; dispatch rounds hold extra `Rc`s to
/// it in their snapshot, so a removal during a round never invalidates the
/// iteration.
pub(crate) struct Subscriber<T> {
  pub(crate) id: ObserverId,
  pub(crate) target: ObserverRef<T>,
  /// Allocation address for shared observers, used by `remove_observer`.
  pub(crate) identity: Option<usize>,
  pub(crate) options: ObserverOptions<T>,
  active: Cell<bool>,
  pub(crate) state: RefCell<SubscriberState<T>>,
}

impl<T> Subscriber<T> {
  pub(crate) fn new(
    target: ObserverRef<T>, identity: Option<usize>, options: ObserverOptions<T>, now: Duration,
  ) -> Self {
    Self {
      id: ObserverId::next(),
      target,
      identity,
      options,
      active: Cell::new(true),
      state: RefCell::new(SubscriberState {
        debounce: None,
        last_fired: None,
        buffer: VecDeque::new(),
        pending_replay: None,
        execution_count: 0,
        created_at: now,
        last_executed: None,
      }),
    }
  }

  #[inline]
  pub(crate) fn is_active(&self) -> bool { self.active.get() }

  /// Soft delete. The record stays valid for rounds that already hold it.
  pub(crate) fn deactivate(&self) {
    self.active.set(false);
    self.cancel_debounce();
  }

  pub(crate) fn cancel_debounce(&self) {
    let pending = self.state.borrow_mut().debounce.take();
    if let Some(pending) = pending {
      pending.handle.cancel();
    }
  }

  /// Take the pending debounced value, cancelling its timer.
  pub(crate) fn take_debounced(&self) -> Option<T> {
    let pending = self.state.borrow_mut().debounce.take()?;
    pending.handle.cancel();
    Some(pending.value)
  }

  pub(crate) fn take_pending_replay(&self) -> Option<VecDeque<T>> {
    self.state.borrow_mut().pending_replay.take()
  }

  pub(crate) fn execution_count(&self) -> u64 { self.state.borrow().execution_count }

  pub(crate) fn activity(&self) -> ObserverActivity {
    let state = self.state.borrow();
    ObserverActivity {
      execution_count: state.execution_count,
      registered_at: state.created_at,
      last_executed: state.last_executed,
    }
  }
}

impl<T: Clone> Subscriber<T> {
  /// Bookkeeping right before the callback runs.
  pub(crate) fn record_execution(&self, now: Duration, value: &T) {
    let mut state = self.state.borrow_mut();
    state.execution_count += 1;
    state.last_executed = Some(now);
    state.last_fired = Some(now);
    if let Some(size) = self.options.buffering {
      if size > 0 {
        if state.buffer.len() == size {
          state.buffer.pop_front();
        }
        state.buffer.push_back(value.clone());
      }
    }
  }

  pub(crate) fn buffered(&self) -> Vec<T> { self.state.borrow().buffer.iter().cloned().collect() }
}

/// Subscribers container with ID-based management.
///
/// Keeps insertion order; priority is only resolved when a dispatch round
/// takes its snapshot.
pub(crate) struct Registry<T> {
  items: SmallVec<[Rc<Subscriber<T>>; 4]>,
}

impl<T> Default for Registry<T> {
  fn default() -> Self { Self { items: SmallVec::new() } }
}

impl<T> Registry<T> {
  #[inline]
  pub(crate) fn add(&mut self, subscriber: Rc<Subscriber<T>>) { self.items.push(subscriber); }

  pub(crate) fn remove(&mut self, id: ObserverId) -> Option<Rc<Subscriber<T>>> {
    self
      .items
      .iter()
      .position(|s| s.id == id)
      .map(|pos| self.items.remove(pos))
  }

  pub(crate) fn find(&self, id: ObserverId) -> Option<&Rc<Subscriber<T>>> {
    self.items.iter().find(|s| s.id == id)
  }

  pub(crate) fn find_by_identity(&self, identity: usize) -> Option<ObserverId> {
    self
      .items
      .iter()
      .find(|s| s.identity == Some(identity))
      .map(|s| s.id)
  }

  #[inline]
  pub(crate) fn contains(&self, id: ObserverId) -> bool { self.find(id).is_some() }

  #[inline]
  pub(crate) fn len(&self) -> usize { self.items.len() }

  pub(crate) fn iter(&self) -> impl Iterator<Item = &Rc<Subscriber<T>>> { self.items.iter() }

  pub(crate) fn drain(&mut self) -> impl Iterator<Item = Rc<Subscriber<T>>> + '_ {
    self.items.drain(..)
  }

  /// Active subscribers ordered by priority, ties by registration order.
  pub(crate) fn snapshot(&self) -> Vec<Rc<Subscriber<T>>> {
    let mut snapshot: Vec<_> = self
      .items
      .iter()
      .filter(|s| s.is_active())
      .cloned()
      .collect();
    // Stable sort keeps insertion order within a priority.
    snapshot.sort_by_key(|s| s.options.priority);
    snapshot
  }

  /// Drop subscribers whose weak referent is gone. Returns how many.
  pub(crate) fn remove_dead(&mut self) -> usize {
    let before = self.items.len();
    self.items.retain(|s| {
      let alive = s.target.is_alive();
      if !alive {
        s.deactivate();
      }
      alive
    });
    before - self.items.len()
  }
}
