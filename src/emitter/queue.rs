use std::{collections::VecDeque, time::Duration};

use crate::{id::EventId, subject::Priority};

/// An event held back while its emitter is paused.
#[derive(Debug, Clone)]
pub struct QueuedEvent<P> {
  pub id: EventId,
  pub event: String,
  pub payload: P,
  pub priority: Priority,
  /// Scheduler time at which the event was queued.
  pub enqueued_at: Duration,
}

impl<P> QueuedEvent<P> {
  /// Global drain order: priority, then age, then id.
  pub(crate) fn order_key(&self) -> (Priority, Duration, EventId) { (self.priority, self.enqueued_at, self.id) }
}

/// Bounded per-key queue ordered by priority, FIFO within a priority.
pub(crate) struct EventQueue<P> {
  capacity: usize,
  items: VecDeque<QueuedEvent<P>>,
}

impl<P> EventQueue<P> {
  pub(crate) fn new(capacity: usize) -> Self { Self { capacity, items: VecDeque::new() } }

  /// Hands the event back when the queue is full.
  pub(crate) fn push(&mut self, item: QueuedEvent<P>) -> Result<(), QueuedEvent<P>> {
    if self.items.len() >= self.capacity {
      return Err(item);
    }
    let pos = self
      .items
      .iter()
      .position(|queued| queued.priority > item.priority)
      .unwrap_or(self.items.len());
    self.items.insert(pos, item);
    Ok(())
  }

  #[inline]
  pub(crate) fn len(&self) -> usize { self.items.len() }

  pub(crate) fn capacity(&self) -> usize { self.capacity }

  pub(crate) fn take_all(&mut self) -> Vec<QueuedEvent<P>> { self.items.drain(..).collect() }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn event(payload: u32, priority: Priority) -> QueuedEvent<u32> {
    QueuedEvent { id: EventId::next(), event: "tick".into(), payload, priority, enqueued_at: Duration::ZERO }
  }

  #[rxnotify_macro::test]
  fn orders_by_priority_then_arrival() {
    let mut queue = EventQueue::new(10);
    for (payload, priority) in [(1, Priority::Low), (2, Priority::Normal), (3, Priority::High), (4, Priority::Normal)] {
      queue.push(event(payload, priority)).unwrap();
    }
    let order: Vec<_> = queue.take_all().into_iter().map(|q| q.payload).collect();
    assert_eq!(order, vec![3, 2, 4, 1]);
    assert_eq!(queue.len(), 0);
  }

  #[rxnotify_macro::test]
  fn rejects_when_full() {
    let mut queue = EventQueue::new(1);
    queue.push(event(1, Priority::Normal)).unwrap();
    let rejected = queue.push(event(2, Priority::High)).unwrap_err();
    assert_eq!(rejected.payload, 2);
    assert_eq!(queue.len(), 1);
  }
}
