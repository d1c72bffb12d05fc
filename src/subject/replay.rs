use std::collections::VecDeque;

/// Bounded FIFO history of past values.
///
/// Holds at most `capacity` values; pushing onto a full buffer evicts the
/// oldest one.
#[derive(Debug, Clone)]
pub struct ReplayBuffer<T> {
  capacity: usize,
  values: VecDeque<T>,
}

impl<T> ReplayBuffer<T> {
  pub fn new(capacity: usize) -> Self {
    Self { capacity, values: VecDeque::with_capacity(capacity.min(64)) }
  }

  pub fn push(&mut self, value: T) {
    if self.capacity == 0 {
      return;
    }
    if self.values.len() == self.capacity {
      self.values.pop_front();
    }
    self.values.push_back(value);
  }

  #[inline]
  pub fn capacity(&self) -> usize { self.capacity }

  #[inline]
  pub fn len(&self) -> usize { self.values.len() }

  #[inline]
  pub fn is_empty(&self) -> bool { self.values.is_empty() }

  pub fn clear(&mut self) { self.values.clear() }

  pub fn iter(&self) -> impl Iterator<Item = &T> { self.values.iter() }
}

impl<T: Clone> ReplayBuffer<T> {
  /// Copy of the history, oldest first.
  pub fn to_vec(&self) -> Vec<T> { self.values.iter().cloned().collect() }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[rxnotify_macro::test]
  fn evicts_oldest_first() {
    let mut buffer = ReplayBuffer::new(2);
    buffer.push("a");
    buffer.push("b");
    buffer.push("c");
    assert_eq!(buffer.to_vec(), vec!["b", "c"]);
    assert_eq!(buffer.len(), 2);
  }

  #[rxnotify_macro::test]
  fn zero_capacity_keeps_nothing() {
    let mut buffer = ReplayBuffer::new(0);
    buffer.push(1);
    assert!(buffer.is_empty());
  }
}
