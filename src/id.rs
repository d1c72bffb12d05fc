//! Opaque identities for subjects, observers, listeners and queued events.
//!
//! Every id type is a `Copy` newtype over a process-wide monotonic counter, so
//! ids are never reused and compare by value.

use std::{
  fmt,
  sync::atomic::{AtomicU64, Ordering},
};

macro_rules! define_id {
  ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
    $(#[$meta])*
    #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct $name(u64);

    impl $name {
      /// Allocate a fresh id.
      pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
      }

      /// The raw counter value.
      #[inline]
      pub fn get(self) -> u64 { self.0 }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, concat!($prefix, "#{}"), self.0)
      }
    }
  };
}

define_id!(
  /// Identity of a [`Subject`](crate::subject::Subject).
  SubjectId,
  "subject"
);
define_id!(
  /// Identity of a registered subject observer.
  ObserverId,
  "observer"
);
define_id!(
  /// Identity of an [`EventEmitter`](crate::emitter::EventEmitter) listener.
  ListenerId,
  "listener"
);
define_id!(
  /// Identity of an event queued while an emitter is paused.
  EventId,
  "event"
);
