//! Prelude module for convenient imports
//!
//! This module re-exports commonly used types and traits for easy access.

// Emitter
pub use crate::emitter::{
  EmitOptions, Emitted, EmitterConfig, EmitterConfigBuilder, EventEmitter, ListenerOptions, ERROR_EVENT,
};
// Errors
pub use crate::error::{CallbackError, Result, RxError};
// Identities
pub use crate::id::{EventId, ListenerId, ObserverId, SubjectId};
// Memory management
pub use crate::memory::{GcReport, MemoryManager, INACTIVITY_THRESHOLD};
pub use crate::metrics::Metrics;
// Observer trait and adapters
pub use crate::observer::{observer_fn, FnObserver, Observer, Reaction};
// Schedulers
pub use crate::scheduler::{Scheduler, SchedulerRef, TaskHandle, TestScheduler};
#[cfg(feature = "tokio-scheduler")]
pub use crate::scheduler::{default_scheduler, TokioScheduler};
// Subjects and their configuration
pub use crate::subject::*;
// Subscription
pub use crate::subscription::{Subscription, SubscriptionGuard};
