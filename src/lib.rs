//! # rxnotify: a reactive notification engine
//!
//! Single-threaded publish/subscribe built around two primitives:
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Subject`] | Multicasts values to observers in priority order, with per-observer filter, transform, debounce, throttle and replay |
//! | [`EventEmitter`] | Keyed events with prioritized listeners and a bounded pause queue |
//!
//! [`BehaviorSubject`], [`ReplaySubject`] and [`AsyncSubject`] specialize the
//! subject; [`MemoryManager`] sweeps idle subjects and dead weak observers.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::{cell::RefCell, rc::Rc};
//!
//! use rxnotify::prelude::*;
//!
//! TestScheduler::init();
//! let subject = Subject::with_scheduler(SubjectConfig::default(), Rc::new(TestScheduler));
//! let seen = Rc::new(RefCell::new(vec![]));
//!
//! let s = seen.clone();
//! subject
//!   .add_observer(move |v: i32| s.borrow_mut().push(v), ObserverOptions::new().filter(|v: &i32| v % 2 == 0))
//!   .unwrap();
//!
//! for v in 0..5 {
//!   subject.notify_sync(v).unwrap();
//! }
//! assert_eq!(*seen.borrow(), vec![0, 2, 4]);
//! ```
//!
//! ## Feature Flags
//!
//! - **`tokio-scheduler`** (default): [`TokioScheduler`] and the constructors
//!   that use it implicitly.
//!
//! [`Subject`]: subject::Subject
//! [`BehaviorSubject`]: subject::BehaviorSubject
//! [`ReplaySubject`]: subject::ReplaySubject
//! [`AsyncSubject`]: subject::AsyncSubject
//! [`EventEmitter`]: emitter::EventEmitter
//! [`MemoryManager`]: memory::MemoryManager
//! [`TokioScheduler`]: scheduler::TokioScheduler

pub mod emitter;
pub mod error;
pub mod id;
pub mod memory;
pub mod metrics;
pub mod observer;
pub mod ops;
pub mod prelude;
pub mod scheduler;
pub mod subject;
pub mod subscription;

pub use prelude::*;
