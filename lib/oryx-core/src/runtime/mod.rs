//! Runtime system.
//!
//! A service process is made of a main event loop and a set of **workers**: independent asynchronous tasks running on
//! the Tokio runtime, each with a human-readable name. Workers are never spawned directly. They are _forked_ through a
//! [`WorkerContainer`], which gives every worker the same two capabilities:
//!
//! - observing cancellation, through a receive-only [`CancelReceiver`]
//! - requesting cancellation of the whole process, through [`WorkerContainer::request_cancel`]
//!
//! # Cancellation
//!
//! Cancellation is level-triggered and idempotent. Whatever originates it (a termination signal, a worker that
//! panicked or failed, or an explicit close of the server), every request funnels into the same single-slot channel,
//! so at most one request is ever pending, and into the same token, so every worker observes it. Requesting
//! cancellation never blocks.
//!
//! # Fault isolation
//!
//! A worker that panics or returns an error never takes the process down with it. The fault is caught at the worker
//! boundary, logged with the worker's name, and converted into a cancellation request so that the whole process shuts
//! down cleanly. Every forked worker is tracked until it returns, regardless of how it returns, which is what lets the
//! main loop join all of them before acknowledging shutdown.

mod cancel;
pub use self::cancel::{
    cancellation, shutdown_acknowledgement, AckReceiver, AckSender, CancelReceiver, CancelRequests, Cancellation,
};

mod container;
pub use self::container::WorkerContainer;

mod maintenance;
pub use self::maintenance::{HeapReclaimer, MaintenanceTimer, NoopReclaimer};

mod signal;
pub use self::signal::{Signal, SignalDispatcher};

mod state;
pub use self::state::{LifecycleError, Operation, ServerState};

mod width;
pub use self::width::{detected_cpus, ConcurrencyWidth, WidthError};
