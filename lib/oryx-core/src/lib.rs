//! Core runtime primitives for Oryx-based services.
//!
//! This crate holds the pieces a service process is supervised with: the lifecycle state machine, the cancellation
//! primitives, the worker container used to fork and join workers, OS signal dispatching, and periodic maintenance.
#![deny(missing_docs)]

pub mod runtime;
