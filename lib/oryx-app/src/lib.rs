//! Building blocks for Oryx-based service processes.
//!
//! The centerpiece is the [`Server`], which supervises the lifecycle of a process on top of the primitives from
//! `oryx-core`: it loads the configuration, opens the logger, forks the built-in workers (the configuration reload
//! watcher and the heartbeat cycles), and runs the main event loop until shutdown.
#![deny(missing_docs)]

pub mod bootstrap;
pub mod heartbeat;
pub mod logging;

mod reload;

mod server;
pub use self::server::{Server, ServerBuilder, ServerError};

/// Commonly used types.
pub mod prelude {
    pub use oryx_config::{Config, ConfigStore, ReloadScope};
    pub use oryx_core::runtime::{ConcurrencyWidth, HeapReclaimer, ServerState, WorkerContainer};
    pub use oryx_error::{generic_error, ErrorContext as _, GenericError};

    pub use crate::bootstrap::PidFile;
    pub use crate::logging::{fatal_and_exit, LoggerAdapter};
    pub use crate::{Server, ServerBuilder, ServerError};
}
