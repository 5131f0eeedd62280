use std::fmt;

use snafu::Snafu;

/// Lifecycle state of a server.
///
/// ```text
/// Init => Ready => Running
///   \        \        \
///    `--------`--------`=> Closed
/// ```
///
/// States only ever move forward. `Closed` can be reached from any state and is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServerState {
    /// Created, no configuration loaded yet.
    Init,

    /// Configuration loaded; the logger can be prepared and the server initialized.
    Ready,

    /// The main event loop is running.
    Running,

    /// Shut down. Terminal.
    Closed,
}

/// A state-gated lifecycle operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Loading the configuration.
    ParseConfig,

    /// Opening the logger.
    PrepareLogger,

    /// Forking the built-in workers.
    Initialize,

    /// Entering the main event loop.
    Run,

    /// Shutting down.
    Close,
}

/// Lifecycle errors.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum LifecycleError {
    /// An operation was attempted from a state it is not allowed in.
    #[snafu(display("server invalid state: cannot {} while {}", operation, state))]
    InvalidTransition {
        /// The attempted operation.
        operation: Operation,

        /// The state the server was in.
        state: ServerState,
    },
}

impl ServerState {
    /// Returns the state reached by performing `operation` from this state.
    ///
    /// # Errors
    ///
    /// If `operation` is not allowed from this state, an error is returned.
    pub fn on(self, operation: Operation) -> Result<Self, LifecycleError> {
        use Operation::*;
        use ServerState::*;

        match (self, operation) {
            (Init, ParseConfig) => Ok(Ready),
            (Ready, PrepareLogger | Initialize) => Ok(Ready),
            (Ready, Run) => Ok(Running),
            (_, Close) => Ok(Closed),
            (state, operation) => Err(LifecycleError::InvalidTransition { operation, state }),
        }
    }

    /// Returns `true` if no further transition is possible.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ParseConfig => "parse config",
            Self::PrepareLogger => "prepare logger",
            Self::Initialize => "initialize",
            Self::Run => "run",
            Self::Close => "close",
        };
        f.write_str(name)
    }
}
