use std::fmt;

use oryx_error::GenericError;

/// An OS signal handled by the main event loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Signal {
    /// `SIGINT`, or Ctrl-C on platforms without Unix signals.
    Interrupt,

    /// `SIGTERM`.
    Terminate,

    /// `SIGHUP`.
    Hangup,

    /// `SIGQUIT`.
    Quit,

    /// `SIGUSR1`.
    User1,

    /// `SIGUSR2`.
    User2,
}

impl Signal {
    /// Returns `true` if the signal asks the process to shut down.
    pub const fn is_termination(self) -> bool {
        matches!(self, Self::Interrupt | Self::Terminate)
    }

    /// Returns the conventional name of the signal.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Hangup => "SIGHUP",
            Self::Quit => "SIGQUIT",
            Self::User1 => "SIGUSR1",
            Self::User2 => "SIGUSR2",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Receives the OS signals handled by the main event loop.
///
/// Handlers are registered when the dispatcher is installed and stay registered for the lifetime of the process, as
/// Tokio never unregisters a signal handler once set.
pub struct SignalDispatcher {
    inner: imp::Signals,
}

impl SignalDispatcher {
    /// Installs handlers for every handled signal.
    ///
    /// # Errors
    ///
    /// If a handler cannot be registered, an error is returned.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn install() -> Result<Self, GenericError> {
        Ok(Self {
            inner: imp::Signals::install()?,
        })
    }

    /// Waits for the next signal.
    ///
    /// Returns `None` if no further signals can be received.
    pub async fn recv(&mut self) -> Option<Signal> {
        self.inner.recv().await
    }
}

#[cfg(unix)]
mod imp {
    use oryx_error::{ErrorContext as _, GenericError};
    use tokio::signal::unix::{signal, SignalKind};

    use super::Signal;

    pub(super) struct Signals {
        interrupt: tokio::signal::unix::Signal,
        terminate: tokio::signal::unix::Signal,
        hangup: tokio::signal::unix::Signal,
        quit: tokio::signal::unix::Signal,
        user1: tokio::signal::unix::Signal,
        user2: tokio::signal::unix::Signal,
    }

    impl Signals {
        pub(super) fn install() -> Result<Self, GenericError> {
            Ok(Self {
                interrupt: signal(SignalKind::interrupt()).error_context("Failed to set up SIGINT handler.")?,
                terminate: signal(SignalKind::terminate()).error_context("Failed to set up SIGTERM handler.")?,
                hangup: signal(SignalKind::hangup()).error_context("Failed to set up SIGHUP handler.")?,
                quit: signal(SignalKind::quit()).error_context("Failed to set up SIGQUIT handler.")?,
                user1: signal(SignalKind::user_defined1()).error_context("Failed to set up SIGUSR1 handler.")?,
                user2: signal(SignalKind::user_defined2()).error_context("Failed to set up SIGUSR2 handler.")?,
            })
        }

        pub(super) async fn recv(&mut self) -> Option<Signal> {
            tokio::select! {
                Some(()) = self.interrupt.recv() => Some(Signal::Interrupt),
                Some(()) = self.terminate.recv() => Some(Signal::Terminate),
                Some(()) = self.hangup.recv() => Some(Signal::Hangup),
                Some(()) = self.quit.recv() => Some(Signal::Quit),
                Some(()) = self.user1.recv() => Some(Signal::User1),
                Some(()) = self.user2.recv() => Some(Signal::User2),
                else => None,
            }
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use oryx_error::GenericError;

    use super::Signal;

    pub(super) struct Signals;

    impl Signals {
        pub(super) fn install() -> Result<Self, GenericError> {
            Ok(Self)
        }

        pub(super) async fn recv(&mut self) -> Option<Signal> {
            tokio::signal::ctrl_c().await.ok().map(|()| Signal::Interrupt)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn termination_signals() {
        assert!(Signal::Interrupt.is_termination());
        assert!(Signal::Terminate.is_termination());
        for signal in [Signal::Hangup, Signal::Quit, Signal::User1, Signal::User2] {
            assert!(!signal.is_termination(), "{} should not terminate", signal);
        }
    }

    #[test]
    fn display_uses_conventional_names() {
        assert_eq!(Signal::Terminate.to_string(), "SIGTERM");
        assert_eq!(Signal::User2.to_string(), "SIGUSR2");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn delivers_raised_signal() {
        use std::time::Duration;

        let mut dispatcher = SignalDispatcher::install().unwrap();
        // SIGUSR2 is otherwise unused by the test harness, and the handler above keeps it from killing the process.
        std::process::Command::new("kill")
            .arg("-USR2")
            .arg(std::process::id().to_string())
            .status()
            .unwrap();

        let signal = tokio::time::timeout(Duration::from_secs(5), dispatcher.recv()).await.unwrap();
        assert_eq!(signal, Some(Signal::User2));
    }
}
