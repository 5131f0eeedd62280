use std::{
    io::{self, Write},
    sync::Arc,
};

use arc_swap::ArcSwap;
use tracing_appender::non_blocking::NonBlocking;
use tracing_subscriber::fmt::MakeWriter;

/// Where formatted log lines are written to.
pub(super) enum Target {
    Console,
    File(NonBlocking),
}

/// A `MakeWriter` whose target can be switched while the subscriber is installed.
///
/// The formatting layer is built once, with a clone of this writer. Switching the target afterwards affects every
/// line written from that point on.
#[derive(Clone)]
pub(super) struct SwitchableWriter {
    target: Arc<ArcSwap<Target>>,
}

impl SwitchableWriter {
    pub(super) fn console() -> Self {
        Self {
            target: Arc::new(ArcSwap::from_pointee(Target::Console)),
        }
    }

    pub(super) fn switch(&self, target: Target) {
        self.target.store(Arc::new(target));
    }

    pub(super) fn is_console(&self) -> bool {
        matches!(**self.target.load(), Target::Console)
    }
}

impl<'a> MakeWriter<'a> for SwitchableWriter {
    type Writer = TargetWriter;

    fn make_writer(&'a self) -> Self::Writer {
        match &**self.target.load() {
            Target::Console => TargetWriter::Console(io::stdout()),
            Target::File(writer) => TargetWriter::File(writer.clone()),
        }
    }
}

pub(super) enum TargetWriter {
    Console(io::Stdout),
    File(NonBlocking),
}

impl Write for TargetWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Console(writer) => writer.write(buf),
            Self::File(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Console(writer) => writer.flush(),
            Self::File(writer) => writer.flush(),
        }
    }
}
