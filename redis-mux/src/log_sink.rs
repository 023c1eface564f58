use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// A best-effort, human-readable sink for connection progress lines.
///
/// Every line is written under a lock, so lines from concurrent connect attempts never
/// interleave. Each line is also emitted through `log::info!`. Write errors are ignored.
#[derive(Clone)]
pub struct LogSink {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl LogSink {
    /// Wraps a writer.
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// A sink writing to the process' standard error.
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    /// Writes one line.
    pub fn line(&self, args: fmt::Arguments<'_>) {
        log::info!("{args}");
        let Ok(mut writer) = self.writer.lock() else {
            return;
        };
        let _ = writeln!(writer, "{args}");
        let _ = writer.flush();
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LogSink")
    }
}

/// Writes a formatted line to an optional [`LogSink`].
macro_rules! sink_line {
    ($sink:expr, $($arg:tt)+) => {
        if let Some(sink) = $sink {
            sink.line(format_args!($($arg)+));
        }
    };
}

pub(crate) use sink_line;
