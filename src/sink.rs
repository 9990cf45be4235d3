use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Destination for rendered record lines.
///
/// Emission is synchronous: the write is the only blocking step of a logging
/// call and is allowed to block briefly (e.g. on a full pipe). Implementations
/// report I/O failures through the `Result`; the emitter swallows them, since
/// logging must never be the cause of an application crash.
pub trait RecordSink: Send + Sync {
    /// Write exactly one record line (newline appended by the sink).
    fn emit(&self, line: &str) -> io::Result<()>;

    /// Flush any OS-level buffering. Default is a no-op.
    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Line sink over standard output.
#[derive(Clone, Default)]
pub struct StdoutSink;

impl RecordSink for StdoutSink {
    fn emit(&self, line: &str) -> io::Result<()> {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle.write_all(line.as_bytes())?;
        handle.write_all(b"\n")
    }

    fn flush(&self) -> io::Result<()> {
        io::stdout().lock().flush()
    }
}

/// Line sink over any `io::Write`, e.g. an opened log file.
pub struct WriterSink {
    inner: Mutex<Box<dyn Write + Send>>,
}

impl WriterSink {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        WriterSink {
            inner: Mutex::new(writer),
        }
    }
}

impl RecordSink for WriterSink {
    fn emit(&self, line: &str) -> io::Result<()> {
        let mut writer = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "writer lock poisoned"))?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")
    }

    fn flush(&self) -> io::Result<()> {
        let mut writer = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "writer lock poisoned"))?;
        writer.flush()
    }
}

/// In-memory sink that retains every emitted line, for tests.
#[derive(Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.clear();
        }
    }
}

impl RecordSink for MemorySink {
    fn emit(&self, line: &str) -> io::Result<()> {
        self.lines
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "sink lock poisoned"))?
            .push(line.to_string());
        Ok(())
    }
}

/// A sink that simply drops all records.
///
/// Useful for measuring the overhead of the pipeline itself without any I/O,
/// and for unit tests that don't care about output.
#[derive(Clone, Default)]
pub struct NoopSink;

impl RecordSink for NoopSink {
    fn emit(&self, _line: &str) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_retains_lines() {
        let sink = MemorySink::new();
        sink.emit("one").unwrap();
        sink.emit("two").unwrap();
        assert_eq!(sink.lines(), vec!["one".to_string(), "two".to_string()]);
        sink.clear();
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn writer_sink_appends_newline() {
        let buffer: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));

        struct Shared(Arc<Mutex<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let sink = WriterSink::new(Box::new(Shared(Arc::clone(&buffer))));
        sink.emit("{\"event\":\"Hi\"}").unwrap();
        let written = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert_eq!(written, "{\"event\":\"Hi\"}\n");
    }
}
