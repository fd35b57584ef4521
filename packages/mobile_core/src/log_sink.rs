use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing_subscriber::fmt::MakeWriter;

/// Size at which the next write resets the buffer (1 MiB)
pub const LOG_SINK_CAPACITY: usize = 1 << 20;

/// Byte accumulator shared by every log producer in the process.
///
/// Writers never block on I/O and never see partial writes. Once the buffer
/// has grown past its capacity the next write clears everything before
/// appending, so the content between two drains is either complete or starts
/// fresh at the write that tripped the limit.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<Inner>,
}

struct Inner {
    buffer: Mutex<Vec<u8>>,
    capacity: usize,
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink {
    pub fn new() -> Self {
        Self::with_capacity(LOG_SINK_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        LogSink {
            inner: Arc::new(Inner {
                buffer: Mutex::new(Vec::new()),
                capacity,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Append a chunk, always accepting all of it
    pub fn write(&self, bytes: &[u8]) -> usize {
        let mut buffer = self.lock();
        if buffer.len() > self.inner.capacity {
            buffer.clear();
        }
        buffer.extend_from_slice(bytes);
        bytes.len()
    }

    /// Take everything written since the previous drain
    pub fn drain(&self) -> Vec<u8> {
        std::mem::take(&mut *self.lock())
    }

    pub fn drain_string(&self) -> String {
        let bytes = self.drain();
        match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(error) => String::from_utf8_lossy(error.as_bytes()).into_owned(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn writer(&self) -> LogSinkWriter {
        LogSinkWriter { sink: self.clone() }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        /* a panic while holding the lock cannot leave the Vec half updated */
        self.inner.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// `io::Write` handle onto a [`LogSink`]
#[derive(Clone)]
pub struct LogSinkWriter {
    sink: LogSink,
}

impl Write for LogSinkWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(self.sink.write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = LogSinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.writer()
    }
}
