//! Routes raw process output (anything written to fd 1 and 2, including
//! output from native dependencies that never touch `tracing`) into the
//! [`LogSink`].

use std::io::{ErrorKind, Read};
use std::sync::{Arc, Mutex, Once, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::errors::CaptureError;
use crate::log_sink::LogSink;

mod stdio;

pub use stdio::StdioRedirect;

pub const CAPTURE_CHUNK_SIZE: usize = 4096;

pub type CaptureReader = Box<dyn Read + Send>;

/// Replaces the process output streams with something readable.
///
/// `install` returns `Ok(None)` when there is nothing to read, either because
/// the implementation does no redirection or because it already ran.
pub trait OutputRedirect: Send + Sync {
    fn install(&self) -> Result<Option<CaptureReader>, CaptureError>;

    /// Put the original streams back. Called when the reader gives up so
    /// writers do not block on a pipe nobody drains.
    fn restore(&self) {}
}

/// Leaves the process output streams alone
pub struct NoRedirect;

impl OutputRedirect for NoRedirect {
    fn install(&self) -> Result<Option<CaptureReader>, CaptureError> {
        Ok(None)
    }
}

#[derive(Debug)]
pub enum PumpExit {
    EndOfStream,
    Failed(std::io::Error),
}

pub struct OutputInterceptor {
    redirect: Arc<dyn OutputRedirect>,
    installed: Once,
    reader_thread: Mutex<Option<JoinHandle<PumpExit>>>,
}

impl OutputInterceptor {
    pub fn new<R: OutputRedirect + 'static>(redirect: R) -> Self {
        OutputInterceptor {
            redirect: Arc::new(redirect),
            installed: Once::new(),
            reader_thread: Mutex::new(None),
        }
    }

    pub fn disabled() -> Self {
        Self::new(NoRedirect)
    }

    /// Install the redirect and start the reader, at most once for the
    /// lifetime of this interceptor
    pub fn install_once(&self, sink: &LogSink) {
        self.installed.call_once(|| self.install(sink));
    }

    pub fn is_installed(&self) -> bool {
        self.installed.is_completed()
    }

    /// Wait for the reader thread to finish. Returns `None` if no reader was
    /// started or it has already been joined.
    pub fn join_reader(&self) -> Option<PumpExit> {
        let handle = self
            .reader_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;

        match handle.join() {
            Ok(exit) => Some(exit),
            Err(_) => Some(PumpExit::Failed(std::io::Error::other("stdio capture thread panicked"))),
        }
    }

    fn install(&self, sink: &LogSink) {
        let reader = match self.redirect.install() {
            Ok(Some(reader)) => reader,
            Ok(None) => {
                tracing::debug!("stdio capture not installed");
                return;
            }
            Err(error) => {
                tracing::error!(?error, "failed to capture stdio");
                return;
            }
        };

        let thread_sink = sink.clone();
        let redirect = self.redirect.clone();

        let spawned = std::thread::Builder::new()
            .name("stdio-capture".to_string())
            .spawn(move || {
                let mut reader = reader;
                let exit = pump(&mut reader, &thread_sink);

                if let PumpExit::Failed(error) = &exit {
                    thread_sink.write(format!("stdio capture stopped: {}\n", error).as_bytes());
                    redirect.restore();
                }

                /* fd 1 and 2 must be back before the read end closes */
                drop(reader);
                exit
            });

        match spawned {
            Ok(handle) => {
                *self.reader_thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                tracing::info!("stdio captured into log buffer");
            }
            Err(error) => {
                self.redirect.restore();
                tracing::error!(?error, "failed to spawn stdio capture thread");
            }
        }
    }
}

/// Copy everything from `reader` into `sink` in chunks until the stream ends
/// or fails for a reason retrying will not fix.
///
/// A UTF-8 sequence cut off at the end of a read is held back until the rest
/// arrives, so a drain between two writes never splits a character.
pub fn pump<R: Read>(mut reader: R, sink: &LogSink) -> PumpExit {
    let mut buffer = [0u8; CAPTURE_CHUNK_SIZE + MAX_HELD_BYTES];
    let mut held = 0;

    loop {
        match reader.read(&mut buffer[held..held + CAPTURE_CHUNK_SIZE]) {
            Ok(0) => {
                flush_held(&buffer[..held], sink);
                return PumpExit::EndOfStream;
            }
            Ok(n) => {
                let filled = held + n;
                let ready = filled - incomplete_utf8_tail(&buffer[..filled]);
                if ready > 0 {
                    sink.write(&buffer[..ready]);
                }

                buffer.copy_within(ready..filled, 0);
                held = filled - ready;
            }
            Err(error) if error.kind() == ErrorKind::Interrupted => continue,
            Err(error) if error.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(error) => {
                flush_held(&buffer[..held], sink);
                return PumpExit::Failed(error);
            }
        }
    }
}

const MAX_HELD_BYTES: usize = 3;

fn flush_held(held: &[u8], sink: &LogSink) {
    if !held.is_empty() {
        sink.write(held);
    }
}

/// Length of a multi-byte UTF-8 sequence at the end of `bytes` that is still
/// missing continuation bytes, or 0.
fn incomplete_utf8_tail(bytes: &[u8]) -> usize {
    for back in 1..=MAX_HELD_BYTES.min(bytes.len()) {
        let byte = bytes[bytes.len() - back];

        if byte & 0xC0 == 0x80 {
            continue;
        }

        let needed = match byte {
            0xF0.. => 4,
            0xE0.. => 3,
            0xC0.. => 2,
            _ => return 0,
        };

        return if needed > back { back } else { 0 };
    }

    0
}
