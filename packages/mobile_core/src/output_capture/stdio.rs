use std::sync::atomic::{AtomicBool, Ordering};

use crate::errors::CaptureError;
use crate::output_capture::{CaptureReader, OutputRedirect};

/// fd 1 and 2 are process wide, so this is shared by every redirect instance
static STDIO_CAPTURED: AtomicBool = AtomicBool::new(false);

/// Points stdout and stderr at a pipe and hands out the read end.
///
/// Only the first install in a process does anything; later installs return
/// `Ok(None)` even if the first one failed.
#[derive(Default)]
pub struct StdioRedirect {
    #[cfg(unix)]
    saved: std::sync::Mutex<Option<unix::SavedStreams>>,
}

impl StdioRedirect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn already_captured() -> bool {
        STDIO_CAPTURED.load(Ordering::SeqCst)
    }
}

#[cfg(unix)]
impl OutputRedirect for StdioRedirect {
    fn install(&self) -> Result<Option<CaptureReader>, CaptureError> {
        if STDIO_CAPTURED.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }

        let (reader, saved) = unix::redirect()?;
        *self.saved.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(saved);

        Ok(Some(Box::new(reader)))
    }

    fn restore(&self) {
        let saved = self.saved.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take();
        if let Some(saved) = saved {
            saved.restore();
        }
    }
}

#[cfg(not(unix))]
impl OutputRedirect for StdioRedirect {
    fn install(&self) -> Result<Option<CaptureReader>, CaptureError> {
        if STDIO_CAPTURED.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }

        Err(CaptureError::Unsupported)
    }
}

#[cfg(unix)]
mod unix {
    use std::io::{PipeReader, Write};
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

    use crate::errors::CaptureError;

    pub struct SavedStreams {
        stdout: OwnedFd,
        stderr: OwnedFd,
    }

    impl SavedStreams {
        pub fn restore(self) {
            flush_std();
            /* nothing sensible to do if this fails, the streams stay on the pipe */
            let _ = dup2(self.stdout.as_raw_fd(), libc::STDOUT_FILENO);
            let _ = dup2(self.stderr.as_raw_fd(), libc::STDERR_FILENO);
        }
    }

    pub fn redirect() -> Result<(PipeReader, SavedStreams), CaptureError> {
        let (reader, writer) = std::io::pipe()?;
        flush_std();

        let stdout = dup(libc::STDOUT_FILENO).map_err(|error| CaptureError::FailedToSaveStream {
            fd: libc::STDOUT_FILENO,
            error,
        })?;
        let stderr = dup(libc::STDERR_FILENO).map_err(|error| CaptureError::FailedToSaveStream {
            fd: libc::STDERR_FILENO,
            error,
        })?;

        dup2(writer.as_raw_fd(), libc::STDOUT_FILENO).map_err(|error| {
            CaptureError::FailedToRedirectStream {
                fd: libc::STDOUT_FILENO,
                error,
            }
        })?;

        if let Err(error) = dup2(writer.as_raw_fd(), libc::STDERR_FILENO) {
            let _ = dup2(stdout.as_raw_fd(), libc::STDOUT_FILENO);
            return Err(CaptureError::FailedToRedirectStream {
                fd: libc::STDERR_FILENO,
                error,
            });
        }

        /* fd 1 and 2 now hold the write end open */
        drop(writer);

        Ok((reader, SavedStreams { stdout, stderr }))
    }

    fn flush_std() {
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();
    }

    fn dup(fd: RawFd) -> std::io::Result<OwnedFd> {
        let new_fd = unsafe { libc::dup(fd) };
        if new_fd < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(unsafe { OwnedFd::from_raw_fd(new_fd) })
    }

    fn dup2(src: RawFd, dst: RawFd) -> std::io::Result<()> {
        loop {
            if unsafe { libc::dup2(src, dst) } >= 0 {
                return Ok(());
            }

            let error = std::io::Error::last_os_error();
            if error.kind() != std::io::ErrorKind::Interrupted {
                return Err(error);
            }
        }
    }
}
