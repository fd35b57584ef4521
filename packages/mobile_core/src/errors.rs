use std::{error::Error, fmt::{Display, Formatter}};

#[derive(Debug)]
pub enum CaptureError {
    IoError(std::io::Error),
    FailedToSaveStream { fd: i32, error: std::io::Error },
    FailedToRedirectStream { fd: i32, error: std::io::Error },
    Unsupported,
}

impl Display for CaptureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::IoError(error) => write!(f, "capture io error: {}", error),
            CaptureError::FailedToSaveStream { fd, error } => {
                write!(f, "failed to save fd {}: {}", fd, error)
            }
            CaptureError::FailedToRedirectStream { fd, error } => {
                write!(f, "failed to redirect fd {}: {}", fd, error)
            }
            CaptureError::Unsupported => write!(f, "stdio capture is not supported on this platform"),
        }
    }
}

impl Error for CaptureError {}

impl From<std::io::Error> for CaptureError {
    fn from(e: std::io::Error) -> Self {
        CaptureError::IoError(e)
    }
}

#[derive(Debug)]
pub enum ProcessWorkerError {
    FailedToSpawn { binary: String, error: std::io::Error },
    WaitFailed(std::io::Error),
    ExitedWithFailure(std::process::ExitStatus),
}

impl Display for ProcessWorkerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessWorkerError::FailedToSpawn { binary, error } => {
                write!(f, "failed to spawn {}: {}", binary, error)
            }
            ProcessWorkerError::WaitFailed(error) => write!(f, "failed to wait for client: {}", error),
            ProcessWorkerError::ExitedWithFailure(status) => write!(f, "client exited: {}", status),
        }
    }
}

impl Error for ProcessWorkerError {}

impl From<std::io::Error> for ProcessWorkerError {
    fn from(e: std::io::Error) -> Self {
        ProcessWorkerError::WaitFailed(e)
    }
}
