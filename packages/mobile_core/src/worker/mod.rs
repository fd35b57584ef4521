use std::fmt::Debug;

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

mod process_worker;

pub use process_worker::{ProcessWorker, strip_ansi};

/// The long running client the service hosts.
///
/// `run` must return soon after `cancel` fires. All diagnostics go through
/// `tracing` or stdio; there is no console.
pub trait Worker: Send + Sync + 'static {
    type Error: Debug + Send + 'static;

    fn run(&self, cancel: CancellationToken, config_locator: String) -> BoxFuture<'static, Result<(), Self::Error>>;
}
