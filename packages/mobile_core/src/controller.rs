use std::fmt::Debug;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use tracing::instrument::WithSubscriber;

use crate::log_redirect::LogRedirect;
use crate::log_sink::LogSink;
use crate::output_capture::{OutputInterceptor, StdioRedirect};
use crate::settings::ShimSettings;
use crate::worker::Worker;

/// Everything the service writes its diagnostics through
pub struct ServiceContext {
    sink: LogSink,
    logs: LogRedirect,
    output: OutputInterceptor,
}

impl ServiceContext {
    pub fn new(sink: LogSink, log_filter: &str, output: OutputInterceptor) -> Self {
        let logs = LogRedirect::new(&sink, log_filter);
        ServiceContext { sink, logs, output }
    }

    pub fn from_settings(settings: &ShimSettings) -> Self {
        let output = if settings.capture_stdio {
            OutputInterceptor::new(StdioRedirect::new())
        } else {
            OutputInterceptor::disabled()
        };

        Self::new(LogSink::new(), &settings.log_filter, output)
    }

    pub fn sink(&self) -> &LogSink {
        &self.sink
    }

    pub fn logs(&self) -> &LogRedirect {
        &self.logs
    }

    pub fn output(&self) -> &OutputInterceptor {
        &self.output
    }

    /// Run `f` with this context's subscriber as the thread default
    pub fn in_scope<T, F: FnOnce() -> T>(&self, f: F) -> T {
        tracing::dispatcher::with_default(self.logs.dispatch(), f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Idle,
    Running,
}

struct RunningWorker {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

type RunningSlot = Arc<Mutex<Option<RunningWorker>>>;

/// Keeps at most one worker alive and mediates its logs.
///
/// `start` and `stop` never report errors; anything that goes wrong ends up
/// as text in the context's sink, read back with `drain_logs`.
pub struct ServiceController<W: Worker> {
    context: ServiceContext,
    worker: W,
    runtime: Handle,
    running: RunningSlot,
    generation: AtomicU64,
}

impl<W: Worker> ServiceController<W> {
    pub fn new(context: ServiceContext, worker: W, runtime: Handle) -> Self {
        ServiceController {
            context,
            worker,
            runtime,
            running: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }

    pub fn context(&self) -> &ServiceContext {
        &self.context
    }

    /// Launch the worker unless one is already running. A running worker keeps
    /// the config it was started with.
    pub fn start(&self, config_locator: &str) {
        let mut running = lock(&self.running);

        if let Some(current) = running.as_ref() {
            self.context.in_scope(|| {
                tracing::debug!(generation = current.generation, "start ignored, worker already running");
            });
            return;
        }

        self.context.logs.apply();
        self.context.logs.install_global();

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let dispatch = self.context.logs.dispatch().clone();

        let task = self.context.in_scope(|| {
            self.context.output.install_once(&self.context.sink);

            tracing::info!(generation, config = %config_locator, "starting worker");

            let run = self.worker.run(cancel.clone(), config_locator.to_string());
            let span = tracing::info_span!("worker", generation);

            self.runtime.spawn(
                supervise(run, self.running.clone(), generation)
                    .instrument(span)
                    .with_subscriber(dispatch),
            )
        });

        *running = Some(RunningWorker {
            generation,
            cancel,
            task,
        });
    }

    /// Ask the running worker to exit. Returns immediately.
    pub fn stop(&self) {
        let _ = self.request_stop();
    }

    /// Stop and wait up to `timeout` for the worker to finish. True when no
    /// worker is left running.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let Some(task) = self.request_stop() else {
            return true;
        };

        tokio::time::timeout(timeout, task).await.is_ok()
    }

    pub fn status(&self) -> ServiceStatus {
        match lock(&self.running).as_ref() {
            Some(_) => ServiceStatus::Running,
            None => ServiceStatus::Idle,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status() == ServiceStatus::Running
    }

    pub fn drain_logs(&self) -> String {
        self.context.sink.drain_string()
    }

    fn request_stop(&self) -> Option<JoinHandle<()>> {
        let worker = lock(&self.running).take()?;

        self.context.in_scope(|| {
            tracing::info!(generation = worker.generation, "stop requested");
        });

        worker.cancel.cancel();
        Some(worker.task)
    }
}

impl<W: Worker> Drop for ServiceController<W> {
    fn drop(&mut self) {
        if let Some(worker) = lock(&self.running).take() {
            worker.cancel.cancel();
        }
    }
}

async fn supervise<F, E>(run: F, slot: RunningSlot, generation: u64)
where
    F: Future<Output = Result<(), E>>,
    E: Debug,
{
    match AssertUnwindSafe(run).catch_unwind().await {
        Ok(Ok(())) => tracing::info!("worker exited"),
        Ok(Err(error)) => tracing::error!(?error, "worker failed"),
        Err(_) => tracing::error!("worker panicked"),
    }

    let mut running = lock(&slot);
    if running.as_ref().is_some_and(|current| current.generation == generation) {
        *running = None;
        tracing::warn!("worker exited without stop, service is idle");
    }
}

fn lock(running: &Mutex<Option<RunningWorker>>) -> MutexGuard<'_, Option<RunningWorker>> {
    running.lock().unwrap_or_else(PoisonError::into_inner)
}
