use tracing::Dispatch;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, reload};

use crate::log_sink::LogSink;

/// Everything, down to trace
pub const DEFAULT_LOG_FILTER: &str = "trace";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f%:z";

/// `tracing` subscriber that formats every event into a [`LogSink`].
///
/// The filter sits behind a reload handle so it can be re-applied on each
/// service start without rebuilding the subscriber.
pub struct LogRedirect {
    dispatch: Dispatch,
    filter: reload::Handle<EnvFilter, Registry>,
    directives: String,
}

impl LogRedirect {
    pub fn new<D: Into<String>>(sink: &LogSink, directives: D) -> Self {
        let directives = directives.into();
        let (filter, handle) = reload::Layer::new(parse_filter(&directives));

        let format = tracing_subscriber::fmt::layer()
            .with_writer(sink.clone())
            .with_ansi(false)
            .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
            .with_target(true)
            .with_thread_names(true);

        let subscriber = tracing_subscriber::registry().with(filter).with(format);

        LogRedirect {
            dispatch: Dispatch::new(subscriber),
            filter: handle,
            directives,
        }
    }

    pub fn directives(&self) -> &str {
        &self.directives
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Reset the level filter to the configured directives
    pub fn apply(&self) {
        if let Err(error) = self.filter.reload(parse_filter(&self.directives)) {
            tracing::warn!(%error, "failed to reload log filter");
        }
    }

    /// Make this the process wide subscriber (and bridge the `log` crate into
    /// it). Returns false when some other subscriber already holds that slot.
    pub fn install_global(&self) -> bool {
        self.dispatch.clone().try_init().is_ok()
    }
}

fn parse_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}
