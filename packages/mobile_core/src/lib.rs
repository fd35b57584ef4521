//! Runs a tunnel client as an embedded background service: one worker at a
//! time, with every byte of diagnostic output (tracing events and raw
//! stdout/stderr) collected into a bounded buffer the host drains by polling.

pub mod controller;
pub mod errors;
pub mod log_redirect;
pub mod log_sink;
pub mod output_capture;
pub mod settings;
pub mod version;
pub mod worker;

pub use controller::{ServiceContext, ServiceController, ServiceStatus};
pub use log_sink::{LOG_SINK_CAPACITY, LogSink};
pub use settings::ShimSettings;
pub use version::full_version;
pub use worker::{ProcessWorker, Worker};
