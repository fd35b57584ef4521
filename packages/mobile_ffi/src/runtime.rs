//! Runtime the embedded client runs on. Kept small, a phone app has little
//! use for a worker per core.

use tokio::runtime::Runtime;

pub fn build_runtime() -> std::io::Result<Runtime> {
    let threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .clamp(2, 4);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(threads)
        .thread_name("frpc-mobile-worker")
        .build()
}
