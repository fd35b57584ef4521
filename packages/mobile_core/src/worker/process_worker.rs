use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;

use crate::errors::ProcessWorkerError;
use crate::settings::ShimSettings;
use crate::worker::Worker;

const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Runs the tunnel client as a child process, `<binary> [args] -c <config>`,
/// turning every line it prints into a `tracing` event.
#[derive(Clone, Debug)]
pub struct ProcessWorker {
    binary: PathBuf,
    args: Vec<String>,
    stop_grace: Duration,
}

impl ProcessWorker {
    pub fn new<P: Into<PathBuf>>(binary: P) -> Self {
        ProcessWorker {
            binary: binary.into(),
            args: Vec::new(),
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    pub fn from_settings(settings: &ShimSettings) -> Self {
        ProcessWorker {
            binary: PathBuf::from(&settings.client_binary),
            args: settings.client_args.clone(),
            stop_grace: Duration::from_secs(settings.stop_grace_secs),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_stop_grace(mut self, stop_grace: Duration) -> Self {
        self.stop_grace = stop_grace;
        self
    }
}

impl Worker for ProcessWorker {
    type Error = ProcessWorkerError;

    fn run(&self, cancel: CancellationToken, config_locator: String) -> BoxFuture<'static, Result<(), Self::Error>> {
        Box::pin(run_client(self.clone(), cancel, config_locator))
    }
}

async fn run_client(worker: ProcessWorker, cancel: CancellationToken, config_locator: String) -> Result<(), ProcessWorkerError> {
    let mut child = Command::new(&worker.binary)
        .args(&worker.args)
        .arg("-c")
        .arg(&config_locator)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|error| ProcessWorkerError::FailedToSpawn {
            binary: worker.binary.display().to_string(),
            error,
        })?;

    tracing::info!(
        pid = ?child.id(),
        binary = %worker.binary.display(),
        config = %config_locator,
        "client process started"
    );

    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(forward_lines(stdout, "stdout").with_current_subscriber()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(forward_lines(stderr, "stderr").with_current_subscriber()));
    }

    let status = tokio::select! {
        status = child.wait() => status?,
        _ = cancel.cancelled() => {
            tracing::info!("stopping client process");
            terminate(&mut child, worker.stop_grace).await?
        }
    };

    /* grandchildren may keep the pipes open, don't wait on them forever */
    for reader in readers {
        let _ = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, reader).await;
    }

    if status.success() || cancel.is_cancelled() {
        tracing::info!(%status, "client process exited");
        return Ok(());
    }

    Err(ProcessWorkerError::ExitedWithFailure(status))
}

async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };

            match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => return status,
                Err(_) => tracing::warn!(?grace, "client ignored SIGTERM, killing"),
            }
        }
    }

    #[cfg(not(unix))]
    let _ = grace;

    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }

    child.kill().await?;
    child.wait().await
}

async fn forward_lines<R: AsyncRead + Unpin>(stream: R, stream_name: &'static str) {
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();

    loop {
        line.clear();

        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                let text = strip_ansi(text.trim_end_matches(['\r', '\n']));
                if !text.is_empty() {
                    tracing::info!(target: "frpc", stream = stream_name, "{}", text);
                }
            }
            Err(error) => {
                tracing::warn!(?error, stream = stream_name, "failed to read client output");
                break;
            }
        }
    }
}

/// Remove colour and erase-line sequences (`ESC [ <digits/;> m|K`)
pub fn strip_ansi(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;

    while let Some(start) = rest.find('\u{1b}') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        match sequence_len(after) {
            Some(len) => rest = &after[len..],
            None => {
                out.push('\u{1b}');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

fn sequence_len(after_escape: &str) -> Option<usize> {
    let bytes = after_escape.as_bytes();
    if bytes.first() != Some(&b'[') {
        return None;
    }

    let params = bytes[1..]
        .iter()
        .take_while(|b| b.is_ascii_digit() || **b == b';')
        .count();

    match bytes.get(1 + params) {
        Some(b'm') | Some(b'K') => Some(params + 2),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::strip_ansi;

    #[test]
    fn strips_colour_sequences() {
        assert_eq!(
            strip_ansi("\u{1b}[1;34m2024/01/01 [I] [service.go:301]\u{1b}[0m login to server success"),
            "2024/01/01 [I] [service.go:301] login to server success"
        );
    }

    #[test]
    fn strips_erase_line() {
        assert_eq!(strip_ansi("\u{1b}[Kprogress"), "progress");
    }

    #[test]
    fn keeps_unrelated_escapes() {
        assert_eq!(strip_ansi("a\u{1b}[2Jb"), "a\u{1b}[2Jb");
        assert_eq!(strip_ansi("trailing \u{1b}"), "trailing \u{1b}");
        assert_eq!(strip_ansi("plain text"), "plain text");
    }

    #[cfg(unix)]
    mod process {
        use std::time::Duration;

        use tokio_util::sync::CancellationToken;
        use tracing::instrument::WithSubscriber;

        use crate::errors::ProcessWorkerError;
        use crate::log_redirect::LogRedirect;
        use crate::log_sink::LogSink;
        use crate::worker::{ProcessWorker, Worker};

        /* `sh -c <script>` matches the `<binary> -c <config>` invocation */
        fn shell() -> ProcessWorker {
            ProcessWorker::new("/bin/sh")
        }

        async fn wait_for(sink: &LogSink, needle: &str, seen: &mut String) {
            for _ in 0..500 {
                seen.push_str(&sink.drain_string());
                if seen.contains(needle) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("{:?} never logged, got: {}", needle, seen);
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        async fn client_output_becomes_log_events() {
            let sink = LogSink::new();
            let redirect = LogRedirect::new(&sink, "trace");

            let result = shell()
                .run(CancellationToken::new(), "echo connecting; printf '\\033[32mready\\033[0m\\n' >&2".to_string())
                .with_subscriber(redirect.dispatch().clone())
                .await;
            assert!(result.is_ok(), "{:?}", result);

            let logs = sink.drain_string();
            assert!(logs.contains("client process started"), "{}", logs);
            assert!(logs.contains("frpc"), "{}", logs);
            assert!(logs.contains("connecting"), "{}", logs);
            assert!(
                logs.lines().any(|line| line.contains("ready") && line.contains("stream=\"stderr\"")),
                "{}",
                logs
            );
            assert!(!logs.contains('\u{1b}'), "{}", logs);
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        async fn cancel_terminates_client() {
            let sink = LogSink::new();
            let redirect = LogRedirect::new(&sink, "trace");
            let cancel = CancellationToken::new();

            let task = tokio::spawn(
                shell()
                    .run(cancel.clone(), "trap 'exit 0' TERM; echo ready-$((1+1)); while true; do sleep 0.1; done".to_string())
                    .with_subscriber(redirect.dispatch().clone()),
            );

            let mut seen = String::new();
            wait_for(&sink, "ready-2", &mut seen).await;
            cancel.cancel();

            let result = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
            assert!(result.is_ok(), "{:?}", result);
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        async fn client_ignoring_sigterm_is_killed_after_grace() {
            let sink = LogSink::new();
            let redirect = LogRedirect::new(&sink, "trace");
            let cancel = CancellationToken::new();

            let task = tokio::spawn(
                shell()
                    .with_stop_grace(Duration::from_millis(200))
                    .run(cancel.clone(), "trap '' TERM; echo ready-$((1+1)); while true; do sleep 0.1; done".to_string())
                    .with_subscriber(redirect.dispatch().clone()),
            );

            let mut seen = String::new();
            wait_for(&sink, "ready-2", &mut seen).await;
            cancel.cancel();

            let result = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
            assert!(result.is_ok(), "{:?}", result);

            seen.push_str(&sink.drain_string());
            assert!(seen.contains("client ignored SIGTERM"), "{}", seen);
        }

        #[tokio::test]
        async fn failing_client_is_reported() {
            let result = shell().run(CancellationToken::new(), "exit 3".to_string()).await;

            match result {
                Err(ProcessWorkerError::ExitedWithFailure(status)) => assert_eq!(status.code(), Some(3)),
                other => panic!("unexpected result: {:?}", other),
            }
        }

        #[tokio::test]
        async fn missing_binary_fails_to_spawn() {
            let result = ProcessWorker::new("/nonexistent/frpc")
                .run(CancellationToken::new(), "frpc.toml".to_string())
                .await;

            assert!(matches!(result, Err(ProcessWorkerError::FailedToSpawn { .. })), "{:?}", result);
        }
    }
}
