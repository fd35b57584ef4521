//! Drives the C ABI the way a mobile host does, for trying the library out on
//! a desktop: start, poll logs, stop.

use std::ffi::{CStr, CString, c_char};
use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use frpc_mobile::{FrpFreeString, FrpIsRunning, FrpLogs, FrpVersion, StartFrp, StopFrp};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct HostArgs {
    /// Client config passed through to frpc
    config: String,

    /// How often to drain the log buffer
    #[clap(long, default_value_t = 1000)]
    poll_ms: u64,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[clap(long)]
    run_for: Option<u64>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = HostArgs::parse();
    let mut console = console();

    let config = match CString::new(args.config) {
        Ok(config) => config,
        Err(_) => {
            let _ = writeln!(console, "config path contains a NUL byte");
            return ExitCode::FAILURE;
        }
    };

    let _ = writeln!(console, "{}", take_string(FrpVersion()));
    unsafe { StartFrp(config.as_ptr()) };

    let mut poll = tokio::time::interval(Duration::from_millis(args.poll_ms.max(10)));
    let run_for = args.run_for;
    let deadline = async move {
        match run_for {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(deadline, ctrl_c);

    loop {
        tokio::select! {
            _ = poll.tick() => {
                print_logs(&mut console);
                if FrpIsRunning() == 0 {
                    let _ = writeln!(console, "client is no longer running");
                    break;
                }
            }
            _ = &mut deadline => break,
            _ = &mut ctrl_c => break,
        }
    }

    StopFrp();
    tokio::time::sleep(Duration::from_millis(500)).await;
    print_logs(&mut console);

    ExitCode::SUCCESS
}

fn print_logs(console: &mut Box<dyn Write>) {
    let logs = take_string(FrpLogs());
    if !logs.is_empty() {
        let _ = console.write_all(logs.as_bytes());
        let _ = console.flush();
    }
}

fn take_string(ptr: *mut c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }

    let text = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
    unsafe { FrpFreeString(ptr) };
    text
}

/// The library takes over fd 1 once started, so keep a handle on the
/// original terminal to print to.
#[cfg(unix)]
fn console() -> Box<dyn Write> {
    use std::os::fd::AsFd;

    match std::io::stdout().as_fd().try_clone_to_owned() {
        Ok(fd) => Box::new(std::fs::File::from(fd)),
        Err(_) => Box::new(std::io::stdout()),
    }
}

#[cfg(not(unix))]
fn console() -> Box<dyn Write> {
    Box::new(std::io::stdout())
}
