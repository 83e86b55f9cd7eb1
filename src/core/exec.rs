//! Bounded execution of external tools (`psql`, `aws`).

use crate::core::error::CoraError;
use std::io::{ErrorKind, Read};
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Run `cmd` to completion or kill it at `timeout`.
///
/// A missing executable maps to `ValidatorUnavailable` for `validator`; an
/// expired deadline maps to `IntrospectionTimeout`.
pub fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    validator: &str,
    operation: &str,
) -> Result<Output, CoraError> {
    let program = cmd.get_program().to_string_lossy().to_string();
    debug!(%program, operation, timeout_secs = timeout.as_secs(), "spawning external command");

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => {
                CoraError::unavailable(validator, format!("'{}' is not installed", program))
            }
            _ => CoraError::IoError(e),
        })?;

    // Drain pipes on helper threads so a chatty child cannot block on a full
    // pipe while we poll.
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let out_reader = thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(s) = stdout.as_mut() {
            let _ = s.read_to_end(&mut buf);
        }
        buf
    });
    let err_reader = thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(s) = stderr.as_mut() {
            let _ = s.read_to_end(&mut buf);
        }
        buf
    });

    let start = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if start.elapsed() >= timeout {
            warn!(%program, operation, "external command exceeded deadline, killing");
            let _ = child.kill();
            let _ = child.wait();
            return Err(CoraError::IntrospectionTimeout {
                operation: operation.to_string(),
                timeout,
            });
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = out_reader.join().unwrap_or_default();
    let stderr = err_reader.join().unwrap_or_default();
    Ok(Output {
        status,
        stdout,
        stderr,
    })
}
