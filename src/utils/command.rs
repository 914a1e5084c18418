//! Command execution primitives with consistent error handling.
//!
//! `run_relayed` is the one place where a child process is spawned with piped
//! stdio and its output relayed while it runs. Both the phase runner (local
//! shell) and the SSH client (remote invocation) go through it.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus, Output, Stdio};
use std::thread;

use crate::error::{Error, Result};

/// Copy `reader` to `writer` one line at a time, flushing after every line.
///
/// Bytes are passed through untouched, so non-UTF-8 output survives the relay.
pub fn relay_lines<R: Read, W: Write>(reader: R, mut writer: W) -> io::Result<u64> {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    let mut total = 0u64;

    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            break;
        }
        writer.write_all(&line)?;
        writer.flush()?;
        total += n as u64;
    }

    Ok(total)
}

/// Spawn `cmd`, optionally feed `stdin_script` to it, and relay its stdout and
/// stderr to this process's stdout and stderr as lines arrive.
///
/// Both relays are joined before the child is waited on, so nothing still
/// sitting in a pipe is lost when the child exits. The stdin writer runs on
/// its own thread so a full stdout pipe cannot block it.
///
/// Returns the child's exit code (128 + signal number when killed by a signal).
pub fn run_relayed(mut cmd: Command, stdin_script: Option<String>, context: &str) -> Result<i32> {
    cmd.stdin(if stdin_script.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| {
        Error::internal_io(
            format!("Failed to start {}: {}", context, e),
            Some(context.to_string()),
        )
    })?;

    let writer = match (stdin_script, child.stdin.take()) {
        (Some(script), Some(mut stdin)) => Some(thread::spawn(move || {
            // A child that exits early closes the pipe; its status reports why.
            match stdin.write_all(script.as_bytes()) {
                Err(e) if e.kind() != io::ErrorKind::BrokenPipe => {
                    eprintln!("ERROR Writing commands to shell: {}", e);
                }
                _ => {}
            }
        })),
        _ => None,
    };

    let stdout_relay = child.stdout.take().map(|out| {
        thread::spawn(move || {
            if let Err(e) = relay_lines(out, io::stdout()) {
                eprintln!("ERROR writing output: {}", e);
            }
        })
    });

    let stderr_relay = child.stderr.take().map(|err| {
        thread::spawn(move || {
            if let Err(e) = relay_lines(err, io::stderr()) {
                eprintln!("ERROR writing stderr: {}", e);
            }
        })
    });

    for relay in [stdout_relay, stderr_relay].into_iter().flatten() {
        relay.join().map_err(|_| {
            Error::internal_unexpected(format!("{}: output relay panicked", context))
        })?;
    }

    if let Some(writer) = writer {
        writer.join().map_err(|_| {
            Error::internal_unexpected(format!("{}: stdin writer panicked", context))
        })?;
    }

    let status = child.wait().map_err(|e| {
        Error::internal_io(
            format!("Failed to wait for {}: {}", context, e),
            Some(context.to_string()),
        )
    })?;

    Ok(exit_code(status))
}

/// Numeric exit code for a finished process.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => -1,
    }
}

/// Extract error text from command output.
///
/// Prefers stderr, falls back to stdout if stderr is empty.
pub fn error_text(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        stderr.trim().to_string()
    } else {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn relay_lines_copies_every_byte() {
        let input = b"one\ntwo\n\xffpartial".to_vec();
        let mut out = Vec::new();

        let n = relay_lines(Cursor::new(input.clone()), &mut out).unwrap();

        assert_eq!(n, input.len() as u64);
        assert_eq!(out, input);
    }

    #[test]
    fn run_relayed_returns_exit_code() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo relayed; exit 7"]);

        assert_eq!(run_relayed(cmd, None, "test").unwrap(), 7);
    }

    #[test]
    fn run_relayed_feeds_stdin() {
        let cmd = Command::new("sh");
        let script = "echo from-stdin\nexit 0\n".to_string();

        assert_eq!(run_relayed(cmd, Some(script), "test").unwrap(), 0);
    }

    #[test]
    fn run_relayed_fails_for_missing_program() {
        let cmd = Command::new("nonexistent_program_xyz");
        let err = run_relayed(cmd, None, "missing").unwrap_err();
        assert_eq!(err.code.as_str(), "internal.io_error");
    }

    #[test]
    fn error_text_prefers_stderr() {
        let output = Output {
            status: ExitStatus::default(),
            stdout: b"stdout content".to_vec(),
            stderr: b"stderr content".to_vec(),
        };
        assert_eq!(error_text(&output), "stderr content");
    }

    #[test]
    fn error_text_falls_back_to_stdout() {
        let output = Output {
            status: ExitStatus::default(),
            stdout: b"stdout content".to_vec(),
            stderr: b"".to_vec(),
        };
        assert_eq!(error_text(&output), "stdout content");
    }
}
