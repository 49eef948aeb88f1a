use anyhow::{Context, Result};
use indicatif::ProgressBar;
use provision::{CommandOutput, CommandRunner, CommandSpec, RunLimits};
use std::io::{Read, Write};
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often a running child is polled for exit and timeout
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs engine commands as real processes
///
/// Output is captured, never shown live; while a command runs the runner
/// logs a heartbeat and refreshes the spinner every `limits.heartbeat`.
#[derive(Default)]
pub struct SystemRunner {
    spinner: Option<ProgressBar>,
}

impl SystemRunner {
    /// Show elapsed time of long commands on `spinner`
    pub fn with_spinner(spinner: ProgressBar) -> Self {
        Self {
            spinner: Some(spinner),
        }
    }

    fn heartbeat(&self, spec: &CommandSpec, elapsed: Duration) {
        log::info!("Still running `{spec}` ({}s)", elapsed.as_secs());
        if let Some(spinner) = &self.spinner {
            spinner.set_message(format!("{} ({}s)", spec.program, elapsed.as_secs()));
        }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec, limits: &RunLimits) -> Result<CommandOutput> {
        log::debug!("exec: {spec}");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group, so a terminal Ctrl-C only reaches rootstrap
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to execute: {spec}"))?;

        let writer = match (child.stdin.take(), spec.stdin.clone()) {
            (Some(mut stdin), Some(input)) => {
                Some(thread::spawn(move || stdin.write_all(input.as_bytes())))
            }
            _ => None,
        };
        let stdout = child.stdout.take().map(capture);
        let stderr = child.stderr.take().map(capture);

        let started = Instant::now();
        let mut last_beat = started;
        let mut timed_out = false;

        let status = loop {
            if let Some(status) = child.try_wait().context("Failed to wait for command")? {
                break Some(status);
            }

            let elapsed = started.elapsed();
            if let Some(timeout) = limits.timeout
                && elapsed >= timeout
            {
                log::warn!("Killing `{spec}` after {}s", timeout.as_secs());
                if let Err(e) = child.kill() {
                    log::debug!("kill failed: {e}");
                }
                child.wait().context("Failed to reap killed command")?;
                timed_out = true;
                break None;
            }

            if last_beat.elapsed() >= limits.heartbeat {
                last_beat = Instant::now();
                self.heartbeat(spec, elapsed);
            }
            thread::sleep(POLL_INTERVAL);
        };

        if let Some(writer) = writer
            && let Ok(Err(e)) = writer.join()
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            log::debug!("Failed to write stdin of `{spec}`: {e}");
        }

        let output = CommandOutput {
            exit_code: status.and_then(|s| s.code()),
            stdout: collect(stdout),
            stderr: collect(stderr),
            timed_out,
        };
        log::debug!(
            "`{}` finished with {:?} in {:.1}s",
            spec.program,
            output.exit_code,
            started.elapsed().as_secs_f64()
        );
        Ok(output)
    }
}

fn capture<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = reader.read_to_end(&mut buf) {
            log::debug!("Failed to read command output: {e}");
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

/// Run a command and capture output
pub fn run_capture(cmd: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(cmd)
        .args(args)
        .output()
        .with_context(|| format!("Failed to execute: {} {}", cmd, args.join(" ")))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("Command failed: {}", stderr.trim())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(timeout: Option<Duration>) -> RunLimits {
        RunLimits {
            timeout,
            heartbeat: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_captures_output_and_exit_code() {
        let spec = CommandSpec::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]);
        let output = SystemRunner::default().run(&spec, &limits(None)).unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert!(!output.timed_out);
        assert!(!output.succeeded(&spec));
        assert!(output.succeeded(&spec.clone().allow_exit_code(3)));
    }

    #[test]
    fn test_feeds_stdin() {
        let spec = CommandSpec::new("cat").stdin("127.0.1.1 box\n");
        let output = SystemRunner::default().run(&spec, &limits(None)).unwrap();
        assert_eq!(output.stdout, "127.0.1.1 box\n");
    }

    #[test]
    fn test_kills_on_timeout() {
        let spec = CommandSpec::new("sleep").arg("5");
        let started = Instant::now();
        let output = SystemRunner::default()
            .run(&spec, &limits(Some(Duration::from_millis(300))))
            .unwrap();
        assert!(output.timed_out);
        assert_eq!(output.exit_code, None);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_missing_program_is_an_error() {
        let spec = CommandSpec::new("rootstrap-no-such-program");
        assert!(SystemRunner::default().run(&spec, &limits(None)).is_err());
    }
}
