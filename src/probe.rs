//! Probe execution: audit commands through `sh -c` with a bounded wait, and
//! plain file reads for `audit_file` probes.

use crate::model::Probe;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// What a probe produced. A probe that ran is always `Completed`, whatever
/// its exit status; `Unavailable` means the actual value could not be
/// determined at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Completed { output: String, exit_code: Option<i32> },
    Unavailable { reason: String, output: String },
}

pub trait Prober {
    fn run(&self, probe: &Probe) -> ProbeOutcome;
}

#[derive(Debug, Clone)]
pub struct ShellProber {
    shell: String,
    timeout: Duration,
}

impl Default for ShellProber {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }
}

impl ShellProber {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { shell: "/bin/sh".into(), timeout }
    }

    fn run_command(&self, audit: &str) -> ProbeOutcome {
        if audit.trim().is_empty() {
            return unavailable("no audit command", String::new());
        }

        let mut command = Command::new(&self.shell);
        command.arg("-c").arg(audit).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Leads its own process group so a kill reaches the whole pipeline.
            command.process_group(0);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => return unavailable(format!("failed to start {}: {}", self.shell, e), String::new()),
        };

        // Drain both pipes while waiting so a chatty probe can't block on a full pipe.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match child.wait_timeout(self.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                // Readers are left detached: a process that left the group may still hold the pipes open.
                kill(&mut child);
                warn!(audit, timeout = ?self.timeout, "probe timed out");
                return unavailable(format!("timed out after {}", humantime::format_duration(self.timeout)), String::new());
            }
            Err(e) => {
                kill(&mut child);
                return unavailable(format!("failed waiting for probe: {}", e), join(stdout));
            }
        };

        let output = join(stdout);
        let errors = join(stderr);
        if !errors.trim().is_empty() {
            debug!(audit, stderr = %errors.trim(), "probe wrote to stderr");
        }

        match status.code() {
            Some(code @ (126 | 127)) => {
                let reason = if errors.trim().is_empty() {
                    format!("command could not be executed (exit {})", code)
                } else {
                    errors.trim().to_string()
                };
                unavailable(reason, output)
            }
            exit_code => ProbeOutcome::Completed { output, exit_code },
        }
    }

    fn read_file(&self, path: &str) -> ProbeOutcome {
        let path = path.trim();
        if path.is_empty() {
            return unavailable("no file to inspect", String::new());
        }
        match std::fs::read_to_string(path) {
            Ok(content) => ProbeOutcome::Completed { output: content, exit_code: None },
            Err(e) => unavailable(format!("{}: {}", path, e), String::new()),
        }
    }
}

impl Prober for ShellProber {
    fn run(&self, probe: &Probe) -> ProbeOutcome {
        match probe {
            Probe::Command { audit } => self.run_command(audit),
            Probe::File { audit_file } => self.read_file(audit_file),
        }
    }
}

fn unavailable(reason: impl Into<String>, output: String) -> ProbeOutcome {
    ProbeOutcome::Unavailable { reason: reason.into(), output }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut r| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = r.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn kill(child: &mut Child) {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        let signalled = Command::new("kill")
            .args(["-KILL", "--", &group])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(e) = signalled {
            debug!(group = %group, error = %e, "could not signal probe process group");
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}
