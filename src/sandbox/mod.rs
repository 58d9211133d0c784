//! Compiles untrusted code into a harness and runs it under strict limits.
//!
//! [`SandboxRunner::execute`] turns every outcome into a [`Verdict`]: invalid input, a missing
//! harness, compiler diagnostics, crashes, timeouts, memory exhaustion and internal failures
//! all come back as data, never as an error.
//!
//! A run goes through these steps:
//!
//! 1. The code is checked (non-empty, under the configured length).
//! 2. The harness is read and must contain exactly one [`USER_CODE_MARKER`].
//! 3. The code replaces the marker and the result is written to a uniquely named file in the
//!    work directory.
//! 4. The configured compiler builds it. A non-zero exit gives a `compilation_error` carrying
//!    the compiler's stderr verbatim.
//! 5. The binary runs in its own cgroup (memory and process-count ceilings) with a CPU-time
//!    rlimit and a wall-clock deadline. Without cgroup support the run continues with rlimits
//!    only, unless the configuration refuses uncontained runs.
//! 6. Stdout is parsed by [`output_parser::parse`] and classified.
//!
//! The source and the binary are deleted when the run ends, whatever the outcome.

use std::{
    io::{self, Read},
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::Context;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    cgroup_manager::{LimitedProcess, ProcessLimits},
    configuration::Configuration,
    verdict::{Verdict, VerdictStatus},
};

use self::artifacts::Artifacts;

mod artifacts;
pub mod output_parser;

/// Placeholder of a harness template replaced by the submitted code.
pub const USER_CODE_MARKER: &str = "{user_code}";

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const CLEANUP_DURATION: Duration = Duration::from_millis(500);
const MAX_PROCESSES: i64 = 8;

/// Something able to judge a submission against a harness.
///
/// The duel lifecycle only depends on this trait, so it can be tested without a compiler.
pub trait Judge: Send + Sync {
    /// Judge `code` against the harness at `harness`, running at most `time_limit`.
    fn judge(&self, code: &str, harness: &Path, time_limit: Duration) -> Verdict;
}

/// The sandbox. Stateless apart from a pool of run slots, so one instance serves every
/// request.
#[derive(Debug)]
pub struct SandboxRunner {
    compiler: String,
    work_dir: PathBuf,
    max_code_length: usize,
    output_limit: usize,
    allow_uncontained: bool,
    limits: ProcessLimits,
    slots: RunSlots,
    containment_warned: AtomicBool,
}

impl SandboxRunner {
    /// Create a runner from the sandbox part of `config`.
    pub fn new(config: &Configuration) -> SandboxRunner {
        SandboxRunner {
            compiler: config.compiler.clone(),
            work_dir: config.work_dir.clone(),
            max_code_length: config.max_code_length,
            output_limit: config.output_limit,
            allow_uncontained: config.allow_uncontained,
            limits: ProcessLimits {
                memory_bytes: config.memory_limit,
                cpu_time: config.cpu_time_limit,
                max_processes: MAX_PROCESSES,
            },
            slots: RunSlots::new(config.max_concurrent_runs),
            containment_warned: AtomicBool::new(false),
        }
    }

    /// Judge `code` against the harness template at `harness`.
    ///
    /// Blocks for the compilation plus at most `time_limit` of execution (and the wait for a
    /// free run slot).
    #[instrument(
        skip(self, code, harness),
        fields(harness = %harness.display(), code_len = code.len())
    )]
    pub fn execute(&self, code: &str, harness: &Path, time_limit: Duration) -> Verdict {
        if let Err(verdict) = self.validate_code(code) {
            return verdict;
        }
        let harness_code = match load_harness(harness) {
            Ok(harness_code) => harness_code,
            Err(verdict) => return verdict,
        };
        let full_code = harness_code.replacen(USER_CODE_MARKER, code, 1);

        let _slot = self.slots.acquire();
        let artifacts = Artifacts::new(&self.work_dir);
        let verdict = match self.compile_and_run(&full_code, &artifacts, time_limit) {
            Ok(verdict) => verdict,
            Err(e) => {
                error!("judging failed: {e:#}");
                Verdict::error(format!("Unexpected error: {e:#}"))
            }
        };
        info!(status = %verdict.status, "submission judged");
        verdict
    }

    fn validate_code(&self, code: &str) -> Result<(), Verdict> {
        if code.is_empty() {
            return Err(Verdict::error("Invalid code submission."));
        }
        if code.chars().count() > self.max_code_length {
            return Err(Verdict::error(format!(
                "Code exceeds maximum length of {} characters.",
                self.max_code_length
            )));
        }
        Ok(())
    }

    fn compile_and_run(
        &self,
        full_code: &str,
        artifacts: &Artifacts,
        time_limit: Duration,
    ) -> anyhow::Result<Verdict> {
        std::fs::write(artifacts.source(), full_code).with_context(|| {
            format!("could not write source to '{}'", artifacts.source().display())
        })?;

        if let Some(diagnostics) = self.compile(artifacts)? {
            debug!("compilation failed");
            return Ok(Verdict::single(VerdictStatus::CompilationError, diagnostics));
        }

        self.run(artifacts.binary(), time_limit)
    }

    /// Returns the compiler's stderr if compilation failed.
    fn compile(&self, artifacts: &Artifacts) -> anyhow::Result<Option<String>> {
        let output = Command::new(&self.compiler)
            .arg(artifacts.source())
            .arg("-o")
            .arg(artifacts.binary())
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("could not launch compiler '{}'", self.compiler))?;

        if output.status.success() {
            Ok(None)
        } else {
            Ok(Some(String::from_utf8_lossy(&output.stderr).into_owned()))
        }
    }

    fn run(&self, binary: &Path, time_limit: Duration) -> anyhow::Result<Verdict> {
        let mut process = match LimitedProcess::launch(binary, &self.limits) {
            Ok(process) => process,
            Err(e) if self.allow_uncontained => {
                if !self.containment_warned.swap(true, Ordering::Relaxed) {
                    warn!("cgroup containment unavailable, running with rlimits only: {e:#}");
                } else {
                    debug!("cgroup containment unavailable: {e:#}");
                }
                LimitedProcess::launch_without_container(binary, &self.limits)?
            }
            Err(e) => return Ok(Verdict::error(format!("Sandbox unavailable: {e:#}"))),
        };
        let contained = process.is_contained();

        let stdout = CappedReader::spawn(process.child.stdout.take(), self.output_limit);
        let stderr = CappedReader::spawn(process.child.stderr.take(), self.output_limit);

        let status = wait_with_deadline(&mut process, time_limit)?;
        if let Err(e) = process.try_kill(CLEANUP_DURATION) {
            warn!("could not release sandboxed process: {e:#}");
        }

        // a descendant that escaped the kill may keep the pipes open, never wait for it
        let readers_deadline = Instant::now() + CLEANUP_DURATION;
        let stdout = stdout.collect(readers_deadline);
        let stderr = stderr.collect(readers_deadline);

        let outcome = RunOutcome {
            exit_code: status.and_then(|s| s.code()),
            signal: status.as_ref().and_then(terminating_signal),
            timed_out: status.is_none(),
            contained,
            output_truncated: stdout.truncated || stderr.truncated,
            stdout: stdout.text(),
            stderr: stderr.text(),
        };

        Ok(classify(&outcome, time_limit, &self.limits, self.output_limit))
    }
}

impl Judge for SandboxRunner {
    fn judge(&self, code: &str, harness: &Path, time_limit: Duration) -> Verdict {
        self.execute(code, harness, time_limit)
    }
}

fn load_harness(harness: &Path) -> Result<String, Verdict> {
    if !harness.exists() {
        return Err(Verdict::error("Runner file not found."));
    }
    let harness_code = std::fs::read_to_string(harness)
        .map_err(|e| Verdict::error(format!("Error reading runner file: {e}")))?;

    match harness_code.matches(USER_CODE_MARKER).count() {
        1 => Ok(harness_code),
        0 => Err(Verdict::error(format!(
            "Placeholder {USER_CODE_MARKER} not in runner file."
        ))),
        n => Err(Verdict::error(format!(
            "Placeholder {USER_CODE_MARKER} appears {n} times in runner file."
        ))),
    }
}

/// `None` means the deadline expired first.
fn wait_with_deadline(
    process: &mut LimitedProcess,
    time_limit: Duration,
) -> anyhow::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + time_limit;
    loop {
        if let Some(status) = process.child.try_wait().context("could not wait for process")? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Background reader of one output stream.
///
/// Keeps up to `cap` bytes and drains the rest, so the child never blocks on a full pipe.
struct CappedReader {
    captured: Arc<Mutex<Captured>>,
    handle: Option<JoinHandle<()>>,
}

impl CappedReader {
    fn spawn<R: Read + Send + 'static>(stream: Option<R>, cap: usize) -> CappedReader {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let handle = stream.map(|mut stream| {
            let captured = captured.clone();
            thread::spawn(move || {
                let mut chunk = [0; 8192];
                loop {
                    let n = match stream.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => n,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(_) => break,
                    };
                    let mut captured = captured.lock().unwrap_or_else(PoisonError::into_inner);
                    let room = cap.saturating_sub(captured.bytes.len());
                    if n > room {
                        captured.truncated = true;
                    }
                    captured.bytes.extend_from_slice(&chunk[..n.min(room)]);
                }
            })
        });
        CappedReader { captured, handle }
    }

    /// What was read by `deadline`. A reader still running then is left detached.
    fn collect(self, deadline: Instant) -> Captured {
        if let Some(handle) = self.handle {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(POLL_INTERVAL);
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                debug!("output pipe still open after the run, detaching its reader");
            }
        }
        let mut captured = self.captured.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *captured)
    }
}

#[cfg(unix)]
fn terminating_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn terminating_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RunOutcome {
    exit_code: Option<i32>,
    signal: Option<i32>,
    timed_out: bool,
    contained: bool,
    output_truncated: bool,
    stdout: String,
    stderr: String,
}

#[cfg(unix)]
const SIGXCPU: Option<i32> = Some(libc::SIGXCPU);
#[cfg(not(unix))]
const SIGXCPU: Option<i32> = None;
#[cfg(unix)]
const SIGKILL: Option<i32> = Some(libc::SIGKILL);
#[cfg(not(unix))]
const SIGKILL: Option<i32> = None;

fn classify(
    outcome: &RunOutcome,
    time_limit: Duration,
    limits: &ProcessLimits,
    output_limit: usize,
) -> Verdict {
    if outcome.timed_out {
        return Verdict::single(
            VerdictStatus::Timeout,
            format!(
                "Execution timed out after {} seconds.",
                time_limit.as_secs_f64()
            ),
        );
    }

    let cpu_exceeded = Verdict::single(
        VerdictStatus::Timeout,
        format!(
            "CPU time limit of {} seconds exceeded.",
            limits.cpu_time.as_secs_f64()
        ),
    );
    if outcome.signal.is_some() && outcome.signal == SIGXCPU {
        return cpu_exceeded;
    }
    if outcome.signal.is_some() && outcome.signal == SIGKILL {
        // the runner never sends SIGKILL before the process exited on its own: inside a cgroup
        // it comes from the OOM killer, outside from the hard CPU rlimit
        return if outcome.contained {
            Verdict::single(
                VerdictStatus::MemoryError,
                format!(
                    "Memory limit exceeded ({}MB)",
                    limits.memory_bytes / 1024 / 1024
                ),
            )
        } else {
            cpu_exceeded
        };
    }

    if outcome.output_truncated {
        return Verdict::single(
            VerdictStatus::RuntimeError,
            format!("Output limit exceeded ({output_limit} bytes)."),
        );
    }

    let tests = output_parser::parse(&outcome.stdout);
    if !tests.is_empty() {
        let status = if outcome.exit_code == Some(0) {
            VerdictStatus::Success
        } else {
            VerdictStatus::TestFailed
        };
        return Verdict::with_tests(status, tests);
    }

    if !outcome.stderr.is_empty() {
        return Verdict::single(VerdictStatus::RuntimeError, outcome.stderr.clone());
    }
    if let Some(signal) = outcome.signal {
        return Verdict::single(
            VerdictStatus::RuntimeError,
            format!("Program terminated by signal {signal}."),
        );
    }
    Verdict::error("Unexpected program behavior")
}

/// Counting semaphore bounding concurrent compile+run jobs.
#[derive(Debug)]
struct RunSlots {
    available: Mutex<usize>,
    freed: Condvar,
}

struct RunSlot<'a>(&'a RunSlots);

impl RunSlots {
    fn new(count: usize) -> RunSlots {
        RunSlots {
            available: Mutex::new(count.max(1)),
            freed: Condvar::new(),
        }
    }

    fn acquire(&self) -> RunSlot<'_> {
        let mut available = self
            .available
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *available == 0 {
            available = self
                .freed
                .wait(available)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *available -= 1;
        RunSlot(self)
    }
}

impl Drop for RunSlot<'_> {
    fn drop(&mut self) {
        let mut available = self
            .0
            .available
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *available += 1;
        self.0.freed.notify_one();
    }
}
