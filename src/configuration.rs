//! Config for the duel server and the sandbox
//!
//! Configuration can be created programmatically using [`Configuration::new()`] or by reading
//! environment variables using [`Configuration::from_env()`].
//!
//! # Environment Variables
//!
//! All values are optional. Unset or unparsable values keep the default. Set a flag to
//! `"true"` (case-insensitive) to enable it.
//!
//! - `DUEL_LOG` — Enable logging to a file (default: `false`)
//! - `DUEL_LOG_LEVEL` — Most verbose level written, `error` to `trace` (default: `debug`)
//! - `DUEL_LOG_DIR` — Directory receiving the log file (default: current directory)
//! - `DUEL_ALLOW_UNCONTAINED` — Run submissions even if cgroups are unavailable (default: `true`)
//! - `DUEL_COMPILER` — Compiler invoked on the generated source (default: `gcc`)
//! - `DUEL_WORK_DIR` — Directory for temporary sources and binaries (default: OS temp dir)
//! - `DUEL_MAX_CODE_LENGTH` — Maximum submission length in characters (default: `10000`)
//! - `DUEL_MEMORY_LIMIT_MB` — Memory ceiling of a submission (default: `50`)
//! - `DUEL_CPU_TIME_LIMIT_SECS` — CPU-time ceiling of a submission (default: `2`)
//! - `DUEL_TIME_LIMIT_SECS` — Wall-clock limit when none is given by a problem (default: `2`)
//! - `DUEL_OUTPUT_LIMIT_KB` — Captured bytes per output stream (default: `1024`)
//! - `DUEL_MAX_CONCURRENT_RUNS` — Parallel compile+run jobs (default: physical CPU count)
//! - `DUEL_TTL_SECS` — Inactivity window after which an active duel is abandoned (default: `600`)
//! - `DUEL_LONG_POLL_SECS` — Maximum wait of a long-poll duel read (default: `30`)
//! - `DUEL_LONG_POLL_INTERVAL_MS` — Reread interval of a long-poll duel read (default: `250`)

use std::{path::PathBuf, str::FromStr, time::Duration};

use tracing::Level;

/// Configuration of the duel server and the sandbox runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub(crate) log: bool,
    pub(crate) log_level: Level,
    pub(crate) log_dir: PathBuf,
    pub(crate) allow_uncontained: bool,
    pub(crate) compiler: String,
    pub(crate) work_dir: PathBuf,
    pub(crate) max_code_length: usize,
    pub(crate) memory_limit: u64,
    pub(crate) cpu_time_limit: Duration,
    pub(crate) default_time_limit: Duration,
    pub(crate) output_limit: usize,
    pub(crate) max_concurrent_runs: usize,
    pub(crate) duel_ttl: Duration,
    pub(crate) long_poll_timeout: Duration,
    pub(crate) long_poll_interval: Duration,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - Logging to file is disabled. When enabled, `debug` and above go to the current
    ///   directory.
    /// - Submissions still run (time limits only) when cgroups are unavailable.
    /// - Sources are compiled with `gcc` inside the OS temp directory.
    /// - Submissions are limited to 10 000 characters, 50 MB of memory and 2 s of CPU.
    /// - Each output stream is captured up to 1 MiB.
    /// - One compile+run job per physical CPU.
    /// - Active duels are abandoned after 10 minutes without progress.
    /// - Long-poll reads wait up to 30 s.
    pub fn new() -> Self {
        Self {
            log: false,
            log_level: Level::DEBUG,
            log_dir: PathBuf::from("."),
            allow_uncontained: true,
            compiler: "gcc".to_owned(),
            work_dir: std::env::temp_dir(),
            max_code_length: 10_000,
            memory_limit: 50 * 1024 * 1024,
            cpu_time_limit: Duration::from_secs(2),
            default_time_limit: Duration::from_secs(2),
            output_limit: 1024 * 1024,
            max_concurrent_runs: num_cpus::get_physical().max(1),
            duel_ttl: Duration::from_secs(10 * 60),
            long_poll_timeout: Duration::from_secs(30),
            long_poll_interval: Duration::from_millis(250),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// See the [module documentation](self) for the list of recognized variables.
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        fn parse<T: FromStr>(var: &str) -> Option<T> {
            std::env::var(var).ok()?.trim().parse().ok()
        }

        let default = Self::new();
        Self {
            log: get_env_flag("DUEL_LOG", default.log),
            log_level: parse("DUEL_LOG_LEVEL").unwrap_or(default.log_level),
            log_dir: std::env::var_os("DUEL_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.log_dir),
            allow_uncontained: get_env_flag("DUEL_ALLOW_UNCONTAINED", default.allow_uncontained),
            compiler: std::env::var("DUEL_COMPILER").unwrap_or(default.compiler),
            work_dir: std::env::var_os("DUEL_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.work_dir),
            max_code_length: parse("DUEL_MAX_CODE_LENGTH").unwrap_or(default.max_code_length),
            memory_limit: parse::<u64>("DUEL_MEMORY_LIMIT_MB")
                .map(|mb| mb * 1024 * 1024)
                .unwrap_or(default.memory_limit),
            cpu_time_limit: parse("DUEL_CPU_TIME_LIMIT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.cpu_time_limit),
            default_time_limit: parse("DUEL_TIME_LIMIT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.default_time_limit),
            output_limit: parse::<usize>("DUEL_OUTPUT_LIMIT_KB")
                .map(|kb| kb * 1024)
                .unwrap_or(default.output_limit),
            max_concurrent_runs: parse::<usize>("DUEL_MAX_CONCURRENT_RUNS")
                .filter(|n| *n > 0)
                .unwrap_or(default.max_concurrent_runs),
            duel_ttl: parse("DUEL_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.duel_ttl),
            long_poll_timeout: parse("DUEL_LONG_POLL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.long_poll_timeout),
            long_poll_interval: parse("DUEL_LONG_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(default.long_poll_interval),
        }
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Set the most verbose level written to the log file.
    pub fn with_log_level(mut self, level: Level) -> Self {
        self.log_level = level;
        self
    }

    /// Set the directory receiving the log file. It is created if missing.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    /// Allow or refuse running submissions when cgroup containment cannot be set up.
    ///
    /// When allowed, only the wall-clock and CPU-time limits are enforced in that case.
    pub fn with_allow_uncontained(mut self, value: bool) -> Self {
        self.allow_uncontained = value;
        self
    }

    /// Set the compiler command (looked up in `PATH` if not a path).
    pub fn with_compiler(mut self, compiler: impl Into<String>) -> Self {
        self.compiler = compiler.into();
        self
    }

    /// Set the directory receiving temporary sources and binaries.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    /// Set the maximum submission length, in characters.
    pub fn with_max_code_length(mut self, max: usize) -> Self {
        self.max_code_length = max;
        self
    }

    /// Set the memory ceiling of a running submission, in MB.
    pub fn with_memory_limit_mb(mut self, mb: u64) -> Self {
        self.memory_limit = mb * 1024 * 1024;
        self
    }

    /// Set the CPU-time ceiling of a running submission.
    pub fn with_cpu_time_limit(mut self, limit: Duration) -> Self {
        self.cpu_time_limit = limit;
        self
    }

    /// Set the wall-clock limit used when the caller does not provide one.
    pub fn with_default_time_limit(mut self, limit: Duration) -> Self {
        self.default_time_limit = limit;
        self
    }

    /// Set how many bytes of stdout (and of stderr) are kept.
    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit = bytes;
        self
    }

    /// Set how many compile+run jobs may execute at the same time. Zero is clamped to one.
    pub fn with_max_concurrent_runs(mut self, max: usize) -> Self {
        self.max_concurrent_runs = max.max(1);
        self
    }

    /// Set the inactivity window after which an active duel is abandoned.
    pub fn with_duel_ttl(mut self, ttl: Duration) -> Self {
        self.duel_ttl = ttl;
        self
    }

    /// Set the maximum wait and the reread interval of long-poll duel reads.
    pub fn with_long_poll(mut self, timeout: Duration, interval: Duration) -> Self {
        self.long_poll_timeout = timeout;
        self.long_poll_interval = interval;
        self
    }

    /// Most verbose level written to the log file.
    pub fn log_level(&self) -> Level {
        self.log_level
    }

    /// Inactivity window after which an active duel is abandoned.
    pub fn duel_ttl(&self) -> Duration {
        self.duel_ttl
    }

    /// Wall-clock limit used when the caller does not provide one.
    pub fn default_time_limit(&self) -> Duration {
        self.default_time_limit
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documentation() {
        let config = Configuration::new();
        assert!(!config.log);
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.log_dir, PathBuf::from("."));
        assert!(config.allow_uncontained);
        assert_eq!(config.compiler, "gcc");
        assert_eq!(config.max_code_length, 10_000);
        assert_eq!(config.memory_limit, 50 * 1024 * 1024);
        assert_eq!(config.duel_ttl, Duration::from_secs(600));
        assert_eq!(config.long_poll_timeout, Duration::from_secs(30));
        assert!(config.max_concurrent_runs >= 1);
    }

    #[test]
    fn builder_overrides() {
        let config = Configuration::new()
            .with_compiler("cc")
            .with_log_level(Level::WARN)
            .with_log_dir("/var/log/duel")
            .with_memory_limit_mb(16)
            .with_max_concurrent_runs(0)
            .with_duel_ttl(Duration::from_secs(5));
        assert_eq!(config.compiler, "cc");
        assert_eq!(config.log_level(), Level::WARN);
        assert_eq!(config.log_dir, PathBuf::from("/var/log/duel"));
        assert_eq!(config.memory_limit, 16 * 1024 * 1024);
        assert_eq!(config.max_concurrent_runs, 1);
        assert_eq!(config.duel_ttl(), Duration::from_secs(5));
    }
}
