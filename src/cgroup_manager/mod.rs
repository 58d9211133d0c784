#[cfg(target_os = "linux")]
mod cgroup_manager_linux;

#[cfg(target_os = "linux")]
pub use cgroup_manager_linux::*;

#[cfg(not(target_os = "linux"))]
mod cgroup_manager_stub;

#[cfg(not(target_os = "linux"))]
pub use cgroup_manager_stub::*;

use std::{
    path::Path,
    process::{Child, Command, Stdio},
    time::Duration,
};

use anyhow::Context;

/// OS-level ceilings of one sandboxed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessLimits {
    /// Memory ceiling in bytes.
    pub memory_bytes: u64,
    /// CPU-time ceiling. The process receives `SIGXCPU` once it is reached.
    pub cpu_time: Duration,
    /// Maximum number of tasks inside the cgroup.
    pub max_processes: i64,
}

/// Spawn `command` with piped stdout/stderr, an empty environment and the rlimits of `limits`.
///
/// The child leads a new session, so its whole process group can be killed at once.
/// `uncontained` additionally caps the address space and the number of processes, for runs
/// that have no cgroup.
pub(self) fn create_process(
    command: &Path,
    limits: &ProcessLimits,
    uncontained: bool,
) -> anyhow::Result<Child> {
    let mut cmd = Command::new(command);
    cmd.env_clear()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    rlimits::install(&mut cmd, rlimits::plan(limits, uncontained));
    #[cfg(not(unix))]
    {
        let _ = (limits, uncontained);
        tracing::warn!("rlimits are not supported on this platform, only the wall clock applies");
    }

    cmd.spawn()
        .with_context(|| format!("could not launch '{}'", command.display()))
}

/// Send `SIGKILL` to the process group led by `child`, descendants included.
///
/// An already empty group is not an error.
#[cfg(unix)]
pub(self) fn kill_process_group(child: &Child) -> anyhow::Result<()> {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        anyhow::bail!("pid {} out of range", child.id());
    };
    // SAFETY: killpg has no memory-safety preconditions.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err).context("could not kill process group")
    }
}

#[cfg(not(unix))]
pub(self) fn kill_process_group(_child: &Child) -> anyhow::Result<()> {
    Ok(())
}

#[cfg(unix)]
mod rlimits {
    use std::{os::unix::process::CommandExt, process::Command};

    use tracing::warn;

    use super::ProcessLimits;

    #[derive(Debug, Clone, Copy)]
    pub struct RlimitPlan {
        cpu: Option<(libc::rlim_t, libc::rlim_t)>,
        address_space: Option<libc::rlim_t>,
        processes: Option<libc::rlim_t>,
    }

    /// Work out which limits can be applied, warning about those that cannot.
    ///
    /// The child cannot log after `fork`, so every check happens here.
    pub fn plan(limits: &ProcessLimits, uncontained: bool) -> RlimitPlan {
        let cpu_secs = limits.cpu_time.as_secs_f64().ceil().max(1.0) as libc::rlim_t;
        // soft < hard: reaching the soft limit delivers SIGXCPU instead of SIGKILL
        let cpu = clamp_to_hard("RLIMIT_CPU", current_hard(Resource::Cpu), cpu_secs + 1)
            .map(|hard| (cpu_secs.min(hard), hard));

        let (address_space, processes) = if uncontained {
            (
                clamp_to_hard(
                    "RLIMIT_AS",
                    current_hard(Resource::AddressSpace),
                    limits.memory_bytes as libc::rlim_t,
                ),
                clamp_to_hard(
                    "RLIMIT_NPROC",
                    current_hard(Resource::Processes),
                    limits.max_processes.max(1) as libc::rlim_t,
                ),
            )
        } else {
            (None, None)
        };

        RlimitPlan {
            cpu,
            address_space,
            processes,
        }
    }

    pub fn install(cmd: &mut Command, plan: RlimitPlan) {
        // SAFETY: the closure only calls `setsid` and `setrlimit`, which are async-signal-safe.
        unsafe {
            cmd.pre_exec(move || {
                if libc::setsid() < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                if let Some((soft, hard)) = plan.cpu {
                    let limit = libc::rlimit {
                        rlim_cur: soft,
                        rlim_max: hard,
                    };
                    libc::setrlimit(libc::RLIMIT_CPU, &limit);
                }
                if let Some(bytes) = plan.address_space {
                    let limit = libc::rlimit {
                        rlim_cur: bytes,
                        rlim_max: bytes,
                    };
                    libc::setrlimit(libc::RLIMIT_AS, &limit);
                }
                if let Some(count) = plan.processes {
                    let limit = libc::rlimit {
                        rlim_cur: count,
                        rlim_max: count,
                    };
                    libc::setrlimit(libc::RLIMIT_NPROC, &limit);
                }
                let no_core = libc::rlimit {
                    rlim_cur: 0,
                    rlim_max: 0,
                };
                libc::setrlimit(libc::RLIMIT_CORE, &no_core);
                Ok(())
            });
        }
    }

    enum Resource {
        Cpu,
        AddressSpace,
        Processes,
    }

    fn current_hard(resource: Resource) -> Option<libc::rlim_t> {
        let mut limit = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        // SAFETY: `limit` is a valid, writable rlimit struct.
        let rc = unsafe {
            match resource {
                Resource::Cpu => libc::getrlimit(libc::RLIMIT_CPU, &mut limit),
                Resource::AddressSpace => libc::getrlimit(libc::RLIMIT_AS, &mut limit),
                Resource::Processes => libc::getrlimit(libc::RLIMIT_NPROC, &mut limit),
            }
        };
        (rc == 0).then_some(limit.rlim_max)
    }

    fn clamp_to_hard(
        name: &str,
        hard: Option<libc::rlim_t>,
        wanted: libc::rlim_t,
    ) -> Option<libc::rlim_t> {
        match hard {
            None => {
                warn!(
                    limit = name,
                    error = %std::io::Error::last_os_error(),
                    "could not read current limit, not applying it"
                );
                None
            }
            Some(hard) if hard != libc::RLIM_INFINITY && hard < wanted => {
                warn!(limit = name, hard, wanted, "hard limit lower than requested, clamping");
                Some(hard)
            }
            Some(_) => Some(wanted),
        }
    }

    #[cfg(test)]
    mod tests {
        use std::time::Duration;

        use super::*;

        const LIMITS: ProcessLimits = ProcessLimits {
            memory_bytes: 50 * 1024 * 1024,
            cpu_time: Duration::from_millis(1500),
            max_processes: 8,
        };

        #[test]
        fn forks_are_capped_only_without_a_cgroup() {
            let contained = plan(&LIMITS, false);
            assert!(contained.address_space.is_none());
            assert!(contained.processes.is_none());

            let uncontained = plan(&LIMITS, true);
            assert!(uncontained.processes.is_some_and(|n| (1..=8).contains(&n)));
            assert!(uncontained
                .address_space
                .is_some_and(|bytes| bytes <= LIMITS.memory_bytes as libc::rlim_t));
        }

        #[test]
        fn cpu_soft_limit_sits_below_the_hard_one() {
            if let Some((soft, hard)) = plan(&LIMITS, false).cpu {
                assert!(soft <= 2);
                assert!(soft < hard || hard <= 2);
            }
        }
    }
}
