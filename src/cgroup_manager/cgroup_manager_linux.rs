use std::{
    path::Path,
    process::Child,
    time::{Duration, Instant},
};

use anyhow::{bail, Context};
use cgroups_rs::Cgroup;
use tracing::warn;

use super::{create_process, kill_process_group, ProcessLimits};

pub fn get_cgroup_path(user_id: u32, group_name: &str) -> String {
    format!("user.slice/user-{user_id}.slice/user@{user_id}.service/{group_name}")
}

/// Create a cgroup at `path`.
///
/// * `max_memory` - Maximum available memory in Bytes. Non-positive means no restriction.
/// * `max_pids` - Maximum number of PIDS inside the cgroup at any time. Non-positive means no
///   restriction.
///
/// # Errors
///
/// This function will return an error if the cgroup could not be created. This can happen if the
/// parameters are incorrect or if cgroup is not available.
pub fn create_cgroup(path: &str, max_memory: i64, max_pids: i64) -> anyhow::Result<Cgroup> {
    let mut builder = cgroups_rs::cgroup_builder::CgroupBuilder::new(path);
    if max_memory > 0 {
        builder = builder.memory().memory_hard_limit(max_memory).done();
    }
    if max_pids > 0 {
        builder = builder
            .pid()
            .maximum_number_of_processes(cgroups_rs::MaxValue::Value(max_pids))
            .done();
    }
    builder
        .build(cgroups_rs::hierarchies::auto())
        .context("could not create cgroup")
}

/// Wait until `pid` left `cgroup`, for at most `max_duration`.
pub fn wait_for_process_cleanup(
    cgroup: &Cgroup,
    pid: u64,
    max_duration: Duration,
) -> anyhow::Result<()> {
    let deadline = Instant::now() + max_duration;
    while cgroup.tasks().iter().any(|task| task.pid == pid) {
        if Instant::now() > deadline {
            bail!("process {pid} still in its cgroup after {max_duration:?}");
        }
        std::thread::sleep(Duration::from_millis(10).min(max_duration / 10));
    }
    Ok(())
}

fn create_process_in_cgroup(
    command: &Path,
    limits: &ProcessLimits,
    group: &Cgroup,
) -> anyhow::Result<Child> {
    let mut child = create_process(command, limits, false)?;

    let pid = child.id() as u64;
    let addition = group.add_task_by_tgid(cgroups_rs::CgroupPid { pid });
    if addition.is_err() {
        let kill = child.kill();
        let _ = child.wait();

        addition.with_context(|| {
            if let Err(err) = kill {
                format!(
                    "could not add process to cgroup, and process could not be killed either ({err})"
                )
            } else {
                "could not add process to cgroup".to_string()
            }
        })?;
    }
    Ok(child)
}

/// A child process confined by a dedicated cgroup (or by rlimits only, when uncontained).
///
/// The process and its cgroup are killed and removed on drop if [`LimitedProcess::try_kill`]
/// was not called before.
#[derive(Debug)]
pub struct LimitedProcess {
    pub child: Child,
    cgroup: Option<Cgroup>,
    cleaned_up: bool,
}

impl LimitedProcess {
    pub fn launch(command: &Path, limits: &ProcessLimits) -> anyhow::Result<LimitedProcess> {
        // SAFETY: getuid has no preconditions and cannot fail.
        let user_id = unsafe { libc::getuid() };
        let group_name = format!("code-duel-{}", uuid::Uuid::new_v4().simple());
        let path = get_cgroup_path(user_id, &group_name);
        let group = create_cgroup(&path, limits.memory_bytes as i64, limits.max_processes)
            .context("could not create cgroup")?;
        let child = create_process_in_cgroup(command, limits, &group).with_context(|| {
            let _ = group.delete();
            "could not create process in cgroup"
        })?;

        Ok(LimitedProcess {
            child,
            cgroup: Some(group),
            cleaned_up: false,
        })
    }

    pub fn launch_without_container(
        command: &Path,
        limits: &ProcessLimits,
    ) -> anyhow::Result<LimitedProcess> {
        let child = create_process(command, limits, true).context("could not create process")?;

        Ok(LimitedProcess {
            child,
            cgroup: None,
            cleaned_up: false,
        })
    }

    pub fn is_contained(&self) -> bool {
        self.cgroup.is_some()
    }

    /// Kill the process (and everything left in its cgroup), reap it and remove the cgroup.
    ///
    /// Also used after a normal exit, to release the cgroup.
    pub fn try_kill(&mut self, max_duration: Duration) -> anyhow::Result<()> {
        match &mut self.cgroup {
            Some(cgroup) => {
                if !cgroup.tasks().is_empty() {
                    cgroup.kill().context("could not kill cgroup")?;
                }
                let _ = self.child.wait();
                wait_for_process_cleanup(cgroup, self.child.id() as u64, max_duration)?;
                // the process is gone, a leftover cgroup directory is only clutter
                self.cleaned_up = true;
                if let Err(e) = cgroup.delete() {
                    warn!("could not remove cgroup: {e}");
                }
                Ok(())
            }
            None => {
                // descendants share the group and may still hold the output pipes
                let group = kill_process_group(&self.child);
                if group.is_err() && self.child.try_wait()?.is_none() {
                    self.child.kill().context("could not kill process")?;
                }
                self.child.wait().context("could not reap process")?;
                self.cleaned_up = true;
                group
            }
        }
    }
}

impl Drop for LimitedProcess {
    fn drop(&mut self) {
        static CLEANUP_DURATION: Duration = Duration::from_millis(100);
        if !self.cleaned_up {
            if let Err(e) = self.try_kill(CLEANUP_DURATION) {
                warn!(pid = self.child.id(), "could not clean up sandboxed process: {e:#}");
            }
        }
    }
}
