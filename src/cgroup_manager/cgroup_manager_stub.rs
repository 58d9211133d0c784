use std::{path::Path, process::Child, time::Duration};

use anyhow::{bail, Context};
use tracing::warn;

use super::{create_process, kill_process_group, ProcessLimits};

#[derive(Debug)]
pub struct LimitedProcess {
    pub child: Child,
    cleaned_up: bool,
}

impl LimitedProcess {
    pub fn launch(_command: &Path, _limits: &ProcessLimits) -> anyhow::Result<LimitedProcess> {
        bail!("cgroups only available on linux")
    }

    pub fn launch_without_container(
        command: &Path,
        limits: &ProcessLimits,
    ) -> anyhow::Result<LimitedProcess> {
        let child = create_process(command, limits, true).context("could not create process")?;

        Ok(LimitedProcess {
            child,
            cleaned_up: false,
        })
    }

    pub fn is_contained(&self) -> bool {
        false
    }

    pub fn try_kill(&mut self, _max_duration: Duration) -> anyhow::Result<()> {
        let group = kill_process_group(&self.child);
        if group.is_err() && self.child.try_wait()?.is_none() {
            self.child.kill().context("could not kill process")?;
        }
        self.child.wait().context("could not reap process")?;
        self.cleaned_up = true;
        group
    }
}

impl Drop for LimitedProcess {
    fn drop(&mut self) {
        static CLEANUP_DURATION: Duration = Duration::from_secs(1);
        if !self.cleaned_up {
            if let Err(e) = self.try_kill(CLEANUP_DURATION) {
                warn!(pid = self.child.id(), "could not clean up sandboxed process: {e:#}");
            }
        }
    }
}
