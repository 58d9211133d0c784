use std::{
    io,
    path::{Path, PathBuf},
};

use tracing::warn;

/// Uniquely named source and binary paths of one judging run, removed on drop.
///
/// Every exit path of a run (verdict, error, timeout, panic) goes through the drop, so no
/// file outlives the run. A failed removal is only logged.
#[derive(Debug)]
pub struct Artifacts {
    source: PathBuf,
    binary: PathBuf,
}

impl Artifacts {
    pub fn new(work_dir: &Path) -> Artifacts {
        // a bare file name would make the binary a PATH lookup
        let work_dir = std::path::absolute(work_dir).unwrap_or_else(|_| work_dir.to_owned());
        let base_name = format!("duel_{}", uuid::Uuid::new_v4().simple());
        Artifacts {
            source: work_dir.join(format!("{base_name}.c")),
            binary: work_dir.join(format!("{base_name}.out")),
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl Drop for Artifacts {
    fn drop(&mut self) {
        for path in [&self.source, &self.binary] {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), "could not remove artifact: {e}"),
            }
        }
    }
}
