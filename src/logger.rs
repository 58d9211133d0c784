use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use anyhow::Context;
use time::{
    format_description::{self, parse},
    OffsetDateTime,
};
use tracing::subscriber::set_global_default;
use tracing_subscriber::{fmt::writer::BoxMakeWriter, FmtSubscriber};

use crate::configuration::Configuration;

/// Install a global subscriber writing events up to the configured level to a timestamped
/// file in the configured log directory.
///
/// Fails if the file cannot be created or a global subscriber is already set.
pub fn init_logger(config: &Configuration) -> anyhow::Result<()> {
    fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("cannot create {}", config.log_dir.display()))?;
    let path = log_file_path(&config.log_dir, local_now())?;
    let file = File::create(&path).with_context(|| format!("cannot create {}", path.display()))?;
    let writer = BoxMakeWriter::new(file);
    let local_offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
    let timer = tracing_subscriber::fmt::time::OffsetTime::new(
        local_offset,
        format_description::parse("[year]-[month]-[day] [hour]:[minute]:[second]")?,
    );

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .with_ansi(false)
        .with_timer(timer)
        .with_writer(writer)
        .finish();

    set_global_default(subscriber).context(
        "could not set the global tracing subscriber, disable logs if one is already set",
    )
}

fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn log_file_path(dir: &Path, at: OffsetDateTime) -> anyhow::Result<PathBuf> {
    let format = parse("[year]-[month]-[day]_[hour]-[minute]-[second]_duel_log.txt")?;
    Ok(dir.join(at.format(&format)?))
}
