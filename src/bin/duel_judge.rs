//! Judge one C source file against a harness, the way a duel submission is judged.
//!
//! ```text
//! duel-judge <harness.c> <solution.c> [time_limit_secs]
//! ```
//!
//! Prints the verdict as JSON on stdout. Exits with 0 on success, 1 on any other verdict and 2
//! on usage errors. Limits come from the `DUEL_*` environment variables.

use std::{env, path::Path, process::ExitCode, time::Duration};

use anyhow::{bail, Context};
use code_duel::prelude::*;
use tracing::{subscriber::set_global_default, Level};
use tracing_subscriber::FmtSubscriber;

struct Args {
    harness: String,
    solution: String,
    time_limit: Option<Duration>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = env::args().skip(1);
    let (Some(harness), Some(solution)) = (args.next(), args.next()) else {
        bail!("usage: duel-judge <harness.c> <solution.c> [time_limit_secs]");
    };
    let time_limit = args
        .next()
        .map(|secs| {
            secs.parse::<f64>()
                .ok()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .with_context(|| format!("invalid time limit: {secs}"))
        })
        .transpose()?;
    if args.next().is_some() {
        bail!("too many arguments");
    }
    Ok(Args {
        harness,
        solution,
        time_limit,
    })
}

fn run() -> anyhow::Result<Verdict> {
    let args = parse_args()?;
    let config = Configuration::from_env();

    let level = match env::var_os("DUEL_LOG_LEVEL") {
        Some(_) => config.log_level(),
        None => Level::WARN,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .finish();
    set_global_default(subscriber)?;

    let code = std::fs::read_to_string(&args.solution)
        .with_context(|| format!("cannot read {}", args.solution))?;
    let time_limit = args.time_limit.unwrap_or(config.default_time_limit());

    let runner = SandboxRunner::new(&config);
    Ok(runner.execute(&code, Path::new(&args.harness), time_limit))
}

fn main() -> ExitCode {
    match run() {
        Ok(verdict) => {
            match serde_json::to_string_pretty(&verdict) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("cannot serialize verdict: {e}");
                    return ExitCode::from(2);
                }
            }
            if verdict.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::from(2)
        }
    }
}
