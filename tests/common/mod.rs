#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Barrier, Mutex},
    time::Duration,
};

use code_duel::prelude::*;
use tracing::{Level, Metadata};
use tracing_subscriber::{
    fmt,
    layer::{Context, Filter, SubscriberExt},
    Layer, Registry,
};

struct DebugLevelFilter;
impl<S> Filter<S> for DebugLevelFilter {
    fn enabled(&self, meta: &Metadata<'_>, _cx: &Context<'_, S>) -> bool {
        meta.level() <= &Level::DEBUG
    }
}

pub fn init_debug_logger() {
    let format = fmt::format()
        .without_time()
        .with_ansi(true)
        .with_level(true)
        .with_thread_names(true)
        .with_target(false);

    let registry = Registry::default().with(
        fmt::layer()
            .with_test_writer()
            .event_format(format)
            .with_filter(DebugLevelFilter),
    );

    let _ = tracing::subscriber::set_global_default(registry);
}

pub fn harness_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("harnesses")
}

pub fn solution(name: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/solutions")
        .join(name);
    std::fs::read_to_string(path).unwrap()
}

/// Passes code containing "return result", fails anything else. Records who submitted.
#[derive(Default)]
pub struct ScriptedJudge {
    pub submitted: Mutex<Vec<(PathBuf, String)>>,
}

impl Judge for ScriptedJudge {
    fn judge(&self, code: &str, harness: &Path, _time_limit: Duration) -> Verdict {
        self.submitted
            .lock()
            .unwrap()
            .push((harness.to_owned(), code.to_owned()));
        if code.contains("return result") {
            let mut tests = code_duel::verdict::TestResults::new();
            tests.insert(
                "1".to_owned(),
                code_duel::verdict::TestResult {
                    status: Some(TestStatus::Pass),
                    message: Some(String::new()),
                },
            );
            Verdict::with_tests(VerdictStatus::Success, tests)
        } else if code.contains("while (1)") {
            Verdict::single(VerdictStatus::Timeout, "Execution timed out after 5 seconds.")
        } else {
            Verdict::single(VerdictStatus::TestFailed, "Expected [0, 1], Got [0, 0]")
        }
    }
}

/// Passes everything, but only once `parties` submissions are being judged at the same time.
pub struct BarrierJudge {
    barrier: Barrier,
}

impl BarrierJudge {
    pub fn new(parties: usize) -> BarrierJudge {
        BarrierJudge {
            barrier: Barrier::new(parties),
        }
    }
}

impl Judge for BarrierJudge {
    fn judge(&self, _code: &str, _harness: &Path, _time_limit: Duration) -> Verdict {
        self.barrier.wait();
        Verdict::with_tests(VerdictStatus::Success, Default::default())
    }
}

pub struct TestServer {
    pub duels: Arc<InMemoryDuelRepository>,
    pub judge: Arc<ScriptedJudge>,
    pub server: DuelServer,
}

pub fn server(config: Configuration) -> TestServer {
    let duels = Arc::new(InMemoryDuelRepository::new());
    let problems = Arc::new(InMemoryProblemRepository::with_default_problems(harness_dir()));
    let judge = Arc::new(ScriptedJudge::default());
    let server = DuelServer::with_judge(config, duels.clone(), problems, judge.clone());
    TestServer {
        duels,
        judge,
        server,
    }
}

pub fn server_with_judge(config: Configuration, judge: Arc<dyn Judge>) -> DuelServer {
    let duels = Arc::new(InMemoryDuelRepository::new());
    let problems = Arc::new(InMemoryProblemRepository::with_default_problems(harness_dir()));
    DuelServer::with_judge(config, duels, problems, judge)
}
