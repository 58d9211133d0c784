//! Structured outcome of judging one submission.
//!
//! Wire shape:
//!
//! ```json
//! {"status": "test_failed", "tests": {"1": {"status": "PASS", "message": ""}, "2": {"status": "FAIL", "message": "Expected [0, 1], Got [1, 0]"}}}
//! ```

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

/// Identifier of the synthetic test carrying a whole-run failure.
pub const SYNTHETIC_TEST_ID: &str = "1";

/// Overall outcome of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    /// Every test ran and the harness exited with code 0.
    Success,
    /// The harness reported results but exited with a non-zero code.
    TestFailed,
    /// The compiler rejected the generated source.
    CompilationError,
    /// The program crashed without reporting results.
    RuntimeError,
    /// The program exceeded its wall-clock or CPU-time limit.
    Timeout,
    /// The program exceeded its memory limit.
    MemoryError,
    /// The submission could not be judged.
    Error,
}

impl fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerdictStatus::Success => "success",
            VerdictStatus::TestFailed => "test_failed",
            VerdictStatus::CompilationError => "compilation_error",
            VerdictStatus::RuntimeError => "runtime_error",
            VerdictStatus::Timeout => "timeout",
            VerdictStatus::MemoryError => "memory_error",
            VerdictStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Status of a single harness test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestStatus {
    Pass,
    Fail,
    Error,
}

impl TestStatus {
    /// Parse the value of a `TEST_<n>_STATUS` line.
    pub fn from_wire(value: &str) -> Option<TestStatus> {
        match value.trim() {
            "PASS" => Some(TestStatus::Pass),
            "FAIL" => Some(TestStatus::Fail),
            "ERROR" => Some(TestStatus::Error),
            _ => None,
        }
    }
}

/// Result of a single harness test.
///
/// Both fields are optional because the harness reports them on separate lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TestStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Per-test results keyed by test identifier.
pub type TestResults = BTreeMap<String, TestResult>;

/// Outcome of judging one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub tests: TestResults,
}

impl Verdict {
    /// A verdict made of the results reported by the harness.
    pub fn with_tests(status: VerdictStatus, tests: TestResults) -> Verdict {
        Verdict { status, tests }
    }

    /// A verdict carrying one synthetic `ERROR` test with `message`.
    pub fn single(status: VerdictStatus, message: impl Into<String>) -> Verdict {
        let mut tests = TestResults::new();
        tests.insert(
            SYNTHETIC_TEST_ID.to_owned(),
            TestResult {
                status: Some(TestStatus::Error),
                message: Some(message.into()),
            },
        );
        Verdict { status, tests }
    }

    /// Shorthand for a [`VerdictStatus::Error`] verdict.
    pub fn error(message: impl Into<String>) -> Verdict {
        Self::single(VerdictStatus::Error, message)
    }

    /// True if the submission solved the problem.
    pub fn is_success(&self) -> bool {
        self.status == VerdictStatus::Success
    }

    /// Message of the first test, handy for one-line summaries.
    pub fn first_message(&self) -> Option<&str> {
        self.tests.values().find_map(|t| t.message.as_deref())
    }
}
