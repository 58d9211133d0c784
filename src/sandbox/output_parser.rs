//! Parser of the `KEY=VALUE` report a harness prints on stdout.
//!
//! ```text
//! TEST_1_STATUS=PASS
//! TEST_1_MESSAGE=
//! TEST_2_STATUS=FAIL
//! TEST_2_MESSAGE=Expected [1, 2], Got [0, 0]
//! ```
//!
//! Lines of any other shape are skipped, so debug prints of the harness (or of the submitted
//! code) never break the report.

use tracing::trace;

use crate::verdict::{TestResults, TestStatus};

enum Field<'a> {
    Status(&'a str),
    Message(&'a str),
}

/// Parse the harness report. Never fails: an output without any report line yields an empty
/// map.
pub fn parse(raw_output: &str) -> TestResults {
    let mut results = TestResults::new();

    for line in raw_output.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let Some((id, field)) = parse_key(key, value) else {
            trace!(line, "skipping unrecognized harness line");
            continue;
        };

        match field {
            Field::Status(value) => {
                let Some(status) = TestStatus::from_wire(value) else {
                    trace!(line, "skipping unknown test status");
                    continue;
                };
                results.entry(id.to_owned()).or_default().status = Some(status);
            }
            Field::Message(value) => {
                results.entry(id.to_owned()).or_default().message = Some(value.to_owned());
            }
        }
    }

    results
}

fn parse_key<'a>(key: &'a str, value: &'a str) -> Option<(&'a str, Field<'a>)> {
    let rest = key.trim().strip_prefix("TEST_")?;
    let (id, field) = if let Some(id) = rest.strip_suffix("_STATUS") {
        (id, Field::Status(value))
    } else if let Some(id) = rest.strip_suffix("_MESSAGE") {
        (id, Field::Message(value))
    } else {
        return None;
    };

    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((id, field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::TestResult;

    #[test]
    fn empty_output_yields_empty_map() {
        assert!(parse("").is_empty());
        assert!(parse("\n\n").is_empty());
    }

    #[test]
    fn parses_status_and_message() {
        let results = parse(
            "TEST_1_STATUS=PASS\nTEST_1_MESSAGE=\nTEST_2_STATUS=FAIL\nTEST_2_MESSAGE=Expected [1, 2], Got [0, 0]\n",
        );
        assert_eq!(results.len(), 2);
        assert_eq!(
            results["1"],
            TestResult {
                status: Some(TestStatus::Pass),
                message: Some(String::new()),
            }
        );
        assert_eq!(results["2"].status, Some(TestStatus::Fail));
        assert_eq!(
            results["2"].message.as_deref(),
            Some("Expected [1, 2], Got [0, 0]")
        );
    }

    #[test]
    fn message_may_contain_equal_signs() {
        let results = parse("TEST_3_MESSAGE=a=b=c");
        assert_eq!(results["3"].message.as_deref(), Some("a=b=c"));
        assert_eq!(results["3"].status, None);
    }

    #[test]
    fn missing_message_stays_absent() {
        let results = parse("TEST_1_STATUS=PASS");
        assert_eq!(results["1"].status, Some(TestStatus::Pass));
        assert_eq!(results["1"].message, None);
    }

    #[test]
    fn fields_arrive_out_of_order() {
        let results = parse("TEST_1_MESSAGE=late status\ndebug line\nTEST_1_STATUS=ERROR\r\n");
        assert_eq!(results["1"].status, Some(TestStatus::Error));
        assert_eq!(results["1"].message.as_deref(), Some("late status"));
    }

    #[test]
    fn unknown_lines_are_skipped() {
        let results = parse(
            "hello world\nno_equal_sign\nTEST__STATUS=PASS\nTEST_x_STATUS=PASS\nRESULT_1_STATUS=PASS\nTEST_1_OUTPUT=42\nTEST_1_STATUS=MAYBE\n",
        );
        assert!(results.is_empty());
    }
}
