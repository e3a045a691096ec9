use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::constants::DEFAULT_FAILURE_MESSAGE;
use crate::core::domain::TestOutcome;
use crate::core::report::{RawReport, RawTest};

// node:assert -> "Expected values to be strictly equal:\n\n<actual> !== <expected>"
static NODE_ASSERT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^Expected values to be [a-z -]*?equal:\s*(.+?)\s+!==?\s+(.+?)\s*$")
        .expect("valid node assert pattern")
});

// supertest and friends -> "expected <expected>, got <actual>"
static EXPECTED_GOT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^expected:?\s+(.+?),?\s+(?:but\s+)?got:?\s+(.+?)\s*$")
        .expect("valid expected/got pattern")
});

// chai -> "expected <actual> to [not] [deeply] equal <expected>"
static CHAI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?s)^expected (.+?) to (?:not )?",
        r"(?:(?:deeply|strictly|nested|own|ordered|have|be|a|an) )*",
        r"(?:equals|equal|eql|includes|include|contains|contain|match|above|below|",
        r"greater than|less than|at least|at most|length of|lengthOf|status|be) ",
        r"(.+?)\s*$",
    ))
    .expect("valid chai pattern")
});

// chai length assertions append the observed value
static BUT_GOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^(.+?) but got (.+)$").expect("valid but-got pattern"));

/// Maps a raw report to outcomes: passes first, then failures, each in
/// the order the framework reported them.
pub fn normalize(report: &RawReport) -> Vec<TestOutcome> {
    report
        .passes
        .iter()
        .map(|test| TestOutcome::passed(&test.title))
        .chain(report.failures.iter().map(normalize_failure))
        .collect()
}

fn normalize_failure(test: &RawTest) -> TestOutcome {
    let message = test
        .err
        .as_ref()
        .and_then(|err| err.message.clone())
        .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());

    let mut outcome = TestOutcome::failed(&test.title, message.clone());

    let structured = test
        .err
        .as_ref()
        .map(|err| (err.expected.clone(), err.actual.clone()));

    match structured {
        Some((expected, actual)) if expected.is_some() || actual.is_some() => {
            outcome.expected = expected;
            outcome.actual = actual;
        }
        _ => {
            if let Some((expected, actual)) = extract_assertion(&message) {
                outcome.expected = Some(expected);
                outcome.actual = Some(actual);
            }
        }
    }

    outcome
}

/// Best-effort `(expected, actual)` pair from an assertion message.
pub fn extract_assertion(message: &str) -> Option<(Value, Value)> {
    let message = message.trim();

    if let Some(caps) = NODE_ASSERT.captures(message) {
        return Some((parse_literal(&caps[2]), parse_literal(&caps[1])));
    }

    if let Some(caps) = CHAI.captures(message) {
        let actual = &caps[1];
        let expected = &caps[2];

        if let Some(tail) = BUT_GOT.captures(expected) {
            return Some((parse_literal(&tail[1]), parse_literal(&tail[2])));
        }
        return Some((parse_literal(expected), parse_literal(actual)));
    }

    if let Some(caps) = EXPECTED_GOT.captures(message) {
        return Some((parse_literal(&caps[1]), parse_literal(&caps[2])));
    }

    None
}

/// JSON literal if it parses, a single-quoted string if it looks like one,
/// otherwise the raw text.
pub fn parse_literal(raw: &str) -> Value {
    let raw = raw.trim();

    if let Ok(value) = serde_json::from_str(raw) {
        return value;
    }

    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return Value::String(raw[1..raw.len() - 1].replace("\\'", "'"));
    }

    Value::String(raw.to_string())
}
