use serde::Deserialize;

/// One test run as reported by mocha's `json` reporter.
///
/// Only the parts the normalizer reads are modelled. `passes` and
/// `failures` are required so an unrelated JSON document is rejected.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawReport {
    #[serde(default)]
    pub stats: Option<RawStats>,
    pub passes: Vec<RawTest>,
    pub failures: Vec<RawTest>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawStats {
    #[serde(default)]
    pub tests: u64,
    #[serde(default)]
    pub passes: u64,
    #[serde(default)]
    pub failures: u64,
    #[serde(default)]
    pub pending: u64,
    #[serde(default)]
    pub duration: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawTest {
    pub title: String,
    #[serde(default)]
    pub full_title: Option<String>,
    #[serde(default)]
    pub err: Option<RawError>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawError {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub expected: Option<serde_json::Value>,
    #[serde(default)]
    pub actual: Option<serde_json::Value>,
}

impl RawReport {
    /// Parses reporter output, tolerating console noise printed before the
    /// report by retrying from the first line that opens a JSON object.
    pub fn parse(output: &str) -> Result<Self, serde_json::Error> {
        let first_attempt = serde_json::from_str(output.trim());
        if first_attempt.is_ok() {
            return first_attempt;
        }

        let mut offset = 0;
        for line in output.split_inclusive('\n') {
            if line.trim_start().starts_with('{') {
                if let Ok(report) = serde_json::from_str(output[offset..].trim()) {
                    return Ok(report);
                }
            }
            offset += line.len();
        }

        first_attempt
    }
}
