use crate::core::{domain::Exercise, errors::GradingError, report::RawReport};

#[derive(Clone, Debug, PartialEq)]
pub struct SuiteRun {
    pub report: RawReport,
    pub status: Option<i32>,
}

/// Runs an exercise's test file through an external test runner.
#[mockall::automock]
#[async_trait::async_trait]
pub trait TestFramework: std::fmt::Debug + Send + Sync {
    async fn run_suite(
        &self,
        exercise: &Exercise,
        timeout: std::time::Duration,
    ) -> Result<SuiteRun, GradingError>;
}
