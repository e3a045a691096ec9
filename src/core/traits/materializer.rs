use std::path::PathBuf;

use crate::core::{domain::Exercise, errors::GradingError};

#[mockall::automock]
#[async_trait::async_trait]
pub trait Materializer: std::fmt::Debug + Send + Sync {
    /// Replaces the exercise's submission file with `source`.
    async fn materialize(&self, exercise: &Exercise, source: &str)
    -> Result<PathBuf, GradingError>;
}
