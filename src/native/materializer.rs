use std::path::PathBuf;

use tokio::fs;

use crate::core::{domain::Exercise, errors::GradingError, traits::materializer::Materializer};

#[derive(Debug, Clone, Default)]
pub struct FsMaterializer;

impl FsMaterializer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Materializer for FsMaterializer {
    async fn materialize(
        &self,
        exercise: &Exercise,
        source: &str,
    ) -> Result<PathBuf, GradingError> {
        fs::write(&exercise.submission_file, source).await?;
        tracing::debug!(path = ?exercise.submission_file, bytes = source.len(), "submission written");
        Ok(exercise.submission_file.clone())
    }
}
