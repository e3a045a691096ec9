use crate::core::{domain::Exercise, errors::GradingError};

/// Resolves exercise ids to their working directory, files and kind.
#[mockall::automock]
#[async_trait::async_trait]
pub trait ExerciseRegistry: std::fmt::Debug + Send + Sync {
    async fn lookup(&self, exercise_id: &str) -> Result<Exercise, GradingError>;
}
