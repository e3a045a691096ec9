use std::path::{Path, PathBuf};

use regex::RegexSet;
use serde::Deserialize;
use tokio::fs;

use crate::{
    constants::{
        DEFAULT_PORT, DEFAULT_PORT_IN_USE_PATTERNS, DEFAULT_READY_PATTERNS,
        DEFAULT_SUBMISSION_FILE, DEFAULT_TEST_FILE, DEFAULT_WORKING_DIR, MANIFEST_FILE,
    },
    core::{
        domain::{Exercise, ExerciseKind, ReadinessSpec, is_valid_exercise_id},
        errors::GradingError,
        traits::registry::ExerciseRegistry,
    },
};

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
enum ManifestKind {
    Direct,
    Server,
}

/// `<root>/<id>/exercise.json`. Every field is optional.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Manifest {
    kind: ManifestKind,
    working_dir: String,
    submission_file: String,
    test_file: String,
    port: u16,
    ready_patterns: Vec<String>,
    port_in_use_patterns: Vec<String>,
    probe_port: bool,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            kind: ManifestKind::Server,
            working_dir: DEFAULT_WORKING_DIR.to_string(),
            submission_file: DEFAULT_SUBMISSION_FILE.to_string(),
            test_file: DEFAULT_TEST_FILE.to_string(),
            port: DEFAULT_PORT,
            ready_patterns: DEFAULT_READY_PATTERNS.iter().map(|p| p.to_string()).collect(),
            port_in_use_patterns: DEFAULT_PORT_IN_USE_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            probe_port: false,
        }
    }
}

/// Exercises laid out as directories under a single root.
#[derive(Debug, Clone)]
pub struct FsExerciseRegistry {
    root: PathBuf,
}

impl FsExerciseRegistry {
    pub fn new<T: AsRef<Path>>(root: T) -> std::io::Result<Self> {
        Ok(Self {
            root: std::path::absolute(root.as_ref())?,
        })
    }

    async fn read_manifest(&self, exercise_id: &str, dir: &Path) -> Result<Manifest, GradingError> {
        let invalid = |msg: String| GradingError::InvalidManifest {
            id: exercise_id.to_string(),
            msg,
        };

        match fs::read_to_string(dir.join(MANIFEST_FILE)).await {
            Ok(text) => serde_json::from_str(&text).map_err(|e| invalid(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Manifest::default()),
            Err(e) => Err(invalid(e.to_string())),
        }
    }
}

#[async_trait::async_trait]
impl ExerciseRegistry for FsExerciseRegistry {
    #[tracing::instrument]
    async fn lookup(&self, exercise_id: &str) -> Result<Exercise, GradingError> {
        let not_found = || GradingError::ExerciseNotFound {
            id: exercise_id.to_string(),
        };

        if !is_valid_exercise_id(exercise_id) {
            return Err(not_found());
        }

        let dir = self.root.join(exercise_id);
        let is_dir = fs::metadata(&dir)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(not_found());
        }

        let manifest = self.read_manifest(exercise_id, &dir).await?;
        let invalid_pattern = |e: regex::Error| GradingError::InvalidManifest {
            id: exercise_id.to_string(),
            msg: e.to_string(),
        };

        let working_dir = dir.join(&manifest.working_dir);
        let exercise = Exercise {
            id: exercise_id.to_string(),
            kind: match manifest.kind {
                ManifestKind::Direct => ExerciseKind::Direct,
                ManifestKind::Server => ExerciseKind::Server,
            },
            submission_file: working_dir.join(&manifest.submission_file),
            test_file: working_dir.join(&manifest.test_file),
            working_dir,
            port: manifest.port,
            readiness: ReadinessSpec {
                ready: RegexSet::new(&manifest.ready_patterns).map_err(invalid_pattern)?,
                port_in_use: RegexSet::new(&manifest.port_in_use_patterns)
                    .map_err(invalid_pattern)?,
                probe_port: manifest.probe_port,
            },
        };

        tracing::debug!(?exercise, "exercise resolved");
        Ok(exercise)
    }
}
