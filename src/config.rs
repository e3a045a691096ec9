use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::{
    constants::{
        DEFAULT_EXERCISES_DIR, DEFAULT_INTERPRETER, DEFAULT_LISTEN_ADDR, DEFAULT_TEST_COMMAND,
    },
    core::domain::Timeouts,
};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("{key} must not be empty")]
    Empty { key: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub exercises_dir: PathBuf,
    pub interpreter: PathBuf,
    pub test_command: Vec<String>,
    pub timeouts: Timeouts,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Timeouts::default();
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let millis = |key: &str, default: Duration| -> Result<Duration, ConfigError> {
            match lookup(key) {
                Some(value) => value
                    .trim()
                    .parse()
                    .map(Duration::from_millis)
                    .map_err(|_| ConfigError::InvalidValue {
                        key: key.to_string(),
                        value,
                    }),
                None => Ok(default),
            }
        };

        let listen_addr = string("GRADER_LISTEN_ADDR", DEFAULT_LISTEN_ADDR);
        let listen_addr: SocketAddr = listen_addr
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                key: "GRADER_LISTEN_ADDR".to_string(),
                value: listen_addr.clone(),
            })?;

        let test_command: Vec<String> = string("GRADER_TEST_COMMAND", DEFAULT_TEST_COMMAND)
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if test_command.is_empty() {
            return Err(ConfigError::Empty {
                key: "GRADER_TEST_COMMAND".to_string(),
            });
        }

        Ok(Self {
            listen_addr,
            exercises_dir: string("GRADER_EXERCISES_DIR", DEFAULT_EXERCISES_DIR).into(),
            interpreter: string("GRADER_INTERPRETER", DEFAULT_INTERPRETER).into(),
            test_command,
            timeouts: Timeouts {
                startup: millis("GRADER_STARTUP_TIMEOUT_MS", defaults.startup)?,
                settle: millis("GRADER_SETTLE_DELAY_MS", defaults.settle)?,
                script: millis("GRADER_SCRIPT_TIMEOUT_MS", defaults.script)?,
                tests: millis("GRADER_TEST_TIMEOUT_MS", defaults.tests)?,
            },
        })
    }
}
