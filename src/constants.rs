use std::time::Duration;

pub const DEFAULT_LISTEN_ADDR: &str = "[::1]:50051";
pub const DEFAULT_EXERCISES_DIR: &str = "exercises";
pub const DEFAULT_INTERPRETER: &str = "node";
pub const DEFAULT_TEST_COMMAND: &str = "npx mocha {test} --reporter json";
pub const TEST_FILE_PLACEHOLDER: &str = "{test}";

pub const MANIFEST_FILE: &str = "exercise.json";
pub const DEFAULT_WORKING_DIR: &str = "exercise";
pub const DEFAULT_SUBMISSION_FILE: &str = "tmp-server.js";
pub const DEFAULT_TEST_FILE: &str = "test.js";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_READY_PATTERNS: &[&str] = &["Server running", "listening"];
pub const DEFAULT_PORT_IN_USE_PATTERNS: &[&str] = &["EADDRINUSE"];

pub const PORT_PROBE_INTERVAL: Duration = Duration::from_millis(100);
pub const PORT_PROBE_CONFIRM: Duration = Duration::from_millis(500);
pub const RECLAIM_TIMEOUT: Duration = Duration::from_secs(2);
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);
pub const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

pub const DEFAULT_FAILURE_MESSAGE: &str = "Test failed";

pub const STAGE_EXERCISE_SETUP: &str = "Exercise Setup";
pub const STAGE_SUBMISSION_SETUP: &str = "Submission Setup";
pub const STAGE_SERVER_SETUP: &str = "Server Setup";
pub const STAGE_SERVER_STARTUP: &str = "Server Startup";
pub const STAGE_TEST_EXECUTION: &str = "Test Execution";
pub const STAGE_SERVER_RUNTIME: &str = "Server Runtime";

pub const MSG_SCRIPT_OK: &str = "Code executed successfully";
pub const MSG_SCRIPT_FAILED: &str = "Code execution failed";
pub const MSG_SERVER_OK: &str = "Server started successfully";
pub const MSG_SERVER_FAILED: &str = "Server failed to start";
pub const MSG_SUBMISSION_FAILED: &str = "Failed to write code to file";
