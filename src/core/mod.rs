pub mod domain;
pub mod errors;
pub mod normalizer;
pub mod orchestrator;
pub mod process;
pub mod report;
pub mod traits;
