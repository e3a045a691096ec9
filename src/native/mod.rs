/// Native module contains implementations of core traits
/// that work directly against the local filesystem and
/// child processes, without any container runtime.
pub mod materializer;
pub mod mocha;
pub mod reclaimer;
pub mod registry;
pub mod supervisor;
