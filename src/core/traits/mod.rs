pub mod framework;
pub mod materializer;
pub mod reclaimer;
pub mod registry;
pub mod supervisor;
