pub mod dispatch;
pub mod matcher;
pub mod orchestrator;
pub mod run_log;
pub mod sources;
pub mod stats;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
