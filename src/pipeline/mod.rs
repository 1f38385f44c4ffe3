//! Resumable chunked-translation pipeline

pub mod checkpoint;
pub mod job;
pub mod orchestrator;
