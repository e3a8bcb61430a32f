//! Test doubles for nimport: a scripted import engine, credential and
//! payload fixtures, a recording task queue and a harness wiring them into a
//! dispatcher.

pub mod engine;
pub mod fixtures;
pub mod harness;
pub mod queue;

pub use engine::{CreatedEngine, FailStage, ScriptedEngineFactory};
pub use harness::Harness;
pub use queue::RecordingQueue;
