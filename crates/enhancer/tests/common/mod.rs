//! Shared utilities for the orchestrator integration tests.
//!
//! - `TestHarness` runs an orchestrator over a temporary base directory
//! - `ScriptedProcessor` stands in for the real enhancement routine
//! - zip builders produce upload archives, hostile ones included

pub mod archives;
pub mod harness;
pub mod processors;

pub use archives::*;
pub use harness::{
    events_until_terminal, wait_for_gate, wait_for_terminal, wait_until, TestHarness, WAIT,
};
pub use processors::{Gate, ScriptedProcessor};
