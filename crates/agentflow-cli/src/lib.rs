//! Library half of the `agentflow` binary, so command implementations can be
//! exercised from integration tests.

pub mod commands;
