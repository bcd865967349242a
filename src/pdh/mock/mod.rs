//! In-memory PDH implementation for testing.
//!
//! This module provides `MockPdh` and pre-built scenarios for testing query
//! sessions and collectors without a Windows performance counter subsystem.

mod pdh;
mod scenarios;

pub use pdh::MockPdh;
#[cfg(test)]
pub(crate) use scenarios::SCENARIO_BOOT_TIME;
