//! perfcollect - Windows performance counter collection library.
//!
//! This library provides the building blocks of the `perfcollectd` exporter:
//! - `pdh` - query sessions over the Performance Data Helper (native or mocked)
//! - `collector` - parallel multi-collector orchestration and the subsystems
//! - `metrics` - metric model and text exposition
//! - `config` - daemon configuration

pub mod collector;
pub mod config;
pub mod metrics;
pub mod pdh;
