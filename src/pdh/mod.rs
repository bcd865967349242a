//! Windows Performance Data Helper (PDH) access.
//!
//! This module turns native performance counters into typed observations:
//! - `path`: counter path formatting and instance sentinels
//! - `status`: PDH status codes
//! - `buffer` / `layout`: the two-phase sizing protocol and record decoding
//! - `types`: counter type table and value semantics
//! - `query`: `QuerySession`, one open query per performance object
//!
//! The native API sits behind [`PdhApi`], implemented by `NativePdh` on Windows
//! and by [`MockPdh`] everywhere.

pub mod api;
pub mod buffer;
pub mod layout;
pub mod mock;
#[cfg(windows)]
pub mod native;
pub mod path;
pub mod query;
pub mod status;
pub mod types;

pub use api::{CounterHandle, PdhApi, QueryHandle};
pub use mock::MockPdh;
#[cfg(windows)]
pub use native::NativePdh;
pub use path::{ALL_INSTANCES, NO_INSTANCE, TOTAL_INSTANCE, format_counter_path};
pub use query::{CollectedData, Counter, PdhError, QuerySession};
pub use status::PdhStatus;
pub use types::{Observation, observe};
