//! Abstraction over the native PDH API to enable testing and mocking.
//!
//! The `PdhApi` trait lets query sessions run against the real Windows
//! Performance Data Helper or against an in-memory implementation, in tests
//! and on hosts without PDH.

use super::buffer::{PdhBuffer, Probe};
use super::status::PdhStatus;

/// Opaque native query handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryHandle(pub usize);

/// Opaque native counter handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CounterHandle(pub usize);

/// The subset of PDH a query session needs.
///
/// Every call maps one-to-one onto a native function. Variable-length results
/// use the two-phase protocol from [`super::buffer`]: with `buffer == None` the
/// call must answer `PDH_MORE_DATA` and the required size in bytes.
pub trait PdhApi: Send + Sync {
    /// `PdhOpenQueryW` against the local real-time data source.
    fn open_query(&self) -> Result<QueryHandle, PdhStatus>;

    /// `PdhAddEnglishCounterW`.
    fn add_counter(&self, query: QueryHandle, path: &str) -> Result<CounterHandle, PdhStatus>;

    /// `PdhCollectQueryData`: takes one sample for every counter of the query.
    fn collect_query_data(&self, query: QueryHandle) -> Result<(), PdhStatus>;

    /// `PdhGetCounterInfoW`, explain text included.
    fn counter_info(&self, counter: CounterHandle, buffer: Option<&mut PdhBuffer>) -> Probe;

    /// `PdhGetCounterTimeBase`.
    fn counter_time_base(&self, counter: CounterHandle) -> Result<i64, PdhStatus>;

    /// `PdhGetRawCounterArrayW`.
    fn raw_counter_array(
        &self,
        counter: CounterHandle,
        buffer: Option<&mut PdhBuffer>,
    ) -> Probe;

    /// `PdhRemoveCounter`: unregisters one counter from its query.
    fn remove_counter(&self, counter: CounterHandle) -> Result<(), PdhStatus>;

    /// `PdhCloseQuery`: releases the query and every counter added to it.
    fn close_query(&self, query: QueryHandle) -> Result<(), PdhStatus>;
}
