//! `PdhApi` backed by the Windows Performance Data Helper.

use std::ptr;

use windows_sys::Win32::System::Performance::{
    PdhAddEnglishCounterW, PdhCloseQuery, PdhCollectQueryData, PdhGetCounterInfoW,
    PdhGetCounterTimeBase, PdhGetRawCounterArrayW, PdhOpenQueryW, PdhRemoveCounter,
};

use super::api::{CounterHandle, PdhApi, QueryHandle};
use super::buffer::{PdhBuffer, Probe};
use super::status::PdhStatus;

/// The real PDH. Stateless; every handle is owned by the session that opened it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativePdh;

impl NativePdh {
    pub fn new() -> Self {
        Self
    }
}

fn check(status: u32) -> Result<(), PdhStatus> {
    let status = PdhStatus(status);
    if status.is_success() {
        Ok(())
    } else {
        Err(status)
    }
}

// windows-sys passes PDH handles as plain `isize`.
fn query_handle(query: QueryHandle) -> isize {
    query.0 as isize
}

fn counter_handle(counter: CounterHandle) -> isize {
    counter.0 as isize
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn buffer_len(buffer: &Option<&mut PdhBuffer>) -> u32 {
    buffer
        .as_ref()
        .map(|b| u32::try_from(b.len()).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

impl PdhApi for NativePdh {
    fn open_query(&self) -> Result<QueryHandle, PdhStatus> {
        let mut query: isize = 0;
        // SAFETY: a null data source selects real-time data; `query` is a valid out pointer.
        let status = unsafe { PdhOpenQueryW(ptr::null(), 0, &mut query) };
        check(status)?;
        Ok(QueryHandle(query as usize))
    }

    fn add_counter(&self, query: QueryHandle, path: &str) -> Result<CounterHandle, PdhStatus> {
        let path = wide(path);
        let mut counter: isize = 0;
        // SAFETY: `path` is NUL-terminated and outlives the call.
        let status = unsafe {
            PdhAddEnglishCounterW(query_handle(query), path.as_ptr(), 0, &mut counter)
        };
        check(status)?;
        Ok(CounterHandle(counter as usize))
    }

    fn collect_query_data(&self, query: QueryHandle) -> Result<(), PdhStatus> {
        // SAFETY: PDH validates the handle and reports PDH_INVALID_HANDLE.
        check(unsafe { PdhCollectQueryData(query_handle(query)) })
    }

    fn counter_info(&self, counter: CounterHandle, mut buffer: Option<&mut PdhBuffer>) -> Probe {
        let mut size = buffer_len(&buffer);
        let target = match buffer.as_mut() {
            Some(b) => b.as_mut_ptr().cast(),
            None => ptr::null_mut(),
        };
        // SAFETY: `target` is null or points to `size` writable, 8-aligned bytes.
        let status = unsafe { PdhGetCounterInfoW(counter_handle(counter), 1, &mut size, target) };
        Probe::new(PdhStatus(status), size, 0)
    }

    fn counter_time_base(&self, counter: CounterHandle) -> Result<i64, PdhStatus> {
        let mut time_base = 0i64;
        // SAFETY: `time_base` is a valid out pointer.
        check(unsafe { PdhGetCounterTimeBase(counter_handle(counter), &mut time_base) })?;
        Ok(time_base)
    }

    fn raw_counter_array(
        &self,
        counter: CounterHandle,
        mut buffer: Option<&mut PdhBuffer>,
    ) -> Probe {
        let mut size = buffer_len(&buffer);
        let mut items = 0u32;
        let target = match buffer.as_mut() {
            Some(b) => b.as_mut_ptr().cast(),
            None => ptr::null_mut(),
        };
        // SAFETY: `target` is null or points to `size` writable, 8-aligned bytes.
        let status = unsafe {
            PdhGetRawCounterArrayW(counter_handle(counter), &mut size, &mut items, target)
        };
        Probe::new(PdhStatus(status), size, items)
    }

    fn remove_counter(&self, counter: CounterHandle) -> Result<(), PdhStatus> {
        // SAFETY: PDH validates the handle and reports PDH_INVALID_HANDLE.
        check(unsafe { PdhRemoveCounter(counter_handle(counter)) })
    }

    fn close_query(&self, query: QueryHandle) -> Result<(), PdhStatus> {
        // SAFETY: the caller gives up the handle; PDH frees its counters too.
        check(unsafe { PdhCloseQuery(query_handle(query)) })
    }
}
