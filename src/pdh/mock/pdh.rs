//! In-memory PDH for testing sessions without the Windows counter subsystem.
//!
//! `MockPdh` keeps a catalog of objects, instances and counters and answers the
//! `PdhApi` calls from it, writing results with the same record layouts the
//! native API uses. Failure injection hooks cover the error paths collectors
//! have to survive.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use crate::pdh::api::{CounterHandle, PdhApi, QueryHandle};
use crate::pdh::buffer::{PdhBuffer, Probe};
use crate::pdh::layout::{
    CounterInfo, RawItem, counter_info_size, encode_counter_info, encode_raw_items,
    raw_items_size,
};
use crate::pdh::path::{ALL_INSTANCES, NO_INSTANCE, format_counter_path, parse_counter_path};
use crate::pdh::status::PdhStatus;
use crate::pdh::types::WINDOWS_EPOCH;

/// Default counter time base: 100ns ticks.
const DEFAULT_TIME_BASE: i64 = 10_000_000;

#[derive(Debug, Clone, Copy)]
struct MockSample {
    first: i64,
    second: i64,
    status: PdhStatus,
}

impl Default for MockSample {
    fn default() -> Self {
        Self {
            first: 0,
            second: 0,
            status: PdhStatus::CSTATUS_VALID_DATA,
        }
    }
}

#[derive(Debug, Clone)]
struct MockCounter {
    type_code: u32,
    explain: String,
    time_base: i64,
    /// Overrides the result of every raw array call for this counter.
    array_status: Option<PdhStatus>,
    samples: HashMap<String, MockSample>,
}

#[derive(Debug, Clone, Default)]
struct MockObject {
    /// `None` for objects without an instance dimension.
    instances: Option<Vec<String>>,
    counters: BTreeMap<String, MockCounter>,
}

#[derive(Debug, Clone)]
struct CounterBinding {
    query: usize,
    object: String,
    instance: String,
    counter: String,
}

#[derive(Debug, Default)]
struct MockState {
    objects: HashMap<String, MockObject>,
    /// Open queries and the number of samples taken on each.
    queries: HashMap<usize, u64>,
    counters: HashMap<usize, CounterBinding>,
    next_handle: usize,
    native_calls: usize,
    info_calls: usize,
    open_failure: Option<PdhStatus>,
    /// Paths whose `add_counter` call fails with the given status.
    add_failures: HashMap<String, PdhStatus>,
    collect_failure: Option<PdhStatus>,
    /// Instances that appear right after the next raw array size probe.
    appear_after_probe: Vec<(String, String)>,
}

impl MockState {
    fn allocate_handle(&mut self) -> usize {
        self.next_handle += 1;
        self.next_handle
    }

    fn object_mut(&mut self, object: &str) -> &mut MockObject {
        self.objects.entry(object.to_string()).or_default()
    }

    fn counter_mut(&mut self, object: &str, counter: &str) -> Option<&mut MockCounter> {
        self.objects.get_mut(object)?.counters.get_mut(counter)
    }

    fn raw_items(&self, binding: &CounterBinding) -> Result<Vec<RawItem>, PdhStatus> {
        let object = self
            .objects
            .get(&binding.object)
            .ok_or(PdhStatus::CSTATUS_NO_OBJECT)?;
        let counter = object
            .counters
            .get(&binding.counter)
            .ok_or(PdhStatus::CSTATUS_NO_COUNTER)?;

        if let Some(status) = counter.array_status {
            return Err(status);
        }
        if self.queries.get(&binding.query).copied().unwrap_or(0) == 0 {
            return Err(PdhStatus::CSTATUS_INVALID_DATA);
        }

        let names: Vec<String> = match (&object.instances, binding.instance.as_str()) {
            (None, NO_INSTANCE) => vec![String::new()],
            (None, _) => return Err(PdhStatus::CSTATUS_NO_INSTANCE),
            (Some(instances), ALL_INSTANCES) => {
                if instances.is_empty() {
                    return Err(PdhStatus::NO_DATA);
                }
                instances.clone()
            }
            (Some(instances), name) => {
                if !instances.iter().any(|i| i == name) {
                    return Err(PdhStatus::CSTATUS_NO_INSTANCE);
                }
                vec![name.to_string()]
            }
        };

        let timestamp = (WINDOWS_EPOCH + Utc::now().timestamp_micros() * 10) as u64;
        Ok(names
            .into_iter()
            .map(|name| {
                let key = if name.is_empty() { NO_INSTANCE } else { name.as_str() };
                let sample = counter.samples.get(key).copied().unwrap_or_default();
                RawItem {
                    status: sample.status,
                    timestamp,
                    first_value: sample.first,
                    second_value: sample.second,
                    multi_count: 1,
                    name,
                }
            })
            .collect())
    }
}

/// In-memory PDH.
///
/// Clones share the same catalog, so a test can keep one clone to mutate
/// values or inject failures while a session owns another.
#[derive(Debug, Clone, Default)]
pub struct MockPdh {
    state: Arc<Mutex<MockState>>,
}

impl MockPdh {
    /// Creates an empty mock with no objects.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Adds an object. An empty instance list models an object without an
    /// instance dimension; use [`MockPdh::add_instanced_object`] for objects
    /// that currently have zero instances.
    pub fn add_object(&self, object: &str, instances: &[&str]) -> &Self {
        let mut state = self.lock();
        let entry = state.object_mut(object);
        entry.instances = if instances.is_empty() {
            None
        } else {
            Some(instances.iter().map(|i| i.to_string()).collect())
        };
        self
    }

    /// Adds a multi-instance object, possibly with no instances yet.
    pub fn add_instanced_object(&self, object: &str, instances: &[&str]) -> &Self {
        let mut state = self.lock();
        state.object_mut(object).instances =
            Some(instances.iter().map(|i| i.to_string()).collect());
        self
    }

    /// Adds a counter definition to an object.
    pub fn define_counter(
        &self,
        object: &str,
        counter: &str,
        type_code: u32,
        explain: &str,
    ) -> &Self {
        let mut state = self.lock();
        state.object_mut(object).counters.insert(
            counter.to_string(),
            MockCounter {
                type_code,
                explain: explain.to_string(),
                time_base: DEFAULT_TIME_BASE,
                array_status: None,
                samples: HashMap::new(),
            },
        );
        self
    }

    /// Sets the raw value of one counter instance. Use `NO_INSTANCE` for
    /// objects without instances.
    pub fn set_value(
        &self,
        object: &str,
        instance: &str,
        counter: &str,
        first: i64,
        second: i64,
    ) -> &Self {
        let mut state = self.lock();
        if let Some(c) = state.counter_mut(object, counter) {
            let sample = c.samples.entry(instance.to_string()).or_default();
            sample.first = first;
            sample.second = second;
        }
        self
    }

    /// Sets the per-item status reported for one counter instance.
    pub fn set_item_status(
        &self,
        object: &str,
        instance: &str,
        counter: &str,
        status: PdhStatus,
    ) -> &Self {
        let mut state = self.lock();
        if let Some(c) = state.counter_mut(object, counter) {
            c.samples.entry(instance.to_string()).or_default().status = status;
        }
        self
    }

    /// Makes every raw array call for a counter fail with `status`.
    pub fn set_array_status(&self, object: &str, counter: &str, status: Option<PdhStatus>) -> &Self {
        let mut state = self.lock();
        if let Some(c) = state.counter_mut(object, counter) {
            c.array_status = status;
        }
        self
    }

    /// Changes the type and explain text of an existing counter definition.
    pub fn redefine_counter(
        &self,
        object: &str,
        counter: &str,
        type_code: u32,
        explain: &str,
    ) -> &Self {
        let mut state = self.lock();
        if let Some(c) = state.counter_mut(object, counter) {
            c.type_code = type_code;
            c.explain = explain.to_string();
        }
        self
    }

    pub fn set_time_base(&self, object: &str, counter: &str, time_base: i64) -> &Self {
        let mut state = self.lock();
        if let Some(c) = state.counter_mut(object, counter) {
            c.time_base = time_base;
        }
        self
    }

    /// Replaces the instance list of a multi-instance object.
    pub fn set_instances(&self, object: &str, instances: &[&str]) -> &Self {
        self.add_instanced_object(object, instances)
    }

    /// Adds `instance` to `object` right after the next raw array size probe,
    /// so the following fill no longer fits the probed buffer.
    pub fn add_instance_after_probe(&self, object: &str, instance: &str) -> &Self {
        let mut state = self.lock();
        state
            .appear_after_probe
            .push((object.to_string(), instance.to_string()));
        self
    }

    pub fn fail_open(&self, status: Option<PdhStatus>) -> &Self {
        self.lock().open_failure = status;
        self
    }

    pub fn fail_collect(&self, status: Option<PdhStatus>) -> &Self {
        self.lock().collect_failure = status;
        self
    }

    /// Makes `add_counter` fail for exactly this path.
    pub fn fail_add_counter(&self, path: &str, status: Option<PdhStatus>) -> &Self {
        let mut state = self.lock();
        match status {
            Some(status) => state.add_failures.insert(path.to_string(), status),
            None => state.add_failures.remove(path),
        };
        self
    }

    /// Number of `PdhApi` calls made so far.
    pub fn native_calls(&self) -> usize {
        self.lock().native_calls
    }

    /// Number of `counter_info` calls made so far, probes included.
    pub fn counter_info_calls(&self) -> usize {
        self.lock().info_calls
    }

    /// Number of queries opened and not yet closed.
    pub fn open_queries(&self) -> usize {
        self.lock().queries.len()
    }

    /// Number of counter handles registered across all open queries.
    pub fn registered_counters(&self) -> usize {
        self.lock().counters.len()
    }
}

impl PdhApi for MockPdh {
    fn open_query(&self) -> Result<QueryHandle, PdhStatus> {
        let mut state = self.lock();
        state.native_calls += 1;
        if let Some(status) = state.open_failure {
            return Err(status);
        }
        let handle = state.allocate_handle();
        state.queries.insert(handle, 0);
        Ok(QueryHandle(handle))
    }

    fn add_counter(&self, query: QueryHandle, path: &str) -> Result<CounterHandle, PdhStatus> {
        let mut state = self.lock();
        state.native_calls += 1;
        if !state.queries.contains_key(&query.0) {
            return Err(PdhStatus::INVALID_HANDLE);
        }
        if let Some(status) = state.add_failures.get(path) {
            return Err(*status);
        }

        let (object, instance, counter) =
            parse_counter_path(path).ok_or(PdhStatus::CSTATUS_BAD_COUNTERNAME)?;
        let known = state
            .objects
            .get(&object)
            .ok_or(PdhStatus::CSTATUS_NO_OBJECT)?;
        if !known.counters.contains_key(&counter) {
            return Err(PdhStatus::CSTATUS_NO_COUNTER);
        }

        let handle = state.allocate_handle();
        state.counters.insert(
            handle,
            CounterBinding {
                query: query.0,
                object,
                instance,
                counter,
            },
        );
        Ok(CounterHandle(handle))
    }

    fn collect_query_data(&self, query: QueryHandle) -> Result<(), PdhStatus> {
        let mut state = self.lock();
        state.native_calls += 1;
        if let Some(status) = state.collect_failure {
            return Err(status);
        }
        match state.queries.get_mut(&query.0) {
            Some(ticks) => {
                *ticks += 1;
                Ok(())
            }
            None => Err(PdhStatus::INVALID_HANDLE),
        }
    }

    fn counter_info(&self, counter: CounterHandle, buffer: Option<&mut PdhBuffer>) -> Probe {
        let mut state = self.lock();
        state.native_calls += 1;
        state.info_calls += 1;

        let Some(binding) = state.counters.get(&counter.0) else {
            return Probe::new(PdhStatus::INVALID_HANDLE, 0, 0);
        };
        let Some(definition) = state
            .objects
            .get(&binding.object)
            .and_then(|o| o.counters.get(&binding.counter))
        else {
            return Probe::new(PdhStatus::CSTATUS_NO_COUNTER, 0, 0);
        };

        let info = CounterInfo {
            type_code: definition.type_code,
            version: 0x0501,
            full_path: format_counter_path(&binding.object, &binding.instance, &binding.counter),
            object_name: binding.object.clone(),
            instance_name: if binding.instance == NO_INSTANCE {
                String::new()
            } else {
                binding.instance.clone()
            },
            counter_name: binding.counter.clone(),
            explain_text: definition.explain.clone(),
            ..CounterInfo::default()
        };

        let size = counter_info_size(&info);
        match buffer {
            Some(buf) if buf.len() >= size => {
                encode_counter_info(&info, buf);
                Probe::new(PdhStatus::CSTATUS_VALID_DATA, size as u32, 0)
            }
            _ => Probe::new(PdhStatus::MORE_DATA, size as u32, 0),
        }
    }

    fn counter_time_base(&self, counter: CounterHandle) -> Result<i64, PdhStatus> {
        let mut state = self.lock();
        state.native_calls += 1;
        let binding = state
            .counters
            .get(&counter.0)
            .ok_or(PdhStatus::INVALID_HANDLE)?;
        state
            .objects
            .get(&binding.object)
            .and_then(|o| o.counters.get(&binding.counter))
            .map(|c| c.time_base)
            .ok_or(PdhStatus::CSTATUS_NO_COUNTER)
    }

    fn raw_counter_array(
        &self,
        counter: CounterHandle,
        buffer: Option<&mut PdhBuffer>,
    ) -> Probe {
        let mut state = self.lock();
        state.native_calls += 1;

        let Some(binding) = state.counters.get(&counter.0).cloned() else {
            return Probe::new(PdhStatus::INVALID_HANDLE, 0, 0);
        };
        let items = match state.raw_items(&binding) {
            Ok(items) => items,
            Err(status) => return Probe::new(status, 0, 0),
        };

        let size = raw_items_size(&items);
        match buffer {
            Some(buf) if buf.len() >= size => {
                encode_raw_items(&items, buf);
                Probe::new(PdhStatus::CSTATUS_VALID_DATA, size as u32, items.len() as u32)
            }
            Some(_) => Probe::new(PdhStatus::MORE_DATA, size as u32, 0),
            None => {
                let pending = std::mem::take(&mut state.appear_after_probe);
                for (object, instance) in pending {
                    if let Some(instances) = state
                        .objects
                        .get_mut(&object)
                        .and_then(|o| o.instances.as_mut())
                    {
                        instances.push(instance);
                    }
                }
                Probe::new(PdhStatus::MORE_DATA, size as u32, 0)
            }
        }
    }

    fn remove_counter(&self, counter: CounterHandle) -> Result<(), PdhStatus> {
        let mut state = self.lock();
        state.native_calls += 1;
        match state.counters.remove(&counter.0) {
            Some(_) => Ok(()),
            None => Err(PdhStatus::INVALID_HANDLE),
        }
    }

    fn close_query(&self, query: QueryHandle) -> Result<(), PdhStatus> {
        let mut state = self.lock();
        state.native_calls += 1;
        if state.queries.remove(&query.0).is_none() {
            return Err(PdhStatus::INVALID_HANDLE);
        }
        state.counters.retain(|_, binding| binding.query != query.0);
        Ok(())
    }
}
