//! Query sessions: one native PDH query per performance object.
//!
//! A `QuerySession` is built once per object with the instances and counters a
//! collector needs. Building resolves every counter path to a native handle and
//! reads each counter's metadata. Every `collect()` then takes one sample and
//! turns the raw counter arrays into [`Observation`]s keyed by instance and
//! counter name.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;
use tracing::{debug, warn};

use super::api::{CounterHandle, PdhApi, QueryHandle};
use super::buffer::{FetchFailure, fetch_sized};
use super::layout::{LayoutError, decode_counter_info, decode_raw_items};
use super::path::{ALL_INSTANCES, NO_INSTANCE, TOTAL_INSTANCE, format_counter_path};
use super::status::PdhStatus;
use super::types::{Observation, PERF_ELAPSED_TIME, metric_type_of, observe};

/// Error type for query session failures.
#[derive(Debug, Error)]
pub enum PdhError {
    #[error("failed to open query for {object:?}: {status}")]
    OpenQuery { object: String, status: PdhStatus },
    #[error("failed to add counter {path}: {status}")]
    AddCounter { path: String, status: PdhStatus },
    #[error("wildcard counter names are not supported ({object:?})")]
    WildcardCounter { object: String },
    #[error("no counters requested for {object:?}")]
    NoCounters { object: String },
    #[error("failed to read counter info for {path}: {status}")]
    CounterInfo { path: String, status: PdhStatus },
    #[error("failed to read time base for {path}: {status}")]
    TimeBase { path: String, status: PdhStatus },
    #[error("invalid time base {time_base} for {path}")]
    InvalidTimeBase { path: String, time_base: i64 },
    #[error("failed to collect query data for {object:?}: {status}")]
    CollectQueryData { object: String, status: PdhStatus },
    #[error("failed to collect {object}\\{counter} ({instance}): {status}")]
    RawCounterArray {
        object: String,
        counter: String,
        instance: String,
        status: PdhStatus,
    },
    #[error(
        "buffer for {object}\\{counter} still too small after repeated growth ({last_required} bytes requested)"
    )]
    BufferGrowth {
        object: String,
        counter: String,
        last_required: u32,
    },
    #[error("malformed data for {object}\\{counter}: {source}")]
    Decode {
        object: String,
        counter: String,
        #[source]
        source: LayoutError,
    },
    #[error("failed to close query for {object:?}: {status}")]
    CloseQuery { object: String, status: PdhStatus },
    #[error("query for {object:?} is closed")]
    Closed { object: String },
    #[error("query lock for {object:?} poisoned")]
    LockPoisoned { object: String },
}

/// Result of one collection: instance name → counter name → observation.
pub type CollectedData = HashMap<String, HashMap<String, Observation>>;

/// One requested counter and its per-instance native handles.
#[derive(Debug, Clone)]
pub struct Counter {
    pub name: String,
    pub description: String,
    pub type_code: u32,
    /// Time base, only set for `PERF_ELAPSED_TIME` counters.
    pub frequency: Option<i64>,
    instances: HashMap<String, CounterHandle>,
}

impl Counter {
    /// Instance keys this counter was registered for.
    pub fn instances(&self) -> impl Iterator<Item = &str> {
        self.instances.keys().map(String::as_str)
    }
}

struct Metadata {
    type_code: u32,
    description: String,
    frequency: Option<i64>,
}

/// An open PDH query over one performance object.
pub struct QuerySession<P: PdhApi> {
    api: P,
    object: String,
    total_requested: bool,
    /// `None` once the query has been closed.
    handle: RwLock<Option<QueryHandle>>,
    counters: HashMap<String, Counter>,
}

impl<P: PdhApi> QuerySession<P> {
    /// Opens a query for `object` and registers every counter for every instance.
    ///
    /// An empty instance list means the object has no instance dimension;
    /// `["*"]` selects all instances. Fails without touching the native API
    /// when no counters are given or a counter is named `*`.
    pub fn open(
        api: P,
        object: impl Into<String>,
        instances: &[String],
        counters: &[String],
    ) -> Result<Self, PdhError> {
        let object = object.into();
        if counters.is_empty() {
            return Err(PdhError::NoCounters { object });
        }
        if counters.iter().any(|c| c == ALL_INSTANCES) {
            return Err(PdhError::WildcardCounter { object });
        }

        let handle = api.open_query().map_err(|status| PdhError::OpenQuery {
            object: object.clone(),
            status,
        })?;

        let mut session = Self {
            api,
            object,
            total_requested: false,
            handle: RwLock::new(Some(handle)),
            counters: HashMap::with_capacity(counters.len()),
        };
        // A failure here drops the session, which closes the native query.
        for counter in counters {
            session.add_counter(instances, counter)?;
        }

        debug!(
            object = %session.object,
            counters = session.counters.len(),
            "opened PDH query"
        );
        Ok(session)
    }

    /// Registers `counter` for every instance in `instances`.
    ///
    /// Either every instance is added or the call fails with the first failing
    /// path, and the native counters registered by this call are removed
    /// again. Metadata is read once per counter, from the first instance ever
    /// added; later calls for the same counter reuse it. Instances already
    /// registered for `counter` are skipped.
    pub fn add_counter(&mut self, instances: &[String], counter: &str) -> Result<(), PdhError> {
        if counter == ALL_INSTANCES {
            return Err(PdhError::WildcardCounter {
                object: self.object.clone(),
            });
        }
        let query = self.query_handle()?;
        let instances = normalize_instances(instances);

        let mut handles = HashMap::with_capacity(instances.len());
        let mut metadata = self.counters.get(counter).map(|c| Metadata {
            type_code: c.type_code,
            description: c.description.clone(),
            frequency: c.frequency,
        });

        let registered =
            self.register_instances(query, &instances, counter, &mut handles, &mut metadata);
        if let Err(e) = registered {
            self.remove_counters(&handles);
            return Err(e);
        }

        let Some(metadata) = metadata else {
            return Ok(());
        };
        if instances.iter().any(|i| i == TOTAL_INSTANCE) {
            self.total_requested = true;
        }

        let entry = self
            .counters
            .entry(counter.to_string())
            .or_insert_with(|| Counter {
                name: counter.to_string(),
                description: metadata.description,
                type_code: metadata.type_code,
                frequency: metadata.frequency,
                instances: HashMap::new(),
            });
        entry.instances.extend(handles);
        Ok(())
    }

    /// Adds one native counter per new instance into `handles`. On error,
    /// `handles` holds every counter this call registered.
    fn register_instances(
        &self,
        query: QueryHandle,
        instances: &[String],
        counter: &str,
        handles: &mut HashMap<String, CounterHandle>,
        metadata: &mut Option<Metadata>,
    ) -> Result<(), PdhError> {
        let registered = self.counters.get(counter);
        for instance in instances {
            if handles.contains_key(instance)
                || registered.is_some_and(|c| c.instances.contains_key(instance))
            {
                continue;
            }
            let path = format_counter_path(&self.object, instance, counter);
            let handle = self
                .api
                .add_counter(query, &path)
                .map_err(|status| PdhError::AddCounter {
                    path: path.clone(),
                    status,
                })?;
            handles.insert(instance.clone(), handle);
            if metadata.is_none() {
                *metadata = Some(self.resolve_metadata(handle, &path, counter)?);
            }
        }
        Ok(())
    }

    fn remove_counters(&self, handles: &HashMap<String, CounterHandle>) {
        for (instance, handle) in handles {
            if let Err(status) = self.api.remove_counter(*handle) {
                warn!(
                    object = %self.object,
                    instance = %instance,
                    %status,
                    "failed to remove counter after failed add"
                );
            }
        }
    }

    fn resolve_metadata(
        &self,
        handle: CounterHandle,
        path: &str,
        counter: &str,
    ) -> Result<Metadata, PdhError> {
        let fetched = fetch_sized(|buf| self.api.counter_info(handle, buf)).map_err(|failure| {
            match failure {
                FetchFailure::Status(status) => PdhError::CounterInfo {
                    path: path.to_string(),
                    status,
                },
                FetchFailure::Exhausted { last_required } => PdhError::BufferGrowth {
                    object: self.object.clone(),
                    counter: counter.to_string(),
                    last_required,
                },
            }
        })?;
        let info = decode_counter_info(&fetched.buffer).map_err(|source| PdhError::Decode {
            object: self.object.clone(),
            counter: counter.to_string(),
            source,
        })?;

        let mut description = info.explain_text;
        if metric_type_of(info.type_code).is_none() {
            warn!(
                path,
                type_code = format_args!("0x{:08X}", info.type_code),
                "unsupported counter type, exporting as gauge"
            );
            let caveat = format!(
                "unsupported counter type 0x{:08X}, exported as gauge",
                info.type_code
            );
            description = if description.is_empty() {
                caveat
            } else {
                format!("{} ({})", description, caveat)
            };
        }

        let frequency = if info.type_code == PERF_ELAPSED_TIME {
            let time_base =
                self.api
                    .counter_time_base(handle)
                    .map_err(|status| PdhError::TimeBase {
                        path: path.to_string(),
                        status,
                    })?;
            if time_base <= 0 {
                return Err(PdhError::InvalidTimeBase {
                    path: path.to_string(),
                    time_base,
                });
            }
            Some(time_base)
        } else {
            None
        };

        Ok(Metadata {
            type_code: info.type_code,
            description,
            frequency,
        })
    }

    /// Takes one sample and returns the values of every registered counter.
    ///
    /// Counter instances that currently have no data are skipped. After
    /// [`QuerySession::close`] this returns an empty result.
    pub fn collect(&self) -> Result<CollectedData, PdhError> {
        let guard = self.handle.read().map_err(|_| PdhError::LockPoisoned {
            object: self.object.clone(),
        })?;
        let Some(query) = *guard else {
            return Ok(CollectedData::new());
        };

        self.api
            .collect_query_data(query)
            .map_err(|status| PdhError::CollectQueryData {
                object: self.object.clone(),
                status,
            })?;

        let mut data = CollectedData::new();
        for counter in self.counters.values() {
            for (instance, handle) in &counter.instances {
                let fetched = match fetch_sized(|buf| self.api.raw_counter_array(*handle, buf)) {
                    Ok(fetched) => fetched,
                    Err(FetchFailure::Status(status)) if status.is_benign_no_data() => {
                        debug!(
                            object = %self.object,
                            counter = %counter.name,
                            instance = %instance,
                            %status,
                            "no data"
                        );
                        continue;
                    }
                    Err(FetchFailure::Status(status)) => {
                        return Err(PdhError::RawCounterArray {
                            object: self.object.clone(),
                            counter: counter.name.clone(),
                            instance: instance.clone(),
                            status,
                        });
                    }
                    Err(FetchFailure::Exhausted { last_required }) => {
                        return Err(PdhError::BufferGrowth {
                            object: self.object.clone(),
                            counter: counter.name.clone(),
                            last_required,
                        });
                    }
                };

                let items = decode_raw_items(&fetched.buffer, fetched.items).map_err(|source| {
                    PdhError::Decode {
                        object: self.object.clone(),
                        counter: counter.name.clone(),
                        source,
                    }
                })?;

                for item in items {
                    if !item.status.is_valid_item() {
                        continue;
                    }
                    let name = if item.name.is_empty() || item.name == ALL_INSTANCES {
                        NO_INSTANCE.to_string()
                    } else {
                        item.name
                    };
                    if name.ends_with(TOTAL_INSTANCE) && !self.total_requested {
                        continue;
                    }

                    let observation = observe(
                        counter.type_code,
                        item.first_value,
                        item.second_value,
                        counter.frequency,
                    );
                    data.entry(name)
                        .or_default()
                        .insert(counter.name.clone(), observation);
                }
            }
        }

        Ok(data)
    }

    /// Releases the native query. Safe to call more than once.
    pub fn close(&self) -> Result<(), PdhError> {
        let mut guard = self.handle.write().map_err(|_| PdhError::LockPoisoned {
            object: self.object.clone(),
        })?;
        if let Some(query) = guard.take() {
            self.api
                .close_query(query)
                .map_err(|status| PdhError::CloseQuery {
                    object: self.object.clone(),
                    status,
                })?;
            debug!(object = %self.object, "closed PDH query");
        }
        Ok(())
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    pub fn total_requested(&self) -> bool {
        self.total_requested
    }

    pub fn counter(&self, name: &str) -> Option<&Counter> {
        self.counters.get(name)
    }

    pub fn counters(&self) -> impl Iterator<Item = &Counter> {
        self.counters.values()
    }

    pub fn is_closed(&self) -> bool {
        match self.handle.read() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }

    fn query_handle(&self) -> Result<QueryHandle, PdhError> {
        let guard = self.handle.read().map_err(|_| PdhError::LockPoisoned {
            object: self.object.clone(),
        })?;
        guard.ok_or_else(|| PdhError::Closed {
            object: self.object.clone(),
        })
    }
}

impl<P: PdhApi> Drop for QuerySession<P> {
    fn drop(&mut self) {
        let handle = match self.handle.get_mut() {
            Ok(handle) => handle.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(query) = handle
            && let Err(status) = self.api.close_query(query)
        {
            warn!(object = %self.object, %status, "failed to close PDH query on drop");
        }
    }
}

/// Empty lists select the no-instance form.
fn normalize_instances(instances: &[String]) -> Vec<String> {
    if instances.is_empty() {
        vec![NO_INSTANCE.to_string()]
    } else {
        instances.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricType;
    use crate::pdh::mock::MockPdh;
    use crate::pdh::types::{PERF_100NSEC_TIMER, PERF_COUNTER_RAWCOUNT, WINDOWS_EPOCH};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn processor_session(mock: &MockPdh, instances: &[&str]) -> QuerySession<MockPdh> {
        QuerySession::open(
            mock.clone(),
            "Processor Information",
            &names(instances),
            &names(&["% User Time", "% Processor Utility"]),
        )
        .unwrap()
    }

    #[test]
    fn test_open_resolves_metadata_once_per_counter() {
        let mock = MockPdh::typical_host();
        let session = processor_session(&mock, &["0,0", "0,1", "0,2"]);

        let user = session.counter("% User Time").unwrap();
        assert_eq!(user.type_code, PERF_100NSEC_TIMER);
        assert_eq!(user.description, "Percentage of time spent in user mode.");
        assert_eq!(user.frequency, None);
        let mut instances: Vec<_> = user.instances().collect();
        instances.sort();
        assert_eq!(instances, vec!["0,0", "0,1", "0,2"]);
    }

    #[test]
    fn test_metadata_is_never_reread() {
        let mock = MockPdh::typical_host();
        let mut session = processor_session(&mock, &["0,0", "0,1", "0,2"]);
        // One probe and one fill per counter, not per instance.
        assert_eq!(mock.counter_info_calls(), 4);

        mock.redefine_counter(
            "Processor Information",
            "% User Time",
            PERF_COUNTER_RAWCOUNT,
            "Redefined.",
        );
        session
            .add_counter(&names(&["0,3"]), "% User Time")
            .unwrap();
        assert_eq!(mock.counter_info_calls(), 4);

        let user = session.counter("% User Time").unwrap();
        assert_eq!(user.type_code, PERF_100NSEC_TIMER);
        assert_eq!(user.description, "Percentage of time spent in user mode.");
        assert_eq!(user.frequency, None);
        assert_eq!(user.instances().count(), 4);

        let data = session.collect().unwrap();
        assert_eq!(data["0,3"]["% User Time"].metric_type, MetricType::Counter);
        assert!((data["0,3"]["% User Time"].value - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_failed_add_counter_removes_partial_registrations() {
        let mock = MockPdh::typical_host();
        let mut session = processor_session(&mock, &["0,0"]);
        assert_eq!(mock.registered_counters(), 2);

        mock.fail_add_counter(
            "\\Processor Information(0,2)\\% Idle Time",
            Some(PdhStatus::CSTATUS_NO_INSTANCE),
        );
        let err = session
            .add_counter(&names(&["0,1", "0,2"]), "% Idle Time")
            .unwrap_err();
        assert!(matches!(
            err,
            PdhError::AddCounter {
                status: PdhStatus::CSTATUS_NO_INSTANCE,
                ..
            }
        ));
        assert_eq!(mock.registered_counters(), 2);
        assert!(session.counter("% Idle Time").is_none());
        assert!(!session.collect().unwrap()["0,0"].contains_key("% Idle Time"));
    }

    #[test]
    fn test_add_counter_skips_registered_instances() {
        let mock = MockPdh::typical_host();
        let mut session = processor_session(&mock, &["0,0"]);
        session
            .add_counter(&names(&["0,0", "0,1"]), "% User Time")
            .unwrap();
        assert_eq!(mock.registered_counters(), 3);
        assert_eq!(session.counter("% User Time").unwrap().instances().count(), 2);
    }

    #[test]
    fn test_wildcard_counter_rejected_before_native_calls() {
        let mock = MockPdh::typical_host();
        let result = QuerySession::open(
            mock.clone(),
            "Memory",
            &[],
            &names(&["Available Bytes", "*"]),
        );

        assert!(matches!(result, Err(PdhError::WildcardCounter { .. })));
        assert_eq!(mock.native_calls(), 0);
    }

    #[test]
    fn test_no_counters_is_rejected() {
        let mock = MockPdh::typical_host();
        let result = QuerySession::open(mock.clone(), "Memory", &[], &[]);
        assert!(matches!(result, Err(PdhError::NoCounters { .. })));
        assert_eq!(mock.native_calls(), 0);
    }

    #[test]
    fn test_open_failure() {
        let mock = MockPdh::typical_host();
        mock.fail_open(Some(PdhStatus::MEMORY_ALLOCATION_FAILURE));
        let err = QuerySession::open(mock, "Memory", &[], &names(&["Available Bytes"]))
            .err()
            .unwrap();
        assert!(matches!(err, PdhError::OpenQuery { .. }));
    }

    #[test]
    fn test_add_counter_failure_names_path_and_closes_query() {
        let mock = MockPdh::typical_host();
        let err = QuerySession::open(
            mock.clone(),
            "Memory",
            &[],
            &names(&["Available Bytes", "Bogus Counter"]),
        )
        .err()
        .unwrap();

        assert!(err.to_string().contains("\\Memory\\Bogus Counter"));
        assert!(matches!(
            err,
            PdhError::AddCounter {
                status: PdhStatus::CSTATUS_NO_COUNTER,
                ..
            }
        ));
        assert_eq!(mock.open_queries(), 0);
    }

    #[test]
    fn test_collect_without_instances_uses_sentinel() {
        let mock = MockPdh::typical_host();
        let session = QuerySession::open(
            mock,
            "Memory",
            &[],
            &names(&["Available Bytes", "Page Faults/sec"]),
        )
        .unwrap();

        let data = session.collect().unwrap();
        assert_eq!(data.len(), 1);
        let values = &data[NO_INSTANCE];
        assert_eq!(values["Available Bytes"].value, 8_589_934_592.0);
        assert_eq!(values["Available Bytes"].metric_type, MetricType::Gauge);
        assert_eq!(values["Page Faults/sec"].metric_type, MetricType::Counter);
    }

    #[test]
    fn test_collect_converts_timers_and_keeps_pairs() {
        let mock = MockPdh::new();
        mock.add_object("Processor Information", &["0,0"])
            .define_counter("Processor Information", "% User Time", PERF_100NSEC_TIMER, "")
            .define_counter(
                "Processor Information",
                "% Processor Utility",
                crate::pdh::types::PERF_AVERAGE_BULK,
                "",
            )
            .set_value("Processor Information", "0,0", "% User Time", 25_000_000, 0)
            .set_value("Processor Information", "0,0", "% Processor Utility", 30, 120);

        let session = processor_session(&mock, &["0,0"]);
        let data = session.collect().unwrap();
        let core = &data["0,0"];

        assert!((core["% User Time"].value - 2.5).abs() < 1e-9);
        assert_eq!(core["% Processor Utility"].value, 30.0);
        assert_eq!(core["% Processor Utility"].second_value, Some(120.0));
    }

    #[test]
    fn test_elapsed_time_counter_reads_frequency() {
        let mock = MockPdh::typical_host();
        mock.set_time_base("System", "System Up Time", 1_000)
            .set_value("System", NO_INSTANCE, "System Up Time", WINDOWS_EPOCH + 42_000, 0);
        let session =
            QuerySession::open(mock, "System", &[], &names(&["System Up Time"])).unwrap();

        assert_eq!(session.counter("System Up Time").unwrap().frequency, Some(1_000));
        let data = session.collect().unwrap();
        assert!((data[NO_INSTANCE]["System Up Time"].value - 42.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_time_base_fails_build() {
        let mock = MockPdh::typical_host();
        mock.set_time_base("System", "System Up Time", 0);
        let err = QuerySession::open(mock, "System", &[], &names(&["System Up Time"]))
            .err()
            .unwrap();
        assert!(matches!(err, PdhError::InvalidTimeBase { time_base: 0, .. }));
    }

    #[test]
    fn test_total_suppressed_unless_requested() {
        let mock = MockPdh::typical_host();

        let session = processor_session(&mock, &["*"]);
        assert!(!session.total_requested());
        let data = session.collect().unwrap();
        let mut instances: Vec<_> = data.keys().cloned().collect();
        instances.sort();
        assert_eq!(instances, vec!["0,0", "0,1", "0,2", "0,3"]);

        let session = processor_session(&mock, &["0,0", "_Total"]);
        assert!(session.total_requested());
        let data = session.collect().unwrap();
        assert!(data.contains_key("_Total"));
        assert!(data.contains_key("0,0"));
    }

    #[test]
    fn test_benign_statuses_yield_empty_results() {
        for status in PdhStatus::BENIGN_NO_DATA {
            let mock = MockPdh::typical_host();
            mock.set_array_status("Memory", "Available Bytes", Some(status));
            let session = QuerySession::open(
                mock,
                "Memory",
                &[],
                &names(&["Available Bytes", "Cache Bytes"]),
            )
            .unwrap();

            let data = session.collect().unwrap();
            let values = &data[NO_INSTANCE];
            assert!(!values.contains_key("Available Bytes"), "{status}");
            assert!(values.contains_key("Cache Bytes"));
        }
    }

    #[test]
    fn test_object_without_running_instances_is_empty() {
        let mock = MockPdh::typical_host();
        let session = QuerySession::open(
            mock,
            "Hyper-V Dynamic Memory VM",
            &names(&["*"]),
            &names(&["Physical Memory"]),
        )
        .unwrap();
        assert!(session.collect().unwrap().is_empty());
    }

    #[test]
    fn test_other_statuses_are_fatal_and_named() {
        let mock = MockPdh::typical_host();
        mock.set_array_status("Memory", "Cache Bytes", Some(PdhStatus::INVALID_HANDLE));
        let session =
            QuerySession::open(mock, "Memory", &[], &names(&["Cache Bytes"])).unwrap();

        let err = session.collect().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Memory"), "{message}");
        assert!(message.contains("Cache Bytes"), "{message}");
        assert!(matches!(err, PdhError::RawCounterArray { .. }));
    }

    #[test]
    fn test_collect_failure_is_fatal() {
        let mock = MockPdh::typical_host();
        let session =
            QuerySession::open(mock.clone(), "Memory", &[], &names(&["Cache Bytes"])).unwrap();
        mock.fail_collect(Some(PdhStatus::INVALID_HANDLE));
        assert!(matches!(
            session.collect(),
            Err(PdhError::CollectQueryData { .. })
        ));
    }

    #[test]
    fn test_invalid_items_are_dropped() {
        let mock = MockPdh::typical_host();
        mock.set_item_status(
            "Processor Information",
            "0,1",
            "% User Time",
            PdhStatus::CSTATUS_INVALID_DATA,
        );
        let session = processor_session(&mock, &["*"]);
        let data = session.collect().unwrap();

        assert!(!data["0,1"].contains_key("% User Time"));
        assert!(data["0,1"].contains_key("% Processor Utility"));
        assert!(data["0,0"].contains_key("% User Time"));
    }

    #[test]
    fn test_buffer_grows_when_instances_appear() {
        let mock = MockPdh::host_with_virtual_machines(&["vm-a"]);
        let session = QuerySession::open(
            mock.clone(),
            "Hyper-V Dynamic Memory VM",
            &names(&["*"]),
            &names(&["Average Pressure"]),
        )
        .unwrap();
        mock.add_instance_after_probe("Hyper-V Dynamic Memory VM", "vm-with-a-long-name");

        let data = session.collect().unwrap();
        assert!(data.contains_key("vm-a"));
        assert!(data.contains_key("vm-with-a-long-name"));
    }

    #[test]
    fn test_close_is_idempotent_and_collect_after_close_is_empty() {
        let mock = MockPdh::typical_host();
        let session = processor_session(&mock, &["*"]);
        assert_eq!(mock.open_queries(), 1);

        session.close().unwrap();
        session.close().unwrap();
        assert!(session.is_closed());
        assert_eq!(mock.open_queries(), 0);
        assert!(session.collect().unwrap().is_empty());

        drop(session);
        assert_eq!(mock.open_queries(), 0);
    }

    #[test]
    fn test_drop_closes_query() {
        let mock = MockPdh::typical_host();
        {
            let _session = processor_session(&mock, &["*"]);
            assert_eq!(mock.open_queries(), 1);
        }
        assert_eq!(mock.open_queries(), 0);
    }

    #[test]
    fn test_add_counter_after_close_fails() {
        let mock = MockPdh::typical_host();
        let mut session = processor_session(&mock, &["*"]);
        session.close().unwrap();
        let err = session
            .add_counter(&names(&["*"]), "% Idle Time")
            .unwrap_err();
        assert!(matches!(err, PdhError::Closed { .. }));
    }

    #[test]
    fn test_unknown_type_is_flagged_in_description() {
        let mock = MockPdh::new();
        mock.add_object("Custom", &[])
            .define_counter("Custom", "Odd", 0x7777_0000, "Odd counter.")
            .define_counter("Custom", "Plain", PERF_COUNTER_RAWCOUNT, "Plain counter.")
            .set_value("Custom", NO_INSTANCE, "Odd", 9, 0);
        let session =
            QuerySession::open(mock, "Custom", &[], &names(&["Odd", "Plain"])).unwrap();

        let odd = session.counter("Odd").unwrap();
        assert!(odd.description.starts_with("Odd counter."));
        assert!(odd.description.contains("0x77770000"));
        assert_eq!(session.counter("Plain").unwrap().description, "Plain counter.");

        let data = session.collect().unwrap();
        assert_eq!(data[NO_INSTANCE]["Odd"].metric_type, MetricType::Gauge);
    }

    #[test]
    fn test_concurrent_collects_share_read_lock() {
        let mock = MockPdh::typical_host();
        let session = processor_session(&mock, &["*"]);

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4).map(|_| scope.spawn(|| session.collect())).collect();
            for handle in handles {
                let data = handle.join().unwrap().unwrap();
                assert_eq!(data.len(), 4);
            }
        });
    }
}
