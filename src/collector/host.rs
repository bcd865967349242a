//! Host subsystem: processor, memory and system counters.

use crate::metrics::Metric;
use crate::pdh::{ALL_INSTANCES, CollectedData, NO_INSTANCE, PdhApi, QuerySession};

use super::{CollectError, MetricSink, Registration, SubCollector};

pub const SUBSYSTEM: &str = "host";

/// Sub-collector names, in default build order.
pub const COLLECTORS: [&str; 3] = ["cpu", "memory", "system"];

const PROCESSOR_OBJECT: &str = "Processor Information";
const MEMORY_OBJECT: &str = "Memory";
const SYSTEM_OBJECT: &str = "System";

/// 100ns timers exported as `cpu_time_total{mode}`.
const CPU_MODES: [(&str, &str); 5] = [
    ("% Idle Time", "idle"),
    ("% Privileged Time", "privileged"),
    ("% User Time", "user"),
    ("% Interrupt Time", "interrupt"),
    ("% DPC Time", "dpc"),
];
const INTERRUPTS: &str = "Interrupts/sec";
const PROCESSOR_UTILITY: &str = "% Processor Utility";

const AVAILABLE_BYTES: &str = "Available Bytes";
const COMMITTED_BYTES: &str = "Committed Bytes";
const CACHE_BYTES: &str = "Cache Bytes";
const PAGE_FAULTS: &str = "Page Faults/sec";

const SYSTEM_UP_TIME: &str = "System Up Time";
const PROCESSES: &str = "Processes";
const THREADS: &str = "Threads";
const CONTEXT_SWITCHES: &str = "Context Switches/sec";
const PROCESSOR_QUEUE_LENGTH: &str = "Processor Queue Length";

/// Registrations for every host sub-collector.
pub fn registrations<P>(api: &P, namespace: &str) -> Vec<Registration>
where
    P: PdhApi + Clone + 'static,
{
    let cpu = {
        let (api, namespace) = (api.clone(), namespace.to_string());
        Registration::new("cpu", move || {
            Ok(Box::new(CpuCollector::new(api, namespace)?) as Box<dyn SubCollector>)
        })
    };
    let memory = {
        let (api, namespace) = (api.clone(), namespace.to_string());
        Registration::new("memory", move || {
            Ok(Box::new(MemoryCollector::new(api, namespace)?) as Box<dyn SubCollector>)
        })
    };
    let system = {
        let (api, namespace) = (api.clone(), namespace.to_string());
        Registration::new("system", move || {
            Ok(Box::new(SystemCollector::new(api, namespace)?) as Box<dyn SubCollector>)
        })
    };
    vec![cpu, memory, system]
}

fn counter_names(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// Instances in a stable order.
fn sorted_instances(data: &CollectedData) -> Vec<&String> {
    let mut instances: Vec<_> = data.keys().collect();
    instances.sort();
    instances
}

/// Per-core processor times, interrupts and utility.
pub struct CpuCollector<P: PdhApi> {
    namespace: String,
    session: QuerySession<P>,
}

impl<P: PdhApi> CpuCollector<P> {
    pub fn new(api: P, namespace: impl Into<String>) -> Result<Self, CollectError> {
        let mut counters: Vec<&str> = CPU_MODES.iter().map(|(counter, _)| *counter).collect();
        counters.extend([INTERRUPTS, PROCESSOR_UTILITY]);
        let session = QuerySession::open(
            api,
            PROCESSOR_OBJECT,
            &[ALL_INSTANCES.to_string()],
            &counter_names(&counters),
        )?;
        Ok(Self {
            namespace: namespace.into(),
            session,
        })
    }
}

impl<P: PdhApi> SubCollector for CpuCollector<P> {
    fn collect(&self, sink: &MetricSink) -> Result<(), CollectError> {
        let data = self.session.collect()?;
        let ns = &self.namespace;

        for core in sorted_instances(&data) {
            let values = &data[core];
            for (counter, mode) in CPU_MODES {
                if let Some(obs) = values.get(counter) {
                    sink.send(
                        Metric::counter(
                            format!("{ns}_cpu_time_total"),
                            "Time that processor spent in different modes (dpc, idle, interrupt, privileged, user).",
                            obs.value,
                        )
                        .with_label("core", core.as_str())
                        .with_label("mode", mode),
                    )?;
                }
            }
            if let Some(obs) = values.get(INTERRUPTS) {
                sink.send(
                    Metric::counter(
                        format!("{ns}_cpu_interrupts_total"),
                        "Total number of received and serviced hardware interrupts.",
                        obs.value,
                    )
                    .with_label("core", core.as_str()),
                )?;
            }
            if let Some(obs) = values.get(PROCESSOR_UTILITY) {
                sink.send(
                    Metric::counter(
                        format!("{ns}_cpu_processor_utility_total"),
                        "Processor utility accumulated over time.",
                        obs.value,
                    )
                    .with_label("core", core.as_str()),
                )?;
                if let Some(rtc) = obs.second_value {
                    sink.send(
                        Metric::counter(
                            format!("{ns}_cpu_processor_rtc_total"),
                            "Real-time clock ticks accumulated alongside processor utility.",
                            rtc,
                        )
                        .with_label("core", core.as_str()),
                    )?;
                }
            }
        }
        Ok(())
    }

    fn close(&self) -> Result<(), CollectError> {
        Ok(self.session.close()?)
    }
}

/// Physical and virtual memory usage.
pub struct MemoryCollector<P: PdhApi> {
    namespace: String,
    session: QuerySession<P>,
}

impl<P: PdhApi> MemoryCollector<P> {
    pub fn new(api: P, namespace: impl Into<String>) -> Result<Self, CollectError> {
        let session = QuerySession::open(
            api,
            MEMORY_OBJECT,
            &[],
            &counter_names(&[AVAILABLE_BYTES, COMMITTED_BYTES, CACHE_BYTES, PAGE_FAULTS]),
        )?;
        Ok(Self {
            namespace: namespace.into(),
            session,
        })
    }
}

impl<P: PdhApi> SubCollector for MemoryCollector<P> {
    fn collect(&self, sink: &MetricSink) -> Result<(), CollectError> {
        let data = self.session.collect()?;
        let Some(values) = data.get(NO_INSTANCE) else {
            return Ok(());
        };
        let ns = &self.namespace;

        let gauges = [
            (AVAILABLE_BYTES, "available_bytes", "Physical memory immediately available for allocation."),
            (COMMITTED_BYTES, "committed_bytes", "Committed virtual memory."),
            (CACHE_BYTES, "cache_bytes", "Bytes currently used by the file system cache."),
        ];
        for (counter, suffix, help) in gauges {
            if let Some(obs) = values.get(counter) {
                sink.send(Metric::gauge(format!("{ns}_memory_{suffix}"), help, obs.value))?;
            }
        }
        if let Some(obs) = values.get(PAGE_FAULTS) {
            sink.send(Metric::counter(
                format!("{ns}_memory_page_faults_total"),
                "Total number of page faults.",
                obs.value,
            ))?;
        }
        Ok(())
    }

    fn close(&self) -> Result<(), CollectError> {
        Ok(self.session.close()?)
    }
}

/// Boot time, process and thread counts, scheduler activity.
pub struct SystemCollector<P: PdhApi> {
    namespace: String,
    session: QuerySession<P>,
}

impl<P: PdhApi> SystemCollector<P> {
    pub fn new(api: P, namespace: impl Into<String>) -> Result<Self, CollectError> {
        let session = QuerySession::open(
            api,
            SYSTEM_OBJECT,
            &[],
            &counter_names(&[
                SYSTEM_UP_TIME,
                PROCESSES,
                THREADS,
                CONTEXT_SWITCHES,
                PROCESSOR_QUEUE_LENGTH,
            ]),
        )?;
        Ok(Self {
            namespace: namespace.into(),
            session,
        })
    }
}

impl<P: PdhApi> SubCollector for SystemCollector<P> {
    fn collect(&self, sink: &MetricSink) -> Result<(), CollectError> {
        let data = self.session.collect()?;
        let Some(values) = data.get(NO_INSTANCE) else {
            return Ok(());
        };
        let ns = &self.namespace;

        if let Some(obs) = values.get(SYSTEM_UP_TIME) {
            sink.send(Metric::gauge(
                format!("{ns}_system_boot_time_timestamp_seconds"),
                "Unix timestamp of the last system boot.",
                obs.value,
            ))?;
        }
        let gauges = [
            (PROCESSES, "processes", "Number of processes."),
            (THREADS, "threads", "Number of threads."),
            (PROCESSOR_QUEUE_LENGTH, "processor_queue_length", "Threads in the processor ready queue."),
        ];
        for (counter, suffix, help) in gauges {
            if let Some(obs) = values.get(counter) {
                sink.send(Metric::gauge(format!("{ns}_system_{suffix}"), help, obs.value))?;
            }
        }
        if let Some(obs) = values.get(CONTEXT_SWITCHES) {
            sink.send(Metric::counter(
                format!("{ns}_system_context_switches_total"),
                "Total number of context switches.",
                obs.value,
            ))?;
        }
        Ok(())
    }

    fn close(&self) -> Result<(), CollectError> {
        Ok(self.session.close()?)
    }
}
