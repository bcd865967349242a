//! Pre-built mock PDH scenarios for testing.
//!
//! These scenarios provide realistic counter catalogs for a small Windows host.

use super::pdh::MockPdh;
use crate::pdh::path::NO_INSTANCE;
use crate::pdh::types::{
    PERF_100NSEC_TIMER, PERF_AVERAGE_BULK, PERF_COUNTER_COUNTER, PERF_COUNTER_LARGE_RAWCOUNT,
    PERF_COUNTER_RAWCOUNT, PERF_ELAPSED_TIME, WINDOWS_EPOCH,
};

/// Boot time used by the scenarios: 2023-11-14T22:13:20Z.
pub(crate) const SCENARIO_BOOT_TIME: i64 = 1_700_000_000;

impl MockPdh {
    /// Creates a typical four-core host.
    ///
    /// Includes: `Processor Information` with per-core and aggregate instances,
    /// `Memory`, `System`, and a Hyper-V object with no running VMs.
    pub fn typical_host() -> Self {
        let mock = Self::new();
        let cores = ["0,0", "0,1", "0,2", "0,3"];

        let mut instances: Vec<&str> = cores.to_vec();
        instances.extend(["0,_Total", "_Total"]);
        mock.add_object("Processor Information", &instances);

        for (counter, explain) in [
            ("% Idle Time", "Percentage of time the processor was idle."),
            ("% Privileged Time", "Percentage of time spent in privileged mode."),
            ("% User Time", "Percentage of time spent in user mode."),
            ("% Interrupt Time", "Percentage of time spent servicing interrupts."),
            ("% DPC Time", "Percentage of time spent servicing deferred procedure calls."),
        ] {
            mock.define_counter("Processor Information", counter, PERF_100NSEC_TIMER, explain);
        }
        mock.define_counter(
            "Processor Information",
            "Interrupts/sec",
            PERF_COUNTER_COUNTER,
            "Rate of hardware interrupts.",
        )
        .define_counter(
            "Processor Information",
            "% Processor Utility",
            PERF_AVERAGE_BULK,
            "Amount of work the processor is completing.",
        );

        for (index, core) in instances.iter().enumerate() {
            let base = (index as i64 + 1) * 10_000_000;
            mock.set_value("Processor Information", core, "% Idle Time", base * 50, 0)
                .set_value("Processor Information", core, "% Privileged Time", base * 5, 0)
                .set_value("Processor Information", core, "% User Time", base * 20, 0)
                .set_value("Processor Information", core, "% Interrupt Time", base / 10, 0)
                .set_value("Processor Information", core, "% DPC Time", base / 20, 0)
                .set_value("Processor Information", core, "Interrupts/sec", 1_000 * (index as i64 + 1), 0)
                .set_value(
                    "Processor Information",
                    core,
                    "% Processor Utility",
                    base * 24,
                    base * 75,
                );
        }

        mock.add_object("Memory", &[])
            .define_counter(
                "Memory",
                "Available Bytes",
                PERF_COUNTER_LARGE_RAWCOUNT,
                "Physical memory immediately available.",
            )
            .define_counter(
                "Memory",
                "Committed Bytes",
                PERF_COUNTER_LARGE_RAWCOUNT,
                "Committed virtual memory.",
            )
            .define_counter(
                "Memory",
                "Cache Bytes",
                PERF_COUNTER_LARGE_RAWCOUNT,
                "Size of the system file cache.",
            )
            .define_counter(
                "Memory",
                "Page Faults/sec",
                PERF_COUNTER_COUNTER,
                "Rate of page faults.",
            )
            .set_value("Memory", NO_INSTANCE, "Available Bytes", 8_589_934_592, 0)
            .set_value("Memory", NO_INSTANCE, "Committed Bytes", 6_442_450_944, 0)
            .set_value("Memory", NO_INSTANCE, "Cache Bytes", 1_073_741_824, 0)
            .set_value("Memory", NO_INSTANCE, "Page Faults/sec", 123_456, 0);

        mock.add_object("System", &[])
            .define_counter(
                "System",
                "System Up Time",
                PERF_ELAPSED_TIME,
                "Time the computer has been running since it was last started.",
            )
            .define_counter("System", "Processes", PERF_COUNTER_RAWCOUNT, "Number of processes.")
            .define_counter("System", "Threads", PERF_COUNTER_RAWCOUNT, "Number of threads.")
            .define_counter(
                "System",
                "Context Switches/sec",
                PERF_COUNTER_COUNTER,
                "Rate of context switches.",
            )
            .define_counter(
                "System",
                "Processor Queue Length",
                PERF_COUNTER_RAWCOUNT,
                "Threads waiting for a processor.",
            )
            .set_value(
                "System",
                NO_INSTANCE,
                "System Up Time",
                WINDOWS_EPOCH + SCENARIO_BOOT_TIME * 10_000_000,
                0,
            )
            .set_value("System", NO_INSTANCE, "Processes", 142, 0)
            .set_value("System", NO_INSTANCE, "Threads", 1_873, 0)
            .set_value("System", NO_INSTANCE, "Context Switches/sec", 9_876_543, 0)
            .set_value("System", NO_INSTANCE, "Processor Queue Length", 2, 0);

        mock.add_instanced_object("Hyper-V Dynamic Memory VM", &[])
            .define_counter(
                "Hyper-V Dynamic Memory VM",
                "Physical Memory",
                PERF_COUNTER_LARGE_RAWCOUNT,
                "Memory assigned to the virtual machine.",
            )
            .define_counter(
                "Hyper-V Dynamic Memory VM",
                "Average Pressure",
                PERF_COUNTER_RAWCOUNT,
                "Average memory pressure of the virtual machine.",
            );

        mock
    }

    /// Creates a typical host with Hyper-V virtual machines running.
    pub fn host_with_virtual_machines(vms: &[&str]) -> Self {
        let mock = Self::typical_host();
        mock.set_instances("Hyper-V Dynamic Memory VM", vms);
        for (index, vm) in vms.iter().enumerate() {
            let gib = 1_073_741_824 * (index as i64 + 1);
            mock.set_value("Hyper-V Dynamic Memory VM", vm, "Physical Memory", gib, 0)
                .set_value("Hyper-V Dynamic Memory VM", vm, "Average Pressure", 40 + index as i64, 0);
        }
        mock
    }
}
