//! Counter type codes and the conversion of raw values into observations.

use crate::metrics::MetricType;

pub const PERF_COUNTER_RAWCOUNT_HEX: u32 = 0x0000_0000;
pub const PERF_COUNTER_LARGE_RAWCOUNT_HEX: u32 = 0x0000_0100;
pub const PERF_COUNTER_RAWCOUNT: u32 = 0x0001_0000;
pub const PERF_COUNTER_LARGE_RAWCOUNT: u32 = 0x0001_0100;
pub const PERF_COUNTER_DELTA: u32 = 0x0040_0400;
pub const PERF_COUNTER_LARGE_DELTA: u32 = 0x0040_0500;
pub const PERF_COUNTER_COUNTER: u32 = 0x1041_0400;
pub const PERF_COUNTER_BULK_COUNT: u32 = 0x1041_0500;
pub const PERF_RAW_FRACTION: u32 = 0x2002_0400;
pub const PERF_LARGE_RAW_FRACTION: u32 = 0x2002_0500;
pub const PERF_COUNTER_TIMER: u32 = 0x2041_0500;
pub const PERF_100NSEC_TIMER: u32 = 0x2051_0500;
pub const PERF_PRECISION_100NS_TIMER: u32 = 0x2057_0500;
pub const PERF_SAMPLE_FRACTION: u32 = 0x20C2_0400;
pub const PERF_100NSEC_TIMER_INV: u32 = 0x2151_0500;
pub const PERF_ELAPSED_TIME: u32 = 0x3024_0500;
pub const PERF_AVERAGE_TIMER: u32 = 0x3002_0400;
pub const PERF_AVERAGE_BULK: u32 = 0x4002_0500;

/// FILETIME of 1970-01-01T00:00:00Z, in 100ns ticks since 1601.
pub const WINDOWS_EPOCH: i64 = 116_444_736_000_000_000;

/// Seconds per 100ns tick.
pub const TICKS_TO_SECONDS: f64 = 1e-7;

/// Semantic kind of a known counter type.
///
/// Codes missing from this table are exported as gauges; the collector notes
/// that in the counter description when it resolves the metadata.
pub fn metric_type_of(type_code: u32) -> Option<MetricType> {
    let kind = match type_code {
        PERF_COUNTER_RAWCOUNT_HEX
        | PERF_COUNTER_LARGE_RAWCOUNT_HEX
        | PERF_COUNTER_RAWCOUNT
        | PERF_COUNTER_LARGE_RAWCOUNT
        | PERF_RAW_FRACTION
        | PERF_LARGE_RAW_FRACTION
        | PERF_SAMPLE_FRACTION
        | PERF_ELAPSED_TIME => MetricType::Gauge,
        PERF_COUNTER_DELTA
        | PERF_COUNTER_LARGE_DELTA
        | PERF_COUNTER_COUNTER
        | PERF_COUNTER_BULK_COUNT
        | PERF_COUNTER_TIMER
        | PERF_100NSEC_TIMER
        | PERF_PRECISION_100NS_TIMER
        | PERF_100NSEC_TIMER_INV
        | PERF_AVERAGE_TIMER
        | PERF_AVERAGE_BULK => MetricType::Counter,
        _ => return None,
    };
    Some(kind)
}

/// Whether the counter reports a (numerator, denominator)-style pair.
pub fn is_pair_type(type_code: u32) -> bool {
    matches!(
        type_code,
        PERF_AVERAGE_BULK | PERF_RAW_FRACTION | PERF_LARGE_RAW_FRACTION
    )
}

/// One counter value for one instance, as produced by a single collection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub metric_type: MetricType,
    pub value: f64,
    /// Second half of a pair counter; `None` for every other type.
    pub second_value: Option<f64>,
}

/// Converts a raw sample according to the counter's type.
///
/// `frequency` is the counter time base and is only consulted for
/// `PERF_ELAPSED_TIME`; without a positive frequency the raw value is kept.
pub fn observe(type_code: u32, first: i64, second: i64, frequency: Option<i64>) -> Observation {
    let metric_type = metric_type_of(type_code).unwrap_or(MetricType::Gauge);

    let (value, second_value) = match type_code {
        PERF_ELAPSED_TIME => match frequency.filter(|f| *f > 0) {
            // Raw values come from the native API; widen so any i64 is safe.
            Some(freq) => {
                let since_epoch = i128::from(first) - i128::from(WINDOWS_EPOCH);
                (since_epoch as f64 / freq as f64, None)
            }
            None => (first as f64, None),
        },
        PERF_100NSEC_TIMER | PERF_PRECISION_100NS_TIMER => {
            (first as f64 * TICKS_TO_SECONDS, None)
        }
        code if is_pair_type(code) => (first as f64, Some(second as f64)),
        _ => (first as f64, None),
    };

    Observation {
        metric_type,
        value,
        second_value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_100ns_timers_convert_to_seconds() {
        for code in [PERF_100NSEC_TIMER, PERF_PRECISION_100NS_TIMER] {
            let obs = observe(code, 123_456_789, 0, None);
            assert!((obs.value - 12.3456789).abs() < 1e-9);
            assert_eq!(obs.metric_type, MetricType::Counter);
            assert_eq!(obs.second_value, None);
        }
    }

    #[test]
    fn test_elapsed_time_extreme_raw_values() {
        let low = observe(PERF_ELAPSED_TIME, i64::MIN + 5, 0, Some(10_000_000));
        let expected = (i64::MIN as f64 - WINDOWS_EPOCH as f64) / 10_000_000.0;
        assert!(low.value.is_finite());
        assert!((low.value - expected).abs() / expected.abs() < 1e-12);

        let high = observe(PERF_ELAPSED_TIME, i64::MAX, 0, Some(1));
        assert!(high.value.is_finite());
        assert!(high.value > 0.0);
    }

    #[test]
    fn test_elapsed_time_uses_epoch_and_frequency() {
        let boot = WINDOWS_EPOCH + 1_700_000_000 * 10_000_000;
        let obs = observe(PERF_ELAPSED_TIME, boot, 0, Some(10_000_000));
        assert!((obs.value - 1_700_000_000.0).abs() < 1e-3);
        assert_eq!(obs.metric_type, MetricType::Gauge);

        let raw = WINDOWS_EPOCH + 3_000;
        let obs = observe(PERF_ELAPSED_TIME, raw, 0, Some(1_000));
        assert!((obs.value - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_elapsed_time_without_frequency_keeps_raw() {
        let obs = observe(PERF_ELAPSED_TIME, 42, 0, Some(0));
        assert_eq!(obs.value, 42.0);
    }

    #[test]
    fn test_pairs_are_preserved() {
        let obs = observe(PERF_AVERAGE_BULK, 700, 1000, None);
        assert_eq!(obs.value, 700.0);
        assert_eq!(obs.second_value, Some(1000.0));
        assert_eq!(obs.metric_type, MetricType::Counter);

        let obs = observe(PERF_RAW_FRACTION, 3, 4, None);
        assert_eq!((obs.value, obs.second_value), (3.0, Some(4.0)));
        assert_eq!(obs.metric_type, MetricType::Gauge);
    }

    #[test]
    fn test_plain_values_pass_through() {
        let obs = observe(PERF_COUNTER_LARGE_RAWCOUNT, 8_589_934_592, 99, None);
        assert_eq!(obs.value, 8_589_934_592.0);
        assert_eq!(obs.second_value, None);

        let obs = observe(PERF_COUNTER_COUNTER, 17, 0, None);
        assert_eq!(obs.metric_type, MetricType::Counter);
    }

    #[test]
    fn test_unknown_code_defaults_to_gauge() {
        assert_eq!(metric_type_of(0xDEAD_BEEF), None);
        let obs = observe(0xDEAD_BEEF, 5, 0, None);
        assert_eq!(obs.metric_type, MetricType::Gauge);
        assert_eq!(obs.value, 5.0);
    }
}
