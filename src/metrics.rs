//! Metric model and text exposition.
//!
//! Collectors produce plain [`Metric`] samples; publishing turns them into
//! `prometheus` metric families and encodes those with its [`TextEncoder`].

use std::collections::HashMap;

use prometheus::proto::{self, LabelPair, MetricFamily};
use prometheus::{Encoder, TextEncoder};

/// Prometheus metric kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    /// Monotonic value (rates, accumulated times).
    Counter,
    /// Point-in-time value.
    Gauge,
}

impl MetricType {
    fn as_proto(self) -> proto::MetricType {
        match self {
            Self::Counter => proto::MetricType::COUNTER,
            Self::Gauge => proto::MetricType::GAUGE,
        }
    }
}

/// One labeled sample, ready to be published.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: String,
    pub help: String,
    pub metric_type: MetricType,
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

impl Metric {
    pub fn new(
        name: impl Into<String>,
        help: impl Into<String>,
        metric_type: MetricType,
        value: f64,
    ) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            metric_type,
            labels: Vec::new(),
            value,
        }
    }

    pub fn counter(name: impl Into<String>, help: impl Into<String>, value: f64) -> Self {
        Self::new(name, help, MetricType::Counter, value)
    }

    pub fn gauge(name: impl Into<String>, help: impl Into<String>, value: f64) -> Self {
        Self::new(name, help, MetricType::Gauge, value)
    }

    /// Appends a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Groups samples into metric families in first-seen order.
///
/// The help and type of the first sample of a name win; later samples only
/// contribute their labels and value.
pub fn metric_families(metrics: &[Metric]) -> Vec<MetricFamily> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut families: Vec<(MetricType, MetricFamily)> = Vec::new();

    for metric in metrics {
        let position = *index.entry(metric.name.as_str()).or_insert_with(|| {
            let mut family = MetricFamily::default();
            family.set_name(metric.name.clone());
            family.set_help(metric.help.clone());
            family.set_field_type(metric.metric_type.as_proto());
            families.push((metric.metric_type, family));
            families.len() - 1
        });
        let (metric_type, family) = &mut families[position];
        family.mut_metric().push(sample(metric, *metric_type));
    }

    families.into_iter().map(|(_, family)| family).collect()
}

/// Renders metrics in the Prometheus text format.
pub fn render_text(metrics: &[Metric]) -> prometheus::Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&metric_families(metrics), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Lower-cases `raw` and replaces every character outside `[a-z0-9_]` with `_`.
///
/// Runs of replaced characters collapse into one underscore; leading and
/// trailing underscores are trimmed.
pub fn sanitize_metric_name(raw: &str) -> String {
    let mut name = String::with_capacity(raw.len());
    let mut pending_underscore = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_underscore && !name.is_empty() {
                name.push('_');
            }
            pending_underscore = false;
            name.push(c.to_ascii_lowercase());
        } else {
            pending_underscore = true;
        }
    }
    name
}

fn sample(metric: &Metric, family_type: MetricType) -> proto::Metric {
    let mut sample = proto::Metric::default();
    for (key, value) in &metric.labels {
        let mut pair = LabelPair::default();
        pair.set_name(key.clone());
        pair.set_value(value.clone());
        sample.mut_label().push(pair);
    }
    match family_type {
        MetricType::Counter => {
            let mut counter = proto::Counter::default();
            counter.set_value(metric.value);
            sample.set_counter(counter);
        }
        MetricType::Gauge => {
            let mut gauge = proto::Gauge::default();
            gauge.set_value(metric.value);
            sample.set_gauge(gauge);
        }
    }
    sample
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_groups_samples_by_name() {
        let metrics = vec![
            Metric::counter("windows_cpu_time_total", "CPU time.", 1.5)
                .with_label("core", "0,0")
                .with_label("mode", "idle"),
            Metric::gauge("windows_memory_available_bytes", "Available.", 1024.0),
            Metric::counter("windows_cpu_time_total", "CPU time.", 2.0)
                .with_label("core", "0,1")
                .with_label("mode", "idle"),
        ];

        let text = render_text(&metrics).unwrap();
        let expected = "\
# HELP windows_cpu_time_total CPU time.
# TYPE windows_cpu_time_total counter
windows_cpu_time_total{core=\"0,0\",mode=\"idle\"} 1.5
windows_cpu_time_total{core=\"0,1\",mode=\"idle\"} 2
# HELP windows_memory_available_bytes Available.
# TYPE windows_memory_available_bytes gauge
windows_memory_available_bytes 1024
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_render_escapes_labels_and_help() {
        let metrics = vec![
            Metric::gauge("m", "line one\nline \\two", 1.0).with_label("instance", "C:\\ \"x\""),
        ];
        let text = render_text(&metrics).unwrap();
        assert!(text.contains("# HELP m line one\\nline \\\\two\n"));
        assert!(text.contains("m{instance=\"C:\\\\ \\\"x\\\"\"} 1\n"));
    }

    #[test]
    fn test_render_values() {
        let metrics = vec![
            Metric::gauge("a", "A.", f64::NAN),
            Metric::gauge("b", "B.", 0.25),
            Metric::gauge("c", "C.", -3.0),
            Metric::gauge("d", "D.", 8_589_934_592.0),
        ];
        let text = render_text(&metrics).unwrap();
        assert!(text.contains("\na NaN\n"), "{text}");
        assert!(text.contains("\nb 0.25\n"), "{text}");
        assert!(text.contains("\nc -3\n"), "{text}");
        assert!(text.contains("\nd 8589934592\n"), "{text}");
    }

    #[test]
    fn test_first_sample_sets_family_type() {
        let metrics = vec![
            Metric::counter("m", "First.", 1.0).with_label("k", "a"),
            Metric::gauge("m", "Second.", 2.0).with_label("k", "b"),
        ];
        let families = metric_families(&metrics);
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].get_help(), "First.");
        assert_eq!(families[0].get_field_type(), proto::MetricType::COUNTER);
        assert_eq!(families[0].get_metric()[1].get_counter().get_value(), 2.0);
    }

    #[test]
    fn test_render_nothing() {
        assert_eq!(render_text(&[]).unwrap(), "");
    }

    #[test]
    fn test_sanitize_metric_name() {
        assert_eq!(sanitize_metric_name("Physical Memory"), "physical_memory");
        assert_eq!(sanitize_metric_name("% Processor Time"), "processor_time");
        assert_eq!(sanitize_metric_name("Bytes/sec"), "bytes_sec");
        assert_eq!(sanitize_metric_name("Hyper-V VM (Dynamic)"), "hyper_v_vm_dynamic");
        assert_eq!(sanitize_metric_name("already_ok_1"), "already_ok_1");
    }

    #[test]
    fn test_metric_label_lookup() {
        let metric = Metric::gauge("m", "", 0.0).with_label("instance", "a");
        assert_eq!(metric.label("instance"), Some("a"));
        assert_eq!(metric.label("missing"), None);
    }
}
