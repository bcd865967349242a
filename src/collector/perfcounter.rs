//! Configuration-driven subsystem: arbitrary performance objects.
//!
//! Every configured object becomes one sub-collector named after it. Metric
//! names are `<namespace>_perfcounter_<object name>_<metric>`; pair counters
//! also export the secondary value as `<metric>_base`.

use std::collections::BTreeMap;

use crate::config::{ObjectConfig, PerfcounterConfig};
use crate::metrics::{Metric, MetricType, sanitize_metric_name};
use crate::pdh::{NO_INSTANCE, PdhApi, QuerySession};

use super::{CollectError, MetricSink, Registration, SubCollector};

pub const SUBSYSTEM: &str = "perfcounter";

/// One registration per configured object.
pub fn registrations<P>(api: &P, namespace: &str, config: &PerfcounterConfig) -> Vec<Registration>
where
    P: PdhApi + Clone + 'static,
{
    config
        .objects
        .iter()
        .map(|object| {
            let (api, namespace, object) = (api.clone(), namespace.to_string(), object.clone());
            Registration::new(object.name.clone(), move || {
                Ok(Box::new(ObjectCollector::new(api, &namespace, object)?) as Box<dyn SubCollector>)
            })
        })
        .collect()
}

#[derive(Debug, Clone)]
struct ExportedCounter {
    counter: String,
    metric_name: String,
    metric_type: Option<MetricType>,
    labels: BTreeMap<String, String>,
}

/// Collects the configured counters of one performance object.
pub struct ObjectCollector<P: PdhApi> {
    instance_label: String,
    counters: Vec<ExportedCounter>,
    session: QuerySession<P>,
}

impl<P: PdhApi> ObjectCollector<P> {
    pub fn new(api: P, namespace: &str, config: ObjectConfig) -> Result<Self, CollectError> {
        let prefix = format!(
            "{}_perfcounter_{}",
            namespace,
            sanitize_metric_name(&config.name)
        );
        let counters: Vec<ExportedCounter> = config
            .counters
            .iter()
            .map(|c| ExportedCounter {
                counter: c.name.clone(),
                metric_name: format!(
                    "{}_{}",
                    prefix,
                    sanitize_metric_name(c.metric.as_deref().unwrap_or(&c.name))
                ),
                metric_type: c.metric_type.map(MetricType::from),
                labels: c.labels.clone(),
            })
            .collect();

        let names: Vec<String> = counters.iter().map(|c| c.counter.clone()).collect();
        let session = QuerySession::open(api, config.object, &config.instances, &names)?;

        Ok(Self {
            instance_label: config.instance_label,
            counters,
            session,
        })
    }
}

impl<P: PdhApi> SubCollector for ObjectCollector<P> {
    fn collect(&self, sink: &MetricSink) -> Result<(), CollectError> {
        let data = self.session.collect()?;
        let mut instances: Vec<_> = data.keys().collect();
        instances.sort();

        for exported in &self.counters {
            let help = self
                .session
                .counter(&exported.counter)
                .map(|c| c.description.clone())
                .unwrap_or_default();

            for instance in &instances {
                let Some(obs) = data[*instance].get(&exported.counter) else {
                    continue;
                };
                let metric_type = exported.metric_type.unwrap_or(obs.metric_type);

                let labeled = |name: String, value: f64| {
                    let mut metric = Metric::new(name, help.as_str(), metric_type, value);
                    if instance.as_str() != NO_INSTANCE {
                        metric = metric.with_label(self.instance_label.as_str(), instance.as_str());
                    }
                    for (key, label) in &exported.labels {
                        metric = metric.with_label(key.as_str(), label.as_str());
                    }
                    metric
                };

                sink.send(labeled(exported.metric_name.clone(), obs.value))?;
                if let Some(base) = obs.second_value {
                    sink.send(labeled(format!("{}_base", exported.metric_name), base))?;
                }
            }
        }
        Ok(())
    }

    fn close(&self) -> Result<(), CollectError> {
        Ok(self.session.close()?)
    }
}
