use prometheus::{Encoder, GaugeVec, IntCounter, Opts, Registry, TextEncoder};

use crate::error::ConfigError;
use crate::label::{normalize_name, LabelSet, SUPPORTED_TAGS};

/// The gauge projecting a resource's tags, plus the counter of skipped polls.
/// Both live in a registry owned by the caller.
pub struct TagMetrics {
    name: String,
    gauge: GaugeVec,
    fetch_failures: IntCounter,
}

impl TagMetrics {
    /// Registers both metrics under the normalized resource name.
    ///
    /// The series with every label empty is created at 0 so the gauge family
    /// is scraped before the first poll. It is never removed, so scrapers see
    /// it next to the real series from then on.
    pub fn register(registry: &Registry, resource: &str) -> Result<Self, ConfigError> {
        let base = normalize_name(resource);
        let name = format!("{base}_metric");

        let invalid = |source| ConfigError::InvalidMetric {
            resource: resource.to_string(),
            source,
        };

        let gauge = GaugeVec::new(
            Opts::new(&name, format!("Shows all the tags for Lambda {resource}")),
            SUPPORTED_TAGS,
        )
        .map_err(invalid)?;

        let fetch_failures = IntCounter::new(
            format!("{base}_fetch_failures_total"),
            format!("Number of failed tag fetches for Lambda {resource}"),
        )
        .map_err(invalid)?;

        register(registry, &name, Box::new(gauge.clone()), resource)?;
        register(
            registry,
            &format!("{base}_fetch_failures_total"),
            Box::new(fetch_failures.clone()),
            resource,
        )?;

        // empty families are left out of the exposition
        gauge
            .get_metric_with_label_values(&LabelSet::empty().values())
            .map_err(invalid)?;

        Ok(Self {
            name,
            gauge,
            fetch_failures,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bumps the series for `labels` by one. Series for earlier tag values
    /// are kept.
    pub fn publish(&self, labels: &LabelSet) -> prometheus::Result<()> {
        self.gauge
            .get_metric_with_label_values(&labels.values())?
            .inc();
        Ok(())
    }

    pub fn record_fetch_failure(&self) {
        self.fetch_failures.inc();
    }

    #[cfg(test)]
    pub fn fetch_failures(&self) -> u64 {
        self.fetch_failures.get()
    }

    #[cfg(test)]
    pub fn value(&self, labels: &LabelSet) -> f64 {
        self.gauge.with_label_values(&labels.values()).get()
    }
}

fn register(
    registry: &Registry,
    name: &str,
    collector: Box<dyn prometheus::core::Collector>,
    resource: &str,
) -> Result<(), ConfigError> {
    registry.register(collector).map_err(|err| match err {
        prometheus::Error::AlreadyReg => ConfigError::DuplicateRegistration {
            name: name.to_string(),
        },
        source => ConfigError::InvalidMetric {
            resource: resource.to_string(),
            source,
        },
    })
}

/// Renders the registry in the Prometheus text exposition format.
pub fn encode(registry: &Registry) -> prometheus::Result<String> {
    let mut buf = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buf)?;

    String::from_utf8(buf).map_err(|err| prometheus::Error::Msg(err.to_string()))
}
