use std::collections::BTreeMap;

/// Label key that carries the metric name in Prometheus-style label sets.
///
/// A label with this key is never written out as a `label_*` column, since the metric name already has its own column.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// A single time-series sample.
///
/// Labels are kept sorted by key so that rows built from the same sample always encode to the same bytes.
#[derive(Clone, Debug)]
pub struct Sample {
    name: String,
    labels: BTreeMap<String, String>,
    timestamp: i64,
    value: f64,
}

impl Sample {
    /// Creates a new `Sample` with no labels.
    ///
    /// `timestamp` is in seconds since the Unix epoch. `value` may be NaN or infinite.
    pub fn new<N>(name: N, timestamp: i64, value: f64) -> Self
    where
        N: Into<String>,
    {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
            timestamp,
            value,
        }
    }

    /// Adds a label to the sample, replacing any existing label with the same key.
    pub fn with_label<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Adds every label from the given iterator to the sample.
    pub fn with_labels<I, K, V>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.labels.extend(labels.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Returns the metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the labels, in ascending key order.
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Returns the labels that become `label_*` columns, skipping the metric-name label.
    pub fn row_labels(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels
            .iter()
            .filter(|(k, _)| k.as_str() != METRIC_NAME_LABEL)
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the timestamp, in seconds since the Unix epoch.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Returns the sample value.
    pub fn value(&self) -> f64 {
        self.value
    }
}
