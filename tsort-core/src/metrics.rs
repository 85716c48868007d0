use std::sync::OnceLock;

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

use crate::Error;
use crate::classifier::Classification;
use crate::error::ReasonCode;
use crate::watermark::Timestamp;

const PARTITION_LABEL: &str = "partition";
const CLASS_LABEL: &str = "class";
const REASON_LABEL: &str = "reason";

// The top-level metric registry is created with the GLOBAL_PREFIX
const REGISTRY_GLOBAL_PREFIX: &str = "tsort";

// counters, the _total suffix is added by the client library
const CLASSIFIED_TOTAL: &str = "classified";
const ERRORS_TOTAL: &str = "errors";

const HWM_MICROS: &str = "hwm_micros";

/// The global register of all metrics.
struct GlobalRegistry {
    // metrics are registered once, so the lock is never contended
    registry: parking_lot::Mutex<Registry>,
}

impl GlobalRegistry {
    fn new() -> Self {
        GlobalRegistry {
            registry: parking_lot::Mutex::new(Registry::default()),
        }
    }
}

static GLOBAL_REGISTRY: OnceLock<GlobalRegistry> = OnceLock::new();

fn global_registry() -> &'static GlobalRegistry {
    GLOBAL_REGISTRY.get_or_init(GlobalRegistry::new)
}

/// Metrics of all classifiers in the process, differentiated by the `partition` label.
pub struct ClassifierMetrics {
    pub classified_total: Family<Vec<(String, String)>, Counter>,
    pub errors_total: Family<Vec<(String, String)>, Counter>,
    /// HWM as micros since epoch, absent until the first ON_TIME record
    pub hwm_micros: Family<Vec<(String, String)>, Gauge>,
}

impl ClassifierMetrics {
    fn new() -> Self {
        let metrics = Self {
            classified_total: Family::<Vec<(String, String)>, Counter>::default(),
            errors_total: Family::<Vec<(String, String)>, Counter>::default(),
            hwm_micros: Family::<Vec<(String, String)>, Gauge>::default(),
        };

        let mut registry = global_registry().registry.lock();
        let registry = registry.sub_registry_with_prefix(REGISTRY_GLOBAL_PREFIX);
        registry.register(
            CLASSIFIED_TOTAL,
            "A Counter to keep track of the records classified, by class",
            metrics.classified_total.clone(),
        );
        registry.register(
            ERRORS_TOTAL,
            "A Counter to keep track of the records diverted to the error path, by reason",
            metrics.errors_total.clone(),
        );
        registry.register(
            HWM_MICROS,
            "A Gauge with the current high watermark in microseconds since the epoch",
            metrics.hwm_micros.clone(),
        );
        metrics
    }
}

static CLASSIFIER_METRICS: OnceLock<ClassifierMetrics> = OnceLock::new();

pub fn classifier_metrics() -> &'static ClassifierMetrics {
    CLASSIFIER_METRICS.get_or_init(ClassifierMetrics::new)
}

pub(crate) fn partition_labels(partition: u16) -> Vec<(String, String)> {
    vec![(PARTITION_LABEL.to_string(), partition.to_string())]
}

fn with_label(partition: u16, key: &str, value: &str) -> Vec<(String, String)> {
    let mut labels = partition_labels(partition);
    labels.push((key.to_string(), value.to_string()));
    labels
}

pub(crate) fn record_classification(
    partition: u16,
    classification: Classification,
    hwm: Option<Timestamp>,
) {
    let metrics = classifier_metrics();
    metrics
        .classified_total
        .get_or_create(&with_label(partition, CLASS_LABEL, classification.as_str()))
        .inc();
    if let Some(hwm) = hwm {
        metrics
            .hwm_micros
            .get_or_create(&partition_labels(partition))
            .set(hwm.timestamp_micros());
    }
}

pub(crate) fn record_error(partition: u16, reason: ReasonCode) {
    classifier_metrics()
        .errors_total
        .get_or_create(&with_label(partition, REASON_LABEL, reason.as_str()))
        .inc();
}

/// Snapshot of all metrics in the OpenMetrics text format.
pub fn encode_metrics() -> crate::Result<String> {
    // make sure the families are registered even if nothing was classified yet
    classifier_metrics();

    let registry = global_registry().registry.lock();
    let mut buffer = String::new();
    encode(&mut buffer, &registry)
        .map_err(|e| Error::Metrics(format!("Failed to encode metrics: {e}")))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_classification_metrics() {
        // partitions unique to this test, the registry is process wide
        let partition = 9001;
        let hwm = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();

        record_classification(partition, Classification::OnTime, Some(hwm));
        record_classification(partition, Classification::OnTime, Some(hwm));
        record_classification(partition, Classification::Late, Some(hwm));
        record_error(partition, ReasonCode::MissingEventTime);

        let metrics = classifier_metrics();
        let on_time = metrics
            .classified_total
            .get_or_create(&with_label(partition, CLASS_LABEL, "ON_TIME"))
            .get();
        assert_eq!(on_time, 2);
        let late = metrics
            .classified_total
            .get_or_create(&with_label(partition, CLASS_LABEL, "LATE"))
            .get();
        assert_eq!(late, 1);
        assert_eq!(
            metrics
                .hwm_micros
                .get_or_create(&partition_labels(partition))
                .get(),
            hwm.timestamp_micros()
        );

        let encoded = encode_metrics().unwrap();
        assert!(encoded.contains("tsort_classified_total"));
        assert!(encoded.contains(r#"partition="9001",class="ON_TIME""#));
        assert!(encoded.contains(r#"reason="missing_event_time""#));
        assert!(encoded.contains("tsort_hwm_micros"));
    }

    #[test]
    fn test_no_hwm_leaves_gauge_unset() {
        let partition = 9002;
        record_classification(partition, Classification::Early, None);

        let encoded = encode_metrics().unwrap();
        assert!(!encoded.contains(r#"tsort_hwm_micros{partition="9002"}"#));
    }
}
