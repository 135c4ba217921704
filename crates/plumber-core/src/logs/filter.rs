//! Cloud Logging filter expressions

use chrono::{DateTime, Duration, Utc};

/// Severities recognised in free text, scanned in this order
pub const SEVERITIES: [&str; 6] = ["INFO", "DEFAULT", "WARNING", "NOTICE", "DEBUG", "ERROR"];

/// Cloud Logging keeps nothing older than this
pub const LOOKBACK_DAYS: i64 = 90;

/// A kind of resource whose logs are looked up by one label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceSelector {
    pub resource_type: &'static str,
    pub label_key: &'static str,
}

impl ResourceSelector {
    pub const DATAFLOW_JOB: Self = Self {
        resource_type: "dataflow_step",
        label_key: "job_id",
    };
    pub const DATAPROC_CLUSTER_NAME: Self = Self {
        resource_type: "cloud_dataproc_cluster",
        label_key: "cluster_name",
    };
    pub const DATAPROC_CLUSTER_UUID: Self = Self {
        resource_type: "cloud_dataproc_cluster",
        label_key: "cluster_uuid",
    };
    pub const DATAPROC_BATCH: Self = Self {
        resource_type: "cloud_dataproc_batch",
        label_key: "batch_id",
    };

    pub fn filter(&self, label_value: &str, severity: Option<&str>, now: DateTime<Utc>) -> String {
        build_filter(self.resource_type, self.label_key, label_value, severity, now)
    }
}

/// First known severity mentioned in `text`, if any
pub fn match_severity(text: &str) -> Option<&'static str> {
    let upper = text.to_uppercase();
    SEVERITIES.iter().copied().find(|s| upper.contains(s))
}

/// `timestamp >= "<now - 90 days>Z"`
pub fn lookback_clause(now: DateTime<Utc>) -> String {
    let start = now - Duration::days(LOOKBACK_DAYS);
    format!("timestamp >= \"{}Z\"", start.format("%Y-%m-%dT%H:%M:%S%.6f"))
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.trim().replace('\\', "\\\\").replace('"', "\\\""))
}

fn with_severity(mut filter: String, severity: Option<&str>) -> String {
    if let Some(token) = severity.and_then(match_severity) {
        filter.push_str(" AND severity=");
        filter.push_str(token);
    }
    filter
}

/// Filter on one resource label within the lookback window.
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use plumber_core::logs::build_filter;
///
/// let now = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
/// let filter = build_filter("dataflow_step", "job_id", "2024-03-01_00_00_00-1", Some("errors only"), now);
/// assert!(filter.ends_with(" AND severity=ERROR"));
/// ```
pub fn build_filter(
    resource_type: &str,
    label_key: &str,
    label_value: &str,
    severity: Option<&str>,
    now: DateTime<Utc>,
) -> String {
    let filter = format!(
        "resource.type={} AND resource.labels.{}={} AND {}",
        quote(resource_type),
        label_key.trim(),
        quote(label_value),
        lookback_clause(now)
    );
    with_severity(filter, severity)
}

/// Filter on the resource type alone, for "latest logs of this kind"
pub fn build_resource_filter(resource_type: &str, severity: Option<&str>, now: DateTime<Utc>) -> String {
    let resource_type = resource_type.trim().trim_start_matches("resource.type=");
    let filter = format!(
        "resource.type={} AND {}",
        quote(resource_type.trim_matches('"')),
        lookback_clause(now)
    );
    with_severity(filter, severity)
}
