//! VM CPU utilisation from Cloud Monitoring

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::gcp::GcpClient;

const MONITORING_API: &str = "https://monitoring.googleapis.com/v3";

pub const CPU_UTILIZATION_METRIC: &str = "compute.googleapis.com/instance/cpu/utilization";

/// Window covered by a CPU query
const WINDOW_SECS: i64 = 300;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TimeSeriesResponse {
    time_series: Vec<TimeSeries>,
    next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct TimeSeries {
    resource: MonitoredResource,
    points: Vec<Point>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct MonitoredResource {
    labels: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct Point {
    interval: PointInterval,
    value: PointValue,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PointInterval {
    end_time: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PointValue {
    double_value: f64,
}

/// One aligned sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuSample {
    pub timestamp: String,
    /// Percent, 0 to 100
    pub percent: f64,
}

/// Samples of one VM
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceCpu {
    pub instance_id: String,
    pub zone: String,
    pub samples: Vec<CpuSample>,
}

impl From<TimeSeries> for InstanceCpu {
    fn from(series: TimeSeries) -> Self {
        let label = |key: &str| {
            series
                .resource
                .labels
                .get(key)
                .cloned()
                .unwrap_or_else(|| "N/A".to_string())
        };
        Self {
            instance_id: label("instance_id"),
            zone: label("zone"),
            samples: series
                .points
                .iter()
                .map(|p| CpuSample {
                    timestamp: p.interval.end_time.clone(),
                    percent: p.value.double_value * 100.0,
                })
                .collect(),
        }
    }
}

/// Query parameters for mean CPU per instance over the five minutes before `now`
pub fn cpu_query(now: DateTime<Utc>) -> Vec<(&'static str, String)> {
    let start = now - Duration::seconds(WINDOW_SECS);
    vec![
        ("filter", format!("metric.type = \"{}\"", CPU_UTILIZATION_METRIC)),
        ("interval.startTime", start.to_rfc3339_opts(SecondsFormat::Secs, true)),
        ("interval.endTime", now.to_rfc3339_opts(SecondsFormat::Secs, true)),
        ("aggregation.alignmentPeriod", "60s".to_string()),
        ("aggregation.perSeriesAligner", "ALIGN_MEAN".to_string()),
        ("aggregation.crossSeriesReducer", "REDUCE_MEAN".to_string()),
        ("aggregation.groupByFields", "resource.label.instance_id".to_string()),
        ("aggregation.groupByFields", "resource.label.zone".to_string()),
        ("view", "FULL".to_string()),
    ]
}

/// Mean CPU utilisation of every VM in `project` over the last five minutes
pub async fn cpu_utilization(gcp: &GcpClient, project: &str) -> Result<Vec<InstanceCpu>> {
    info!(project = %project, "Fetching CPU utilization");
    let url = format!("{}/projects/{}/timeSeries", MONITORING_API, project);
    let base_query = cpu_query(Utc::now());

    let mut instances = Vec::new();
    let mut page_token: Option<String> = None;
    loop {
        let mut query = base_query.clone();
        if let Some(token) = &page_token {
            query.push(("pageToken", token.clone()));
        }
        let page: Option<TimeSeriesResponse> = gcp.get_json(&url, &query).await?;
        let Some(page) = page else { break };
        instances.extend(page.time_series.into_iter().map(InstanceCpu::from));
        match page.next_page_token.filter(|t| !t.is_empty()) {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }
    Ok(instances)
}

pub fn cpu_report(instances: &[InstanceCpu]) -> String {
    if instances.is_empty() {
        return "No CPU utilization data found for the specified project and time range.".to_string();
    }
    let mut report = String::from("CPU Utilization Data:");
    for instance in instances {
        report.push_str(&format!(
            "\n  Instance ID: {}, Zone: {}",
            instance.instance_id, instance.zone
        ));
        for sample in &instance.samples {
            report.push_str(&format!(
                "\n    Timestamp: {}, Value: {:.2}%",
                sample.timestamp, sample.percent
            ));
        }
    }
    report
}
