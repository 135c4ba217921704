//! Reading entries from Cloud Logging

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::{StreamExt, pin_mut};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::Result;
use crate::gcp::GcpClient;

const ENTRIES_LIST_URL: &str = "https://logging.googleapis.com/v2/entries:list";

/// Largest page requested from the API
const MAX_PAGE_SIZE: usize = 100;

/// One log entry; only the fields worth showing are kept
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogEntry {
    pub log_name: String,
    pub timestamp: String,
    pub severity: Option<String>,
    pub insert_id: String,
    pub resource: Value,
    pub text_payload: Option<String>,
    pub json_payload: Option<Value>,
    pub proto_payload: Option<Value>,
}

impl LogEntry {
    /// One-line rendering used in reports
    pub fn summary(&self) -> String {
        let payload = match (&self.text_payload, &self.json_payload, &self.proto_payload) {
            (Some(text), _, _) => text.trim().to_string(),
            (None, Some(json), _) => json
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| json.to_string()),
            (None, None, Some(proto)) => proto.to_string(),
            (None, None, None) => String::new(),
        };
        format!(
            "[{}] {} {}: {}",
            self.timestamp,
            self.severity.as_deref().unwrap_or("DEFAULT"),
            self.log_name.rsplit('/').next().unwrap_or_default(),
            payload
        )
    }
}

/// One page of `entries:list`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogPage {
    pub entries: Vec<LogEntry>,
    pub next_page_token: Option<String>,
}

/// Where log entries come from
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Fetch one page, newest entries first
    async fn page(
        &self,
        project: &str,
        filter: &str,
        page_size: usize,
        page_token: Option<String>,
    ) -> Result<LogPage>;
}

/// Cloud Logging v2 over REST
#[derive(Debug, Clone)]
pub struct CloudLoggingClient {
    gcp: GcpClient,
}

impl CloudLoggingClient {
    pub fn new(gcp: GcpClient) -> Self {
        Self { gcp }
    }
}

#[async_trait]
impl LogSource for CloudLoggingClient {
    async fn page(
        &self,
        project: &str,
        filter: &str,
        page_size: usize,
        page_token: Option<String>,
    ) -> Result<LogPage> {
        let mut body = json!({
            "resourceNames": [format!("projects/{}", project)],
            "filter": filter,
            "orderBy": "timestamp desc",
            "pageSize": page_size,
        });
        if let Some(token) = page_token {
            body["pageToken"] = Value::String(token);
        }
        let page: Option<LogPage> = self.gcp.post_json(ENTRIES_LIST_URL, &body).await?;
        Ok(page.unwrap_or_default())
    }
}

/// Entries matching `filter`, pulled one page at a time.
///
/// Pages are only requested while the consumer keeps reading.
pub fn entries<'a>(
    source: &'a dyn LogSource,
    project: &'a str,
    filter: &'a str,
    page_size: usize,
) -> impl Stream<Item = Result<LogEntry>> + 'a {
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
    async_stream::try_stream! {
        let mut page_token: Option<String> = None;
        loop {
            let page = source.page(project, filter, page_size, page_token.take()).await?;
            debug!(entries = page.entries.len(), "Fetched log page");
            for entry in page.entries {
                yield entry;
            }
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
    }
}

/// At most `limit` entries, rendered as `Entry <n>: <summary>`
pub async fn fetch_entries(
    source: &dyn LogSource,
    project: &str,
    filter: &str,
    limit: usize,
) -> Result<Vec<String>> {
    let stream = entries(source, project, filter, limit).take(limit);
    pin_mut!(stream);

    let mut rendered = Vec::new();
    while let Some(entry) = stream.next().await {
        let entry = entry?;
        rendered.push(format!("Entry {}: {}", rendered.len() + 1, entry.summary()));
    }
    Ok(rendered)
}
