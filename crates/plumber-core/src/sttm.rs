//! SQL generation from source-to-target mapping sheets (STTM)
//!
//! An STTM is read from Cloud Storage, either as a CSV or as an image of
//! the sheet, and handed to the model together with instructions for the
//! kind of SQL wanted.

use serde::Serialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::gcs::{GcsPath, StorageClient};
use crate::llm::{LanguageModel, Message, strip_code_fences};

const TRANSFORMATION_SQL_PROMPT: &str = "\
You are a data engineer with expertise in Apache Spark SQL on Google Cloud Dataproc.
Generate a single Spark SQL SELECT statement from the attached STTM, which maps
source columns to target columns with their transformation rules.
Use the source table named in the sheet and alias every output column with its
target column name. Keep the query grounded in the sheet and do not invent columns.
Return ONLY the SQL query, without explanations, comments or markdown.";

const BEAM_SQL_PROMPT: &str = "\
You are a data engineer with expertise in Google Cloud Dataflow and Apache Beam SQL.
Generate a Beam SQL SELECT query from the attached STTM, which contains the source
and target column mapping. The query must be executable in a Beam SqlTransform and
its source table must always be `PCOLLECTION`.
Keep the query grounded in the sheet and do not invent columns.
Return ONLY the raw SQL query. Do not wrap it in markdown backticks and do not
format it as a Java string.";

const DBT_MODEL_PROMPT: &str = "\
You are an analytics engineer writing dbt models for BigQuery.
Generate the SQL of a dbt model from the attached STTM, which maps source columns to
target columns with their transformation rules. Reference sources with
{{ source('<dataset>', '<table>') }} and upstream models with {{ ref('<model>') }}.
Start the model with a {{ config(materialized='table') }} block.
Keep the model grounded in the sheet and do not invent columns.
Return ONLY the model SQL, without explanations or markdown.";

/// What the STTM is turned into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlTarget {
    /// Spark SQL for a Dataproc template transformation
    Transformation,
    /// Beam SQL over `PCOLLECTION` for a Dataflow pipeline
    BeamSql,
    DbtModel,
}

impl SqlTarget {
    fn instructions(self) -> &'static str {
        match self {
            Self::Transformation => TRANSFORMATION_SQL_PROMPT,
            Self::BeamSql => BEAM_SQL_PROMPT,
            Self::DbtModel => DBT_MODEL_PROMPT,
        }
    }
}

/// Mime type for an STTM image, `None` for CSV
fn image_mime_type(extension: &str) -> Result<Option<&'static str>> {
    match extension {
        "csv" => Ok(None),
        "png" => Ok(Some("image/png")),
        "jpg" | "jpeg" => Ok(Some("image/jpeg")),
        "webp" => Ok(Some("image/webp")),
        other => Err(Error::ValidationFailed(format!(
            "Unsupported STTM file type '{}'. Use a CSV or an image (png, jpg, webp).",
            other
        ))),
    }
}

/// Prompt carrying the STTM, inline as text for CSV or as an attachment
pub fn sttm_message(target: SqlTarget, path: &GcsPath, bytes: Vec<u8>) -> Result<Message> {
    let extension = path.extension().unwrap_or_default();
    match image_mime_type(&extension)? {
        None => {
            let sheet = String::from_utf8(bytes)
                .map_err(|_| Error::ValidationFailed(format!("STTM '{}' is not valid UTF-8 text", path)))?;
            Ok(Message::user(format!("{}\n\nSTTM:\n{}", target.instructions(), sheet)))
        }
        Some(mime_type) => Ok(Message::user(target.instructions()).with_attachment(mime_type, bytes)),
    }
}

/// Ask the model for SQL from an already downloaded sheet
pub async fn generate_sql(
    model: &dyn LanguageModel,
    target: SqlTarget,
    path: &GcsPath,
    bytes: Vec<u8>,
) -> Result<String> {
    let message = sttm_message(target, path, bytes)?;
    let response = model.complete(vec![message]).await?;
    let sql = strip_code_fences(&response.content);
    if sql.is_empty() {
        return Err(Error::LLMError(format!("No SQL was generated from '{}'", path)));
    }
    Ok(sql)
}

fn parse_sttm_path(gcs_url: &str) -> Result<GcsPath> {
    let path: GcsPath = gcs_url.parse()?;
    if path.object.is_empty() {
        return Err(Error::InvalidInput(format!("'{}' does not name an STTM file", gcs_url)));
    }
    Ok(path)
}

/// Read the sheet at `gcs_url` and generate SQL for `target`
pub async fn generate_sql_from_gcs(
    storage: &StorageClient,
    model: &dyn LanguageModel,
    target: SqlTarget,
    gcs_url: &str,
) -> Result<String> {
    let path = parse_sttm_path(gcs_url)?;
    info!(path = %path, target = ?target, "Generating SQL from STTM");
    let bytes = storage.read_object(&path).await?;
    generate_sql(model, target, &path, bytes).await
}

/// Where the dbt model for an STTM at `<project>/<...>/<name>.<ext>` goes:
/// `<project>/models/<name>.sql` in the same bucket
pub fn dbt_model_path(sttm: &GcsPath) -> Result<GcsPath> {
    let Some((project, _)) = sttm.object.split_once('/') else {
        return Err(Error::InvalidInput(format!(
            "'{}' must live inside a dbt project folder, e.g. gs://bucket/project/sttm.csv",
            sttm
        )));
    };
    let file_name = sttm.file_name();
    let stem = file_name.split('.').next().unwrap_or(file_name);
    Ok(GcsPath::new(
        sttm.bucket.clone(),
        format!("{}/models/{}.sql", project, stem),
    ))
}

/// A dbt model generated and written next to its project
#[derive(Debug, Clone, Serialize)]
pub struct DbtModel {
    pub output_path: String,
    pub sql: String,
}

/// Generate a dbt model from an STTM and store it under the project's `models/`
pub async fn generate_dbt_model(
    storage: &StorageClient,
    model: &dyn LanguageModel,
    gcs_url: &str,
) -> Result<DbtModel> {
    let sttm = parse_sttm_path(gcs_url)?;
    let output = dbt_model_path(&sttm)?;
    let sql = generate_sql_from_gcs(storage, model, SqlTarget::DbtModel, gcs_url).await?;
    storage
        .upload_bytes(&output, "text/plain", sql.clone().into_bytes())
        .await?;
    info!(output = %output, "Stored dbt model");
    Ok(DbtModel {
        output_path: output.to_string(),
        sql,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedModel;

    fn path(s: &str) -> GcsPath {
        s.parse().unwrap()
    }

    #[test]
    fn test_csv_sheet_inlined_as_text() {
        let message = sttm_message(
            SqlTarget::BeamSql,
            &path("gs://b/sheets/orders.csv"),
            b"source,target\nid,order_id".to_vec(),
        )
        .unwrap();
        assert!(message.content.contains("PCOLLECTION"));
        assert!(message.content.ends_with("STTM:\nsource,target\nid,order_id"));
        assert!(message.attachments.is_empty());
    }

    #[test]
    fn test_image_sheet_attached() {
        let message = sttm_message(SqlTarget::Transformation, &path("gs://b/sheet.PNG"), vec![1, 2, 3]).unwrap();
        assert_eq!(message.attachments.len(), 1);
        assert_eq!(message.attachments[0].mime_type, "image/png");
        assert_eq!(message.attachments[0].bytes, vec![1, 2, 3]);
    }

    #[test]
    fn test_unsupported_sheet_type() {
        let err = sttm_message(SqlTarget::DbtModel, &path("gs://b/sheet.xlsx"), Vec::new()).unwrap_err();
        assert!(matches!(err, Error::ValidationFailed(_)));
        assert!(sttm_message(SqlTarget::DbtModel, &path("gs://b/sheet"), Vec::new()).is_err());
    }

    #[tokio::test]
    async fn test_generate_sql_strips_fences() {
        let model = ScriptedModel::new(["```sql\nSELECT id AS order_id FROM PCOLLECTION\n```"]);
        let sql = generate_sql(&model, SqlTarget::BeamSql, &path("gs://b/s.csv"), b"id,order_id".to_vec())
            .await
            .unwrap();
        assert_eq!(sql, "SELECT id AS order_id FROM PCOLLECTION");
    }

    #[tokio::test]
    async fn test_generate_sql_rejects_empty_answer() {
        let model = ScriptedModel::new(["```sql\n```"]);
        let result = generate_sql(&model, SqlTarget::Transformation, &path("gs://b/s.csv"), b"a".to_vec()).await;
        assert!(matches!(result, Err(Error::LLMError(_))));
    }

    #[test]
    fn test_dbt_model_path() {
        let out = dbt_model_path(&path("gs://bucket/shop/sttm/orders.csv")).unwrap();
        assert_eq!(out.to_string(), "gs://bucket/shop/models/orders.sql");
        assert!(dbt_model_path(&path("gs://bucket/orders.csv")).is_err());
    }

    #[test]
    fn test_sttm_path_needs_object() {
        assert!(parse_sttm_path("gs://bucket").is_err());
        assert!(parse_sttm_path("/local/file.csv").is_err());
    }
}
