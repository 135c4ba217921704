//! Template descriptors as they appear in the Dataflow template catalog

use std::fmt;

use serde::{Deserialize, Serialize};

/// Launch mechanism of a Dataflow template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemplateKind {
    /// Container-image template launched with `gcloud dataflow flex-template run`
    Flex,
    /// Pre-staged template launched with `gcloud dataflow jobs run`
    Classic,
}

impl TemplateKind {
    /// Classify a template from its GCS path and optional declared type.
    ///
    /// Flex iff the declared type is `FLEX` (any case) or the path has a
    /// `/flex/` segment.
    pub fn resolve(gcs_path: Option<&str>, declared_type: Option<&str>) -> Self {
        let declared_flex = declared_type.is_some_and(|t| t.trim().eq_ignore_ascii_case("flex"));
        let path_flex = gcs_path.is_some_and(|p| p.contains("/flex/"));
        if declared_flex || path_flex {
            Self::Flex
        } else {
            Self::Classic
        }
    }

    pub fn is_flex(self) -> bool {
        self == Self::Flex
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flex => write!(f, "flex"),
            Self::Classic => write!(f, "classic"),
        }
    }
}

/// Declared parameters of a template; missing lists read as empty
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateParams {
    pub required: Vec<String>,
    pub optional: Vec<String>,
}

impl TemplateParams {
    pub fn new<R, O>(required: R, optional: O) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
            optional: optional.into_iter().map(Into::into).collect(),
        }
    }

    /// Every declared name, required first, in declaration order
    pub fn all(&self) -> impl Iterator<Item = &str> {
        self.required
            .iter()
            .chain(self.optional.iter())
            .map(String::as_str)
    }
}

/// Wire form of a descriptor, before the kind is resolved
#[derive(Debug, Clone, Deserialize)]
struct RawDescriptor {
    template_name: String,
    #[serde(default, alias = "template_path")]
    template_gcs_path: Option<String>,
    #[serde(default, rename = "type")]
    declared_type: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    params: Option<TemplateParams>,
}

/// A launchable template. Read-only once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawDescriptor")]
pub struct TemplateDescriptor {
    pub template_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_gcs_path: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub declared_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<TemplateParams>,
    /// Resolved once from the path and declared type
    pub kind: TemplateKind,
}

impl From<RawDescriptor> for TemplateDescriptor {
    fn from(raw: RawDescriptor) -> Self {
        let kind = TemplateKind::resolve(raw.template_gcs_path.as_deref(), raw.declared_type.as_deref());
        Self {
            template_name: raw.template_name,
            template_gcs_path: raw.template_gcs_path,
            declared_type: raw.declared_type,
            description: raw.description,
            params: raw.params,
            kind,
        }
    }
}

impl TemplateDescriptor {
    pub fn new(name: impl Into<String>, gcs_path: Option<String>, params: Option<TemplateParams>) -> Self {
        let kind = TemplateKind::resolve(gcs_path.as_deref(), None);
        Self {
            template_name: name.into(),
            template_gcs_path: gcs_path,
            declared_type: None,
            description: None,
            params,
            kind,
        }
    }

    /// Declare the type explicitly and re-resolve the kind
    pub fn with_declared_type(mut self, declared_type: impl Into<String>) -> Self {
        self.declared_type = Some(declared_type.into());
        self.kind = TemplateKind::resolve(
            self.template_gcs_path.as_deref(),
            self.declared_type.as_deref(),
        );
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Kind of a template launched from another path (e.g. a custom build).
    ///
    /// The path's own `/flex/` segment or this descriptor's declared type
    /// decides.
    pub fn kind_for_path(&self, path: &str) -> TemplateKind {
        TemplateKind::resolve(Some(path), self.declared_type.as_deref())
    }

    /// Parse one descriptor from JSON; a non-empty array yields its first element
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        match value {
            serde_json::Value::Array(items) if !items.is_empty() => {
                serde_json::from_value(items.into_iter().next().unwrap_or_default())
            }
            other => serde_json::from_value(other),
        }
    }
}
