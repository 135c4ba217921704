//! The Dataflow template catalog

use std::path::Path;

use tracing::{debug, info, warn};

use super::descriptor::TemplateDescriptor;
use crate::error::{Error, Result};
use crate::llm::{LanguageModel, strip_code_fences};

/// Answer the model gives when nothing in the catalog fits
const NO_MATCH_SENTINEL: &str = "NO SUITABLE TEMPLATE FOUND";

/// Words that carry no signal when matching a task to a template
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "the", "to", "from", "into", "in", "of", "for", "with", "data", "move",
    "load", "job", "template", "using", "me", "i", "want", "please", "my",
];

const SELECT_TEMPLATE_PROMPT: &str = r#"You are an expert assistant for Google Cloud Dataflow templates.
Read the JSON list of available templates and find the best matching template(s) for the user's task.

Task: "{task}"

Available templates (JSON):
{catalog}

Rules:
1. If exactly one template clearly matches, return a JSON array containing only that template object.
2. If several templates are very similar (e.g. "MongoDB to BigQuery" and "MongoDB to BigQuery CDC"), return all of them in the array.
3. Return ONLY the JSON array of complete, unmodified template objects. No prose, no markdown.
4. If no template clearly matches, return exactly: NO SUITABLE TEMPLATE FOUND"#;

/// All known Dataflow templates, loaded once
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: Vec<TemplateDescriptor>,
}

impl TemplateCatalog {
    pub fn new(templates: Vec<TemplateDescriptor>) -> Self {
        Self { templates }
    }

    /// Load a catalog file (a JSON array of descriptors)
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("Template catalog {}", path.display()))
            } else {
                Error::Io(e)
            }
        })?;
        let catalog = Self::from_json(&json)?;
        info!(path = %path.display(), templates = catalog.len(), "Loaded template catalog");
        Ok(catalog)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let templates: Vec<TemplateDescriptor> = serde_json::from_str(json)?;
        Ok(Self { templates })
    }

    pub fn templates(&self) -> &[TemplateDescriptor] {
        &self.templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Find a template by name, exact match first, then ignoring case
    pub fn find(&self, name: &str) -> Result<&TemplateDescriptor> {
        let name = name.trim();
        self.templates
            .iter()
            .find(|t| t.template_name == name)
            .or_else(|| {
                self.templates
                    .iter()
                    .find(|t| t.template_name.eq_ignore_ascii_case(name))
            })
            .ok_or_else(|| Error::TemplateNotFound(name.to_string()))
    }

    /// Offline keyword ranking of templates for a task, best first
    pub fn search(&self, task: &str, limit: usize) -> Vec<&TemplateDescriptor> {
        let terms = keywords(task);
        if terms.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, &TemplateDescriptor)> = self
            .templates
            .iter()
            .filter_map(|t| {
                let mut haystack = keywords(&t.template_name);
                if let Some(description) = &t.description {
                    haystack.extend(keywords(description));
                }
                let score = terms.iter().filter(|term| haystack.contains(term)).count();
                (score > 0).then_some((score, t))
            })
            .collect();

        // Stable sort keeps catalog order among equal scores
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().take(limit).map(|(_, t)| t).collect()
    }

    /// Ask the model to pick templates for a task.
    ///
    /// Answers are mapped back onto catalog entries by name so callers always
    /// get catalog data. Falls back to keyword search when the model fails.
    pub async fn select(&self, model: &dyn LanguageModel, task: &str) -> Result<Vec<TemplateDescriptor>> {
        let catalog_json = serde_json::to_string(&self.templates)?;
        let prompt = SELECT_TEMPLATE_PROMPT
            .replace("{task}", task)
            .replace("{catalog}", &catalog_json);

        let answer = match model.prompt(&prompt).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, "Template selection by model failed, using keyword search");
                return Ok(self.search(task, 3).into_iter().cloned().collect());
            }
        };

        let selected = self.resolve_selection(&answer)?;
        debug!(task = %task, selected = selected.len(), "Selected templates");
        Ok(selected)
    }

    fn resolve_selection(&self, answer: &str) -> Result<Vec<TemplateDescriptor>> {
        let answer = strip_code_fences(answer);
        if answer.contains(NO_MATCH_SENTINEL) {
            return Ok(Vec::new());
        }

        let picked: Vec<serde_json::Value> = serde_json::from_str(&answer)
            .map_err(|e| Error::LLMError(format!("template selection was not a JSON array: {}", e)))?;

        Ok(picked
            .iter()
            .filter_map(|v| v.get("template_name").and_then(|n| n.as_str()))
            .filter_map(|name| self.find(name).ok())
            .cloned()
            .collect())
    }
}

fn keywords(text: &str) -> Vec<String> {
    // Split CamelCase and snake_case names as well as prose
    let mut spaced = String::with_capacity(text.len() * 2);
    let mut prev_lower = false;
    for c in text.chars() {
        if c.is_ascii_uppercase() && prev_lower {
            spaced.push(' ');
        }
        prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        spaced.push(c);
    }

    spaced
        .split(|c: char| !c.is_ascii_alphanumeric())
        .map(str::to_ascii_lowercase)
        .filter(|w| !w.is_empty() && !STOPWORDS.contains(&w.as_str()))
        .collect()
}
