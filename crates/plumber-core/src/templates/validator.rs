//! Checks user parameters against a template's declared parameters

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use super::descriptor::TemplateParams;
use super::user_params::UserParams;
use crate::error::{Error, Result};

/// Outcome of a parameter check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "validation_result", rename_all = "snake_case")]
pub enum ValidationResult {
    Success,
    Failed { comment: String },
}

impl ValidationResult {
    pub fn failed(comment: impl Into<String>) -> Self {
        Self::Failed {
            comment: comment.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn comment(&self) -> &str {
        match self {
            Self::Success => "Validation Passed",
            Self::Failed { comment } => comment,
        }
    }

    /// Convert a failure into [`Error::ValidationFailed`]
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Success => Ok(()),
            Self::Failed { comment } => Err(Error::ValidationFailed(comment)),
        }
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.comment())
    }
}

/// Validate user parameters against declared ones.
///
/// Unknown keys are reported before missing required keys. Key lists in the
/// comment are sorted.
pub fn validate(params: &TemplateParams, user_inputs: &UserParams) -> ValidationResult {
    let defined: BTreeSet<&str> = params.all().collect();
    let supplied: BTreeSet<&str> = user_inputs.keys().collect();

    let invalid: Vec<&str> = supplied.difference(&defined).copied().collect();
    if !invalid.is_empty() {
        let valid: Vec<&str> = defined.into_iter().collect();
        return ValidationResult::failed(format!(
            "Invalid param(s) passed: {:?}. Valid params are: {:?}",
            invalid, valid
        ));
    }

    let required: BTreeSet<&str> = params.required.iter().map(String::as_str).collect();
    let missing: Vec<&str> = required.difference(&supplied).copied().collect();
    if !missing.is_empty() {
        return ValidationResult::failed(format!("Missing required param(s): {:?}", missing));
    }

    ValidationResult::Success
}

/// Validate raw JSON inputs. Malformed input becomes a failed result.
pub fn validate_json(template_params: &str, user_inputs: &str) -> ValidationResult {
    let parsed = serde_json::from_str::<TemplateParams>(template_params)
        .map_err(Error::from)
        .and_then(|params| Ok((params, UserParams::from_json(user_inputs)?)));

    match parsed {
        Ok((params, inputs)) => validate(&params, &inputs),
        Err(e) => ValidationResult::failed(format!(
            "An unexpected error occurred during validation - {}",
            e
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_target() -> TemplateParams {
        TemplateParams::new(["source", "target"], ["mode"])
    }

    #[test]
    fn test_required_present_passes() {
        let inputs = UserParams::new().with("source", "a").with("target", "b");
        assert_eq!(validate(&source_target(), &inputs), ValidationResult::Success);
    }

    #[test]
    fn test_optional_allowed() {
        let inputs = UserParams::new()
            .with("source", "a")
            .with("target", "b")
            .with("mode", "append");
        assert!(validate(&source_target(), &inputs).is_success());
    }

    #[test]
    fn test_missing_required_mentions_key() {
        let inputs = UserParams::new().with("source", "a");
        let result = validate(&source_target(), &inputs);
        assert!(!result.is_success());
        assert!(result.comment().contains("target"));
        assert!(result.comment().starts_with("Missing required"));
    }

    #[test]
    fn test_invalid_key_reported_first() {
        let inputs = UserParams::new().with("bogus", "x");
        let result = validate(&source_target(), &inputs);
        assert_eq!(
            result.comment(),
            "Invalid param(s) passed: [\"bogus\"]. Valid params are: [\"mode\", \"source\", \"target\"]"
        );
    }

    #[test]
    fn test_extra_key_with_all_required() {
        let inputs = UserParams::new()
            .with("source", "a")
            .with("target", "b")
            .with("bogus", "x");
        let result = validate(&source_target(), &inputs);
        assert!(result.comment().contains("bogus"));
    }

    #[test]
    fn test_empty_declaration_rejects_any_input() {
        let params = TemplateParams::default();
        assert!(validate(&params, &UserParams::new()).is_success());
        assert!(!validate(&params, &UserParams::new().with("a", "1")).is_success());
    }

    #[test]
    fn test_empty_inputs_with_required() {
        let result = validate(&source_target(), &UserParams::new());
        assert_eq!(
            result.comment(),
            "Missing required param(s): [\"source\", \"target\"]"
        );
    }

    #[test]
    fn test_iff_property_over_small_universe() {
        let universe = ["a", "b", "c", "d"];
        let params = TemplateParams::new(["a"], ["b", "c"]);
        // Every subset of the universe as user input
        for mask in 0u8..16 {
            let mut inputs = UserParams::new();
            for (i, key) in universe.iter().enumerate() {
                if mask & (1 << i) != 0 {
                    inputs.insert(*key, "v");
                }
            }
            let keys: BTreeSet<&str> = inputs.keys().collect();
            let defined: BTreeSet<&str> = params.all().collect();
            let expected = keys.is_subset(&defined) && keys.contains("a");
            assert_eq!(validate(&params, &inputs).is_success(), expected, "mask {mask}");
        }
    }

    #[test]
    fn test_validate_json_malformed_inputs() {
        let result = validate_json(r#"{"required": ["a"]}"#, "not json");
        assert!(!result.is_success());
        assert!(result.comment().starts_with("An unexpected error occurred during validation"));

        let result = validate_json(r#"{"required": ["a"]}"#, r#"["a"]"#);
        assert!(result.comment().contains("must be a JSON object"));
    }

    #[test]
    fn test_validate_json_missing_lists() {
        assert!(validate_json("{}", "{}").is_success());
        assert!(validate_json(r#"{"optional": ["x"]}"#, r#"{"x": 1}"#).is_success());
    }

    #[test]
    fn test_into_result() {
        assert!(ValidationResult::Success.into_result().is_ok());
        let err = ValidationResult::failed("nope").into_result().unwrap_err();
        assert!(matches!(err, Error::ValidationFailed(ref c) if c == "nope"));
    }

    #[test]
    fn test_serializes_tagged() {
        let json = serde_json::to_value(ValidationResult::failed("x")).unwrap();
        assert_eq!(json["validation_result"], "failed");
        assert_eq!(json["comment"], "x");
    }
}
